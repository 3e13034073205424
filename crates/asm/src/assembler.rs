//! The multi-pass assembler core. Turns a syntax-checked AST into a binary
//! archive: macros are tabled and expanded, layout directives and labels are
//! resolved against the running address, constants and operands are
//! evaluated, and the surviving instructions are encoded.

use rustc_hash::FxHashMap;
use svm_arch::Opcode;
use svm_ar::{Archive, DebugFlags, DebugSymbol};
use tracing::trace;

use crate::ast::{List, ListKind, Node, Value, ValueKind};
use crate::diag::Diagnostic;
use crate::eval::{self, EvalError, EvalErrorKind};
use crate::number::parse_number;
use crate::parser::Ast;
use crate::position::Position;
use crate::scope::Scope;
use crate::syntax::{self, FreshNames};

/// Upper bound on macro expansions per assembly, so a self-recursive macro
/// becomes a diagnostic instead of a hang.
const MACRO_EXPANSION_LIMIT: usize = 10_000;

/// Assembler context for one module build.
pub struct Assembler {
    /// Labels and constants mapped to their addresses and values.
    symbols: FxHashMap<String, i64>,
    /// Macro definitions, keyed by scoped name.
    macros: FxHashMap<String, List>,
    /// Address at which the next instruction is written.
    address: i64,
    /// One-shot flags attached to the next emitted debug record.
    flags: DebugFlags,
    /// Emit debug symbols?
    debug: bool,
    names: FreshNames,
    out: Archive,
}

impl Assembler {
    pub fn new(debug: bool) -> Assembler {
        Assembler {
            symbols: FxHashMap::default(),
            macros: FxHashMap::default(),
            address: 0,
            flags: DebugFlags::default(),
            debug,
            names: FreshNames::default(),
            out: Archive::new(),
        }
    }

    /// Compiles the given source AST into an archive.
    pub fn assemble(&mut self, mut ast: Ast) -> Result<Archive, Diagnostic> {
        trace!("syntax pass");
        syntax::verify(ast.nodes_mut(), &mut self.names)?;

        trace!("resolving macros");
        self.resolve_macros(ast.nodes_mut())?;

        trace!("expanding macro invocations");
        self.expand_invocations(ast.nodes_mut())?;

        trace!("pre-resolving layout directives");
        self.preresolve_layout(ast.nodes_mut())?;

        trace!("resolving labels");
        self.resolve_labels(ast.nodes_mut())?;

        trace!("evaluating constants");
        self.evaluate_constants(ast.nodes_mut())?;

        trace!("evaluating instruction operands");
        self.evaluate_operands(ast.nodes_mut())?;

        trace!("emitting code");
        self.emit(ast.nodes())?;

        Ok(std::mem::take(&mut self.out))
    }

    /// Returns true if the given name is already taken by a label, constant
    /// or macro.
    fn has_symbol(&self, name: &str) -> bool {
        let key = name.to_lowercase();
        self.symbols.contains_key(&key) || self.macros.contains_key(&key)
    }

    /// Finds macro definitions, moves them into the macro table under their
    /// scoped name, and removes them from the AST.
    fn resolve_macros(&mut self, nodes: &mut List) -> Result<(), Diagnostic> {
        let mut scope = Scope::root();
        let mut index = 0;

        while index < nodes.len() {
            if let Some(next) = scope_step(nodes.at(index), &scope) {
                scope = next;
                index += 1;
                continue;
            }

            if !nodes.at(index).is_list(ListKind::Macro) {
                index += 1;
                continue;
            }

            let mut m = match nodes.remove(index) {
                Node::List(list) => list,
                Node::Value(_) => unreachable!("macro nodes are lists"),
            };

            let name = m.at(0).as_value().expect("macro name").clone();
            let scoped = scope.join(&name.text).as_str().to_string();

            if self.has_symbol(&scoped) {
                return Err(Diagnostic::new(
                    name.pos,
                    format!("duplicate symbol definition {scoped:?}"),
                ));
            }

            *m.at_mut(0).as_value_mut().expect("macro name") =
                Value::new(name.pos, ValueKind::Ident, scoped.clone());
            self.macros.insert(scoped.to_lowercase(), m);
        }
        Ok(())
    }

    /// Replaces macro invocations with a freshly copied macro body, with the
    /// caller's operands substituted for the parameters and inner scopes
    /// renamed so repeated expansion cannot collide.
    fn expand_invocations(&mut self, nodes: &mut List) -> Result<(), Diagnostic> {
        let mut scope = Scope::root();
        let mut index = 0;
        let mut budget = MACRO_EXPANSION_LIMIT;

        while index < nodes.len() {
            if let Some(next) = scope_step(nodes.at(index), &scope) {
                scope = next;
                index += 1;
                continue;
            }

            let Some(instr) = nodes
                .at(index)
                .as_list()
                .filter(|l| l.kind == ListKind::Instruction)
            else {
                index += 1;
                continue;
            };

            let name = instr.at(0).as_value().expect("instruction name").clone();
            let Some(macro_def) = self.find_macro(&name.text, &scope) else {
                index += 1;
                continue;
            };

            if budget == 0 {
                return Err(Diagnostic::new(
                    name.pos,
                    format!("macro expansion limit reached while expanding {:?}", name.text),
                ));
            }
            budget -= 1;

            // Work on a copy; the substitutions below are per-invocation.
            let mut macro_def = macro_def.clone();

            let params = macro_args(&macro_def);
            let values: Vec<Node> = instr.children()[1..].to_vec();
            if params.len() != values.len() {
                return Err(Diagnostic::new(
                    name.pos,
                    format!(
                        "invalid number of arguments in macro invocation; expected {}, have {}",
                        params.len(),
                        values.len()
                    ),
                ));
            }

            let mut children = macro_def.take_children();
            let mut body = children.split_off(1 + params.len());

            rename_scopes(&mut body, &mut self.names);
            substitute_params(&mut body, &params, &values);

            nodes.replace_at(index, body);
            // Do not advance: the spliced body may itself start with an
            // invocation of another macro.
        }
        Ok(())
    }

    /// Returns the macro with the given name, searching the scope tree from
    /// the innermost scope outwards.
    fn find_macro(&self, name: &str, scope: &Scope) -> Option<&List> {
        if let Some(m) = self.macros.get(&name.to_lowercase()) {
            return Some(m);
        }

        let mut s = scope.clone();
        loop {
            if let Some(m) = self.macros.get(&s.key(name)) {
                return Some(m);
            }
            if s.is_root() {
                return None;
            }
            s = s.parent();
        }
    }

    /// Evaluates the operands of `address` and `reserve` directives. Their
    /// values determine encoded lengths, so they must be known before the
    /// label pass and cannot themselves depend on labels.
    fn preresolve_layout(&mut self, nodes: &mut List) -> Result<(), Diagnostic> {
        let mut scope = Scope::root();
        self.address = 0;

        for index in 0..nodes.len() {
            if let Some(next) = scope_step(nodes.at(index), &scope) {
                scope = next;
                continue;
            }

            let is_layout = nodes
                .at(index)
                .as_list()
                .filter(|l| l.kind == ListKind::Instruction)
                .and_then(|l| l.at(0).text_of(ValueKind::Ident))
                .is_some_and(|name| {
                    name.eq_ignore_ascii_case("address") || name.eq_ignore_ascii_case("reserve")
                });

            if is_layout {
                let address = self.address;
                let symbols = &self.symbols;
                let resolve = move |scope: &Scope, name: &str| {
                    resolve_reference(symbols, address, scope, name)
                };
                let instr = nodes.at_mut(index).as_list_mut().expect("instruction");
                eval::evaluate(instr, &resolve, &scope).map_err(eval_diag)?;
            }

            self.address += encoded_len(nodes.at(index), self.address)?;
        }
        Ok(())
    }

    /// Walks the node list summing encoded lengths; label definitions are
    /// recorded at the current address and removed.
    fn resolve_labels(&mut self, nodes: &mut List) -> Result<(), Diagnostic> {
        let mut scope = Scope::root();
        self.address = 0;
        let mut index = 0;

        while index < nodes.len() {
            if let Some(next) = scope_step(nodes.at(index), &scope) {
                scope = next;
                index += 1;
                continue;
            }

            let Some(label) = nodes.at(index).as_value().filter(|v| v.kind == ValueKind::Label)
            else {
                self.address += encoded_len(nodes.at(index), self.address)?;
                index += 1;
                continue;
            };

            let scoped = scope.join(&label.text).as_str().to_string();
            if self.has_symbol(&scoped) {
                return Err(Diagnostic::new(
                    label.pos.clone(),
                    format!("duplicate definition name {scoped:?}"),
                ));
            }

            self.symbols.insert(scoped.to_lowercase(), self.address);
            nodes.remove(index);
        }
        Ok(())
    }

    /// Evaluates constant definitions, which may reference labels, and
    /// records their values in the symbol table.
    fn evaluate_constants(&mut self, nodes: &mut List) -> Result<(), Diagnostic> {
        let mut scope = Scope::root();

        for index in 0..nodes.len() {
            if let Some(next) = scope_step(nodes.at(index), &scope) {
                scope = next;
                continue;
            }

            if !nodes.at(index).is_list(ListKind::Constant) {
                continue;
            }

            let address = self.address;
            let symbols = &self.symbols;
            let resolve =
                move |scope: &Scope, name: &str| resolve_reference(symbols, address, scope, name);

            let constant = nodes.at_mut(index).as_list_mut().expect("constant list");
            eval::evaluate(constant, &resolve, &scope).map_err(eval_diag)?;

            let name = constant.at(0).as_value().expect("constant name").clone();
            let expr = constant.at(1).as_list().expect("constant expression");

            let value = match single_number(expr) {
                Some(value) => value,
                None => {
                    return Err(Diagnostic::new(
                        expr.pos.clone(),
                        "invalid constant expression",
                    ));
                }
            };

            let scoped = scope.join(&name.text).as_str().to_string();
            if self.has_symbol(&scoped) {
                return Err(Diagnostic::new(
                    name.pos,
                    format!("duplicate symbol {:?}", name.text),
                ));
            }
            self.symbols.insert(scoped.to_lowercase(), value);
        }
        Ok(())
    }

    /// Evaluates all remaining operand expressions. Unresolved references
    /// are fatal here. Recomputes the running address so `$$` stays
    /// accurate.
    fn evaluate_operands(&mut self, nodes: &mut List) -> Result<(), Diagnostic> {
        let mut scope = Scope::root();
        self.address = 0;

        for index in 0..nodes.len() {
            if let Some(next) = scope_step(nodes.at(index), &scope) {
                scope = next;
                continue;
            }

            if !nodes.at(index).is_list(ListKind::Instruction) {
                continue;
            }

            let address = self.address;
            let symbols = &self.symbols;
            let resolve =
                move |scope: &Scope, name: &str| resolve_reference(symbols, address, scope, name);

            let instr = nodes.at_mut(index).as_list_mut().expect("instruction");
            eval::evaluate_strict(instr, &resolve, &scope).map_err(eval_diag)?;

            self.address += encoded_len(nodes.at(index), self.address)?;
        }
        Ok(())
    }

    /// Encodes the remaining instructions into the archive, attaching debug
    /// records and pending breakpoint flags along the way.
    fn emit(&mut self, nodes: &List) -> Result<(), Diagnostic> {
        self.address = 0;

        for node in nodes.children() {
            if node.is_value(ValueKind::Breakpoint) {
                self.flags.insert(DebugFlags::BREAKPOINT);
                continue;
            }

            let Some(instr) = node.as_list().filter(|l| l.kind == ListKind::Instruction) else {
                continue;
            };

            let name = instr
                .at(0)
                .text_of(ValueKind::Ident)
                .expect("instruction name")
                .to_lowercase();

            match name.as_str() {
                "address" => {
                    self.address = operand_number(instr, 1)?;
                    continue;
                }
                "reserve" => {
                    let count = operand_number(instr, 1)?;
                    let end = self.emit_offset(instr)? + count.max(0) as usize;
                    if self.out.instructions.len() < end {
                        self.out.instructions.resize(end, 0);
                    }
                    self.address += count;
                    continue;
                }
                _ => {}
            }

            let code = if let Some(size) = data_directive_size(&name) {
                encode_data_directive(instr, size)
            } else {
                encode_instruction(instr)?
            };

            let offset = self.emit_offset(instr)?;
            let end = offset + code.len();
            if self.out.instructions.len() < end {
                self.out.instructions.resize(end, 0);
            }
            self.out.instructions[offset..end].copy_from_slice(&code);

            self.record_debug(instr.pos.clone());
            self.address += code.len() as i64;
        }
        Ok(())
    }

    fn emit_offset(&self, instr: &List) -> Result<usize, Diagnostic> {
        usize::try_from(self.address).map_err(|_| {
            Diagnostic::new(
                instr.pos.clone(),
                format!("write at negative address {}", self.address),
            )
        })
    }

    /// Attaches a debug record for the instruction just written and clears
    /// the one-shot flags.
    fn record_debug(&mut self, pos: Position) {
        if !self.debug {
            self.flags = DebugFlags::default();
            return;
        }

        let file = self.out.debug.add_file(&pos.file);
        self.out.debug.symbols.push(DebugSymbol {
            address: self.address as u16,
            file,
            line: pos.line.min(u16::MAX as u32) as u16,
            col: pos.col.min(u16::MAX as u32) as u16,
            offset: pos.offset,
            flags: self.flags,
        });
        self.flags = DebugFlags::default();
    }
}

/// Applied to scope marker nodes; returns the updated scope.
fn scope_step(node: &Node, scope: &Scope) -> Option<Scope> {
    match node.value_kind() {
        Some(ValueKind::ScopeBegin) => {
            let name = node.text_of(ValueKind::ScopeBegin).expect("scope name");
            Some(scope.join(name))
        }
        Some(ValueKind::ScopeEnd) => Some(scope.parent()),
        _ => None,
    }
}

/// Finds the address or value for a reference. `$$` is the current assembly
/// address. Qualified names resolve by exact match; plain names climb the
/// scope tree from the innermost scope to the root.
fn resolve_reference(
    symbols: &FxHashMap<String, i64>,
    address: i64,
    scope: &Scope,
    name: &str,
) -> Result<i64, EvalErrorKind> {
    if name == "$$" {
        return Ok(address);
    }

    if name.contains('/') {
        return symbols
            .get(&name.to_lowercase())
            .copied()
            .ok_or_else(|| EvalErrorKind::Unresolved(name.to_string()));
    }

    let mut s = scope.clone();
    loop {
        if let Some(value) = symbols.get(&s.key(name)) {
            return Ok(*value);
        }
        if s.is_root() {
            return Err(EvalErrorKind::Unresolved(name.to_string()));
        }
        s = s.parent();
    }
}

fn eval_diag(err: EvalError) -> Diagnostic {
    Diagnostic::new(err.position, err.kind.to_string())
}

/// Returns the macro's parameters: the leading expressions each holding a
/// single ident.
fn macro_args(macro_def: &List) -> Vec<String> {
    macro_def.children()[1..]
        .iter()
        .take_while(|n| n.is_list(ListKind::Expression))
        .map(|n| {
            n.as_list()
                .expect("parameter expression")
                .at(0)
                .text_of(ValueKind::Ident)
                .expect("parameter ident")
                .to_string()
        })
        .collect()
}

/// Gives every scope inside an expanded macro body a fresh name, so two
/// expansions of the same macro never define colliding symbols.
fn rename_scopes(body: &mut [Node], names: &mut FreshNames) {
    for node in body {
        if let Some(value) = node.as_value_mut() {
            if value.kind == ValueKind::ScopeBegin {
                value.text = names.next();
            }
        }
    }
}

/// Replaces parameter references in the body's instructions with the
/// caller's operand values. Expression operands are unpacked into the use
/// site so compound arguments survive later evaluation.
fn substitute_params(body: &mut [Node], params: &[String], values: &[Node]) {
    for node in body {
        let Some(instr) = node.as_list_mut().filter(|l| l.kind == ListKind::Instruction) else {
            continue;
        };

        for expr_index in 1..instr.len() {
            let expr = instr.at_mut(expr_index).as_list_mut().expect("operand");

            let mut k = 0;
            while k < expr.len() {
                let matched = expr
                    .at(k)
                    .text_of(ValueKind::Ident)
                    .and_then(|ident| params.iter().position(|p| p.eq_ignore_ascii_case(ident)));

                let Some(param) = matched else {
                    k += 1;
                    continue;
                };

                match &values[param] {
                    Node::List(value_expr) if value_expr.kind == ListKind::Expression => {
                        let unpacked: Vec<Node> = value_expr.children().to_vec();
                        let advance = unpacked.len();
                        expr.replace_at(k, unpacked);
                        k += advance;
                    }
                    other => {
                        expr.replace_at(k, vec![other.clone()]);
                        k += 1;
                    }
                }
            }
        }
    }
}

/// Computes the byte size the given node occupies in the output stream at
/// the given address. Used to resolve label addresses before encoding.
fn encoded_len(node: &Node, address: i64) -> Result<i64, Diagnostic> {
    let Some(instr) = node.as_list().filter(|l| l.kind == ListKind::Instruction) else {
        return Ok(0);
    };

    let name = instr
        .at(0)
        .text_of(ValueKind::Ident)
        .expect("instruction name")
        .to_lowercase();

    if name == "address" {
        return Ok(operand_number(instr, 1)? - address);
    }
    if name == "reserve" {
        return Ok(operand_number(instr, 1)?);
    }
    if let Some(size) = data_directive_size(&name) {
        return Ok(data_directive_len(instr, size));
    }

    let Some(opcode) = Opcode::from_name(&name) else {
        return Ok(0);
    };

    let mut len = 1i64;
    for index in 1..=opcode.argc() {
        len += operand_encoded_len(instr.at(index).as_list().expect("operand expression"));
    }
    Ok(len)
}

/// A register operand encodes to a single attribute byte; everything else
/// takes the attribute byte plus a 16-bit value.
fn operand_encoded_len(expr: &List) -> i64 {
    let is_register = expr
        .children()
        .iter()
        .any(|n| n.text_of(ValueKind::AddressMode) == Some("r"));
    if is_register { 1 } else { 3 }
}

/// Byte size of a data directive: one element per operand value, with each
/// code point of a string counting as one element.
fn data_directive_len(instr: &List, size: i64) -> i64 {
    let mut elements = 0i64;
    for operand in &instr.children()[1..] {
        let Some(expr) = operand.as_list() else { continue };

        let strings: i64 = expr
            .children()
            .iter()
            .filter_map(|n| n.text_of(ValueKind::Str))
            .map(|s| s.chars().count() as i64)
            .sum();

        if strings > 0 {
            elements += strings;
        } else if !expr.is_empty() {
            elements += 1;
        }
    }
    elements * size
}

/// Returns the element size for `d8`/`d16`/`d32`/`d64` directives.
fn data_directive_size(name: &str) -> Option<i64> {
    match name {
        "d8" => Some(1),
        "d16" => Some(2),
        "d32" => Some(4),
        "d64" => Some(8),
        _ => None,
    }
}

/// Reads the reduced numeric value of an operand expression.
fn operand_number(instr: &List, index: usize) -> Result<i64, Diagnostic> {
    let fail = || {
        Diagnostic::new(
            instr.pos.clone(),
            format!(
                "directive {:?} requires a constant numeric operand",
                instr.at(0).text_of(ValueKind::Ident).unwrap_or_default()
            ),
        )
    };

    if instr.len() <= index {
        return Err(fail());
    }
    let expr = instr.at(index).as_list().ok_or_else(fail)?;
    single_number(expr).ok_or_else(fail)
}

/// Returns the expression's value if it reduced to a single number, with
/// optional leading markers.
fn single_number(expr: &List) -> Option<i64> {
    let last = expr.children().last()?;
    let text = last.text_of(ValueKind::Number)?;
    parse_number(text).ok()
}

/// Encodes one regular instruction: an opcode byte followed by one
/// attribute byte per operand, plus a big-endian 16-bit literal for
/// non-register operands.
fn encode_instruction(instr: &List) -> Result<Vec<u8>, Diagnostic> {
    let name = instr.at(0).as_value().expect("instruction name");
    let opcode = Opcode::from_name(&name.text).ok_or_else(|| {
        Diagnostic::new(
            name.pos.clone(),
            format!("unknown instruction {:?}", name.text),
        )
    })?;

    let mut out = Vec::with_capacity(1 + instr.len() * 3);
    out.push(opcode as u8);

    for operand in &instr.children()[1..] {
        let expr = operand.as_list().expect("operand expression");
        encode_operand(expr, &mut out)?;
    }

    Ok(out)
}

fn encode_operand(expr: &List, out: &mut Vec<u8>) -> Result<(), Diagnostic> {
    let mut indirect = false;
    let mut register = false;
    let mut type_desc = svm_arch::TypeDesc::default();

    for node in expr.children() {
        match node.value_kind() {
            Some(ValueKind::AddressMode) => {
                match node.text_of(ValueKind::AddressMode) {
                    Some("$") => indirect = true,
                    Some("r") => register = true,
                    _ => {}
                }
            }
            Some(ValueKind::TypeDesc) => {
                let text = node.text_of(ValueKind::TypeDesc).expect("type descriptor");
                type_desc = svm_arch::TypeDesc::from_name(text).ok_or_else(|| {
                    Diagnostic::new(
                        node.pos().clone(),
                        format!("unknown type descriptor {text:?}"),
                    )
                })?;
            }
            _ => {}
        }
    }

    let value = single_number(expr).ok_or_else(|| {
        Diagnostic::new(expr.pos.clone(), "operand did not reduce to a value")
    })?;

    let mode: u8 = match (register, indirect) {
        (true, true) => 3,
        (true, false) => 2,
        (false, true) => 1,
        (false, false) => 0,
    };
    let attr = (mode << 6) | ((type_desc as u8) << 4);

    if register {
        out.push(attr | (value as u8 & 0x0f));
    } else {
        out.push(attr);
        out.push((value >> 8) as u8);
        out.push(value as u8);
    }
    Ok(())
}

/// Encodes the operands of a data directive. Values are written high byte
/// first; strings expand code-point-wise using the directive's element
/// size.
fn encode_data_directive(instr: &List, size: i64) -> Vec<u8> {
    let mut out = Vec::new();

    for operand in &instr.children()[1..] {
        let Some(expr) = operand.as_list() else { continue };
        let Some(value) = expr.children().last() else { continue };

        if let Some(text) = value.text_of(ValueKind::Str) {
            for ch in text.chars() {
                write_data(&mut out, ch as i64, size);
            }
        } else if let Some(number) = value.text_of(ValueKind::Number) {
            let parsed = parse_number(number).unwrap_or_default();
            write_data(&mut out, parsed, size);
        }
    }

    out
}

/// Appends a value as `size` bytes, high to low.
fn write_data(out: &mut Vec<u8>, value: i64, size: i64) {
    match size {
        1 => out.push(value as u8),
        2 => out.extend_from_slice(&[(value >> 8) as u8, value as u8]),
        4 => out.extend_from_slice(&(value as u32).to_be_bytes()),
        8 => out.extend_from_slice(&value.to_be_bytes()),
        _ => {}
    }
}
