//! Syntax verification for a freshly parsed AST, plus the mutations that
//! bring certain constructs into their canonical form: dotted names become
//! scope paths, anonymous scopes get names, `const` definitions are
//! simplified and `if` statements are lowered to compare-and-branch code.

use svm_arch::Opcode;

use crate::ast::{List, ListKind, Node, ValueKind};
use crate::diag::Diagnostic;
use crate::number::parse_number;
use crate::position::Position;

/// Mints `$__%04x` names for generated scopes and labels. Owned by one
/// assemble invocation so runs are deterministic and independent.
#[derive(Debug, Default)]
pub struct FreshNames {
    counter: u32,
}

impl FreshNames {
    pub fn next(&mut self) -> String {
        self.counter += 1;
        format!("$__{:04x}", self.counter)
    }
}

/// Verifies the AST is in a sane state and rewrites constructs into their
/// canonical form. Must run before any other assembler pass.
pub fn verify(nodes: &mut List, names: &mut FreshNames) -> Result<(), Diagnostic> {
    translate_names(nodes);
    fix_scope_names(nodes, names);
    translate_const(nodes)?;
    translate_if(nodes, names)?;
    test_macros(nodes)?;
    test_instructions(nodes)?;
    test_numbers(nodes)
}

/// Replaces dots in identifiers with scope path separators, since that is
/// the form in which scoped symbols are stored. `gp14.ButtonA` becomes
/// `gp14/ButtonA`. Register names were already collapsed at parse time.
fn translate_names(nodes: &mut List) {
    for index in 0..nodes.len() {
        match nodes.at_mut(index) {
            Node::List(list) => translate_names(list),
            Node::Value(value) => {
                if value.kind == ValueKind::Ident && value.text.contains('.') {
                    value.text = value.text.replace('.', "/");
                }
            }
        }
    }
}

/// Names every anonymous scope: a scope immediately preceded by a label
/// takes the label's name, any other gets a generated one.
fn fix_scope_names(nodes: &mut List, names: &mut FreshNames) {
    for index in 0..nodes.len() {
        if let Node::List(list) = nodes.at_mut(index) {
            fix_scope_names(list, names);
            continue;
        }

        if !nodes.at(index).is_value(ValueKind::ScopeBegin) {
            continue;
        }

        let label = if index > 0 {
            nodes
                .at(index - 1)
                .text_of(ValueKind::Label)
                .map(str::to_string)
        } else {
            None
        };

        let scope = nodes.at_mut(index).as_value_mut().expect("scope marker");
        if scope.text.is_empty() {
            scope.text = label.unwrap_or_else(|| names.next());
        }
    }
}

/// Rewrites `[const, [name], expr]` constant definitions into the simplified
/// `[name, expr]` form.
fn translate_const(nodes: &mut List) -> Result<(), Diagnostic> {
    for index in 0..nodes.len() {
        let node = nodes.at_mut(index);

        if node.is_list(ListKind::Macro) {
            translate_const(node.as_list_mut().expect("macro list"))?;
            continue;
        }

        if !node.is_list(ListKind::Constant) {
            continue;
        }

        let constant = node.as_list().expect("constant list");
        let pos = constant.pos.clone();

        if constant.len() < 2 {
            return Err(Diagnostic::new(pos, "missing operands in const definition"));
        }

        let name_expr = constant
            .at(1)
            .as_list()
            .filter(|expr| expr.kind == ListKind::Expression)
            .ok_or_else(|| Diagnostic::new(pos.clone(), "missing expression in const definition"))?;
        if name_expr.is_empty() {
            return Err(Diagnostic::new(
                name_expr.pos.clone(),
                "missing expression in const definition",
            ));
        }

        let name = name_expr
            .at(0)
            .as_value()
            .filter(|v| v.kind == ValueKind::Ident)
            .ok_or_else(|| {
                Diagnostic::new(
                    name_expr.pos.clone(),
                    "invalid expression name; expected ident",
                )
            })?
            .clone();

        // The value is either its own expression (`const N, 5` and
        // `const N = 5`) or the remainder of the name expression
        // (`const N 5`).
        let value_expr = if constant.len() >= 3 {
            constant.at(2).clone()
        } else {
            if name_expr.len() < 2 {
                return Err(Diagnostic::new(pos, "missing operands in const definition"));
            }
            let mut value = List::new(name_expr.at(1).pos().clone(), ListKind::Expression);
            value.extend(name_expr.children()[1..].to_vec());
            Node::List(value)
        };

        let mut rewritten = List::new(pos, ListKind::Constant);
        rewritten.push(Node::Value(name));
        rewritten.push(value_expr);
        nodes.replace_at(index, vec![Node::List(rewritten)]);
    }
    Ok(())
}

/// Lowers `if <cond> <instr>` into a compare instruction, a conditional
/// branch past the body, the body and a generated target label:
///
///   clt r0, r1
///   jez $__0001
///   mul r0, r0, -1
///   :$__0001
fn translate_if(nodes: &mut List, names: &mut FreshNames) -> Result<(), Diagnostic> {
    let mut index = 0;
    while index < nodes.len() {
        let node = nodes.at_mut(index);

        if node.is_list(ListKind::Macro) {
            translate_if(node.as_list_mut().expect("macro list"), names)?;
            index += 1;
            continue;
        }

        if !node.is_list(ListKind::Conditional) {
            index += 1;
            continue;
        }

        let cond = node.as_list().expect("conditional list");
        if cond.len() != 2 {
            return Err(Diagnostic::new(
                cond.pos.clone(),
                "if statement must have a condition expression and preceed an instruction",
            ));
        }

        let expr = cond
            .at(0)
            .as_list()
            .filter(|l| l.kind == ListKind::Expression)
            .ok_or_else(|| {
                Diagnostic::new(
                    cond.pos.clone(),
                    "invalid conditional expression; expected <value> <operator> <value>",
                )
            })?;

        let compare = create_compare_instr(expr)?;
        let body = cond.at(1).clone();
        let body_pos = body.pos().clone();

        let label_name = names.next();
        let jump = create_conditional_jump(expr.pos.clone(), &label_name);
        let label = Node::value(body_pos, ValueKind::Label, label_name);

        nodes.replace_at(index, vec![Node::List(compare), Node::List(jump), body, label]);
        index += 4;
    }
    Ok(())
}

/// Creates a `jez` instruction targeting the given label.
fn create_conditional_jump(pos: Position, label: &str) -> List {
    let mut expr = List::new(pos.clone(), ListKind::Expression);
    expr.push(Node::value(pos.clone(), ValueKind::Ident, label));

    let mut jump = List::new(pos.clone(), ListKind::Instruction);
    jump.push(Node::value(pos, ValueKind::Ident, "jez"));
    jump.push(Node::List(expr));
    jump
}

/// Creates the compare instruction for a condition expression by splitting
/// it at its comparison operator.
fn create_compare_instr(expr: &List) -> Result<List, Diagnostic> {
    let index = expr
        .children()
        .iter()
        .position(|n| n.is_value(ValueKind::Operator))
        .ok_or_else(|| {
            Diagnostic::new(
                expr.pos.clone(),
                "invalid conditional expression; expected <value> <operator> <value>",
            )
        })?;

    let op = expr.at(index).as_value().expect("operator value");
    let name = match op.text.as_str() {
        "==" => "ceq",
        "!=" => "cne",
        "<" => "clt",
        "<=" => "cle",
        ">" => "cgt",
        ">=" => "cge",
        other => {
            return Err(Diagnostic::new(
                op.pos.clone(),
                format!("unexpected token {other:?}; expected a compare operator"),
            ));
        }
    };

    let mut lhs = expr.clone();
    lhs.remove_range(index, lhs.len() - 1);

    let mut rhs = expr.clone();
    rhs.remove_range(0, index);

    let mut compare = List::new(expr.pos.clone(), ListKind::Instruction);
    compare.push(Node::value(expr.pos.clone(), ValueKind::Ident, name));
    compare.push(Node::List(lhs));
    compare.push(Node::List(rhs));
    Ok(compare)
}

/// Ensures macro definitions have a sane layout: a name ident followed by
/// parameter expressions each holding exactly one ident.
fn test_macros(nodes: &mut List) -> Result<(), Diagnostic> {
    for node in nodes.children() {
        if !node.is_list(ListKind::Macro) {
            continue;
        }

        let m = node.as_list().expect("macro list");
        if m.is_empty() {
            return Err(Diagnostic::new(
                m.pos.clone(),
                "invalid macro definition; missing name",
            ));
        }

        if !m.at(0).is_value(ValueKind::Ident) {
            return Err(Diagnostic::new(
                m.at(0).pos().clone(),
                "invalid macro name; expected ident",
            ));
        }

        for param in m.children()[1..]
            .iter()
            .take_while(|n| n.is_list(ListKind::Expression))
        {
            let expr = param.as_list().expect("expression list");
            if expr.len() != 1 || !expr.at(0).is_value(ValueKind::Ident) {
                return Err(Diagnostic::new(
                    expr.pos.clone(),
                    "invalid macro operand; expected ident",
                ));
            }
        }
    }
    Ok(())
}

/// Ensures instructions are properly formatted and known opcodes carry the
/// right number of operands. Unknown names are not an error here; they may
/// be macro references or assembler directives.
fn test_instructions(nodes: &mut List) -> Result<(), Diagnostic> {
    for index in 0..nodes.len() {
        let node = nodes.at_mut(index);

        if node.is_list(ListKind::Macro) {
            test_instructions(node.as_list_mut().expect("macro list"))?;
            continue;
        }

        if !node.is_list(ListKind::Instruction) {
            continue;
        }

        let instr = node.as_list_mut().expect("instruction list");

        if !instr.at(0).is_value(ValueKind::Ident) {
            return Err(Diagnostic::new(
                instr.at(0).pos().clone(),
                "invalid instruction name; expected ident",
            ));
        }

        // Remove empty expression nodes. These occur in edge cases like a
        // zero-operand instruction with a trailing code comment. Also ensure
        // a type descriptor, if present, is the first expression element.
        let mut i = 1;
        while i < instr.len() {
            let expr = instr.at(i).as_list().expect("operand expression");
            if expr.is_empty() {
                instr.remove(i);
                continue;
            }

            if let Some(at) = expr
                .children()
                .iter()
                .position(|n| n.is_value(ValueKind::TypeDesc))
            {
                if at > 0 {
                    return Err(Diagnostic::new(
                        expr.at(at).pos().clone(),
                        "a type descriptor must be the first element in an expression",
                    ));
                }
            }
            i += 1;
        }

        let name = instr.at(0).as_value().expect("instruction name");
        if let Some(opcode) = Opcode::from_name(&name.text) {
            let argc = opcode.argc();
            if argc != instr.len() - 1 {
                return Err(Diagnostic::new(
                    name.pos.clone(),
                    format!(
                        "invalid operand count for instruction {:?}; expected {argc}",
                        name.text
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Ensures every numeric literal parses as a 64-bit signed integer.
fn test_numbers(nodes: &List) -> Result<(), Diagnostic> {
    for node in nodes.children() {
        if let Node::List(list) = node {
            test_numbers(list)?;
            continue;
        }

        if let Some(text) = node.text_of(ValueKind::Number) {
            if let Err(err) = parse_number(text) {
                return Err(Diagnostic::new(
                    node.pos().clone(),
                    format!("invalid number: {err}"),
                ));
            }
        }
    }
    Ok(())
}
