use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ast::{List, ListKind, Node, ValueKind};
use crate::diag::Diagnostic;
use crate::position::Position;
use crate::token::{Token, TokenKind, tokenize};

/// An abstract syntax tree for SVM sources.
///
/// The tree is a single flat top-level list; scope blocks are paired marker
/// leaves in that list, and only instructions, expressions, macros and
/// conditionals nest.
#[derive(Debug, Clone)]
pub struct Ast {
    files: Vec<PathBuf>,
    nodes: List,
}

impl Default for Ast {
    fn default() -> Ast {
        Ast::new()
    }
}

impl Ast {
    pub fn new() -> Ast {
        Ast {
            files: Vec::new(),
            nodes: List::new(Position::default(), ListKind::Module),
        }
    }

    /// Returns the source files which were parsed into this AST.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn nodes(&self) -> &List {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut List {
        &mut self.nodes
    }

    /// Merges the contents of another AST into this one.
    pub fn merge(&mut self, mut other: Ast) {
        self.files.append(&mut other.files);
        self.nodes.extend(other.nodes.take_children());
    }

    pub fn has_file(&self, path: &Path) -> bool {
        self.files.iter().any(|f| f == path)
    }

    /// Parses the given file into the AST. Parsing the same file more than
    /// once is not an error and is silently ignored.
    pub fn parse_file(&mut self, path: &Path) -> Result<(), Diagnostic> {
        let path = absolute_path(path);
        let data = std::fs::read(&path).map_err(|err| {
            Diagnostic::new(
                Position::default(),
                format!("unable to read '{}': {err}", path.display()),
            )
        })?;
        self.parse_bytes(&path, &data)
    }

    /// Parses a source buffer into the AST. The path provides source context
    /// for each node. Re-parsing a known path is a silent no-op.
    pub fn parse_bytes(&mut self, path: &Path, data: &[u8]) -> Result<(), Diagnostic> {
        if self.has_file(path) {
            return Ok(());
        }
        self.files.push(path.to_path_buf());

        let file: Arc<str> = Arc::from(path.to_string_lossy().as_ref());
        let tokens = tokenize(data, &file)?;
        self.fold(tokens)
    }

    /// Parses a named in-memory source. Mostly useful for tests and tools.
    pub fn parse_str(&mut self, name: &str, text: &str) -> Result<(), Diagnostic> {
        self.parse_bytes(Path::new(name), text.as_bytes())
    }

    /// Folds a flat token stream into the node tree using an open-list stack.
    fn fold(&mut self, tokens: Vec<Token>) -> Result<(), Diagnostic> {
        let mut stack: Vec<List> = Vec::new();

        for token in tokens {
            let Token { kind, pos, text } = token;

            match kind {
                TokenKind::InstructionBegin => {
                    let list_kind = if text.eq_ignore_ascii_case("const") {
                        ListKind::Constant
                    } else {
                        ListKind::Instruction
                    };
                    let mut list = List::new(pos.clone(), list_kind);
                    list.push(Node::value(pos, ValueKind::Ident, text));
                    stack.push(list);
                }

                TokenKind::MacroBegin => {
                    let mut list = List::new(pos.clone(), ListKind::Macro);
                    list.push(Node::value(pos, ValueKind::Ident, text));
                    stack.push(list);
                }

                TokenKind::ExpressionBegin => {
                    stack.push(List::new(pos, ListKind::Expression));
                }

                TokenKind::IfBegin => {
                    stack.push(List::new(pos, ListKind::Conditional));
                }

                TokenKind::InstructionEnd
                | TokenKind::MacroEnd
                | TokenKind::ExpressionEnd
                | TokenKind::IfEnd => {
                    let done = stack.pop().expect("token stream balances begin/end");
                    self.append(&mut stack, Node::List(done));
                }

                TokenKind::Breakpoint => {
                    self.append(&mut stack, Node::value(pos, ValueKind::Breakpoint, text));
                }

                TokenKind::Label => {
                    self.append(&mut stack, Node::value(pos, ValueKind::Label, text));
                }

                TokenKind::Number => {
                    self.append(&mut stack, Node::value(pos, ValueKind::Number, text));
                }

                TokenKind::Operator => {
                    self.append(&mut stack, Node::value(pos, ValueKind::Operator, text));
                }

                TokenKind::TypeDescriptor => {
                    self.append(&mut stack, Node::value(pos, ValueKind::TypeDesc, text));
                }

                TokenKind::Ident => {
                    // Register identifiers collapse into an address mode
                    // marker plus a numeric register index.
                    if let Some(index) = svm_arch::register_index(&text) {
                        self.append(
                            &mut stack,
                            Node::value(pos.clone(), ValueKind::AddressMode, "r"),
                        );
                        self.append(
                            &mut stack,
                            Node::value(pos, ValueKind::Number, index.to_string()),
                        );
                    } else {
                        self.append(&mut stack, Node::value(pos, ValueKind::Ident, text));
                    }
                }

                TokenKind::AddressMode => {
                    self.append(&mut stack, Node::value(pos, ValueKind::AddressMode, text));
                }

                TokenKind::ScopeBegin => {
                    self.append(&mut stack, Node::value(pos, ValueKind::ScopeBegin, ""));
                }

                TokenKind::ScopeEnd => {
                    self.append(&mut stack, Node::value(pos, ValueKind::ScopeEnd, ""));
                }

                TokenKind::Char => {
                    let unquoted = unquote(&text).ok_or_else(|| {
                        Diagnostic::new(pos.clone(), format!("invalid character literal {text}"))
                    })?;
                    let ch = unquoted.chars().next().ok_or_else(|| {
                        Diagnostic::new(pos.clone(), format!("invalid character literal {text:?}"))
                    })?;
                    self.append(
                        &mut stack,
                        Node::value(pos, ValueKind::Number, (ch as u32).to_string()),
                    );
                }

                TokenKind::Str => {
                    let unquoted = unquote(&text).ok_or_else(|| {
                        Diagnostic::new(pos.clone(), format!("invalid string literal {text}"))
                    })?;
                    self.append(&mut stack, Node::value(pos, ValueKind::Str, unquoted));
                }
            }
        }

        Ok(())
    }

    fn append(&mut self, stack: &mut Vec<List>, node: Node) {
        match stack.last_mut() {
            Some(open) => open.push(node),
            None => self.nodes.push(node),
        }
    }

    /// Returns a human readable string representation of the node tree.
    pub fn render(&self) -> String {
        let mut out = String::new();
        render_node_list(&mut out, &self.nodes, "");
        out
    }
}

fn render_node_list(out: &mut String, list: &List, indent: &str) {
    for node in list.children() {
        render_node(out, node, indent);
    }
}

fn render_node(out: &mut String, node: &Node, indent: &str) {
    let pos = node.pos();
    let file = Path::new(pos.file.as_ref())
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();

    match node {
        Node::Value(v) => {
            let _ = writeln!(
                out,
                "{indent}{file}:{}:{} {:?}({:?})",
                pos.line, pos.col, v.kind, v.text
            );
        }
        Node::List(l) => {
            let _ = writeln!(out, "{indent}{file}:{}:{} {:?} {{", pos.line, pos.col, l.kind);
            let nested = format!("{indent}   ");
            render_node_list(out, l, &nested);
            let _ = writeln!(out, "{indent}}}");
        }
    }
}

fn absolute_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Strips the surrounding quotes from a string or character literal and
/// resolves its escape sequences.
fn unquote(text: &str) -> Option<String> {
    if text.len() < 2 {
        return None;
    }
    let content = &text[1..text.len() - 1];

    let mut out = String::with_capacity(content.len());
    let mut chars = content.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let resolved = match chars.next()? {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '0' => '\0',
            '\\' => '\\',
            '"' => '"',
            '\'' => '\'',
            other => other,
        };
        out.push(resolved);
    }
    Some(out)
}
