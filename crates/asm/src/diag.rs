use std::fmt;

use ariadne::{Color, Label, Report, ReportKind, Source};

use crate::position::Position;

/// An assembly-time error: a source position plus a message. Every pass of
/// the assembler reports the first diagnostic it encounters; runtime errors
/// from the interpreter live in the vm crate and carry addresses instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub position: Position,
    pub message: String,
}

impl Diagnostic {
    pub fn new(position: Position, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            position,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.position, self.message)
    }
}

impl std::error::Error for Diagnostic {}

/// Renders the diagnostic against the source text it refers to.
pub fn render_diagnostic(diagnostic: &Diagnostic, source: &str) -> String {
    let file = diagnostic.position.file.to_string();
    let start = (diagnostic.position.offset as usize).min(source.len());
    let end = (start + 1).min(source.len()).max(start);

    let mut output = Vec::new();
    let _ = Report::build(ReportKind::Error, file.clone(), start)
        .with_message(diagnostic.message.clone())
        .with_label(
            Label::new((file.clone(), start..end))
                .with_color(Color::Red)
                .with_message("here"),
        )
        .finish()
        .write((file, Source::from(source)), &mut output);

    String::from_utf8_lossy(&output).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_position_and_message() {
        let pos = Position {
            file: "main.svm".into(),
            line: 3,
            col: 7,
            offset: 21,
        };
        let diag = Diagnostic::new(pos, "unexpected token");
        assert_eq!(diag.to_string(), "main.svm:3:7: unexpected token");
    }

    #[test]
    fn renders_against_source() {
        let pos = Position {
            file: "main.svm".into(),
            line: 1,
            col: 5,
            offset: 4,
        };
        let diag = Diagnostic::new(pos, "bad things");
        let rendered = render_diagnostic(&diag, "mov ?\n");
        assert!(rendered.contains("bad things"));
    }
}
