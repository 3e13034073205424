use std::fmt;
use std::sync::Arc;

/// Source position for a token or AST node.
///
/// The file name is shared between all positions produced from one source
/// buffer, so nodes can be cloned freely during lowering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    /// File in which the token was defined.
    pub file: Arc<str>,
    /// Line number at which the token was defined, starting at 1.
    pub line: u32,
    /// Column number at which the token was defined, starting at 1.
    pub col: u32,
    /// Byte offset at which the token was defined.
    pub offset: u32,
}

impl Position {
    pub fn new(file: Arc<str>, line: u32, col: u32, offset: u32) -> Position {
        Position {
            file,
            line,
            col,
            offset,
        }
    }
}

impl Default for Position {
    fn default() -> Position {
        Position {
            file: Arc::from(""),
            line: 1,
            col: 1,
            offset: 0,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}
