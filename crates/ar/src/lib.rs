//! The compiled archive type, along with an encoder and decoder for its
//! file format.
//!
//! An archive holds the raw instruction stream produced by the assembler and
//! an optional debug table mapping instruction addresses back to source
//! positions. On disk the archive is a gzip stream wrapping a little-endian
//! framed payload; the instruction bytes inside stay in decoder order
//! (big-endian 16-bit literals).

use std::fmt::Write as _;

use indexmap::IndexSet;

mod codec;
mod io;

pub use io::{load, read_file, save, write_file};

/// Debug bit flags attached to a single debug record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugFlags(pub u8);

impl DebugFlags {
    /// When an instruction with this flag is encountered by the runtime,
    /// execution pauses.
    pub const BREAKPOINT: DebugFlags = DebugFlags(1);

    pub fn contains(self, other: DebugFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: DebugFlags) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// One debug record: per-instruction source context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugSymbol {
    /// Instruction address the record is defined for.
    pub address: u16,
    /// Index into the debug file table.
    pub file: u8,
    /// Source line the instruction came from.
    pub line: u16,
    /// Source column the instruction came from.
    pub col: u16,
    /// Byte offset of the instruction in its source file.
    pub offset: u32,
    /// One-shot flags, cleared by the assembler after attachment.
    pub flags: DebugFlags,
}

/// Debug data stored in an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugTable {
    /// Source files referenced by the records. Only populated when the
    /// archive was assembled with debug symbols.
    pub files: IndexSet<String>,
    /// Per-instruction source context.
    pub symbols: Vec<DebugSymbol>,
}

impl DebugTable {
    /// Adds a file to the table if it is not already present and returns its
    /// index in the file list.
    pub fn add_file(&mut self, file: &str) -> u8 {
        let (index, _) = self.files.insert_full(file.to_string());
        index as u8
    }

    /// Returns the record associated with the given address, if any.
    pub fn find(&self, address: u16) -> Option<&DebugSymbol> {
        self.symbols.iter().find(|sym| sym.address == address)
    }
}

/// A complete, compiled archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Archive {
    /// Optional debug symbols.
    pub debug: DebugTable,
    /// Compiled code.
    pub instructions: Vec<u8>,
}

impl Archive {
    pub fn new() -> Archive {
        Archive::default()
    }

    /// Returns a human-readable dump of the archive's contents.
    pub fn render(&self) -> String {
        let mut out = String::new();

        if !self.debug.files.is_empty() {
            let _ = writeln!(out, "Source files ({}):", self.debug.files.len());
            for (index, file) in self.debug.files.iter().enumerate() {
                let _ = writeln!(out, " {index}: {file}");
            }

            let _ = writeln!(out, "Debug symbols ({}):", self.debug.symbols.len());
            for sym in &self.debug.symbols {
                let _ = writeln!(
                    out,
                    " {:04x}: File: {}, Line: {}, Col: {} Flags: {:02x}",
                    sym.address, sym.file, sym.line, sym.col, sym.flags.0
                );
            }
        }

        if !self.instructions.is_empty() {
            let _ = writeln!(out, "Instructions:");
            for chunk in self.instructions.chunks(16) {
                for byte in chunk {
                    let _ = write!(out, "{byte:02x} ");
                }
                let _ = writeln!(out);
            }
        }

        out
    }
}
