//! The SVM assembler: tokenizer, AST, multi-pass semantic lowering and
//! bytecode emission.
//!
//! The pipeline runs tokenizer → parser → include/import resolution →
//! syntax normalization → macro expansion → layout → evaluation → encoding,
//! producing a [`svm_ar::Archive`].

pub mod assembler;
pub mod ast;
pub mod diag;
pub mod eval;
pub mod number;
pub mod parser;
pub mod position;
pub mod scope;
pub mod syntax;
pub mod token;

mod driver;
mod include;

pub use diag::{Diagnostic, render_diagnostic};
pub use driver::{
    AssembleOptions, SourceFs, StdFs, assemble_module, assemble_module_with_fs, assemble_source,
    assemble_source_with_fs,
};
pub use parser::Ast;
pub use position::Position;
pub use scope::Scope;
