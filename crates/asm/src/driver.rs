//! Entry points which turn source text or a module directory into a
//! compiled archive, orchestrating the parse and lowering passes.

use std::io;
use std::path::{Path, PathBuf};

use svm_ar::Archive;
use tracing::trace;

use crate::assembler::Assembler;
use crate::diag::Diagnostic;
use crate::include::{merge_module, resolve_imports, resolve_includes};
use crate::parser::Ast;

/// Filesystem access used during include and import resolution. The
/// assembler only ever reads; tests substitute an in-memory tree.
pub trait SourceFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn exists(&self, path: &Path) -> bool;
    /// Lists the files of a directory. Order does not matter; callers sort.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

/// The real filesystem.
#[derive(Debug, Default)]
pub struct StdFs;

impl SourceFs for StdFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }
}

/// Assembler configuration.
#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    /// Emit debug symbols into the archive.
    pub debug: bool,
    /// Directories searched, in order, when resolving `include` paths.
    pub include_paths: Vec<PathBuf>,
    /// Root directory module imports are resolved against. When unset,
    /// `import` statements are an error.
    pub import_root: Option<PathBuf>,
}

/// Assembles a single in-memory source buffer.
pub fn assemble_source(
    name: &str,
    text: &str,
    options: &AssembleOptions,
) -> Result<Archive, Diagnostic> {
    assemble_source_with_fs(name, text, options, &StdFs)
}

pub fn assemble_source_with_fs(
    name: &str,
    text: &str,
    options: &AssembleOptions,
    fs: &dyn SourceFs,
) -> Result<Archive, Diagnostic> {
    let mut ast = Ast::new();
    ast.parse_str(name, text)?;
    assemble_ast(ast, options, fs)
}

/// Assembles a module and its dependencies. The module's sources are
/// expected in `<import_root>/<module>/`.
pub fn assemble_module(
    import_root: &Path,
    module: &str,
    options: &AssembleOptions,
) -> Result<Archive, Diagnostic> {
    assemble_module_with_fs(import_root, module, options, &StdFs)
}

pub fn assemble_module_with_fs(
    import_root: &Path,
    module: &str,
    options: &AssembleOptions,
    fs: &dyn SourceFs,
) -> Result<Archive, Diagnostic> {
    let mut ast = Ast::new();
    merge_module(
        &mut ast,
        fs,
        import_root,
        &options.include_paths,
        module,
        None,
        None,
        &mut Vec::new(),
        &mut Vec::new(),
    )?;

    trace!(module, "module sources parsed");
    let mut assembler = Assembler::new(options.debug);
    assembler.assemble(ast)
}

fn assemble_ast(
    mut ast: Ast,
    options: &AssembleOptions,
    fs: &dyn SourceFs,
) -> Result<Archive, Diagnostic> {
    resolve_includes(&mut ast, fs, &options.include_paths)?;
    resolve_imports(
        &mut ast,
        fs,
        options.import_root.as_deref(),
        &options.include_paths,
        &mut Vec::new(),
        &mut Vec::new(),
    )?;

    let mut assembler = Assembler::new(options.debug);
    assembler.assemble(ast)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// An in-memory source tree for include and import tests.
    pub(crate) struct MemFs {
        files: Vec<(PathBuf, Vec<u8>)>,
    }

    impl MemFs {
        pub(crate) fn new(files: &[(&str, &str)]) -> MemFs {
            MemFs {
                files: files
                    .iter()
                    .map(|(path, text)| (PathBuf::from(path), text.as_bytes().to_vec()))
                    .collect(),
            }
        }
    }

    impl SourceFs for MemFs {
        fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
            self.files
                .iter()
                .find(|(p, _)| p == path)
                .map(|(_, data)| data.clone())
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
        }

        fn exists(&self, path: &Path) -> bool {
            self.files.iter().any(|(p, _)| p == path)
        }

        fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
            let entries: Vec<PathBuf> = self
                .files
                .iter()
                .filter(|(p, _)| p.parent() == Some(path))
                .map(|(p, _)| p.clone())
                .collect();
            if entries.is_empty() {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such directory"));
            }
            Ok(entries)
        }
    }

    #[test]
    fn assembles_source_with_includes() {
        let fs = MemFs::new(&[("lib.svm", ":helper ret")]);
        let options = AssembleOptions::default();
        let archive = assemble_source_with_fs(
            "main.svm",
            "include \"lib.svm\"\n:main { call helper\nhalt }",
            &options,
            &fs,
        )
        .expect("assemble");
        assert!(!archive.instructions.is_empty());
    }

    #[test]
    fn assembles_module_directory() {
        let fs = MemFs::new(&[("root/app/main.svm", ":main { halt }")]);
        let options = AssembleOptions::default();
        let archive =
            assemble_module_with_fs(Path::new("root"), "app", &options, &fs).expect("assemble");
        assert_eq!(archive.instructions, vec![1]);
    }

    #[test]
    fn assembles_imported_module_symbols() {
        let fs = MemFs::new(&[
            ("root/app/main.svm", "import \"lib\"\n:main { mov r0, lib.answer\nhalt }"),
            ("root/lib/lib.svm", "const answer 42"),
        ]);
        let options = AssembleOptions {
            import_root: Some(PathBuf::from("root")),
            ..AssembleOptions::default()
        };
        let archive =
            assemble_module_with_fs(Path::new("root"), "app", &options, &fs).expect("assemble");
        // mov r0, 42: opcode, register attr, constant attr + big-endian 42.
        assert_eq!(archive.instructions, vec![2, 0xb0, 0x30, 0, 42, 1]);
    }
}
