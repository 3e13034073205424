//! In-place resolution of `include` and `import` nodes.
//!
//! `include "path"` textually inlines another source file: the file is
//! located along the include search path, parsed, and its top-level nodes
//! replace the include node. `import "path"` pulls in a whole module
//! directory, wrapped in a scope named after the module (or its alias).
//! Both are cycle-checked through a dependency chain.

use std::path::{Path, PathBuf};

use crate::ast::{List, ListKind, Node, ValueKind};
use crate::diag::Diagnostic;
use crate::driver::SourceFs;
use crate::parser::Ast;
use crate::position::Position;

/// Source file extensions recognized when collating a module directory.
const SOURCE_EXTENSIONS: [&str; 2] = ["svm", "asm"];

/// Expands every `include` node in the AST.
pub(crate) fn resolve_includes(
    ast: &mut Ast,
    fs: &dyn SourceFs,
    search_paths: &[PathBuf],
) -> Result<(), Diagnostic> {
    // Files already merged into this tree never splice twice, even when two
    // different includes pull them in.
    let mut done: Vec<PathBuf> = ast.files().to_vec();
    resolve_includes_from(ast, fs, search_paths, &mut Vec::new(), &mut done)
}

/// Recursive include walk. `chain` carries the files currently being
/// included, for cycle detection; `done` the files merged so far.
fn resolve_includes_from(
    ast: &mut Ast,
    fs: &dyn SourceFs,
    search_paths: &[PathBuf],
    chain: &mut Vec<PathBuf>,
    done: &mut Vec<PathBuf>,
) -> Result<(), Diagnostic> {
    let mut index = 0;
    while index < ast.nodes().len() {
        let Some(request) = include_request(ast.nodes().at(index))? else {
            index += 1;
            continue;
        };

        let spliced = load_include(ast, fs, search_paths, chain, done, &request)?;
        let advance = spliced.len();
        ast.nodes_mut().replace_at(index, spliced);
        index += advance;
    }
    Ok(())
}

struct IncludeRequest {
    path: String,
    pos: Position,
}

/// Matches an `include "path"` instruction node.
fn include_request(node: &Node) -> Result<Option<IncludeRequest>, Diagnostic> {
    let Some(instr) = node.as_list().filter(|l| l.kind == ListKind::Instruction) else {
        return Ok(None);
    };

    let is_include = instr
        .at(0)
        .text_of(ValueKind::Ident)
        .is_some_and(|name| name.eq_ignore_ascii_case("include"));
    if !is_include {
        return Ok(None);
    }

    let path = operand_string(instr, 1).ok_or_else(|| {
        Diagnostic::new(
            instr.pos.clone(),
            "invalid include statement; expected a path string",
        )
    })?;

    Ok(Some(IncludeRequest {
        path,
        pos: instr.pos.clone(),
    }))
}

fn operand_string(instr: &List, index: usize) -> Option<String> {
    let expr = instr.at(index).as_list()?;
    expr.at(0).text_of(ValueKind::Str).map(str::to_string)
}

/// Locates, parses and recursively resolves one included file, returning
/// the nodes to splice in place of the include node.
fn load_include(
    ast: &mut Ast,
    fs: &dyn SourceFs,
    search_paths: &[PathBuf],
    chain: &mut Vec<PathBuf>,
    done: &mut Vec<PathBuf>,
    request: &IncludeRequest,
) -> Result<Vec<Node>, Diagnostic> {
    let located = locate(fs, search_paths, &request.path).ok_or_else(|| {
        Diagnostic::new(
            request.pos.clone(),
            format!("unable to locate include file {:?}", request.path),
        )
    })?;

    if chain.contains(&located) {
        return Err(Diagnostic::new(
            request.pos.clone(),
            format!("circular reference to {:?} detected", request.path),
        ));
    }

    // A file that was already parsed elsewhere is silently dropped.
    if done.contains(&located) {
        return Ok(Vec::new());
    }
    done.push(located.clone());

    let data = fs.read(&located).map_err(|err| {
        Diagnostic::new(
            request.pos.clone(),
            format!("unable to read '{}': {err}", located.display()),
        )
    })?;

    let mut sub = Ast::new();
    sub.parse_bytes(&located, &data)?;

    chain.push(located);
    let result = resolve_includes_from(&mut sub, fs, search_paths, chain, done);
    chain.pop();
    result?;

    let nodes = sub.nodes_mut().take_children();
    ast.merge(sub);
    Ok(nodes)
}

/// Finds a file by trying the literal path first and then each search path
/// entry in order.
fn locate(fs: &dyn SourceFs, search_paths: &[PathBuf], path: &str) -> Option<PathBuf> {
    let literal = PathBuf::from(path);
    if fs.exists(&literal) {
        return Some(literal);
    }

    search_paths
        .iter()
        .map(|dir| dir.join(path))
        .find(|candidate| fs.exists(candidate))
}

/// Expands every `import` node: each module directory is parsed into a
/// scope-wrapped AST appended to the main one. `queue` is the active import
/// chain, `done` the modules merged so far.
pub(crate) fn resolve_imports(
    ast: &mut Ast,
    fs: &dyn SourceFs,
    import_root: Option<&Path>,
    include_paths: &[PathBuf],
    queue: &mut Vec<String>,
    done: &mut Vec<String>,
) -> Result<(), Diagnostic> {
    let mut index = 0;
    while index < ast.nodes().len() {
        let Some(request) = import_request(ast.nodes().at(index))? else {
            index += 1;
            continue;
        };

        ast.nodes_mut().remove(index);

        let root = import_root.ok_or_else(|| {
            Diagnostic::new(
                request.pos.clone(),
                "import requires an import root directory",
            )
        })?;

        merge_module(
            ast,
            fs,
            root,
            include_paths,
            &request.module,
            request.alias.as_deref(),
            Some(&request.pos),
            queue,
            done,
        )?;
    }
    Ok(())
}

struct ImportRequest {
    module: String,
    alias: Option<String>,
    pos: Position,
}

/// Matches an `import "path"` or `import alias "path"` instruction node.
fn import_request(node: &Node) -> Result<Option<ImportRequest>, Diagnostic> {
    let Some(instr) = node.as_list().filter(|l| l.kind == ListKind::Instruction) else {
        return Ok(None);
    };

    let is_import = instr
        .at(0)
        .text_of(ValueKind::Ident)
        .is_some_and(|name| name.eq_ignore_ascii_case("import"));
    if !is_import {
        return Ok(None);
    }

    let invalid = || Diagnostic::new(instr.pos.clone(), "invalid import path");

    let (alias, module) = match instr.len() {
        2 => (None, operand_string(instr, 1).ok_or_else(invalid)?),
        3 => {
            let alias = instr
                .at(1)
                .as_list()
                .and_then(|expr| expr.at(0).text_of(ValueKind::Ident))
                .map(str::to_string)
                .ok_or_else(invalid)?;
            (Some(alias), operand_string(instr, 2).ok_or_else(invalid)?)
        }
        _ => return Err(invalid()),
    };

    Ok(Some(ImportRequest {
        module,
        alias,
        pos: instr.pos.clone(),
    }))
}

/// Parses all sources of one module into a scope-wrapped sub-AST and merges
/// it, then chases the module's own imports.
#[allow(clippy::too_many_arguments)]
pub(crate) fn merge_module(
    ast: &mut Ast,
    fs: &dyn SourceFs,
    import_root: &Path,
    include_paths: &[PathBuf],
    module: &str,
    alias: Option<&str>,
    pos: Option<&Position>,
    queue: &mut Vec<String>,
    done: &mut Vec<String>,
) -> Result<(), Diagnostic> {
    let module = module.to_lowercase();
    let at = |msg: String| Diagnostic::new(pos.cloned().unwrap_or_default(), msg);

    if queue.contains(&module) {
        return Err(at(format!("circular reference to module {module:?} detected")));
    }
    if done.contains(&module) {
        return Ok(());
    }
    done.push(module.clone());
    queue.push(module.clone());

    let sources = collate_sources(fs, import_root, &module).map_err(&at)?;

    let scope_name = alias.map(str::to_string).unwrap_or_else(|| module.clone());

    let mut sub = Ast::new();
    sub.nodes_mut().push(Node::value(
        Position::default(),
        ValueKind::ScopeBegin,
        scope_name,
    ));
    for file in sources {
        let data = fs
            .read(&file)
            .map_err(|err| at(format!("unable to read '{}': {err}", file.display())))?;
        sub.parse_bytes(&file, &data)?;
    }
    sub.nodes_mut().push(Node::value(
        Position::default(),
        ValueKind::ScopeEnd,
        "",
    ));

    resolve_includes(&mut sub, fs, include_paths)?;
    resolve_imports(&mut sub, fs, Some(import_root), include_paths, queue, done)?;

    ast.merge(sub);
    queue.pop();
    Ok(())
}

/// Returns the source files of a module directory, in stable order.
fn collate_sources(
    fs: &dyn SourceFs,
    import_root: &Path,
    module: &str,
) -> Result<Vec<PathBuf>, String> {
    let dir = import_root.join(module);
    let mut files = fs
        .read_dir(&dir)
        .map_err(|err| format!("unable to locate source directory for module {module:?}: {err}"))?;

    files.retain(|file| {
        file.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SOURCE_EXTENSIONS
                    .iter()
                    .any(|want| ext.eq_ignore_ascii_case(want))
            })
    });
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::tests::MemFs;

    fn parse(source: &str) -> Ast {
        let mut ast = Ast::new();
        ast.parse_str("main.svm", source).expect("parse");
        ast
    }

    #[test]
    fn include_splices_file_contents() {
        let fs = MemFs::new(&[("lib.svm", "nop\nhalt")]);
        let mut ast = parse("include \"lib.svm\"\nret");

        resolve_includes(&mut ast, &fs, &[]).expect("resolve");

        let names: Vec<_> = ast
            .nodes()
            .children()
            .iter()
            .map(|n| {
                n.as_list()
                    .expect("instruction")
                    .at(0)
                    .text_of(ValueKind::Ident)
                    .expect("name")
                    .to_string()
            })
            .collect();
        assert_eq!(names, vec!["nop", "halt", "ret"]);
    }

    #[test]
    fn include_searches_the_path_list() {
        let fs = MemFs::new(&[("lib/util.svm", "nop")]);
        let mut ast = parse("include \"util.svm\"");

        let search = vec![PathBuf::from("lib")];
        resolve_includes(&mut ast, &fs, &search).expect("resolve");
        assert_eq!(ast.nodes().len(), 1);
    }

    #[test]
    fn missing_include_is_an_error() {
        let fs = MemFs::new(&[]);
        let mut ast = parse("include \"gone.svm\"");

        let err = resolve_includes(&mut ast, &fs, &[]).expect_err("missing");
        assert!(err.message.contains("unable to locate include file"));
    }

    #[test]
    fn circular_includes_are_detected() {
        let fs = MemFs::new(&[("a.svm", "include \"b.svm\""), ("b.svm", "include \"a.svm\"")]);
        let mut ast = parse("include \"a.svm\"");

        let err = resolve_includes(&mut ast, &fs, &[]).expect_err("cycle");
        assert!(err.message.contains("circular reference"));
    }

    #[test]
    fn duplicate_includes_are_silently_dropped() {
        let fs = MemFs::new(&[("lib.svm", "nop")]);
        let mut ast = parse("include \"lib.svm\"\ninclude \"lib.svm\"\nhalt");

        resolve_includes(&mut ast, &fs, &[]).expect("resolve");
        assert_eq!(ast.nodes().len(), 2);
    }

    #[test]
    fn import_wraps_module_in_scope() {
        let fs = MemFs::new(&[("root/gfx/lib.svm", ":blit ret")]);
        let mut ast = parse("import \"gfx\"\nhalt");

        resolve_imports(
            &mut ast,
            &fs,
            Some(Path::new("root")),
            &[],
            &mut Vec::new(),
            &mut Vec::new(),
        )
        .expect("imports");

        let children = ast.nodes().children();
        // halt, then the module scope wrap.
        assert!(children[0].is_list(ListKind::Instruction));
        let begin = children[1].as_value().expect("scope begin");
        assert_eq!(begin.kind, ValueKind::ScopeBegin);
        assert_eq!(begin.text, "gfx");
        assert!(children.last().expect("end").is_value(ValueKind::ScopeEnd));
    }

    #[test]
    fn import_alias_names_the_scope() {
        let fs = MemFs::new(&[("root/long/path/lib.svm", "nop")]);
        let mut ast = parse("import g \"long/path\"");

        resolve_imports(
            &mut ast,
            &fs,
            Some(Path::new("root")),
            &[],
            &mut Vec::new(),
            &mut Vec::new(),
        )
        .expect("imports");

        let begin = ast.nodes().at(0).as_value().expect("scope begin");
        assert_eq!(begin.text, "g");
    }

    #[test]
    fn circular_imports_are_detected() {
        let fs = MemFs::new(&[
            ("root/a/main.svm", "import \"b\""),
            ("root/b/main.svm", "import \"a\""),
        ]);
        let mut ast = parse("import \"a\"");

        let err = resolve_imports(
            &mut ast,
            &fs,
            Some(Path::new("root")),
            &[],
            &mut Vec::new(),
            &mut Vec::new(),
        )
        .expect_err("cycle");
        assert!(err.message.contains("circular reference to module"));
    }

    #[test]
    fn diamond_imports_merge_once() {
        let fs = MemFs::new(&[
            ("root/a/main.svm", "import \"c\""),
            ("root/b/main.svm", "import \"c\""),
            ("root/c/main.svm", ":shared nop"),
        ]);
        let mut ast = parse("import \"a\"\nimport \"b\"");

        resolve_imports(
            &mut ast,
            &fs,
            Some(Path::new("root")),
            &[],
            &mut Vec::new(),
            &mut Vec::new(),
        )
        .expect("imports");

        let shared = ast
            .nodes()
            .children()
            .iter()
            .filter(|n| n.text_of(ValueKind::ScopeBegin) == Some("c"))
            .count();
        assert_eq!(shared, 1);
    }
}
