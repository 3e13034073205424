//! Include resolution against a real directory tree.

use std::fs;

use svm_asm::{AssembleOptions, assemble_module, assemble_source};

#[test]
fn includes_resolve_along_the_search_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("util.svm"), ":helper ret\n").expect("write");

    let options = AssembleOptions {
        include_paths: vec![dir.path().to_path_buf()],
        ..AssembleOptions::default()
    };
    let archive = assemble_source(
        "main.svm",
        "include \"util.svm\"\n:main { call helper\nhalt }",
        &options,
    )
    .expect("assemble");

    // ret, call helper (helper = 0), halt.
    assert_eq!(archive.instructions, vec![31, 28, 0x30, 0, 0, 1]);
}

#[test]
fn modules_assemble_from_directories() {
    let dir = tempfile::tempdir().expect("tempdir");
    let module = dir.path().join("app");
    fs::create_dir(&module).expect("mkdir");
    fs::write(module.join("main.svm"), ":main { mov r0, 1\nhalt }\n").expect("write");
    fs::write(module.join("notes.txt"), "not a source file").expect("write");

    let archive = assemble_module(dir.path(), "app", &AssembleOptions::default())
        .expect("assemble");
    assert_eq!(archive.instructions, vec![2, 0xb0, 0x30, 0, 1, 1]);
}

#[test]
fn missing_module_directory_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = assemble_module(dir.path(), "ghost", &AssembleOptions::default())
        .expect_err("missing module");
    assert!(err.message.contains("unable to locate source directory"));
}
