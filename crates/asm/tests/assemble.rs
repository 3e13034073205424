//! End-to-end assembler tests: source text in, instruction bytes out.

use svm_asm::{AssembleOptions, assemble_source};

fn assemble(source: &str) -> Vec<u8> {
    assemble_source("test.svm", source, &AssembleOptions::default())
        .expect("assemble")
        .instructions
}

fn assemble_debug(source: &str) -> svm_ar::Archive {
    let options = AssembleOptions {
        debug: true,
        ..AssembleOptions::default()
    };
    assemble_source("test.svm", source, &options).expect("assemble")
}

fn assemble_err(source: &str) -> String {
    assemble_source("test.svm", source, &AssembleOptions::default())
        .expect_err("expected diagnostic")
        .message
}

// Operand attribute bytes: mode in bits 6..8, type in bits 4..6 (i16 = 3 by
// default), register index in the low four bits.
const REG0: u8 = 0xb0;
const REG1: u8 = 0xb1;
const IMM: u8 = 0x30;
const IND: u8 = 0x70;

#[test]
fn encodes_mov_constant_to_register() {
    let code = assemble(":main { mov r0, 123\nhalt }");
    assert_eq!(code, vec![2, REG0, IMM, 0, 123, 1]);
}

#[test]
fn encodes_expression_operands_reduced() {
    let code = assemble(":main { mov r0, 1+2*3\nhalt }");
    assert_eq!(code, vec![2, REG0, IMM, 0, 7, 1]);
}

#[test]
fn encodes_indirect_constant_operand() {
    let code = assemble(":main { mov r0, $16#100\nhalt }");
    assert_eq!(code, vec![2, REG0, IND, 1, 0, 1]);
}

#[test]
fn encodes_indirect_register_operand() {
    let code = assemble(":main { mov r0, $r1\nhalt }");
    assert_eq!(code, vec![2, REG0, 0xf1, 1]);
}

#[test]
fn encodes_type_descriptors_in_attribute_byte() {
    // u8 = 0, u16 = 1, i8 = 2, i16 = 3 in bits 4..6.
    let code = assemble(":main { mov u8 r0, i8 5\nhalt }");
    assert_eq!(code, vec![2, 0x80, 0x20, 0, 5, 1]);
}

#[test]
fn resolves_labels_to_addresses() {
    let code = assemble(
        ":main { jmp skip\nmov r0, 123\nhalt\n:skip\nmov r0, 456\nhalt }",
    );
    // jmp(4) + mov(6) + halt(1) = 11 is the skip target.
    assert_eq!(&code[..4], &[25, IMM, 0, 11]);
    assert_eq!(code[10], 1);
    assert_eq!(&code[11..13], &[2, REG0]);
}

#[test]
fn scoped_constants_resolve_by_climbing() {
    let code = assemble("const N 5\n:main { add r0, N, 1\nhalt }");
    assert_eq!(code, vec![7, REG0, IMM, 0, 5, IMM, 0, 1, 1]);
}

#[test]
fn current_address_symbol_resolves() {
    // The mov instruction starts at 0, so $$ is 0 during its evaluation.
    let code = assemble(":main { mov r0, $$\nhalt }");
    assert_eq!(code, vec![2, REG0, IMM, 0, 0, 1]);
}

#[test]
fn data_directives_write_big_endian_values() {
    let code = assemble("d16 16#1234, 5\nd8 1, 2");
    assert_eq!(code, vec![0x12, 0x34, 0, 5, 1, 2]);
}

#[test]
fn data_directives_expand_strings_code_point_wise() {
    let code = assemble("d8 \"AB\"\nd16 \"a\"");
    assert_eq!(code, vec![65, 66, 0, 97]);
}

#[test]
fn reserve_emits_zero_bytes() {
    let code = assemble("reserve 4\nhalt");
    assert_eq!(code, vec![0, 0, 0, 0, 1]);
}

#[test]
fn address_directive_moves_the_cursor() {
    let code = assemble("address 4\nhalt");
    assert_eq!(code, vec![0, 0, 0, 0, 1]);
}

#[test]
fn labels_after_address_directive_are_stable() {
    let code = assemble("jmp start\naddress 16\n:start\nhalt");
    assert_eq!(&code[..4], &[25, IMM, 0, 16]);
    assert_eq!(code[16], 1);
    assert_eq!(code.len(), 17);
}

#[test]
fn macro_expansion_substitutes_parameters() {
    let code = assemble(
        "macro inc3 x\nadd x, x, 1\nadd x, x, 1\nadd x, x, 1\nendmacro\n:main { mov r0, 0\ninc3 r0\nhalt }",
    );
    // mov, then three add r0, r0, 1 instructions, then halt.
    let add = [7, REG0, REG0, IMM, 0, 1];
    assert_eq!(&code[..5], &[2, REG0, IMM, 0, 0]);
    let mut at = 5;
    for _ in 0..3 {
        assert_eq!(&code[at..at + 6], &add);
        at += 6;
    }
    assert_eq!(code[at], 1);
}

#[test]
fn macro_expansion_keeps_inner_scopes_disjoint() {
    // A macro with an inner scope and label expanded twice must not clash.
    let source = "\
macro spin n
{ :loop
  sub n, n, 1
  cgt n, 0
  jnz loop }
endmacro
:main { mov r0, 3
  spin r0
  mov r1, 3
  spin r1
  halt }";
    let archive = assemble_debug(source);
    assert!(!archive.instructions.is_empty());
}

#[test]
fn conditional_lowering_compares_and_branches() {
    let code = assemble(":main { if r0 == 1 \n mov r1, 5\nhalt }");
    // ceq r0, 1; jez past; mov r1, 5; halt
    assert_eq!(&code[..5], &[19, REG0, IMM, 0, 1]);
    assert_eq!(code[5], 26);
    // The branch target is the address after the mov body.
    let target = u16::from_be_bytes([code[7], code[8]]) as usize;
    assert_eq!(code[target], 1);
    assert_eq!(&code[9..11], &[2, REG1]);
}

#[test]
fn debug_symbols_carry_positions_and_breakpoints() {
    let archive = assemble_debug(":main { nop\nbreak\nhalt }");
    assert_eq!(archive.debug.files.len(), 1);
    assert_eq!(archive.debug.symbols.len(), 2);

    let nop = &archive.debug.symbols[0];
    assert_eq!(nop.address, 0);
    assert!(nop.flags.is_empty());

    // The pending breakpoint flag attaches to the next emitted instruction.
    let halt = &archive.debug.symbols[1];
    assert_eq!(halt.address, 1);
    assert!(halt.flags.contains(svm_ar::DebugFlags::BREAKPOINT));
}

#[test]
fn encoded_length_matches_emitted_bytes() {
    // Label addresses recorded during layout must equal the positions the
    // encoder later writes to.
    let source = "\
:main {
  mov r0, 1
  d8 1, 2, 3
  reserve 2
  :here
  jmp here
  halt }";
    let code = assemble(source);
    // mov(5) + d8(3) + reserve(2) = 10; jmp points at itself.
    assert_eq!(&code[10..14], &[25, IMM, 0, 10]);
}

#[test]
fn duplicate_labels_are_rejected() {
    let err = assemble_err(":dup\nnop\n:dup\nhalt");
    assert!(err.contains("duplicate definition name"));
}

#[test]
fn duplicate_constants_are_rejected() {
    let err = assemble_err("const N 1\nconst N 2\nhalt");
    assert!(err.contains("duplicate symbol"));
}

#[test]
fn macro_and_label_share_a_namespace() {
    let err = assemble_err("macro foo\nnop\nendmacro\n:foo\nhalt");
    assert!(err.contains("duplicate"));
}

#[test]
fn unresolved_references_are_fatal_in_the_final_pass() {
    let err = assemble_err(":main { jmp nowhere\nhalt }");
    assert!(err.contains("reference to undefined value"));
}

#[test]
fn unknown_instructions_are_rejected() {
    let err = assemble_err(":main { frobnicate r0\nhalt }");
    assert!(err.contains("unknown instruction"));
}

#[test]
fn macro_argument_count_is_checked() {
    let err = assemble_err("macro two a, b\nadd a, a, b\nendmacro\n:main { two r0\nhalt }");
    assert!(err.contains("invalid number of arguments"));
}

#[test]
fn recursive_macros_hit_the_expansion_limit() {
    let err = assemble_err("macro loop\nloop\nendmacro\n:main { loop\nhalt }");
    assert!(err.contains("macro expansion limit"));
}

#[test]
fn scope_climbing_resolves_outer_names() {
    // A name defined at the root is findable from a nested scope; a name in
    // an inner scope shadows the outer one.
    let source = "\
const N 1
:outer {
  const M 2
  :inner {
    mov r0, N
    mov r1, M
    halt } }";
    let code = assemble(source);
    assert_eq!(&code[..5], &[2, REG0, IMM, 0, 1]);
    assert_eq!(&code[5..10], &[2, REG1, IMM, 0, 2]);
}

#[test]
fn qualified_names_resolve_without_climbing() {
    let source = "\
:lib {
  const answer 42 }
:main {
  mov r0, lib.answer
  halt }";
    let code = assemble(source);
    assert_eq!(code, vec![2, REG0, IMM, 0, 42, 1]);
}

#[test]
fn archives_round_trip_through_the_wire_format() {
    let archive = assemble_debug(":main { mov r0, 1\nhalt }");

    let mut buf = Vec::new();
    svm_ar::save(&archive, &mut buf).expect("save");
    let loaded = svm_ar::load(buf.as_slice()).expect("load");
    assert_eq!(loaded, archive);
}
