//! Table-wide consistency checks for both instruction sets.

mod common;

use abcvm_isa::*;
use common::{assert_roundtrip, zero_operands};

fn check_table<O: Opcode>() {
    assert!(!O::all().is_empty(), "{} has no opcodes", O::ISA);
    for &op in O::all() {
        let info = op.info();
        let raw = op.raw();
        assert_eq!(info.raw, raw, "{}: raw value mismatch", info.mnemonic);
        assert_eq!(O::from_raw(raw), Some(op), "{}: from_raw({raw:#x}) does not round-trip", info.mnemonic);
        assert!(info.size() >= 1, "{} has size 0", info.mnemonic);

        let primary = (raw & 0xff) as u8;
        assert_eq!(
            info.format.is_prefixed(),
            O::is_prefix_byte(primary),
            "{}: prefix byte and format disagree",
            info.mnemonic
        );
        if info.format.is_prefixed() {
            assert!(
                O::PREFIXES.iter().any(|&(_, byte)| byte == primary),
                "{}: prefix {primary:#x} is not declared",
                info.mnemonic
            );
        }

        assert_eq!(info.imm_kinds.len(), info.format.imm_count(), "{}: imm kinds", info.mnemonic);
        assert_eq!(info.id_kinds.len(), info.format.id_count(), "{}: id kinds", info.mnemonic);
        if info.flags.contains(OpcodeFlags::JUMP) {
            assert!(info.jump_imm().is_some(), "{}: jump without offset", info.mnemonic);
        }
        if info.flags.contains(OpcodeFlags::RANGE) {
            assert!(info.range.is_some(), "{}: range flag without range", info.mnemonic);
        }
        let has_literal = info.id_kinds.contains(&IdKind::LiteralArray);
        assert_eq!(
            info.flags.contains(OpcodeFlags::LITERALARRAY_ID),
            has_literal,
            "{}: literal-array flag",
            info.mnemonic
        );

        let m = info.mnemonic;
        assert!(
            m.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'_'),
            "mnemonic '{m}' contains unexpected characters"
        );
    }
}

fn check_encodings<O: Opcode>() {
    for &op in O::all() {
        let insn = Insn::new(op, &zero_operands(op, 0));
        let (bytes, _) = encode(std::slice::from_ref(&insn))
            .unwrap_or_else(|e| panic!("{}: {e}", op.mnemonic()));
        assert_eq!(bytes.len(), op.size(), "{}: encoded size", op.mnemonic());

        let inst = FastCursor::<O>::new(&bytes);
        assert_eq!(inst.opcode(), Some(op), "{}: decoded opcode", op.mnemonic());
        assert_eq!(inst.size(), bytes.len());
        assert!(
            inst.to_string().starts_with(op.mnemonic()),
            "{}: rendered as {inst}",
            op.mnemonic()
        );
    }
}

#[test]
fn ecma_table_is_consistent() {
    check_table::<EcmaOpcode>();
    assert_eq!(EcmaOpcode::MIN_PREFIX_OPCODE, 0xfb);
}

#[test]
fn panda_table_is_consistent() {
    check_table::<PandaOpcode>();
    assert_eq!(PandaOpcode::MIN_PREFIX_OPCODE, 0xfe);
}

#[test]
fn every_ecma_opcode_encodes_and_decodes() {
    check_encodings::<EcmaOpcode>();
}

#[test]
fn every_panda_opcode_encodes_and_decodes() {
    check_encodings::<PandaOpcode>();
}

#[test]
fn whole_table_as_one_program() {
    let program: Vec<Insn<PandaOpcode>> = PandaOpcode::all()
        .iter()
        .enumerate()
        .map(|(i, &op)| Insn::new(op, &zero_operands(op, i as u32)))
        .collect();
    assert_roundtrip(&program);
}

#[test]
fn every_format_is_used() {
    let mut used: Vec<Format> = EcmaOpcode::all()
        .iter()
        .map(|op| op.format())
        .chain(PandaOpcode::all().iter().map(|op| op.format()))
        .collect();
    used.sort();
    used.dedup();
    assert_eq!(used, Format::ALL);
}
