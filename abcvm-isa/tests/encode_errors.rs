mod common;

use abcvm_isa::*;
use common::assert_roundtrip;

use abcvm_isa::{EcmaOpcode as E, PandaOpcode as P};

#[test]
fn encode_empty_is_ok() {
    let (bytes, offsets) = encode::<EcmaOpcode>(&[]).unwrap();
    assert!(bytes.is_empty());
    assert!(offsets.is_empty());
}

// --- labels and jumps ---

#[test]
fn encode_label_oob_forward() {
    let err = encode(&[Insn::new(E::JmpImm8, &[Operand::Label(1)])]).unwrap_err();
    assert!(
        matches!(err, EncodeError::LabelOutOfBounds(1, 1)),
        "expected LabelOutOfBounds(1, 1), got {err}"
    );
}

#[test]
fn encode_label_oob_conditional() {
    let err = encode(&[Insn::new(E::JeqzImm8, &[Operand::Label(5)])]).unwrap_err();
    assert!(matches!(err, EncodeError::LabelOutOfBounds(5, 1)));
}

#[test]
fn encode_label_oob_reg_label() {
    let err = encode(&[Insn::new(P::JeqV8Imm8, &[Operand::Reg(0), Operand::Label(5)])]).unwrap_err();
    assert!(matches!(err, EncodeError::LabelOutOfBounds(5, 1)), "got {err}");
}

#[test]
fn backward_and_forward_jumps_resolve() {
    let program = [
        Insn::new(E::Ldundefined, &[]),
        Insn::new(E::JeqzImm8, &[Operand::Label(3)]),
        Insn::new(E::JmpImm8, &[Operand::Label(0)]),
        Insn::new(E::Return, &[]),
    ];
    let (bytes, offsets) = encode(&program).unwrap();
    assert_eq!(offsets, [0, 1, 3, 5]);
    assert_eq!(bytes, [0x00, 0x4f, 0x04, 0x4d, 0xfd, 0x64]);
    assert_roundtrip(&program);
}

#[test]
fn jump_too_far_for_imm8() {
    let mut program = vec![Insn::new(E::JmpImm8, &[Operand::Label(200)])];
    program.extend((0..200).map(|_| Insn::new(E::Ldundefined, &[])));
    let err = encode(&program).unwrap_err();
    assert_eq!(err, EncodeError::JumpOutOfRange { index: 0, delta: 201, width: 8 });

    program[0] = Insn::new(E::JmpImm16, &[Operand::Label(200)]);
    assert_roundtrip(&program);
}

// --- operand checks ---

#[test]
fn operand_count_mismatch() {
    let err = encode(&[Insn::new(E::LdaiImm32, &[])]).unwrap_err();
    assert_eq!(
        err,
        EncodeError::OperandCountMismatch { index: 0, mnemonic: "ldai", expected: 1, got: 0 }
    );
}

#[test]
fn operand_kind_mismatch() {
    let err = encode(&[Insn::new(P::MovV4V4, &[Operand::Reg(1), Operand::Imm(2)])]).unwrap_err();
    assert!(matches!(err, EncodeError::OperandKindMismatch { operand: 1, .. }), "got {err}");

    let err = encode(&[Insn::new(P::FldaiImm32, &[Operand::Imm(1)])]).unwrap_err();
    assert!(matches!(err, EncodeError::OperandKindMismatch { operand: 0, .. }), "got {err}");
}

#[test]
fn register_width_is_enforced() {
    let err = encode(&[Insn::new(P::MovV4V4, &[Operand::Reg(16), Operand::Reg(0)])]).unwrap_err();
    assert_eq!(err, EncodeError::RegOutOfRange { index: 0, reg: 16, width: 4 });
    assert_roundtrip(&[Insn::new(P::MovV4V4, &[Operand::Reg(15), Operand::Reg(15)])]);
}

#[test]
fn immediate_ranges_follow_signedness() {
    // ldai IMM8 is signed
    assert!(encode(&[Insn::new(P::LdaiImm8, &[Operand::Imm(-128)])]).is_ok());
    assert!(encode(&[Insn::new(P::LdaiImm8, &[Operand::Imm(127)])]).is_ok());
    let err = encode(&[Insn::new(P::LdaiImm8, &[Operand::Imm(128)])]).unwrap_err();
    assert_eq!(err, EncodeError::ImmOutOfRange { index: 0, value: 128, width: 8 });

    // callthis0 IMM8 is unsigned
    assert!(encode(&[Insn::new(E::Callthis0Imm8V8, &[Operand::Imm(255), Operand::Reg(0)])]).is_ok());
    let err = encode(&[Insn::new(E::Callthis0Imm8V8, &[Operand::Imm(-1), Operand::Reg(0)])]).unwrap_err();
    assert!(matches!(err, EncodeError::ImmOutOfRange { value: -1, .. }), "got {err}");
}

#[test]
fn float_immediates_use_slot_width() {
    let (bytes, _) = encode(&[Insn::new(P::FldaiImm32, &[Operand::Float(1.5)])]).unwrap();
    assert_eq!(bytes[1..], 1.5f32.to_bits().to_le_bytes());
    let (bytes, _) = encode(&[Insn::new(E::FldaiImm64, &[Operand::Float(3.14)])]).unwrap();
    assert_eq!(bytes, [0x63, 0x1f, 0x85, 0xeb, 0x51, 0xb8, 0x1e, 0x09, 0x40]);
}

#[test]
fn id_width_is_enforced() {
    let err = encode(&[Insn::new(E::LdaStrId16, &[Operand::Id(0x1_0000)])]).unwrap_err();
    assert_eq!(err, EncodeError::IdOutOfRange { id: 0x1_0000, width: 16 });
}

#[test]
fn prefixed_opcode_bytes() {
    let (bytes, _) = encode(&[Insn::new(E::Throw, &[])]).unwrap();
    assert_eq!(bytes, [0xfe, 0x00]);
    let (bytes, _) = encode(&[Insn::new(P::Divu2V8, &[Operand::Reg(3)])]).unwrap();
    assert_eq!(bytes, [0xfe, 0x00, 0x03]);
}

// --- id patching ---

#[test]
fn patch_id_rewrites_in_place() {
    let (mut bytes, offsets) = encode(&[
        Insn::new(E::Ldundefined, &[]),
        Insn::new(
            E::DefineclasswithbufferImm8Id16Id16Imm16V8,
            &[Operand::Imm(0), Operand::Id(1), Operand::Id(2), Operand::Imm(3), Operand::Reg(4)],
        ),
    ])
    .unwrap();
    let at = offsets[1] as usize;
    patch_id::<EcmaOpcode>(&mut bytes, at, 1, BytecodeId::new(0xbeef)).unwrap();

    let inst = FastCursor::<EcmaOpcode>::at(&bytes, at);
    assert_eq!(inst.id_at(0), BytecodeId::new(1), "other id untouched");
    assert_eq!(inst.id_at(1), BytecodeId::new(0xbeef));
    assert_eq!(inst.imm_data(1), 3, "following immediate untouched");
    assert_eq!(inst.vreg_at(0), 4);
}

#[test]
fn patch_id_errors() {
    let (mut bytes, _) = encode(&[Insn::new(E::Ldundefined, &[])]).unwrap();
    assert_eq!(
        patch_id::<EcmaOpcode>(&mut bytes, 0, 0, BytecodeId::new(1)),
        Err(EncodeError::NoSuchId { offset: 0, idx: 0 })
    );
    assert_eq!(
        patch_id::<EcmaOpcode>(&mut bytes, 1, 0, BytecodeId::new(1)),
        Err(EncodeError::InvalidPatchTarget(1))
    );

    let (mut bytes, _) = encode(&[Insn::new(E::LdaStrId16, &[Operand::Id(7)])]).unwrap();
    assert_eq!(
        patch_id::<EcmaOpcode>(&mut bytes, 0, 0, BytecodeId::new(0x1_0000)),
        Err(EncodeError::IdOutOfRange { id: 0x1_0000, width: 16 })
    );
    assert_eq!(bytes, [0x3e, 0x07, 0x00], "failed patch leaves code untouched");
}
