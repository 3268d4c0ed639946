#![allow(dead_code)]

use abcvm_isa::*;

/// Render the instruction at the start of `bytes`.
pub fn render<O: Opcode>(bytes: &[u8]) -> String {
    FastCursor::<O>::new(bytes).to_string()
}

/// Operands that encode for any instruction of `opcode`'s format: zero
/// registers and ids, zero immediates, and jumps to instruction `self_idx`.
pub fn zero_operands<O: Opcode>(opcode: O, self_idx: u32) -> Vec<Operand> {
    let info = opcode.info();
    let mut imm_idx = 0;
    info.format
        .operands()
        .iter()
        .map(|slot| match slot.kind {
            OperandKind::VReg => Operand::Reg(0),
            OperandKind::Id => Operand::Id(0),
            OperandKind::Imm => {
                let kind = info.imm_kinds[imm_idx];
                imm_idx += 1;
                match kind {
                    ImmKind::Jump => Operand::Label(self_idx),
                    ImmKind::Float => Operand::Float(0.0),
                    ImmKind::Signed | ImmKind::Unsigned => Operand::Imm(0),
                }
            }
        })
        .collect()
}

pub fn assert_roundtrip<O: Opcode>(program: &[Insn<O>]) {
    let (bytes, offsets) = encode(program).unwrap();
    let decoded = decode::<O>(&bytes).unwrap();
    assert_eq!(decoded.len(), program.len(), "length mismatch");
    for (i, (insn, (opcode, offset))) in program.iter().zip(&decoded).enumerate() {
        assert_eq!(insn.opcode, *opcode, "opcode mismatch at {i}");
        assert_eq!(offsets[i], *offset, "offset mismatch at {i}");
    }
}
