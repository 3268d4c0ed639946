use crate::bits;
use crate::cursor::{BytecodeCursor, SafeCursor};
use crate::format::OperandKind;
use crate::id::BytecodeId;
use crate::opcode::{ImmKind, Opcode};

/// Errors from [`encode`] and [`patch_id`].
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("instruction {index} ({mnemonic}): expected {expected} operands, got {got}")]
    OperandCountMismatch {
        index: usize,
        mnemonic: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("instruction {index} ({mnemonic}): operand {operand} has the wrong kind")]
    OperandKindMismatch {
        index: usize,
        mnemonic: &'static str,
        operand: usize,
    },
    #[error("instruction {index}: immediate {value} does not fit in {width} bits")]
    ImmOutOfRange { index: usize, value: i64, width: u32 },
    #[error("instruction {index}: register v{reg} does not fit in {width} bits")]
    RegOutOfRange { index: usize, reg: u16, width: u32 },
    #[error("id {id:#x} does not fit in {width} bits")]
    IdOutOfRange { id: u32, width: u32 },
    /// A jump references instruction index `{0}` beyond the program length `{1}`.
    #[error("label index {0} is out of bounds (program length: {1})")]
    LabelOutOfBounds(u32, usize),
    #[error("instruction {index}: jump distance {delta} does not fit in {width} bits")]
    JumpOutOfRange { index: usize, delta: i64, width: u32 },
    /// The program is too large for `u32` offsets.
    #[error("instruction count {0} exceeds offset capacity")]
    TooManyInstructions(usize),
    #[error("no valid instruction at offset {0}")]
    InvalidPatchTarget(usize),
    #[error("instruction at offset {offset} has no id operand #{idx}")]
    NoSuchId { offset: usize, idx: usize },
}

/// One operand of an [`Insn`], given in format declaration order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Operand {
    Reg(u16),
    Imm(i64),
    /// Value of a floating-point immediate; stored as `f32` bits in a
    /// 32-bit slot.
    Float(f64),
    Id(u32),
    /// Jump target as an instruction index into the encoded slice.
    Label(u32),
}

/// An instruction to encode.
#[derive(Clone, Debug, PartialEq)]
pub struct Insn<O> {
    pub opcode: O,
    pub operands: Vec<Operand>,
}

impl<O: Opcode> Insn<O> {
    pub fn new(opcode: O, operands: &[Operand]) -> Self {
        Self {
            opcode,
            operands: operands.to_vec(),
        }
    }
}

#[inline]
fn max_unsigned(width: u32) -> u64 {
    if width >= 64 { u64::MAX } else { (1u64 << width) - 1 }
}

#[inline]
fn fits_signed(value: i64, width: u32) -> bool {
    width >= 64 || {
        let half = 1i64 << (width - 1);
        (-half..half).contains(&value)
    }
}

/// Encode a sequence of instructions into bytecode bytes.
///
/// [`Operand::Label`] values are instruction indices into `instructions`
/// and become relative byte offsets. Returns `(bytes, offsets)` where
/// `offsets[i]` is the byte offset of instruction `i`, as needed for
/// try-block metadata.
///
/// ```
/// use abcvm_isa::{EcmaOpcode, Insn, Operand, encode};
///
/// let program = [
///     Insn::new(EcmaOpcode::JmpImm8, &[Operand::Label(1)]),
///     Insn::new(EcmaOpcode::Ldundefined, &[]),
/// ];
/// let (bytes, offsets) = encode(&program)?;
/// assert_eq!(bytes, [0x4d, 0x02, 0x00]);
/// assert_eq!(offsets, [0, 2]);
/// # Ok::<(), abcvm_isa::EncodeError>(())
/// ```
pub fn encode<O: Opcode>(instructions: &[Insn<O>]) -> Result<(Vec<u8>, Vec<u32>), EncodeError> {
    let mut offsets = Vec::with_capacity(instructions.len());
    let mut total = 0usize;
    for insn in instructions {
        let offset =
            u32::try_from(total).map_err(|_| EncodeError::TooManyInstructions(instructions.len()))?;
        offsets.push(offset);
        total += insn.opcode.size();
    }
    if total > u32::MAX as usize {
        return Err(EncodeError::TooManyInstructions(instructions.len()));
    }

    let mut bytes = vec![0u8; total];
    for (index, insn) in instructions.iter().enumerate() {
        let info = insn.opcode.info();
        let layout = info.format.layout();
        if insn.operands.len() != layout.operands.len() {
            return Err(EncodeError::OperandCountMismatch {
                index,
                mnemonic: info.mnemonic,
                expected: layout.operands.len(),
                got: insn.operands.len(),
            });
        }

        let start = offsets[index] as usize;
        let buf = &mut bytes[start..start + layout.size];
        let opcode_bits = if layout.prefixed { 16 } else { 8 };
        bits::write_bits(buf, 0, opcode_bits, info.raw as u64);

        let kind_mismatch = |operand| EncodeError::OperandKindMismatch {
            index,
            mnemonic: info.mnemonic,
            operand,
        };
        let mut imm_idx = 0;
        for (n, (slot, operand)) in layout.operands.iter().zip(&insn.operands).enumerate() {
            let width = slot.width();
            let value = match (slot.kind, *operand) {
                (OperandKind::VReg, Operand::Reg(reg)) => {
                    if reg as u64 > max_unsigned(width) {
                        return Err(EncodeError::RegOutOfRange { index, reg, width });
                    }
                    reg as u64
                }
                (OperandKind::Id, Operand::Id(id)) => {
                    if id as u64 > max_unsigned(width) {
                        return Err(EncodeError::IdOutOfRange { id, width });
                    }
                    id as u64
                }
                (OperandKind::Imm, operand) => {
                    let kind = info.imm_kinds.get(imm_idx).copied().unwrap_or(ImmKind::Unsigned);
                    imm_idx += 1;
                    match (kind, operand) {
                        (ImmKind::Jump, Operand::Label(target)) => {
                            let target_offset = *offsets
                                .get(target as usize)
                                .ok_or(EncodeError::LabelOutOfBounds(target, instructions.len()))?;
                            let delta = target_offset as i64 - start as i64;
                            if !fits_signed(delta, width) {
                                return Err(EncodeError::JumpOutOfRange { index, delta, width });
                            }
                            delta as u64
                        }
                        (ImmKind::Jump, Operand::Imm(delta)) => {
                            if !fits_signed(delta, width) {
                                return Err(EncodeError::JumpOutOfRange { index, delta, width });
                            }
                            delta as u64
                        }
                        (ImmKind::Float, Operand::Float(value)) if width == 32 => {
                            (value as f32).to_bits() as u64
                        }
                        (ImmKind::Float, Operand::Float(value)) => value.to_bits(),
                        (ImmKind::Signed, Operand::Imm(value)) => {
                            if !fits_signed(value, width) {
                                return Err(EncodeError::ImmOutOfRange { index, value, width });
                            }
                            value as u64
                        }
                        (ImmKind::Unsigned, Operand::Imm(value)) => {
                            if value < 0 || value as u64 > max_unsigned(width) {
                                return Err(EncodeError::ImmOutOfRange { index, value, width });
                            }
                            value as u64
                        }
                        _ => return Err(kind_mismatch(n)),
                    }
                }
                _ => return Err(kind_mismatch(n)),
            };
            bits::write_bits(buf, slot.bit_offset(), width, value);
        }
    }

    Ok((bytes, offsets))
}

/// Rewrite the `idx`-th id operand of the instruction at `offset` in place.
///
/// Used by offline tools relinking code against a new index table; the
/// interpreter never patches code it runs.
pub fn patch_id<O: Opcode>(
    code: &mut [u8],
    offset: usize,
    idx: usize,
    id: BytecodeId,
) -> Result<(), EncodeError> {
    if offset >= code.len() {
        return Err(EncodeError::InvalidPatchTarget(offset));
    }
    let format = SafeCursor::<O>::new(code, offset, 0, code.len())
        .format()
        .ok_or(EncodeError::InvalidPatchTarget(offset))?;
    let size = format.size();
    if offset + size > code.len() {
        return Err(EncodeError::InvalidPatchTarget(offset));
    }
    let slot = format
        .layout()
        .nth(OperandKind::Id, idx)
        .ok_or(EncodeError::NoSuchId { offset, idx })?;
    if id.raw() as u64 > max_unsigned(slot.width()) {
        return Err(EncodeError::IdOutOfRange {
            id: id.raw(),
            width: slot.width(),
        });
    }
    bits::write_bits(
        &mut code[offset..offset + size],
        slot.bit_offset(),
        slot.width(),
        id.raw() as u64,
    );
    Ok(())
}
