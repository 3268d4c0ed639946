use crate::cursor::{BytecodeCursor, SafeCursor};
use crate::opcode::Opcode;

/// Errors from [`decode`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Unassigned opcode at the given byte offset.
    #[error("invalid opcode at offset {0}")]
    InvalidOpcode(usize),
    /// Instruction at the given byte offset runs past the end of the code.
    #[error("truncated instruction at offset {0}")]
    Truncated(usize),
    /// A jump at `offset` targets `target`, which is not an instruction
    /// boundary inside the code.
    #[error("jump at offset {offset} targets invalid offset {target}")]
    InvalidJumpTarget { offset: usize, target: i64 },
    /// Offsets no longer fit the `u32` the result reports them in.
    #[error("code of {0} bytes is too large")]
    TooManyInstructions(usize),
}

/// Split `bytes` into instructions and check that every jump lands on an
/// instruction boundary.
///
/// Returns `(opcode, byte_offset)` pairs in code order. Instruction sizes
/// follow from consecutive offsets, or `bytes.len() - offset` for the last
/// one.
pub fn decode<O: Opcode>(bytes: &[u8]) -> Result<Vec<(O, u32)>, DecodeError> {
    if bytes.len() > u32::MAX as usize {
        return Err(DecodeError::TooManyInstructions(bytes.len()));
    }

    let mut instructions: Vec<(O, u32)> = Vec::new();
    // (insn byte offset, raw jump offset)
    let mut jumps: Vec<(usize, i64)> = Vec::new();
    let mut offset = 0usize;

    // Pass 1: walk instruction boundaries.
    while offset < bytes.len() {
        let inst = SafeCursor::<O>::new(bytes, offset, 0, bytes.len());
        let raw = inst.raw_opcode();
        if !inst.is_valid() {
            // Prefix byte with no secondary byte after it.
            return Err(DecodeError::Truncated(offset));
        }
        let opcode = O::from_raw(raw).ok_or(DecodeError::InvalidOpcode(offset))?;
        let size = opcode.size();
        if offset + size > bytes.len() {
            return Err(DecodeError::Truncated(offset));
        }
        if let Some(delta) = inst.jump_offset() {
            jumps.push((offset, delta as i64));
        }
        instructions.push((opcode, offset as u32));
        offset += size;
    }

    // Pass 2: resolve jump targets against the recorded boundaries.
    for (insn_offset, delta) in jumps {
        let target = insn_offset as i64 + delta;
        let on_boundary = u32::try_from(target)
            .ok()
            .is_some_and(|t| instructions.binary_search_by_key(&t, |&(_, o)| o).is_ok());
        if !on_boundary {
            return Err(DecodeError::InvalidJumpTarget {
                offset: insn_offset,
                target,
            });
        }
    }

    Ok(instructions)
}
