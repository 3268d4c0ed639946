//! Bytecode instruction cursors.
//!
//! A cursor is a position inside a method's code. [`FastCursor`] assumes
//! the bytes were validated beforehand and reads with plain slice indexing.
//! [`SafeCursor`] carries a `[from, to)` window and degrades to an invalid
//! cursor yielding zero values instead of reading outside it; once invalid
//! it stays invalid.
//!
//! Both share the operation set of [`BytecodeCursor`], so code is generic
//! over the failure policy without dynamic dispatch.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;

use crate::Format;
use crate::bits;
use crate::format::{FormatSpec, IdSlot, ImmSlot, OperandKind, VRegSlot};
use crate::id::BytecodeId;
use crate::opcode::{ImmKind, Opcode, OpcodeFlags, OpcodeInfo};
use crate::width::Field;

/// Read a field through `cursor`, or the zero value when the cursor refuses.
fn read_at<'a, C, R>(cursor: &C, bit_offset: usize, width: u32) -> R
where
    C: BytecodeCursor<'a> + ?Sized,
    R: Field,
{
    let len = (bit_offset + width as usize).div_ceil(8);
    match cursor.window(len) {
        Some(bytes) => bits::read_field::<R>(bytes, bit_offset, width),
        None => R::default(),
    }
}

/// Operations shared by the fast and the safe cursor.
pub trait BytecodeCursor<'a>: Clone {
    type Opcode: Opcode;

    /// Byte offset of the instruction inside its code buffer.
    fn offset(&self) -> usize;

    /// The first `len` bytes of the instruction.
    fn window(&self, len: usize) -> Option<&'a [u8]>;

    /// Cursor at `offset() + delta`.
    fn jump_to(&self, delta: i32) -> Self;

    fn is_valid(&self) -> bool {
        true
    }

    /// Opcode value as encoded: one byte, or two for a prefixed opcode.
    fn raw_opcode(&self) -> u16 {
        let Some(bytes) = self.window(1) else {
            return 0;
        };
        let primary = bits::read_unsigned::<0, 8>(bytes);
        if !Self::Opcode::is_prefix_byte(primary) {
            return primary as u16;
        }
        self.window(2).map_or(0, bits::read_unsigned::<0, 16>)
    }

    /// Decoded opcode, `None` for an unassigned value or an invalid cursor.
    fn opcode(&self) -> Option<Self::Opcode> {
        let raw = self.raw_opcode();
        if !self.is_valid() {
            return None;
        }
        Self::Opcode::from_raw(raw)
    }

    fn info(&self) -> Option<&'static OpcodeInfo> {
        self.opcode().map(Opcode::info)
    }

    fn format(&self) -> Option<Format> {
        self.info().map(|info| info.format)
    }

    /// Instruction size in bytes, `0` for an illegal opcode.
    fn size(&self) -> usize {
        self.format().map_or(0, Format::size)
    }

    fn flags(&self) -> OpcodeFlags {
        self.info().map_or(OpcodeFlags::empty(), |info| info.flags)
    }

    /// `IDX`-th immediate of format `F`, zero-extended.
    fn imm<F: ImmSlot<IDX>, const IDX: usize>(&self) -> F::Unsigned {
        read_at(self, F::BIT_OFFSET, F::WIDTH)
    }

    /// `IDX`-th immediate of format `F`, sign-extended.
    fn imm_signed<F: ImmSlot<IDX>, const IDX: usize>(&self) -> F::Signed {
        read_at(self, F::BIT_OFFSET, F::WIDTH)
    }

    /// `IDX`-th register of format `F`.
    fn vreg<F: VRegSlot<IDX>, const IDX: usize>(&self) -> u16 {
        read_at(self, F::BIT_OFFSET, F::WIDTH)
    }

    /// `IDX`-th id of format `F`.
    fn id<F: IdSlot<IDX>, const IDX: usize>(&self) -> BytecodeId {
        BytecodeId::new(read_at(self, F::BIT_OFFSET, F::WIDTH))
    }

    fn imm_count(&self) -> usize {
        self.format().map_or(0, Format::imm_count)
    }

    /// `idx`-th immediate widened to `i64`: sign-extended for signed and
    /// jump immediates, zero-extended otherwise. `0` when there is none.
    fn imm_data(&self, idx: usize) -> i64 {
        let Some(info) = self.info() else {
            return 0;
        };
        let Some(op) = info.format.layout().nth(OperandKind::Imm, idx) else {
            return 0;
        };
        let signed = info.imm_kinds.get(idx).is_some_and(|kind| kind.is_signed());
        if signed {
            read_at::<_, i64>(self, op.bit_offset(), op.width())
        } else {
            read_at::<_, u64>(self, op.bit_offset(), op.width()) as i64
        }
    }

    fn vreg_count(&self) -> usize {
        self.format().map_or(0, Format::vreg_count)
    }

    fn vreg_at(&self, idx: usize) -> u16 {
        self.format()
            .and_then(|format| format.layout().nth(OperandKind::VReg, idx))
            .map_or(0, |op| read_at(self, op.bit_offset(), op.width()))
    }

    fn id_count(&self) -> usize {
        self.format().map_or(0, Format::id_count)
    }

    fn id_at(&self, idx: usize) -> BytecodeId {
        self.format()
            .and_then(|format| format.layout().nth(OperandKind::Id, idx))
            .map_or(BytecodeId::INVALID, |op| {
                BytecodeId::new(read_at(self, op.bit_offset(), op.width()))
            })
    }

    /// Highest register the instruction touches. For counted ranges this is
    /// the end of the range, otherwise the largest register operand.
    fn last_vreg(&self) -> Option<u16> {
        if self.vreg_count() == 0 {
            return None;
        }
        if let Some(last) = self.range_last_reg_idx() {
            return Some(last);
        }
        (0..self.vreg_count()).map(|idx| self.vreg_at(idx)).max()
    }

    /// Last register of a range whose length is encoded in the
    /// instruction: `base + count + extra - 1`.
    fn range_last_reg_idx(&self) -> Option<u16> {
        let range = self.info()?.range?;
        let count_imm = range.count_imm?;
        let base = self.vreg_at(0) as u64;
        let count = self.imm_data(count_imm as usize) as u64;
        let last = (base + count + range.extra as u64).checked_sub(1)?;
        u16::try_from(last).ok()
    }

    /// Id slot holding a literal-array reference, or `-1`.
    fn literal_index(&self) -> i32 {
        self.info().map_or(-1, OpcodeInfo::literal_index)
    }

    /// Signed jump offset of a jump instruction.
    fn jump_offset(&self) -> Option<i32> {
        let idx = self.info()?.jump_imm()?;
        Some(self.imm_data(idx) as i32)
    }

    fn is_jump(&self) -> bool {
        self.flags().contains(OpcodeFlags::JUMP)
    }

    fn is_conditional_jump(&self) -> bool {
        self.flags().contains(OpcodeFlags::JUMP | OpcodeFlags::CONDITIONAL)
    }

    fn is_range(&self) -> bool {
        self.flags().contains(OpcodeFlags::RANGE)
    }

    fn is_return_or_throw(&self) -> bool {
        self.flags().intersects(OpcodeFlags::RETURN | OpcodeFlags::THROW)
    }

    fn is_terminator(&self) -> bool {
        self.flags()
            .intersects(OpcodeFlags::JUMP | OpcodeFlags::RETURN | OpcodeFlags::THROW)
    }

    fn is_suspend(&self) -> bool {
        self.flags().contains(OpcodeFlags::SUSPEND)
    }

    fn is_call(&self) -> bool {
        self.flags().contains(OpcodeFlags::CALL)
    }

    fn can_throw(&self) -> bool {
        self.info().is_some_and(|info| {
            !info.exceptions.is_empty() || info.flags.contains(OpcodeFlags::THROW)
        })
    }

    /// The following instruction.
    fn next(&self) -> Self {
        self.jump_to(self.size() as i32)
    }

    /// The following instruction, assuming this one has format `F`.
    fn next_with<F: FormatSpec>(&self) -> Self {
        self.jump_to(F::SIZE as i32)
    }

    /// Render as `mnemonic op, op, ...` in operand declaration order.
    fn write_insn(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(info) = self.info() else {
            return write!(f, "illegal {:#04x}", self.raw_opcode());
        };
        f.write_str(info.mnemonic)?;

        let mut imm_idx = 0;
        for (n, op) in info.format.operands().iter().enumerate() {
            f.write_str(if n == 0 { " " } else { ", " })?;
            let raw: u64 = read_at(self, op.bit_offset(), op.width());
            match op.kind {
                OperandKind::Imm => {
                    let kind = info.imm_kinds.get(imm_idx).copied();
                    imm_idx += 1;
                    match kind {
                        Some(ImmKind::Signed | ImmKind::Jump) => {
                            write!(f, "{}", bits::sign_extend(raw, op.width()))?
                        }
                        Some(ImmKind::Float) if op.width == 32 => {
                            write!(f, "{}", f32::from_bits(raw as u32))?
                        }
                        Some(ImmKind::Float) => write!(f, "{}", f64::from_bits(raw))?,
                        _ => write!(f, "{raw}")?,
                    }
                }
                OperandKind::VReg => write!(f, "v{raw}")?,
                OperandKind::Id => write!(f, "{}", BytecodeId::new(raw as u32))?,
            }
        }
        Ok(())
    }
}

/// Unchecked cursor over verified code.
///
/// Reads outside the code buffer panic on slice indexing; no read ever
/// leaves the buffer.
pub struct FastCursor<'a, O> {
    code: &'a [u8],
    pc: usize,
    _isa: PhantomData<O>,
}

impl<O> Clone for FastCursor<'_, O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<O> Copy for FastCursor<'_, O> {}

impl<'a, O: Opcode> FastCursor<'a, O> {
    /// Cursor at the start of `code`.
    pub fn new(code: &'a [u8]) -> Self {
        Self::at(code, 0)
    }

    /// Cursor at byte `pc` of `code`.
    pub fn at(code: &'a [u8], pc: usize) -> Self {
        Self {
            code,
            pc,
            _isa: PhantomData,
        }
    }

    #[inline]
    pub fn code(&self) -> &'a [u8] {
        self.code
    }

    /// Absolute position of a relative jump target.
    #[inline]
    pub fn target(&self, delta: i32) -> usize {
        self.pc.wrapping_add_signed(delta as isize)
    }
}

impl<'a, O: Opcode> BytecodeCursor<'a> for FastCursor<'a, O> {
    type Opcode = O;

    #[inline]
    fn offset(&self) -> usize {
        self.pc
    }

    #[inline]
    fn window(&self, len: usize) -> Option<&'a [u8]> {
        Some(&self.code[self.pc..self.pc + len])
    }

    #[inline]
    fn jump_to(&self, delta: i32) -> Self {
        Self::at(self.code, self.target(delta))
    }
}

/// Bounds-checked cursor restricted to `[from, to)`.
pub struct SafeCursor<'a, O> {
    code: &'a [u8],
    pc: usize,
    from: usize,
    to: usize,
    valid: Cell<bool>,
    _isa: PhantomData<O>,
}

impl<O> Clone for SafeCursor<'_, O> {
    fn clone(&self) -> Self {
        Self {
            code: self.code,
            pc: self.pc,
            from: self.from,
            to: self.to,
            valid: self.valid.clone(),
            _isa: PhantomData,
        }
    }
}

impl<'a, O: Opcode> SafeCursor<'a, O> {
    /// Cursor at `pc`, confined to `[from, to)` of `code`.
    ///
    /// # Panics
    ///
    /// Unless `from <= pc < to <= code.len()`.
    pub fn new(code: &'a [u8], pc: usize, from: usize, to: usize) -> Self {
        assert!(from <= to, "empty window [{from}, {to})");
        assert!(to <= code.len(), "window end {to} past code end {}", code.len());
        assert!(from <= pc && pc < to, "pc {pc} outside [{from}, {to})");
        Self {
            code,
            pc,
            from,
            to,
            valid: Cell::new(true),
            _isa: PhantomData,
        }
    }

    /// Cursor at the start of `code`, confined to all of it.
    pub fn over(code: &'a [u8]) -> Self {
        Self::new(code, 0, 0, code.len())
    }

    /// A cursor that reads nothing.
    pub fn invalid() -> Self {
        Self {
            code: &[],
            pc: 0,
            from: 0,
            to: 0,
            valid: Cell::new(false),
            _isa: PhantomData,
        }
    }

    #[inline]
    pub fn from(&self) -> usize {
        self.from
    }

    #[inline]
    pub fn to(&self) -> usize {
        self.to
    }
}

impl<'a, O: Opcode> BytecodeCursor<'a> for SafeCursor<'a, O> {
    type Opcode = O;

    #[inline]
    fn offset(&self) -> usize {
        self.pc
    }

    fn window(&self, len: usize) -> Option<&'a [u8]> {
        if !self.valid.get() {
            return None;
        }
        match self.pc.checked_add(len) {
            Some(end) if end <= self.to => Some(&self.code[self.pc..end]),
            _ => {
                self.valid.set(false);
                None
            }
        }
    }

    fn jump_to(&self, delta: i32) -> Self {
        if !self.valid.get() {
            return Self::invalid();
        }
        let target = self.pc as i64 + delta as i64;
        let in_window = target >= self.from as i64 && target < self.to as i64;
        Self {
            code: self.code,
            pc: if in_window { target as usize } else { self.pc },
            from: self.from,
            to: self.to,
            valid: Cell::new(in_window),
            _isa: PhantomData,
        }
    }

    #[inline]
    fn is_valid(&self) -> bool {
        self.valid.get()
    }
}

impl<'a, O: Opcode> fmt::Display for FastCursor<'a, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_insn(f)
    }
}

impl<'a, O: Opcode> fmt::Display for SafeCursor<'a, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_insn(f)
    }
}

impl<O: Opcode> fmt::Debug for FastCursor<'_, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FastCursor")
            .field("isa", &O::ISA)
            .field("pc", &self.pc)
            .finish()
    }
}

impl<O: Opcode> fmt::Debug for SafeCursor<'_, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeCursor")
            .field("isa", &O::ISA)
            .field("pc", &self.pc)
            .field("window", &(self.from..self.to))
            .field("valid", &self.valid.get())
            .finish()
    }
}
