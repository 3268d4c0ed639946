//! Instruction format table.
//!
//! Every [`Format`] has a static [`FormatLayout`] generated from the ISA
//! data: total size and the ordered operand list. The typed view of the
//! same data lives in [`crate::formats`], where each format's marker type
//! implements [`ImmSlot`], [`VRegSlot`] and [`IdSlot`] for its operands.

use std::fmt;

use crate::Format;
use crate::width::Field;

/// What an operand slot holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// Immediate value.
    Imm,
    /// Virtual register number.
    VReg,
    /// Constant-pool / index-table id.
    Id,
}

/// Position of one operand inside an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OperandLayout {
    pub kind: OperandKind,
    /// Offset from the first opcode byte, in bits.
    pub bit_offset: u16,
    /// Width in bits: 4, 8, 16, 32 or 64.
    pub width: u8,
}

impl OperandLayout {
    /// Byte-granular bit offset as used by the bit reader.
    #[inline]
    pub fn bit_offset(&self) -> usize {
        self.bit_offset as usize
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width as u32
    }
}

/// Static description of a format.
#[derive(Debug)]
pub struct FormatLayout {
    /// Layout name as written in the ISA data, e.g. `IMM8_V8_V8_V8`.
    pub name: &'static str,
    /// Total instruction size in bytes, opcode included.
    pub size: usize,
    /// Whether the opcode takes two bytes.
    pub prefixed: bool,
    /// Operands in declaration order.
    pub operands: &'static [OperandLayout],
}

impl FormatLayout {
    /// The `idx`-th operand of the given kind.
    pub fn nth(&self, kind: OperandKind, idx: usize) -> Option<&'static OperandLayout> {
        self.operands.iter().filter(|op| op.kind == kind).nth(idx)
    }

    pub fn count(&self, kind: OperandKind) -> usize {
        self.operands.iter().filter(|op| op.kind == kind).count()
    }
}

/// How a call format passes its arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgsShape {
    /// Up to two inline registers, optionally with the accumulator.
    Short,
    /// Up to four inline registers, optionally with the accumulator.
    Full,
    /// A contiguous run of registers starting at a base register.
    Range,
}

impl Format {
    #[inline]
    pub fn size(self) -> usize {
        self.layout().size
    }

    #[inline]
    pub fn name(self) -> &'static str {
        self.layout().name
    }

    #[inline]
    pub fn is_prefixed(self) -> bool {
        self.layout().prefixed
    }

    #[inline]
    pub fn operands(self) -> &'static [OperandLayout] {
        self.layout().operands
    }

    pub fn imm_count(self) -> usize {
        self.layout().count(OperandKind::Imm)
    }

    pub fn vreg_count(self) -> usize {
        self.layout().count(OperandKind::VReg)
    }

    pub fn id_count(self) -> usize {
        self.layout().count(OperandKind::Id)
    }

    /// Whether the format has an `idx`-th id operand.
    pub fn has_id(self, idx: usize) -> bool {
        idx < self.id_count()
    }

    /// Whether the format has an `idx`-th register operand.
    pub fn has_vreg(self, idx: usize) -> bool {
        idx < self.vreg_count()
    }

    /// Whether the format has an `idx`-th immediate operand.
    pub fn has_imm(self, idx: usize) -> bool {
        idx < self.imm_count()
    }

    /// Two inline argument registers (`V4_V4_ID16`), or one register plus
    /// the accumulator position (`V4_IMM4_ID16`).
    pub fn is_vreg_args_short(self) -> bool {
        matches!(self, Format::V4V4Id16 | Format::V4Imm4Id16)
    }

    /// Four inline argument registers, or three plus the accumulator
    /// position.
    pub fn is_vreg_args(self) -> bool {
        matches!(self, Format::V4V4V4V4Id16 | Format::V4V4V4Imm4Id16)
    }

    /// Arguments in a register range starting at the format's register
    /// operand.
    pub fn is_vreg_args_range(self) -> bool {
        matches!(self, Format::V8Id16 | Format::V8Imm8Id16)
    }

    /// Whether the accumulator takes part in the argument list; its
    /// position is then the format's only immediate.
    pub fn accepts_acc(self) -> bool {
        matches!(self, Format::V4Imm4Id16 | Format::V4V4V4Imm4Id16)
    }

    /// Argument-passing shape of a call format, `None` for other formats.
    pub fn args_shape(self) -> Option<ArgsShape> {
        if self.is_vreg_args_short() {
            Some(ArgsShape::Short)
        } else if self.is_vreg_args() {
            Some(ArgsShape::Full)
        } else if self.is_vreg_args_range() {
            Some(ArgsShape::Range)
        } else {
            None
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compile-time identity of a format marker.
pub trait FormatSpec {
    const FORMAT: Format;
    const SIZE: usize;
}

/// The `IDX`-th immediate of a format.
pub trait ImmSlot<const IDX: usize>: FormatSpec {
    const BIT_OFFSET: usize;
    const WIDTH: u32;
    /// Narrowest unsigned type holding the immediate.
    type Unsigned: Field;
    /// Narrowest signed type holding the immediate.
    type Signed: Field;
}

/// The `IDX`-th virtual-register operand of a format.
pub trait VRegSlot<const IDX: usize>: FormatSpec {
    const BIT_OFFSET: usize;
    const WIDTH: u32;
}

/// The `IDX`-th id operand of a format.
pub trait IdSlot<const IDX: usize>: FormatSpec {
    const BIT_OFFSET: usize;
    const WIDTH: u32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats;

    #[test]
    fn layout_sizes_cover_operands() {
        for &format in Format::ALL {
            let layout = format.layout();
            let opcode_bits = if layout.prefixed { 16 } else { 8 };
            let operand_bits: usize = layout.operands.iter().map(|op| op.width()).sum::<u32>() as usize;
            assert_eq!(
                (opcode_bits + operand_bits) / 8,
                layout.size,
                "{} size disagrees with its operands",
                layout.name
            );
        }
    }

    #[test]
    fn marker_constants_match_layout() {
        assert_eq!(<formats::Imm8V8V8V8 as FormatSpec>::SIZE, Format::Imm8V8V8V8.size());
        assert_eq!(<formats::Imm8V8V8V8 as ImmSlot<0>>::BIT_OFFSET, 8);
        assert_eq!(<formats::Imm8V8V8V8 as VRegSlot<2>>::BIT_OFFSET, 32);
        assert_eq!(<formats::Imm4Imm4 as ImmSlot<1>>::BIT_OFFSET, 12);
        assert_eq!(<formats::PrefImm16V8 as ImmSlot<0>>::BIT_OFFSET, 16);
        assert_eq!(<formats::Imm8Id16Id16Imm16V8 as IdSlot<1>>::BIT_OFFSET, 32);
    }

    #[test]
    fn call_shapes() {
        assert_eq!(Format::V4V4Id16.args_shape(), Some(ArgsShape::Short));
        assert_eq!(Format::V4Imm4Id16.args_shape(), Some(ArgsShape::Short));
        assert_eq!(Format::V4V4V4V4Id16.args_shape(), Some(ArgsShape::Full));
        assert_eq!(Format::V4V4V4Imm4Id16.args_shape(), Some(ArgsShape::Full));
        assert_eq!(Format::V8Id16.args_shape(), Some(ArgsShape::Range));
        assert_eq!(Format::Imm8V8.args_shape(), None);
        assert!(Format::V4V4V4Imm4Id16.accepts_acc());
        assert!(!Format::V4V4Id16.accepts_acc());
    }

    #[test]
    fn existence_predicates() {
        let f = Format::Imm8Id16Id16Imm16V8;
        assert!(f.has_id(1) && !f.has_id(2));
        assert!(f.has_imm(1) && !f.has_imm(2));
        assert!(f.has_vreg(0) && !f.has_vreg(1));
        assert!(!Format::Bare.has_imm(0));
    }
}
