//! Opcode metadata shared by every instruction set.

use std::fmt;
use std::hash::Hash;

use bitflags::bitflags;

use crate::Format;

bitflags! {
    /// Per-opcode properties.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct OpcodeFlags: u32 {
        const JUMP = 1 << 0;
        const CONDITIONAL = 1 << 1;
        const RETURN = 1 << 2;
        const THROW = 1 << 3;
        const CALL = 1 << 4;
        const CALL_VIRT = 1 << 5;
        const CALL_DYN = 1 << 6;
        const INITOBJ = 1 << 7;
        const RANGE = 1 << 8;
        const SUSPEND = 1 << 9;
        const ACC_READ = 1 << 10;
        const ACC_WRITE = 1 << 11;
        const STRING_ID = 1 << 12;
        const METHOD_ID = 1 << 13;
        const LITERALARRAY_ID = 1 << 14;
        const TYPE_ID = 1 << 15;
        const FIELD_ID = 1 << 16;
    }
}

bitflags! {
    /// Exceptions an opcode may raise.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Exceptions: u16 {
        const NULL = 1 << 0;
        const BOUNDS = 1 << 1;
        const NEGSIZE = 1 << 2;
        const STORE = 1 << 3;
        const ARITH = 1 << 4;
        const CAST = 1 << 5;
        const OOM = 1 << 6;
        const CLASSDEF = 1 << 7;
        const CALL = 1 << 8;
        const THROW = 1 << 9;
        const STACK = 1 << 10;
        const ECMA = 1 << 11;
    }
}

/// How an immediate is interpreted for display and generic extraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImmKind {
    Unsigned,
    Signed,
    /// IEEE bit pattern (32- or 64-bit).
    Float,
    /// Signed byte offset relative to the instruction start.
    Jump,
}

impl ImmKind {
    /// Whether the generic `i64` view sign-extends.
    #[inline]
    pub fn is_signed(self) -> bool {
        matches!(self, ImmKind::Signed | ImmKind::Jump)
    }
}

/// What an id operand refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdKind {
    String,
    Method,
    LiteralArray,
    Type,
    Field,
}

/// Register-range description of a range opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeInfo {
    /// Immediate slot holding the argument count. `None` when the count
    /// comes from the callee's declared arity.
    pub count_imm: Option<u8>,
    /// Registers in the range beyond the counted arguments (a leading
    /// `this`).
    pub extra: u8,
}

/// Static description of one opcode.
#[derive(Debug)]
pub struct OpcodeInfo {
    pub mnemonic: &'static str,
    pub raw: u16,
    pub format: Format,
    pub flags: OpcodeFlags,
    pub exceptions: Exceptions,
    /// One entry per immediate operand, in format order.
    pub imm_kinds: &'static [ImmKind],
    /// One entry per id operand, in format order.
    pub id_kinds: &'static [IdKind],
    pub range: Option<RangeInfo>,
}

impl OpcodeInfo {
    /// Id slot that holds a literal-array reference, or `-1`.
    pub fn literal_index(&self) -> i32 {
        self.id_kinds
            .iter()
            .position(|k| *k == IdKind::LiteralArray)
            .map_or(-1, |idx| idx as i32)
    }

    /// Immediate slot holding the jump offset, if this is a jump.
    pub fn jump_imm(&self) -> Option<usize> {
        self.imm_kinds.iter().position(|k| *k == ImmKind::Jump)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.format.size()
    }
}

/// An instruction set's opcode enum.
///
/// Implemented by the generated enums. The raw value of a prefixed opcode
/// is `(secondary << 8) | prefix`, i.e. the first two instruction bytes
/// read as a little-endian `u16`.
pub trait Opcode: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Instruction set name.
    const ISA: &'static str;
    /// First byte value that introduces a two-byte opcode.
    const MIN_PREFIX_OPCODE: u8;
    /// Declared prefix groups.
    const PREFIXES: &'static [(&'static str, u8)];

    /// Every opcode, in table order.
    fn all() -> &'static [Self];

    fn from_raw(raw: u16) -> Option<Self>;

    fn raw(self) -> u16;

    fn info(self) -> &'static OpcodeInfo;

    #[inline]
    fn is_prefix_byte(byte: u8) -> bool {
        byte >= Self::MIN_PREFIX_OPCODE
    }

    #[inline]
    fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    #[inline]
    fn format(self) -> Format {
        self.info().format
    }

    #[inline]
    fn flags(self) -> OpcodeFlags {
        self.info().flags
    }

    #[inline]
    fn size(self) -> usize {
        self.info().format.size()
    }
}
