use std::fmt;

/// Id operand of an instruction: an index into the method's 16-bit index
/// table, or a raw file offset.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BytecodeId(u32);

impl BytecodeId {
    /// Reserved "no id" value.
    pub const INVALID: Self = Self(u32::MAX);

    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }

    /// Index-table slot. Only meaningful when the value fits in 16 bits.
    #[inline]
    pub fn as_index(self) -> u16 {
        debug_assert!(self.0 <= u16::MAX as u32, "id {:#x} is not an index", self.0);
        self.0 as u16
    }

    /// Raw file offset ("entity id").
    #[inline]
    pub const fn as_file_offset(self) -> u32 {
        self.0
    }
}

impl Default for BytecodeId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl From<u32> for BytecodeId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for BytecodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "BytecodeId({:#x})", self.0)
        } else {
            f.write_str("BytecodeId(INVALID)")
        }
    }
}

impl fmt::Display for BytecodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id{:#x}", self.0)
    }
}
