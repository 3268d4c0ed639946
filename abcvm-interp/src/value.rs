//! Register values and runtime handles.

use std::fmt;
use std::num::NonZeroU32;

/// Handle to a heap object owned by the runtime. Null is `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(NonZeroU32);

impl ObjectRef {
    #[inline]
    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0.get()
    }

    /// Handle of the `index`-th object of a zero-based heap.
    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(NonZeroU32::MIN.saturating_add(index as u32))
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// Handle to a class known to the runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassRef(pub u32);

/// One virtual register, or the accumulator.
///
/// Holds 64 raw bits plus a tag telling whether they are a reference, so
/// the collector-facing side can find roots without type information.
/// 32-bit integers are kept sign-extended and floats as their IEEE bits.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct VRegister {
    bits: u64,
    is_ref: bool,
}

impl VRegister {
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self { bits, is_ref: false }
    }

    #[inline]
    pub const fn from_i32(v: i32) -> Self {
        Self::from_bits(v as i64 as u64)
    }

    #[inline]
    pub const fn from_u32(v: u32) -> Self {
        Self::from_bits(v as u64)
    }

    #[inline]
    pub const fn from_i64(v: i64) -> Self {
        Self::from_bits(v as u64)
    }

    #[inline]
    pub fn from_f32(v: f32) -> Self {
        Self::from_bits(v.to_bits() as u64)
    }

    #[inline]
    pub fn from_f64(v: f64) -> Self {
        Self::from_bits(v.to_bits())
    }

    #[inline]
    pub fn from_ref(obj: Option<ObjectRef>) -> Self {
        Self {
            bits: obj.map_or(0, |o| o.raw() as u64),
            is_ref: true,
        }
    }

    #[inline]
    pub fn null() -> Self {
        Self::from_ref(None)
    }

    #[inline]
    pub fn bits(self) -> u64 {
        self.bits
    }

    #[inline]
    pub fn is_ref(self) -> bool {
        self.is_ref
    }

    #[inline]
    pub fn i32(self) -> i32 {
        self.bits as i32
    }

    #[inline]
    pub fn u32(self) -> u32 {
        self.bits as u32
    }

    #[inline]
    pub fn i64(self) -> i64 {
        self.bits as i64
    }

    #[inline]
    pub fn u64(self) -> u64 {
        self.bits
    }

    #[inline]
    pub fn f32(self) -> f32 {
        f32::from_bits(self.bits as u32)
    }

    #[inline]
    pub fn f64(self) -> f64 {
        f64::from_bits(self.bits)
    }

    /// The referenced object, `None` for null or for a primitive.
    #[inline]
    pub fn reference(self) -> Option<ObjectRef> {
        if self.is_ref {
            ObjectRef::from_raw(self.bits as u32)
        } else {
            None
        }
    }
}

impl fmt::Debug for VRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ref {
            match self.reference() {
                Some(obj) => write!(f, "ref@{}", obj.raw()),
                None => f.write_str("null"),
            }
        } else {
            write!(f, "{:#x}", self.bits)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_views_share_bits() {
        let v = VRegister::from_i32(-1);
        assert_eq!(v.i32(), -1);
        assert_eq!(v.i64(), -1, "32-bit values are sign-extended");
        assert_eq!(v.u32(), u32::MAX);
        assert!(!v.is_ref());
        assert_eq!(VRegister::from_u32(u32::MAX).i64(), u32::MAX as i64);
    }

    #[test]
    fn floats_round_trip_through_bits() {
        assert_eq!(VRegister::from_f32(1.5).f32(), 1.5);
        assert_eq!(VRegister::from_f64(-0.25).f64(), -0.25);
        assert!(VRegister::from_f64(f64::NAN).f64().is_nan());
    }

    #[test]
    fn references() {
        let obj = ObjectRef::from_raw(7).unwrap();
        let v = VRegister::from_ref(Some(obj));
        assert!(v.is_ref());
        assert_eq!(v.reference(), Some(obj));
        assert_eq!(VRegister::null().reference(), None);
        assert!(VRegister::null().is_ref());
        assert_eq!(VRegister::from_i32(7).reference(), None, "primitives are not references");
        assert_eq!(ObjectRef::from_raw(0), None);
    }
}
