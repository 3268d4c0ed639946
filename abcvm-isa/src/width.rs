//! Field-width type resolver.
//!
//! `Bits<W>` names a field of `W` bits. Its [`FieldWidth`] impl selects the
//! narrowest 8/16/32/64-bit integer with at least `W` bits, in both
//! signednesses. Widths outside `1..=64` have no impl, so asking for one is
//! a compile error rather than a runtime condition.

use std::fmt;

/// An integer type that can hold a decoded instruction field.
pub trait Field: Copy + Default + PartialEq + Eq + PartialOrd + Ord + fmt::Debug + fmt::Display {
    /// Storage size in bits.
    const BITS: u32;
    /// Whether reads into this type sign-extend.
    const SIGNED: bool;

    /// Truncating conversion from the low `BITS` bits of `raw`.
    fn from_bits(raw: u64) -> Self;

    /// Value widened to `i64` (sign- or zero-extended per `SIGNED`).
    fn to_i64(self) -> i64;

    /// Two's-complement bit pattern widened to `u64`.
    fn to_u64(self) -> u64;
}

macro_rules! impl_field {
    ($($t:ty => $signed:expr),* $(,)?) => {
        $(
            impl Field for $t {
                const BITS: u32 = <$t>::BITS;
                const SIGNED: bool = $signed;

                #[inline]
                fn from_bits(raw: u64) -> Self {
                    raw as $t
                }

                #[inline]
                fn to_i64(self) -> i64 {
                    self as i64
                }

                #[inline]
                fn to_u64(self) -> u64 {
                    self as u64
                }
            }
        )*
    };
}

impl_field!(
    u8 => false,
    u16 => false,
    u32 => false,
    u64 => false,
    i8 => true,
    i16 => true,
    i32 => true,
    i64 => true,
);

/// Type-level bit width.
#[derive(Clone, Copy, Debug, Default)]
pub struct Bits<const W: u32>;

/// Storage types for a field of a given width.
pub trait FieldWidth {
    /// Narrowest unsigned integer with at least `W` bits.
    type Unsigned: Field;
    /// Narrowest signed integer with at least `W` bits.
    type Signed: Field;
}

macro_rules! impl_widths {
    ($u:ty, $s:ty: $($w:literal)*) => {
        $(
            impl FieldWidth for Bits<$w> {
                type Unsigned = $u;
                type Signed = $s;
            }
        )*
    };
}

impl_widths!(u8, i8: 1 2 3 4 5 6 7 8);
impl_widths!(u16, i16: 9 10 11 12 13 14 15 16);
impl_widths!(u32, i32: 17 18 19 20 21 22 23 24 25 26 27 28 29 30 31 32);
impl_widths!(u64, i64:
    33 34 35 36 37 38 39 40 41 42 43 44 45 46 47 48
    49 50 51 52 53 54 55 56 57 58 59 60 61 62 63 64);

#[cfg(test)]
mod tests {
    use super::*;

    fn bits_of<T: Field>() -> (u32, bool) {
        (T::BITS, T::SIGNED)
    }

    #[test]
    fn picks_narrowest_type() {
        assert_eq!(bits_of::<<Bits<1> as FieldWidth>::Unsigned>(), (8, false));
        assert_eq!(bits_of::<<Bits<4> as FieldWidth>::Signed>(), (8, true));
        assert_eq!(bits_of::<<Bits<8> as FieldWidth>::Unsigned>(), (8, false));
        assert_eq!(bits_of::<<Bits<9> as FieldWidth>::Unsigned>(), (16, false));
        assert_eq!(bits_of::<<Bits<16> as FieldWidth>::Signed>(), (16, true));
        assert_eq!(bits_of::<<Bits<17> as FieldWidth>::Unsigned>(), (32, false));
        assert_eq!(bits_of::<<Bits<32> as FieldWidth>::Signed>(), (32, true));
        assert_eq!(bits_of::<<Bits<33> as FieldWidth>::Unsigned>(), (64, false));
        assert_eq!(bits_of::<<Bits<64> as FieldWidth>::Signed>(), (64, true));
    }

    #[test]
    fn widening_follows_signedness() {
        assert_eq!(i8::from_bits(0x8e).to_i64(), -114);
        assert_eq!(u8::from_bits(0x8e).to_i64(), 142);
        assert_eq!(i8::from_bits(0x8e).to_u64(), 0xffff_ffff_ffff_ff8e);
        assert_eq!(u16::from_bits(0x1_2345).to_u64(), 0x2345);
    }
}
