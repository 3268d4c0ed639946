//! Unaligned little-endian bit-field access.
//!
//! Every reader assembles the minimal byte span covering the field in
//! little-endian order, shifts it down by the field's bit offset within
//! the first byte, masks it to the field width and, for signed results,
//! sign-extends with an explicit arithmetic shift.
//!
//! Offsets are relative to the start of `bytes`. The caller guarantees the
//! span is in bounds; an out-of-bounds span panics on slice indexing.

use crate::width::{Bits, Field, FieldWidth};

/// Number of bytes touched by a `width`-bit field starting at `bit_offset`.
#[inline]
pub const fn span_len(bit_offset: usize, width: u32) -> usize {
    (bit_offset % 8 + width as usize).div_ceil(8)
}

#[inline]
const fn mask(width: u32) -> u64 {
    if width >= 64 { u64::MAX } else { (1u64 << width) - 1 }
}

/// Sign-extend the low `width` bits of `value`.
#[inline]
pub const fn sign_extend(value: u64, width: u32) -> i64 {
    let shift = 64 - width;
    ((value << shift) as i64) >> shift
}

/// Read a `width`-bit field (1..=64) at `bit_offset`, zero-extended.
#[inline]
pub fn read_bits(bytes: &[u8], bit_offset: usize, width: u32) -> u64 {
    debug_assert!((1..=64).contains(&width), "field width {width} out of range");
    let first = bit_offset / 8;
    let shift = (bit_offset % 8) as u32;
    let len = span_len(bit_offset, width);
    let span = &bytes[first..first + len];

    let value = if len <= 8 {
        let mut buf = [0u8; 8];
        buf[..len].copy_from_slice(span);
        u64::from_le_bytes(buf) >> shift
    } else {
        // A 64-bit field that does not start on a byte boundary spans 9 bytes.
        let mut buf = [0u8; 16];
        buf[..len].copy_from_slice(span);
        (u128::from_le_bytes(buf) >> shift) as u64
    };
    value & mask(width)
}

/// Read a field into `R`, sign-extending when `R` is signed.
#[inline]
pub fn read_field<R: Field>(bytes: &[u8], bit_offset: usize, width: u32) -> R {
    let raw = read_bits(bytes, bit_offset, width);
    if R::SIGNED {
        R::from_bits(sign_extend(raw, width) as u64)
    } else {
        R::from_bits(raw)
    }
}

/// Read a field whose position is known at compile time.
#[inline]
pub fn read_fixed<R: Field, const BIT_OFFSET: usize, const WIDTH: u32>(bytes: &[u8]) -> R {
    read_field::<R>(bytes, BIT_OFFSET, WIDTH)
}

/// Read a compile-time positioned field as the narrowest unsigned type.
#[inline]
pub fn read_unsigned<const BIT_OFFSET: usize, const WIDTH: u32>(
    bytes: &[u8],
) -> <Bits<WIDTH> as FieldWidth>::Unsigned
where
    Bits<WIDTH>: FieldWidth,
{
    read_fixed::<<Bits<WIDTH> as FieldWidth>::Unsigned, BIT_OFFSET, WIDTH>(bytes)
}

/// Read a compile-time positioned field as the narrowest signed type.
#[inline]
pub fn read_signed<const BIT_OFFSET: usize, const WIDTH: u32>(
    bytes: &[u8],
) -> <Bits<WIDTH> as FieldWidth>::Signed
where
    Bits<WIDTH>: FieldWidth,
{
    read_fixed::<<Bits<WIDTH> as FieldWidth>::Signed, BIT_OFFSET, WIDTH>(bytes)
}

/// Store the low `width` bits of `value` at `bit_offset`, leaving the
/// surrounding bits untouched.
pub fn write_bits(bytes: &mut [u8], bit_offset: usize, width: u32, value: u64) {
    debug_assert!((1..=64).contains(&width), "field width {width} out of range");
    let first = bit_offset / 8;
    let shift = (bit_offset % 8) as u32;
    let len = span_len(bit_offset, width);
    let span = &mut bytes[first..first + len];

    let mut buf = [0u8; 16];
    buf[..len].copy_from_slice(span);
    let current = u128::from_le_bytes(buf);
    let field_mask = (mask(width) as u128) << shift;
    let updated = (current & !field_mask) | (((value & mask(width)) as u128) << shift);
    span.copy_from_slice(&updated.to_le_bytes()[..len]);
}
