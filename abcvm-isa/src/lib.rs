//! ArkCompiler bytecode instruction decoding.
//!
//! Instruction sets are described in `isa/*.yaml` and turned into opcode
//! enums, per-opcode metadata and per-format layout tables at build time.
//! On top of those tables this crate provides:
//!
//! - [`width`]: compile-time mapping from a bit width to the narrowest
//!   integer type that holds it;
//! - [`bits`]: little-endian, unaligned, sign-aware bit-field reads (and
//!   the matching writes used by the encoder);
//! - [`format`]: format layouts and the argument-passing classification of
//!   call formats;
//! - [`cursor`]: the [`FastCursor`] used on verified code and the
//!   bounds-checked [`SafeCursor`] used by tooling;
//! - [`decode`] / [`encode`] / [`patch_id`]: whole-buffer validation,
//!   assembly and in-place id rewriting.

pub mod bits;
pub mod cursor;
mod decoder;
mod emitter;
pub mod format;
mod id;
pub mod opcode;
pub mod width;

// The bitflags crate is used by generated code
pub use bitflags;

pub use cursor::{BytecodeCursor, FastCursor, SafeCursor};
pub use decoder::{DecodeError, decode};
pub use emitter::{EncodeError, Insn, Operand, encode, patch_id};
pub use format::{FormatLayout, OperandKind, OperandLayout};
pub use id::BytecodeId;
pub use opcode::{Exceptions, IdKind, ImmKind, Opcode, OpcodeFlags, OpcodeInfo, RangeInfo};

include!(concat!(env!("OUT_DIR"), "/generated.rs"));
