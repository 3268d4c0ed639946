use std::sync::Arc;

use bitflags::bitflags;

use crate::method::Method;
use crate::value::VRegister;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct FrameFlags: u8 {
        /// Constructor frame created by `initobj`; on return the caller's
        /// saved accumulator (the new object) wins over the callee's.
        const INITOBJ = 1 << 0;
    }
}

/// Activation record of one method.
///
/// Registers `0..num_vregs` are locals, arguments start at `num_vregs`.
#[derive(Debug, Clone)]
pub struct Frame {
    method: Arc<Method>,
    vregs: Vec<VRegister>,
    acc: VRegister,
    bytecode_offset: u32,
    next_offset: u32,
    flags: FrameFlags,
    num_actual_args: u32,
}

impl Frame {
    /// Frame with `nregs` zeroed registers.
    pub fn new(method: Arc<Method>, nregs: usize, num_actual_args: u32, flags: FrameFlags) -> Self {
        Self {
            method,
            vregs: vec![VRegister::default(); nregs],
            acc: VRegister::default(),
            bytecode_offset: 0,
            next_offset: 0,
            flags,
            num_actual_args,
        }
    }

    #[inline]
    pub fn method(&self) -> &Arc<Method> {
        &self.method
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.vregs.len()
    }

    /// Register `idx`. Out-of-range indices read as zero; verified code
    /// never produces them.
    #[inline]
    pub fn vreg(&self, idx: usize) -> VRegister {
        self.vregs.get(idx).copied().unwrap_or_default()
    }

    #[inline]
    pub fn set_vreg(&mut self, idx: usize, value: VRegister) {
        if let Some(slot) = self.vregs.get_mut(idx) {
            *slot = value;
        } else {
            log::warn!(
                "{}: write to v{idx} outside a {}-register frame",
                self.method.name(),
                self.vregs.len()
            );
        }
    }

    pub fn vregs(&self) -> &[VRegister] {
        &self.vregs
    }

    /// Argument `idx`, i.e. register `num_vregs + idx`.
    pub fn arg(&self, idx: usize) -> VRegister {
        self.vreg(self.method.num_vregs() as usize + idx)
    }

    /// Accumulator saved across a call-out.
    #[inline]
    pub fn acc(&self) -> VRegister {
        self.acc
    }

    #[inline]
    pub fn set_acc(&mut self, acc: VRegister) {
        self.acc = acc;
    }

    /// Offset of the instruction being executed, or of the pending call.
    #[inline]
    pub fn bytecode_offset(&self) -> u32 {
        self.bytecode_offset
    }

    #[inline]
    pub fn set_bytecode_offset(&mut self, offset: u32) {
        self.bytecode_offset = offset;
    }

    /// Offset to resume at when the pending call returns.
    #[inline]
    pub fn next_offset(&self) -> u32 {
        self.next_offset
    }

    #[inline]
    pub fn set_next_offset(&mut self, offset: u32) {
        self.next_offset = offset;
    }

    #[inline]
    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    #[inline]
    pub fn is_initobj(&self) -> bool {
        self.flags.contains(FrameFlags::INITOBJ)
    }

    #[inline]
    pub fn num_actual_args(&self) -> u32 {
        self.num_actual_args
    }
}
