//! Call-frame construction and argument marshalling.
//!
//! A callee frame holds the callee's locals followed by its arguments.
//! How many argument slots are reserved and where each operand lands
//! depends on the call format:
//!
//! | shape | slots |
//! |-------|-------|
//! | short (two operands) | 2, plus 1 for `initobj` |
//! | full (four operands) | 4, plus 1 for `initobj` |
//! | range | declared argument count |
//! | counted range | max(declared, actual) |
//!
//! For `initobj` the new object goes first and the operands follow it.
//! Accumulator forms insert the accumulator among the register operands at
//! the position named by their immediate.

use std::sync::Arc;

use abcvm_isa::format::{ArgsShape, FormatSpec, IdSlot};
use abcvm_isa::{BytecodeCursor, Format, formats};

use crate::frame::{Frame, FrameFlags};
use crate::interpreter::{Context, ControlTransfer, Inst};
use crate::method::Method;
use crate::runtime::{ExceptionKind, RuntimeInterface};
use crate::value::VRegister;

/// Register count of a callee frame: `num_vregs` locals plus the argument
/// slots the call format reserves.
pub fn frame_size(format: Format, num_vregs: u32, declared: u32, actual: u32, initobj: bool) -> usize {
    let extra = initobj as u32;
    let args = match format.args_shape() {
        Some(ArgsShape::Short) => 2 + extra,
        Some(ArgsShape::Full) => 4 + extra,
        Some(ArgsShape::Range) if format.has_imm(0) => declared.max(actual),
        _ => declared,
    };
    (num_vregs + args) as usize
}

/// Operand access of a call format.
pub(crate) trait CallFormat: FormatSpec + IdSlot<0> {
    /// First argument in declaration order, the receiver of an instance
    /// call.
    fn first_arg(inst: Inst<'_>, caller: &Frame, acc: VRegister) -> VRegister;

    /// Argument count carried by the instruction, if any.
    fn actual_args(_inst: Inst<'_>) -> Option<u32> {
        None
    }

    /// Copy the operands into `callee` starting at register `base`. Range
    /// formats copy `count` registers; fixed formats copy all operands.
    fn copy_args(inst: Inst<'_>, caller: &Frame, acc: VRegister, callee: &mut Frame, base: usize, count: usize);
}

/// Write `regs` to `callee[base..]` with `acc` inserted at position `pos`.
fn place_with_acc(callee: &mut Frame, base: usize, regs: &[VRegister], acc: VRegister, pos: usize) {
    let mut regs = regs.iter().copied();
    for slot in 0..=regs.len() {
        let value = if slot == pos {
            acc
        } else {
            regs.next().unwrap_or_default()
        };
        callee.set_vreg(base + slot, value);
    }
}

impl CallFormat for formats::V4V4Id16 {
    fn first_arg(inst: Inst<'_>, caller: &Frame, _acc: VRegister) -> VRegister {
        caller.vreg(inst.vreg::<Self, 0>() as usize)
    }

    fn copy_args(inst: Inst<'_>, caller: &Frame, _acc: VRegister, callee: &mut Frame, base: usize, _count: usize) {
        callee.set_vreg(base, caller.vreg(inst.vreg::<Self, 0>() as usize));
        callee.set_vreg(base + 1, caller.vreg(inst.vreg::<Self, 1>() as usize));
    }
}

impl CallFormat for formats::V4Imm4Id16 {
    fn first_arg(inst: Inst<'_>, caller: &Frame, acc: VRegister) -> VRegister {
        if inst.imm::<Self, 0>() == 0 {
            acc
        } else {
            caller.vreg(inst.vreg::<Self, 0>() as usize)
        }
    }

    fn copy_args(inst: Inst<'_>, caller: &Frame, acc: VRegister, callee: &mut Frame, base: usize, _count: usize) {
        let regs = [caller.vreg(inst.vreg::<Self, 0>() as usize)];
        place_with_acc(callee, base, &regs, acc, inst.imm::<Self, 0>() as usize);
    }
}

impl CallFormat for formats::V4V4V4V4Id16 {
    fn first_arg(inst: Inst<'_>, caller: &Frame, _acc: VRegister) -> VRegister {
        caller.vreg(inst.vreg::<Self, 0>() as usize)
    }

    fn copy_args(inst: Inst<'_>, caller: &Frame, _acc: VRegister, callee: &mut Frame, base: usize, _count: usize) {
        let regs = [
            inst.vreg::<Self, 0>(),
            inst.vreg::<Self, 1>(),
            inst.vreg::<Self, 2>(),
            inst.vreg::<Self, 3>(),
        ];
        for (i, reg) in regs.into_iter().enumerate() {
            callee.set_vreg(base + i, caller.vreg(reg as usize));
        }
    }
}

impl CallFormat for formats::V4V4V4Imm4Id16 {
    fn first_arg(inst: Inst<'_>, caller: &Frame, acc: VRegister) -> VRegister {
        if inst.imm::<Self, 0>() == 0 {
            acc
        } else {
            caller.vreg(inst.vreg::<Self, 0>() as usize)
        }
    }

    fn copy_args(inst: Inst<'_>, caller: &Frame, acc: VRegister, callee: &mut Frame, base: usize, _count: usize) {
        let regs = [
            caller.vreg(inst.vreg::<Self, 0>() as usize),
            caller.vreg(inst.vreg::<Self, 1>() as usize),
            caller.vreg(inst.vreg::<Self, 2>() as usize),
        ];
        place_with_acc(callee, base, &regs, acc, inst.imm::<Self, 0>() as usize);
    }
}

fn copy_range(start: usize, caller: &Frame, callee: &mut Frame, base: usize, count: usize) {
    for i in 0..count {
        callee.set_vreg(base + i, caller.vreg(start + i));
    }
}

impl CallFormat for formats::V8Id16 {
    fn first_arg(inst: Inst<'_>, caller: &Frame, _acc: VRegister) -> VRegister {
        caller.vreg(inst.vreg::<Self, 0>() as usize)
    }

    fn copy_args(inst: Inst<'_>, caller: &Frame, _acc: VRegister, callee: &mut Frame, base: usize, count: usize) {
        copy_range(inst.vreg::<Self, 0>() as usize, caller, callee, base, count);
    }
}

impl CallFormat for formats::V8Imm8Id16 {
    fn first_arg(inst: Inst<'_>, caller: &Frame, _acc: VRegister) -> VRegister {
        caller.vreg(inst.vreg::<Self, 0>() as usize)
    }

    fn actual_args(inst: Inst<'_>) -> Option<u32> {
        Some(inst.imm::<Self, 0>() as u32)
    }

    fn copy_args(inst: Inst<'_>, caller: &Frame, _acc: VRegister, callee: &mut Frame, base: usize, count: usize) {
        copy_range(inst.vreg::<Self, 0>() as usize, caller, callee, base, count);
    }
}

/// `call.*` and `call.virt.*`.
pub(crate) fn call<F: CallFormat, R: RuntimeInterface, const VIRTUAL: bool>(
    inst: Inst<'_>,
    cx: &mut Context<'_, R>,
) -> ControlTransfer {
    let Some(method) = cx.resolve_method(inst.offset(), inst.id::<F, 0>()) else {
        return ControlTransfer::RaiseException;
    };
    let receiver = F::first_arg(inst, &cx.frame, cx.acc);

    let callee = if VIRTUAL {
        let Some(obj) = receiver.reference() else {
            return cx.throw(ExceptionKind::NullPointer);
        };
        match cx.runtime.resolve_virtual(obj, &method) {
            Some(target) => target,
            None => return cx.throw(ExceptionKind::AbstractMethod),
        }
    } else {
        if !method.is_static() && method.num_args() > 0 && receiver.reference().is_none() {
            return cx.throw(ExceptionKind::NullPointer);
        }
        method
    };
    enter_callee::<F, R>(inst, cx, callee, false)
}

/// `initobj*`: allocate an instance of the constructor's class and call the
/// constructor with it prepended to the operands. The object ends up in the
/// accumulator whatever the constructor returns.
pub(crate) fn initobj<F: CallFormat, R: RuntimeInterface>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer {
    let Some(ctor) = cx.resolve_method(inst.offset(), inst.id::<F, 0>()) else {
        return ControlTransfer::RaiseException;
    };
    let Some(obj) = cx.runtime.create_object(cx.thread, ctor.class()) else {
        return ControlTransfer::RaiseException;
    };
    cx.acc = VRegister::from_ref(Some(obj));
    cx.frame.set_acc(cx.acc);
    enter_callee::<F, R>(inst, cx, ctor, true)
}

/// Call prologue shared by every call form: serve thread requests, build
/// the callee frame and either hand it to the loop or bridge to native code.
fn enter_callee<F: CallFormat, R: RuntimeInterface>(
    inst: Inst<'_>,
    cx: &mut Context<'_, R>,
    callee: Arc<Method>,
    initobj: bool,
) -> ControlTransfer {
    if cx.poll_safepoint() {
        return ControlTransfer::Terminate;
    }

    let native = callee.native().cloned();
    if native.is_none() && callee.code().is_none() {
        return cx.throw(ExceptionKind::AbstractMethod);
    }
    if native.is_none() {
        callee.bump_hotness();
    }

    let declared = callee.num_args();
    let counted = F::actual_args(inst);
    let actual = counted.unwrap_or(declared);
    let num_vregs = callee.num_vregs() as usize;
    let nregs = frame_size(F::FORMAT, num_vregs as u32, declared, actual, initobj);
    if native.is_none() && !cx.has_room_for(nregs) {
        return cx.throw(ExceptionKind::StackOverflow);
    }

    let flags = if initobj {
        FrameFlags::INITOBJ
    } else {
        FrameFlags::empty()
    };
    let mut frame = Frame::new(callee, nregs, actual, flags);
    frame.set_acc(cx.acc);

    if declared > 0 || counted.is_some() {
        let shift = initobj as usize;
        if initobj {
            frame.set_vreg(num_vregs, cx.acc);
        }
        let count = match counted {
            Some(n) => n as usize,
            None => (declared as usize).saturating_sub(shift),
        };
        F::copy_args(inst, &cx.frame, cx.acc, &mut frame, num_vregs + shift, count);
    }

    let Some(native) = native else {
        return ControlTransfer::Call(frame);
    };

    let argc = (declared.max(actual) as usize).min(frame.size());
    log::debug!("Native entry: {}", frame.method().name());
    cx.frame.set_acc(cx.acc);
    let result = native(&mut *cx.thread, &frame.vregs()[..argc]);
    if cx.thread.has_pending_exception() {
        return ControlTransfer::RaiseException;
    }
    cx.acc = if initobj { cx.frame.acc() } else { result };
    ControlTransfer::Continue(inst.next_with::<F>().offset())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_sizes_per_shape() {
        assert_eq!(frame_size(Format::V4V4Id16, 3, 1, 1, false), 5);
        assert_eq!(frame_size(Format::V4V4Id16, 3, 1, 1, true), 6);
        assert_eq!(frame_size(Format::V4Imm4Id16, 0, 2, 2, false), 2);
        assert_eq!(frame_size(Format::V4V4V4V4Id16, 2, 3, 3, false), 6);
        assert_eq!(frame_size(Format::V4V4V4Imm4Id16, 2, 3, 3, true), 7);
        assert_eq!(frame_size(Format::V8Id16, 4, 7, 7, false), 11);
        assert_eq!(frame_size(Format::V8Imm8Id16, 1, 2, 5, false), 6);
        assert_eq!(frame_size(Format::V8Imm8Id16, 1, 5, 2, false), 6);
    }

    #[test]
    fn acc_is_inserted_at_its_position() {
        let method = Arc::new(Method::new(1, "m", crate::value::ClassRef(1), 0));
        let regs = [VRegister::from_i32(10), VRegister::from_i32(11), VRegister::from_i32(12)];
        let acc = VRegister::from_i32(99);

        for (pos, expected) in [
            (0, [99, 10, 11, 12]),
            (1, [10, 99, 11, 12]),
            (3, [10, 11, 12, 99]),
        ] {
            let mut frame = Frame::new(Arc::clone(&method), 4, 4, FrameFlags::empty());
            place_with_acc(&mut frame, 0, &regs, acc, pos);
            let got: Vec<i32> = frame.vregs().iter().map(|v| v.i32()).collect();
            assert_eq!(got, expected, "acc at position {pos}");
        }
    }
}
