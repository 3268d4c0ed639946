//! Opcode handlers of the static instruction set.
//!
//! Handlers are generic over the format marker of their instruction, so
//! operand reads compile down to fixed bit offsets. One generic handler
//! usually serves every width variant of an opcode.

use std::cmp::Ordering;

use abcvm_isa::format::{FormatSpec, IdSlot, ImmSlot, VRegSlot};
use abcvm_isa::width::Field as _;
use abcvm_isa::{BytecodeCursor, PandaOpcode, formats};

use crate::call::{call, initobj};
use crate::interpreter::{Context, ControlTransfer, Handler, Inst};
use crate::runtime::{ExceptionKind, RuntimeInterface};
use crate::value::{ObjectRef, VRegister};

#[inline]
fn next<F: FormatSpec>(inst: Inst<'_>) -> ControlTransfer {
    ControlTransfer::Continue(inst.offset() + F::SIZE)
}

pub(crate) fn illegal<R: RuntimeInterface>(_inst: Inst<'_>, _cx: &mut Context<'_, R>) -> ControlTransfer {
    ControlTransfer::Illegal
}

fn nop<R: RuntimeInterface>(inst: Inst<'_>, _cx: &mut Context<'_, R>) -> ControlTransfer {
    next::<formats::Bare>(inst)
}

// --- moves and loads ---

fn mov<F, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0> + VRegSlot<1>,
    R: RuntimeInterface,
{
    let value = cx.vreg(inst.vreg::<F, 1>());
    cx.set_vreg(inst.vreg::<F, 0>(), value);
    next::<F>(inst)
}

fn movi<F, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0> + ImmSlot<0>,
    R: RuntimeInterface,
{
    let imm = inst.imm_signed::<F, 0>().to_i64();
    cx.set_vreg(inst.vreg::<F, 0>(), VRegister::from_i32(imm as i32));
    next::<F>(inst)
}

fn movi64<F, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0> + ImmSlot<0>,
    R: RuntimeInterface,
{
    let imm = inst.imm_signed::<F, 0>().to_i64();
    cx.set_vreg(inst.vreg::<F, 0>(), VRegister::from_i64(imm));
    next::<F>(inst)
}

/// `fmovi` / `fmovi.64`: the immediate is the IEEE bit pattern.
fn fmovi<F, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0> + ImmSlot<0>,
    R: RuntimeInterface,
{
    let bits = inst.imm::<F, 0>().to_u64();
    cx.set_vreg(inst.vreg::<F, 0>(), VRegister::from_bits(bits));
    next::<F>(inst)
}

fn mov_null<F: VRegSlot<0>, R: RuntimeInterface>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer {
    cx.set_vreg(inst.vreg::<F, 0>(), VRegister::null());
    next::<F>(inst)
}

fn lda<F: VRegSlot<0>, R: RuntimeInterface>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer {
    cx.acc = cx.vreg(inst.vreg::<F, 0>());
    next::<F>(inst)
}

fn ldai<F: ImmSlot<0>, R: RuntimeInterface>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer {
    cx.acc = VRegister::from_i32(inst.imm_signed::<F, 0>().to_i64() as i32);
    next::<F>(inst)
}

fn ldai64<F: ImmSlot<0>, R: RuntimeInterface>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer {
    cx.acc = VRegister::from_i64(inst.imm_signed::<F, 0>().to_i64());
    next::<F>(inst)
}

fn fldai<F: ImmSlot<0>, R: RuntimeInterface>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer {
    cx.acc = VRegister::from_bits(inst.imm::<F, 0>().to_u64());
    next::<F>(inst)
}

fn lda_str<F: IdSlot<0>, R: RuntimeInterface>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer {
    let id = inst.id::<F, 0>();
    let caller = std::sync::Arc::clone(cx.method());
    match cx.runtime.resolve_string(&caller, id) {
        Some(s) => {
            cx.acc = VRegister::from_ref(Some(s));
            next::<F>(inst)
        }
        None => cx.throw(ExceptionKind::Unresolved(id)),
    }
}

fn lda_type<F: IdSlot<0>, R: RuntimeInterface>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer {
    let Some(class) = cx.resolve_class(inst.offset(), inst.id::<F, 0>()) else {
        return ControlTransfer::RaiseException;
    };
    cx.acc = VRegister::from_ref(Some(cx.runtime.class_object(class)));
    next::<F>(inst)
}

fn lda_null<R: RuntimeInterface>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer {
    cx.acc = VRegister::null();
    next::<formats::Bare>(inst)
}

fn sta<F: VRegSlot<0>, R: RuntimeInterface>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer {
    cx.set_vreg(inst.vreg::<F, 0>(), cx.acc);
    next::<F>(inst)
}

// --- comparisons ---

fn ordering_value(ord: Ordering) -> i32 {
    match ord {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// Integer three-way compare of `acc` with `v`. `SIGNED` selects the
/// interpretation, `WIDE` the 64-bit form.
fn cmp<F, R, const SIGNED: bool, const WIDE: bool>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0>,
    R: RuntimeInterface,
{
    let (a, b) = (cx.acc, cx.vreg(inst.vreg::<F, 0>()));
    let ord = match (SIGNED, WIDE) {
        (true, true) => a.i64().cmp(&b.i64()),
        (true, false) => a.i32().cmp(&b.i32()),
        (false, true) => a.u64().cmp(&b.u64()),
        (false, false) => a.u32().cmp(&b.u32()),
    };
    cx.acc = VRegister::from_i32(ordering_value(ord));
    next::<F>(inst)
}

/// Float compare; an unordered pair yields `NAN`.
fn fcmp<F, R, const WIDE: bool, const NAN: i32>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0>,
    R: RuntimeInterface,
{
    let (a, b) = (cx.acc, cx.vreg(inst.vreg::<F, 0>()));
    let ord = if WIDE {
        a.f64().partial_cmp(&b.f64())
    } else {
        a.f32().partial_cmp(&b.f32())
    };
    cx.acc = VRegister::from_i32(ord.map_or(NAN, ordering_value));
    next::<F>(inst)
}

// --- jumps ---

const EQ: u8 = 0;
const NE: u8 = 1;
const LT: u8 = 2;
const GT: u8 = 3;
const LE: u8 = 4;
const GE: u8 = 5;

#[inline]
fn holds(cond: u8, a: i32, b: i32) -> bool {
    match cond {
        EQ => a == b,
        NE => a != b,
        LT => a < b,
        GT => a > b,
        LE => a <= b,
        _ => a >= b,
    }
}

/// Resolve a conditional branch. Backward taken branches are safepoints.
fn branch<F, R>(inst: Inst<'_>, cx: &mut Context<'_, R>, taken: bool) -> ControlTransfer
where
    F: ImmSlot<0>,
    R: RuntimeInterface,
{
    cx.profile_branch(inst.offset(), taken);
    if taken {
        jump_by(inst, cx, inst.imm_signed::<F, 0>().to_i64() as i32)
    } else {
        next::<F>(inst)
    }
}

#[inline]
fn jump_by<R: RuntimeInterface>(inst: Inst<'_>, cx: &mut Context<'_, R>, delta: i32) -> ControlTransfer {
    if delta <= 0 && cx.poll_safepoint() {
        return ControlTransfer::Terminate;
    }
    ControlTransfer::Jump(inst.target(delta))
}

fn jmp<F: ImmSlot<0>, R: RuntimeInterface>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer {
    jump_by(inst, cx, inst.imm_signed::<F, 0>().to_i64() as i32)
}

/// `j<cond>z`: compare `acc` with zero.
fn jz<F, R, const COND: u8>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: ImmSlot<0>,
    R: RuntimeInterface,
{
    let taken = holds(COND, cx.acc.i32(), 0);
    branch::<F, R>(inst, cx, taken)
}

/// `j<cond> v`: compare `acc` with `v`.
fn jcmp<F, R, const COND: u8>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0> + ImmSlot<0>,
    R: RuntimeInterface,
{
    let taken = holds(COND, cx.acc.i32(), cx.vreg(inst.vreg::<F, 0>()).i32());
    branch::<F, R>(inst, cx, taken)
}

fn jz_obj<F, R, const COND: u8>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: ImmSlot<0>,
    R: RuntimeInterface,
{
    let is_null = cx.acc.reference().is_none();
    branch::<F, R>(inst, cx, is_null == (COND == EQ))
}

fn jcmp_obj<F, R, const COND: u8>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0> + ImmSlot<0>,
    R: RuntimeInterface,
{
    let same = cx.acc.reference() == cx.vreg(inst.vreg::<F, 0>()).reference();
    branch::<F, R>(inst, cx, same == (COND == EQ))
}

// --- integer arithmetic ---

/// A binary integer operation. `None` means division by zero.
trait IntOp {
    fn i32(a: i32, b: i32) -> Option<i32>;
    fn i64(a: i64, b: i64) -> Option<i64>;
}

macro_rules! int_ops {
    ($($op:ident => |$a:ident, $b:ident| $e:expr;)*) => {
        $(
            struct $op;

            impl IntOp for $op {
                #[inline]
                fn i32($a: i32, $b: i32) -> Option<i32> {
                    $e
                }

                #[inline]
                fn i64($a: i64, $b: i64) -> Option<i64> {
                    $e
                }
            }
        )*
    };
}

int_ops! {
    Add => |a, b| Some(a.wrapping_add(b));
    Sub => |a, b| Some(a.wrapping_sub(b));
    Mul => |a, b| Some(a.wrapping_mul(b));
    Div => |a, b| (b != 0).then(|| a.wrapping_div(b));
    Mod => |a, b| (b != 0).then(|| a.wrapping_rem(b));
    And => |a, b| Some(a & b);
    Or => |a, b| Some(a | b);
    Xor => |a, b| Some(a ^ b);
    Shl => |a, b| Some(a.wrapping_shl(b as u32));
    Ashr => |a, b| Some(a.wrapping_shr(b as u32));
}

struct Shr;

impl IntOp for Shr {
    fn i32(a: i32, b: i32) -> Option<i32> {
        Some((a as u32).wrapping_shr(b as u32) as i32)
    }

    fn i64(a: i64, b: i64) -> Option<i64> {
        Some((a as u64).wrapping_shr(b as u32) as i64)
    }
}

struct Divu;

impl IntOp for Divu {
    fn i32(a: i32, b: i32) -> Option<i32> {
        (a as u32).checked_div(b as u32).map(|q| q as i32)
    }

    fn i64(a: i64, b: i64) -> Option<i64> {
        (a as u64).checked_div(b as u64).map(|q| q as i64)
    }
}

struct Modu;

impl IntOp for Modu {
    fn i32(a: i32, b: i32) -> Option<i32> {
        (a as u32).checked_rem(b as u32).map(|r| r as i32)
    }

    fn i64(a: i64, b: i64) -> Option<i64> {
        (a as u64).checked_rem(b as u64).map(|r| r as i64)
    }
}

/// `op2 v`: `acc = acc op v`, 32-bit.
fn binop2<F, O, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0>,
    O: IntOp,
    R: RuntimeInterface,
{
    let rhs = cx.vreg(inst.vreg::<F, 0>()).i32();
    match O::i32(cx.acc.i32(), rhs) {
        Some(r) => {
            cx.acc = VRegister::from_i32(r);
            next::<F>(inst)
        }
        None => cx.throw(ExceptionKind::Arithmetic),
    }
}

/// `op2.64 v`: `acc = acc op v`, 64-bit.
fn binop2_64<F, O, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0>,
    O: IntOp,
    R: RuntimeInterface,
{
    let rhs = cx.vreg(inst.vreg::<F, 0>()).i64();
    match O::i64(cx.acc.i64(), rhs) {
        Some(r) => {
            cx.acc = VRegister::from_i64(r);
            next::<F>(inst)
        }
        None => cx.throw(ExceptionKind::Arithmetic),
    }
}

/// `op v1, v2`: `acc = v1 op v2`.
fn binop<F, O, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0> + VRegSlot<1>,
    O: IntOp,
    R: RuntimeInterface,
{
    let lhs = cx.vreg(inst.vreg::<F, 0>()).i32();
    let rhs = cx.vreg(inst.vreg::<F, 1>()).i32();
    match O::i32(lhs, rhs) {
        Some(r) => {
            cx.acc = VRegister::from_i32(r);
            next::<F>(inst)
        }
        None => cx.throw(ExceptionKind::Arithmetic),
    }
}

/// `opi imm`: `acc = acc op imm`.
fn binopi<F, O, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: ImmSlot<0>,
    O: IntOp,
    R: RuntimeInterface,
{
    let imm = inst.imm_signed::<F, 0>().to_i64() as i32;
    match O::i32(cx.acc.i32(), imm) {
        Some(r) => {
            cx.acc = VRegister::from_i32(r);
            next::<F>(inst)
        }
        None => cx.throw(ExceptionKind::Arithmetic),
    }
}

fn inc<F, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0> + ImmSlot<0>,
    R: RuntimeInterface,
{
    let reg = inst.vreg::<F, 0>();
    let imm = inst.imm_signed::<F, 0>().to_i64() as i32;
    let value = cx.vreg(reg).i32().wrapping_add(imm);
    cx.set_vreg(reg, VRegister::from_i32(value));
    next::<F>(inst)
}

// --- float arithmetic ---

trait FloatOp {
    fn f32(a: f32, b: f32) -> f32;
    fn f64(a: f64, b: f64) -> f64;
}

macro_rules! float_ops {
    ($($op:ident => $sym:tt;)*) => {
        $(
            struct $op;

            impl FloatOp for $op {
                #[inline]
                fn f32(a: f32, b: f32) -> f32 {
                    a $sym b
                }

                #[inline]
                fn f64(a: f64, b: f64) -> f64 {
                    a $sym b
                }
            }
        )*
    };
}

// `%` on floats truncates toward zero, like C's fmod.
float_ops! {
    Fadd => +;
    Fsub => -;
    Fmul => *;
    Fdiv => /;
    Fmod => %;
}

fn fbinop2<F, O, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0>,
    O: FloatOp,
    R: RuntimeInterface,
{
    let rhs = cx.vreg(inst.vreg::<F, 0>()).f32();
    cx.acc = VRegister::from_f32(O::f32(cx.acc.f32(), rhs));
    next::<F>(inst)
}

fn fbinop2_64<F, O, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0>,
    O: FloatOp,
    R: RuntimeInterface,
{
    let rhs = cx.vreg(inst.vreg::<F, 0>()).f64();
    cx.acc = VRegister::from_f64(O::f64(cx.acc.f64(), rhs));
    next::<F>(inst)
}

// --- unary operations and conversions ---

macro_rules! acc_unary {
    ($($name:ident($fmt:ident) => |$a:ident| $e:expr;)*) => {
        $(
            fn $name<R: RuntimeInterface>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer {
                let $a = cx.acc;
                cx.acc = $e;
                next::<formats::$fmt>(inst)
            }
        )*
    };
}

// Float to integer casts saturate and map NaN to zero.
acc_unary! {
    neg(Bare) => |a| VRegister::from_i32(a.i32().wrapping_neg());
    neg64(Bare) => |a| VRegister::from_i64(a.i64().wrapping_neg());
    not(Bare) => |a| VRegister::from_i32(!a.i32());
    not64(Bare) => |a| VRegister::from_i64(!a.i64());
    fneg(Bare) => |a| VRegister::from_f32(-a.f32());
    fneg64(Bare) => |a| VRegister::from_f64(-a.f64());

    i32toi64(Bare) => |a| VRegister::from_i64(a.i32() as i64);
    i32tof32(Bare) => |a| VRegister::from_f32(a.i32() as f32);
    i32tof64(Bare) => |a| VRegister::from_f64(a.i32() as f64);
    i64toi32(Bare) => |a| VRegister::from_i32(a.i64() as i32);
    i64tof32(Bare) => |a| VRegister::from_f32(a.i64() as f32);
    i64tof64(Bare) => |a| VRegister::from_f64(a.i64() as f64);
    f32tof64(Bare) => |a| VRegister::from_f64(a.f32() as f64);
    f32toi32(Bare) => |a| VRegister::from_i32(a.f32() as i32);
    f32toi64(Bare) => |a| VRegister::from_i64(a.f32() as i64);
    f64tof32(Bare) => |a| VRegister::from_f32(a.f64() as f32);
    f64toi32(Bare) => |a| VRegister::from_i32(a.f64() as i32);
    f64toi64(Bare) => |a| VRegister::from_i64(a.f64() as i64);
    i32toi8(Bare) => |a| VRegister::from_i32(a.i32() as i8 as i32);
    i32toi16(Bare) => |a| VRegister::from_i32(a.i32() as i16 as i32);
    i32tou1(Bare) => |a| VRegister::from_i32((a.i32() != 0) as i32);
    i32tou8(Bare) => |a| VRegister::from_i32(a.i32() as u8 as i32);
    i32tou16(Bare) => |a| VRegister::from_i32(a.i32() as u16 as i32);

    u32toi64(PrefBare) => |a| VRegister::from_i64(a.u32() as i64);
    u32tof64(PrefBare) => |a| VRegister::from_f64(a.u32() as f64);
    f64tou32(PrefBare) => |a| VRegister::from_u32(a.f64() as u32);
    f64tou64(PrefBare) => |a| VRegister::from_bits(a.f64() as u64);
    f32tou32(PrefBare) => |a| VRegister::from_u32(a.f32() as u32);
    u64tof64(PrefBare) => |a| VRegister::from_f64(a.u64() as f64);
}

// --- arrays and fields ---

/// Element (or field) storage kind: how a value is narrowed on its way in
/// and out of memory.
trait Element {
    const IS_REF: bool = false;

    fn narrow(value: VRegister) -> VRegister;
}

macro_rules! elements {
    ($($kind:ident => |$v:ident| $e:expr;)*) => {
        $(
            struct $kind;

            impl Element for $kind {
                #[inline]
                fn narrow($v: VRegister) -> VRegister {
                    $e
                }
            }
        )*
    };
}

elements! {
    I8 => |v| VRegister::from_i32(v.i32() as i8 as i32);
    U8 => |v| VRegister::from_i32(v.i32() as u8 as i32);
    I16 => |v| VRegister::from_i32(v.i32() as i16 as i32);
    U16 => |v| VRegister::from_i32(v.i32() as u16 as i32);
    I32 => |v| VRegister::from_i32(v.i32());
    I64 => |v| VRegister::from_i64(v.i64());
    F32 => |v| VRegister::from_f32(v.f32());
    F64 => |v| VRegister::from_f64(v.f64());
}

struct Obj;

impl Element for Obj {
    const IS_REF: bool = true;

    fn narrow(value: VRegister) -> VRegister {
        VRegister::from_ref(value.reference())
    }
}

/// Bounds-check `index` against `array`; on failure the exception is
/// raised and returned as `Err`.
fn check_index<R: RuntimeInterface>(
    cx: &mut Context<'_, R>,
    array: ObjectRef,
    index: i32,
) -> Result<u32, ControlTransfer> {
    let length = cx.runtime.array_length(array);
    if index < 0 || index as u32 >= length {
        return Err(cx.throw(ExceptionKind::ArrayIndexOutOfBounds {
            index: index as i64,
            length,
        }));
    }
    Ok(index as u32)
}

/// `newarr vd, vs, type`.
fn newarr<F, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0> + VRegSlot<1> + IdSlot<0>,
    R: RuntimeInterface,
{
    let Some(class) = cx.resolve_class(inst.offset(), inst.id::<F, 0>()) else {
        return ControlTransfer::RaiseException;
    };
    let size = cx.vreg(inst.vreg::<F, 1>()).i32();
    if size < 0 {
        return cx.throw(ExceptionKind::NegativeArraySize(size));
    }
    let Some(array) = cx.runtime.create_array(cx.thread, class, size as u32) else {
        return ControlTransfer::RaiseException;
    };
    cx.set_vreg(inst.vreg::<F, 0>(), VRegister::from_ref(Some(array)));
    next::<F>(inst)
}

fn lenarr<F: VRegSlot<0>, R: RuntimeInterface>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer {
    let Some(array) = cx.vreg(inst.vreg::<F, 0>()).reference() else {
        return cx.throw(ExceptionKind::NullPointer);
    };
    cx.acc = VRegister::from_i32(cx.runtime.array_length(array) as i32);
    next::<F>(inst)
}

/// `ldarr* v`: `acc = v[acc]`.
fn ldarr<F, E, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0>,
    E: Element,
    R: RuntimeInterface,
{
    let Some(array) = cx.vreg(inst.vreg::<F, 0>()).reference() else {
        return cx.throw(ExceptionKind::NullPointer);
    };
    let index = cx.acc.i32();
    let index = match check_index(cx, array, index) {
        Ok(index) => index,
        Err(raised) => return raised,
    };
    cx.acc = E::narrow(cx.runtime.array_get(array, index));
    next::<F>(inst)
}

/// `starr* va, vi`: `va[vi] = acc`. Reference stores check the value
/// against the component type first; a failed check leaves the array
/// untouched.
fn starr<F, E, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0> + VRegSlot<1>,
    E: Element,
    R: RuntimeInterface,
{
    let Some(array) = cx.vreg(inst.vreg::<F, 0>()).reference() else {
        return cx.throw(ExceptionKind::NullPointer);
    };
    let index = cx.vreg(inst.vreg::<F, 1>()).i32();
    let index = match check_index(cx, array, index) {
        Ok(index) => index,
        Err(raised) => return raised,
    };
    let value = E::narrow(cx.acc);
    if E::IS_REF
        && let Some(obj) = value.reference()
    {
        let array_class = cx.runtime.class_of(array);
        if let Some(component) = cx.runtime.component_type(array_class)
            && !cx.runtime.is_instance(obj, component)
        {
            let value_class = cx.runtime.class_of(obj);
            return cx.throw(ExceptionKind::ArrayStore {
                array: array_class,
                value: value_class,
            });
        }
    }
    cx.runtime.array_set(array, index, value);
    next::<F>(inst)
}

fn newobj<F, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0> + IdSlot<0>,
    R: RuntimeInterface,
{
    let Some(class) = cx.resolve_class(inst.offset(), inst.id::<F, 0>()) else {
        return ControlTransfer::RaiseException;
    };
    let Some(obj) = cx.runtime.create_object(cx.thread, class) else {
        return ControlTransfer::RaiseException;
    };
    cx.set_vreg(inst.vreg::<F, 0>(), VRegister::from_ref(Some(obj)));
    next::<F>(inst)
}

/// `ldobj* v, field`. The receiver is null-checked before the field is
/// resolved.
fn ldobj<F, E, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0> + IdSlot<0>,
    E: Element,
    R: RuntimeInterface,
{
    let Some(obj) = cx.vreg(inst.vreg::<F, 0>()).reference() else {
        return cx.throw(ExceptionKind::NullPointer);
    };
    let Some(field) = cx.resolve_field(inst.offset(), inst.id::<F, 0>()) else {
        return ControlTransfer::RaiseException;
    };
    cx.acc = E::narrow(cx.runtime.field_get(Some(obj), &field));
    next::<F>(inst)
}

fn stobj<F, E, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: VRegSlot<0> + IdSlot<0>,
    E: Element,
    R: RuntimeInterface,
{
    let Some(obj) = cx.vreg(inst.vreg::<F, 0>()).reference() else {
        return cx.throw(ExceptionKind::NullPointer);
    };
    let Some(field) = cx.resolve_field(inst.offset(), inst.id::<F, 0>()) else {
        return ControlTransfer::RaiseException;
    };
    cx.runtime.field_set(Some(obj), &field, E::narrow(cx.acc));
    next::<F>(inst)
}

fn ldstatic<F, E, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: IdSlot<0>,
    E: Element,
    R: RuntimeInterface,
{
    let Some(field) = cx.resolve_field(inst.offset(), inst.id::<F, 0>()) else {
        return ControlTransfer::RaiseException;
    };
    cx.acc = E::narrow(cx.runtime.field_get(None, &field));
    next::<F>(inst)
}

fn ststatic<F, E, R>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer
where
    F: IdSlot<0>,
    E: Element,
    R: RuntimeInterface,
{
    let Some(field) = cx.resolve_field(inst.offset(), inst.id::<F, 0>()) else {
        return ControlTransfer::RaiseException;
    };
    cx.runtime.field_set(None, &field, E::narrow(cx.acc));
    next::<F>(inst)
}

/// Null passes any cast.
fn checkcast<F: IdSlot<0>, R: RuntimeInterface>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer {
    let Some(target) = cx.resolve_class(inst.offset(), inst.id::<F, 0>()) else {
        return ControlTransfer::RaiseException;
    };
    if let Some(obj) = cx.acc.reference()
        && !cx.runtime.is_instance(obj, target)
    {
        let actual = cx.runtime.class_of(obj);
        return cx.throw(ExceptionKind::ClassCast { target, actual });
    }
    next::<F>(inst)
}

fn isinstance<F: IdSlot<0>, R: RuntimeInterface>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer {
    let Some(class) = cx.resolve_class(inst.offset(), inst.id::<F, 0>()) else {
        return ControlTransfer::RaiseException;
    };
    let is = cx
        .acc
        .reference()
        .is_some_and(|obj| cx.runtime.is_instance(obj, class));
    cx.acc = VRegister::from_i32(is as i32);
    next::<F>(inst)
}

// --- returns and throw ---

/// Every `return*` form leaves its result in the accumulator.
fn ret<R: RuntimeInterface>(_inst: Inst<'_>, _cx: &mut Context<'_, R>) -> ControlTransfer {
    ControlTransfer::Return
}

fn throw<F: VRegSlot<0>, R: RuntimeInterface>(inst: Inst<'_>, cx: &mut Context<'_, R>) -> ControlTransfer {
    let Some(exception) = cx.vreg(inst.vreg::<F, 0>()).reference() else {
        return cx.throw(ExceptionKind::NullPointer);
    };
    log::debug!("{}: throw at {:#x}", cx.method().name(), inst.offset());
    cx.thread.set_exception(exception);
    ControlTransfer::RaiseException
}

/// Built-in handler of `op`.
pub(crate) fn handler_for<R: RuntimeInterface>(op: PandaOpcode) -> Handler<R> {
    use PandaOpcode as P;
    use formats as f;

    match op {
        P::Nop => nop::<R>,

        P::MovV4V4 | P::Mov64V4V4 | P::MovObjV4V4 => mov::<f::V4V4, R>,
        P::MovV8V8 | P::MovObjV8V8 => mov::<f::V8V8, R>,
        P::MovV16V16 | P::Mov64V16V16 | P::MovObjV16V16 => mov::<f::V16V16, R>,
        P::MoviV4Imm4 => movi::<f::V4Imm4, R>,
        P::MoviV8Imm8 => movi::<f::V8Imm8, R>,
        P::MoviV8Imm16 => movi::<f::V8Imm16, R>,
        P::MoviV8Imm32 => movi::<f::V8Imm32, R>,
        P::Movi64V8Imm64 => movi64::<f::V8Imm64, R>,
        P::FmoviV8Imm32 => fmovi::<f::V8Imm32, R>,
        P::Fmovi64V8Imm64 => fmovi::<f::V8Imm64, R>,
        P::MovNullV8 => mov_null::<f::V8, R>,

        P::LdaV8 | P::Lda64V8 | P::LdaObjV8 => lda::<f::V8, R>,
        P::LdaiImm8 => ldai::<f::Imm8, R>,
        P::LdaiImm16 => ldai::<f::Imm16, R>,
        P::LdaiImm32 => ldai::<f::Imm32, R>,
        P::Ldai64Imm64 => ldai64::<f::Imm64, R>,
        P::FldaiImm32 => fldai::<f::Imm32, R>,
        P::Fldai64Imm64 => fldai::<f::Imm64, R>,
        P::LdaStrId16 => lda_str::<f::Id16, R>,
        P::LdaTypeId16 => lda_type::<f::Id16, R>,
        P::LdaNull => lda_null::<R>,
        P::StaV8 | P::Sta64V8 | P::StaObjV8 => sta::<f::V8, R>,

        P::Cmp64V8 => cmp::<f::V8, R, true, true>,
        P::UcmpV8 => cmp::<f::PrefV8, R, false, false>,
        P::Ucmp64V8 => cmp::<f::PrefV8, R, false, true>,
        P::FcmplV8 => fcmp::<f::V8, R, false, -1>,
        P::Fcmpl64V8 => fcmp::<f::V8, R, true, -1>,
        P::FcmpgV8 => fcmp::<f::V8, R, false, 1>,
        P::Fcmpg64V8 => fcmp::<f::V8, R, true, 1>,

        P::JmpImm8 => jmp::<f::Imm8, R>,
        P::JmpImm16 => jmp::<f::Imm16, R>,
        P::JmpImm32 => jmp::<f::Imm32, R>,
        P::JeqObjV8Imm8 => jcmp_obj::<f::V8Imm8, R, EQ>,
        P::JneObjV8Imm8 => jcmp_obj::<f::V8Imm8, R, NE>,
        P::JeqzObjImm8 => jz_obj::<f::Imm8, R, EQ>,
        P::JnezObjImm8 => jz_obj::<f::Imm8, R, NE>,
        P::JeqzImm8 => jz::<f::Imm8, R, EQ>,
        P::JeqzImm16 => jz::<f::Imm16, R, EQ>,
        P::JnezImm8 => jz::<f::Imm8, R, NE>,
        P::JnezImm16 => jz::<f::Imm16, R, NE>,
        P::JltzImm8 => jz::<f::Imm8, R, LT>,
        P::JgtzImm8 => jz::<f::Imm8, R, GT>,
        P::JlezImm8 => jz::<f::Imm8, R, LE>,
        P::JgezImm8 => jz::<f::Imm8, R, GE>,
        P::JeqV8Imm8 => jcmp::<f::V8Imm8, R, EQ>,
        P::JeqV8Imm16 => jcmp::<f::V8Imm16, R, EQ>,
        P::JneV8Imm8 => jcmp::<f::V8Imm8, R, NE>,
        P::JltV8Imm8 => jcmp::<f::V8Imm8, R, LT>,
        P::JgtV8Imm8 => jcmp::<f::V8Imm8, R, GT>,
        P::JleV8Imm8 => jcmp::<f::V8Imm8, R, LE>,
        P::JgeV8Imm8 => jcmp::<f::V8Imm8, R, GE>,

        P::Fneg => fneg::<R>,
        P::Fneg64 => fneg64::<R>,
        P::Neg => neg::<R>,
        P::Neg64 => neg64::<R>,
        P::Not => not::<R>,
        P::Not64 => not64::<R>,

        P::Add2V8 => binop2::<f::V8, Add, R>,
        P::Sub2V8 => binop2::<f::V8, Sub, R>,
        P::Mul2V8 => binop2::<f::V8, Mul, R>,
        P::Div2V8 => binop2::<f::V8, Div, R>,
        P::Mod2V8 => binop2::<f::V8, Mod, R>,
        P::And2V8 => binop2::<f::V8, And, R>,
        P::Or2V8 => binop2::<f::V8, Or, R>,
        P::Xor2V8 => binop2::<f::V8, Xor, R>,
        P::Shl2V8 => binop2::<f::V8, Shl, R>,
        P::Shr2V8 => binop2::<f::V8, Shr, R>,
        P::Ashr2V8 => binop2::<f::V8, Ashr, R>,
        P::Divu2V8 => binop2::<f::PrefV8, Divu, R>,
        P::Modu2V8 => binop2::<f::PrefV8, Modu, R>,

        P::Add2_64V8 => binop2_64::<f::V8, Add, R>,
        P::Sub2_64V8 => binop2_64::<f::V8, Sub, R>,
        P::Mul2_64V8 => binop2_64::<f::V8, Mul, R>,
        P::Div2_64V8 => binop2_64::<f::V8, Div, R>,
        P::Mod2_64V8 => binop2_64::<f::V8, Mod, R>,
        P::And2_64V8 => binop2_64::<f::V8, And, R>,
        P::Or2_64V8 => binop2_64::<f::V8, Or, R>,
        P::Xor2_64V8 => binop2_64::<f::V8, Xor, R>,
        P::Shl2_64V8 => binop2_64::<f::V8, Shl, R>,
        P::Shr2_64V8 => binop2_64::<f::V8, Shr, R>,
        P::Ashr2_64V8 => binop2_64::<f::V8, Ashr, R>,
        P::Divu2_64V8 => binop2_64::<f::PrefV8, Divu, R>,
        P::Modu2_64V8 => binop2_64::<f::PrefV8, Modu, R>,

        P::Fadd2V8 => fbinop2::<f::V8, Fadd, R>,
        P::Fsub2V8 => fbinop2::<f::V8, Fsub, R>,
        P::Fmul2V8 => fbinop2::<f::V8, Fmul, R>,
        P::Fdiv2V8 => fbinop2::<f::V8, Fdiv, R>,
        P::Fmod2V8 => fbinop2::<f::V8, Fmod, R>,
        P::Fadd2_64V8 => fbinop2_64::<f::V8, Fadd, R>,
        P::Fsub2_64V8 => fbinop2_64::<f::V8, Fsub, R>,
        P::Fmul2_64V8 => fbinop2_64::<f::V8, Fmul, R>,
        P::Fdiv2_64V8 => fbinop2_64::<f::V8, Fdiv, R>,
        P::Fmod2_64V8 => fbinop2_64::<f::V8, Fmod, R>,

        P::AddV4V4 => binop::<f::V4V4, Add, R>,
        P::SubV4V4 => binop::<f::V4V4, Sub, R>,
        P::MulV4V4 => binop::<f::V4V4, Mul, R>,
        P::DivV4V4 => binop::<f::V4V4, Div, R>,
        P::ModV4V4 => binop::<f::V4V4, Mod, R>,
        P::AddiImm8 => binopi::<f::Imm8, Add, R>,
        P::SubiImm8 => binopi::<f::Imm8, Sub, R>,
        P::MuliImm8 => binopi::<f::Imm8, Mul, R>,
        P::DiviImm8 => binopi::<f::Imm8, Div, R>,
        P::ModiImm8 => binopi::<f::Imm8, Mod, R>,
        P::AndiImm32 => binopi::<f::Imm32, And, R>,
        P::OriImm32 => binopi::<f::Imm32, Or, R>,
        P::IncV4Imm4 => inc::<f::V4Imm4, R>,

        P::I32toi64 => i32toi64::<R>,
        P::I32tof32 => i32tof32::<R>,
        P::I32tof64 => i32tof64::<R>,
        P::I64toi32 => i64toi32::<R>,
        P::I64tof32 => i64tof32::<R>,
        P::I64tof64 => i64tof64::<R>,
        P::F32tof64 => f32tof64::<R>,
        P::F32toi32 => f32toi32::<R>,
        P::F32toi64 => f32toi64::<R>,
        P::F64tof32 => f64tof32::<R>,
        P::F64toi32 => f64toi32::<R>,
        P::F64toi64 => f64toi64::<R>,
        P::I32toi8 => i32toi8::<R>,
        P::I32toi16 => i32toi16::<R>,
        P::I32tou1 => i32tou1::<R>,
        P::I32tou8 => i32tou8::<R>,
        P::I32tou16 => i32tou16::<R>,
        P::U32toi64 => u32toi64::<R>,
        P::U32tof64 => u32tof64::<R>,
        P::F64tou32 => f64tou32::<R>,
        P::F64tou64 => f64tou64::<R>,
        P::F32tou32 => f32tou32::<R>,
        P::U64tof64 => u64tof64::<R>,

        P::NewarrV4V4Id16 => newarr::<f::V4V4Id16, R>,
        P::LenarrV8 => lenarr::<f::V8, R>,
        P::Ldarr8V8 => ldarr::<f::V8, I8, R>,
        P::Ldarru8V8 => ldarr::<f::V8, U8, R>,
        P::Ldarr16V8 => ldarr::<f::V8, I16, R>,
        P::Ldarru16V8 => ldarr::<f::V8, U16, R>,
        P::LdarrV8 => ldarr::<f::V8, I32, R>,
        P::Ldarr64V8 => ldarr::<f::V8, I64, R>,
        P::Fldarr32V8 => ldarr::<f::V8, F32, R>,
        P::Fldarr64V8 => ldarr::<f::V8, F64, R>,
        P::LdarrObjV8 => ldarr::<f::V8, Obj, R>,
        P::Starr8V4V4 => starr::<f::V4V4, I8, R>,
        P::Starr16V4V4 => starr::<f::V4V4, I16, R>,
        P::StarrV4V4 => starr::<f::V4V4, I32, R>,
        P::Starr64V4V4 => starr::<f::V4V4, I64, R>,
        P::Fstarr32V4V4 => starr::<f::V4V4, F32, R>,
        P::Fstarr64V4V4 => starr::<f::V4V4, F64, R>,
        P::StarrObjV4V4 => starr::<f::V4V4, Obj, R>,

        P::NewobjV8Id16 => newobj::<f::V8Id16, R>,
        P::InitobjShortV4V4Id16 => initobj::<f::V4V4Id16, R>,
        P::InitobjV4V4V4V4Id16 => initobj::<f::V4V4V4V4Id16, R>,
        P::InitobjRangeV8Id16 => initobj::<f::V8Id16, R>,
        P::LdobjV8Id16 => ldobj::<f::V8Id16, I32, R>,
        P::Ldobj64V8Id16 => ldobj::<f::V8Id16, I64, R>,
        P::LdobjObjV8Id16 => ldobj::<f::V8Id16, Obj, R>,
        P::StobjV8Id16 => stobj::<f::V8Id16, I32, R>,
        P::Stobj64V8Id16 => stobj::<f::V8Id16, I64, R>,
        P::StobjObjV8Id16 => stobj::<f::V8Id16, Obj, R>,
        P::LdstaticId16 => ldstatic::<f::Id16, I32, R>,
        P::Ldstatic64Id16 => ldstatic::<f::Id16, I64, R>,
        P::LdstaticObjId16 => ldstatic::<f::Id16, Obj, R>,
        P::StstaticId16 => ststatic::<f::Id16, I32, R>,
        P::Ststatic64Id16 => ststatic::<f::Id16, I64, R>,
        P::StstaticObjId16 => ststatic::<f::Id16, Obj, R>,
        P::CheckcastId16 => checkcast::<f::Id16, R>,
        P::IsinstanceId16 => isinstance::<f::Id16, R>,

        P::CallShortV4V4Id16 => call::<f::V4V4Id16, R, false>,
        P::CallAccShortV4Imm4Id16 => call::<f::V4Imm4Id16, R, false>,
        P::CallV4V4V4V4Id16 => call::<f::V4V4V4V4Id16, R, false>,
        P::CallAccV4V4V4Imm4Id16 => call::<f::V4V4V4Imm4Id16, R, false>,
        P::CallRangeV8Id16 => call::<f::V8Id16, R, false>,
        P::CallVirtShortV4V4Id16 => call::<f::V4V4Id16, R, true>,
        P::CallVirtAccShortV4Imm4Id16 => call::<f::V4Imm4Id16, R, true>,
        P::CallVirtV4V4V4V4Id16 => call::<f::V4V4V4V4Id16, R, true>,
        P::CallVirtAccV4V4V4Imm4Id16 => call::<f::V4V4V4Imm4Id16, R, true>,
        P::CallVirtRangeV8Id16 => call::<f::V8Id16, R, true>,
        P::CallDynRangeV8Imm8Id16 => call::<f::V8Imm8Id16, R, false>,

        P::Return | P::Return64 | P::ReturnObj | P::ReturnVoid => ret::<R>,
        P::ThrowV8 => throw::<f::V8, R>,
    }
}
