//! Branches, safepoints, resumption and dispatch table overrides.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use abcvm_isa::BytecodeCursor;
use common::*;

/// Sums 10 + 9 + ... + 1 with a counting-down loop.
fn sum_loop() -> Vec<Insn<P>> {
    vec![
        insn(P::MoviV8Imm8, &[Reg(0), Imm(10)]),
        insn(P::MoviV8Imm8, &[Reg(1), Imm(0)]),
        insn(P::LdaV8, &[Reg(0)]),
        insn(P::JeqzImm8, &[Label(9)]),
        insn(P::LdaV8, &[Reg(1)]),
        insn(P::Add2V8, &[Reg(0)]),
        insn(P::StaV8, &[Reg(1)]),
        insn(P::IncV4Imm4, &[Reg(0), Imm(-1)]),
        insn(P::JmpImm8, &[Label(2)]),
        insn(P::LdaV8, &[Reg(1)]),
        insn(P::Return, &[]),
    ]
}

// --- branches ---

#[test]
fn counting_loop() {
    let mut vm = Vm::new();
    let m = vm.define(1, "sum", code(2, 0, &sum_loop()));
    assert_eq!(vm.eval(&m, &[]).i32(), 55);
}

#[test]
fn branch_profile_counts_outcomes() {
    let mut vm = Vm::with_config(InterpreterConfig {
        profiling: true,
        ..Default::default()
    });
    let program = sum_loop();
    let (_, offsets) = assemble(&program);
    let m = vm.define(1, "sum", code(2, 0, &program));
    vm.eval(&m, &[]);

    let counters = vm.thread.branch_profile(1, offsets[3]);
    assert_eq!(counters, BranchCounters { taken: 1, not_taken: 10 });
    assert_eq!(
        vm.thread.branch_profile(1, offsets[8]),
        BranchCounters::default(),
        "unconditional jumps are not profiled"
    );
}

#[test]
fn profiling_is_off_by_default() {
    let mut vm = Vm::new();
    let program = sum_loop();
    let (_, offsets) = assemble(&program);
    let m = vm.define(1, "sum", code(2, 0, &program));
    vm.eval(&m, &[]);
    assert_eq!(vm.thread.branch_profile(1, offsets[3]), BranchCounters::default());
}

#[test]
fn compare_and_branch() {
    let mut vm = Vm::new();
    let max = vm.define(
        1,
        "max",
        code(
            0,
            2,
            &[
                insn(P::LdaV8, &[Reg(0)]),
                insn(P::JltV8Imm8, &[Reg(1), Label(3)]),
                insn(P::Return, &[]),
                insn(P::LdaV8, &[Reg(1)]),
                insn(P::Return, &[]),
            ],
        ),
    );
    assert_eq!(vm.eval(&max, &[int(3), int(9)]).i32(), 9);
    assert_eq!(vm.eval(&max, &[int(9), int(3)]).i32(), 9);
    assert_eq!(vm.eval(&max, &[int(-4), int(-5)]).i32(), -4);
}

#[test]
fn reference_branches() {
    let mut vm = Vm::new();
    let is_null = vm.define(
        1,
        "is_null",
        code(
            0,
            1,
            &[
                insn(P::LdaObjV8, &[Reg(0)]),
                insn(P::JeqzObjImm8, &[Label(4)]),
                insn(P::LdaiImm8, &[Imm(0)]),
                insn(P::Return, &[]),
                insn(P::LdaiImm8, &[Imm(1)]),
                insn(P::Return, &[]),
            ],
        ),
    );
    let same = vm.define(
        2,
        "same",
        code(
            0,
            2,
            &[
                insn(P::LdaObjV8, &[Reg(0)]),
                insn(P::JeqObjV8Imm8, &[Reg(1), Label(4)]),
                insn(P::LdaiImm8, &[Imm(0)]),
                insn(P::Return, &[]),
                insn(P::LdaiImm8, &[Imm(1)]),
                insn(P::Return, &[]),
            ],
        ),
    );

    let class = vm.rt.object_class();
    let a = vm.rt.new_object(class);
    let b = vm.rt.new_object(class);

    assert_eq!(vm.eval(&is_null, &[VRegister::null()]).i32(), 1);
    assert_eq!(vm.eval(&is_null, &[obj(a)]).i32(), 0);
    assert_eq!(vm.eval(&same, &[obj(a), obj(a)]).i32(), 1);
    assert_eq!(vm.eval(&same, &[obj(a), obj(b)]).i32(), 0);
    assert_eq!(vm.eval(&same, &[VRegister::null(), VRegister::null()]).i32(), 1);
}

// --- host errors ---

#[test]
fn unassigned_opcode_fails_verification() {
    let mut vm = Vm::new();
    let m = vm.define(1, "bad", Code::new(0, 0, vec![0xb3]));
    let err = vm.try_run(&m, &[]).unwrap_err();
    assert!(matches!(err, InterpError::Verify { .. }), "got {err:?}");
}

#[test]
fn unassigned_opcode_without_verification() {
    let mut vm = Vm::with_config(InterpreterConfig {
        verify_on_entry: false,
        ..Default::default()
    });
    let m = vm.define(1, "bad", Code::new(0, 0, vec![0x00, 0xb3]));
    match vm.try_run(&m, &[]) {
        Err(InterpError::InvalidOpcode { pc, opcode, .. }) => {
            assert_eq!(pc, 1);
            assert_eq!(opcode, 0xb3);
        }
        other => panic!("expected InvalidOpcode, got {other:?}"),
    }
}

#[test]
fn running_off_the_end() {
    let mut vm = Vm::with_config(InterpreterConfig {
        verify_on_entry: false,
        ..Default::default()
    });
    let m = vm.define(1, "open_ended", Code::new(0, 0, vec![0x00]));
    match vm.try_run(&m, &[]) {
        Err(InterpError::PcOutOfRange { pc, len, .. }) => assert_eq!((pc, len), (1, 1)),
        other => panic!("expected PcOutOfRange, got {other:?}"),
    }
}

#[test]
fn wrong_argument_count() {
    let mut vm = Vm::new();
    let m = vm.define(1, "two", code(0, 2, &[insn(P::ReturnVoid, &[])]));
    match vm.try_run(&m, &[int(1)]) {
        Err(InterpError::ArgumentCount { expected, got, .. }) => assert_eq!((expected, got), (2, 1)),
        other => panic!("expected ArgumentCount, got {other:?}"),
    }
}

#[test]
fn method_without_code() {
    let mut vm = Vm::new();
    let m = Arc::new(Method::new(1, "empty", vm.rt.object_class(), 0));
    assert!(matches!(vm.try_run(&m, &[]), Err(InterpError::NoCode(_))));
}

// --- safepoints ---

#[test]
fn termination_stops_a_loop() {
    let mut vm = Vm::new();
    let spin = vm.define(1, "spin", code(0, 0, &[insn(P::JmpImm8, &[Label(0)])]));
    vm.thread.set_flag(ThreadFlags::TERMINATION_REQUEST);
    assert_eq!(vm.run(&spin, &[]), Outcome::Terminated);
}

#[test]
fn termination_from_another_thread() {
    let mut vm = Vm::new();
    let spin = vm.define(
        1,
        "spin",
        code(
            1,
            0,
            &[insn(P::IncV4Imm4, &[Reg(0), Imm(1)]), insn(P::JmpImm8, &[Label(0)])],
        ),
    );
    let status = vm.thread.status_handle();
    let requester = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        status.set(ThreadFlags::TERMINATION_REQUEST);
    });
    assert_eq!(vm.run(&spin, &[]), Outcome::Terminated);
    requester.join().unwrap();
}

#[test]
fn suspend_request_is_served_and_cleared() {
    let mut vm = Vm::new();
    let m = vm.define(
        1,
        "countdown",
        code(
            1,
            0,
            &[
                insn(P::MoviV4Imm4, &[Reg(0), Imm(3)]),
                insn(P::LdaV8, &[Reg(0)]),
                insn(P::JeqzImm8, &[Label(5)]),
                insn(P::IncV4Imm4, &[Reg(0), Imm(-1)]),
                insn(P::JmpImm8, &[Label(1)]),
                insn(P::LdaiImm8, &[Imm(7)]),
                insn(P::Return, &[]),
            ],
        ),
    );
    vm.thread.set_flag(ThreadFlags::SUSPEND_REQUEST | ThreadFlags::SAFEPOINT_REQUEST);
    assert_eq!(vm.eval(&m, &[]).i32(), 7);
    assert!(vm.thread.flags().is_empty(), "left flags: {:?}", vm.thread.flags());
}

// --- modes ---

#[test]
fn debug_mode_computes_the_same() {
    let mut vm = Vm::with_config(InterpreterConfig {
        debug: true,
        ..Default::default()
    });
    let m = vm.define(1, "sum", code(2, 0, &sum_loop()));
    assert_eq!(vm.eval(&m, &[]).i32(), 55);
}

#[test]
fn config_from_yaml() {
    let config = InterpreterConfig::from_yaml("max_stack_depth: 8\nprofiling: true\n").unwrap();
    assert_eq!(config.max_stack_depth, 8);
    assert!(config.profiling);
    assert!(config.verify_on_entry, "unset keys keep their defaults");
}

// --- resume ---

#[test]
fn resume_mid_method() {
    let mut vm = Vm::new();
    let program = [
        insn(P::LdaiImm8, &[Imm(1)]),
        insn(P::AddiImm8, &[Imm(5)]),
        insn(P::Return, &[]),
    ];
    let (_, offsets) = assemble(&program);
    let m = vm.define(1, "resumed", code(0, 0, &program));
    let frame = Frame::new(Arc::clone(&m), 0, 0, FrameFlags::empty());

    let outcome = vm
        .interp
        .resume(&mut vm.rt, &mut vm.thread, frame, offsets[1], int(10), false)
        .unwrap();
    assert_eq!(outcome, Outcome::Returned(int(15)));
}

#[test]
fn resume_into_a_catch_block() {
    let mut vm = Vm::new();
    let program = [
        insn(P::Nop, &[]),
        insn(P::LdaiImm8, &[Imm(1)]),
        insn(P::Return, &[]),
        insn(P::LdaiImm8, &[Imm(99)]),
        insn(P::Return, &[]),
    ];
    let (bytes, offsets) = assemble(&program);
    let code = Code::new(0, 0, bytes).with_try_block(TryBlock {
        start_pc: 0,
        length: offsets[3],
        catch_blocks: vec![CatchBlock {
            type_idx: 0,
            handler_pc: offsets[3],
            code_size: offsets[4] + 1 - offsets[3],
        }],
    });
    let m = vm.define(1, "guarded", code);

    let throwable = vm.rt.throwable_class();
    let exception = vm.rt.new_object(throwable);
    vm.thread.set_exception(exception);
    let frame = Frame::new(Arc::clone(&m), 0, 0, FrameFlags::empty());

    let outcome = vm
        .interp
        .resume(&mut vm.rt, &mut vm.thread, frame, 0, VRegister::default(), true)
        .unwrap();
    assert_eq!(outcome, Outcome::Returned(int(99)));
    assert!(!vm.thread.has_pending_exception());
}

#[test]
fn raise_without_a_pending_exception() {
    let mut vm = Vm::new();
    let m = vm.define(1, "m", code(0, 0, &[insn(P::ReturnVoid, &[])]));
    let frame = Frame::new(Arc::clone(&m), 0, 0, FrameFlags::empty());
    let err = vm
        .interp
        .resume(&mut vm.rt, &mut vm.thread, frame, 0, VRegister::default(), true)
        .unwrap_err();
    assert!(matches!(err, InterpError::MissingException { pc: 0, .. }), "got {err:?}");
}

#[test]
fn resume_inside_an_instruction() {
    let mut vm = Vm::with_config(InterpreterConfig {
        verify_on_entry: false,
        ..InterpreterConfig::default()
    });
    let program = [
        insn(P::LdaiImm8, &[Imm(1)]),
        insn(P::AddiImm8, &[Imm(5)]),
        insn(P::Return, &[]),
    ];
    let (_, offsets) = assemble(&program);
    let m = vm.define(1, "resumed", code(0, 0, &program));
    let frame = Frame::new(Arc::clone(&m), 0, 0, FrameFlags::empty());
    let pc = offsets[1] + 1;

    let err = vm
        .interp
        .resume(&mut vm.rt, &mut vm.thread, frame, pc, int(10), false)
        .unwrap_err();
    assert!(
        matches!(err, InterpError::NotABoundary { pc: p, .. } if p == pc as usize),
        "got {err:?}"
    );
}

#[test]
fn resume_past_the_end() {
    let mut vm = Vm::new();
    let m = vm.define(1, "m", code(0, 0, &[insn(P::ReturnVoid, &[])]));
    let frame = Frame::new(Arc::clone(&m), 0, 0, FrameFlags::empty());
    let err = vm
        .interp
        .resume(&mut vm.rt, &mut vm.thread, frame, 5, VRegister::default(), false)
        .unwrap_err();
    assert!(matches!(err, InterpError::PcOutOfRange { pc: 5, len: 1, .. }), "got {err:?}");
}

// --- dispatch table ---

fn counting_nop(inst: Inst<'_>, cx: &mut Context<'_, LocalRuntime>) -> ControlTransfer {
    let acc = cx.acc().i32();
    cx.set_acc(VRegister::from_i32(acc + 1));
    ControlTransfer::Continue(inst.next().offset())
}

#[test]
fn handler_override() {
    let mut vm = Vm::new();
    vm.interp.dispatch_table_mut().set(P::Nop, counting_nop);
    let m = vm.define(
        1,
        "nops",
        code(
            0,
            0,
            &[
                insn(P::LdaiImm8, &[Imm(0)]),
                insn(P::Nop, &[]),
                insn(P::Nop, &[]),
                insn(P::Nop, &[]),
                insn(P::Return, &[]),
            ],
        ),
    );
    assert_eq!(vm.eval(&m, &[]).i32(), 3);
}
