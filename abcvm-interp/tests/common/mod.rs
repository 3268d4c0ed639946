#![allow(dead_code)]

use std::sync::Arc;

pub use abcvm_interp::*;
pub use abcvm_isa::{Insn, Operand, PandaOpcode as P, encode};

pub use Operand::{Float, Id, Imm, Label, Reg};

pub fn insn(op: P, operands: &[Operand]) -> Insn<P> {
    Insn::new(op, operands)
}

/// Encode `program`, returning its bytes and per-instruction offsets.
pub fn assemble(program: &[Insn<P>]) -> (Vec<u8>, Vec<u32>) {
    encode(program).expect("test program must encode")
}

pub fn code(num_vregs: u32, num_args: u32, program: &[Insn<P>]) -> Code {
    Code::new(num_vregs, num_args, assemble(program).0)
}

/// Static method of class `Object` running `code`, taking as many
/// arguments as the code item declares.
pub fn static_method(rt: &LocalRuntime, id: u32, name: &str, code: Code) -> Arc<Method> {
    let num_args = code.num_args;
    Arc::new(
        Method::new(id, name, rt.object_class(), num_args)
            .with_flags(MethodFlags::STATIC)
            .with_code(code),
    )
}

pub fn int(v: i32) -> VRegister {
    VRegister::from_i32(v)
}

pub fn obj(o: ObjectRef) -> VRegister {
    VRegister::from_ref(Some(o))
}

/// Runtime, thread and interpreter of one test.
pub struct Vm {
    pub rt: LocalRuntime,
    pub thread: ManagedThread,
    pub interp: Interpreter<LocalRuntime>,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(InterpreterConfig::default())
    }

    pub fn with_config(config: InterpreterConfig) -> Self {
        Self {
            rt: LocalRuntime::new(),
            thread: ManagedThread::new(),
            interp: Interpreter::new(config),
        }
    }

    /// Build a static method and make it resolvable under `id`.
    pub fn define(&mut self, id: u32, name: &str, code: Code) -> Arc<Method> {
        let m = static_method(&self.rt, id, name, code);
        self.rt.register_method(id, Arc::clone(&m));
        m
    }

    pub fn try_run(&mut self, method: &Arc<Method>, args: &[VRegister]) -> Result<Outcome, InterpError> {
        self.interp.invoke(&mut self.rt, &mut self.thread, method, args)
    }

    pub fn run(&mut self, method: &Arc<Method>, args: &[VRegister]) -> Outcome {
        self.try_run(method, args).expect("interpreter error")
    }

    /// Run and return the accumulator, failing on an exception.
    pub fn eval(&mut self, method: &Arc<Method>, args: &[VRegister]) -> VRegister {
        match self.run(method, args) {
            Outcome::Returned(v) => v,
            other => panic!("{} did not return: {other:?} (thrown: {:?})", method.name(), self.rt.thrown()),
        }
    }

    /// Run expecting an escaping exception; returns the kind raised last.
    pub fn expect_throw(&mut self, method: &Arc<Method>, args: &[VRegister]) -> ExceptionKind {
        match self.run(method, args) {
            Outcome::Exception(exc) => {
                assert_eq!(self.thread.pending_exception(), Some(exc), "escaped exception stays pending");
                *self.rt.last_thrown().expect("an exception was raised")
            }
            other => panic!("{} did not throw: {other:?}", method.name()),
        }
    }

    /// Evaluate a single straight-line snippet of a fresh method. Snippets
    /// share a method id, so the resolution cache is reset first.
    pub fn eval_snippet(&mut self, num_vregs: u32, program: &[Insn<P>]) -> VRegister {
        self.thread.cache_mut().clear();
        let m = static_method(&self.rt, 1, "snippet", code(num_vregs, 0, program));
        self.eval(&m, &[])
    }

    pub fn throw_snippet(&mut self, num_vregs: u32, program: &[Insn<P>]) -> ExceptionKind {
        self.thread.cache_mut().clear();
        let m = static_method(&self.rt, 1, "snippet", code(num_vregs, 0, program));
        self.expect_throw(&m, &[])
    }
}
