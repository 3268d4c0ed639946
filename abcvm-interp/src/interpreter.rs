//! Dispatch loop.
//!
//! Every opcode maps to a [`Handler`] in a [`DispatchTable`]: a 256-slot
//! table for one-byte opcodes plus one 256-slot table per prefix byte.
//! A handler executes one instruction against the current [`Context`] and
//! tells the loop where control goes next through a [`ControlTransfer`].
//! Frames, the accumulator and exception unwinding are owned by the loop;
//! handlers never touch the caller chain.

use std::mem;
use std::sync::Arc;

use abcvm_isa::{BytecodeCursor, BytecodeId, FastCursor, Opcode, PandaOpcode};

use crate::config::InterpreterConfig;
use crate::error::InterpError;
use crate::frame::{Frame, FrameFlags};
use crate::handlers;
use crate::method::{Field, Method};
use crate::runtime::{ExceptionKind, RuntimeInterface};
use crate::thread::{CachedEntity, ManagedThread, ThreadFlags};
use crate::value::{ClassRef, ObjectRef, VRegister};

/// Cursor type handlers decode their operands from.
pub type Inst<'a> = FastCursor<'a, PandaOpcode>;

/// One opcode's implementation.
pub type Handler<R> = fn(Inst<'_>, &mut Context<'_, R>) -> ControlTransfer;

/// Where control goes after a handler.
#[derive(Debug)]
pub enum ControlTransfer {
    /// Fall through to the instruction at this offset.
    Continue(usize),
    /// Taken branch to this offset.
    Jump(usize),
    /// Enter a freshly built callee frame at offset 0.
    Call(Frame),
    /// Leave the current frame; the accumulator holds the result.
    Return,
    /// An exception is pending on the thread.
    RaiseException,
    /// Termination was requested; unwind everything.
    Terminate,
    /// No handler for the opcode at this offset.
    Illegal,
}

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The entry frame returned this accumulator.
    Returned(VRegister),
    /// An exception escaped the entry frame. It stays pending on the thread.
    Exception(ObjectRef),
    /// Termination was requested at a safepoint.
    Terminated,
}

/// Execution state visible to handlers.
pub struct Context<'a, R> {
    pub runtime: &'a mut R,
    pub thread: &'a mut ManagedThread,
    pub(crate) config: &'a InterpreterConfig,
    pub(crate) frame: Frame,
    pub(crate) acc: VRegister,
    /// Suspended callers, innermost last.
    pub(crate) callers: Vec<Frame>,
    /// Registers held by the current frame and every caller.
    pub(crate) vregs_in_use: usize,
}

impl<'a, R: RuntimeInterface> Context<'a, R> {
    fn new(
        runtime: &'a mut R,
        thread: &'a mut ManagedThread,
        config: &'a InterpreterConfig,
        frame: Frame,
        acc: VRegister,
    ) -> Self {
        let vregs_in_use = frame.size();
        Self {
            runtime,
            thread,
            config,
            frame,
            acc,
            callers: Vec::new(),
            vregs_in_use,
        }
    }

    #[inline]
    pub fn acc(&self) -> VRegister {
        self.acc
    }

    #[inline]
    pub fn set_acc(&mut self, acc: VRegister) {
        self.acc = acc;
    }

    #[inline]
    pub fn vreg(&self, idx: u16) -> VRegister {
        self.frame.vreg(idx as usize)
    }

    #[inline]
    pub fn set_vreg(&mut self, idx: u16, value: VRegister) {
        self.frame.set_vreg(idx as usize, value);
    }

    #[inline]
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    #[inline]
    pub fn method(&self) -> &Arc<Method> {
        self.frame.method()
    }

    /// Number of live frames, the current one included.
    #[inline]
    pub fn depth(&self) -> usize {
        self.callers.len() + 1
    }

    pub fn config(&self) -> &InterpreterConfig {
        self.config
    }

    /// Raise `kind` and enter the exception path.
    pub fn throw(&mut self, kind: ExceptionKind) -> ControlTransfer {
        log::debug!("{}: raising {kind}", self.frame.method().name());
        self.runtime.throw(self.thread, kind);
        ControlTransfer::RaiseException
    }

    /// Count a conditional branch outcome when profiling is on.
    #[inline]
    pub(crate) fn profile_branch(&mut self, pc: usize, taken: bool) {
        if self.config.profiling {
            let method_id = self.frame.method().id();
            self.thread.record_branch(method_id, pc as u32, taken);
        }
    }

    /// Serve pending thread requests with the accumulator saved in the
    /// frame. Returns `true` when termination was requested.
    pub(crate) fn poll_safepoint(&mut self) -> bool {
        if !self.thread.has_flags() {
            return false;
        }
        self.frame.set_acc(self.acc);
        self.runtime.safepoint(self.thread);
        self.acc = self.frame.acc();
        self.thread.flags().contains(ThreadFlags::TERMINATION_REQUEST)
    }

    /// Resolve the method referenced at `pc`, going through the thread's
    /// cache. `None` means an exception is now pending.
    pub(crate) fn resolve_method(&mut self, pc: usize, id: BytecodeId) -> Option<Arc<Method>> {
        let caller = Arc::clone(self.frame.method());
        if let Some(CachedEntity::Method(m)) = self.thread.cache_mut().get(caller.id(), pc as u32) {
            return Some(Arc::clone(m));
        }
        match self.runtime.resolve_method(&caller, id) {
            Some(m) => {
                let entity = CachedEntity::Method(Arc::clone(&m));
                self.thread.cache_mut().set(caller.id(), pc as u32, entity);
                Some(m)
            }
            None => {
                self.throw(ExceptionKind::Unresolved(id));
                None
            }
        }
    }

    pub(crate) fn resolve_field(&mut self, pc: usize, id: BytecodeId) -> Option<Arc<Field>> {
        let caller = Arc::clone(self.frame.method());
        if let Some(CachedEntity::Field(f)) = self.thread.cache_mut().get(caller.id(), pc as u32) {
            return Some(Arc::clone(f));
        }
        match self.runtime.resolve_field(&caller, id) {
            Some(f) => {
                let entity = CachedEntity::Field(Arc::clone(&f));
                self.thread.cache_mut().set(caller.id(), pc as u32, entity);
                Some(f)
            }
            None => {
                self.throw(ExceptionKind::Unresolved(id));
                None
            }
        }
    }

    pub(crate) fn resolve_class(&mut self, pc: usize, id: BytecodeId) -> Option<ClassRef> {
        let caller = Arc::clone(self.frame.method());
        if let Some(&CachedEntity::Class(class)) = self.thread.cache_mut().get(caller.id(), pc as u32) {
            return Some(class);
        }
        match self.runtime.resolve_class(&caller, id) {
            Some(class) => {
                self.thread
                    .cache_mut()
                    .set(caller.id(), pc as u32, CachedEntity::Class(class));
                Some(class)
            }
            None => {
                self.throw(ExceptionKind::Unresolved(id));
                None
            }
        }
    }

    /// Whether a new frame of `nregs` registers fits the configured limits.
    pub(crate) fn has_room_for(&self, nregs: usize) -> bool {
        self.depth() < self.config.max_stack_depth
            && self.vregs_in_use + nregs <= self.config.max_stack_vregs
    }
}

/// Opcode-indexed handler table.
pub struct DispatchTable<R> {
    primary: [Handler<R>; 256],
    prefixed: Vec<[Handler<R>; 256]>,
}

impl<R: RuntimeInterface> Default for DispatchTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RuntimeInterface> DispatchTable<R> {
    /// Table with the built-in handler of every opcode.
    pub fn new() -> Self {
        let illegal = handlers::illegal::<R> as Handler<R>;
        let prefixes = 256 - PandaOpcode::MIN_PREFIX_OPCODE as usize;
        let mut table = Self {
            primary: [illegal; 256],
            prefixed: vec![[illegal; 256]; prefixes],
        };
        for &op in PandaOpcode::all() {
            table.set(op, handlers::handler_for::<R>(op));
        }
        table
    }

    /// Replace the handler of `op`.
    pub fn set(&mut self, op: PandaOpcode, handler: Handler<R>) {
        let raw = op.raw();
        let primary = (raw & 0xff) as u8;
        if PandaOpcode::is_prefix_byte(primary) {
            let group = (primary - PandaOpcode::MIN_PREFIX_OPCODE) as usize;
            self.prefixed[group][(raw >> 8) as usize] = handler;
        } else {
            self.primary[primary as usize] = handler;
        }
    }

    #[inline]
    pub fn lookup(&self, inst: &Inst<'_>) -> Handler<R> {
        let raw = inst.raw_opcode();
        let primary = (raw & 0xff) as u8;
        if PandaOpcode::is_prefix_byte(primary) {
            let group = (primary - PandaOpcode::MIN_PREFIX_OPCODE) as usize;
            self.prefixed[group][(raw >> 8) as usize]
        } else {
            self.primary[primary as usize]
        }
    }
}

/// Where an exception lands after unwinding.
enum Landing {
    /// Handler offset in the (possibly new) current frame.
    Handler(usize),
    /// Nobody caught it.
    Uncaught(ObjectRef),
}

/// Bytecode interpreter for the static instruction set.
pub struct Interpreter<R> {
    table: DispatchTable<R>,
    config: InterpreterConfig,
}

impl<R: RuntimeInterface> Interpreter<R> {
    pub fn new(config: InterpreterConfig) -> Self {
        Self {
            table: DispatchTable::new(),
            config,
        }
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn dispatch_table_mut(&mut self) -> &mut DispatchTable<R> {
        &mut self.table
    }

    /// Run `method` with `args` (receiver first for instance methods) until
    /// its entry frame returns or an exception escapes it.
    pub fn invoke(
        &self,
        runtime: &mut R,
        thread: &mut ManagedThread,
        method: &Arc<Method>,
        args: &[VRegister],
    ) -> Result<Outcome, InterpError> {
        let expected = method.num_args() as usize;
        if args.len() != expected && !method.is_dynamic() {
            return Err(InterpError::ArgumentCount {
                method: method.name().to_string(),
                expected,
                got: args.len(),
            });
        }

        if let Some(native) = method.native() {
            log::debug!("Native entry: {}", method.name());
            let result = native(thread, args);
            return Ok(match thread.pending_exception() {
                Some(exception) => Outcome::Exception(exception),
                None => Outcome::Returned(result),
            });
        }
        self.check_code(method)?;

        let num_vregs = method.num_vregs() as usize;
        let mut frame = Frame::new(
            Arc::clone(method),
            num_vregs + args.len().max(expected),
            args.len() as u32,
            FrameFlags::empty(),
        );
        for (i, &arg) in args.iter().enumerate() {
            frame.set_vreg(num_vregs + i, arg);
        }

        log::debug!("Entry: {}", method.name());
        let mut cx = Context::new(runtime, thread, &self.config, frame, VRegister::default());
        self.execute(&mut cx, 0, false)
    }

    /// Re-enter interpretation of `frame` at `pc` with accumulator `acc`,
    /// e.g. after deoptimization. With `raise` set, the thread's pending
    /// exception is dispatched first, as if thrown at `pc`.
    ///
    /// `pc` must start an instruction, so the body is verified here even
    /// when `verify_on_entry` is off.
    pub fn resume(
        &self,
        runtime: &mut R,
        thread: &mut ManagedThread,
        frame: Frame,
        pc: u32,
        acc: VRegister,
        raise: bool,
    ) -> Result<Outcome, InterpError> {
        let method = Arc::clone(frame.method());
        self.check_code(&method)?;
        let len = method.instructions().len();
        if pc as usize >= len {
            return Err(InterpError::PcOutOfRange {
                method: method.name().to_string(),
                pc: pc as usize,
                len,
            });
        }
        let offsets = method.instruction_offsets().map_err(|source| InterpError::Verify {
            method: method.name().to_string(),
            source,
        })?;
        if offsets.binary_search(&pc).is_err() {
            return Err(InterpError::NotABoundary {
                method: method.name().to_string(),
                pc: pc as usize,
            });
        }
        log::debug!("Resume: {} at {pc:#x}", method.name());
        let mut cx = Context::new(runtime, thread, &self.config, frame, acc);
        self.execute(&mut cx, pc as usize, raise)
    }

    fn check_code(&self, method: &Method) -> Result<(), InterpError> {
        if method.code().is_none() {
            return Err(InterpError::NoCode(method.name().to_string()));
        }
        if self.config.verify_on_entry {
            method.verify().map_err(|source| InterpError::Verify {
                method: method.name().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    fn execute(&self, cx: &mut Context<'_, R>, pc: usize, raise: bool) -> Result<Outcome, InterpError> {
        if self.config.debug {
            self.run::<true>(cx, pc, raise)
        } else {
            self.run::<false>(cx, pc, raise)
        }
    }

    fn run<const DEBUG: bool>(
        &self,
        cx: &mut Context<'_, R>,
        mut pc: usize,
        mut raise: bool,
    ) -> Result<Outcome, InterpError> {
        'frames: loop {
            if raise {
                raise = false;
                match self.unwind(cx, pc)? {
                    Landing::Handler(handler) => {
                        pc = handler;
                        continue 'frames;
                    }
                    Landing::Uncaught(exception) => return Ok(Outcome::Exception(exception)),
                }
            }

            let method = Arc::clone(cx.frame.method());
            let code = method.instructions();

            loop {
                if pc >= code.len() {
                    return Err(InterpError::PcOutOfRange {
                        method: method.name().to_string(),
                        pc,
                        len: code.len(),
                    });
                }
                let inst = Inst::at(code, pc);
                if DEBUG {
                    log::trace!("{}+{pc:#06x}: {inst}  acc={:?}", method.name(), cx.acc);
                    cx.runtime.on_instruction(&method, pc as u32, cx.acc);
                }

                let handler = self.table.lookup(&inst);
                match handler(inst, cx) {
                    ControlTransfer::Continue(next) | ControlTransfer::Jump(next) => pc = next,
                    ControlTransfer::Call(callee) => {
                        self.enter(cx, inst, callee)?;
                        pc = 0;
                        continue 'frames;
                    }
                    ControlTransfer::Return => match self.leave(cx) {
                        Some(resume_at) => {
                            pc = resume_at;
                            continue 'frames;
                        }
                        None => return Ok(Outcome::Returned(cx.acc)),
                    },
                    ControlTransfer::RaiseException => {
                        raise = true;
                        continue 'frames;
                    }
                    ControlTransfer::Terminate => {
                        log::debug!("Terminating with {} frames live", cx.depth());
                        cx.callers.clear();
                        cx.vregs_in_use = 0;
                        return Ok(Outcome::Terminated);
                    }
                    ControlTransfer::Illegal => {
                        return Err(InterpError::InvalidOpcode {
                            method: method.name().to_string(),
                            pc,
                            opcode: inst.raw_opcode(),
                        });
                    }
                }
            }
        }
    }

    /// Link `callee` as the current frame; `inst` is the call instruction.
    fn enter(&self, cx: &mut Context<'_, R>, inst: Inst<'_>, callee: Frame) -> Result<(), InterpError> {
        self.check_code(callee.method())?;
        log::debug!("Entry: {}", callee.method().name());

        cx.frame.set_bytecode_offset(inst.offset() as u32);
        cx.frame.set_next_offset(inst.next().offset() as u32);
        cx.frame.set_acc(cx.acc);
        cx.vregs_in_use += callee.size();
        let caller = mem::replace(&mut cx.frame, callee);
        cx.callers.push(caller);
        Ok(())
    }

    /// Unlink the current frame. Returns the caller's resume offset, or
    /// `None` when the entry frame itself returned.
    fn leave(&self, cx: &mut Context<'_, R>) -> Option<usize> {
        let caller = cx.callers.pop()?;
        log::debug!("Exit: {}", cx.frame.method().name());
        cx.vregs_in_use -= cx.frame.size();
        let callee = mem::replace(&mut cx.frame, caller);
        if callee.is_initobj() {
            cx.acc = cx.frame.acc();
        }
        Some(cx.frame.next_offset() as usize)
    }

    /// Find a handler for the pending exception, starting at `pc` in the
    /// current frame and freeing frames until one catches it.
    fn unwind(&self, cx: &mut Context<'_, R>, mut pc: usize) -> Result<Landing, InterpError> {
        let Some(exception) = cx.thread.pending_exception() else {
            return Err(InterpError::MissingException {
                method: cx.frame.method().name().to_string(),
                pc,
            });
        };

        loop {
            let method = Arc::clone(cx.frame.method());
            if let Some(handler) = cx.runtime.find_catch_block(&method, exception, pc as u32) {
                if !method.is_instruction_boundary(handler) {
                    return Err(InterpError::NotABoundary {
                        method: method.name().to_string(),
                        pc: handler as usize,
                    });
                }
                log::debug!("{}: exception caught at {handler:#x}", method.name());
                cx.thread.clear_exception();
                cx.acc = VRegister::from_ref(Some(exception));
                return Ok(Landing::Handler(handler as usize));
            }

            let Some(caller) = cx.callers.pop() else {
                log::debug!("{}: exception escapes the entry frame", method.name());
                return Ok(Landing::Uncaught(exception));
            };
            log::debug!("{}: unwinding", method.name());
            cx.vregs_in_use -= cx.frame.size();
            cx.frame = caller;
            pc = cx.frame.bytecode_offset() as usize;
        }
    }
}
