use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use abcvm_isa::{PandaOpcode, decode};
use bitflags::bitflags;

use crate::code::Code;
use crate::error::VerifyError;
use crate::thread::ManagedThread;
use crate::value::{ClassRef, VRegister};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MethodFlags: u32 {
        const STATIC = 1 << 0;
        const CONSTRUCTOR = 1 << 1;
        const ABSTRACT = 1 << 2;
        /// Takes a variable number of arguments (`call.dyn.range`).
        const DYNAMIC = 1 << 3;
    }
}

/// Compiled or host entry point. Receives the arguments in declaration
/// order and returns the value for the accumulator; a pending exception on
/// the thread takes precedence over the returned value.
pub type NativeFn = Arc<dyn Fn(&mut ManagedThread, &[VRegister]) -> VRegister + Send + Sync>;

/// A resolved method.
pub struct Method {
    id: u32,
    name: String,
    class: ClassRef,
    flags: MethodFlags,
    num_args: u32,
    code: Option<Code>,
    native: Option<NativeFn>,
    hotness: AtomicU32,
    /// Instruction offsets of a verified body.
    verified: OnceLock<Result<Vec<u32>, VerifyError>>,
}

impl Method {
    /// A method declaring `num_args` arguments, `this` included.
    pub fn new(id: u32, name: impl Into<String>, class: ClassRef, num_args: u32) -> Self {
        Self {
            id,
            name: name.into(),
            class,
            flags: MethodFlags::empty(),
            num_args,
            code: None,
            native: None,
            hotness: AtomicU32::new(0),
            verified: OnceLock::new(),
        }
    }

    pub fn with_flags(mut self, flags: MethodFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Attach bytecode. The declared argument count follows the code item.
    pub fn with_code(mut self, code: Code) -> Self {
        self.num_args = code.num_args;
        self.code = Some(code);
        self
    }

    pub fn with_native(mut self, native: NativeFn) -> Self {
        self.native = Some(native);
        self
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn class(&self) -> ClassRef {
        self.class
    }

    #[inline]
    pub fn flags(&self) -> MethodFlags {
        self.flags
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.flags.contains(MethodFlags::DYNAMIC)
    }

    #[inline]
    pub fn num_args(&self) -> u32 {
        self.num_args
    }

    /// Local registers of the frame, arguments excluded.
    #[inline]
    pub fn num_vregs(&self) -> u32 {
        self.code.as_ref().map_or(0, |c| c.num_vregs)
    }

    #[inline]
    pub fn code(&self) -> Option<&Code> {
        self.code.as_ref()
    }

    #[inline]
    pub fn instructions(&self) -> &[u8] {
        self.code.as_ref().map_or(&[], |c| c.instructions.as_slice())
    }

    #[inline]
    pub fn native(&self) -> Option<&NativeFn> {
        self.native.as_ref()
    }

    #[inline]
    pub fn hotness(&self) -> u32 {
        self.hotness.load(Ordering::Relaxed)
    }

    pub(crate) fn bump_hotness(&self) -> u32 {
        self.hotness.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Validate the body once; later calls return the memoized outcome.
    pub fn verify(&self) -> Result<(), VerifyError> {
        self.instruction_offsets().map(|_| ())
    }

    /// Offset of every instruction of a body that passed verification.
    pub fn instruction_offsets(&self) -> Result<&[u32], VerifyError> {
        match self.verified.get_or_init(|| verify_code(self.code.as_ref())) {
            Ok(offsets) => Ok(offsets),
            Err(e) => Err(e.clone()),
        }
    }

    pub fn is_instruction_boundary(&self, pc: u32) -> bool {
        self.instruction_offsets()
            .is_ok_and(|offsets| offsets.binary_search(&pc).is_ok())
    }
}

/// Decode `code` and check that every try range spans whole instructions
/// and every handler starts one.
fn verify_code(code: Option<&Code>) -> Result<Vec<u32>, VerifyError> {
    let Some(code) = code else {
        return Ok(Vec::new());
    };
    let offsets: Vec<u32> = decode::<PandaOpcode>(&code.instructions)?
        .into_iter()
        .map(|(_, offset)| offset)
        .collect();
    let len = code.instructions.len() as u64;
    let on_boundary = |pc: u64| u32::try_from(pc).is_ok_and(|pc| offsets.binary_search(&pc).is_ok());

    for tb in &code.try_blocks {
        let end = tb.start_pc as u64 + tb.length as u64;
        if !on_boundary(tb.start_pc as u64) || (end != len && !on_boundary(end)) {
            return Err(VerifyError::TryRange {
                start_pc: tb.start_pc,
                length: tb.length,
            });
        }
        if let Some(cb) = tb.catch_blocks.iter().find(|cb| !on_boundary(cb.handler_pc as u64)) {
            return Err(VerifyError::HandlerTarget {
                handler_pc: cb.handler_pc,
            });
        }
    }
    Ok(offsets)
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("class", &self.class)
            .field("flags", &self.flags)
            .field("num_args", &self.num_args)
            .field("num_vregs", &self.num_vregs())
            .field("native", &self.native.is_some())
            .finish()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A resolved field. Where the value lives is up to the runtime; `slot`
/// is its index inside the instance or the class statics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub id: u32,
    pub name: String,
    pub class: ClassRef,
    pub is_static: bool,
    pub slot: u32,
}
