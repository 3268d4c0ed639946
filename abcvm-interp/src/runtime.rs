//! The interpreter's view of the rest of the virtual machine.
//!
//! Object layout, allocation, class loading and linking are owned by the
//! runtime. Handlers reach them only through [`RuntimeInterface`].

use std::fmt;
use std::sync::Arc;

use abcvm_isa::BytecodeId;

use crate::method::{Field, Method};
use crate::thread::{ManagedThread, ThreadFlags};
use crate::value::{ClassRef, ObjectRef, VRegister};

/// Managed exceptions raised by the interpreter itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionKind {
    NullPointer,
    ArrayIndexOutOfBounds { index: i64, length: u32 },
    NegativeArraySize(i32),
    ArrayStore { array: ClassRef, value: ClassRef },
    Arithmetic,
    ClassCast { target: ClassRef, actual: ClassRef },
    StackOverflow,
    AbstractMethod,
    /// A constant-pool reference the runtime could not resolve.
    Unresolved(BytecodeId),
    OutOfMemory,
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullPointer => f.write_str("NullPointerException"),
            Self::ArrayIndexOutOfBounds { index, length } => {
                write!(f, "ArrayIndexOutOfBoundsException: idx={index}; length={length}")
            }
            Self::NegativeArraySize(size) => write!(f, "NegativeArraySizeException: {size}"),
            Self::ArrayStore { array, value } => {
                write!(f, "ArrayStoreException: class {} into array of class {}", value.0, array.0)
            }
            Self::Arithmetic => f.write_str("ArithmeticException: / by zero"),
            Self::ClassCast { target, actual } => {
                write!(f, "ClassCastException: class {} cannot be cast to {}", actual.0, target.0)
            }
            Self::StackOverflow => f.write_str("StackOverflowError"),
            Self::AbstractMethod => f.write_str("AbstractMethodError"),
            Self::Unresolved(id) => write!(f, "NoClassDefFoundError: {id}"),
            Self::OutOfMemory => f.write_str("OutOfMemoryError"),
        }
    }
}

/// Services the dispatch loop needs from the surrounding runtime.
///
/// Resolution methods return `None` when the entity does not exist; the
/// interpreter then raises [`ExceptionKind::Unresolved`].
pub trait RuntimeInterface {
    fn resolve_method(&mut self, caller: &Method, id: BytecodeId) -> Option<Arc<Method>>;

    fn resolve_field(&mut self, caller: &Method, id: BytecodeId) -> Option<Arc<Field>>;

    fn resolve_class(&mut self, caller: &Method, id: BytecodeId) -> Option<ClassRef>;

    /// String object for a string id.
    fn resolve_string(&mut self, caller: &Method, id: BytecodeId) -> Option<ObjectRef>;

    /// Implementation of `method` selected by the receiver's class.
    fn resolve_virtual(&mut self, receiver: ObjectRef, method: &Arc<Method>) -> Option<Arc<Method>>;

    /// Mirror object of a class, as loaded by `lda.type`.
    fn class_object(&mut self, class: ClassRef) -> ObjectRef;

    /// Allocate an instance of `class`. On failure the exception is left
    /// pending on `thread` and `None` is returned.
    fn create_object(&mut self, thread: &mut ManagedThread, class: ClassRef) -> Option<ObjectRef>;

    /// Array of class `array_class` with zeroed elements. Fails like
    /// [`create_object`](Self::create_object).
    fn create_array(&mut self, thread: &mut ManagedThread, array_class: ClassRef, length: u32)
    -> Option<ObjectRef>;

    fn class_of(&self, obj: ObjectRef) -> ClassRef;

    /// Whether a value of class `from` may be stored where `to` is expected.
    fn is_assignable(&self, from: ClassRef, to: ClassRef) -> bool;

    fn is_instance(&self, obj: ObjectRef, class: ClassRef) -> bool {
        self.is_assignable(self.class_of(obj), class)
    }

    /// Element class of an array class of references, `None` for primitive
    /// arrays and non-array classes.
    fn component_type(&self, array_class: ClassRef) -> Option<ClassRef>;

    fn array_length(&self, array: ObjectRef) -> u32;

    fn array_get(&self, array: ObjectRef, index: u32) -> VRegister;

    fn array_set(&mut self, array: ObjectRef, index: u32, value: VRegister);

    /// Read a field; `obj` is `None` for a static field.
    fn field_get(&self, obj: Option<ObjectRef>, field: &Field) -> VRegister;

    fn field_set(&mut self, obj: Option<ObjectRef>, field: &Field, value: VRegister);

    /// Create the exception object for `kind` and make it pending on
    /// `thread`.
    fn throw(&mut self, thread: &mut ManagedThread, kind: ExceptionKind);

    fn throw_null_pointer_exception(&mut self, thread: &mut ManagedThread) {
        self.throw(thread, ExceptionKind::NullPointer);
    }

    fn throw_array_index_out_of_bounds_exception(
        &mut self,
        thread: &mut ManagedThread,
        index: i64,
        length: u32,
    ) {
        self.throw(thread, ExceptionKind::ArrayIndexOutOfBounds { index, length });
    }

    fn throw_array_store_exception(&mut self, thread: &mut ManagedThread, array: ClassRef, value: ClassRef) {
        self.throw(thread, ExceptionKind::ArrayStore { array, value });
    }

    fn throw_arithmetic_exception(&mut self, thread: &mut ManagedThread) {
        self.throw(thread, ExceptionKind::Arithmetic);
    }

    fn throw_class_cast_exception(&mut self, thread: &mut ManagedThread, target: ClassRef, actual: ClassRef) {
        self.throw(thread, ExceptionKind::ClassCast { target, actual });
    }

    fn throw_negative_array_size_exception(&mut self, thread: &mut ManagedThread, size: i32) {
        self.throw(thread, ExceptionKind::NegativeArraySize(size));
    }

    fn throw_stack_overflow_exception(&mut self, thread: &mut ManagedThread) {
        self.throw(thread, ExceptionKind::StackOverflow);
    }

    fn throw_out_of_memory_error(&mut self, thread: &mut ManagedThread) {
        self.throw(thread, ExceptionKind::OutOfMemory);
    }

    /// Handler offset in `method` catching `exception` thrown at `pc`.
    fn find_catch_block(&mut self, method: &Method, exception: ObjectRef, pc: u32) -> Option<u32> {
        let code = method.code()?;
        for cb in code.catch_blocks_at(pc) {
            let Some(type_id) = cb.type_id() else {
                return Some(cb.handler_pc);
            };
            match self.resolve_class(method, type_id) {
                Some(class) if self.is_instance(exception, class) => return Some(cb.handler_pc),
                Some(_) => {}
                None => log::warn!("{}: unresolved catch type {type_id}", method.name()),
            }
        }
        None
    }

    /// Serve suspend and safepoint requests. A termination request stays
    /// set for the interpreter to act on.
    fn safepoint(&mut self, thread: &mut ManagedThread) {
        thread.clear_flag(ThreadFlags::SUSPEND_REQUEST | ThreadFlags::SAFEPOINT_REQUEST);
    }

    /// Called before every instruction when the loop runs in debug mode.
    fn on_instruction(&mut self, _method: &Method, _pc: u32, _acc: VRegister) {}
}
