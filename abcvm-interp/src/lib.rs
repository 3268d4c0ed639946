//! Bytecode interpreter for the ArkCompiler static instruction set.
//!
//! The interpreter owns frames, the accumulator and control flow. Anything
//! involving the object model (resolution, allocation, subtyping, field and
//! array storage, exception objects) goes through a [`RuntimeInterface`];
//! [`LocalRuntime`] is a complete in-memory implementation of it.
//!
//! ```no_run
//! use std::sync::Arc;
//! use abcvm_interp::{Code, Interpreter, InterpreterConfig, LocalRuntime, ManagedThread, Method, Outcome};
//!
//! # fn main() -> Result<(), abcvm_interp::InterpError> {
//! let mut runtime = LocalRuntime::new();
//! let mut thread = ManagedThread::new();
//! // ldai 42; return
//! let code = Code::new(0, 0, vec![0x14, 0x2a, 0xae]);
//! let main = Arc::new(Method::new(1, "main", runtime.object_class(), 0).with_code(code));
//!
//! let interp = Interpreter::new(InterpreterConfig::default());
//! let outcome = interp.invoke(&mut runtime, &mut thread, &main, &[])?;
//! assert!(matches!(outcome, Outcome::Returned(v) if v.i32() == 42));
//! # Ok(())
//! # }
//! ```

mod call;
pub mod code;
pub mod config;
pub mod error;
pub mod frame;
mod handlers;
pub mod interpreter;
pub mod leb128;
pub mod local;
pub mod method;
pub mod runtime;
pub mod thread;
pub mod value;

pub use call::frame_size;
pub use code::{CatchBlock, Code, TryBlock};
pub use config::InterpreterConfig;
pub use error::{ConfigError, InterpError, ParseError, VerifyError};
pub use frame::{Frame, FrameFlags};
pub use interpreter::{Context, ControlTransfer, DispatchTable, Handler, Inst, Interpreter, Outcome};
pub use local::LocalRuntime;
pub use method::{Field, Method, MethodFlags, NativeFn};
pub use runtime::{ExceptionKind, RuntimeInterface};
pub use thread::{BranchCounters, CachedEntity, InterpreterCache, ManagedThread, StatusHandle, ThreadFlags};
pub use value::{ClassRef, ObjectRef, VRegister};
