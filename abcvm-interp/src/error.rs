use abcvm_isa::DecodeError;
use thiserror::Error;

/// Malformed code item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Offset {0:#x} out of bounds (data size: {1:#x})")]
    OffsetOutOfBounds(usize, usize),

    #[error("Invalid LEB128 encoding at offset {0:#x}")]
    InvalidLeb128(usize),
}

/// Host-level failure of the interpreter. Managed exceptions never show up
/// here; they travel through the thread's pending exception.
#[derive(Debug, Error)]
pub enum InterpError {
    #[error("Invalid opcode {opcode:#06x} in {method} at {pc:#x}")]
    InvalidOpcode { method: String, pc: usize, opcode: u16 },

    #[error("pc {pc:#x} is outside {method} ({len} bytes of code)")]
    PcOutOfRange { method: String, pc: usize, len: usize },

    #[error("{method} takes {expected} arguments, {got} given")]
    ArgumentCount {
        method: String,
        expected: usize,
        got: usize,
    },

    #[error("{0} has neither bytecode nor a native entry point")]
    NoCode(String),

    #[error("{method}: exception path entered at {pc:#x} with no pending exception")]
    MissingException { method: String, pc: usize },

    #[error("{method} failed verification: {source}")]
    Verify {
        method: String,
        #[source]
        source: VerifyError,
    },

    #[error("pc {pc:#x} in {method} is not an instruction boundary")]
    NotABoundary { method: String, pc: usize },
}

/// Method body rejected before it runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("try block at {start_pc:#x} (length {length}) does not cover whole instructions")]
    TryRange { start_pc: u32, length: u32 },

    #[error("catch handler at {handler_pc:#x} is not an instruction boundary")]
    HandlerTarget { handler_pc: u32 },
}

/// Failure loading an [`InterpreterConfig`](crate::InterpreterConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
