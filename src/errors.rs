use crate::traps::Trap;
use crate::types::{ExternDesc, FuncType};
use alloc::string::String;

/// An error raised while loading, linking, or initializing modules.
///
/// Everything in here is recoverable at the host level: the host may discard
/// the offending module (or the whole registry) and carry on. Execution-time
/// failures are [`Trap`]s and terminate only the running call.
#[derive(Debug, onlyerror::Error)]
pub enum Error {
    /// The input WebAssembly code is invalid.
    ///
    /// This should never happen for validated WebAssembly code.
    #[error("invalid WASM input at {offset}: {message}")]
    InvalidWebAssembly {
        /// A string describing the validation error.
        message: String,
        /// The bytecode offset where the error occurred.
        offset: usize,
    },
    /// A feature outside the WebAssembly 1.0 scalar subset was used.
    #[error("feature used by the WebAssembly code is not supported: {0}")]
    Unsupported(String),
    /// The requested stack-top ring layout has no precompiled handler family.
    #[error("unsupported stack-top layout: {0}")]
    StackTopLayout(String),

    /// A module with the same name is already registered.
    #[error("a module named `{0}` is already registered")]
    DuplicateModule(String),
    /// No module with this name is registered.
    #[error("no module named `{0}` is registered")]
    UnknownModule(String),
    /// The module has no export with this name.
    #[error("module `{module}` has no export named `{name}`")]
    UnknownExport { module: String, name: String },
    /// The export exists but is not a function.
    #[error("export `{name}` of module `{module}` is not a function")]
    NotAFunction { module: String, name: String },

    /// An import could not be resolved against any registered module or host
    /// symbol.
    #[error("unresolved import `{module}`::`{name}` (required by `{importer}`)")]
    LinkUnresolved {
        module: String,
        name: String,
        importer: String,
    },
    /// A resolved import's provider has an incompatible descriptor.
    #[error("import `{module}`::`{name}` type mismatch: expected {expected}, got {actual}")]
    LinkTypeMismatch {
        module: String,
        name: String,
        expected: ExternDesc,
        actual: ExternDesc,
    },
    /// An import chain loops back on itself.
    #[error("import `{module}`::`{name}` forms a circular dependency")]
    LinkCircular { module: String, name: String },

    /// A constant initializer uses an opcode outside the one-opcode
    /// WebAssembly 1.0 subset, or a `global.get` of a mutable or
    /// differently-typed global.
    #[error("invalid constant expression: opcode {opcode:#04x} at offset {offset}")]
    InitInvalidConstExpr { opcode: u8, offset: usize },
    /// Global initializers reference each other in a cycle.
    #[error("global {global} of module `{module}` has a circular initializer")]
    InitGlobalCycle { module: String, global: u32 },
    /// An active segment does not fit its target table or memory.
    #[error("active segment out of bounds: offset {offset} + length {len} > capacity {capacity}")]
    InitSegmentOutOfBounds { offset: u64, len: u64, capacity: u64 },

    /// Host-supplied arguments do not match the callee's signature.
    #[error("call type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: FuncType, actual: String },

    /// The backing store for a linear memory or value stack could not be
    /// allocated.
    #[error("out of memory allocating {0}")]
    OutOfMemory(String),

    /// Execution trapped.
    #[error("wasm trap: {0}")]
    Trap(#[from] Trap),
}

impl From<wasmparser::BinaryReaderError> for Error {
    fn from(e: wasmparser::BinaryReaderError) -> Self {
        Self::InvalidWebAssembly {
            message: e.message().into(),
            offset: e.offset(),
        }
    }
}

#[macro_export]
macro_rules! wasm_unsupported {
    ($($arg:tt)*) => { $crate::Error::Unsupported(alloc::format!($($arg)*)) }
}
