/// A fatal execution failure.
///
/// Traps terminate the current call into WebAssembly and surface to the host
/// with enough context to rebuild a human-readable message; rendering (color,
/// localization) is the host's concern. Nothing is retried.
#[derive(Debug, Clone, PartialEq, onlyerror::Error)]
pub enum Trap {
    /// An out-of-bounds linear-memory access.
    #[error("out of bounds memory access: memory {memory_index}, static offset {static_offset}, \
             effective offset {effective_offset}, memory length {memory_length}, width {access_width}")]
    MemoryOutOfBounds {
        memory_index: u32,
        static_offset: u32,
        effective_offset: u64,
        memory_length: u64,
        access_width: u32,
    },
    /// An integer division or remainder by zero.
    #[error("integer division by zero")]
    DivisionByZero,
    /// Signed division of the minimum value by -1, or a float-to-int
    /// truncation whose result does not fit.
    #[error("integer overflow")]
    IntegerOverflow,
    /// Code that was supposed to have been unreachable was reached.
    #[error("unreachable code executed")]
    Unreachable,
    /// Signature mismatch on an indirect call.
    #[error("indirect call signature mismatch")]
    IndirectCallTypeMismatch,
    /// Indirect call through a null table slot.
    #[error("accessed uninitialized table element")]
    IndirectCallToNull,
    /// Out-of-bounds access to a table.
    #[error("out of bounds table access: index {index}, table size {size}")]
    TableOutOfBounds { index: u64, size: u64 },
    /// The value stack was exhausted.
    #[error("call stack exhausted")]
    StackOverflow,
    /// Failed float-to-int conversion of NaN.
    #[error("invalid conversion to integer")]
    BadConversionToInteger,
}

impl Trap {
    /// A stable numeric code for each trap kind.
    pub fn code(&self) -> u8 {
        match self {
            Trap::MemoryOutOfBounds { .. } => 0,
            Trap::DivisionByZero => 1,
            Trap::IntegerOverflow => 2,
            Trap::Unreachable => 3,
            Trap::IndirectCallTypeMismatch => 4,
            Trap::IndirectCallToNull => 5,
            Trap::TableOutOfBounds { .. } => 6,
            Trap::StackOverflow => 7,
            Trap::BadConversionToInteger => 8,
        }
    }
}
