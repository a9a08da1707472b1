extern crate alloc;
extern crate core;

mod const_eval;
mod const_expr;
mod errors;
mod func;
mod global;
mod indices;
mod interp;
mod linker;
mod memory;
mod mmap;
mod module;
mod registry;
mod table;
mod translate;
mod traps;
mod types;
mod utils;
mod values;
mod vmval;

pub use const_expr::{ConstExpr, ConstOp};
pub use errors::Error;
pub use func::HostFunc;
pub use linker::Linker;
pub use memory::{BoundsPolicy, Memory, MemoryBackendKind};
pub use module::ParsedModule;
pub use registry::{ExportRef, ExternKind, Registry};
pub use translate::{CompileOption, StackTopRange};
pub use traps::Trap;
pub use types::{FuncType, GlobalType, Limits, MemoryType, TableType, WasmValType};
pub use values::Val;

pub type Result<T> = core::result::Result<T, Error>;

/// WebAssembly page sizes are defined to be 64KiB.
pub const WASM_PAGE_SIZE: u32 = 0x10000;

/// The log2 of the default WebAssembly page size.
pub const WASM_PAGE_SIZE_LOG2: u8 = 16;

/// The number of pages (for 32-bit modules) we can have before we run out of
/// byte index space.
pub const WASM32_MAX_PAGES: u64 = 1 << 16;
/// Maximum size, in bytes, of 32-bit memories (4G)
pub const WASM32_MAX_SIZE: u64 = 1 << 32;

/// The per-execution value-stack budget, in bytes. A call whose frame does not
/// fit traps with [`Trap::StackOverflow`].
pub const MAX_WASM_STACK: usize = 512 * 1024;

/// Size, in bytes, of the reservation for a full-guard mmap memory: the whole
/// wasm32 index space plus an equally sized guard so that
/// `addr + static_offset` can never escape the mapping.
pub const FULL_GUARD_RESERVE: u64 = 1 << 33;

pub fn host_page_size() -> usize {
    // SAFETY: sysconf(_SC_PAGESIZE) has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).expect("host page size")
}
