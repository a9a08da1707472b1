use crate::types::GlobalType;
use crate::vmval::VMVal;
use core::cell::{Cell, UnsafeCell};

/// Initialization progress of a locally-defined global.
///
/// The `Initializing` marker is what catches a `global.get` initializer chain
/// that loops back into the global currently being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InitState {
    Uninitialized,
    Initializing,
    Initialized,
}

/// Storage for one global variable.
#[derive(Debug)]
pub struct Global {
    ty: GlobalType,
    value: UnsafeCell<VMVal>,
    init_state: Cell<InitState>,
}

// SAFETY: mutation happens either during single-threaded initialization or
// from `global.set`, whose cross-thread ordering WebAssembly 1.0 leaves
// undefined; the slot itself is a plain 8-byte cell.
unsafe impl Send for Global {}
// SAFETY: as above.
unsafe impl Sync for Global {}

impl Global {
    pub fn new(ty: GlobalType) -> Self {
        Self {
            ty,
            value: UnsafeCell::new(VMVal::default()),
            init_state: Cell::new(InitState::Uninitialized),
        }
    }

    pub fn ty(&self) -> &GlobalType {
        &self.ty
    }

    #[inline]
    pub fn get(&self) -> VMVal {
        // SAFETY: reads of the 8-byte slot are always in-bounds; torn reads
        // are excluded within one execution by program order.
        unsafe { *self.value.get() }
    }

    #[inline]
    pub(crate) fn set(&self, value: VMVal) {
        // SAFETY: as in `get`.
        unsafe { *self.value.get() = value }
    }

    pub(crate) fn init_state(&self) -> InitState {
        self.init_state.get()
    }

    pub(crate) fn set_init_state(&self, state: InitState) {
        self.init_state.set(state);
    }
}
