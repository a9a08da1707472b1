use crate::translate::TranslatedFunc;
use crate::traps::Trap;
use crate::types::FuncType;
use crate::values::Val;
use alloc::boxed::Box;
use core::fmt;
use core::ptr::NonNull;

/// A host-provided function importable by modules.
///
/// The callback receives the arguments in declaration order and writes one
/// result slot per declared result. Its type is checked structurally against
/// the import descriptor at link time, so the slices always match `ty`.
pub struct HostFunc {
    ty: FuncType,
    call: Box<dyn Fn(&[Val], &mut [Val]) -> Result<(), Trap> + Send + Sync>,
}

impl HostFunc {
    pub fn new(
        ty: FuncType,
        call: impl Fn(&[Val], &mut [Val]) -> Result<(), Trap> + Send + Sync + 'static,
    ) -> Self {
        Self {
            ty,
            call: Box::new(call),
        }
    }

    pub fn ty(&self) -> &FuncType {
        &self.ty
    }

    pub(crate) fn invoke(&self, args: &[Val], results: &mut [Val]) -> Result<(), Trap> {
        (self.call)(args, results)
    }
}

impl fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunc").field("ty", &self.ty).finish()
    }
}

/// What a function reference points at.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FuncRefKind {
    /// Placeholder until linking wires the reference.
    Uninit,
    /// A translated WebAssembly function body.
    Wasm(NonNull<TranslatedFunc>),
    /// A host symbol invoked through the uniform thunk.
    Host(NonNull<HostFunc>),
}

/// A callable function reference, as stored in tables and embedded in `call`
/// frame immediates.
///
/// One exists per function index of every module (imported slots proxy their
/// resolved target). All fields are written during linking and immutable
/// afterwards.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VMFuncRef {
    pub ty: NonNull<FuncType>,
    pub kind: FuncRefKind,
}

// SAFETY: immutable after linking; referents live as long as the registry.
unsafe impl Send for VMFuncRef {}
// SAFETY: as above.
unsafe impl Sync for VMFuncRef {}

impl VMFuncRef {
    pub(crate) fn uninit(ty: NonNull<FuncType>) -> Self {
        Self {
            ty,
            kind: FuncRefKind::Uninit,
        }
    }

    /// The signature this reference was created with.
    ///
    /// # Safety
    ///
    /// Callable only while the owning registry is alive.
    #[inline]
    pub(crate) unsafe fn ty(&self) -> &FuncType {
        self.ty.as_ref()
    }
}
