//! The linker/initializer.
//!
//! Runs once, after all modules are registered and before any execution:
//! best-effort import resolution, unresolved-import errors, linked-type
//! validation (walking import chains with cycle detection), global
//! finalization (a memoized fix-point over the `global.get` DAG), segment
//! offset evaluation, body translation, active-segment application, and
//! finally the start functions.

use crate::const_eval::ConstExprEvaluator;
use crate::const_expr::ConstOp;
use crate::func::{FuncRefKind, VMFuncRef};
use crate::global::InitState;
use crate::indices::{FuncIndex, GlobalIndex, MemoryIndex, TableIndex, TypeIndex};
use crate::memory::BoundsPolicy;
use crate::registry::{
    ExportTarget, FuncLink, GlobalLink, ImportedFunc, ImportedGlobal, ImportedMemory,
    ImportedTable, MemoryLink, ModuleRuntime, Registry, TableLink,
};
use crate::translate::{translate_func, CompileOption, TranslateEnv};
use crate::types::{ExternDesc, FuncType, WasmValType};
use crate::vmval::VMVal;
use crate::{interp, Error};
use alloc::string::ToString;
use alloc::vec::Vec;
use core::mem;
use core::ptr::NonNull;
use cranelift_entity::PrimaryMap;
use hashbrown::HashSet;

/// Wires and initializes all modules of a registry.
pub struct Linker {
    options: CompileOption,
}

impl Default for Linker {
    fn default() -> Self {
        Self::new(CompileOption::default())
    }
}

impl Linker {
    pub fn new(options: CompileOption) -> Self {
        Self { options }
    }

    /// Run every link and initialization phase. On success the registry is
    /// ready for invocation; on failure it should be discarded.
    pub fn initialize(&self, registry: &mut Registry<'_>) -> crate::Result<()> {
        assert!(!registry.linked, "registry already linked");

        self.resolve_imports(registry);
        self.check_resolved(registry)?;
        self.validate_links(registry)?;
        self.finalize_globals(registry)?;
        self.finalize_segment_offsets(registry)?;
        self.translate_bodies(registry)?;
        self.wire_func_refs(registry);
        self.apply_element_segments(registry)?;
        self.apply_data_segments(registry)?;
        registry.linked = true;
        self.run_start_functions(registry)?;

        tracing::debug!("linked {} modules", registry.modules.len());
        Ok(())
    }

    // === phase 2: best-effort resolution ================================

    fn resolve_imports(&self, registry: &mut Registry<'_>) {
        fn lookup(registry: &mut Registry<'_>, module: &str, name: &str) -> Option<ExportTarget> {
            let index = *registry.by_name.get(module)?;
            let rt = &mut registry.modules[index];
            let entity = rt.parsed.exports.get(name).copied()?;
            Some(rt.export_target(entity))
        }

        for mi in 0..registry.modules.len() {
            for fi in 0..registry.modules[mi].imported_funcs.len() {
                let (module, name) = {
                    let slot = &registry.modules[mi].imported_funcs[fi];
                    (slot.module.clone(), slot.name.clone())
                };
                let link = match lookup(registry, &module, &name) {
                    Some(ExportTarget::DefinedFunc(target)) => FuncLink::Defined(target),
                    Some(ExportTarget::ImportedFunc(target)) => FuncLink::Chain(target),
                    Some(_) => FuncLink::Unresolved,
                    None => match registry.host_funcs.get(&(module, name)) {
                        Some(host) => FuncLink::Host(NonNull::from(&**host)),
                        None => FuncLink::Unresolved,
                    },
                };
                registry.modules[mi].imported_funcs[fi].link = link;
            }

            for ti in 0..registry.modules[mi].imported_tables.len() {
                let (module, name) = {
                    let slot = &registry.modules[mi].imported_tables[ti];
                    (slot.module.clone(), slot.name.clone())
                };
                let link = match lookup(registry, &module, &name) {
                    Some(ExportTarget::DefinedTable(target)) => TableLink::Defined(target),
                    Some(ExportTarget::ImportedTable(target)) => TableLink::Chain(target),
                    _ => TableLink::Unresolved,
                };
                registry.modules[mi].imported_tables[ti].link = link;
            }

            for ii in 0..registry.modules[mi].imported_memories.len() {
                let (module, name) = {
                    let slot = &registry.modules[mi].imported_memories[ii];
                    (slot.module.clone(), slot.name.clone())
                };
                let link = match lookup(registry, &module, &name) {
                    Some(ExportTarget::DefinedMemory(target)) => MemoryLink::Defined(target),
                    Some(ExportTarget::ImportedMemory(target)) => MemoryLink::Chain(target),
                    _ => MemoryLink::Unresolved,
                };
                registry.modules[mi].imported_memories[ii].link = link;
            }

            for gi in 0..registry.modules[mi].imported_globals.len() {
                let (module, name) = {
                    let slot = &registry.modules[mi].imported_globals[gi];
                    (slot.module.clone(), slot.name.clone())
                };
                let link = match lookup(registry, &module, &name) {
                    Some(ExportTarget::DefinedGlobal(target)) => GlobalLink::Defined(target),
                    Some(ExportTarget::ImportedGlobal(target)) => GlobalLink::Chain(target),
                    _ => GlobalLink::Unresolved,
                };
                registry.modules[mi].imported_globals[gi].link = link;
            }
        }
    }

    // === phase 3: unresolved imports are fatal ==========================

    fn check_resolved(&self, registry: &Registry<'_>) -> crate::Result<()> {
        for rt in &registry.modules {
            for slot in &rt.imported_funcs {
                if matches!(slot.link, FuncLink::Unresolved) {
                    return Err(unresolved(&slot.module, &slot.name, &rt.name));
                }
            }
            for slot in &rt.imported_tables {
                if matches!(slot.link, TableLink::Unresolved) {
                    return Err(unresolved(&slot.module, &slot.name, &rt.name));
                }
            }
            for slot in &rt.imported_memories {
                if matches!(slot.link, MemoryLink::Unresolved) {
                    return Err(unresolved(&slot.module, &slot.name, &rt.name));
                }
            }
            for slot in &rt.imported_globals {
                if matches!(slot.link, GlobalLink::Unresolved) {
                    return Err(unresolved(&slot.module, &slot.name, &rt.name));
                }
            }
        }
        Ok(())
    }

    // === phase 4: linked-type validation ================================

    fn validate_links(&self, registry: &Registry<'_>) -> crate::Result<()> {
        for rt in &registry.modules {
            for slot in &rt.imported_funcs {
                let expected = &rt.parsed.types[slot.ty];
                let actual = resolve_func_type(slot)?;
                if *expected != actual {
                    return Err(Error::LinkTypeMismatch {
                        module: slot.module.clone(),
                        name: slot.name.clone(),
                        expected: ExternDesc::Func(expected.clone()),
                        actual: ExternDesc::Func(actual),
                    });
                }
            }

            for slot in &rt.imported_tables {
                let table = resolve_table_slot(slot)?;
                // SAFETY: resolved link into a registry-owned record.
                let actual = unsafe { table.as_ref() }.ty();
                if !actual.limits.is_compatible_with(&slot.ty.limits) {
                    return Err(Error::LinkTypeMismatch {
                        module: slot.module.clone(),
                        name: slot.name.clone(),
                        expected: ExternDesc::Table(slot.ty),
                        actual: ExternDesc::Table(*actual),
                    });
                }
            }

            for slot in &rt.imported_memories {
                let memory = resolve_memory_slot(slot)?;
                // SAFETY: as above.
                let actual = unsafe { memory.as_ref() }.ty();
                if !actual.limits.is_compatible_with(&slot.ty.limits)
                    || actual.page_size_log2 != slot.ty.page_size_log2
                {
                    return Err(Error::LinkTypeMismatch {
                        module: slot.module.clone(),
                        name: slot.name.clone(),
                        expected: ExternDesc::Memory(slot.ty),
                        actual: ExternDesc::Memory(*actual),
                    });
                }
            }

            for slot in &rt.imported_globals {
                let global = resolve_global_slot(slot)?;
                // SAFETY: as above.
                let actual = unsafe { global.as_ref() }.ty();
                if *actual != slot.ty {
                    return Err(Error::LinkTypeMismatch {
                        module: slot.module.clone(),
                        name: slot.name.clone(),
                        expected: ExternDesc::Global(slot.ty),
                        actual: ExternDesc::Global(*actual),
                    });
                }
            }
        }
        Ok(())
    }

    // === phase 5: global finalization ===================================

    /// Evaluate every local global's one-opcode initializer. `global.get`
    /// initializers form a DAG across modules; a fix-point over all
    /// uninitialized globals evaluates them in dependency order, and lack of
    /// progress means a reference cycle.
    fn finalize_globals(&self, registry: &mut Registry<'_>) -> crate::Result<()> {
        loop {
            let mut progressed = false;
            let mut pending = None;

            for mi in 0..registry.modules.len() {
                for dg in 0..registry.modules[mi].globals.len() {
                    let rt = &registry.modules[mi];
                    let dg_index = crate::indices::DefinedGlobalIndex::from_u32(dg as u32);
                    let global = &rt.globals[dg_index];
                    if global.init_state() == InitState::Initialized {
                        continue;
                    }
                    global.set_init_state(InitState::Initializing);

                    let expr = &rt.parsed.global_initializers[dg_index];
                    let outcome = match expr.op() {
                        ConstOp::I32Const(value) => Ready(VMVal::i32(value)),
                        ConstOp::I64Const(value) => Ready(VMVal::i64(value)),
                        ConstOp::F32Const(bits) => Ready(VMVal::f32(bits)),
                        ConstOp::F64Const(bits) => Ready(VMVal::f64(bits)),
                        ConstOp::GlobalGet(index) => {
                            resolve_initializer_global(rt, index, expr.offset())?
                        }
                    };

                    match outcome {
                        Ready(value) => {
                            global.set(value);
                            global.set_init_state(InitState::Initialized);
                            progressed = true;
                        }
                        NotReady => {
                            global.set_init_state(InitState::Uninitialized);
                            pending = Some((rt.name.clone(), rt.parsed.global_index(dg_index)));
                        }
                    }
                }
            }

            match pending {
                None => return Ok(()),
                Some((module, global)) if !progressed => {
                    return Err(Error::InitGlobalCycle {
                        module,
                        global: global.as_u32(),
                    });
                }
                Some(_) => {}
            }
        }
    }

    // === phase 6: segment offsets =======================================

    fn finalize_segment_offsets(&self, registry: &mut Registry<'_>) -> crate::Result<()> {
        let mut evaluator = ConstExprEvaluator::default();
        for mi in 0..registry.modules.len() {
            let (element_offsets, data_offsets) = {
                let rt = &*registry.modules[mi];
                let element_offsets = rt
                    .parsed
                    .element_segments
                    .iter()
                    .map(|segment| eval_offset(rt, &mut evaluator, &segment.offset))
                    .collect::<crate::Result<Vec<u32>>>()?;
                let data_offsets = rt
                    .parsed
                    .data_segments
                    .iter()
                    .map(|segment| eval_offset(rt, &mut evaluator, &segment.offset))
                    .collect::<crate::Result<Vec<u32>>>()?;
                (element_offsets, data_offsets)
            };
            registry.modules[mi].element_offsets = element_offsets;
            registry.modules[mi].data_offsets = data_offsets;
        }
        Ok(())
    }

    // === translation + function-reference wiring ========================

    fn translate_bodies(&self, registry: &mut Registry<'_>) -> crate::Result<()> {
        for mi in 0..registry.modules.len() {
            let bodies = mem::take(&mut registry.modules[mi].parsed.function_bodies);
            let rt = &*registry.modules[mi];
            let env = ModuleEnv { module: rt };

            let mut funcs = PrimaryMap::with_capacity(bodies.len());
            for (defined, body) in bodies.into_iter() {
                let index = rt.parsed.func_index(defined);
                let ty = rt.parsed.func_type(index).clone();
                funcs.push(translate_func(
                    &env,
                    &self.options,
                    &ty,
                    &body.body,
                    body.validator,
                )?);
            }

            tracing::trace!("translated {} functions of `{}`", funcs.len(), rt.name);
            registry.modules[mi].funcs = funcs;
        }
        Ok(())
    }

    fn wire_func_refs(&self, registry: &mut Registry<'_>) {
        // Defined functions first, so chains can copy from their providers.
        for rt in &mut registry.modules {
            let ModuleRuntime {
                parsed,
                funcs,
                func_refs,
                ..
            } = &mut **rt;
            for (index, func_ref) in func_refs.iter_mut() {
                if let Some(defined) = parsed.defined_func_index(index) {
                    func_ref.kind = FuncRefKind::Wasm(NonNull::from(&funcs[defined]));
                }
            }
        }

        for mi in 0..registry.modules.len() {
            for fi in 0..registry.modules[mi].imported_funcs.len() {
                let kind = {
                    let slot = &registry.modules[mi].imported_funcs[fi];
                    match resolved_func_kind(slot) {
                        ResolvedFunc::Wasm(func_ref) => {
                            // SAFETY: provider references were wired above.
                            unsafe { func_ref.as_ref() }.kind
                        }
                        ResolvedFunc::Host(host) => FuncRefKind::Host(host),
                    }
                };
                let index = FuncIndex::from_u32(fi as u32);
                registry.modules[mi].func_refs[index].kind = kind;
            }
        }
    }

    // === phase 7: active segments =======================================

    fn apply_element_segments(&self, registry: &mut Registry<'_>) -> crate::Result<()> {
        for mi in 0..registry.modules.len() {
            let rt = &registry.modules[mi];
            for (si, segment) in rt.parsed.element_segments.iter().enumerate() {
                let offset = rt.element_offsets[si] as usize;
                let mut table = rt.resolve_table(segment.table_index);
                // SAFETY: the registry exclusively owns the table; we hold
                // the only mutable access during linking.
                let table = unsafe { table.as_mut() };

                let end = offset.checked_add(segment.functions.len());
                if end.map(|end| end > table.len()).unwrap_or(true) {
                    return Err(Error::InitSegmentOutOfBounds {
                        offset: offset as u64,
                        len: segment.functions.len() as u64,
                        capacity: table.len() as u64,
                    });
                }
                for (k, func_index) in segment.functions.iter().enumerate() {
                    table.set(offset + k, NonNull::from(&rt.func_refs[*func_index]));
                }
            }
        }
        Ok(())
    }

    fn apply_data_segments(&self, registry: &mut Registry<'_>) -> crate::Result<()> {
        for rt in &registry.modules {
            for (si, segment) in rt.parsed.data_segments.iter().enumerate() {
                let offset = rt.data_offsets[si] as usize;
                let memory = rt.resolve_memory(segment.memory_index);
                // SAFETY: resolved link into a registry-owned record.
                let memory = unsafe { memory.as_ref() };
                memory.init_slice(offset, segment.bytes).map_err(|len| {
                    Error::InitSegmentOutOfBounds {
                        offset: offset as u64,
                        len: segment.bytes.len() as u64,
                        capacity: len,
                    }
                })?;
            }
        }
        Ok(())
    }

    // === start functions ================================================

    fn run_start_functions(&self, registry: &Registry<'_>) -> crate::Result<()> {
        for rt in &registry.modules {
            if let Some(start) = rt.parsed.start {
                tracing::debug!("running start function of `{}`", rt.name);
                interp::invoke_funcref(&rt.func_refs[start], &[])?;
            }
        }
        Ok(())
    }
}

fn unresolved(module: &str, name: &str, importer: &str) -> Error {
    Error::LinkUnresolved {
        module: module.to_string(),
        name: name.to_string(),
        importer: importer.to_string(),
    }
}

fn circular(module: &str, name: &str) -> Error {
    Error::LinkCircular {
        module: module.to_string(),
        name: name.to_string(),
    }
}

// === chain walking ======================================================

enum ResolvedFunc {
    Wasm(NonNull<VMFuncRef>),
    Host(NonNull<crate::HostFunc>),
}

/// Follow a function import chain to its concrete provider. Assumes phase 4
/// proved the chain acyclic.
fn resolved_func_kind(slot: &ImportedFunc) -> ResolvedFunc {
    let mut current = slot;
    loop {
        match current.link {
            // SAFETY: links point into registry-owned records.
            FuncLink::Chain(next) => current = unsafe { next.as_ref() },
            FuncLink::Defined(func_ref) => return ResolvedFunc::Wasm(func_ref),
            FuncLink::Host(host) => return ResolvedFunc::Host(host),
            FuncLink::Unresolved => unreachable!("unresolved import after linking"),
        }
    }
}

/// As above but with cycle detection, for phase 4.
fn resolve_func_type(slot: &ImportedFunc) -> crate::Result<FuncType> {
    let mut visited = HashSet::new();
    let mut current = slot;
    loop {
        if !visited.insert(current as *const ImportedFunc as usize) {
            return Err(circular(&slot.module, &slot.name));
        }
        match current.link {
            // SAFETY: links point into registry-owned records.
            FuncLink::Chain(next) => current = unsafe { next.as_ref() },
            // SAFETY: the reference's type pointer is valid for the
            // registry's lifetime.
            FuncLink::Defined(func_ref) => {
                return Ok(unsafe { func_ref.as_ref().ty() }.clone())
            }
            FuncLink::Host(host) => return Ok(unsafe { host.as_ref() }.ty().clone()),
            FuncLink::Unresolved => unreachable!("checked in phase 3"),
        }
    }
}

fn resolve_table_slot(slot: &ImportedTable) -> crate::Result<NonNull<crate::table::Table>> {
    let mut visited = HashSet::new();
    let mut current = slot;
    loop {
        if !visited.insert(current as *const ImportedTable as usize) {
            return Err(circular(&slot.module, &slot.name));
        }
        match current.link {
            // SAFETY: links point into registry-owned records.
            TableLink::Chain(next) => current = unsafe { next.as_ref() },
            TableLink::Defined(table) => return Ok(table),
            TableLink::Unresolved => unreachable!("checked in phase 3"),
        }
    }
}

fn resolve_memory_slot(slot: &ImportedMemory) -> crate::Result<NonNull<crate::Memory>> {
    let mut visited = HashSet::new();
    let mut current = slot;
    loop {
        if !visited.insert(current as *const ImportedMemory as usize) {
            return Err(circular(&slot.module, &slot.name));
        }
        match current.link {
            // SAFETY: links point into registry-owned records.
            MemoryLink::Chain(next) => current = unsafe { next.as_ref() },
            MemoryLink::Defined(memory) => return Ok(memory),
            MemoryLink::Unresolved => unreachable!("checked in phase 3"),
        }
    }
}

fn resolve_global_slot(slot: &ImportedGlobal) -> crate::Result<NonNull<crate::global::Global>> {
    let mut visited = HashSet::new();
    let mut current = slot;
    loop {
        if !visited.insert(current as *const ImportedGlobal as usize) {
            return Err(circular(&slot.module, &slot.name));
        }
        match current.link {
            // SAFETY: links point into registry-owned records.
            GlobalLink::Chain(next) => current = unsafe { next.as_ref() },
            GlobalLink::Defined(global) => return Ok(global),
            GlobalLink::Unresolved => unreachable!("checked in phase 3"),
        }
    }
}

// === global initializer support =========================================

use GlobalInitOutcome::{NotReady, Ready};

enum GlobalInitOutcome {
    Ready(VMVal),
    NotReady,
}

/// Resolve a `global.get` initializer operand: it must reference an
/// immutable imported global of matching kind; a target still being
/// initialized through its own chain is a self-reference.
fn resolve_initializer_global(
    rt: &ModuleRuntime<'_>,
    index: GlobalIndex,
    offset: usize,
) -> crate::Result<GlobalInitOutcome> {
    const GLOBAL_GET: u8 = 0x23;

    // Referencing a locally-defined global is outside the 1.0 constant
    // subset.
    if rt.parsed.defined_global_index(index).is_some() {
        return Err(Error::InitInvalidConstExpr {
            opcode: GLOBAL_GET,
            offset,
        });
    }
    let slot = &rt.imported_globals[index.as_u32() as usize];
    if slot.ty.mutable {
        return Err(Error::InitInvalidConstExpr {
            opcode: GLOBAL_GET,
            offset,
        });
    }

    let target = resolve_global_slot(slot)?;
    // SAFETY: resolved link into a registry-owned record.
    let target = unsafe { target.as_ref() };
    match target.init_state() {
        InitState::Initialized => Ok(Ready(target.get())),
        InitState::Uninitialized => Ok(NotReady),
        // Only the global currently being evaluated is in this state, so
        // the chain led straight back to it.
        InitState::Initializing => Err(Error::InitGlobalCycle {
            module: rt.name.clone(),
            global: index.as_u32(),
        }),
    }
}

fn eval_offset(
    rt: &ModuleRuntime<'_>,
    evaluator: &mut ConstExprEvaluator,
    expr: &crate::ConstExpr,
) -> crate::Result<u32> {
    let (value, ty) = evaluator.eval(expr, |index| {
        if rt.parsed.defined_global_index(index).is_some() {
            // Offsets may only read imported globals.
            return Err(Error::InitInvalidConstExpr {
                opcode: 0x23,
                offset: expr.offset(),
            });
        }
        let slot = &rt.imported_globals[index.as_u32() as usize];
        if slot.ty.mutable {
            return Err(Error::InitInvalidConstExpr {
                opcode: 0x23,
                offset: expr.offset(),
            });
        }
        let global = resolve_global_slot(slot)?;
        // SAFETY: resolved link into a registry-owned record.
        let global = unsafe { global.as_ref() };
        Ok((global.get(), global.ty().content))
    })?;

    if ty != WasmValType::I32 {
        return Err(Error::InitInvalidConstExpr {
            opcode: 0x23,
            offset: expr.offset(),
        });
    }
    Ok(value.get_u32())
}

// === translation environment ============================================

struct ModuleEnv<'a, 'wasm> {
    module: &'a ModuleRuntime<'wasm>,
}

impl TranslateEnv for ModuleEnv<'_, '_> {
    fn func_type(&self, index: FuncIndex) -> &FuncType {
        self.module.parsed.func_type(index)
    }

    fn func_ref_ptr(&self, index: FuncIndex) -> usize {
        &self.module.func_refs[index] as *const VMFuncRef as usize
    }

    fn global_type(&self, index: GlobalIndex) -> WasmValType {
        self.module.parsed.globals[index].content
    }

    fn global_ptr(&self, index: GlobalIndex) -> usize {
        self.module.resolve_global(index).as_ptr() as usize
    }

    fn memory_ptr(&self, index: MemoryIndex) -> usize {
        self.module.resolve_memory(index).as_ptr() as usize
    }

    fn memory_policy(&self, index: MemoryIndex) -> BoundsPolicy {
        // SAFETY: resolved link into a registry-owned record.
        unsafe { self.module.resolve_memory(index).as_ref() }.bounds_policy()
    }

    fn memory_grow_limit(&self, index: MemoryIndex) -> u64 {
        // SAFETY: as above.
        unsafe { self.module.resolve_memory(index).as_ref() }.grow_limit_pages()
    }

    fn table_ptr(&self, index: TableIndex) -> usize {
        self.module.resolve_table(index).as_ptr() as usize
    }

    fn type_ptr(&self, index: TypeIndex) -> usize {
        &self.module.parsed.types[index] as *const FuncType as usize
    }

    fn signature(&self, index: TypeIndex) -> &FuncType {
        &self.module.parsed.types[index]
    }
}
