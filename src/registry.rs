use crate::func::{HostFunc, VMFuncRef};
use crate::global::Global;
use crate::indices::{
    DefinedGlobalIndex, DefinedMemoryIndex, DefinedTableIndex, EntityIndex, FuncIndex,
    GlobalIndex, MemoryIndex, TableIndex, TypeIndex,
};
use crate::interp;
use crate::memory::{Memory, MemoryBackendKind};
use crate::module::ParsedModule;
use crate::table::Table;
use crate::translate::TranslatedFunc;
use crate::types::{GlobalType, MemoryType, TableType};
use crate::values::Val;
use crate::Error;
use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::ptr::NonNull;
use cranelift_entity::PrimaryMap;
use hashbrown::HashMap;
use smallvec::SmallVec;

/// The kind of an exported entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternKind {
    Func,
    Table,
    Memory,
    Global,
}

/// A resolved reference to a module's export, for hosts.
#[derive(Debug)]
pub enum ExportRef<'reg> {
    Func(&'reg crate::FuncType),
    Table(&'reg Table),
    Memory(&'reg Memory),
    Global(&'reg Global),
}

/// An imported function slot: the parsed descriptor plus its link.
#[derive(Debug)]
pub(crate) struct ImportedFunc {
    pub module: String,
    pub name: String,
    /// Declared signature, an index into the importing module's types.
    pub ty: TypeIndex,
    pub link: FuncLink,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum FuncLink {
    Unresolved,
    /// The provider's export is itself an import: follow its slot.
    Chain(NonNull<ImportedFunc>),
    /// A concrete provider (wasm or host, via its wired reference).
    Defined(NonNull<VMFuncRef>),
    /// A host symbol registered in the registry.
    Host(NonNull<HostFunc>),
}

#[derive(Debug)]
pub(crate) struct ImportedTable {
    pub module: String,
    pub name: String,
    pub ty: TableType,
    pub link: TableLink,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum TableLink {
    Unresolved,
    Chain(NonNull<ImportedTable>),
    Defined(NonNull<Table>),
}

#[derive(Debug)]
pub(crate) struct ImportedMemory {
    pub module: String,
    pub name: String,
    pub ty: MemoryType,
    pub link: MemoryLink,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum MemoryLink {
    Unresolved,
    Chain(NonNull<ImportedMemory>),
    Defined(NonNull<Memory>),
}

#[derive(Debug)]
pub(crate) struct ImportedGlobal {
    pub module: String,
    pub name: String,
    pub ty: GlobalType,
    pub link: GlobalLink,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum GlobalLink {
    Unresolved,
    Chain(NonNull<ImportedGlobal>),
    Defined(NonNull<Global>),
}

/// Everything the runtime stores for one loaded module.
///
/// Records are boxed on registration and never move; every cross-module link
/// is a raw pointer into a sibling record, valid for the registry's
/// lifetime. Per-module vectors are built once and never reallocated after
/// linking, so interior pointers (globals, memories, function references)
/// are stable too.
#[derive(Debug)]
pub(crate) struct ModuleRuntime<'wasm> {
    pub name: String,
    pub parsed: ParsedModule<'wasm>,

    pub imported_funcs: Vec<ImportedFunc>,
    pub imported_tables: Vec<ImportedTable>,
    pub imported_memories: Vec<ImportedMemory>,
    pub imported_globals: Vec<ImportedGlobal>,

    pub tables: PrimaryMap<DefinedTableIndex, Table>,
    pub memories: PrimaryMap<DefinedMemoryIndex, Memory>,
    pub globals: PrimaryMap<DefinedGlobalIndex, Global>,
    /// Translated bodies, filled by the linker once imports are resolved.
    pub funcs: PrimaryMap<crate::indices::DefinedFuncIndex, TranslatedFunc>,
    /// One callable reference per function index (imported slots proxy
    /// their resolved target); wired after translation.
    pub func_refs: PrimaryMap<FuncIndex, VMFuncRef>,

    /// Active-segment offsets, evaluated by the linker once imported
    /// globals are readable.
    pub element_offsets: Vec<u32>,
    pub data_offsets: Vec<u32>,
}

/// Where a module's export leads, before following import chains.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ExportTarget {
    DefinedFunc(NonNull<VMFuncRef>),
    ImportedFunc(NonNull<ImportedFunc>),
    DefinedTable(NonNull<Table>),
    ImportedTable(NonNull<ImportedTable>),
    DefinedMemory(NonNull<Memory>),
    ImportedMemory(NonNull<ImportedMemory>),
    DefinedGlobal(NonNull<Global>),
    ImportedGlobal(NonNull<ImportedGlobal>),
}

impl<'wasm> ModuleRuntime<'wasm> {
    pub(crate) fn export_target(&mut self, index: EntityIndex) -> ExportTarget {
        match index {
            EntityIndex::Function(index) => {
                if self.parsed.is_imported_func(index) {
                    ExportTarget::ImportedFunc(NonNull::from(
                        &mut self.imported_funcs[index.as_u32() as usize],
                    ))
                } else {
                    ExportTarget::DefinedFunc(NonNull::from(&mut self.func_refs[index]))
                }
            }
            EntityIndex::Table(index) => match self.parsed.defined_table_index(index) {
                Some(defined) => ExportTarget::DefinedTable(NonNull::from(&mut self.tables[defined])),
                None => ExportTarget::ImportedTable(NonNull::from(
                    &mut self.imported_tables[index.as_u32() as usize],
                )),
            },
            EntityIndex::Memory(index) => match self.parsed.defined_memory_index(index) {
                Some(defined) => {
                    ExportTarget::DefinedMemory(NonNull::from(&mut self.memories[defined]))
                }
                None => ExportTarget::ImportedMemory(NonNull::from(
                    &mut self.imported_memories[index.as_u32() as usize],
                )),
            },
            EntityIndex::Global(index) => match self.parsed.defined_global_index(index) {
                Some(defined) => {
                    ExportTarget::DefinedGlobal(NonNull::from(&mut self.globals[defined]))
                }
                None => ExportTarget::ImportedGlobal(NonNull::from(
                    &mut self.imported_globals[index.as_u32() as usize],
                )),
            },
        }
    }

    /// Resolve a module-level memory index to the concrete backing memory,
    /// following import links (valid once linking has resolved them).
    pub(crate) fn resolve_memory(&self, index: MemoryIndex) -> NonNull<Memory> {
        match self.parsed.defined_memory_index(index) {
            Some(defined) => NonNull::from(&self.memories[defined]),
            None => {
                let mut slot = &self.imported_memories[index.as_u32() as usize];
                loop {
                    match slot.link {
                        // SAFETY: links were resolved and proven acyclic by
                        // the linker.
                        MemoryLink::Chain(next) => slot = unsafe { next.as_ref() },
                        MemoryLink::Defined(memory) => return memory,
                        MemoryLink::Unresolved => unreachable!("unresolved memory import"),
                    }
                }
            }
        }
    }

    pub(crate) fn resolve_table(&self, index: TableIndex) -> NonNull<Table> {
        match self.parsed.defined_table_index(index) {
            Some(defined) => NonNull::from(&self.tables[defined]),
            None => {
                let mut slot = &self.imported_tables[index.as_u32() as usize];
                loop {
                    match slot.link {
                        // SAFETY: as in `resolve_memory`.
                        TableLink::Chain(next) => slot = unsafe { next.as_ref() },
                        TableLink::Defined(table) => return table,
                        TableLink::Unresolved => unreachable!("unresolved table import"),
                    }
                }
            }
        }
    }

    pub(crate) fn resolve_global(&self, index: GlobalIndex) -> NonNull<Global> {
        match self.parsed.defined_global_index(index) {
            Some(defined) => NonNull::from(&self.globals[defined]),
            None => {
                let mut slot = &self.imported_globals[index.as_u32() as usize];
                loop {
                    match slot.link {
                        // SAFETY: as in `resolve_memory`.
                        GlobalLink::Chain(next) => slot = unsafe { next.as_ref() },
                        GlobalLink::Defined(global) => return global,
                        GlobalLink::Unresolved => unreachable!("unresolved global import"),
                    }
                }
            }
        }
    }
}

/// The owner of every loaded module and host function.
///
/// The registry maps module names to runtime records and exclusively owns
/// them; import links across records are non-owning pointers that stay valid
/// for the registry's lifetime. Executions on other threads share the
/// registry immutably once linking is done.
#[derive(Debug)]
pub struct Registry<'wasm> {
    /// Records in registration order (which is also segment-application and
    /// start-function order).
    pub(crate) modules: Vec<Box<ModuleRuntime<'wasm>>>,
    pub(crate) by_name: HashMap<String, usize>,
    pub(crate) host_funcs: HashMap<(String, String), Box<HostFunc>>,
    pub(crate) backend: MemoryBackendKind,
    pub(crate) linked: bool,
}

// SAFETY: the raw links only reference registry-owned data; shared use after
// linking is read-only apart from the interior-mutable runtime cells
// (memories, globals), which carry their own synchronization story.
unsafe impl Send for Registry<'_> {}
// SAFETY: as above.
unsafe impl Sync for Registry<'_> {}

impl Default for Registry<'_> {
    fn default() -> Self {
        Self::new(MemoryBackendKind::default())
    }
}

impl<'wasm> Registry<'wasm> {
    pub fn new(backend: MemoryBackendKind) -> Self {
        Self {
            modules: Vec::new(),
            by_name: HashMap::new(),
            host_funcs: HashMap::new(),
            backend,
            linked: false,
        }
    }

    /// Register a parsed module under `name`, building its runtime record:
    /// import slots (unresolved), defined tables/memories/globals, and one
    /// function reference per function index.
    pub fn register(&mut self, name: &str, parsed: ParsedModule<'wasm>) -> crate::Result<()> {
        if self.by_name.contains_key(name) {
            return Err(Error::DuplicateModule(name.to_string()));
        }
        assert!(!self.linked, "modules must be registered before linking");

        let num_elements = parsed.element_segments.len();
        let num_datas = parsed.data_segments.len();
        let mut module = Box::new(ModuleRuntime {
            name: name.to_string(),
            parsed,
            imported_funcs: Vec::new(),
            imported_tables: Vec::new(),
            imported_memories: Vec::new(),
            imported_globals: Vec::new(),
            tables: PrimaryMap::new(),
            memories: PrimaryMap::new(),
            globals: PrimaryMap::new(),
            funcs: PrimaryMap::new(),
            func_refs: PrimaryMap::new(),
            element_offsets: Vec::with_capacity(num_elements),
            data_offsets: Vec::with_capacity(num_datas),
        });

        {
            let ModuleRuntime {
                parsed,
                imported_funcs,
                imported_tables,
                imported_memories,
                imported_globals,
                tables,
                memories,
                globals,
                func_refs,
                ..
            } = &mut *module;
            let parsed = &*parsed;

            for import in &parsed.imports {
                match import.ty {
                    EntityIndex::Function(index) => imported_funcs.push(ImportedFunc {
                        module: import.module.to_string(),
                        name: import.name.to_string(),
                        ty: parsed.functions[index],
                        link: FuncLink::Unresolved,
                    }),
                    EntityIndex::Table(index) => imported_tables.push(ImportedTable {
                        module: import.module.to_string(),
                        name: import.name.to_string(),
                        ty: parsed.tables[index],
                        link: TableLink::Unresolved,
                    }),
                    EntityIndex::Memory(index) => imported_memories.push(ImportedMemory {
                        module: import.module.to_string(),
                        name: import.name.to_string(),
                        ty: parsed.memories[index],
                        link: MemoryLink::Unresolved,
                    }),
                    EntityIndex::Global(index) => imported_globals.push(ImportedGlobal {
                        module: import.module.to_string(),
                        name: import.name.to_string(),
                        ty: parsed.globals[index],
                        link: GlobalLink::Unresolved,
                    }),
                }
            }

            for (index, ty) in parsed.tables.iter() {
                if parsed.defined_table_index(index).is_some() {
                    tables.push(Table::new(*ty));
                }
            }
            for (index, ty) in parsed.memories.iter() {
                if parsed.defined_memory_index(index).is_some() {
                    memories.push(Memory::new(*ty, index.as_u32(), self.backend)?);
                }
            }
            for (index, ty) in parsed.globals.iter() {
                if parsed.defined_global_index(index).is_some() {
                    globals.push(Global::new(*ty));
                }
            }

            for (_, ty_index) in parsed.functions.iter() {
                func_refs.push(VMFuncRef::uninit(NonNull::from(&parsed.types[*ty_index])));
            }
        }

        tracing::debug!(
            "registered module `{name}`: {} imports, {} functions",
            module.parsed.imports.len(),
            module.parsed.functions.len(),
        );

        self.by_name.insert(name.to_string(), self.modules.len());
        self.modules.push(module);
        Ok(())
    }

    /// Register a host function importable as `(module, name)`.
    pub fn define_host_func(
        &mut self,
        module: &str,
        name: &str,
        func: HostFunc,
    ) -> crate::Result<()> {
        let key = (module.to_string(), name.to_string());
        if self.host_funcs.contains_key(&key) {
            return Err(Error::DuplicateModule(alloc::format!("{module}::{name}")));
        }
        self.host_funcs.insert(key, Box::new(func));
        Ok(())
    }

    pub(crate) fn module_index(&self, name: &str) -> crate::Result<usize> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownModule(name.to_string()))
    }

    /// Invoke an exported function by name with typed arguments.
    ///
    /// Argument types are checked against the callee's signature before any
    /// handler runs; results come back in declaration order.
    pub fn invoke(
        &self,
        module: &str,
        func: &str,
        args: &[Val],
    ) -> crate::Result<SmallVec<[Val; 1]>> {
        assert!(self.linked, "registry must be linked before invocation");
        let rt = &self.modules[self.module_index(module)?];
        let index = *rt
            .parsed
            .exports
            .get(func)
            .ok_or_else(|| Error::UnknownExport {
                module: module.to_string(),
                name: func.to_string(),
            })?;
        let EntityIndex::Function(index) = index else {
            return Err(Error::NotAFunction {
                module: module.to_string(),
                name: func.to_string(),
            });
        };
        interp::invoke_funcref(&rt.func_refs[index], args)
    }

    /// Look up a single export and resolve it to concrete storage.
    pub fn get_export(&self, module: &str, name: &str) -> crate::Result<ExportRef<'_>> {
        assert!(self.linked, "registry must be linked before export access");
        let rt = &self.modules[self.module_index(module)?];
        let index = *rt
            .parsed
            .exports
            .get(name)
            .ok_or_else(|| Error::UnknownExport {
                module: module.to_string(),
                name: name.to_string(),
            })?;
        Ok(self.resolve_export(rt, index))
    }

    /// Iterate a module's exports as `(name, kind, storage)` triples.
    pub fn exports<'reg>(
        &'reg self,
        module: &str,
    ) -> crate::Result<impl Iterator<Item = (&'wasm str, ExternKind, ExportRef<'reg>)> + 'reg>
    {
        assert!(self.linked, "registry must be linked before export access");
        let rt = &self.modules[self.module_index(module)?];
        Ok(rt.parsed.exports().map(move |(name, index)| {
            let kind = match index {
                EntityIndex::Function(_) => ExternKind::Func,
                EntityIndex::Table(_) => ExternKind::Table,
                EntityIndex::Memory(_) => ExternKind::Memory,
                EntityIndex::Global(_) => ExternKind::Global,
            };
            (name, kind, self.resolve_export(rt, index))
        }))
    }

    fn resolve_export<'reg>(
        &'reg self,
        rt: &'reg ModuleRuntime<'wasm>,
        index: EntityIndex,
    ) -> ExportRef<'reg> {
        match index {
            EntityIndex::Function(index) => {
                // SAFETY: the registry outlives the returned reference.
                ExportRef::Func(unsafe { rt.func_refs[index].ty() })
            }
            // SAFETY: resolved links point into registry-owned records.
            EntityIndex::Table(index) => {
                ExportRef::Table(unsafe { rt.resolve_table(index).as_ref() })
            }
            // SAFETY: as above.
            EntityIndex::Memory(index) => {
                ExportRef::Memory(unsafe { rt.resolve_memory(index).as_ref() })
            }
            // SAFETY: as above.
            EntityIndex::Global(index) => {
                ExportRef::Global(unsafe { rt.resolve_global(index).as_ref() })
            }
        }
    }
}
