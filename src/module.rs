use crate::const_expr::ConstExpr;
use crate::indices::{
    DefinedFuncIndex, DefinedGlobalIndex, EntityIndex, FuncIndex, GlobalIndex, MemoryIndex,
    TableIndex, TypeIndex,
};
use crate::types::{FuncType, GlobalType, MemoryType, TableType};
use crate::wasm_unsupported;
use alloc::boxed::Box;
use alloc::vec::Vec;
use cranelift_entity::PrimaryMap;
use hashbrown::HashMap;
use wasmparser::{
    DataKind, DataSectionReader, ElementItems, ElementKind, ElementSectionReader,
    ExportSectionReader, ExternalKind, FunctionBody, FunctionSectionReader, FuncToValidate,
    GlobalSectionReader, ImportSectionReader, MemorySectionReader, Parser, Payload,
    TableInit, TableSectionReader, TypeRef, TypeSectionReader, Validator, ValidatorResources,
};

/// A parsed, validated WebAssembly 1.0 module.
///
/// This is the input contract of the execution core: the byte-level decoding
/// and validation are `wasmparser`'s job, and everything downstream (linker,
/// translator, interpreter) may assume a well-formed module.
#[derive(Debug, Default)]
pub struct ParsedModule<'wasm> {
    pub(crate) types: PrimaryMap<TypeIndex, FuncType>,

    /// Signature of every function, imported ones first.
    pub(crate) functions: PrimaryMap<FuncIndex, TypeIndex>,
    pub(crate) tables: PrimaryMap<TableIndex, TableType>,
    pub(crate) memories: PrimaryMap<MemoryIndex, MemoryType>,
    pub(crate) globals: PrimaryMap<GlobalIndex, GlobalType>,
    pub(crate) global_initializers: PrimaryMap<DefinedGlobalIndex, ConstExpr>,

    pub(crate) imports: Vec<Import<'wasm>>,
    pub(crate) exports: HashMap<&'wasm str, EntityIndex>,

    pub(crate) element_segments: Vec<ElementSegment>,
    pub(crate) data_segments: Vec<DataSegment<'wasm>>,

    pub(crate) function_bodies: PrimaryMap<DefinedFuncIndex, FuncBody<'wasm>>,
    pub(crate) start: Option<FuncIndex>,

    pub(crate) num_imported_functions: u32,
    pub(crate) num_imported_tables: u32,
    pub(crate) num_imported_memories: u32,
    pub(crate) num_imported_globals: u32,
}

#[derive(Debug)]
pub(crate) struct Import<'wasm> {
    pub module: &'wasm str,
    pub name: &'wasm str,
    pub ty: EntityIndex,
}

/// An active element segment.
#[derive(Debug)]
pub(crate) struct ElementSegment {
    pub table_index: TableIndex,
    pub offset: ConstExpr,
    pub functions: Box<[FuncIndex]>,
}

/// An active data segment.
#[derive(Debug)]
pub(crate) struct DataSegment<'wasm> {
    pub memory_index: MemoryIndex,
    pub offset: ConstExpr,
    pub bytes: &'wasm [u8],
}

#[derive(Debug)]
pub(crate) struct FuncBody<'wasm> {
    pub body: FunctionBody<'wasm>,
    pub validator: FuncToValidate<ValidatorResources>,
}

impl<'wasm> ParsedModule<'wasm> {
    /// Parse and validate a binary module.
    pub fn parse(validator: &mut Validator, data: &'wasm [u8]) -> crate::Result<Self> {
        let mut parser = Parser::default();
        parser.set_features(*validator.features());

        let mut module = ParsedModule::default();
        for payload in parser.parse_all(data) {
            module.parse_payload(validator, payload?)?;
        }
        validator.reset();

        if module.memories.len() > 1 {
            return Err(wasm_unsupported!("multiple memories"));
        }
        Ok(module)
    }

    fn parse_payload(
        &mut self,
        validator: &mut Validator,
        payload: Payload<'wasm>,
    ) -> crate::Result<()> {
        match payload {
            Payload::Version {
                num,
                encoding,
                range,
            } => {
                validator.version(num, encoding, &range)?;
            }
            Payload::End(offset) => {
                validator.end(offset)?;
            }
            Payload::TypeSection(types) => {
                validator.type_section(&types)?;
                self.read_type_section(types)?;
            }
            Payload::ImportSection(imports) => {
                validator.import_section(&imports)?;
                self.read_import_section(imports)?;
            }
            Payload::FunctionSection(functions) => {
                validator.function_section(&functions)?;
                self.read_function_section(functions)?;
            }
            Payload::TableSection(tables) => {
                validator.table_section(&tables)?;
                self.read_table_section(tables)?;
            }
            Payload::MemorySection(memories) => {
                validator.memory_section(&memories)?;
                self.read_memory_section(memories)?;
            }
            Payload::TagSection(tags) => {
                validator.tag_section(&tags)?;
                return Err(wasm_unsupported!("exception handling"));
            }
            Payload::GlobalSection(globals) => {
                validator.global_section(&globals)?;
                self.read_global_section(globals)?;
            }
            Payload::ExportSection(exports) => {
                validator.export_section(&exports)?;
                self.read_export_section(exports)?;
            }
            Payload::StartSection { func, range } => {
                validator.start_section(func, &range)?;
                self.start = Some(FuncIndex::from_u32(func));
            }
            Payload::ElementSection(elements) => {
                validator.element_section(&elements)?;
                self.read_element_section(elements)?;
            }
            Payload::DataCountSection { count, range } => {
                validator.data_count_section(count, &range)?;
            }
            Payload::DataSection(section) => {
                validator.data_section(&section)?;
                self.read_data_section(section)?;
            }
            Payload::CodeSectionStart { count, range, .. } => {
                validator.code_section_start(count, &range)?;
                self.function_bodies.reserve_exact(count as usize);
            }
            Payload::CodeSectionEntry(body) => {
                let validator = validator.code_section_entry(&body)?;
                self.function_bodies.push(FuncBody { body, validator });
            }
            Payload::CustomSection(sec) => {
                tracing::trace!("skipping custom section `{}`", sec.name());
            }
            Payload::ModuleSection { .. }
            | Payload::InstanceSection(_)
            | Payload::CoreTypeSection(_)
            | Payload::ComponentSection { .. }
            | Payload::ComponentInstanceSection(_)
            | Payload::ComponentAliasSection(_)
            | Payload::ComponentTypeSection(_)
            | Payload::ComponentCanonicalSection(_)
            | Payload::ComponentStartSection { .. }
            | Payload::ComponentImportSection(_)
            | Payload::ComponentExportSection(_) => {
                return Err(wasm_unsupported!("component module"));
            }
            p => tracing::trace!("unknown section {p:?}"),
        }

        Ok(())
    }

    fn read_type_section(&mut self, types: TypeSectionReader<'wasm>) -> crate::Result<()> {
        self.types.reserve_exact(types.count() as usize);
        for ty in types.into_iter_err_on_gc_types() {
            self.types.push(FuncType::from_wasmparser(&ty?)?);
        }
        Ok(())
    }

    fn read_import_section(&mut self, imports: ImportSectionReader<'wasm>) -> crate::Result<()> {
        self.imports.reserve_exact(imports.count() as usize);

        for import in imports {
            let import = import?;
            let ty = match import.ty {
                TypeRef::Func(index) => {
                    self.num_imported_functions += 1;
                    EntityIndex::Function(
                        self.functions.push(TypeIndex::from_u32(index)),
                    )
                }
                TypeRef::Table(ty) => {
                    self.num_imported_tables += 1;
                    EntityIndex::Table(self.tables.push(TableType::from_wasmparser(ty)?))
                }
                TypeRef::Memory(ty) => {
                    self.num_imported_memories += 1;
                    EntityIndex::Memory(self.memories.push(MemoryType::from_wasmparser(ty)?))
                }
                TypeRef::Global(ty) => {
                    self.num_imported_globals += 1;
                    EntityIndex::Global(self.globals.push(GlobalType::from_wasmparser(ty)?))
                }
                TypeRef::Tag(_) => return Err(wasm_unsupported!("exception handling")),
            };

            self.imports.push(Import {
                module: import.module,
                name: import.name,
                ty,
            });
        }

        Ok(())
    }

    fn read_function_section(
        &mut self,
        functions: FunctionSectionReader<'wasm>,
    ) -> crate::Result<()> {
        self.functions.reserve_exact(functions.count() as usize);
        for index in functions {
            self.functions.push(TypeIndex::from_u32(index?));
        }
        Ok(())
    }

    fn read_table_section(&mut self, tables: TableSectionReader<'wasm>) -> crate::Result<()> {
        self.tables.reserve_exact(tables.count() as usize);
        for table in tables {
            let table = table?;
            if !matches!(table.init, TableInit::RefNull) {
                return Err(wasm_unsupported!("table init expression"));
            }
            self.tables.push(TableType::from_wasmparser(table.ty)?);
        }
        Ok(())
    }

    fn read_memory_section(&mut self, memories: MemorySectionReader<'wasm>) -> crate::Result<()> {
        self.memories.reserve_exact(memories.count() as usize);
        for ty in memories {
            self.memories.push(MemoryType::from_wasmparser(ty?)?);
        }
        Ok(())
    }

    fn read_global_section(&mut self, globals: GlobalSectionReader<'wasm>) -> crate::Result<()> {
        self.globals.reserve_exact(globals.count() as usize);
        for global in globals {
            let global = global?;
            self.globals.push(GlobalType::from_wasmparser(global.ty)?);
            self.global_initializers
                .push(ConstExpr::from_wasmparser(global.init_expr)?);
        }
        Ok(())
    }

    fn read_export_section(&mut self, exports: ExportSectionReader<'wasm>) -> crate::Result<()> {
        for export in exports {
            let export = export?;
            let index = match export.kind {
                ExternalKind::Func => EntityIndex::Function(FuncIndex::from_u32(export.index)),
                ExternalKind::Table => EntityIndex::Table(TableIndex::from_u32(export.index)),
                ExternalKind::Memory => EntityIndex::Memory(MemoryIndex::from_u32(export.index)),
                ExternalKind::Global => EntityIndex::Global(GlobalIndex::from_u32(export.index)),
                ExternalKind::Tag => return Err(wasm_unsupported!("exception handling")),
            };
            self.exports.insert(export.name, index);
        }
        Ok(())
    }

    fn read_element_section(
        &mut self,
        elements: ElementSectionReader<'wasm>,
    ) -> crate::Result<()> {
        for element in elements {
            let element = element?;

            let functions = match element.items {
                ElementItems::Functions(funcs) => {
                    let mut out = Vec::with_capacity(funcs.count() as usize);
                    for func_idx in funcs {
                        out.push(FuncIndex::from_u32(func_idx?));
                    }
                    out.into_boxed_slice()
                }
                ElementItems::Expressions(..) => {
                    return Err(wasm_unsupported!("element expressions"));
                }
            };

            match element.kind {
                ElementKind::Active {
                    table_index,
                    offset_expr,
                } => {
                    self.element_segments.push(ElementSegment {
                        table_index: TableIndex::from_u32(table_index.unwrap_or(0)),
                        offset: ConstExpr::from_wasmparser(offset_expr)?,
                        functions,
                    });
                }
                ElementKind::Passive | ElementKind::Declared => {
                    return Err(wasm_unsupported!("passive element segment"));
                }
            }
        }
        Ok(())
    }

    fn read_data_section(&mut self, section: DataSectionReader<'wasm>) -> crate::Result<()> {
        for entry in section {
            let entry = entry?;
            match entry.kind {
                DataKind::Active {
                    memory_index,
                    offset_expr,
                } => {
                    self.data_segments.push(DataSegment {
                        memory_index: MemoryIndex::from_u32(memory_index),
                        offset: ConstExpr::from_wasmparser(offset_expr)?,
                        bytes: entry.data,
                    });
                }
                DataKind::Passive => return Err(wasm_unsupported!("passive data segment")),
            }
        }
        Ok(())
    }

    // === index space helpers =============================================

    #[inline]
    pub(crate) fn func_index(&self, index: DefinedFuncIndex) -> FuncIndex {
        FuncIndex::from_u32(self.num_imported_functions + index.as_u32())
    }

    #[inline]
    pub(crate) fn defined_func_index(&self, index: FuncIndex) -> Option<DefinedFuncIndex> {
        if self.is_imported_func(index) {
            None
        } else {
            Some(DefinedFuncIndex::from_u32(
                index.as_u32() - self.num_imported_functions,
            ))
        }
    }

    #[inline]
    pub(crate) fn is_imported_func(&self, index: FuncIndex) -> bool {
        index.as_u32() < self.num_imported_functions
    }

    #[inline]
    pub(crate) fn defined_table_index(
        &self,
        index: TableIndex,
    ) -> Option<crate::indices::DefinedTableIndex> {
        if index.as_u32() < self.num_imported_tables {
            None
        } else {
            Some(crate::indices::DefinedTableIndex::from_u32(
                index.as_u32() - self.num_imported_tables,
            ))
        }
    }

    #[inline]
    pub(crate) fn defined_memory_index(
        &self,
        index: MemoryIndex,
    ) -> Option<crate::indices::DefinedMemoryIndex> {
        if index.as_u32() < self.num_imported_memories {
            None
        } else {
            Some(crate::indices::DefinedMemoryIndex::from_u32(
                index.as_u32() - self.num_imported_memories,
            ))
        }
    }

    #[inline]
    pub(crate) fn defined_global_index(&self, index: GlobalIndex) -> Option<DefinedGlobalIndex> {
        if index.as_u32() < self.num_imported_globals {
            None
        } else {
            Some(DefinedGlobalIndex::from_u32(
                index.as_u32() - self.num_imported_globals,
            ))
        }
    }

    #[inline]
    pub(crate) fn global_index(&self, index: DefinedGlobalIndex) -> GlobalIndex {
        GlobalIndex::from_u32(self.num_imported_globals + index.as_u32())
    }

    /// The signature of a function by its index in the full function space.
    pub(crate) fn func_type(&self, index: FuncIndex) -> &FuncType {
        &self.types[self.functions[index]]
    }

    /// Iterate exports as `(name, entity)` pairs.
    pub fn exports(&self) -> impl Iterator<Item = (&'wasm str, EntityIndex)> + '_ {
        self.exports.iter().map(|(name, index)| (*name, *index))
    }
}
