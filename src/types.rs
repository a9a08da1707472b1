use crate::wasm_unsupported;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

/// The closed set of WebAssembly 1.0 scalar value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WasmValType {
    I32,
    I64,
    F32,
    F64,
}

impl WasmValType {
    /// Size of a value of this type on the packed operand stack and in the
    /// locals slab.
    #[inline]
    pub fn byte_size(self) -> usize {
        match self {
            WasmValType::I32 | WasmValType::F32 => 4,
            WasmValType::I64 | WasmValType::F64 => 8,
        }
    }

    pub(crate) fn from_wasmparser(ty: wasmparser::ValType) -> crate::Result<Self> {
        match ty {
            wasmparser::ValType::I32 => Ok(Self::I32),
            wasmparser::ValType::I64 => Ok(Self::I64),
            wasmparser::ValType::F32 => Ok(Self::F32),
            wasmparser::ValType::F64 => Ok(Self::F64),
            ty => Err(wasm_unsupported!("value type {ty:?}")),
        }
    }
}

impl fmt::Display for WasmValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WasmValType::I32 => "i32",
            WasmValType::I64 => "i64",
            WasmValType::F32 => "f32",
            WasmValType::F64 => "f64",
        })
    }
}

/// A WebAssembly function signature.
///
/// Equality is structural: both lists must match in length and element-wise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FuncType {
    pub params: Box<[WasmValType]>,
    pub results: Box<[WasmValType]>,
}

impl FuncType {
    pub fn new(
        params: impl IntoIterator<Item = WasmValType>,
        results: impl IntoIterator<Item = WasmValType>,
    ) -> Self {
        Self {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }

    pub(crate) fn from_wasmparser(ty: &wasmparser::FuncType) -> crate::Result<Self> {
        let params = ty
            .params()
            .iter()
            .map(|ty| WasmValType::from_wasmparser(*ty))
            .collect::<crate::Result<Vec<_>>>()?;
        let results = ty
            .results()
            .iter()
            .map(|ty| WasmValType::from_wasmparser(*ty))
            .collect::<crate::Result<Vec<_>>>()?;
        Ok(Self {
            params: params.into_boxed_slice(),
            results: results.into_boxed_slice(),
        })
    }

    /// Bytes the parameters occupy on the packed operand stack.
    pub(crate) fn param_bytes(&self) -> usize {
        self.params.iter().map(|ty| ty.byte_size()).sum()
    }

    /// Bytes the results occupy on the packed operand stack.
    pub(crate) fn result_bytes(&self) -> usize {
        self.results.iter().map(|ty| ty.byte_size()).sum()
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(func")?;
        for p in &self.params {
            write!(f, " (param {p})")?;
        }
        for r in &self.results {
            write!(f, " (result {r})")?;
        }
        f.write_str(")")
    }
}

/// Size limits for a table or memory, in elements or pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u64,
    pub max: Option<u64>,
}

impl Limits {
    /// Does `self` (the actual limit) satisfy `expected`?
    ///
    /// `L_a` satisfies `L_e` iff `L_a.min >= L_e.min` and, when `L_e.max` is
    /// present, `L_a.max` is present and `L_a.max <= L_e.max`.
    pub fn is_compatible_with(&self, expected: &Limits) -> bool {
        if self.min < expected.min {
            return false;
        }
        match expected.max {
            None => true,
            Some(expected_max) => match self.max {
                Some(actual_max) => actual_max <= expected_max,
                None => false,
            },
        }
    }
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{}..{max}", self.min),
            None => write!(f, "{}..", self.min),
        }
    }
}

/// A pre-processed version of `wasmparser::MemoryType` describing how we'll
/// implement the memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    /// Minimum and maximum page counts.
    pub limits: Limits,
    /// The log2 of this memory's page size, in bytes.
    ///
    /// By default the page size is 64KiB (2**16), but the custom-page-sizes
    /// proposal allows smaller powers of two.
    pub page_size_log2: u8,
}

impl MemoryType {
    /// WebAssembly page sizes are 64KiB by default.
    pub const DEFAULT_PAGE_SIZE_LOG2: u8 = 16;

    pub(crate) fn from_wasmparser(ty: wasmparser::MemoryType) -> crate::Result<Self> {
        if ty.memory64 {
            return Err(wasm_unsupported!("64-bit memory"));
        }
        if ty.shared {
            return Err(wasm_unsupported!("shared memory"));
        }
        let page_size_log2 = match ty.page_size_log2 {
            Some(log2) => u8::try_from(log2)
                .ok()
                .filter(|log2| *log2 <= Self::DEFAULT_PAGE_SIZE_LOG2)
                .ok_or_else(|| wasm_unsupported!("memory page size 2^{}", log2))?,
            None => Self::DEFAULT_PAGE_SIZE_LOG2,
        };
        Ok(Self {
            limits: Limits {
                min: ty.initial,
                max: ty.maximum,
            },
            page_size_log2,
        })
    }

    /// Get the size of this memory's pages, in bytes.
    pub fn page_size(&self) -> u64 {
        1 << self.page_size_log2
    }

    /// The minimum size, in bytes, that this memory must be. `None` if the
    /// calculation overflows.
    pub fn minimum_byte_size(&self) -> Option<u64> {
        self.limits.min.checked_mul(self.page_size())
    }

    /// The maximum size, in bytes, that this memory is allowed to grow to.
    ///
    /// When no maximum is declared the index-space bound applies instead.
    pub fn maximum_byte_size(&self) -> Option<u64> {
        match self.limits.max {
            Some(max) => max.checked_mul(self.page_size()),
            None => Some(crate::WASM32_MAX_SIZE),
        }
    }

    /// The hard page-count ceiling for `memory.grow`: the declared maximum
    /// clamped to the wasm32 index space.
    pub fn grow_limit_pages(&self) -> u64 {
        let index_space_pages = crate::WASM32_MAX_SIZE >> self.page_size_log2;
        self.limits.max.unwrap_or(u64::MAX).min(index_space_pages)
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(memory {})", self.limits)?;
        if self.page_size_log2 != Self::DEFAULT_PAGE_SIZE_LOG2 {
            write!(f, " (pagesize {})", self.page_size())?;
        }
        Ok(())
    }
}

/// A table of function references with the given limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    /// Minimum and maximum element counts.
    pub limits: Limits,
}

impl TableType {
    pub(crate) fn from_wasmparser(ty: wasmparser::TableType) -> crate::Result<Self> {
        if !ty.element_type.is_func_ref() {
            return Err(wasm_unsupported!("table element type {}", ty.element_type));
        }
        if ty.table64 || ty.shared {
            return Err(wasm_unsupported!("64-bit or shared table"));
        }
        Ok(Self {
            limits: Limits {
                min: ty.initial,
                max: ty.maximum,
            },
        })
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(table {} funcref)", self.limits)
    }
}

/// The type of a global variable: its content kind and mutability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub content: WasmValType,
    pub mutable: bool,
}

impl GlobalType {
    pub(crate) fn from_wasmparser(ty: wasmparser::GlobalType) -> crate::Result<Self> {
        if ty.shared {
            return Err(wasm_unsupported!("shared global"));
        }
        Ok(Self {
            content: WasmValType::from_wasmparser(ty.content_type)?,
            mutable: ty.mutable,
        })
    }
}

impl fmt::Display for GlobalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mutable {
            write!(f, "(global (mut {}))", self.content)
        } else {
            write!(f, "(global {})", self.content)
        }
    }
}

/// The descriptor of an importable/exportable entity, used in link-error
/// records so the host can render both sides of a mismatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternDesc {
    Func(FuncType),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

impl fmt::Display for ExternDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternDesc::Func(ty) => ty.fmt(f),
            ExternDesc::Table(ty) => ty.fmt(f),
            ExternDesc::Memory(ty) => ty.fmt(f),
            ExternDesc::Global(ty) => ty.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_compatibility() {
        let unbounded = Limits { min: 1, max: None };
        let bounded = Limits {
            min: 2,
            max: Some(4),
        };

        assert!(bounded.is_compatible_with(&unbounded));
        assert!(!unbounded.is_compatible_with(&bounded));
        assert!(bounded.is_compatible_with(&Limits {
            min: 1,
            max: Some(4)
        }));
        assert!(!bounded.is_compatible_with(&Limits {
            min: 3,
            max: Some(4)
        }));
        assert!(!bounded.is_compatible_with(&Limits {
            min: 1,
            max: Some(3)
        }));
    }

    #[test]
    fn func_type_equality_is_structural() {
        let a = FuncType::new([WasmValType::I32, WasmValType::I64], [WasmValType::I32]);
        let b = FuncType::new([WasmValType::I32, WasmValType::I64], [WasmValType::I32]);
        let c = FuncType::new([WasmValType::I32], [WasmValType::I32]);
        let d = FuncType::new([WasmValType::I32, WasmValType::F64], [WasmValType::I32]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }
}
