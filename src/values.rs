use crate::types::WasmValType;
use crate::vmval::VMVal;
use crate::enum_accessors;

/// A scalar value that a WebAssembly module can consume or produce.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Val {
    /// A 32-bit integer.
    I32(i32),
    /// A 64-bit integer.
    I64(i64),
    /// A 32-bit float.
    ///
    /// Note that the raw bits of the float are stored here, and you can use
    /// `f32::from_bits` to create an `f32` value.
    F32(u32),
    /// A 64-bit float.
    ///
    /// Note that the raw bits of the float are stored here, and you can use
    /// `f64::from_bits` to create an `f64` value.
    F64(u64),
}

impl Val {
    /// The type of this value.
    #[inline]
    pub fn ty(&self) -> WasmValType {
        match self {
            Val::I32(_) => WasmValType::I32,
            Val::I64(_) => WasmValType::I64,
            Val::F32(_) => WasmValType::F32,
            Val::F64(_) => WasmValType::F64,
        }
    }

    pub(crate) fn as_vmval(&self) -> VMVal {
        match self {
            Val::I32(i) => VMVal::i32(*i),
            Val::I64(i) => VMVal::i64(*i),
            Val::F32(u) => VMVal::f32(*u),
            Val::F64(u) => VMVal::f64(*u),
        }
    }

    pub(crate) fn from_vmval(raw: VMVal, ty: WasmValType) -> Self {
        match ty {
            WasmValType::I32 => Self::I32(raw.get_i32()),
            WasmValType::I64 => Self::I64(raw.get_i64()),
            WasmValType::F32 => Self::F32(raw.get_f32()),
            WasmValType::F64 => Self::F64(raw.get_f64()),
        }
    }

    enum_accessors! {
        e
        (I32(i32) is_i32 i32 unwrap_i32 *e)
        (I64(i64) is_i64 i64 unwrap_i64 *e)
        (F32(f32) is_f32 f32 unwrap_f32 f32::from_bits(*e))
        (F64(f64) is_f64 f64 unwrap_f64 f64::from_bits(*e))
    }
}

impl From<i32> for Val {
    #[inline]
    fn from(val: i32) -> Val {
        Val::I32(val)
    }
}

impl From<i64> for Val {
    #[inline]
    fn from(val: i64) -> Val {
        Val::I64(val)
    }
}

impl From<f32> for Val {
    #[inline]
    fn from(val: f32) -> Val {
        Val::F32(val.to_bits())
    }
}

impl From<f64> for Val {
    #[inline]
    fn from(val: f64) -> Val {
        Val::F64(val.to_bits())
    }
}
