use crate::const_expr::{ConstExpr, ConstOp};
use crate::indices::GlobalIndex;
use crate::types::WasmValType;
use crate::vmval::VMVal;
use smallvec::SmallVec;

/// Evaluates constant initializer expressions.
///
/// `global.get` operands are resolved through the caller-supplied resolver,
/// which is where import-chain walking, immutability enforcement, and cycle
/// detection happen.
#[derive(Debug, Default)]
pub struct ConstExprEvaluator {
    stack: SmallVec<[(VMVal, WasmValType); 2]>,
}

impl ConstExprEvaluator {
    pub fn eval(
        &mut self,
        expr: &ConstExpr,
        mut resolve_global: impl FnMut(GlobalIndex) -> crate::Result<(VMVal, WasmValType)>,
    ) -> crate::Result<(VMVal, WasmValType)> {
        match expr.op() {
            ConstOp::I32Const(value) => self.push(VMVal::i32(value), WasmValType::I32),
            ConstOp::I64Const(value) => self.push(VMVal::i64(value), WasmValType::I64),
            ConstOp::F32Const(bits) => self.push(VMVal::f32(bits), WasmValType::F32),
            ConstOp::F64Const(bits) => self.push(VMVal::f64(bits), WasmValType::F64),
            ConstOp::GlobalGet(index) => {
                let (value, ty) = resolve_global(index)?;
                self.push(value, ty);
            }
        }

        debug_assert_eq!(self.stack.len(), 1);
        Ok(self.stack.pop().expect("empty stack"))
    }

    fn push(&mut self, val: VMVal, ty: WasmValType) {
        self.stack.push((val, ty));
    }
}
