use crate::indices::GlobalIndex;
use crate::Error;

/// A WebAssembly 1.0 constant expression: exactly one opcode followed by
/// `end`.
///
/// Used to initialize globals and to compute active-segment offsets.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstExpr {
    op: ConstOp,
    /// Offset of the opcode in the module binary, kept for error records.
    offset: usize,
}

impl ConstExpr {
    /// Converts a `wasmparser::ConstExpr` into a `ConstExpr`, rejecting
    /// anything outside the one-opcode 1.0 subset.
    pub fn from_wasmparser(expr: wasmparser::ConstExpr<'_>) -> crate::Result<Self> {
        use wasmparser::Operator;

        let mut iter = expr
            .get_operators_reader()
            .into_iter_with_offsets()
            .peekable();

        let mut parsed = None;
        while let Some(res) = iter.next() {
            let (op, offset) = res?;

            if matches!(op, Operator::End) && iter.peek().is_none() {
                break;
            }

            let op = match op {
                Operator::I32Const { value } => ConstOp::I32Const(value),
                Operator::I64Const { value } => ConstOp::I64Const(value),
                Operator::F32Const { value } => ConstOp::F32Const(value.bits()),
                Operator::F64Const { value } => ConstOp::F64Const(value.bits()),
                Operator::GlobalGet { global_index } => {
                    ConstOp::GlobalGet(GlobalIndex::from_u32(global_index))
                }
                _ => {
                    return Err(Error::InitInvalidConstExpr {
                        opcode: opcode_byte(&expr),
                        offset,
                    })
                }
            };
            if parsed.replace((op, offset)).is_some() {
                // More than one operand-producing opcode.
                return Err(Error::InitInvalidConstExpr {
                    opcode: opcode_byte(&expr),
                    offset,
                });
            }
        }

        let (op, offset) = parsed.ok_or(Error::InitInvalidConstExpr {
            opcode: 0x0B, // bare `end`
            offset: 0,
        })?;
        Ok(Self { op, offset })
    }

    pub(crate) fn op(&self) -> ConstOp {
        self.op
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }
}

fn opcode_byte(expr: &wasmparser::ConstExpr<'_>) -> u8 {
    expr.get_binary_reader().read_u8().unwrap_or(0)
}

/// A constant operation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConstOp {
    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),
    GlobalGet(GlobalIndex),
}
