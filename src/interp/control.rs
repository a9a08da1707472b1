//! Control-flow, call, and parametric handlers.
//!
//! Branch frames carry `[target][result_bytes][dest_offset]`: the target is
//! an absolute pointer into the code stream (patched once the stream is
//! frozen), `dest_offset` is the byte depth of the target's operand stack
//! relative to `bp`, and `result_bytes` is how many bytes of block results
//! ride the branch. The translator flushes the stack-top rings before every
//! control instruction, so these handlers only deal with the packed stack.

use super::{
    goto, imm, pop, push, read_val, write_val, zero_val, Activation, Op, OpResult, Regs, Step,
};
use crate::func::{FuncRefKind, HostFunc, VMFuncRef};
use crate::table::Table;
use crate::traps::Trap;
use crate::types::FuncType;
use core::ptr;
use smallvec::SmallVec;

/// Unwind to a branch target: move the riding results down to the target
/// depth and reset `sp` and `ip`.
#[inline(always)]
unsafe fn take_branch(regs: &mut Regs, target: usize, result_bytes: usize, dest: usize) {
    let src = regs.sp.sub(result_bytes);
    let dst = regs.bp.add(dest);
    if src != dst {
        ptr::copy(src, dst, result_bytes);
    }
    regs.sp = dst.add(result_bytes);
    regs.ip = target as *const usize;
}

pub(crate) mod unreachable {
    use super::*;

    unsafe fn exec(_regs: &mut Regs, _act: &mut Activation) -> OpResult {
        Err(Trap::Unreachable)
    }

    pub(crate) static OP: Op = exec;
}

pub(crate) mod br {
    use super::*;

    pub(crate) unsafe fn tail(regs: &mut Regs, _act: &mut Activation) -> OpResult {
        regs.ip = regs.ip.add(1);
        let target = imm(regs);
        let result_bytes = imm(regs);
        let dest = imm(regs);
        take_branch(regs, target, result_bytes, dest);
        goto(regs)
    }

    pub(crate) unsafe fn byref(regs: &mut Regs, _act: &mut Activation) -> OpResult {
        regs.ip = regs.ip.add(1);
        let target = imm(regs);
        let result_bytes = imm(regs);
        let dest = imm(regs);
        take_branch(regs, target, result_bytes, dest);
        Ok(Step::Next)
    }

    pub(crate) static TAIL: Op = tail;
    pub(crate) static BYREF: Op = byref;
}

/// `br_if`: branch when the popped condition is non-zero.
pub(crate) mod br_if {
    use super::*;

    #[inline(always)]
    unsafe fn exec(regs: &mut Regs) {
        let target = imm(regs);
        let result_bytes = imm(regs);
        let dest = imm(regs);
        let cond: i32 = pop(regs);
        if cond != 0 {
            take_branch(regs, target, result_bytes, dest);
        }
    }

    pub(crate) unsafe fn tail(regs: &mut Regs, _act: &mut Activation) -> OpResult {
        regs.ip = regs.ip.add(1);
        exec(regs);
        goto(regs)
    }

    pub(crate) unsafe fn byref(regs: &mut Regs, _act: &mut Activation) -> OpResult {
        regs.ip = regs.ip.add(1);
        exec(regs);
        Ok(Step::Next)
    }

    pub(crate) static TAIL: Op = tail;
    pub(crate) static BYREF: Op = byref;
}

/// The inverted form emitted for `if`: branch to the else/end target when
/// the condition is zero.
pub(crate) mod br_unless {
    use super::*;

    #[inline(always)]
    unsafe fn exec(regs: &mut Regs) {
        let target = imm(regs);
        let result_bytes = imm(regs);
        let dest = imm(regs);
        let cond: i32 = pop(regs);
        if cond == 0 {
            take_branch(regs, target, result_bytes, dest);
        }
    }

    pub(crate) unsafe fn tail(regs: &mut Regs, _act: &mut Activation) -> OpResult {
        regs.ip = regs.ip.add(1);
        exec(regs);
        goto(regs)
    }

    pub(crate) unsafe fn byref(regs: &mut Regs, _act: &mut Activation) -> OpResult {
        regs.ip = regs.ip.add(1);
        exec(regs);
        Ok(Step::Next)
    }

    pub(crate) static TAIL: Op = tail;
    pub(crate) static BYREF: Op = byref;
}

/// `br_table`: `[count][(count + 1) x (target, result_bytes, dest)]`, the
/// last entry being the default. The popped index selects an entry, clamped
/// to the default.
pub(crate) mod br_table {
    use super::*;

    #[inline(always)]
    unsafe fn exec(regs: &mut Regs) {
        let count = imm(regs);
        let entries = regs.ip;
        let index = pop::<u32>(regs) as usize;
        let index = index.min(count);
        let entry = entries.add(index * 3);
        let target = *entry;
        let result_bytes = *entry.add(1);
        let dest = *entry.add(2);
        take_branch(regs, target, result_bytes, dest);
    }

    pub(crate) unsafe fn tail(regs: &mut Regs, _act: &mut Activation) -> OpResult {
        regs.ip = regs.ip.add(1);
        exec(regs);
        goto(regs)
    }

    pub(crate) unsafe fn byref(regs: &mut Regs, _act: &mut Activation) -> OpResult {
        regs.ip = regs.ip.add(1);
        exec(regs);
        Ok(Step::Next)
    }

    pub(crate) static TAIL: Op = tail;
    pub(crate) static BYREF: Op = byref;
}

/// Function return: move the results to the frame base and stop the driver.
pub(crate) mod ret {
    use super::*;

    unsafe fn exec(regs: &mut Regs, _act: &mut Activation) -> OpResult {
        regs.ip = regs.ip.add(1);
        let result_bytes = imm(regs);
        let src = regs.sp.sub(result_bytes);
        if src != regs.bp {
            ptr::copy(src, regs.bp, result_bytes);
        }
        Ok(Step::Return)
    }

    pub(crate) static OP: Op = exec;
}

#[inline(never)]
unsafe fn call_host(regs: &mut Regs, host: &HostFunc) -> Result<(), Trap> {
    let ty = host.ty();
    let base = regs.sp.sub(ty.param_bytes());

    let mut args: SmallVec<[crate::Val; 4]> = SmallVec::new();
    let mut offset = 0;
    for param in ty.params.iter() {
        args.push(read_val(base.add(offset), *param));
        offset += param.byte_size();
    }

    let mut results: SmallVec<[crate::Val; 4]> =
        ty.results.iter().map(|ty| zero_val(*ty)).collect();
    host.invoke(&args, &mut results)?;

    regs.sp = base;
    for (result, declared) in results.iter().zip(ty.results.iter()) {
        debug_assert_eq!(result.ty(), *declared);
        write_val(regs.sp, *result);
        regs.sp = regs.sp.add(declared.byte_size());
    }
    Ok(())
}

/// Common call path: arguments are the top `param_bytes` of the packed
/// stack, in declaration order; results replace them.
#[inline(always)]
unsafe fn call_ref(regs: &mut Regs, act: &mut Activation, func_ref: &VMFuncRef) -> Result<(), Trap> {
    match func_ref.kind {
        FuncRefKind::Wasm(func) => {
            let func = func.as_ref();
            let callee_bp = regs.sp.sub(func.param_bytes);
            super::run_func(func, callee_bp, act)?;
            regs.sp = callee_bp.add(func.result_bytes);
        }
        FuncRefKind::Host(host) => call_host(regs, host.as_ref())?,
        FuncRefKind::Uninit => unreachable!("function reference never wired"),
    }
    Ok(())
}

/// Direct call. Frame: `[handler][func_ref]`.
pub(crate) mod call {
    use super::*;

    pub(crate) unsafe fn tail(regs: &mut Regs, act: &mut Activation) -> OpResult {
        regs.ip = regs.ip.add(1);
        let func_ref = &*(imm(regs) as *const VMFuncRef);
        call_ref(regs, act, func_ref)?;
        goto(regs)
    }

    pub(crate) unsafe fn byref(regs: &mut Regs, act: &mut Activation) -> OpResult {
        regs.ip = regs.ip.add(1);
        let func_ref = &*(imm(regs) as *const VMFuncRef);
        call_ref(regs, act, func_ref)?;
        Ok(Step::Next)
    }

    pub(crate) static TAIL: Op = tail;
    pub(crate) static BYREF: Op = byref;
}

/// Indirect call. Frame: `[handler][table_ref][expected_type]`. The callee
/// is fetched from the table by the popped i32 index and its signature is
/// checked structurally before any argument is touched.
pub(crate) mod call_indirect {
    use super::*;

    #[inline(always)]
    unsafe fn callee<'a>(regs: &mut Regs) -> Result<&'a VMFuncRef, Trap> {
        let table = &*(imm(regs) as *const Table);
        let expected = &*(imm(regs) as *const FuncType);
        let index = pop::<u32>(regs);

        let slot = table
            .get(index as usize)
            .ok_or(Trap::TableOutOfBounds {
                index: u64::from(index),
                size: table.len() as u64,
            })?;
        let func_ref = slot.ok_or(Trap::IndirectCallToNull)?;
        let func_ref = func_ref.as_ref();
        if func_ref.ty() != expected {
            return Err(Trap::IndirectCallTypeMismatch);
        }
        Ok(func_ref)
    }

    pub(crate) unsafe fn tail(regs: &mut Regs, act: &mut Activation) -> OpResult {
        regs.ip = regs.ip.add(1);
        let func_ref = callee(regs)?;
        call_ref(regs, act, func_ref)?;
        goto(regs)
    }

    pub(crate) unsafe fn byref(regs: &mut Regs, act: &mut Activation) -> OpResult {
        regs.ip = regs.ip.add(1);
        let func_ref = callee(regs)?;
        call_ref(regs, act, func_ref)?;
        Ok(Step::Next)
    }

    pub(crate) static TAIL: Op = tail;
    pub(crate) static BYREF: Op = byref;
}

/// `drop` and `select`, specialized by operand width. Emitted uncached.
macro_rules! parametric {
    ($drop:ident, $select:ident, $t:ty) => {
        pub(crate) mod $drop {
            use super::*;

            pub(crate) unsafe fn tail(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let _: $t = pop(regs);
                goto(regs)
            }

            pub(crate) unsafe fn byref(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let _: $t = pop(regs);
                Ok(Step::Next)
            }

            pub(crate) static TAIL: Op = tail;
            pub(crate) static BYREF: Op = byref;
        }

        pub(crate) mod $select {
            use super::*;

            #[inline(always)]
            unsafe fn exec(regs: &mut Regs) {
                let cond: i32 = pop(regs);
                let v2: $t = pop(regs);
                let v1: $t = pop(regs);
                push(regs, if cond != 0 { v1 } else { v2 });
            }

            pub(crate) unsafe fn tail(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                exec(regs);
                goto(regs)
            }

            pub(crate) unsafe fn byref(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                exec(regs);
                Ok(Step::Next)
            }

            pub(crate) static TAIL: Op = tail;
            pub(crate) static BYREF: Op = byref;
        }
    };
}

parametric!(drop_32, select_32, u32);
parametric!(drop_64, select_64, u64);
