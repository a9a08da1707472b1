//! The threaded interpreter.
//!
//! Translated code is a flat stream of `usize` words: each frame is the
//! handler word followed by that instruction's immediates. Handlers advance
//! `ip` past their own frame and either return the next handler read from the
//! stream (tail mode) or ask the driver to fetch it (by-reference mode).
//!
//! Values live in two places: a packed byte operand stack (`sp`, 4 bytes for
//! i32/f32, 8 for i64/f64) and the stack-top register file threaded through
//! every handler. Which of the two a given operand occupies is decided at
//! translation time; handlers touching the register file are specialized by
//! ring cursor position.

pub(crate) mod control;
pub(crate) mod memory;
pub(crate) mod numeric;
pub(crate) mod variable;

use crate::func::{FuncRefKind, VMFuncRef};
use crate::translate::TranslatedFunc;
use crate::traps::Trap;
use crate::types::WasmValType;
use crate::values::Val;
use crate::vmval::VMVal;
use crate::{Error, MAX_WASM_STACK};
use alloc::vec;
use alloc::vec::Vec;
use core::mem;
use core::ptr;
use smallvec::SmallVec;

/// Slots per per-type stack-top ring.
pub(crate) const RING: usize = 2;
/// Total register-file slots (one ring per value type).
pub(crate) const STACK_TOP_SLOTS: usize = RING * 4;

/// The registers threaded through every handler.
#[derive(Debug)]
pub(crate) struct Regs {
    /// Instruction pointer into the code-stream words.
    pub ip: *const usize,
    /// Top of the packed operand stack (one past the last byte).
    pub sp: *mut u8,
    /// Base of the current frame's locals slab.
    pub bp: *mut u8,
    /// The stack-top register file.
    pub cache: [VMVal; STACK_TOP_SLOTS],
}

/// Per-execution state reachable from any handler.
pub(crate) struct Activation {
    /// One past the last usable byte of the value-stack slab.
    pub stack_end: *mut u8,
}

/// What a handler tells the driver to do next.
pub(crate) enum Step {
    /// Fetch the next handler from `ip` (by-reference mode).
    Next,
    /// Continue directly with this handler (tail mode).
    Goto(Op),
    /// The current function is done; results are at `bp`.
    Return,
}

pub(crate) type OpResult = Result<Step, Trap>;

/// A specialized opcode handler.
pub(crate) type Op = unsafe fn(&mut Regs, &mut Activation) -> OpResult;

#[inline(always)]
pub(crate) unsafe fn op_from_word(word: usize) -> Op {
    // SAFETY: the word was written by the translator from a handler of
    // exactly this type; the stream is immutable after translation.
    mem::transmute::<usize, Op>(word)
}

#[inline(always)]
pub(crate) fn op_to_word(op: Op) -> usize {
    op as usize
}

/// Read one immediate word and advance `ip`.
#[inline(always)]
pub(crate) unsafe fn imm(regs: &mut Regs) -> usize {
    let word = *regs.ip;
    regs.ip = regs.ip.add(1);
    word
}

cfg_if::cfg_if! {
    if #[cfg(target_pointer_width = "64")] {
        #[inline(always)]
        pub(crate) unsafe fn imm_u64(regs: &mut Regs) -> u64 {
            imm(regs) as u64
        }
    } else {
        #[inline(always)]
        pub(crate) unsafe fn imm_u64(regs: &mut Regs) -> u64 {
            let lo = imm(regs) as u64;
            let hi = imm(regs) as u64;
            lo | (hi << 32)
        }
    }
}

/// Ring cursor arithmetic: a push moves the cursor one slot back, a pop one
/// slot forward.
#[inline(always)]
pub(crate) fn ring_next(c: usize) -> usize {
    (c + 1) % RING
}

#[inline(always)]
pub(crate) fn ring_prev(c: usize) -> usize {
    (c + RING - 1) % RING
}

/// A scalar that can live on the packed operand stack and in the register
/// file.
pub(crate) trait StackTy: Copy {
    /// Bytes occupied on the packed stack.
    const SIZE: usize;
    /// First register-file slot of this type's ring.
    const RING_BASE: usize;
    /// Little-endian unaligned read.
    unsafe fn read(p: *const u8) -> Self;
    /// Little-endian unaligned write.
    unsafe fn write(p: *mut u8, v: Self);
    fn from_vmval(v: VMVal) -> Self;
    fn to_vmval(self) -> VMVal;
}

macro_rules! stack_ty {
    ($t:ty, $size:expr, $base:expr, $bits:ty, $from:ident, $to:ident) => {
        impl StackTy for $t {
            const SIZE: usize = $size;
            const RING_BASE: usize = $base;
            #[inline(always)]
            unsafe fn read(p: *const u8) -> Self {
                let mut bytes = [0u8; $size];
                ptr::copy_nonoverlapping(p, bytes.as_mut_ptr(), $size);
                <$t>::from_le_bytes(bytes)
            }
            #[inline(always)]
            unsafe fn write(p: *mut u8, v: Self) {
                let bytes = v.to_le_bytes();
                ptr::copy_nonoverlapping(bytes.as_ptr(), p, $size);
            }
            #[inline(always)]
            fn from_vmval(v: VMVal) -> Self {
                v.$from() as $bits as $t
            }
            #[inline(always)]
            fn to_vmval(self) -> VMVal {
                VMVal::$to(self as $bits)
            }
        }
    };
}

stack_ty!(i32, 4, 0, i32, get_i32, i32);
stack_ty!(u32, 4, 0, u32, get_u32, u32);
stack_ty!(i64, 8, RING, i64, get_i64, i64);
stack_ty!(u64, 8, RING, u64, get_u64, u64);

impl StackTy for f32 {
    const SIZE: usize = 4;
    const RING_BASE: usize = 2 * RING;
    #[inline(always)]
    unsafe fn read(p: *const u8) -> Self {
        f32::from_bits(u32::read(p))
    }
    #[inline(always)]
    unsafe fn write(p: *mut u8, v: Self) {
        u32::write(p, v.to_bits());
    }
    #[inline(always)]
    fn from_vmval(v: VMVal) -> Self {
        f32::from_bits(v.get_f32())
    }
    #[inline(always)]
    fn to_vmval(self) -> VMVal {
        VMVal::f32(self.to_bits())
    }
}

impl StackTy for f64 {
    const SIZE: usize = 8;
    const RING_BASE: usize = 3 * RING;
    #[inline(always)]
    unsafe fn read(p: *const u8) -> Self {
        f64::from_bits(u64::read(p))
    }
    #[inline(always)]
    unsafe fn write(p: *mut u8, v: Self) {
        u64::write(p, v.to_bits());
    }
    #[inline(always)]
    fn from_vmval(v: VMVal) -> Self {
        f64::from_bits(v.get_f64())
    }
    #[inline(always)]
    fn to_vmval(self) -> VMVal {
        VMVal::f64(self.to_bits())
    }
}

/// Push onto the packed operand stack.
#[inline(always)]
pub(crate) unsafe fn push<T: StackTy>(regs: &mut Regs, v: T) {
    T::write(regs.sp, v);
    regs.sp = regs.sp.add(T::SIZE);
}

/// Pop from the packed operand stack.
#[inline(always)]
pub(crate) unsafe fn pop<T: StackTy>(regs: &mut Regs) -> T {
    regs.sp = regs.sp.sub(T::SIZE);
    T::read(regs.sp)
}

/// Read a register-file slot of `T`'s ring.
#[inline(always)]
pub(crate) fn cache_get<T: StackTy>(regs: &Regs, slot: usize) -> T {
    T::from_vmval(regs.cache[T::RING_BASE + slot])
}

/// Write a register-file slot of `T`'s ring.
#[inline(always)]
pub(crate) fn cache_set<T: StackTy>(regs: &mut Regs, slot: usize, v: T) {
    regs.cache[T::RING_BASE + slot] = v.to_vmval();
}

/// The tail-mode epilogue: read the next handler from the stream and hand it
/// straight back to the driver.
#[inline(always)]
pub(crate) unsafe fn goto(regs: &Regs) -> OpResult {
    Ok(Step::Goto(op_from_word(*regs.ip)))
}

/// Execute one translated function with its frame based at `bp`.
///
/// The caller has placed the arguments (packed, in declaration order) at
/// `bp..bp + param_bytes`. On success the results are at `bp`.
///
/// # Safety
///
/// `bp` must point into the activation's value-stack slab with the argument
/// bytes initialized, and the function's module must be fully linked.
pub(crate) unsafe fn run_func(
    func: &TranslatedFunc,
    bp: *mut u8,
    act: &mut Activation,
) -> Result<(), Trap> {
    if func.frame_bytes > act.stack_end as usize - bp as usize {
        return Err(Trap::StackOverflow);
    }

    // Non-parameter locals start zeroed.
    ptr::write_bytes(
        bp.add(func.param_bytes),
        0,
        func.locals_bytes - func.param_bytes,
    );

    let mut regs = Regs {
        ip: func.code.as_ptr(),
        sp: bp.add(func.locals_bytes),
        bp,
        cache: [VMVal::default(); STACK_TOP_SLOTS],
    };

    let mut op = op_from_word(*regs.ip);
    loop {
        match op(&mut regs, act)? {
            Step::Goto(next) => op = next,
            Step::Next => op = op_from_word(*regs.ip),
            Step::Return => return Ok(()),
        }
    }
}

/// Invoke any function reference with host-provided arguments.
///
/// The argument list is type-checked against the callee's signature before
/// any handler runs.
pub(crate) fn invoke_funcref(
    func_ref: &VMFuncRef,
    args: &[Val],
) -> crate::Result<SmallVec<[Val; 1]>> {
    // SAFETY: the registry outlives every invocation it serves.
    let ty = unsafe { func_ref.ty() }.clone();

    if args.len() != ty.params.len()
        || args.iter().zip(ty.params.iter()).any(|(arg, ty)| arg.ty() != *ty)
    {
        let actual = args
            .iter()
            .map(|arg| alloc::string::ToString::to_string(&arg.ty()))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(Error::TypeMismatch {
            expected: ty,
            actual: alloc::format!("({actual})"),
        });
    }

    match func_ref.kind {
        FuncRefKind::Uninit => unreachable!("function reference never wired"),
        FuncRefKind::Host(host) => {
            // SAFETY: host functions live in the registry.
            let host = unsafe { host.as_ref() };
            let mut results: SmallVec<[Val; 1]> = ty
                .results
                .iter()
                .map(|ty| zero_val(*ty))
                .collect();
            host.invoke(args, &mut results)?;
            Ok(results)
        }
        FuncRefKind::Wasm(func) => {
            // SAFETY: translated functions live in the registry.
            let func = unsafe { func.as_ref() };

            let mut stack = vec![0u8; MAX_WASM_STACK];
            let base = stack.as_mut_ptr();
            let mut act = Activation {
                // SAFETY: one past the end of the slab.
                stack_end: unsafe { base.add(stack.len()) },
            };

            // Marshal arguments onto the packed stack in declaration order.
            let mut offset = 0;
            for arg in args {
                // SAFETY: param_bytes <= MAX_WASM_STACK is enforced by the
                // translator's frame accounting.
                unsafe { write_val(base.add(offset), *arg) };
                offset += arg.ty().byte_size();
            }

            // SAFETY: arguments are initialized, the slab bounds are right.
            unsafe { run_func(func, base, &mut act)? };

            let mut results = SmallVec::new();
            let mut offset = 0;
            for ty in ty.results.iter() {
                // SAFETY: results are at the frame base after `run_func`.
                results.push(unsafe { read_val(base.add(offset), *ty) });
                offset += ty.byte_size();
            }
            Ok(results)
        }
    }
}

pub(crate) fn zero_val(ty: WasmValType) -> Val {
    match ty {
        WasmValType::I32 => Val::I32(0),
        WasmValType::I64 => Val::I64(0),
        WasmValType::F32 => Val::F32(0),
        WasmValType::F64 => Val::F64(0),
    }
}

pub(crate) unsafe fn write_val(p: *mut u8, val: Val) {
    match val {
        Val::I32(v) => i32::write(p, v),
        Val::I64(v) => i64::write(p, v),
        Val::F32(bits) => u32::write(p, bits),
        Val::F64(bits) => u64::write(p, bits),
    }
}

pub(crate) unsafe fn read_val(p: *const u8, ty: WasmValType) -> Val {
    match ty {
        WasmValType::I32 => Val::I32(i32::read(p)),
        WasmValType::I64 => Val::I64(i64::read(p)),
        WasmValType::F32 => Val::F32(u32::read(p)),
        WasmValType::F64 => Val::F64(u64::read(p)),
    }
}
