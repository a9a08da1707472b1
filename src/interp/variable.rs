//! `local.*` and `global.*` handlers, plus the spill/fill shims that move
//! values between the stack-top register file and the packed operand stack.
//!
//! `local.*` frames carry a byte offset into the current frame's locals slab
//! (`[handler][offset]`); `global.*` frames carry a pointer to the global's
//! storage (`[handler][global_ref]`).

use super::{
    cache_get, cache_set, goto, imm, pop, push, ring_prev, Activation, Op, OpResult, Regs,
    StackTy, Step, RING,
};
use crate::global::Global;

macro_rules! local_get {
    ($name:ident, $t:ty) => {
        pub(crate) mod $name {
            use super::*;

            pub(crate) unsafe fn cached<const C: usize>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let off = imm(regs);
                let v = <$t>::read(regs.bp.add(off));
                cache_set(regs, ring_prev(C), v);
                goto(regs)
            }

            pub(crate) unsafe fn tail(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let off = imm(regs);
                let v = <$t>::read(regs.bp.add(off));
                push(regs, v);
                goto(regs)
            }

            pub(crate) unsafe fn byref(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let off = imm(regs);
                let v = <$t>::read(regs.bp.add(off));
                push(regs, v);
                Ok(Step::Next)
            }

            pub(crate) static CACHED: [Op; RING] = [cached::<0>, cached::<1>];
            pub(crate) static TAIL: Op = tail;
            pub(crate) static BYREF: Op = byref;
        }
    };
}

macro_rules! local_set {
    ($name:ident, $t:ty) => {
        pub(crate) mod $name {
            use super::*;

            pub(crate) unsafe fn cached<const C: usize>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let off = imm(regs);
                let v: $t = cache_get(regs, C);
                <$t>::write(regs.bp.add(off), v);
                goto(regs)
            }

            pub(crate) unsafe fn tail(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let off = imm(regs);
                let v: $t = pop(regs);
                <$t>::write(regs.bp.add(off), v);
                goto(regs)
            }

            pub(crate) unsafe fn byref(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let off = imm(regs);
                let v: $t = pop(regs);
                <$t>::write(regs.bp.add(off), v);
                Ok(Step::Next)
            }

            pub(crate) static CACHED: [Op; RING] = [cached::<0>, cached::<1>];
            pub(crate) static TAIL: Op = tail;
            pub(crate) static BYREF: Op = byref;
        }
    };
}

/// `local.tee` copies the top without popping: the cached path reads the
/// cursor register, the stack path reads `sp - sizeof(T)`.
macro_rules! local_tee {
    ($name:ident, $t:ty) => {
        pub(crate) mod $name {
            use super::*;

            pub(crate) unsafe fn cached<const C: usize>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let off = imm(regs);
                let v: $t = cache_get(regs, C);
                <$t>::write(regs.bp.add(off), v);
                goto(regs)
            }

            pub(crate) unsafe fn tail(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let off = imm(regs);
                let v = <$t>::read(regs.sp.sub(<$t>::SIZE));
                <$t>::write(regs.bp.add(off), v);
                goto(regs)
            }

            pub(crate) unsafe fn byref(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let off = imm(regs);
                let v = <$t>::read(regs.sp.sub(<$t>::SIZE));
                <$t>::write(regs.bp.add(off), v);
                Ok(Step::Next)
            }

            pub(crate) static CACHED: [Op; RING] = [cached::<0>, cached::<1>];
            pub(crate) static TAIL: Op = tail;
            pub(crate) static BYREF: Op = byref;
        }
    };
}

macro_rules! global_get {
    ($name:ident, $t:ty) => {
        pub(crate) mod $name {
            use super::*;

            pub(crate) unsafe fn cached<const C: usize>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let global = &*(imm(regs) as *const Global);
                let v = <$t>::from_vmval(global.get());
                cache_set(regs, ring_prev(C), v);
                goto(regs)
            }

            pub(crate) unsafe fn tail(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let global = &*(imm(regs) as *const Global);
                push(regs, <$t>::from_vmval(global.get()));
                goto(regs)
            }

            pub(crate) unsafe fn byref(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let global = &*(imm(regs) as *const Global);
                push(regs, <$t>::from_vmval(global.get()));
                Ok(Step::Next)
            }

            pub(crate) static CACHED: [Op; RING] = [cached::<0>, cached::<1>];
            pub(crate) static TAIL: Op = tail;
            pub(crate) static BYREF: Op = byref;
        }
    };
}

macro_rules! global_set {
    ($name:ident, $t:ty) => {
        pub(crate) mod $name {
            use super::*;

            pub(crate) unsafe fn cached<const C: usize>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let global = &*(imm(regs) as *const Global);
                let v: $t = cache_get(regs, C);
                global.set(v.to_vmval());
                goto(regs)
            }

            pub(crate) unsafe fn tail(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let global = &*(imm(regs) as *const Global);
                let v: $t = pop(regs);
                global.set(v.to_vmval());
                goto(regs)
            }

            pub(crate) unsafe fn byref(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let global = &*(imm(regs) as *const Global);
                let v: $t = pop(regs);
                global.set(v.to_vmval());
                Ok(Step::Next)
            }

            pub(crate) static CACHED: [Op; RING] = [cached::<0>, cached::<1>];
            pub(crate) static TAIL: Op = tail;
            pub(crate) static BYREF: Op = byref;
        }
    };
}

/// Move the ring-bottom value at `SLOT` out to the packed stack (making room
/// for a push), or back in from the packed stack (making an operand
/// addressable). Emitted by the translator as shim frames; tail mode only.
macro_rules! spill_fill {
    ($spill:ident, $fill:ident, $t:ty) => {
        pub(crate) mod $spill {
            use super::*;

            pub(crate) unsafe fn at<const SLOT: usize>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let v: $t = cache_get(regs, SLOT);
                push(regs, v);
                goto(regs)
            }

            pub(crate) static AT: [Op; RING] = [at::<0>, at::<1>];
        }

        pub(crate) mod $fill {
            use super::*;

            pub(crate) unsafe fn at<const SLOT: usize>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let v: $t = pop(regs);
                cache_set(regs, SLOT, v);
                goto(regs)
            }

            pub(crate) static AT: [Op; RING] = [at::<0>, at::<1>];
        }
    };
}

local_get!(local_get_i32, i32);
local_get!(local_get_i64, i64);
local_get!(local_get_f32, f32);
local_get!(local_get_f64, f64);

local_set!(local_set_i32, i32);
local_set!(local_set_i64, i64);
local_set!(local_set_f32, f32);
local_set!(local_set_f64, f64);

local_tee!(local_tee_i32, i32);
local_tee!(local_tee_i64, i64);
local_tee!(local_tee_f32, f32);
local_tee!(local_tee_f64, f64);

global_get!(global_get_i32, i32);
global_get!(global_get_i64, i64);
global_get!(global_get_f32, f32);
global_get!(global_get_f64, f64);

global_set!(global_set_i32, i32);
global_set!(global_set_i64, i64);
global_set!(global_set_f32, f32);
global_set!(global_set_f64, f64);

spill_fill!(spill_i32, fill_i32, i32);
spill_fill!(spill_i64, fill_i64, i64);
spill_fill!(spill_f32, fill_f32, f32);
spill_fill!(spill_f64, fill_f64, f64);
