//! Memory opcode handlers.
//!
//! Loads and stores have one specialization per bounds-check policy; the
//! translator resolves the policy from the memory's backend and hardwires it
//! into the emitted handler word. Frame layout:
//! `[handler][memory_ref][align][static_offset]` — the alignment is a hint
//! only and never trusted.
//!
//! The effective offset is `(addr + static_offset) mod 2^32`, widened to
//! `usize` only after the modular reduction, and every store is checked
//! before any byte is written.

use super::{
    cache_get, cache_set, goto, imm, pop, push, ring_next, ring_prev, Activation, Op, OpResult,
    Regs, Step, RING,
};
use crate::memory::{effective_offset, BoundsPolicy, Memory};
use crate::traps::Trap;

pub(crate) const NUM_POLICIES: usize = 5;

pub(crate) fn policy_index(policy: BoundsPolicy) -> usize {
    match policy {
        BoundsPolicy::Generic => 0,
        BoundsPolicy::MmapFull => 1,
        BoundsPolicy::MmapPartial => 2,
        BoundsPolicy::MmapDynamic => 3,
        BoundsPolicy::Allocator => 4,
    }
}

const P_FULL: u8 = 1;
const P_PARTIAL: u8 = 2;
const P_ALLOC: u8 = 4;

#[cold]
fn oob(mem: &Memory, static_offset: u32, eff: u32, len: u64, width: u32) -> Trap {
    Trap::MemoryOutOfBounds {
        memory_index: mem.index(),
        static_offset,
        effective_offset: u64::from(eff),
        memory_length: len,
        access_width: width,
    }
}

#[inline(always)]
fn bounds_check<const P: u8>(
    mem: &Memory,
    static_offset: u32,
    eff: u32,
    width: u32,
) -> Result<(), Trap> {
    let res = match P {
        P_FULL => Ok(()),
        P_PARTIAL => mem.check_window(u64::from(eff), u64::from(width)),
        _ => mem.check_bounds(u64::from(eff), u64::from(width)),
    };
    res.map_err(|len| oob(mem, static_offset, eff, len, width))
}

/// Read the shared `[memory_ref][align][static_offset]` immediate group.
#[inline(always)]
unsafe fn mem_imms<'a>(regs: &mut Regs) -> (&'a Memory, u32) {
    let mem = &*(imm(regs) as *const Memory);
    let _align = imm(regs); // hint only
    let static_offset = imm(regs) as u32;
    (mem, static_offset)
}

#[inline(always)]
unsafe fn load_raw<const P: u8, const K: usize>(
    mem: &Memory,
    static_offset: u32,
    addr: u32,
) -> Result<[u8; K], Trap> {
    let eff = effective_offset(addr, static_offset);
    let _guard = (P == P_ALLOC).then(|| mem.enter_access());
    bounds_check::<P>(mem, static_offset, eff, K as u32)?;
    Ok(mem.read_bytes::<K>(eff as usize))
}

#[inline(always)]
unsafe fn store_raw<const P: u8, const K: usize>(
    mem: &Memory,
    static_offset: u32,
    addr: u32,
    bytes: [u8; K],
) -> Result<(), Trap> {
    let eff = effective_offset(addr, static_offset);
    let _guard = (P == P_ALLOC).then(|| mem.enter_access());
    bounds_check::<P>(mem, static_offset, eff, K as u32)?;
    mem.write_bytes::<K>(eff as usize, bytes);
    Ok(())
}

/// A load producing an i32: address and result share the i32 ring, so the
/// result lands back in the slot the address came from.
macro_rules! load_same {
    ($name:ident, $k:expr, |$bytes:ident| $conv:expr) => {
        pub(crate) mod $name {
            use super::*;

            #[inline(always)]
            fn conv($bytes: [u8; $k]) -> i32 {
                $conv
            }

            pub(crate) unsafe fn cached<const P: u8, const C: usize>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let (mem, off) = mem_imms(regs);
                let addr: u32 = cache_get(regs, C);
                let v = conv(load_raw::<P, { $k }>(mem, off, addr)?);
                cache_set(regs, C, v);
                goto(regs)
            }

            pub(crate) unsafe fn tail<const P: u8>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let (mem, off) = mem_imms(regs);
                let addr: u32 = pop(regs);
                push(regs, conv(load_raw::<P, { $k }>(mem, off, addr)?));
                goto(regs)
            }

            pub(crate) unsafe fn byref<const P: u8>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let (mem, off) = mem_imms(regs);
                let addr: u32 = pop(regs);
                push(regs, conv(load_raw::<P, { $k }>(mem, off, addr)?));
                Ok(Step::Next)
            }

            pub(crate) static CACHED: [[Op; RING]; NUM_POLICIES] = [
                [cached::<0, 0>, cached::<0, 1>],
                [cached::<1, 0>, cached::<1, 1>],
                [cached::<2, 0>, cached::<2, 1>],
                [cached::<3, 0>, cached::<3, 1>],
                [cached::<4, 0>, cached::<4, 1>],
            ];
            pub(crate) static TAIL: [Op; NUM_POLICIES] =
                [tail::<0>, tail::<1>, tail::<2>, tail::<3>, tail::<4>];
            pub(crate) static BYREF: [Op; NUM_POLICIES] =
                [byref::<0>, byref::<1>, byref::<2>, byref::<3>, byref::<4>];
        }
    };
}

/// A load producing an i64/f32/f64: the address comes from the i32 ring
/// (`CA`), the result goes to the value type's ring (`CV`).
macro_rules! load_cross {
    ($name:ident, $t:ty, $k:expr, |$bytes:ident| $conv:expr) => {
        pub(crate) mod $name {
            use super::*;

            #[inline(always)]
            fn conv($bytes: [u8; $k]) -> $t {
                $conv
            }

            pub(crate) unsafe fn cached<const P: u8, const CA: usize, const CV: usize>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let (mem, off) = mem_imms(regs);
                let addr: u32 = cache_get(regs, CA);
                let v: $t = conv(load_raw::<P, { $k }>(mem, off, addr)?);
                cache_set(regs, ring_prev(CV), v);
                goto(regs)
            }

            pub(crate) unsafe fn tail<const P: u8>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let (mem, off) = mem_imms(regs);
                let addr: u32 = pop(regs);
                let v: $t = conv(load_raw::<P, { $k }>(mem, off, addr)?);
                push(regs, v);
                goto(regs)
            }

            pub(crate) unsafe fn byref<const P: u8>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let (mem, off) = mem_imms(regs);
                let addr: u32 = pop(regs);
                let v: $t = conv(load_raw::<P, { $k }>(mem, off, addr)?);
                push(regs, v);
                Ok(Step::Next)
            }

            pub(crate) static CACHED: [[[Op; RING]; RING]; NUM_POLICIES] = [
                [
                    [cached::<0, 0, 0>, cached::<0, 0, 1>],
                    [cached::<0, 1, 0>, cached::<0, 1, 1>],
                ],
                [
                    [cached::<1, 0, 0>, cached::<1, 0, 1>],
                    [cached::<1, 1, 0>, cached::<1, 1, 1>],
                ],
                [
                    [cached::<2, 0, 0>, cached::<2, 0, 1>],
                    [cached::<2, 1, 0>, cached::<2, 1, 1>],
                ],
                [
                    [cached::<3, 0, 0>, cached::<3, 0, 1>],
                    [cached::<3, 1, 0>, cached::<3, 1, 1>],
                ],
                [
                    [cached::<4, 0, 0>, cached::<4, 0, 1>],
                    [cached::<4, 1, 0>, cached::<4, 1, 1>],
                ],
            ];
            pub(crate) static TAIL: [Op; NUM_POLICIES] =
                [tail::<0>, tail::<1>, tail::<2>, tail::<3>, tail::<4>];
            pub(crate) static BYREF: [Op; NUM_POLICIES] =
                [byref::<0>, byref::<1>, byref::<2>, byref::<3>, byref::<4>];
        }
    };
}

/// An i32 store: value at the cursor, address at the next ring position.
macro_rules! store_same {
    ($name:ident, $k:expr, |$v:ident| $conv:expr) => {
        pub(crate) mod $name {
            use super::*;

            #[inline(always)]
            fn conv($v: u32) -> [u8; $k] {
                $conv
            }

            pub(crate) unsafe fn cached<const P: u8, const C: usize>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let (mem, off) = mem_imms(regs);
                let v: u32 = cache_get(regs, C);
                let addr: u32 = cache_get(regs, ring_next(C));
                store_raw::<P, { $k }>(mem, off, addr, conv(v))?;
                goto(regs)
            }

            pub(crate) unsafe fn tail<const P: u8>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let (mem, off) = mem_imms(regs);
                let v: u32 = pop(regs);
                let addr: u32 = pop(regs);
                store_raw::<P, { $k }>(mem, off, addr, conv(v))?;
                goto(regs)
            }

            pub(crate) unsafe fn byref<const P: u8>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let (mem, off) = mem_imms(regs);
                let v: u32 = pop(regs);
                let addr: u32 = pop(regs);
                store_raw::<P, { $k }>(mem, off, addr, conv(v))?;
                Ok(Step::Next)
            }

            pub(crate) static CACHED: [[Op; RING]; NUM_POLICIES] = [
                [cached::<0, 0>, cached::<0, 1>],
                [cached::<1, 0>, cached::<1, 1>],
                [cached::<2, 0>, cached::<2, 1>],
                [cached::<3, 0>, cached::<3, 1>],
                [cached::<4, 0>, cached::<4, 1>],
            ];
            pub(crate) static TAIL: [Op; NUM_POLICIES] =
                [tail::<0>, tail::<1>, tail::<2>, tail::<3>, tail::<4>];
            pub(crate) static BYREF: [Op; NUM_POLICIES] =
                [byref::<0>, byref::<1>, byref::<2>, byref::<3>, byref::<4>];
        }
    };
}

/// A store of an i64/f32/f64 value: address from the i32 ring (`CA`), value
/// from its own ring (`CV`).
macro_rules! store_cross {
    ($name:ident, $t:ty, $k:expr, |$v:ident| $conv:expr) => {
        pub(crate) mod $name {
            use super::*;

            #[inline(always)]
            fn conv($v: $t) -> [u8; $k] {
                $conv
            }

            pub(crate) unsafe fn cached<const P: u8, const CA: usize, const CV: usize>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let (mem, off) = mem_imms(regs);
                let v: $t = cache_get(regs, CV);
                let addr: u32 = cache_get(regs, CA);
                store_raw::<P, { $k }>(mem, off, addr, conv(v))?;
                goto(regs)
            }

            pub(crate) unsafe fn tail<const P: u8>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let (mem, off) = mem_imms(regs);
                let v: $t = pop(regs);
                let addr: u32 = pop(regs);
                store_raw::<P, { $k }>(mem, off, addr, conv(v))?;
                goto(regs)
            }

            pub(crate) unsafe fn byref<const P: u8>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let (mem, off) = mem_imms(regs);
                let v: $t = pop(regs);
                let addr: u32 = pop(regs);
                store_raw::<P, { $k }>(mem, off, addr, conv(v))?;
                Ok(Step::Next)
            }

            pub(crate) static CACHED: [[[Op; RING]; RING]; NUM_POLICIES] = [
                [
                    [cached::<0, 0, 0>, cached::<0, 0, 1>],
                    [cached::<0, 1, 0>, cached::<0, 1, 1>],
                ],
                [
                    [cached::<1, 0, 0>, cached::<1, 0, 1>],
                    [cached::<1, 1, 0>, cached::<1, 1, 1>],
                ],
                [
                    [cached::<2, 0, 0>, cached::<2, 0, 1>],
                    [cached::<2, 1, 0>, cached::<2, 1, 1>],
                ],
                [
                    [cached::<3, 0, 0>, cached::<3, 0, 1>],
                    [cached::<3, 1, 0>, cached::<3, 1, 1>],
                ],
                [
                    [cached::<4, 0, 0>, cached::<4, 0, 1>],
                    [cached::<4, 1, 0>, cached::<4, 1, 1>],
                ],
            ];
            pub(crate) static TAIL: [Op; NUM_POLICIES] =
                [tail::<0>, tail::<1>, tail::<2>, tail::<3>, tail::<4>];
            pub(crate) static BYREF: [Op; NUM_POLICIES] =
                [byref::<0>, byref::<1>, byref::<2>, byref::<3>, byref::<4>];
        }
    };
}

// === loads ==============================================================

load_same!(i32_load, 4, |b| i32::from_le_bytes(b));
load_same!(i32_load8_s, 1, |b| i32::from(i8::from_le_bytes(b)));
load_same!(i32_load8_u, 1, |b| i32::from(b[0]));
load_same!(i32_load16_s, 2, |b| i32::from(i16::from_le_bytes(b)));
load_same!(i32_load16_u, 2, |b| i32::from(u16::from_le_bytes(b)));

load_cross!(i64_load, i64, 8, |b| i64::from_le_bytes(b));
load_cross!(i64_load8_s, i64, 1, |b| i64::from(i8::from_le_bytes(b)));
load_cross!(i64_load8_u, i64, 1, |b| i64::from(b[0]));
load_cross!(i64_load16_s, i64, 2, |b| i64::from(i16::from_le_bytes(b)));
load_cross!(i64_load16_u, i64, 2, |b| i64::from(u16::from_le_bytes(b)));
load_cross!(i64_load32_s, i64, 4, |b| i64::from(i32::from_le_bytes(b)));
load_cross!(i64_load32_u, i64, 4, |b| i64::from(u32::from_le_bytes(b)));
load_cross!(f32_load, f32, 4, |b| f32::from_bits(u32::from_le_bytes(b)));
load_cross!(f64_load, f64, 8, |b| f64::from_bits(u64::from_le_bytes(b)));

// === stores =============================================================

store_same!(i32_store, 4, |v| v.to_le_bytes());
store_same!(i32_store8, 1, |v| [v as u8]);
store_same!(i32_store16, 2, |v| (v as u16).to_le_bytes());

store_cross!(i64_store, i64, 8, |v| v.to_le_bytes());
store_cross!(i64_store8, i64, 1, |v| [v as u8]);
store_cross!(i64_store16, i64, 2, |v| (v as u16).to_le_bytes());
store_cross!(i64_store32, i64, 4, |v| (v as u32).to_le_bytes());
store_cross!(f32_store, f32, 4, |v| v.to_bits().to_le_bytes());
store_cross!(f64_store, f64, 8, |v| v.to_bits().to_le_bytes());

// === memory.size / memory.grow ==========================================

/// `memory.size` pushes the current page count. Emitted uncached (the
/// translator flushes first), so only the stack variants exist.
pub(crate) mod memory_size {
    use super::*;

    #[inline(always)]
    unsafe fn eval(regs: &mut Regs) -> u32 {
        let mem = &*(imm(regs) as *const Memory);
        mem.page_count() as u32
    }

    pub(crate) unsafe fn tail(regs: &mut Regs, _act: &mut Activation) -> OpResult {
        regs.ip = regs.ip.add(1);
        let pages = eval(regs);
        push(regs, pages);
        goto(regs)
    }

    pub(crate) unsafe fn byref(regs: &mut Regs, _act: &mut Activation) -> OpResult {
        regs.ip = regs.ip.add(1);
        let pages = eval(regs);
        push(regs, pages);
        Ok(Step::Next)
    }

    pub(crate) static TAIL: Op = tail;
    pub(crate) static BYREF: Op = byref;
}

/// `memory.grow`. One handler regardless of policy: the growth work dwarfs
/// any dispatch cost. Frame:
/// `[handler][memory_ref][max_limit_pages][grow_strict]`.
pub(crate) mod memory_grow {
    use super::*;

    #[inline(always)]
    unsafe fn eval(regs: &mut Regs) -> i32 {
        let mem = &*(imm(regs) as *const Memory);
        let limit = imm(regs) as u64;
        let strict = imm(regs) != 0;
        let delta = u64::from(pop::<u32>(regs));

        if strict {
            match mem.grow_strictly(delta, limit) {
                Some(prev) => prev as i32,
                None => -1,
            }
        } else {
            mem.grow_silently(delta, limit) as i32
        }
    }

    pub(crate) unsafe fn tail(regs: &mut Regs, _act: &mut Activation) -> OpResult {
        regs.ip = regs.ip.add(1);
        let prev = eval(regs);
        push(regs, prev);
        goto(regs)
    }

    pub(crate) unsafe fn byref(regs: &mut Regs, _act: &mut Activation) -> OpResult {
        regs.ip = regs.ip.add(1);
        let prev = eval(regs);
        push(regs, prev);
        Ok(Step::Next)
    }

    pub(crate) static TAIL: Op = tail;
    pub(crate) static BYREF: Op = byref;
}
