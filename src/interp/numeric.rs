//! Numeric opcode handlers.
//!
//! Every family comes in three shapes: `CACHED` (tail mode, operands in the
//! stack-top register file, one specialization per ring cursor), `TAIL`
//! (tail mode, operands on the packed stack), and `BYREF` (fetch-loop mode).
//! Cross-ring tables are indexed `[source cursor][result cursor]`.

use super::{
    cache_get, cache_set, goto, imm, imm_u64, pop, push, ring_next, ring_prev, Activation, Op,
    OpResult, Regs, Step, RING,
};
use crate::traps::Trap;

// === shared numeric helpers =============================================

/// Canonicalize a NaN result: quiet bit set, zero payload, sign preserved.
#[inline(always)]
pub(crate) fn canon_f32(v: f32) -> f32 {
    if v.is_nan() {
        f32::from_bits((v.to_bits() & 0x8000_0000) | 0x7fc0_0000)
    } else {
        v
    }
}

#[inline(always)]
pub(crate) fn canon_f64(v: f64) -> f64 {
    if v.is_nan() {
        f64::from_bits((v.to_bits() & 0x8000_0000_0000_0000) | 0x7ff8_0000_0000_0000)
    } else {
        v
    }
}

/// IEEE-754 `minimum`: NaN-propagating, `-0 < +0`.
#[inline(always)]
fn wmin_f32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        canon_f32(f32::NAN)
    } else if a == b {
        if a.is_sign_negative() {
            a
        } else {
            b
        }
    } else if a < b {
        a
    } else {
        b
    }
}

#[inline(always)]
fn wmax_f32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        canon_f32(f32::NAN)
    } else if a == b {
        if a.is_sign_positive() {
            a
        } else {
            b
        }
    } else if a > b {
        a
    } else {
        b
    }
}

#[inline(always)]
fn wmin_f64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        canon_f64(f64::NAN)
    } else if a == b {
        if a.is_sign_negative() {
            a
        } else {
            b
        }
    } else if a < b {
        a
    } else {
        b
    }
}

#[inline(always)]
fn wmax_f64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        canon_f64(f64::NAN)
    } else if a == b {
        if a.is_sign_positive() {
            a
        } else {
            b
        }
    } else if a > b {
        a
    } else {
        b
    }
}

/// Round-half-to-even, preserving the sign of a zero result.
#[inline(always)]
fn nearest_f32(v: f32) -> f32 {
    let round = v.round();
    let round = if v.fract().abs() != 0.5 {
        round
    } else if round % 2.0 == 0.0 {
        round
    } else {
        round - v.signum()
    };
    if round == 0.0 {
        0.0_f32.copysign(v)
    } else {
        round
    }
}

#[inline(always)]
fn nearest_f64(v: f64) -> f64 {
    let round = v.round();
    let round = if v.fract().abs() != 0.5 {
        round
    } else if round % 2.0 == 0.0 {
        round
    } else {
        round - v.signum()
    };
    if round == 0.0 {
        0.0_f64.copysign(v)
    } else {
        round
    }
}

macro_rules! trunc_to_int {
    ($name:ident, $from:ty, $to:ty, $lo:expr, $hi:expr) => {
        /// Trapping float-to-int truncation: NaN and out-of-range trap.
        #[inline(always)]
        fn $name(v: $from) -> Result<$to, Trap> {
            if v.is_nan() {
                return Err(Trap::BadConversionToInteger);
            }
            let t = v.trunc();
            if t < $lo || t >= $hi {
                return Err(Trap::IntegerOverflow);
            }
            Ok(t as $to)
        }
    };
}

trunc_to_int!(trunc_f32_i32, f32, i32, -2147483648.0, 2147483648.0);
trunc_to_int!(trunc_f32_u32, f32, u32, 0.0, 4294967296.0);
trunc_to_int!(trunc_f32_i64, f32, i64, -9223372036854775808.0, 9223372036854775808.0);
trunc_to_int!(trunc_f32_u64, f32, u64, 0.0, 18446744073709551616.0);
trunc_to_int!(trunc_f64_i32, f64, i32, -2147483648.0, 2147483648.0);
trunc_to_int!(trunc_f64_u32, f64, u32, 0.0, 4294967296.0);
trunc_to_int!(trunc_f64_i64, f64, i64, -9223372036854775808.0, 9223372036854775808.0);
trunc_to_int!(trunc_f64_u64, f64, u64, 0.0, 18446744073709551616.0);

// === handler family generators ==========================================

/// `T x T -> T` within one ring. The top operand sits at the cursor, the
/// second at the next ring position; the result lands where the second was.
macro_rules! binop {
    ($name:ident, $t:ty, |$a:ident, $b:ident| $body:expr) => {
        binop_try!($name, $t, |$a, $b| Ok($body));
    };
}

macro_rules! binop_try {
    ($name:ident, $t:ty, |$a:ident, $b:ident| $body:expr) => {
        pub(crate) mod $name {
            use super::*;

            #[inline(always)]
            fn eval($a: $t, $b: $t) -> Result<$t, Trap> {
                $body
            }

            pub(crate) unsafe fn cached<const C: usize>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let b: $t = cache_get(regs, C);
                let a: $t = cache_get(regs, ring_next(C));
                cache_set(regs, ring_next(C), eval(a, b)?);
                goto(regs)
            }

            pub(crate) unsafe fn tail(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let b: $t = pop(regs);
                let a: $t = pop(regs);
                push(regs, eval(a, b)?);
                goto(regs)
            }

            pub(crate) unsafe fn byref(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let b: $t = pop(regs);
                let a: $t = pop(regs);
                push(regs, eval(a, b)?);
                Ok(Step::Next)
            }

            pub(crate) static CACHED: [Op; RING] = [cached::<0>, cached::<1>];
            pub(crate) static TAIL: Op = tail;
            pub(crate) static BYREF: Op = byref;
        }
    };
}

/// `T -> T` within one ring, in place at the cursor.
macro_rules! unop {
    ($name:ident, $t:ty, |$v:ident| $body:expr) => {
        pub(crate) mod $name {
            use super::*;

            #[inline(always)]
            fn eval($v: $t) -> $t {
                $body
            }

            pub(crate) unsafe fn cached<const C: usize>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let v: $t = cache_get(regs, C);
                cache_set(regs, C, eval(v));
                goto(regs)
            }

            pub(crate) unsafe fn tail(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let v: $t = pop(regs);
                push(regs, eval(v));
                goto(regs)
            }

            pub(crate) unsafe fn byref(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let v: $t = pop(regs);
                push(regs, eval(v));
                Ok(Step::Next)
            }

            pub(crate) static CACHED: [Op; RING] = [cached::<0>, cached::<1>];
            pub(crate) static TAIL: Op = tail;
            pub(crate) static BYREF: Op = byref;
        }
    };
}

/// `T x T -> i32` across rings (comparisons on i64/f32/f64). `CV` is the
/// operand-ring cursor, `CR` the i32 ring cursor.
macro_rules! relop {
    ($name:ident, $t:ty, |$a:ident, $b:ident| $body:expr) => {
        pub(crate) mod $name {
            use super::*;

            #[inline(always)]
            fn eval($a: $t, $b: $t) -> i32 {
                ($body) as i32
            }

            pub(crate) unsafe fn cached<const CV: usize, const CR: usize>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let b: $t = cache_get(regs, CV);
                let a: $t = cache_get(regs, ring_next(CV));
                cache_set(regs, ring_prev(CR), eval(a, b));
                goto(regs)
            }

            pub(crate) unsafe fn tail(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let b: $t = pop(regs);
                let a: $t = pop(regs);
                push(regs, eval(a, b));
                goto(regs)
            }

            pub(crate) unsafe fn byref(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let b: $t = pop(regs);
                let a: $t = pop(regs);
                push(regs, eval(a, b));
                Ok(Step::Next)
            }

            pub(crate) static CACHED: [[Op; RING]; RING] = [
                [cached::<0, 0>, cached::<0, 1>],
                [cached::<1, 0>, cached::<1, 1>],
            ];
            pub(crate) static TAIL: Op = tail;
            pub(crate) static BYREF: Op = byref;
        }
    };
}

/// `From -> To` across rings (conversions, reinterprets, `i64.eqz`).
macro_rules! cvt {
    ($name:ident, $from:ty, $to:ty, |$v:ident| $body:expr) => {
        cvt_try!($name, $from, $to, |$v| Ok($body));
    };
}

macro_rules! cvt_try {
    ($name:ident, $from:ty, $to:ty, |$v:ident| $body:expr) => {
        pub(crate) mod $name {
            use super::*;

            #[inline(always)]
            fn eval($v: $from) -> Result<$to, Trap> {
                $body
            }

            pub(crate) unsafe fn cached<const CV: usize, const CR: usize>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let v: $from = cache_get(regs, CV);
                cache_set(regs, ring_prev(CR), eval(v)?);
                goto(regs)
            }

            pub(crate) unsafe fn tail(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let v: $from = pop(regs);
                push(regs, eval(v)?);
                goto(regs)
            }

            pub(crate) unsafe fn byref(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let v: $from = pop(regs);
                push(regs, eval(v)?);
                Ok(Step::Next)
            }

            pub(crate) static CACHED: [[Op; RING]; RING] = [
                [cached::<0, 0>, cached::<0, 1>],
                [cached::<1, 0>, cached::<1, 1>],
            ];
            pub(crate) static TAIL: Op = tail;
            pub(crate) static BYREF: Op = byref;
        }
    };
}

/// A `t.const` push. The immediate encoding differs per type.
macro_rules! const_op {
    ($name:ident, $t:ty, |$regs:ident| $read:expr) => {
        pub(crate) mod $name {
            use super::*;

            pub(crate) unsafe fn cached<const C: usize>(
                regs: &mut Regs,
                _act: &mut Activation,
            ) -> OpResult {
                regs.ip = regs.ip.add(1);
                let v: $t = {
                    let $regs = &mut *regs;
                    $read
                };
                cache_set(regs, ring_prev(C), v);
                goto(regs)
            }

            pub(crate) unsafe fn tail(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let v: $t = {
                    let $regs = &mut *regs;
                    $read
                };
                push(regs, v);
                goto(regs)
            }

            pub(crate) unsafe fn byref(regs: &mut Regs, _act: &mut Activation) -> OpResult {
                regs.ip = regs.ip.add(1);
                let v: $t = {
                    let $regs = &mut *regs;
                    $read
                };
                push(regs, v);
                Ok(Step::Next)
            }

            pub(crate) static CACHED: [Op; RING] = [cached::<0>, cached::<1>];
            pub(crate) static TAIL: Op = tail;
            pub(crate) static BYREF: Op = byref;
        }
    };
}

// === constants ==========================================================

const_op!(i32_const, i32, |regs| imm(regs) as u32 as i32);
const_op!(i64_const, i64, |regs| imm_u64(regs) as i64);
const_op!(f32_const, f32, |regs| f32::from_bits(imm(regs) as u32));
const_op!(f64_const, f64, |regs| f64::from_bits(imm_u64(regs)));

// === i32 arithmetic =====================================================

binop!(i32_add, i32, |a, b| a.wrapping_add(b));
binop!(i32_sub, i32, |a, b| a.wrapping_sub(b));
binop!(i32_mul, i32, |a, b| a.wrapping_mul(b));
binop_try!(i32_div_s, i32, |a, b| {
    if b == 0 {
        Err(Trap::DivisionByZero)
    } else {
        a.checked_div(b).ok_or(Trap::IntegerOverflow)
    }
});
binop_try!(i32_div_u, u32, |a, b| {
    if b == 0 {
        Err(Trap::DivisionByZero)
    } else {
        Ok(a / b)
    }
});
binop_try!(i32_rem_s, i32, |a, b| {
    if b == 0 {
        Err(Trap::DivisionByZero)
    } else {
        Ok(a.wrapping_rem(b))
    }
});
binop_try!(i32_rem_u, u32, |a, b| {
    if b == 0 {
        Err(Trap::DivisionByZero)
    } else {
        Ok(a % b)
    }
});
binop!(i32_and, i32, |a, b| a & b);
binop!(i32_or, i32, |a, b| a | b);
binop!(i32_xor, i32, |a, b| a ^ b);
binop!(i32_shl, i32, |a, b| a.wrapping_shl(b as u32));
binop!(i32_shr_s, i32, |a, b| a.wrapping_shr(b as u32));
binop!(i32_shr_u, u32, |a, b| a.wrapping_shr(b));
binop!(i32_rotl, u32, |a, b| a.rotate_left(b % 32));
binop!(i32_rotr, u32, |a, b| a.rotate_right(b % 32));

unop!(i32_clz, i32, |v| v.leading_zeros() as i32);
unop!(i32_ctz, i32, |v| v.trailing_zeros() as i32);
unop!(i32_popcnt, i32, |v| v.count_ones() as i32);
unop!(i32_eqz, i32, |v| (v == 0) as i32);

binop!(i32_eq, i32, |a, b| (a == b) as i32);
binop!(i32_ne, i32, |a, b| (a != b) as i32);
binop!(i32_lt_s, i32, |a, b| (a < b) as i32);
binop!(i32_lt_u, u32, |a, b| (a < b) as u32);
binop!(i32_gt_s, i32, |a, b| (a > b) as i32);
binop!(i32_gt_u, u32, |a, b| (a > b) as u32);
binop!(i32_le_s, i32, |a, b| (a <= b) as i32);
binop!(i32_le_u, u32, |a, b| (a <= b) as u32);
binop!(i32_ge_s, i32, |a, b| (a >= b) as i32);
binop!(i32_ge_u, u32, |a, b| (a >= b) as u32);

// === i64 arithmetic =====================================================

binop!(i64_add, i64, |a, b| a.wrapping_add(b));
binop!(i64_sub, i64, |a, b| a.wrapping_sub(b));
binop!(i64_mul, i64, |a, b| a.wrapping_mul(b));
binop_try!(i64_div_s, i64, |a, b| {
    if b == 0 {
        Err(Trap::DivisionByZero)
    } else {
        a.checked_div(b).ok_or(Trap::IntegerOverflow)
    }
});
binop_try!(i64_div_u, u64, |a, b| {
    if b == 0 {
        Err(Trap::DivisionByZero)
    } else {
        Ok(a / b)
    }
});
binop_try!(i64_rem_s, i64, |a, b| {
    if b == 0 {
        Err(Trap::DivisionByZero)
    } else {
        Ok(a.wrapping_rem(b))
    }
});
binop_try!(i64_rem_u, u64, |a, b| {
    if b == 0 {
        Err(Trap::DivisionByZero)
    } else {
        Ok(a % b)
    }
});
binop!(i64_and, i64, |a, b| a & b);
binop!(i64_or, i64, |a, b| a | b);
binop!(i64_xor, i64, |a, b| a ^ b);
binop!(i64_shl, i64, |a, b| a.wrapping_shl(b as u32));
binop!(i64_shr_s, i64, |a, b| a.wrapping_shr(b as u32));
binop!(i64_shr_u, u64, |a, b| a.wrapping_shr(b as u32));
binop!(i64_rotl, u64, |a, b| a.rotate_left((b % 64) as u32));
binop!(i64_rotr, u64, |a, b| a.rotate_right((b % 64) as u32));

unop!(i64_clz, i64, |v| i64::from(v.leading_zeros()));
unop!(i64_ctz, i64, |v| i64::from(v.trailing_zeros()));
unop!(i64_popcnt, i64, |v| i64::from(v.count_ones()));
cvt!(i64_eqz, i64, i32, |v| (v == 0) as i32);

relop!(i64_eq, i64, |a, b| a == b);
relop!(i64_ne, i64, |a, b| a != b);
relop!(i64_lt_s, i64, |a, b| a < b);
relop!(i64_lt_u, u64, |a, b| a < b);
relop!(i64_gt_s, i64, |a, b| a > b);
relop!(i64_gt_u, u64, |a, b| a > b);
relop!(i64_le_s, i64, |a, b| a <= b);
relop!(i64_le_u, u64, |a, b| a <= b);
relop!(i64_ge_s, i64, |a, b| a >= b);
relop!(i64_ge_u, u64, |a, b| a >= b);

// === f32 arithmetic =====================================================

binop!(f32_add, f32, |a, b| canon_f32(a + b));
binop!(f32_sub, f32, |a, b| canon_f32(a - b));
binop!(f32_mul, f32, |a, b| canon_f32(a * b));
binop!(f32_div, f32, |a, b| canon_f32(a / b));
binop!(f32_min, f32, |a, b| wmin_f32(a, b));
binop!(f32_max, f32, |a, b| wmax_f32(a, b));
binop!(f32_copysign, f32, |a, b| a.copysign(b));

unop!(f32_abs, f32, |v| v.abs());
unop!(f32_neg, f32, |v| -v);
unop!(f32_ceil, f32, |v| canon_f32(v.ceil()));
unop!(f32_floor, f32, |v| canon_f32(v.floor()));
unop!(f32_trunc, f32, |v| canon_f32(v.trunc()));
unop!(f32_nearest, f32, |v| canon_f32(nearest_f32(v)));
unop!(f32_sqrt, f32, |v| canon_f32(v.sqrt()));

relop!(f32_eq, f32, |a, b| a == b);
relop!(f32_ne, f32, |a, b| a != b);
relop!(f32_lt, f32, |a, b| a < b);
relop!(f32_gt, f32, |a, b| a > b);
relop!(f32_le, f32, |a, b| a <= b);
relop!(f32_ge, f32, |a, b| a >= b);

// === f64 arithmetic =====================================================

binop!(f64_add, f64, |a, b| canon_f64(a + b));
binop!(f64_sub, f64, |a, b| canon_f64(a - b));
binop!(f64_mul, f64, |a, b| canon_f64(a * b));
binop!(f64_div, f64, |a, b| canon_f64(a / b));
binop!(f64_min, f64, |a, b| wmin_f64(a, b));
binop!(f64_max, f64, |a, b| wmax_f64(a, b));
binop!(f64_copysign, f64, |a, b| a.copysign(b));

unop!(f64_abs, f64, |v| v.abs());
unop!(f64_neg, f64, |v| -v);
unop!(f64_ceil, f64, |v| canon_f64(v.ceil()));
unop!(f64_floor, f64, |v| canon_f64(v.floor()));
unop!(f64_trunc, f64, |v| canon_f64(v.trunc()));
unop!(f64_nearest, f64, |v| canon_f64(nearest_f64(v)));
unop!(f64_sqrt, f64, |v| canon_f64(v.sqrt()));

relop!(f64_eq, f64, |a, b| a == b);
relop!(f64_ne, f64, |a, b| a != b);
relop!(f64_lt, f64, |a, b| a < b);
relop!(f64_gt, f64, |a, b| a > b);
relop!(f64_le, f64, |a, b| a <= b);
relop!(f64_ge, f64, |a, b| a >= b);

// === conversions ========================================================

cvt!(i32_wrap_i64, i64, i32, |v| v as i32);
cvt_try!(i32_trunc_f32_s, f32, i32, |v| trunc_f32_i32(v));
cvt_try!(i32_trunc_f32_u, f32, u32, |v| trunc_f32_u32(v));
cvt_try!(i32_trunc_f64_s, f64, i32, |v| trunc_f64_i32(v));
cvt_try!(i32_trunc_f64_u, f64, u32, |v| trunc_f64_u32(v));
cvt!(i64_extend_i32_s, i32, i64, |v| i64::from(v));
cvt!(i64_extend_i32_u, u32, i64, |v| i64::from(v));
cvt_try!(i64_trunc_f32_s, f32, i64, |v| trunc_f32_i64(v));
cvt_try!(i64_trunc_f32_u, f32, u64, |v| trunc_f32_u64(v));
cvt_try!(i64_trunc_f64_s, f64, i64, |v| trunc_f64_i64(v));
cvt_try!(i64_trunc_f64_u, f64, u64, |v| trunc_f64_u64(v));
cvt!(f32_convert_i32_s, i32, f32, |v| v as f32);
cvt!(f32_convert_i32_u, u32, f32, |v| v as f32);
cvt!(f32_convert_i64_s, i64, f32, |v| v as f32);
cvt!(f32_convert_i64_u, u64, f32, |v| v as f32);
cvt!(f32_demote_f64, f64, f32, |v| canon_f32(v as f32));
cvt!(f64_convert_i32_s, i32, f64, |v| f64::from(v));
cvt!(f64_convert_i32_u, u32, f64, |v| f64::from(v));
cvt!(f64_convert_i64_s, i64, f64, |v| v as f64);
cvt!(f64_convert_i64_u, u64, f64, |v| v as f64);
cvt!(f64_promote_f32, f32, f64, |v| canon_f64(f64::from(v)));
cvt!(i32_reinterpret_f32, f32, i32, |v| v.to_bits() as i32);
cvt!(i64_reinterpret_f64, f64, i64, |v| v.to_bits() as i64);
cvt!(f32_reinterpret_i32, u32, f32, |v| f32::from_bits(v));
cvt!(f64_reinterpret_i64, u64, f64, |v| f64::from_bits(v));

// Saturating truncations (emitted only when the translator selected them).
cvt!(i32_trunc_sat_f32_s, f32, i32, |v| if v.is_nan() { 0 } else { v as i32 });
cvt!(i32_trunc_sat_f32_u, f32, u32, |v| if v.is_nan() { 0 } else { v as u32 });
cvt!(i32_trunc_sat_f64_s, f64, i32, |v| if v.is_nan() { 0 } else { v as i32 });
cvt!(i32_trunc_sat_f64_u, f64, u32, |v| if v.is_nan() { 0 } else { v as u32 });
cvt!(i64_trunc_sat_f32_s, f32, i64, |v| if v.is_nan() { 0 } else { v as i64 });
cvt!(i64_trunc_sat_f32_u, f32, u64, |v| if v.is_nan() { 0 } else { v as u64 });
cvt!(i64_trunc_sat_f64_s, f64, i64, |v| if v.is_nan() { 0 } else { v as i64 });
cvt!(i64_trunc_sat_f64_u, f64, u64, |v| if v.is_nan() { 0 } else { v as u64 });

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_ties_to_even() {
        assert_eq!(nearest_f32(2.5), 2.0);
        assert_eq!(nearest_f32(3.5), 4.0);
        assert_eq!(nearest_f32(-2.5), -2.0);
        assert_eq!(nearest_f32(0.5), 0.0);
        assert!(nearest_f32(-0.5).is_sign_negative());
        assert_eq!(nearest_f64(4.5), 4.0);
        assert_eq!(nearest_f64(5.5), 6.0);
    }

    #[test]
    fn min_max_zero_signs() {
        assert!(wmin_f32(0.0, -0.0).is_sign_negative());
        assert!(wmax_f32(0.0, -0.0).is_sign_positive());
        assert!(wmin_f64(-0.0, 0.0).is_sign_negative());
        assert!(wmax_f64(-0.0, 0.0).is_sign_positive());
        assert!(wmin_f32(f32::NAN, 1.0).is_nan());
        assert!(wmax_f64(1.0, f64::NAN).is_nan());
    }

    #[test]
    fn trunc_bounds() {
        assert_eq!(trunc_f32_i32(-2147483648.0), Ok(i32::MIN));
        assert_eq!(trunc_f32_i32(2147483648.0), Err(Trap::IntegerOverflow));
        assert_eq!(trunc_f64_i32(2147483647.9), Ok(i32::MAX));
        assert_eq!(trunc_f64_u32(-0.9), Ok(0));
        assert_eq!(trunc_f64_u32(-1.0), Err(Trap::IntegerOverflow));
        assert_eq!(
            trunc_f32_i64(f32::NAN),
            Err(Trap::BadConversionToInteger)
        );
    }

    #[test]
    fn canonical_nan_payload() {
        let noisy = f32::from_bits(0xffc0_1234);
        assert_eq!(canon_f32(noisy).to_bits(), 0xffc0_0000);
        let noisy = f64::from_bits(0x7ff8_0000_dead_beef);
        assert_eq!(canon_f64(noisy).to_bits(), 0x7ff8_0000_0000_0000);
    }
}
