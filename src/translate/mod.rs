//! Translation of parsed function bodies into threaded code streams.
//!
//! For every Wasm instruction the translator emits one frame: the handler
//! word (resolved for the current stack-top cursor position and, for memory
//! instructions, the memory's bounds-check policy), followed by the
//! immediates that instruction needs. The stream is generated once and never
//! mutated during execution.

mod code;
mod stacktop;

use crate::indices::{FuncIndex, GlobalIndex, MemoryIndex, TableIndex, TypeIndex};
use crate::interp::control as c;
use crate::interp::memory as m;
use crate::interp::numeric as n;
use crate::interp::variable as v;
use crate::interp::{Op, RING};
use crate::memory::BoundsPolicy;
use crate::types::{FuncType, WasmValType};
use crate::{wasm_unsupported, Error};
use alloc::boxed::Box;
use alloc::vec::Vec;
use code::CodeStream;
use stacktop::{CacheState, RingLayout};
use wasmparser::{
    BlockType, FuncToValidate, FuncValidatorAllocations, FunctionBody, MemArg, Operator,
    ValidatorResources,
};

/// One per-type operand-stack ring window, in register-file slots.
///
/// `begin == end` (or `usize::MAX`) disables stack-top caching for the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackTopRange {
    pub begin: usize,
    pub end: usize,
}

impl StackTopRange {
    pub const DISABLED: StackTopRange = StackTopRange {
        begin: usize::MAX,
        end: usize::MAX,
    };

    pub fn is_disabled(&self) -> bool {
        self.begin == self.end || self.begin == usize::MAX
    }
}

/// Options fixed at translation time and never re-read afterwards.
#[derive(Debug, Clone)]
pub struct CompileOption {
    /// Emit handlers that dispatch to their successor themselves; otherwise
    /// an outer loop fetches each handler and stack-top caching is disabled.
    pub is_tail_call: bool,
    /// `memory.grow` uses the strict protocol (-1 on failure) instead of
    /// clamping silently.
    pub grow_strict: bool,
    /// Accept the saturating float-to-int truncation opcodes.
    pub saturating_truncation: bool,
    pub i32_stack_top: StackTopRange,
    pub i64_stack_top: StackTopRange,
    pub f32_stack_top: StackTopRange,
    pub f64_stack_top: StackTopRange,
}

impl Default for CompileOption {
    fn default() -> Self {
        Self {
            is_tail_call: true,
            grow_strict: true,
            saturating_truncation: false,
            i32_stack_top: StackTopRange { begin: 0, end: RING },
            i64_stack_top: StackTopRange {
                begin: RING,
                end: 2 * RING,
            },
            f32_stack_top: StackTopRange {
                begin: 2 * RING,
                end: 3 * RING,
            },
            f64_stack_top: StackTopRange {
                begin: 3 * RING,
                end: 4 * RING,
            },
        }
    }
}

impl CompileOption {
    /// All stack-top caching off; with `is_tail_call = false` this is the
    /// by-reference interpreter.
    pub fn uncached(is_tail_call: bool) -> Self {
        Self {
            is_tail_call,
            grow_strict: true,
            saturating_truncation: false,
            i32_stack_top: StackTopRange::DISABLED,
            i64_stack_top: StackTopRange::DISABLED,
            f32_stack_top: StackTopRange::DISABLED,
            f64_stack_top: StackTopRange::DISABLED,
        }
    }

    /// Resolve the requested ring windows against the precompiled handler
    /// family. Each enabled window must be exactly its type's canonical ring;
    /// anything else has no precompiled handlers and is refused.
    pub(crate) fn ring_layout(&self) -> crate::Result<RingLayout> {
        if !self.is_tail_call {
            // By-reference mode: all operands live on the memory stack.
            let ranges = [
                self.i32_stack_top,
                self.i64_stack_top,
                self.f32_stack_top,
                self.f64_stack_top,
            ];
            if ranges.iter().any(|range| !range.is_disabled()) {
                return Err(Error::StackTopLayout(
                    "stack-top caching requires tail-call dispatch".into(),
                ));
            }
            return Ok(RingLayout::DISABLED);
        }

        let canonical = |i: usize| StackTopRange {
            begin: i * RING,
            end: (i + 1) * RING,
        };
        let ranges = [
            self.i32_stack_top,
            self.i64_stack_top,
            self.f32_stack_top,
            self.f64_stack_top,
        ];
        let mut enabled = [false; 4];
        for (i, range) in ranges.iter().enumerate() {
            if range.is_disabled() {
                continue;
            }
            if *range != canonical(i) {
                return Err(Error::StackTopLayout(alloc::format!(
                    "ring {}..{} has no precompiled handlers (expected {}..{})",
                    range.begin,
                    range.end,
                    canonical(i).begin,
                    canonical(i).end,
                )));
            }
            enabled[i] = true;
        }
        Ok(RingLayout::new(enabled))
    }
}

/// A translated function body.
#[derive(Debug)]
pub struct TranslatedFunc {
    pub(crate) code: Box<[usize]>,
    /// Bytes the parameters occupy at the frame base.
    pub(crate) param_bytes: usize,
    /// Bytes the results occupy at the frame base after return.
    pub(crate) result_bytes: usize,
    /// Total locals slab size (parameters included).
    pub(crate) locals_bytes: usize,
    /// Locals slab plus the maximum operand-stack depth.
    pub(crate) frame_bytes: usize,
}

/// What translation needs to know about the (already linked) module.
pub(crate) trait TranslateEnv {
    fn func_type(&self, index: FuncIndex) -> &FuncType;
    fn func_ref_ptr(&self, index: FuncIndex) -> usize;
    fn global_type(&self, index: GlobalIndex) -> WasmValType;
    fn global_ptr(&self, index: GlobalIndex) -> usize;
    fn memory_ptr(&self, index: MemoryIndex) -> usize;
    fn memory_policy(&self, index: MemoryIndex) -> BoundsPolicy;
    fn memory_grow_limit(&self, index: MemoryIndex) -> u64;
    fn table_ptr(&self, index: TableIndex) -> usize;
    fn type_ptr(&self, index: TypeIndex) -> usize;
    fn signature(&self, index: TypeIndex) -> &FuncType;
}

enum FrameKind {
    Block {
        end_fixups: Vec<usize>,
    },
    Loop {
        header_pc: usize,
    },
    If {
        else_fixup: Option<usize>,
        end_fixups: Vec<usize>,
    },
}

struct ControlFrame {
    kind: FrameKind,
    /// Logical stack height at entry.
    height: usize,
    /// Operand byte depth at entry (always a flush point).
    entry_bytes: usize,
    result: Option<WasmValType>,
    /// Whether the frame was opened in dead code (purely for end-pairing).
    dummy: bool,
    /// Whether the current position inside the frame is unreachable.
    unreachable: bool,
}

impl ControlFrame {
    fn result_bytes(&self) -> usize {
        self.result.map(|ty| ty.byte_size()).unwrap_or(0)
    }
}

/// Translate one function body.
pub(crate) fn translate_func<E: TranslateEnv>(
    env: &E,
    opts: &CompileOption,
    ty: &FuncType,
    body: &FunctionBody<'_>,
    func_to_validate: FuncToValidate<ValidatorResources>,
) -> crate::Result<TranslatedFunc> {
    let rings = opts.ring_layout()?;
    let mut validator = func_to_validate.into_validator(FuncValidatorAllocations::default());

    // Locals layout: parameters first, then declared locals, packed.
    let mut locals = Vec::new();
    let mut locals_bytes = 0_usize;
    for param in ty.params.iter() {
        locals.push((locals_bytes, *param));
        locals_bytes += param.byte_size();
    }
    let param_bytes = locals_bytes;

    let mut locals_reader = body.get_locals_reader()?;
    for _ in 0..locals_reader.get_count() {
        let offset = locals_reader.original_position();
        let (count, val_ty) = locals_reader.read()?;
        validator.define_locals(offset, count, val_ty)?;
        let val_ty = WasmValType::from_wasmparser(val_ty)?;
        for _ in 0..count {
            locals.push((locals_bytes, val_ty));
            locals_bytes += val_ty.byte_size();
        }
    }

    let result = match ty.results.len() {
        0 => None,
        1 => Some(ty.results[0]),
        _ => return Err(wasm_unsupported!("multi-value results")),
    };

    let mut translator = FuncTranslator {
        env,
        opts,
        rings,
        code: CodeStream::new(),
        stack: Vec::new(),
        cache: CacheState::default(),
        cur_bytes: 0,
        max_bytes: 0,
        locals,
        locals_bytes,
        frames: Vec::new(),
        func_result: result,
    };
    translator.frames.push(ControlFrame {
        kind: FrameKind::Block {
            end_fixups: Vec::new(),
        },
        height: 0,
        entry_bytes: 0,
        result,
        dummy: false,
        unreachable: false,
    });

    let mut reader = body.get_operators_reader()?;
    while !reader.eof() {
        let (op, offset) = reader.read_with_offset()?;
        validator.op(offset, &op)?;
        translator.op(&op)?;
    }
    validator.finish(reader.original_position())?;

    debug_assert!(translator.frames.is_empty());

    Ok(TranslatedFunc {
        code: translator.code.finish(),
        param_bytes,
        result_bytes: result.map(|ty| ty.byte_size()).unwrap_or(0),
        locals_bytes,
        frame_bytes: locals_bytes + translator.max_bytes,
    })
}

struct FuncTranslator<'a, E> {
    env: &'a E,
    opts: &'a CompileOption,
    rings: RingLayout,
    code: CodeStream,
    /// The full logical operand stack of the current frame.
    stack: Vec<WasmValType>,
    cache: CacheState,
    /// Total operand bytes (register-resident and memory-resident).
    cur_bytes: usize,
    max_bytes: usize,
    locals: Vec<(usize, WasmValType)>,
    locals_bytes: usize,
    frames: Vec<ControlFrame>,
    func_result: Option<WasmValType>,
}

impl<E: TranslateEnv> FuncTranslator<'_, E> {
    fn tail(&self) -> bool {
        self.opts.is_tail_call
    }

    fn caching(&self) -> bool {
        self.tail() && self.rings.any_enabled()
    }

    fn dead(&self) -> bool {
        self.frames.last().map(|f| f.unreachable).unwrap_or(true)
    }

    // === stack bookkeeping ==============================================

    fn push_ty(&mut self, ty: WasmValType) {
        self.stack.push(ty);
        self.cur_bytes += ty.byte_size();
        self.max_bytes = self.max_bytes.max(self.cur_bytes);
    }

    fn pop_ty(&mut self) -> WasmValType {
        let ty = self.stack.pop().expect("validated operand stack");
        self.cur_bytes -= ty.byte_size();
        ty
    }

    fn spill_table(ty: WasmValType) -> &'static [Op; RING] {
        match ty {
            WasmValType::I32 => &v::spill_i32::AT,
            WasmValType::I64 => &v::spill_i64::AT,
            WasmValType::F32 => &v::spill_f32::AT,
            WasmValType::F64 => &v::spill_f64::AT,
        }
    }

    fn fill_table(ty: WasmValType) -> &'static [Op; RING] {
        match ty {
            WasmValType::I32 => &v::fill_i32::AT,
            WasmValType::I64 => &v::fill_i64::AT,
            WasmValType::F32 => &v::fill_f32::AT,
            WasmValType::F64 => &v::fill_f64::AT,
        }
    }

    /// Spill every cached value to the memory stack, deepest first, and
    /// reset the cursors. Every control-flow boundary goes through here, so
    /// join points always see the canonical empty-ring state.
    fn flush(&mut self) {
        while !self.cache.is_empty() {
            let (ty, slot) = self.cache.spill_bottom();
            self.code.push_op(Self::spill_table(ty)[slot]);
        }
        self.cache.reset();
    }

    /// Bring the memory-stack top into its ring (it sits directly below the
    /// cached segment).
    fn fill_one(&mut self) {
        let below = self.stack[self.stack.len() - 1 - self.cache.seg_len()];
        let slot = self.cache.fill(below);
        self.code.push_op(Self::fill_table(below)[slot]);
    }

    /// Try to make the top `n` operands ring-resident. On success the caller
    /// may emit a cursor-specialized handler; on failure everything has been
    /// flushed and the operands are on the memory stack.
    fn try_cache_operands(&mut self, n: usize, results: &[WasmValType]) -> bool {
        if !self.caching() {
            return false;
        }
        let operands = self.stack.len() - n;
        if self.stack[operands..]
            .iter()
            .chain(results)
            .any(|ty| !self.rings.enabled(*ty))
        {
            self.flush();
            return false;
        }
        for ty in [
            WasmValType::I32,
            WasmValType::I64,
            WasmValType::F32,
            WasmValType::F64,
        ] {
            let of_type = self.stack[operands..].iter().filter(|t| **t == ty).count();
            if of_type > RING {
                self.flush();
                return false;
            }
        }
        loop {
            if self.cache.seg_len() >= n {
                return true;
            }
            let below = self.stack[self.stack.len() - 1 - self.cache.seg_len()];
            if self.cache.depth(below) == RING {
                self.flush();
                continue;
            }
            self.fill_one();
        }
    }

    /// Make room for a net push to `ty`'s ring.
    fn ensure_room(&mut self, ty: WasmValType) {
        if self.cache.depth(ty) == RING {
            self.flush();
        }
    }

    /// Emit the uncached variant for the current dispatch mode.
    fn stack_op(&mut self, tail: Op, byref: Op) {
        self.code.push_op(if self.tail() { tail } else { byref });
    }

    /// Uncached emission requires the operand stack to be entirely
    /// memory-resident.
    fn flushed_stack_op(&mut self, tail: Op, byref: Op) {
        if self.caching() {
            self.flush();
        }
        self.stack_op(tail, byref);
    }

    // === emission shapes ================================================

    /// A pure push (`t.const`, `local.get`, `global.get`). Returns whether
    /// the cached variant was emitted; the caller emits the immediates next.
    fn op_push(&mut self, ty: WasmValType, cached: &[Op; RING], tail: Op, byref: Op) {
        if self.caching() && self.rings.enabled(ty) {
            self.ensure_room(ty);
            let c = self.cache.cursor(ty);
            self.code.push_op(cached[c]);
            self.cache.push(ty);
        } else {
            // An uncached push lands on the memory stack; anything cached
            // above it would break stack order.
            self.flushed_stack_op(tail, byref);
        }
        self.push_ty(ty);
    }

    /// A pure typed pop (`local.set`, `global.set`).
    fn op_pop(&mut self, ty: WasmValType, cached: &[Op; RING], tail: Op, byref: Op) {
        if self.try_cache_operands(1, &[]) {
            let c = self.cache.cursor(ty);
            self.code.push_op(cached[c]);
            self.cache.pop(ty);
        } else {
            self.stack_op(tail, byref);
        }
        self.pop_ty();
    }

    fn op_binop(&mut self, ty: WasmValType, cached: &[Op; RING], tail: Op, byref: Op) {
        if self.try_cache_operands(2, &[]) {
            let c = self.cache.cursor(ty);
            self.code.push_op(cached[c]);
            self.cache.pop(ty);
            self.cache.pop(ty);
            self.cache.push(ty);
        } else {
            self.stack_op(tail, byref);
        }
        self.pop_ty();
        self.pop_ty();
        self.push_ty(ty);
    }

    fn op_unop(&mut self, ty: WasmValType, cached: &[Op; RING], tail: Op, byref: Op) {
        if self.try_cache_operands(1, &[]) {
            let c = self.cache.cursor(ty);
            self.code.push_op(cached[c]);
            self.cache.pop(ty);
            self.cache.push(ty);
        } else {
            self.stack_op(tail, byref);
        }
        self.pop_ty();
        self.push_ty(ty);
    }

    /// `ty x ty -> i32` across rings.
    fn op_relop(&mut self, ty: WasmValType, cached: &[[Op; RING]; RING], tail: Op, byref: Op) {
        let i32_ty = WasmValType::I32;
        if self.caching() && self.rings.enabled(ty) && self.rings.enabled(i32_ty) {
            self.ensure_room(i32_ty);
            if self.try_cache_operands(2, &[]) {
                let cv = self.cache.cursor(ty);
                let cr = self.cache.cursor(i32_ty);
                self.code.push_op(cached[cv][cr]);
                self.cache.pop(ty);
                self.cache.pop(ty);
                self.cache.push(i32_ty);
                self.pop_ty();
                self.pop_ty();
                self.push_ty(i32_ty);
                return;
            }
        } else if self.caching() {
            self.flush();
        }
        self.stack_op(tail, byref);
        self.pop_ty();
        self.pop_ty();
        self.push_ty(i32_ty);
    }

    /// `from -> to` across rings.
    fn op_cvt(
        &mut self,
        from: WasmValType,
        to: WasmValType,
        cached: &[[Op; RING]; RING],
        tail: Op,
        byref: Op,
    ) {
        if self.caching() && self.rings.enabled(from) && self.rings.enabled(to) {
            self.ensure_room(to);
            if self.try_cache_operands(1, &[]) {
                let cv = self.cache.cursor(from);
                let cr = self.cache.cursor(to);
                self.code.push_op(cached[cv][cr]);
                self.cache.pop(from);
                self.cache.push(to);
                self.pop_ty();
                self.push_ty(to);
                return;
            }
        } else if self.caching() {
            self.flush();
        }
        self.stack_op(tail, byref);
        self.pop_ty();
        self.push_ty(to);
    }

    // === memory emission ================================================

    fn mem_imms(&mut self, memory: MemoryIndex, memarg: &MemArg) {
        self.code.push_word(self.env.memory_ptr(memory));
        self.code.push_u32(u32::from(memarg.align));
        self.code.push_u32(memarg.offset as u32);
    }

    fn op_load_same(
        &mut self,
        memarg: &MemArg,
        cached: &[[Op; RING]; m::NUM_POLICIES],
        tail: &[Op; m::NUM_POLICIES],
        byref: &[Op; m::NUM_POLICIES],
    ) {
        let memory = MemoryIndex::from_u32(memarg.memory);
        let p = m::policy_index(self.env.memory_policy(memory));
        let i32_ty = WasmValType::I32;
        if self.try_cache_operands(1, &[]) {
            let c = self.cache.cursor(i32_ty);
            self.code.push_op(cached[p][c]);
            self.cache.pop(i32_ty);
            self.cache.push(i32_ty);
        } else {
            self.stack_op(tail[p], byref[p]);
        }
        self.mem_imms(memory, memarg);
        self.pop_ty();
        self.push_ty(i32_ty);
    }

    fn op_load_cross(
        &mut self,
        ty: WasmValType,
        memarg: &MemArg,
        cached: &[[[Op; RING]; RING]; m::NUM_POLICIES],
        tail: &[Op; m::NUM_POLICIES],
        byref: &[Op; m::NUM_POLICIES],
    ) {
        let memory = MemoryIndex::from_u32(memarg.memory);
        let p = m::policy_index(self.env.memory_policy(memory));
        let i32_ty = WasmValType::I32;
        if self.caching() && self.rings.enabled(ty) && self.rings.enabled(i32_ty) {
            self.ensure_room(ty);
            if self.try_cache_operands(1, &[]) {
                let ca = self.cache.cursor(i32_ty);
                let cv = self.cache.cursor(ty);
                self.code.push_op(cached[p][ca][cv]);
                self.cache.pop(i32_ty);
                self.cache.push(ty);
                self.mem_imms(memory, memarg);
                self.pop_ty();
                self.push_ty(ty);
                return;
            }
        } else if self.caching() {
            self.flush();
        }
        self.stack_op(tail[p], byref[p]);
        self.mem_imms(memory, memarg);
        self.pop_ty();
        self.push_ty(ty);
    }

    fn op_store_same(
        &mut self,
        memarg: &MemArg,
        cached: &[[Op; RING]; m::NUM_POLICIES],
        tail: &[Op; m::NUM_POLICIES],
        byref: &[Op; m::NUM_POLICIES],
    ) {
        let memory = MemoryIndex::from_u32(memarg.memory);
        let p = m::policy_index(self.env.memory_policy(memory));
        let i32_ty = WasmValType::I32;
        if self.try_cache_operands(2, &[]) {
            let c = self.cache.cursor(i32_ty);
            self.code.push_op(cached[p][c]);
            self.cache.pop(i32_ty);
            self.cache.pop(i32_ty);
        } else {
            self.stack_op(tail[p], byref[p]);
        }
        self.mem_imms(memory, memarg);
        self.pop_ty();
        self.pop_ty();
    }

    fn op_store_cross(
        &mut self,
        ty: WasmValType,
        memarg: &MemArg,
        cached: &[[[Op; RING]; RING]; m::NUM_POLICIES],
        tail: &[Op; m::NUM_POLICIES],
        byref: &[Op; m::NUM_POLICIES],
    ) {
        let memory = MemoryIndex::from_u32(memarg.memory);
        let p = m::policy_index(self.env.memory_policy(memory));
        let i32_ty = WasmValType::I32;
        if self.try_cache_operands(2, &[]) {
            let ca = self.cache.cursor(i32_ty);
            let cv = self.cache.cursor(ty);
            self.code.push_op(cached[p][ca][cv]);
            self.cache.pop(ty);
            self.cache.pop(i32_ty);
        } else {
            self.stack_op(tail[p], byref[p]);
        }
        self.mem_imms(memory, memarg);
        self.pop_ty();
        self.pop_ty();
    }

    // === control emission ===============================================

    /// Byte offset from `bp` of a branch target's operand-stack top: the
    /// locals slab plus the target frame's flushed entry depth.
    fn dest_at(&self, entry_bytes: usize) -> usize {
        self.locals_bytes + entry_bytes
    }

    /// Emit the `[target][result_bytes][dest]` immediate group for a branch
    /// to `depth`.
    fn branch_args(&mut self, depth: u32) {
        let idx = self.frames.len() - 1 - depth as usize;
        let (loop_pc, result_bytes, entry_bytes) = {
            let frame = &self.frames[idx];
            match &frame.kind {
                FrameKind::Loop { header_pc } => (Some(*header_pc), 0, frame.entry_bytes),
                _ => (None, frame.result_bytes(), frame.entry_bytes),
            }
        };
        match loop_pc {
            Some(pc) => self.code.push_target(pc),
            None => {
                let pos = self.code.push_target_placeholder();
                match &mut self.frames[idx].kind {
                    FrameKind::Block { end_fixups } | FrameKind::If { end_fixups, .. } => {
                        end_fixups.push(pos);
                    }
                    FrameKind::Loop { .. } => unreachable!(),
                }
            }
        }
        self.code.push_word(result_bytes);
        self.code.push_word(self.dest_at(entry_bytes));
    }

    fn mark_unreachable(&mut self) {
        self.cache.clear();
        let frame = self.frames.last_mut().expect("control frame");
        frame.unreachable = true;
        let height = frame.height;
        let entry_bytes = frame.entry_bytes;
        self.stack.truncate(height);
        self.cur_bytes = entry_bytes;
    }

    fn block_result(&self, blockty: BlockType) -> crate::Result<Option<WasmValType>> {
        match blockty {
            BlockType::Empty => Ok(None),
            BlockType::Type(ty) => Ok(Some(WasmValType::from_wasmparser(ty)?)),
            BlockType::FuncType(_) => Err(wasm_unsupported!("multi-value block type")),
        }
    }

    fn push_frame(&mut self, kind: FrameKind, result: Option<WasmValType>, dummy: bool) {
        self.frames.push(ControlFrame {
            kind,
            height: self.stack.len(),
            entry_bytes: self.cur_bytes,
            result,
            dummy,
            unreachable: dummy,
        });
    }

    // === the dispatcher =================================================

    fn op(&mut self, op: &Operator<'_>) -> crate::Result<()> {
        use WasmValType::{F32, F64, I32, I64};

        if self.dead() {
            return self.dead_op(op);
        }

        macro_rules! bin {
            ($mod_:ident, $t:ident) => {
                self.op_binop(
                    $t,
                    &n::$mod_::CACHED,
                    n::$mod_::TAIL,
                    n::$mod_::BYREF,
                )
            };
        }
        macro_rules! un {
            ($mod_:ident, $t:ident) => {
                self.op_unop($t, &n::$mod_::CACHED, n::$mod_::TAIL, n::$mod_::BYREF)
            };
        }
        macro_rules! rel {
            ($mod_:ident, $t:ident) => {
                self.op_relop($t, &n::$mod_::CACHED, n::$mod_::TAIL, n::$mod_::BYREF)
            };
        }
        macro_rules! cvt {
            ($mod_:ident, $from:ident, $to:ident) => {
                self.op_cvt(
                    $from,
                    $to,
                    &n::$mod_::CACHED,
                    n::$mod_::TAIL,
                    n::$mod_::BYREF,
                )
            };
        }
        macro_rules! load_same {
            ($mod_:ident, $memarg:expr) => {
                self.op_load_same($memarg, &m::$mod_::CACHED, &m::$mod_::TAIL, &m::$mod_::BYREF)
            };
        }
        macro_rules! load_cross {
            ($mod_:ident, $t:ident, $memarg:expr) => {
                self.op_load_cross(
                    $t,
                    $memarg,
                    &m::$mod_::CACHED,
                    &m::$mod_::TAIL,
                    &m::$mod_::BYREF,
                )
            };
        }
        macro_rules! store_same {
            ($mod_:ident, $memarg:expr) => {
                self.op_store_same($memarg, &m::$mod_::CACHED, &m::$mod_::TAIL, &m::$mod_::BYREF)
            };
        }
        macro_rules! store_cross {
            ($mod_:ident, $t:ident, $memarg:expr) => {
                self.op_store_cross(
                    $t,
                    $memarg,
                    &m::$mod_::CACHED,
                    &m::$mod_::TAIL,
                    &m::$mod_::BYREF,
                )
            };
        }

        match op {
            // --- control ---
            Operator::Unreachable => {
                self.code.push_op(c::unreachable::OP);
                self.mark_unreachable();
            }
            Operator::Nop => {}
            Operator::Block { blockty } => {
                let result = self.block_result(*blockty)?;
                if self.caching() {
                    self.flush();
                }
                self.push_frame(
                    FrameKind::Block {
                        end_fixups: Vec::new(),
                    },
                    result,
                    false,
                );
            }
            Operator::Loop { blockty } => {
                let result = self.block_result(*blockty)?;
                if self.caching() {
                    self.flush();
                }
                let header_pc = self.code.pc();
                self.push_frame(FrameKind::Loop { header_pc }, result, false);
            }
            Operator::If { blockty } => {
                let result = self.block_result(*blockty)?;
                if self.caching() {
                    self.flush();
                }
                self.pop_ty();
                let entry_bytes = self.cur_bytes;
                self.stack_op(c::br_unless::TAIL, c::br_unless::BYREF);
                let else_fixup = self.code.push_target_placeholder();
                self.code.push_word(0);
                self.code.push_word(self.dest_at(entry_bytes));
                self.push_frame(
                    FrameKind::If {
                        else_fixup: Some(else_fixup),
                        end_fixups: Vec::new(),
                    },
                    result,
                    false,
                );
            }
            Operator::Else => self.else_op()?,
            Operator::End => self.end_op()?,
            Operator::Br { relative_depth } => {
                self.flush();
                self.stack_op(c::br::TAIL, c::br::BYREF);
                self.branch_args(*relative_depth);
                self.mark_unreachable();
            }
            Operator::BrIf { relative_depth } => {
                self.flush();
                self.stack_op(c::br_if::TAIL, c::br_if::BYREF);
                self.branch_args(*relative_depth);
                self.pop_ty();
            }
            Operator::BrTable { targets } => {
                self.flush();
                self.stack_op(c::br_table::TAIL, c::br_table::BYREF);
                self.pop_ty();
                self.code.push_word(targets.len() as usize);
                for depth in targets.targets() {
                    self.branch_args(depth?);
                }
                self.branch_args(targets.default());
                self.mark_unreachable();
            }
            Operator::Return => {
                self.flush();
                self.code.push_op(c::ret::OP);
                self.code
                    .push_word(self.func_result.map(|ty| ty.byte_size()).unwrap_or(0));
                self.mark_unreachable();
            }
            Operator::Call { function_index } => {
                let index = FuncIndex::from_u32(*function_index);
                let (params, results) = {
                    let ty = self.env.func_type(index);
                    (ty.params.len(), ty.results.clone())
                };
                self.flush();
                self.stack_op(c::call::TAIL, c::call::BYREF);
                self.code.push_word(self.env.func_ref_ptr(index));
                for _ in 0..params {
                    self.pop_ty();
                }
                for ty in results.iter() {
                    self.push_ty(*ty);
                }
            }
            Operator::CallIndirect {
                type_index,
                table_index,
            } => {
                let ty_index = TypeIndex::from_u32(*type_index);
                let (params, results) = {
                    let ty = self.env.signature(ty_index);
                    (ty.params.len(), ty.results.clone())
                };
                self.flush();
                self.stack_op(c::call_indirect::TAIL, c::call_indirect::BYREF);
                self.code
                    .push_word(self.env.table_ptr(TableIndex::from_u32(*table_index)));
                self.code.push_word(self.env.type_ptr(ty_index));
                self.pop_ty(); // table index
                for _ in 0..params {
                    self.pop_ty();
                }
                for ty in results.iter() {
                    self.push_ty(*ty);
                }
            }

            // --- parametric ---
            Operator::Drop => {
                let ty = *self.stack.last().expect("validated operand stack");
                if self.caching() && !self.cache.is_empty() {
                    // The top value is ring-resident: dropping it is pure
                    // translation-time bookkeeping.
                    self.cache.pop(ty);
                    self.pop_ty();
                } else {
                    match ty.byte_size() {
                        4 => self.stack_op(c::drop_32::TAIL, c::drop_32::BYREF),
                        _ => self.stack_op(c::drop_64::TAIL, c::drop_64::BYREF),
                    }
                    self.pop_ty();
                }
            }
            Operator::Select => {
                let ty = self.stack[self.stack.len() - 2];
                if self.caching() {
                    self.flush();
                }
                match ty.byte_size() {
                    4 => self.stack_op(c::select_32::TAIL, c::select_32::BYREF),
                    _ => self.stack_op(c::select_64::TAIL, c::select_64::BYREF),
                }
                self.pop_ty();
                self.pop_ty();
                self.pop_ty();
                self.push_ty(ty);
            }

            // --- variables ---
            Operator::LocalGet { local_index } => {
                let (offset, ty) = self.locals[*local_index as usize];
                let (cached, tail, byref) = match ty {
                    I32 => (
                        &v::local_get_i32::CACHED,
                        v::local_get_i32::TAIL,
                        v::local_get_i32::BYREF,
                    ),
                    I64 => (
                        &v::local_get_i64::CACHED,
                        v::local_get_i64::TAIL,
                        v::local_get_i64::BYREF,
                    ),
                    F32 => (
                        &v::local_get_f32::CACHED,
                        v::local_get_f32::TAIL,
                        v::local_get_f32::BYREF,
                    ),
                    F64 => (
                        &v::local_get_f64::CACHED,
                        v::local_get_f64::TAIL,
                        v::local_get_f64::BYREF,
                    ),
                };
                self.op_push(ty, cached, tail, byref);
                self.code.push_word(offset);
            }
            Operator::LocalSet { local_index } => {
                let (offset, ty) = self.locals[*local_index as usize];
                let (cached, tail, byref) = match ty {
                    I32 => (
                        &v::local_set_i32::CACHED,
                        v::local_set_i32::TAIL,
                        v::local_set_i32::BYREF,
                    ),
                    I64 => (
                        &v::local_set_i64::CACHED,
                        v::local_set_i64::TAIL,
                        v::local_set_i64::BYREF,
                    ),
                    F32 => (
                        &v::local_set_f32::CACHED,
                        v::local_set_f32::TAIL,
                        v::local_set_f32::BYREF,
                    ),
                    F64 => (
                        &v::local_set_f64::CACHED,
                        v::local_set_f64::TAIL,
                        v::local_set_f64::BYREF,
                    ),
                };
                self.op_pop(ty, cached, tail, byref);
                self.code.push_word(offset);
            }
            Operator::LocalTee { local_index } => {
                let (offset, ty) = self.locals[*local_index as usize];
                let (cached, tail, byref) = match ty {
                    I32 => (
                        &v::local_tee_i32::CACHED,
                        v::local_tee_i32::TAIL,
                        v::local_tee_i32::BYREF,
                    ),
                    I64 => (
                        &v::local_tee_i64::CACHED,
                        v::local_tee_i64::TAIL,
                        v::local_tee_i64::BYREF,
                    ),
                    F32 => (
                        &v::local_tee_f32::CACHED,
                        v::local_tee_f32::TAIL,
                        v::local_tee_f32::BYREF,
                    ),
                    F64 => (
                        &v::local_tee_f64::CACHED,
                        v::local_tee_f64::TAIL,
                        v::local_tee_f64::BYREF,
                    ),
                };
                if self.try_cache_operands(1, &[]) {
                    let cursor = self.cache.cursor(ty);
                    self.code.push_op(cached[cursor]);
                } else {
                    self.stack_op(tail, byref);
                }
                self.code.push_word(offset);
            }
            Operator::GlobalGet { global_index } => {
                let index = GlobalIndex::from_u32(*global_index);
                let ty = self.env.global_type(index);
                let (cached, tail, byref) = match ty {
                    I32 => (
                        &v::global_get_i32::CACHED,
                        v::global_get_i32::TAIL,
                        v::global_get_i32::BYREF,
                    ),
                    I64 => (
                        &v::global_get_i64::CACHED,
                        v::global_get_i64::TAIL,
                        v::global_get_i64::BYREF,
                    ),
                    F32 => (
                        &v::global_get_f32::CACHED,
                        v::global_get_f32::TAIL,
                        v::global_get_f32::BYREF,
                    ),
                    F64 => (
                        &v::global_get_f64::CACHED,
                        v::global_get_f64::TAIL,
                        v::global_get_f64::BYREF,
                    ),
                };
                self.op_push(ty, cached, tail, byref);
                self.code.push_word(self.env.global_ptr(index));
            }
            Operator::GlobalSet { global_index } => {
                let index = GlobalIndex::from_u32(*global_index);
                let ty = self.env.global_type(index);
                let (cached, tail, byref) = match ty {
                    I32 => (
                        &v::global_set_i32::CACHED,
                        v::global_set_i32::TAIL,
                        v::global_set_i32::BYREF,
                    ),
                    I64 => (
                        &v::global_set_i64::CACHED,
                        v::global_set_i64::TAIL,
                        v::global_set_i64::BYREF,
                    ),
                    F32 => (
                        &v::global_set_f32::CACHED,
                        v::global_set_f32::TAIL,
                        v::global_set_f32::BYREF,
                    ),
                    F64 => (
                        &v::global_set_f64::CACHED,
                        v::global_set_f64::TAIL,
                        v::global_set_f64::BYREF,
                    ),
                };
                self.op_pop(ty, cached, tail, byref);
                self.code.push_word(self.env.global_ptr(index));
            }

            // --- memory ---
            Operator::I32Load { memarg } => load_same!(i32_load, memarg),
            Operator::I32Load8S { memarg } => load_same!(i32_load8_s, memarg),
            Operator::I32Load8U { memarg } => load_same!(i32_load8_u, memarg),
            Operator::I32Load16S { memarg } => load_same!(i32_load16_s, memarg),
            Operator::I32Load16U { memarg } => load_same!(i32_load16_u, memarg),
            Operator::I64Load { memarg } => load_cross!(i64_load, I64, memarg),
            Operator::I64Load8S { memarg } => load_cross!(i64_load8_s, I64, memarg),
            Operator::I64Load8U { memarg } => load_cross!(i64_load8_u, I64, memarg),
            Operator::I64Load16S { memarg } => load_cross!(i64_load16_s, I64, memarg),
            Operator::I64Load16U { memarg } => load_cross!(i64_load16_u, I64, memarg),
            Operator::I64Load32S { memarg } => load_cross!(i64_load32_s, I64, memarg),
            Operator::I64Load32U { memarg } => load_cross!(i64_load32_u, I64, memarg),
            Operator::F32Load { memarg } => load_cross!(f32_load, F32, memarg),
            Operator::F64Load { memarg } => load_cross!(f64_load, F64, memarg),
            Operator::I32Store { memarg } => store_same!(i32_store, memarg),
            Operator::I32Store8 { memarg } => store_same!(i32_store8, memarg),
            Operator::I32Store16 { memarg } => store_same!(i32_store16, memarg),
            Operator::I64Store { memarg } => store_cross!(i64_store, I64, memarg),
            Operator::I64Store8 { memarg } => store_cross!(i64_store8, I64, memarg),
            Operator::I64Store16 { memarg } => store_cross!(i64_store16, I64, memarg),
            Operator::I64Store32 { memarg } => store_cross!(i64_store32, I64, memarg),
            Operator::F32Store { memarg } => store_cross!(f32_store, F32, memarg),
            Operator::F64Store { memarg } => store_cross!(f64_store, F64, memarg),
            Operator::MemorySize { mem, .. } => {
                let memory = MemoryIndex::from_u32(*mem);
                self.flushed_stack_op(m::memory_size::TAIL, m::memory_size::BYREF);
                self.code.push_word(self.env.memory_ptr(memory));
                self.push_ty(I32);
            }
            Operator::MemoryGrow { mem, .. } => {
                let memory = MemoryIndex::from_u32(*mem);
                self.flushed_stack_op(m::memory_grow::TAIL, m::memory_grow::BYREF);
                self.code.push_word(self.env.memory_ptr(memory));
                self.code
                    .push_word(self.env.memory_grow_limit(memory) as usize);
                self.code.push_word(usize::from(self.opts.grow_strict));
                self.pop_ty();
                self.push_ty(I32);
            }

            // --- constants ---
            Operator::I32Const { value } => {
                self.op_push(
                    I32,
                    &n::i32_const::CACHED,
                    n::i32_const::TAIL,
                    n::i32_const::BYREF,
                );
                self.code.push_u32(*value as u32);
            }
            Operator::I64Const { value } => {
                self.op_push(
                    I64,
                    &n::i64_const::CACHED,
                    n::i64_const::TAIL,
                    n::i64_const::BYREF,
                );
                self.code.push_u64(*value as u64);
            }
            Operator::F32Const { value } => {
                self.op_push(
                    F32,
                    &n::f32_const::CACHED,
                    n::f32_const::TAIL,
                    n::f32_const::BYREF,
                );
                self.code.push_u32(value.bits());
            }
            Operator::F64Const { value } => {
                self.op_push(
                    F64,
                    &n::f64_const::CACHED,
                    n::f64_const::TAIL,
                    n::f64_const::BYREF,
                );
                self.code.push_u64(value.bits());
            }

            // --- i32 ---
            Operator::I32Add => bin!(i32_add, I32),
            Operator::I32Sub => bin!(i32_sub, I32),
            Operator::I32Mul => bin!(i32_mul, I32),
            Operator::I32DivS => bin!(i32_div_s, I32),
            Operator::I32DivU => bin!(i32_div_u, I32),
            Operator::I32RemS => bin!(i32_rem_s, I32),
            Operator::I32RemU => bin!(i32_rem_u, I32),
            Operator::I32And => bin!(i32_and, I32),
            Operator::I32Or => bin!(i32_or, I32),
            Operator::I32Xor => bin!(i32_xor, I32),
            Operator::I32Shl => bin!(i32_shl, I32),
            Operator::I32ShrS => bin!(i32_shr_s, I32),
            Operator::I32ShrU => bin!(i32_shr_u, I32),
            Operator::I32Rotl => bin!(i32_rotl, I32),
            Operator::I32Rotr => bin!(i32_rotr, I32),
            Operator::I32Clz => un!(i32_clz, I32),
            Operator::I32Ctz => un!(i32_ctz, I32),
            Operator::I32Popcnt => un!(i32_popcnt, I32),
            Operator::I32Eqz => un!(i32_eqz, I32),
            Operator::I32Eq => bin!(i32_eq, I32),
            Operator::I32Ne => bin!(i32_ne, I32),
            Operator::I32LtS => bin!(i32_lt_s, I32),
            Operator::I32LtU => bin!(i32_lt_u, I32),
            Operator::I32GtS => bin!(i32_gt_s, I32),
            Operator::I32GtU => bin!(i32_gt_u, I32),
            Operator::I32LeS => bin!(i32_le_s, I32),
            Operator::I32LeU => bin!(i32_le_u, I32),
            Operator::I32GeS => bin!(i32_ge_s, I32),
            Operator::I32GeU => bin!(i32_ge_u, I32),

            // --- i64 ---
            Operator::I64Add => bin!(i64_add, I64),
            Operator::I64Sub => bin!(i64_sub, I64),
            Operator::I64Mul => bin!(i64_mul, I64),
            Operator::I64DivS => bin!(i64_div_s, I64),
            Operator::I64DivU => bin!(i64_div_u, I64),
            Operator::I64RemS => bin!(i64_rem_s, I64),
            Operator::I64RemU => bin!(i64_rem_u, I64),
            Operator::I64And => bin!(i64_and, I64),
            Operator::I64Or => bin!(i64_or, I64),
            Operator::I64Xor => bin!(i64_xor, I64),
            Operator::I64Shl => bin!(i64_shl, I64),
            Operator::I64ShrS => bin!(i64_shr_s, I64),
            Operator::I64ShrU => bin!(i64_shr_u, I64),
            Operator::I64Rotl => bin!(i64_rotl, I64),
            Operator::I64Rotr => bin!(i64_rotr, I64),
            Operator::I64Clz => un!(i64_clz, I64),
            Operator::I64Ctz => un!(i64_ctz, I64),
            Operator::I64Popcnt => un!(i64_popcnt, I64),
            Operator::I64Eqz => cvt!(i64_eqz, I64, I32),
            Operator::I64Eq => rel!(i64_eq, I64),
            Operator::I64Ne => rel!(i64_ne, I64),
            Operator::I64LtS => rel!(i64_lt_s, I64),
            Operator::I64LtU => rel!(i64_lt_u, I64),
            Operator::I64GtS => rel!(i64_gt_s, I64),
            Operator::I64GtU => rel!(i64_gt_u, I64),
            Operator::I64LeS => rel!(i64_le_s, I64),
            Operator::I64LeU => rel!(i64_le_u, I64),
            Operator::I64GeS => rel!(i64_ge_s, I64),
            Operator::I64GeU => rel!(i64_ge_u, I64),

            // --- f32 ---
            Operator::F32Add => bin!(f32_add, F32),
            Operator::F32Sub => bin!(f32_sub, F32),
            Operator::F32Mul => bin!(f32_mul, F32),
            Operator::F32Div => bin!(f32_div, F32),
            Operator::F32Min => bin!(f32_min, F32),
            Operator::F32Max => bin!(f32_max, F32),
            Operator::F32Copysign => bin!(f32_copysign, F32),
            Operator::F32Abs => un!(f32_abs, F32),
            Operator::F32Neg => un!(f32_neg, F32),
            Operator::F32Ceil => un!(f32_ceil, F32),
            Operator::F32Floor => un!(f32_floor, F32),
            Operator::F32Trunc => un!(f32_trunc, F32),
            Operator::F32Nearest => un!(f32_nearest, F32),
            Operator::F32Sqrt => un!(f32_sqrt, F32),
            Operator::F32Eq => rel!(f32_eq, F32),
            Operator::F32Ne => rel!(f32_ne, F32),
            Operator::F32Lt => rel!(f32_lt, F32),
            Operator::F32Gt => rel!(f32_gt, F32),
            Operator::F32Le => rel!(f32_le, F32),
            Operator::F32Ge => rel!(f32_ge, F32),

            // --- f64 ---
            Operator::F64Add => bin!(f64_add, F64),
            Operator::F64Sub => bin!(f64_sub, F64),
            Operator::F64Mul => bin!(f64_mul, F64),
            Operator::F64Div => bin!(f64_div, F64),
            Operator::F64Min => bin!(f64_min, F64),
            Operator::F64Max => bin!(f64_max, F64),
            Operator::F64Copysign => bin!(f64_copysign, F64),
            Operator::F64Abs => un!(f64_abs, F64),
            Operator::F64Neg => un!(f64_neg, F64),
            Operator::F64Ceil => un!(f64_ceil, F64),
            Operator::F64Floor => un!(f64_floor, F64),
            Operator::F64Trunc => un!(f64_trunc, F64),
            Operator::F64Nearest => un!(f64_nearest, F64),
            Operator::F64Sqrt => un!(f64_sqrt, F64),
            Operator::F64Eq => rel!(f64_eq, F64),
            Operator::F64Ne => rel!(f64_ne, F64),
            Operator::F64Lt => rel!(f64_lt, F64),
            Operator::F64Gt => rel!(f64_gt, F64),
            Operator::F64Le => rel!(f64_le, F64),
            Operator::F64Ge => rel!(f64_ge, F64),

            // --- conversions ---
            Operator::I32WrapI64 => cvt!(i32_wrap_i64, I64, I32),
            Operator::I32TruncF32S => cvt!(i32_trunc_f32_s, F32, I32),
            Operator::I32TruncF32U => cvt!(i32_trunc_f32_u, F32, I32),
            Operator::I32TruncF64S => cvt!(i32_trunc_f64_s, F64, I32),
            Operator::I32TruncF64U => cvt!(i32_trunc_f64_u, F64, I32),
            Operator::I64ExtendI32S => cvt!(i64_extend_i32_s, I32, I64),
            Operator::I64ExtendI32U => cvt!(i64_extend_i32_u, I32, I64),
            Operator::I64TruncF32S => cvt!(i64_trunc_f32_s, F32, I64),
            Operator::I64TruncF32U => cvt!(i64_trunc_f32_u, F32, I64),
            Operator::I64TruncF64S => cvt!(i64_trunc_f64_s, F64, I64),
            Operator::I64TruncF64U => cvt!(i64_trunc_f64_u, F64, I64),
            Operator::F32ConvertI32S => cvt!(f32_convert_i32_s, I32, F32),
            Operator::F32ConvertI32U => cvt!(f32_convert_i32_u, I32, F32),
            Operator::F32ConvertI64S => cvt!(f32_convert_i64_s, I64, F32),
            Operator::F32ConvertI64U => cvt!(f32_convert_i64_u, I64, F32),
            Operator::F32DemoteF64 => cvt!(f32_demote_f64, F64, F32),
            Operator::F64ConvertI32S => cvt!(f64_convert_i32_s, I32, F64),
            Operator::F64ConvertI32U => cvt!(f64_convert_i32_u, I32, F64),
            Operator::F64ConvertI64S => cvt!(f64_convert_i64_s, I64, F64),
            Operator::F64ConvertI64U => cvt!(f64_convert_i64_u, I64, F64),
            Operator::F64PromoteF32 => cvt!(f64_promote_f32, F32, F64),
            Operator::I32ReinterpretF32 => cvt!(i32_reinterpret_f32, F32, I32),
            Operator::I64ReinterpretF64 => cvt!(i64_reinterpret_f64, F64, I64),
            Operator::F32ReinterpretI32 => cvt!(f32_reinterpret_i32, I32, F32),
            Operator::F64ReinterpretI64 => cvt!(f64_reinterpret_i64, I64, F64),

            Operator::I32TruncSatF32S
            | Operator::I32TruncSatF32U
            | Operator::I32TruncSatF64S
            | Operator::I32TruncSatF64U
            | Operator::I64TruncSatF32S
            | Operator::I64TruncSatF32U
            | Operator::I64TruncSatF64S
            | Operator::I64TruncSatF64U
                if !self.opts.saturating_truncation =>
            {
                return Err(wasm_unsupported!(
                    "saturating truncation not selected: {op:?}"
                ));
            }
            Operator::I32TruncSatF32S => cvt!(i32_trunc_sat_f32_s, F32, I32),
            Operator::I32TruncSatF32U => cvt!(i32_trunc_sat_f32_u, F32, I32),
            Operator::I32TruncSatF64S => cvt!(i32_trunc_sat_f64_s, F64, I32),
            Operator::I32TruncSatF64U => cvt!(i32_trunc_sat_f64_u, F64, I32),
            Operator::I64TruncSatF32S => cvt!(i64_trunc_sat_f32_s, F32, I64),
            Operator::I64TruncSatF32U => cvt!(i64_trunc_sat_f32_u, F32, I64),
            Operator::I64TruncSatF64S => cvt!(i64_trunc_sat_f64_s, F64, I64),
            Operator::I64TruncSatF64U => cvt!(i64_trunc_sat_f64_u, F64, I64),

            op => return Err(wasm_unsupported!("opcode {op:?}")),
        }
        Ok(())
    }

    /// Handle an operator in unreachable code: only frame pairing matters.
    fn dead_op(&mut self, op: &Operator<'_>) -> crate::Result<()> {
        match op {
            Operator::Block { .. } | Operator::Loop { .. } | Operator::If { .. } => {
                self.push_frame(
                    FrameKind::Block {
                        end_fixups: Vec::new(),
                    },
                    None,
                    true,
                );
            }
            Operator::Else => self.else_op()?,
            Operator::End => self.end_op()?,
            _ => {}
        }
        Ok(())
    }

    fn else_op(&mut self) -> crate::Result<()> {
        let frame = self.frames.last_mut().expect("control frame");
        if frame.dummy {
            return Ok(());
        }
        if !matches!(frame.kind, FrameKind::If { .. }) {
            return Err(wasm_unsupported!("mispaired else"));
        }

        // Close the then-arm: if it falls through, route it to the end.
        if !self.frames.last().unwrap().unreachable {
            self.flush();
            self.stack_op(c::br::TAIL, c::br::BYREF);
            self.branch_args(0);
        }

        let frame = self.frames.last_mut().unwrap();
        let FrameKind::If { else_fixup, .. } = &mut frame.kind else {
            unreachable!()
        };
        let pos = else_fixup.take().expect("else already seen");
        let height = frame.height;
        let entry_bytes = frame.entry_bytes;
        frame.unreachable = false;

        let pc = self.code.pc();
        self.code.patch_target(pos, pc);
        self.stack.truncate(height);
        self.cur_bytes = entry_bytes;
        self.cache.clear();
        Ok(())
    }

    fn end_op(&mut self) -> crate::Result<()> {
        let live = !self.frames.last().expect("control frame").unreachable;
        let frame = self.frames.pop().expect("control frame");

        if frame.dummy {
            return Ok(());
        }

        if live && self.caching() {
            self.flush();
        }

        let pc = self.code.pc();
        match frame.kind {
            FrameKind::Loop { .. } => {}
            FrameKind::Block { end_fixups } => {
                for pos in end_fixups {
                    self.code.patch_target(pos, pc);
                }
            }
            FrameKind::If {
                else_fixup,
                end_fixups,
            } => {
                // `if` without `else`: the false edge falls through here.
                if let Some(pos) = else_fixup {
                    self.code.patch_target(pos, pc);
                }
                for pos in end_fixups {
                    self.code.patch_target(pos, pc);
                }
            }
        }

        // Restore the outer frame's view: entry state plus the result.
        self.stack.truncate(frame.height);
        self.cur_bytes = frame.entry_bytes;
        self.cache.clear();
        if let Some(ty) = frame.result {
            self.push_ty(ty);
        }

        if self.frames.is_empty() {
            // Function end: the implicit return.
            self.code.push_op(c::ret::OP);
            self.code
                .push_word(self.func_result.map(|ty| ty.byte_size()).unwrap_or(0));
        } else if let Some(outer) = self.frames.last_mut() {
            // Code after a closed frame is statically reachable again.
            outer.unreachable = false;
        }
        Ok(())
    }
}
