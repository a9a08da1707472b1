use crate::mmap::Mmap;
use crate::types::MemoryType;
use crate::utils::{round_usize_up_to_host_pages, usize_is_multiple_of_host_page_size};
use crate::{Error, FULL_GUARD_RESERVE, WASM32_MAX_SIZE};
use alloc::format;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use parking_lot::{Condvar, Mutex};

/// Which kind of backing store newly created memories get.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryBackendKind {
    /// Reserve the full guarded address range up front; the base pointer is
    /// stable and growth only changes page protections. Accesses keep a
    /// dynamic length check because this crate installs no fault handler.
    #[default]
    Mmap,
    /// Like [`MemoryBackendKind::Mmap`], but the embedder asserts it has
    /// installed an out-of-bounds fault bridge (kernel or signal-handler
    /// level), so in-window checks can be elided and page protection traps
    /// the rest.
    MmapGuarded,
    /// Heap-allocated backing store; growth may relocate the base pointer and
    /// concurrent accessors synchronize through the grow protocol.
    Alloc,
}

/// The bounds check a memory instruction performs before dereferencing.
///
/// The translator hardwires exactly one policy into each memory handler it
/// emits, based on what the backing store can guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsPolicy {
    /// Full check against the current length; no backend guarantees assumed.
    Generic,
    /// No check on the hot path: a wasm32 access through a 2^33-byte guarded
    /// reservation cannot escape the mapping, page protection traps the rest.
    MmapFull,
    /// Check only that the effective offset fits a power-of-two window; page
    /// protection handles the interior.
    MmapPartial,
    /// Full check against the atomic length on every access; required when
    /// the Wasm page size is smaller than the host page size, because page
    /// protection is then too coarse.
    MmapDynamic,
    /// Full check under the grow-protocol guard; the base may relocate.
    Allocator,
}

/// The window checked by [`BoundsPolicy::MmapPartial`].
pub(crate) const PARTIAL_WINDOW: u64 = 1 << 31;

const SPIN_LIMIT: u32 = 64;

enum Backend {
    Mmap {
        mmap: Mmap,
        /// Bytes currently mapped read-write, a multiple of the host page
        /// size and `>=` the byte length.
        accessible: AtomicUsize,
        /// Whether the reservation covers the full `2^33` guarded range.
        full_guard: bool,
        /// Whether the embedder promised to turn page faults into traps.
        fault_bridge: bool,
    },
    Alloc {
        /// Touched only by a grower holding the protocol's exclusive right.
        buf: UnsafeCell<Vec<u8>>,
    },
}

/// A linear memory.
///
/// The byte range `[base, base + length)` is always mapped and valid until a
/// grow mutates it. For the mmap backend the base is stable for the memory's
/// lifetime; for the allocator backend it may relocate, which is why readers
/// and writers participate in the grow protocol.
pub struct Memory {
    backend: Backend,
    base: AtomicPtr<u8>,
    /// Current byte length (`page_count * page_size`).
    length: AtomicUsize,
    /// Set while a grower holds the memory; accessors drain and wait.
    growing: AtomicBool,
    /// In-flight read/write operations on the allocator backend.
    active_ops: AtomicUsize,
    gate: Mutex<()>,
    flag_cleared: Condvar,
    ops_drained: Condvar,
    ty: MemoryType,
    index: u32,
}

// SAFETY: shared mutation of the backing store is mediated by the grow
// protocol (allocator backend) or is append-only behind atomics (mmap
// backend); the raw cells are never touched outside those rules.
unsafe impl Send for Memory {}
// SAFETY: as above.
unsafe impl Sync for Memory {}

impl core::fmt::Debug for Memory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Memory")
            .field("index", &self.index)
            .field("ty", &self.ty)
            .field("length", &self.length.load(Ordering::Relaxed))
            .field("policy", &self.bounds_policy())
            .finish()
    }
}

impl Memory {
    /// Create a memory of exactly `ty.limits.min` zeroed pages.
    pub fn new(ty: MemoryType, index: u32, kind: MemoryBackendKind) -> crate::Result<Self> {
        let min_bytes = ty
            .minimum_byte_size()
            .and_then(|bytes| usize::try_from(bytes).ok())
            .ok_or_else(|| Error::OutOfMemory(format!("memory of {} pages", ty.limits.min)))?;

        let backend = match kind {
            MemoryBackendKind::Mmap | MemoryBackendKind::MmapGuarded => {
                let (mmap, full_guard) = Self::reserve(&ty)?;
                if min_bytes > 0 {
                    mmap.make_accessible(0, round_usize_up_to_host_pages(min_bytes))?;
                }
                Backend::Mmap {
                    accessible: AtomicUsize::new(round_usize_up_to_host_pages(min_bytes)),
                    full_guard,
                    fault_bridge: kind == MemoryBackendKind::MmapGuarded,
                    mmap,
                }
            }
            MemoryBackendKind::Alloc => {
                let mut buf = Vec::new();
                buf.try_reserve_exact(min_bytes)
                    .map_err(|_| Error::OutOfMemory(format!("{min_bytes} byte memory")))?;
                buf.resize(min_bytes, 0);
                Backend::Alloc {
                    buf: UnsafeCell::new(buf),
                }
            }
        };

        let base = match &backend {
            Backend::Mmap { mmap, .. } => mmap.as_mut_ptr(),
            // SAFETY: no other reference to the cell exists yet.
            Backend::Alloc { buf } => unsafe { (*buf.get()).as_mut_ptr() },
        };

        tracing::debug!(
            "created memory {index}: {} pages, backend {kind:?}",
            ty.limits.min
        );

        Ok(Self {
            backend,
            base: AtomicPtr::new(base),
            length: AtomicUsize::new(min_bytes),
            growing: AtomicBool::new(false),
            active_ops: AtomicUsize::new(0),
            gate: Mutex::new(()),
            flag_cleared: Condvar::new(),
            ops_drained: Condvar::new(),
            ty,
            index,
        })
    }

    /// Reserve address space for an mmap memory. Prefers the full 2^33
    /// guarded range on 64-bit hosts, then a 2^31 window, then just the
    /// declared maximum.
    fn reserve(ty: &MemoryType) -> crate::Result<(Mmap, bool)> {
        if cfg!(target_pointer_width = "64") {
            let full = usize::try_from(FULL_GUARD_RESERVE).unwrap();
            if let Ok(mmap) = Mmap::with_reserve(full) {
                return Ok((mmap, true));
            }
        }
        let window = usize::try_from(PARTIAL_WINDOW).unwrap();
        if let Ok(mmap) = Mmap::with_reserve(window) {
            return Ok((mmap, false));
        }
        let max_bytes = ty
            .maximum_byte_size()
            .and_then(|bytes| usize::try_from(bytes).ok())
            .unwrap_or(usize::try_from(WASM32_MAX_SIZE).unwrap_or(usize::MAX));
        let mmap = Mmap::with_reserve(round_usize_up_to_host_pages(max_bytes))?;
        Ok((mmap, false))
    }

    pub fn ty(&self) -> &MemoryType {
        &self.ty
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Current page count.
    pub fn page_count(&self) -> u64 {
        (self.length.load(Ordering::Acquire) as u64) >> self.ty.page_size_log2
    }

    /// Current byte length.
    #[inline]
    pub fn length(&self) -> usize {
        self.length.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn base(&self) -> *mut u8 {
        self.base.load(Ordering::Acquire)
    }

    /// The hard page-count ceiling a `memory.grow` of this memory can ever
    /// reach: the declared maximum clamped to what the backing store can
    /// provide.
    pub(crate) fn grow_limit_pages(&self) -> u64 {
        let declared = self.ty.grow_limit_pages();
        match &self.backend {
            Backend::Mmap { mmap, full_guard, .. } => {
                let usable = if *full_guard {
                    WASM32_MAX_SIZE
                } else {
                    mmap.len() as u64
                };
                declared.min(usable >> self.ty.page_size_log2)
            }
            Backend::Alloc { .. } => declared,
        }
    }

    /// Which bounds check the translator should hardwire for accesses to
    /// this memory: the tightest policy consistent with the backend's
    /// guarantees.
    pub fn bounds_policy(&self) -> BoundsPolicy {
        match &self.backend {
            Backend::Alloc { .. } => BoundsPolicy::Allocator,
            Backend::Mmap {
                full_guard,
                fault_bridge,
                ..
            } => {
                if self.require_dynamic_determination_memory_size() {
                    BoundsPolicy::MmapDynamic
                } else if *fault_bridge && *full_guard && cfg!(target_pointer_width = "64") {
                    BoundsPolicy::MmapFull
                } else if *fault_bridge && cfg!(target_pointer_width = "32") {
                    BoundsPolicy::MmapPartial
                } else if *full_guard {
                    // Stable base, but no one to catch the page fault:
                    // check against the atomic length on every access.
                    BoundsPolicy::MmapDynamic
                } else {
                    // The reservation fallback path: nothing can be assumed
                    // about the mapping's tail.
                    BoundsPolicy::Generic
                }
            }
        }
    }

    /// Page protection can only catch out-of-bounds accesses at host-page
    /// granularity; a smaller Wasm page size needs the per-access check.
    pub(crate) fn require_dynamic_determination_memory_size(&self) -> bool {
        (1_usize << self.ty.page_size_log2) < crate::host_page_size()
    }

    // === grow =============================================================

    /// Grow by `delta` pages. Returns the previous page count, or `None`
    /// (leaving the memory unchanged) if the result would exceed `limit`.
    pub fn grow_strictly(&self, delta: u64, limit: u64) -> Option<u64> {
        self.grow_inner(delta, limit, true)
    }

    /// Grow by up to `delta` pages, clamping to `limit`. Returns the previous
    /// page count unconditionally.
    pub fn grow_silently(&self, delta: u64, limit: u64) -> u64 {
        self.grow_inner(delta, limit, false)
            .expect("silent grow always reports the previous size")
    }

    fn grow_inner(&self, delta: u64, limit: u64, strict: bool) -> Option<u64> {
        // Only one grower at a time; later growers spin on the flag.
        let mut spins = 0;
        while self.growing.swap(true, Ordering::Acquire) {
            spins += 1;
            if spins > SPIN_LIMIT {
                std::thread::yield_now();
            } else {
                core::hint::spin_loop();
            }
        }

        let prev_bytes = self.length.load(Ordering::Acquire);
        let prev_pages = (prev_bytes as u64) >> self.ty.page_size_log2;

        let mut new_pages = match prev_pages.checked_add(delta) {
            Some(pages) => pages,
            None => {
                self.finish_grow();
                return if strict { None } else { Some(prev_pages) };
            }
        };
        if new_pages > limit {
            if strict {
                self.finish_grow();
                return None;
            }
            new_pages = limit.max(prev_pages);
        }
        if new_pages == prev_pages {
            self.finish_grow();
            return Some(prev_pages);
        }

        let new_bytes = match (new_pages << self.ty.page_size_log2)
            .try_into()
            .ok()
            .filter(|bytes: &usize| *bytes >= prev_bytes)
        {
            Some(bytes) => bytes,
            None => {
                self.finish_grow();
                return if strict { None } else { Some(prev_pages) };
            }
        };

        let ok = match &self.backend {
            Backend::Mmap {
                mmap, accessible, ..
            } => self.grow_mmap(mmap, accessible, new_bytes),
            Backend::Alloc { buf } => self.grow_alloc(buf, new_bytes),
        };

        if ok {
            self.length.store(new_bytes, Ordering::Release);
            tracing::debug!(
                "memory {} grown: {prev_pages} -> {new_pages} pages",
                self.index
            );
        }
        self.finish_grow();

        if ok {
            Some(prev_pages)
        } else if strict {
            None
        } else {
            Some(prev_pages)
        }
    }

    fn grow_mmap(&self, mmap: &Mmap, accessible: &AtomicUsize, new_bytes: usize) -> bool {
        let current = accessible.load(Ordering::Acquire);
        let needed = round_usize_up_to_host_pages(new_bytes);
        if needed <= current {
            return true;
        }
        if needed > mmap.len() {
            return false;
        }
        debug_assert!(usize_is_multiple_of_host_page_size(current));
        if mmap.make_accessible(current, needed - current).is_err() {
            return false;
        }
        accessible.store(needed, Ordering::Release);
        true
    }

    fn grow_alloc(&self, buf: &UnsafeCell<Vec<u8>>, new_bytes: usize) -> bool {
        // Wait for in-flight accesses to drain before relocating.
        let mut spins = 0;
        while self.active_ops.load(Ordering::Acquire) != 0 {
            spins += 1;
            if spins > SPIN_LIMIT {
                let mut guard = self.gate.lock();
                while self.active_ops.load(Ordering::Acquire) != 0 {
                    self.ops_drained.wait(&mut guard);
                }
                break;
            }
            core::hint::spin_loop();
        }

        // SAFETY: `growing` is set and `active_ops` is zero, so we hold the
        // protocol's exclusive right to the buffer.
        let buf = unsafe { &mut *buf.get() };
        if buf.try_reserve_exact(new_bytes - buf.len()).is_err() {
            return false;
        }
        buf.resize(new_bytes, 0);
        self.base.store(buf.as_mut_ptr(), Ordering::Release);
        true
    }

    fn finish_grow(&self) {
        let _guard = self.gate.lock();
        self.growing.store(false, Ordering::Release);
        self.flag_cleared.notify_all();
    }

    // === accessor-side grow protocol ======================================

    /// Enter the read/write critical region of the allocator backend.
    ///
    /// 1. Spin while `growing` is set (bounded spin, then block).
    /// 2. Acquire-increment `active_ops`.
    /// 3. Re-check `growing`; back out and retry if a grower got in.
    #[inline]
    pub(crate) fn enter_access(&self) -> AccessGuard<'_> {
        loop {
            let mut spins = 0;
            while self.growing.load(Ordering::Acquire) {
                spins += 1;
                if spins > SPIN_LIMIT {
                    let mut guard = self.gate.lock();
                    while self.growing.load(Ordering::Acquire) {
                        self.flag_cleared.wait(&mut guard);
                    }
                    break;
                }
                core::hint::spin_loop();
            }

            self.active_ops.fetch_add(1, Ordering::Acquire);
            if !self.growing.load(Ordering::Acquire) {
                return AccessGuard { memory: self };
            }
            self.exit_access();
        }
    }

    #[inline]
    fn exit_access(&self) {
        self.active_ops.fetch_sub(1, Ordering::Release);
        if self.growing.load(Ordering::Acquire) {
            let _guard = self.gate.lock();
            self.ops_drained.notify_one();
        }
    }

    // === bounds checks ====================================================

    /// The generic check: trap iff `width > len || eff > len - width`.
    /// Returns the observed length on failure for the trap record.
    #[inline]
    pub(crate) fn check_bounds(&self, eff: u64, width: u64) -> Result<(), u64> {
        let len = self.length.load(Ordering::Acquire) as u64;
        if width > len || eff > len - width {
            Err(len)
        } else {
            Ok(())
        }
    }

    /// The partial-window check: the access must fit the reserved window;
    /// page protection catches everything inside it.
    #[inline]
    pub(crate) fn check_window(&self, eff: u64, width: u64) -> Result<(), u64> {
        if width > PARTIAL_WINDOW || eff > PARTIAL_WINDOW - width {
            Err(self.length.load(Ordering::Acquire) as u64)
        } else {
            Ok(())
        }
    }

    // === raw access =======================================================

    /// Read `N` little-endian bytes at `eff`.
    ///
    /// # Safety
    ///
    /// The caller must have bounds-checked `eff..eff + N` under the policy of
    /// this memory's backend (and hold an [`AccessGuard`] for the allocator
    /// backend).
    #[inline]
    pub(crate) unsafe fn read_bytes<const N: usize>(&self, eff: usize) -> [u8; N] {
        let mut out = [0; N];
        ptr::copy_nonoverlapping(self.base().add(eff), out.as_mut_ptr(), N);
        out
    }

    /// Write `N` little-endian bytes at `eff`.
    ///
    /// # Safety
    ///
    /// As for [`Memory::read_bytes`].
    #[inline]
    pub(crate) unsafe fn write_bytes<const N: usize>(&self, eff: usize, bytes: [u8; N]) {
        ptr::copy_nonoverlapping(bytes.as_ptr(), self.base().add(eff), N);
    }

    /// Bounds-checked bulk copy for data-segment application. All-or-nothing:
    /// no byte is written when the range does not fit.
    pub(crate) fn init_slice(&self, offset: usize, bytes: &[u8]) -> Result<(), u64> {
        let len = self.length();
        let end = offset.checked_add(bytes.len()).ok_or(len as u64)?;
        if end > len {
            return Err(len as u64);
        }
        let _guard = self.enter_access();
        // SAFETY: range checked above; the guard keeps the base stable.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.base().add(offset), bytes.len());
        }
        Ok(())
    }

    /// Bounds-checked bulk read, for hosts and tests.
    pub fn read_slice(&self, offset: usize, out: &mut [u8]) -> Result<(), u64> {
        let len = self.length();
        let end = offset.checked_add(out.len()).ok_or(len as u64)?;
        if end > len {
            return Err(len as u64);
        }
        let _guard = self.enter_access();
        // SAFETY: as in `init_slice`.
        unsafe {
            ptr::copy_nonoverlapping(self.base().add(offset), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }
}

/// RAII token for the accessor side of the grow protocol.
pub(crate) struct AccessGuard<'a> {
    memory: &'a Memory,
}

impl Drop for AccessGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.memory.exit_access();
    }
}

/// The wasm32 effective address: `(addr + static_offset) mod 2^32`, widened
/// to `usize` only after the modular reduction.
#[inline]
pub(crate) fn effective_offset(addr: u32, static_offset: u32) -> u32 {
    addr.wrapping_add(static_offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Limits;
    use alloc::sync::Arc;

    fn one_page(kind: MemoryBackendKind) -> Memory {
        let ty = MemoryType {
            limits: Limits {
                min: 1,
                max: Some(4),
            },
            page_size_log2: MemoryType::DEFAULT_PAGE_SIZE_LOG2,
        };
        Memory::new(ty, 0, kind).unwrap()
    }

    #[test]
    fn starts_zeroed() {
        for kind in [MemoryBackendKind::Mmap, MemoryBackendKind::Alloc] {
            let memory = one_page(kind);
            assert_eq!(memory.page_count(), 1);
            let mut buf = [1u8; 16];
            memory.read_slice(65520, &mut buf).unwrap();
            assert_eq!(buf, [0; 16]);
        }
    }

    #[test]
    fn boundary_access() {
        let memory = one_page(MemoryBackendKind::Mmap);
        // `eff == len - w` succeeds, one past traps.
        assert!(memory.check_bounds(65532, 4).is_ok());
        assert_eq!(memory.check_bounds(65533, 4), Err(65536));
        // Width larger than the whole memory.
        assert_eq!(memory.check_bounds(0, 65537), Err(65536));
    }

    #[test]
    fn grow_strict_and_silent() {
        for kind in [MemoryBackendKind::Mmap, MemoryBackendKind::Alloc] {
            let memory = one_page(kind);
            assert_eq!(memory.grow_strictly(1, 4), Some(1));
            assert_eq!(memory.page_count(), 2);
            // Over the limit: unchanged.
            assert_eq!(memory.grow_strictly(3, 4), None);
            assert_eq!(memory.page_count(), 2);
            // Silent clamps and still reports the previous size.
            assert_eq!(memory.grow_silently(3, 4), 2);
            assert_eq!(memory.page_count(), 4);
            assert_eq!(memory.grow_silently(1, 4), 4);
            assert_eq!(memory.page_count(), 4);
        }
    }

    #[test]
    fn grow_preserves_contents() {
        for kind in [MemoryBackendKind::Mmap, MemoryBackendKind::Alloc] {
            let memory = one_page(kind);
            memory.init_slice(100, &[0xAA, 0xBB, 0xCC]).unwrap();
            memory.grow_strictly(2, 4).unwrap();
            let mut buf = [0u8; 3];
            memory.read_slice(100, &mut buf).unwrap();
            assert_eq!(buf, [0xAA, 0xBB, 0xCC]);
        }
    }

    #[test]
    fn policy_selection() {
        let memory = one_page(MemoryBackendKind::Alloc);
        assert_eq!(memory.bounds_policy(), BoundsPolicy::Allocator);

        // Without a fault bridge the dynamic check stays on.
        let memory = one_page(MemoryBackendKind::Mmap);
        assert_eq!(memory.bounds_policy(), BoundsPolicy::MmapDynamic);

        let memory = one_page(MemoryBackendKind::MmapGuarded);
        if cfg!(target_pointer_width = "64") {
            assert_eq!(memory.bounds_policy(), BoundsPolicy::MmapFull);
        }

        let tiny_pages = MemoryType {
            limits: Limits {
                min: 16,
                max: Some(64),
            },
            page_size_log2: 0,
        };
        let memory = Memory::new(tiny_pages, 0, MemoryBackendKind::Mmap).unwrap();
        assert_eq!(memory.bounds_policy(), BoundsPolicy::MmapDynamic);
    }

    #[test]
    fn concurrent_grow_and_access() {
        let memory = Arc::new(Memory::new(
            MemoryType {
                limits: Limits {
                    min: 1,
                    max: Some(512),
                },
                page_size_log2: MemoryType::DEFAULT_PAGE_SIZE_LOG2,
            },
            0,
            MemoryBackendKind::Alloc,
        )
        .unwrap());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let memory = Arc::clone(&memory);
            handles.push(std::thread::spawn(move || {
                for i in 0..10_000u32 {
                    let guard = memory.enter_access();
                    if memory.check_bounds(16, 4).is_ok() {
                        // SAFETY: bounds checked, guard held.
                        unsafe {
                            memory.write_bytes::<4>(16, i.to_le_bytes());
                            let _ = memory.read_bytes::<4>(16);
                        }
                    }
                    drop(guard);
                }
            }));
        }
        for i in 0..64 {
            memory.grow_strictly(1, 512).unwrap();
            assert_eq!(memory.page_count(), i + 2);
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
