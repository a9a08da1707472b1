use crate::utils::usize_is_multiple_of_host_page_size;
use crate::Error;
use alloc::format;
use core::ptr::NonNull;
use core::{ptr, slice};
use rustix::mm::MprotectFlags;

/// An anonymous private mapping.
///
/// Backs mmap-based linear memories: the full address range (including guard
/// space) is reserved up front with no access rights, and pages are made
/// read-write as the memory grows. The base address never changes for the
/// lifetime of the mapping.
#[derive(Debug)]
pub struct Mmap {
    memory: NonNull<[u8]>,
}

// SAFETY: the mapping is plain anonymous memory; access synchronization is
// the owning `Memory`'s responsibility.
unsafe impl Send for Mmap {}
// SAFETY: as above.
unsafe impl Sync for Mmap {}

impl Mmap {
    /// Map `size` bytes of zeroed read-write memory.
    pub fn new(size: usize) -> crate::Result<Self> {
        assert!(usize_is_multiple_of_host_page_size(size));
        // SAFETY: anonymous mapping with a null hint; the kernel picks the
        // placement.
        let ptr = unsafe {
            rustix::mm::mmap_anonymous(
                ptr::null_mut(),
                size,
                rustix::mm::ProtFlags::READ | rustix::mm::ProtFlags::WRITE,
                rustix::mm::MapFlags::PRIVATE,
            )
            .map_err(|_| Error::OutOfMemory(format!("{size} byte mapping")))?
        };
        // SAFETY: mmap returned a valid region of exactly `size` bytes.
        let memory = unsafe { slice::from_raw_parts_mut(ptr.cast(), size) };
        Ok(Mmap {
            memory: NonNull::new(memory).unwrap(),
        })
    }

    /// Reserve `size` bytes of address space with no access rights.
    pub fn with_reserve(size: usize) -> crate::Result<Self> {
        assert!(usize_is_multiple_of_host_page_size(size));
        // SAFETY: as in `new`, but PROT_NONE; nothing is touchable until
        // `make_accessible`.
        let ptr = unsafe {
            rustix::mm::mmap_anonymous(
                ptr::null_mut(),
                size,
                rustix::mm::ProtFlags::empty(),
                rustix::mm::MapFlags::PRIVATE,
            )
            .map_err(|_| Error::OutOfMemory(format!("{size} byte reservation")))?
        };
        // SAFETY: as in `new`.
        let memory = unsafe { slice::from_raw_parts_mut(ptr.cast(), size) };
        Ok(Mmap {
            memory: NonNull::new(memory).unwrap(),
        })
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.memory.as_ptr().cast()
    }

    #[inline]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.memory.as_ptr().cast()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.memory.as_ptr().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark `[start, start + len)` as read-write.
    ///
    /// Takes `&self` since growth happens behind the owning memory's own
    /// synchronization and the base never moves.
    pub fn make_accessible(&self, start: usize, len: usize) -> crate::Result<()> {
        assert!(usize_is_multiple_of_host_page_size(start));
        assert!(start.checked_add(len).unwrap() <= self.len());
        let ptr = self.memory.as_ptr();
        // SAFETY: the range is within this mapping, asserted above.
        unsafe {
            rustix::mm::mprotect(
                ptr.byte_add(start).cast(),
                len,
                MprotectFlags::READ | MprotectFlags::WRITE,
            )
            .map_err(|_| Error::OutOfMemory(format!("{len} accessible bytes")))?;
        }
        Ok(())
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        // SAFETY: the mapping was created by us with exactly this length.
        unsafe {
            let ptr = self.memory.as_ptr().cast();
            let len = self.memory.as_ptr().len();
            if len == 0 {
                return;
            }
            rustix::mm::munmap(ptr, len).expect("munmap failed");
        }
    }
}
