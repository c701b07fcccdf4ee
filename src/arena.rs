use std::{
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Size in bytes of the pages handed out by an [`Arena`].
///
/// This is a compile-time constant rather than a `sysconf` lookup because
/// the heap recovers the mass that owns a cell by masking the cell address
/// with `PAGE_SIZE - 1`, and that mask has to agree with the unit the masses
/// were carved from. Memory mapped by the platform is always aligned to at
/// least 4096 bytes, so the constant holds on every target we support.
pub const PAGE_SIZE: usize = 4096;

const _: () = assert!(PAGE_SIZE.is_power_of_two());

/// The page-level memory source a [`Heap`](crate::Heap) sits on.
///
/// An arena hands out runs of whole, naturally aligned pages and takes the
/// exact same runs back. It never inspects their contents: everything the
/// heap writes into a page (mass headers, cell headers, free links) is the
/// heap's own business.
pub trait Arena {
    /// Returns a run of `count` contiguous pages aligned to [`PAGE_SIZE`],
    /// or `None` when the source is exhausted.
    fn alloc_pages(&self, count: usize) -> Option<NonNull<u8>>;

    /// Takes back a run previously obtained from [`Arena::alloc_pages`].
    ///
    /// **SAFETY**: `page` must be the start of a `count`-page run obtained
    /// from this arena and not already freed.
    unsafe fn free_pages(&self, page: NonNull<u8>, count: usize);
}

// A heap may either own its arena or borrow one owned by the surrounding
// domain; the borrowed form is what lets the domain inspect page counts
// after the heap is gone.
impl<A: Arena + ?Sized> Arena for &A {
    fn alloc_pages(&self, count: usize) -> Option<NonNull<u8>> {
        (**self).alloc_pages(count)
    }

    unsafe fn free_pages(&self, page: NonNull<u8>, count: usize) {
        unsafe { (**self).free_pages(page, count) }
    }
}

/// This trait abstracts the low level memory syscalls, as the arena itself
/// has nothing to do with the concrete APIs offered by each platform.
trait PlatformMemory {
    /// Requests a mapping of size `len`. Returns `None` if the underlying
    /// syscall fails.
    unsafe fn map(len: usize) -> Option<NonNull<u8>>;

    /// Returns the mapping of size `len` starting at `addr` back to the
    /// operating system.
    unsafe fn unmap(addr: NonNull<u8>, len: usize);
}

/// An [`Arena`] backed by the operating system's virtual memory.
///
/// Keeps an atomic count of the pages currently handed out, which is what
/// lets tests (and curious callers) confirm that an emptied mass or a freed
/// large block really went back to the source.
pub struct MmapArena {
    pages: AtomicUsize,
}

impl MmapArena {
    pub const fn new() -> Self {
        Self {
            pages: AtomicUsize::new(0),
        }
    }

    /// Pages currently handed out and not yet returned.
    pub fn allocated_pages(&self) -> usize {
        self.pages.load(Ordering::Relaxed)
    }
}

impl Default for MmapArena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena for MmapArena {
    fn alloc_pages(&self, count: usize) -> Option<NonNull<u8>> {
        if count == 0 {
            return None;
        }

        let len = count.checked_mul(PAGE_SIZE)?;
        let page = unsafe { Self::map(len) }?;

        // Natural alignment is what makes address recovery work at all.
        debug_assert_eq!(page.as_ptr() as usize % PAGE_SIZE, 0);

        self.pages.fetch_add(count, Ordering::Relaxed);
        Some(page)
    }

    unsafe fn free_pages(&self, page: NonNull<u8>, count: usize) {
        unsafe { Self::unmap(page, count * PAGE_SIZE) };
        self.pages.fetch_sub(count, Ordering::Relaxed);
    }
}

#[cfg(unix)]
mod unix {
    use super::{MmapArena, PlatformMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for MmapArena {
        unsafe fn map(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => Some(NonNull::new_unchecked(addr).cast::<u8>()),
                }
            }
        }

        unsafe fn unmap(addr: NonNull<u8>, len: usize) {
            unsafe {
                munmap(addr.as_ptr() as *mut c_void, len as size_t);
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use super::{MmapArena, PlatformMemory};

    use std::{os::raw::c_void, ptr::NonNull};

    use windows::Win32::System::Memory;

    impl PlatformMemory for MmapArena {
        unsafe fn map(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn unmap(addr: NonNull<u8>, _len: usize) {
            // MEM_RELEASE frees the whole reservation, which matches how the
            // arena always returns exactly the run it mapped.
            unsafe {
                let _ = Memory::VirtualFree(addr.as_ptr() as *mut c_void, 0, Memory::MEM_RELEASE);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_page_roundtrip() {
        let arena = MmapArena::new();
        assert_eq!(arena.allocated_pages(), 0);

        let page = arena.alloc_pages(1).expect("failed to map one page");
        assert_eq!(arena.allocated_pages(), 1);
        assert_eq!(page.as_ptr() as usize % PAGE_SIZE, 0);

        unsafe {
            // The whole page must be ours to write.
            for i in 0..PAGE_SIZE {
                page.as_ptr().add(i).write(0xA5);
            }
            assert_eq!(page.as_ptr().add(PAGE_SIZE - 1).read(), 0xA5);

            arena.free_pages(page, 1);
        }

        assert_eq!(arena.allocated_pages(), 0);
    }

    #[test]
    fn contiguous_run() {
        let arena = MmapArena::new();

        let run = arena.alloc_pages(3).expect("failed to map three pages");
        assert_eq!(arena.allocated_pages(), 3);

        unsafe {
            // Touch the first and last byte of the run.
            run.as_ptr().write(1);
            run.as_ptr().add(3 * PAGE_SIZE - 1).write(2);

            arena.free_pages(run, 3);
        }

        assert_eq!(arena.allocated_pages(), 0);
    }

    #[test]
    fn zero_pages_is_refused() {
        let arena = MmapArena::new();
        assert!(arena.alloc_pages(0).is_none());
        assert_eq!(arena.allocated_pages(), 0);
    }
}
