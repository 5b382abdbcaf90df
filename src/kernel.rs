//! Platform-backed arena storage. A fixed span of address space is reserved
//! up front and committed page by page as the arena grows, so the whole
//! heap stays contiguous the way [`crate::heap::Heap`] requires. This is
//! where all the platform-dependent stuff lives; everything above it only
//! sees the [`Storage`] trait.

use std::ptr::NonNull;

use log::debug;

use crate::{
    arena::{ArenaExhausted, Storage},
    utils::align,
};

/// Abstraction over the low level memory operations and syscalls of each
/// platform. The allocator's view of memory has nothing to do with the
/// concrete APIs offered by each kernel.
trait PlatformMemory {
    /// Reserves `len` bytes of address space, inaccessible until committed.
    /// Returns the region start or `None` if the underlying call fails.
    unsafe fn reserve(len: usize) -> Option<NonNull<u8>>;

    /// Makes `[addr, addr + len)` readable and writable. `addr` and `len`
    /// must be page-granular and inside a reserved region.
    unsafe fn commit(addr: *mut u8, len: usize) -> bool;

    /// Returns the whole reserved region back to the kernel.
    unsafe fn unreserve(addr: *mut u8, len: usize);

    /// Virtual memory page size of the computer in bytes.
    fn page_size() -> usize;
}

struct Platform;

/// [`Storage`] over memory reserved directly from the operating system.
///
/// The reservation never moves, so growth is pure bookkeeping plus a page
/// commit; exhaustion is hitting the end of the reservation.
pub struct SystemStorage {
    base: NonNull<u8>,
    /// Bytes handed to the arena so far.
    len: usize,
    /// Bytes committed (page-granular prefix of the reservation).
    committed: usize,
    /// Bytes reserved, page-granular.
    capacity: usize,
}

impl SystemStorage {
    /// Reserves room for an arena of at most `capacity` bytes (rounded up
    /// to the page size).
    pub fn reserve(capacity: usize) -> Result<Self, ArenaExhausted> {
        let capacity = align(capacity, Platform::page_size());
        debug!("reserving {capacity} bytes of address space");

        let base = unsafe { Platform::reserve(capacity) }
            .ok_or(ArenaExhausted { requested: capacity })?;

        Ok(Self { base, len: 0, committed: 0, capacity })
    }
}

impl Storage for SystemStorage {
    fn len(&self) -> usize {
        self.len
    }

    fn grow(&mut self, additional: usize) -> Result<(), ArenaExhausted> {
        let exhausted = ArenaExhausted { requested: additional };
        let new_len = self.len.checked_add(additional).ok_or(exhausted)?;
        if new_len > self.capacity {
            return Err(ArenaExhausted { requested: additional });
        }

        let wanted = align(new_len, Platform::page_size());
        if wanted > self.committed {
            let delta = wanted - self.committed;
            let at = unsafe { self.base.as_ptr().add(self.committed) };
            if !unsafe { Platform::commit(at, delta) } {
                return Err(ArenaExhausted { requested: additional });
            }
            self.committed = wanted;
        }

        self.len = new_len;
        Ok(())
    }

    fn bytes(&self) -> &[u8] {
        // Committed prefix of a private mapping we own exclusively.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
    }
}

impl Drop for SystemStorage {
    fn drop(&mut self) {
        unsafe { Platform::unreserve(self.base.as_ptr(), self.capacity) }
    }
}

#[cfg(unix)]
mod unix {
    use std::{os::raw::c_int, ptr::NonNull};

    use libc::{c_void, off_t, size_t};

    use super::{Platform, PlatformMemory};

    impl PlatformMemory for Platform {
        unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Nothing is readable until the pages are committed.
            const PROT: c_int = libc::PROT_NONE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                match libc::mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET) {
                    libc::MAP_FAILED => None,
                    addr => Some(NonNull::new_unchecked(addr).cast::<u8>()),
                }
            }
        }

        unsafe fn commit(addr: *mut u8, len: usize) -> bool {
            let prot = libc::PROT_READ | libc::PROT_WRITE;
            unsafe { libc::mprotect(addr as *mut c_void, len as size_t, prot) == 0 }
        }

        unsafe fn unreserve(addr: *mut u8, len: usize) {
            unsafe {
                libc::munmap(addr as *mut c_void, len as size_t);
            }
        }

        fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use windows::Win32::System::{Memory, SystemInformation};

    use super::{Platform, PlatformMemory};

    impl PlatformMemory for Platform {
        unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
            unsafe {
                let addr =
                    Memory::VirtualAlloc(None, len, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS);
                NonNull::new(addr.cast())
            }
        }

        unsafe fn commit(addr: *mut u8, len: usize) -> bool {
            unsafe {
                !Memory::VirtualAlloc(
                    Some(addr as *const c_void),
                    len,
                    Memory::MEM_COMMIT,
                    Memory::PAGE_READWRITE,
                )
                .is_null()
            }
        }

        unsafe fn unreserve(addr: *mut u8, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE);
            }
        }

        fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());
                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    #[test]
    fn heap_runs_over_a_system_reservation() {
        let storage = SystemStorage::reserve(1 << 16).unwrap();
        let mut heap = Heap::init(storage).unwrap();

        let p = heap.alloc(1000).unwrap();
        heap.payload_mut(p)[..1000].fill(0x42);
        let q = heap.alloc(100).unwrap();
        heap.release(q);

        assert!(heap.payload(p)[..1000].iter().all(|&b| b == 0x42));
        assert!(heap.check().is_empty());
    }

    #[test]
    fn reservation_end_surfaces_as_allocation_failure() {
        let storage = SystemStorage::reserve(1).unwrap();
        let capacity = {
            // One page, whatever the platform says that is.
            Platform::page_size()
        };
        let mut heap = Heap::init(storage).unwrap();

        // Ask for more than the single reserved page can ever hold.
        assert_eq!(None, heap.alloc(capacity));
        assert!(heap.check().is_empty());
    }
}
