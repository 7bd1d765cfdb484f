//! Thin wrapper over the platform virtual-memory API: reserve an address
//! range without backing it, commit pages on demand, decommit them again,
//! and finally release the whole range. This is the substrate the bump
//! arena (`bump.rs`) and the per-thread transient allocator
//! (`transient.rs`) grow into instead of repeatedly calling the system
//! allocator.

use std::ptr::NonNull;

/// Returns the platform page size, in bytes. Reserve/commit sizes should
/// be rounded up to a multiple of this.
pub fn page_size() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: sysconf with _SC_PAGESIZE never fails on any platform we target.
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
    }
    #[cfg(windows)]
    {
        use windows::Win32::System::SystemInformation::GetSystemInfo;
        let mut info = windows::Win32::System::SystemInformation::SYSTEM_INFO::default();
        unsafe { GetSystemInfo(&mut info) };
        info.dwPageSize as usize
    }
}

/// Reserves `size` bytes of address space without committing any physical
/// memory to it. Returns `None` on failure.
pub fn reserve(size: usize) -> Option<NonNull<u8>> {
    #[cfg(unix)]
    {
        // SAFETY: a no-access, anonymous, private mapping never touches existing memory.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            None
        } else {
            NonNull::new(ptr as *mut u8)
        }
    }
    #[cfg(windows)]
    {
        use windows::Win32::System::Memory::{VirtualAlloc, MEM_RESERVE, PAGE_NOACCESS};
        // SAFETY: reserving a fresh range, no pointer aliasing possible.
        let ptr = unsafe { VirtualAlloc(None, size, MEM_RESERVE, PAGE_NOACCESS) };
        NonNull::new(ptr as *mut u8)
    }
}

/// Commits `size` bytes starting at `ptr`, which must lie within a range
/// previously returned by [`reserve`]. Both `ptr` and `size` should be
/// page-aligned by the caller.
///
/// # Safety
/// `ptr` must point into a live reservation of at least `size` bytes.
pub unsafe fn commit(ptr: NonNull<u8>, size: usize) -> bool {
    if size == 0 {
        return true;
    }
    #[cfg(unix)]
    {
        let rc = libc::mprotect(ptr.as_ptr() as *mut _, size, libc::PROT_READ | libc::PROT_WRITE);
        rc == 0
    }
    #[cfg(windows)]
    {
        use windows::Win32::System::Memory::{VirtualAlloc, MEM_COMMIT, PAGE_READWRITE};
        let out = VirtualAlloc(Some(ptr.as_ptr() as *mut _), size, MEM_COMMIT, PAGE_READWRITE);
        !out.is_null()
    }
}

/// Decommits `size` bytes starting at `ptr`, returning the backing pages to
/// the system while keeping the address range reserved.
///
/// # Safety
/// `ptr` must point into a live reservation of at least `size` bytes, and
/// the caller must not touch the range again until it is re-committed.
pub unsafe fn decommit(ptr: NonNull<u8>, size: usize) {
    if size == 0 {
        return;
    }
    #[cfg(unix)]
    {
        // MADV_DONTNEED drops the pages; PROT_NONE makes accidental touches fault.
        libc::madvise(ptr.as_ptr() as *mut _, size, libc::MADV_DONTNEED);
        libc::mprotect(ptr.as_ptr() as *mut _, size, libc::PROT_NONE);
    }
    #[cfg(windows)]
    {
        use windows::Win32::System::Memory::{VirtualFree, MEM_DECOMMIT};
        let _ = VirtualFree(ptr.as_ptr() as *mut _, size, MEM_DECOMMIT);
    }
}

/// Releases the entire reservation made by [`reserve`].
///
/// # Safety
/// `ptr`/`size` must exactly match a prior [`reserve`] call, and nothing
/// may still reference memory in that range.
pub unsafe fn release(ptr: NonNull<u8>, size: usize) {
    #[cfg(unix)]
    {
        libc::munmap(ptr.as_ptr() as *mut _, size);
    }
    #[cfg(windows)]
    {
        use windows::Win32::System::Memory::{VirtualFree, MEM_RELEASE};
        let _ = VirtualFree(ptr.as_ptr() as *mut _, 0, MEM_RELEASE);
    }
}

/// Rounds `value` up to the next multiple of `align`, which must be a
/// power of two.
#[inline]
pub fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_power_of_two() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 64), 128);
    }

    #[test]
    fn reserve_commit_decommit_release_roundtrip() {
        let size = align_up(4096, page_size());
        let base = reserve(size).expect("reserve should succeed");
        unsafe {
            assert!(commit(base, page_size()));
            // Touch the committed page to prove it's writable.
            std::ptr::write_bytes(base.as_ptr(), 0xAB, page_size());
            decommit(base, page_size());
            release(base, size);
        }
    }
}
