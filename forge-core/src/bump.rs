//! Growing arena allocator: reserves virtual address space once, commits
//! pages lazily as the bump offset climbs, and never frees individual
//! allocations — `free` is a no-op, and the whole arena rewinds at once
//! via [`BumpArena::reset`].
//!
//! Grounded in the original engine's `MemBumpAllocatorBase` (see
//! `Core/Allocators.cpp`): every allocation stores its size in a header
//! word immediately before the returned pointer, which lets `realloc`
//! grow the most recently made allocation in place when it is still the
//! bump pointer's tail.

use crate::allocator::{normalize_align, run_fail_callback, Allocator, AllocatorKind};
use crate::heap::HeapAllocator;
use crate::vmem;
use parking_lot::Mutex;
use std::ptr::NonNull;

const SIZE_HEADER: usize = std::mem::size_of::<usize>();

struct Inner {
    base: Option<NonNull<u8>>,
    reserve_size: usize,
    page_size: usize,
    committed: usize,
    offset: usize,
    last_ptr: Option<NonNull<u8>>,
    /// Allocations made while `debug_mode` is set, routed through the
    /// heap allocator so ASan/Miri-style tools can see every allocation
    /// individually instead of one big reserved block.
    debug_pointers: Vec<(NonNull<u8>, u32)>,
}

// SAFETY: `Inner` only exposes its raw pointers through the `Mutex` in `BumpArena`.
unsafe impl Send for Inner {}

/// A bump/linear allocator over a lazily committed virtual memory range.
pub struct BumpArena {
    inner: Mutex<Inner>,
    debug_mode: bool,
    debug_alloc: HeapAllocator,
}

impl BumpArena {
    /// Reserves `reserve_size` bytes of address space (not yet backed by
    /// physical memory) and commits in `page_size` chunks as needed. When
    /// `debug_mode` is set, every allocation is instead forwarded
    /// individually to the system heap, which makes leaks and
    /// out-of-bounds writes visible to tools like ASan.
    pub fn new(reserve_size: usize, page_size: usize, debug_mode: bool) -> Self {
        let base = if debug_mode {
            None
        } else {
            assert!(reserve_size > 0);
            assert!(page_size > 0);
            let base = vmem::reserve(reserve_size);
            if base.is_none() {
                run_fail_callback();
            }
            base
        };

        Self {
            inner: Mutex::new(Inner {
                base,
                reserve_size,
                page_size,
                committed: 0,
                offset: 0,
                last_ptr: None,
                debug_pointers: Vec::new(),
            }),
            debug_mode,
            debug_alloc: HeapAllocator::new(),
        }
    }

    /// Commits the entire reservation up front, trading memory footprint
    /// for the certainty that no later allocation will need to grow it.
    pub fn commit_all(&self) {
        if self.debug_mode {
            return;
        }
        let mut inner = self.inner.lock();
        let Some(base) = inner.base else { return };
        let grow = inner.reserve_size - inner.committed;
        if grow > 0 {
            unsafe {
                vmem::commit(NonNull::new_unchecked(base.as_ptr().add(inner.committed)), grow);
            }
            inner.committed = inner.reserve_size;
        }
    }

    pub fn committed_size(&self) -> usize {
        self.inner.lock().committed
    }

    pub fn offset(&self) -> usize {
        self.inner.lock().offset
    }

    fn realloc_debug(&self, inner: &mut Inner, ptr: Option<NonNull<u8>>, size: usize, align: u32) -> Option<NonNull<u8>> {
        let new_ptr = if let Some(p) = ptr {
            self.debug_alloc.realloc(Some(p), size, align)
        } else {
            self.debug_alloc.malloc(size, align)
        };
        if let Some(new_ptr) = new_ptr {
            if let Some(old) = ptr {
                inner.debug_pointers.retain(|(p, _)| *p != old);
            }
            inner.debug_pointers.push((new_ptr, align));
        }
        new_ptr
    }

    /// Rewinds the arena to empty. The backing pages are fully decommitted;
    /// the active region is first stamped with `0xFE` so use-after-reset
    /// bugs read back obviously-wrong data instead of stale content.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if self.debug_mode {
            for (ptr, align) in inner.debug_pointers.drain(..) {
                self.debug_alloc.free(Some(ptr), align);
            }
            inner.offset = 0;
            return;
        }

        let Some(base) = inner.base else { return };
        if inner.offset > 0 {
            unsafe { std::ptr::write_bytes(base.as_ptr(), 0xFE, inner.offset) };
        }
        if inner.committed > 0 {
            unsafe { vmem::decommit(base, inner.committed) };
        }
        inner.last_ptr = None;
        inner.offset = 0;
        inner.committed = 0;
    }
}

impl Drop for BumpArena {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if self.debug_mode {
            for (ptr, align) in inner.debug_pointers.drain(..) {
                self.debug_alloc.free(Some(ptr), align);
            }
            return;
        }
        if let Some(base) = inner.base.take() {
            unsafe {
                if inner.committed > 0 {
                    vmem::decommit(base, inner.committed);
                }
                vmem::release(base, inner.reserve_size);
            }
        }
    }
}

impl Allocator for BumpArena {
    fn malloc(&self, size: usize, align: u32) -> Option<NonNull<u8>> {
        self.realloc(None, size, align)
    }

    fn realloc(&self, ptr: Option<NonNull<u8>>, size: usize, align: u32) -> Option<NonNull<u8>> {
        assert!(size > 0, "BumpArena::realloc with size 0 — call free instead");
        let mut inner = self.inner.lock();

        if self.debug_mode {
            return self.realloc_debug(&mut inner, ptr, size, align);
        }

        let align = normalize_align(align);
        let Some(base) = inner.base else {
            run_fail_callback();
            return None;
        };

        let reusing_tail = ptr.is_some() && inner.last_ptr == ptr;
        let last_size = if reusing_tail {
            unsafe { *(ptr.unwrap().as_ptr() as *const usize).offset(-1) }
        } else {
            0
        };

        let mut new_offset = if reusing_tail {
            inner.offset
        } else {
            vmem::align_up(inner.offset + SIZE_HEADER, align as usize)
        };

        let end_offset = new_offset + (size - last_size);
        if end_offset > inner.reserve_size {
            run_fail_callback();
            return None;
        }

        if end_offset > inner.committed {
            let page_size = inner.page_size;
            let grow = vmem::align_up(end_offset - inner.committed, page_size);
            let commit_base = unsafe { NonNull::new_unchecked(base.as_ptr().add(inner.committed)) };
            if !unsafe { vmem::commit(commit_base, grow) } {
                run_fail_callback();
                return None;
            }
            inner.committed += grow;
        }

        let new_ptr = if reusing_tail {
            ptr.unwrap()
        } else {
            let p = unsafe { NonNull::new_unchecked(base.as_ptr().add(new_offset)) };
            if let Some(old) = ptr {
                unsafe {
                    let old_size = *(old.as_ptr() as *const usize).offset(-1);
                    std::ptr::copy_nonoverlapping(old.as_ptr(), p.as_ptr(), old_size.min(size));
                }
            }
            p
        };

        unsafe {
            *(new_ptr.as_ptr() as *mut usize).offset(-1) = size;
        }
        new_offset = end_offset;
        inner.offset = new_offset;
        inner.last_ptr = Some(new_ptr);
        Some(new_ptr)
    }

    fn free(&self, _ptr: Option<NonNull<u8>>, _align: u32) {
        // Bump arenas never free individual allocations; see `reset`.
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Bump
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_in_place_preserves_pointer() {
        let arena = BumpArena::new(64 * 1024 * 1024, 64 * 1024, false);
        let a = arena.malloc(100, 8).expect("first alloc");
        let b = arena.realloc(Some(a), 200, 8).expect("grow");
        assert_eq!(a, b, "growing the tail allocation must not move it");
        assert_eq!(arena.offset(), 208);
    }

    #[test]
    fn reset_rewinds_to_empty() {
        let arena = BumpArena::new(1024 * 1024, 64 * 1024, false);
        arena.malloc(128, 16).unwrap();
        arena.malloc(64, 16).unwrap();
        assert!(arena.offset() > 0);
        arena.reset();
        assert_eq!(arena.offset(), 0);
        assert_eq!(arena.committed_size(), 0);
    }

    #[test]
    fn non_tail_realloc_allocates_new_block() {
        let arena = BumpArena::new(1024 * 1024, 64 * 1024, false);
        let a = arena.malloc(32, 16).unwrap();
        let _b = arena.malloc(32, 16).unwrap();
        let grown = arena.realloc(Some(a), 64, 16).unwrap();
        assert_ne!(a, grown);
    }

    #[test]
    fn debug_mode_routes_through_heap() {
        let arena = BumpArena::new(0, 0, true);
        let ptr = arena.malloc(256, 16).unwrap();
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 1, 256) };
        arena.reset();
    }
}
