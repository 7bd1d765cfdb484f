//! Wraps any [`Allocator`] behind a spinlock so it can be shared across
//! threads without rewriting its internals. Grounded in `Core/Allocators.cpp`'s
//! `MemThreadSafeAllocator`, used there (and here) to make the single-thread
//! [`crate::tlsf::TlsfAllocator`] safe to share.

use crate::allocator::{Allocator, AllocatorKind};
use crate::atomic::SpinLock;
use std::ptr::NonNull;

/// Serializes every call to an inner allocator behind a [`SpinLock`].
/// `kind` is delegated to the inner allocator rather than reporting
/// [`AllocatorKind::ThreadSafe`] — callers diagnosing allocator identity
/// want to know the wrapped kind, not that it happens to be shared.
pub struct ThreadSafeAllocator<A: Allocator> {
    inner: A,
    lock: SpinLock,
}

impl<A: Allocator> ThreadSafeAllocator<A> {
    pub const fn new(inner: A) -> Self {
        Self {
            inner,
            lock: SpinLock::new(),
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

impl<A: Allocator> Allocator for ThreadSafeAllocator<A> {
    fn malloc(&self, size: usize, align: u32) -> Option<NonNull<u8>> {
        self.lock.lock();
        let result = self.inner.malloc(size, align);
        self.lock.unlock();
        result
    }

    fn realloc(&self, ptr: Option<NonNull<u8>>, size: usize, align: u32) -> Option<NonNull<u8>> {
        self.lock.lock();
        let result = self.inner.realloc(ptr, size, align);
        self.lock.unlock();
        result
    }

    fn free(&self, ptr: Option<NonNull<u8>>, align: u32) {
        self.lock.lock();
        self.inner.free(ptr, align);
        self.lock.unlock();
    }

    fn kind(&self) -> AllocatorKind {
        self.inner.kind()
    }
}

// SAFETY: every access to `inner` is taken under `lock`, which provides the
// same mutual exclusion a `Mutex` would.
unsafe impl<A: Allocator> Sync for ThreadSafeAllocator<A> {}
unsafe impl<A: Allocator> Send for ThreadSafeAllocator<A> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlsf::TlsfAllocator;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn concurrent_alloc_free_stays_consistent() {
        let mut buf = vec![0u8; 4 * 1024 * 1024];
        let ptr = NonNull::new(buf.as_mut_ptr()).unwrap();
        let shared = Arc::new(ThreadSafeAllocator::new(TlsfAllocator::new(Some(ptr), buf.len(), false)));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    for _ in 0..256 {
                        if let Some(p) = shared.malloc(64, 8) {
                            shared.free(Some(p), 8);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(shared.inner().validate());
    }
}
