//! Memory-order-tagged primitives and a test-and-set spinlock.
//!
//! Rust's `core::sync::atomic` types already carry an explicit
//! [`Ordering`] on every call, so the 32/64-bit load/store/CAS/fetch-add
//! helpers here are thin re-exports rather than a fresh abstraction —
//! they exist so call sites elsewhere in the workspace read the same way
//! the rest of the engine's atomic traffic does, with the order named at
//! the call site instead of hidden behind a default.

pub use std::sync::atomic::Ordering;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64};

#[inline]
pub fn load_u32(a: &AtomicU32, order: Ordering) -> u32 {
    a.load(order)
}

#[inline]
pub fn store_u32(a: &AtomicU32, value: u32, order: Ordering) {
    a.store(value, order)
}

#[inline]
pub fn fetch_add_u32(a: &AtomicU32, value: u32, order: Ordering) -> u32 {
    a.fetch_add(value, order)
}

#[inline]
pub fn exchange_u32(a: &AtomicU32, value: u32, order: Ordering) -> u32 {
    a.swap(value, order)
}

#[inline]
pub fn compare_exchange_u32(
    a: &AtomicU32,
    expected: u32,
    desired: u32,
    success: Ordering,
    failure: Ordering,
) -> bool {
    a.compare_exchange(expected, desired, success, failure).is_ok()
}

#[inline]
pub fn load_u64(a: &AtomicU64, order: Ordering) -> u64 {
    a.load(order)
}

#[inline]
pub fn store_u64(a: &AtomicU64, value: u64, order: Ordering) {
    a.store(value, order)
}

#[inline]
pub fn fetch_add_u64(a: &AtomicU64, value: u64, order: Ordering) -> u64 {
    a.fetch_add(value, order)
}

/// Issues a CPU-level pause/yield hint for spin-wait loops.
#[inline]
pub fn cpu_pause() {
    std::hint::spin_loop();
}

/// A test-and-set spinlock. Cheap to construct and to contend for short
/// critical sections (a handful of pointer writes); anything that might
/// block on I/O or the GPU should use [`parking_lot::Mutex`] instead.
#[derive(Debug)]
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Spins until the lock is acquired.
    pub fn lock(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                cpu_pause();
            }
        }
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII scope guard for [`SpinLock`], mirroring `AtomicLockScope` in the
/// original engine.
pub struct SpinLockScope<'a> {
    lock: &'a SpinLock,
}

impl<'a> SpinLockScope<'a> {
    pub fn new(lock: &'a SpinLock) -> Self {
        lock.lock();
        Self { lock }
    }
}

impl Drop for SpinLockScope<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn spinlock_excludes_concurrent_access() {
        let lock = Arc::new(SpinLock::new());
        let counter = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let _scope = SpinLockScope::new(&lock);
                        let v = counter.load(Ordering::Relaxed);
                        counter.store(v + 1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(counter.load(Ordering::Relaxed), 8000);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new();
        lock.lock();
        assert!(!lock.try_lock());
        lock.unlock();
        assert!(lock.try_lock());
        lock.unlock();
    }
}
