//! The allocator capability contract shared by every allocator kind in
//! this workspace: the system heap (`heap.rs`), the bump/linear arena
//! (`bump.rs`), the per-thread transient allocator (`transient.rs`), the
//! TLSF pool (`tlsf.rs`), the thread-safe adapter (`threadsafe.rs`) and
//! the named proxy wrapper (`proxy.rs`).

use parking_lot::Mutex;
use std::ptr::NonNull;

/// The minimum alignment every allocator must satisfy even when the
/// caller asks for less — matches what the system allocator already
/// guarantees on every 64-bit target this workspace builds for.
pub const MACHINE_ALIGNMENT: u32 = 8;

/// Identifies which concrete allocator is behind an [`Allocator`] trait
/// object, for diagnostics and the engine's memory-stats view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocatorKind {
    Heap,
    Bump,
    Transient,
    Tlsf,
    ThreadSafe,
    Proxy,
}

/// Capability set implemented by every allocator in the workspace.
///
/// `align` is the *minimum* alignment the returned pointer must satisfy;
/// implementations silently raise it to [`MACHINE_ALIGNMENT`] when the
/// caller asks for less. `realloc(None, ..)` behaves as [`Allocator::malloc`];
/// `realloc(Some(ptr), 0, ..)` behaves as [`Allocator::free`].
///
/// A failed allocation invokes the process-wide fail callback (if one is
/// registered via [`set_fail_callback`]) and returns `None` — allocators
/// never panic or abort on their own.
///
/// Implementors do not provide thread safety on their own; wrap with
/// [`crate::threadsafe::ThreadSafeAllocator`] to share one across threads.
pub trait Allocator {
    fn malloc(&self, size: usize, align: u32) -> Option<NonNull<u8>>;
    fn realloc(&self, ptr: Option<NonNull<u8>>, size: usize, align: u32) -> Option<NonNull<u8>>;
    fn free(&self, ptr: Option<NonNull<u8>>, align: u32);
    fn kind(&self) -> AllocatorKind;
}

type FailCallback = Box<dyn Fn() + Send + Sync>;

static FAIL_CALLBACK: Mutex<Option<FailCallback>> = Mutex::new(None);

/// Registers a process-wide callback invoked whenever any allocator in
/// this workspace fails to satisfy a request. Pass `None` to clear it.
pub fn set_fail_callback<F>(callback: Option<F>)
where
    F: Fn() + Send + Sync + 'static,
{
    *FAIL_CALLBACK.lock() = callback.map(|f| Box::new(f) as FailCallback);
}

/// Runs the registered fail callback, if any. Called by allocators right
/// before returning `None` from a failed `malloc`/`realloc`.
pub fn run_fail_callback() {
    if let Some(cb) = FAIL_CALLBACK.lock().as_ref() {
        cb();
    }
}

/// Rounds `align` up to at least [`MACHINE_ALIGNMENT`].
#[inline]
pub fn normalize_align(align: u32) -> u32 {
    align.max(MACHINE_ALIGNMENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn fail_callback_runs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = Arc::clone(&counter);
        set_fail_callback(Some(move || {
            counter2.fetch_add(1, Ordering::SeqCst);
        }));
        run_fail_callback();
        run_fail_callback();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        set_fail_callback::<fn()>(None);
    }

    #[test]
    fn normalize_align_raises_to_machine_alignment() {
        assert_eq!(normalize_align(1), MACHINE_ALIGNMENT);
        assert_eq!(normalize_align(64), 64);
    }
}
