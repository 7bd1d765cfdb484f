//! Memory allocators, atomics, sorting and handle pools shared by every
//! crate in the forge engine runtime.
//!
//! This crate has no GPU dependency: it is the foundation layer
//! `forge-gfx` and `forge-engine` build on, the way `wgpu-types` sits
//! underneath `wgpu-core`/`wgpu-hal` in the workspace this one is
//! modeled on.

pub mod allocator;
pub mod atomic;
pub mod bump;
pub mod handle;
pub mod heap;
pub mod proxy;
pub mod sort;
pub mod threadsafe;
pub mod tlsf;
pub mod transient;
pub mod vmem;

pub use allocator::{normalize_align, run_fail_callback, set_fail_callback, Allocator, AllocatorKind, MACHINE_ALIGNMENT};
pub use bump::BumpArena;
pub use handle::{Handle, HandlePool};
pub use heap::HeapAllocator;
pub use proxy::{ProxyAllocator, ProxyStats};
pub use sort::sort_stable;
pub use threadsafe::ThreadSafeAllocator;
pub use tlsf::TlsfAllocator;
pub use transient::{TransientContext, TransientError};
