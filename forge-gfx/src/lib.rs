//! The Vulkan-backed device abstraction: handle-pool object management,
//! buffer/image lifecycle, content-hashed layout/pipeline caches, the
//! per-thread command recorder and deferred command queue, the frame
//! scheduler, the swapchain, and the frame-delayed garbage collector.
//!
//! Sits on top of [`forge_core`] (no GPU dependency of its own) the way
//! `wgpu-core` + `wgpu-hal`'s vulkan backend sit on top of `wgpu-types`
//! in the workspace this one is modeled on; [`forge_engine`] is the
//! application-facing façade built on top of this crate.

pub mod buffer;
pub mod command;
pub mod deferred;
pub mod device;
pub mod error;
pub mod gc;
pub mod handles;
pub mod image;
pub mod layout_cache;
pub mod pipeline;
pub mod pools;
pub mod reflection;
pub mod scheduler;
pub mod settings;
pub mod swapchain;
pub mod types;

pub use command::OrientationTransform;
pub use deferred::{with_deferred, DeferredCommand};
pub use device::{Device, DeviceFeatures, MemoryBudget};
pub use error::{GfxError, GfxResult, SwapchainError};
pub use handles::{
    BufferHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, ImageHandle, PipelineHandle, PipelineLayoutHandle,
};
pub use settings::GfxSettings;
