//! Error types for the fallible device boundaries named in the runtime's
//! error-handling design: device/swapchain lifecycle and cache misses
//! that bottom out in a real device error. Allocation failures stay
//! null-returning per `forge_core::Allocator`'s contract — that's a
//! spec invariant, not something `thiserror` should paper over.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GfxError {
    #[error("vulkan call failed: {0:?}")]
    Vulkan(#[from] ash::vk::Result),
    #[error("no suitable physical device found")]
    NoSuitableAdapter,
    #[error("required device extension not supported: {0}")]
    MissingExtension(&'static str),
    #[error("device lost")]
    DeviceLost,
    #[error("operating on a stale or unknown handle")]
    InvalidHandle,
    #[error("shader reflection blob is malformed: {0}")]
    BadReflection(&'static str),
    #[error("cpu-side vertex attribute {semantic} does not match the shader's reflected attribute")]
    VertexAttributeMismatch { semantic: String },
    #[error(transparent)]
    Swapchain(#[from] SwapchainError),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainError {
    #[error("swapchain is out of date and must be recreated")]
    OutOfDate,
    #[error("swapchain is suboptimal but still usable this frame")]
    Suboptimal,
    #[error("device lost while acquiring or presenting")]
    DeviceLost,
    #[error("surface lost")]
    SurfaceLost,
}

pub type GfxResult<T> = Result<T, GfxError>;
