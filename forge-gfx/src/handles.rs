//! Typed device-object handles. [`forge_core::Handle`] is already
//! phantom-typed on the pool's stored value, so aliasing it per entity
//! struct (rather than inventing separate marker types) gets the same
//! "a `BufferHandle` can never be passed where an `ImageHandle` is
//! expected" guarantee for free, and keeps every handle the exact type
//! its owning [`forge_core::HandlePool`] hands out.

use crate::buffer::BufferObject;
use crate::image::ImageObject;
use crate::layout_cache::{DescriptorSetLayoutEntry, PipelineLayoutEntry};
use crate::pipeline::PipelineEntry;
use crate::pools::DescriptorSetEntry;
use forge_core::Handle;

pub type BufferHandle = Handle<BufferObject>;
pub type ImageHandle = Handle<ImageObject>;
pub type PipelineHandle = Handle<PipelineEntry>;
pub type PipelineLayoutHandle = Handle<PipelineLayoutEntry>;
pub type DescriptorSetHandle = Handle<DescriptorSetEntry>;
pub type DescriptorSetLayoutHandle = Handle<DescriptorSetLayoutEntry>;
