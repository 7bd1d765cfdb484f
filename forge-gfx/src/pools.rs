//! The six device object pools (§4.8), each a [`forge_core::HandlePool`]
//! behind its own `RwLock`: read locks for lookups during command
//! recording (many threads may record at once), write locks for
//! add/remove. Splitting one lock per entity kind — rather than one lock
//! for the whole device — is what lets independent subsystems (buffer
//! uploads, pipeline creation, descriptor writes) proceed without
//! contending on each other.

use crate::buffer::BufferObject;
use crate::handles::{
    BufferHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, ImageHandle, PipelineHandle, PipelineLayoutHandle,
};
use crate::image::ImageObject;
use crate::layout_cache::{DescriptorSetLayoutEntry, PipelineLayoutEntry};
use crate::pipeline::PipelineEntry;
use forge_core::HandlePool;
use parking_lot::RwLock;

pub struct DescriptorSetEntry {
    pub layout: DescriptorSetLayoutHandle,
    pub raw: ash::vk::DescriptorSet,
    pub pool: ash::vk::DescriptorPool,
}

/// One `RwLock<HandlePool<T>>` per device object kind. Lookups during
/// command recording take a read lock; creation/destruction takes a
/// write lock.
#[derive(Default)]
pub struct DevicePools {
    pub buffers: RwLock<HandlePool<BufferObject>>,
    pub images: RwLock<HandlePool<ImageObject>>,
    pub pipelines: RwLock<HandlePool<PipelineEntry>>,
    pub pipeline_layouts: RwLock<HandlePool<PipelineLayoutEntry>>,
    pub descriptor_sets: RwLock<HandlePool<DescriptorSetEntry>>,
    pub descriptor_set_layouts: RwLock<HandlePool<DescriptorSetLayoutEntry>>,
}

impl DevicePools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer<R>(&self, handle: BufferHandle, f: impl FnOnce(&BufferObject) -> R) -> Option<R> {
        self.buffers.read().get(handle).map(f)
    }

    pub fn with_image<R>(&self, handle: ImageHandle, f: impl FnOnce(&ImageObject) -> R) -> Option<R> {
        self.images.read().get(handle).map(f)
    }

    pub fn with_pipeline<R>(&self, handle: PipelineHandle, f: impl FnOnce(&PipelineEntry) -> R) -> Option<R> {
        self.pipelines.read().get(handle).map(f)
    }

    pub fn with_pipeline_layout<R>(&self, handle: PipelineLayoutHandle, f: impl FnOnce(&PipelineLayoutEntry) -> R) -> Option<R> {
        self.pipeline_layouts.read().get(handle).map(f)
    }

    pub fn with_descriptor_set<R>(&self, handle: DescriptorSetHandle, f: impl FnOnce(&DescriptorSetEntry) -> R) -> Option<R> {
        self.descriptor_sets.read().get(handle).map(f)
    }

    pub fn with_descriptor_set_layout<R>(
        &self,
        handle: DescriptorSetLayoutHandle,
        f: impl FnOnce(&DescriptorSetLayoutEntry) -> R,
    ) -> Option<R> {
        self.descriptor_set_layouts.read().get(handle).map(f)
    }
}
