//! Image object and lifecycle (§4.10): content-carrying images stage
//! through the deferred queue with a pair of layout-transition barriers
//! around the mip copy; framebuffer images get a view, optional sampler,
//! and an `UNDEFINED -> attachment-optimal` barrier instead.

use crate::error::GfxResult;
use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    R8G8B8A8Unorm,
    R8G8B8A8Srgb,
    B8G8R8A8Unorm,
    D32Sfloat,
    D24UnormS8Uint,
    Astc4x4Unorm,
}

impl ImageFormat {
    pub fn to_vk(self) -> vk::Format {
        match self {
            Self::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
            Self::R8G8B8A8Srgb => vk::Format::R8G8B8A8_SRGB,
            Self::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
            Self::D32Sfloat => vk::Format::D32_SFLOAT,
            Self::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
            Self::Astc4x4Unorm => vk::Format::ASTC_4X4_UNORM_BLOCK,
        }
    }

    pub fn is_astc(self) -> bool {
        matches!(self, Self::Astc4x4Unorm)
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Self::D32Sfloat | Self::D24UnormS8Uint)
    }
}

pub const MAX_MIPS: u32 = 16;

#[derive(Debug, Clone)]
pub struct ImageDesc<'a> {
    pub width: u32,
    pub height: u32,
    pub num_mips: u32,
    pub format: ImageFormat,
    pub usage: crate::types::BufferUsage,
    pub anisotropy: f32,
    pub sampler_filter: crate::types::SamplerFilterMode,
    pub sampler_wrap: crate::types::SamplerWrapMode,
    pub border_color: crate::types::SamplerBorderColor,
    pub framebuffer: bool,
    pub sampled: bool,
    pub content: Option<&'a [u8]>,
    /// Byte offset of each mip level within `content`; `mip_offsets[0] == 0`.
    pub mip_offsets: Vec<u32>,
}

pub struct ImageObject {
    pub width: u32,
    pub height: u32,
    pub num_mips: u32,
    pub format: ImageFormat,
    pub sampled: bool,
    pub framebuffer: bool,
    pub raw: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub sampler: Option<vk::Sampler>,
    pub backing_size: u64,
    /// Current layout as last transitioned; used to pick the source
    /// layout of the next barrier this image needs.
    pub layout: vk::ImageLayout,
}

unsafe impl Send for ImageObject {}
unsafe impl Sync for ImageObject {}

fn aspect_for(format: ImageFormat) -> vk::ImageAspectFlags {
    if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

fn find_memory_type(
    memory_props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_props.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && memory_props.memory_types[i as usize].property_flags.contains(required)
    })
}

/// Creates the device image, memory, view, and (when `sampled`) sampler
/// for `desc`. Content upload and layout-transition barriers are not
/// issued here — `Device::create_image` schedules those through the
/// deferred command queue so this function stays a pure object builder.
pub fn build_image_object(
    device: &ash::Device,
    memory_props: &vk::PhysicalDeviceMemoryProperties,
    astc_decode_supported: bool,
    desc: &ImageDesc,
) -> GfxResult<ImageObject> {
    let format = desc.format.to_vk();
    let usage = if desc.framebuffer {
        if desc.format.is_depth() {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        } else {
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        }
    } else {
        vk::ImageUsageFlags::TRANSFER_DST
    } | if desc.sampled {
        vk::ImageUsageFlags::SAMPLED
    } else {
        vk::ImageUsageFlags::empty()
    };

    let create_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width: desc.width,
            height: desc.height,
            depth: 1,
        })
        .mip_levels(desc.num_mips.max(1))
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    // SAFETY: `create_info` is self-consistent; image creation requires no
    // external synchronization.
    let raw = unsafe { device.create_image(&create_info, None)? };
    let requirements = unsafe { device.get_image_memory_requirements(raw) };
    let memory_type = find_memory_type(memory_props, requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
        .ok_or(crate::error::GfxError::NoSuitableAdapter)?;
    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type);
    let memory = unsafe { device.allocate_memory(&alloc_info, None)? };
    unsafe { device.bind_image_memory(raw, memory, 0)? };

    let mut view_info = vk::ImageViewCreateInfo::default()
        .image(raw)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect_for(desc.format),
            base_mip_level: 0,
            level_count: desc.num_mips.max(1),
            base_array_layer: 0,
            layer_count: 1,
        });
    // ASTC images request the decode-mode-RGBA8 view attachment when the
    // extension is present (§4.10); without it the view just decodes to
    // the block format's native unpacked type.
    let mut astc_decode_mode = vk::ImageViewASTCDecodeModeEXT::default().decode_mode(vk::Format::R8G8B8A8_UNORM);
    if desc.format.is_astc() && astc_decode_supported {
        view_info = view_info.push_next(&mut astc_decode_mode);
    }
    let view = unsafe { device.create_image_view(&view_info, None)? };

    let sampler = if desc.sampled {
        Some(build_sampler(device, desc)?)
    } else {
        None
    };

    Ok(ImageObject {
        width: desc.width,
        height: desc.height,
        num_mips: desc.num_mips.max(1),
        format: desc.format,
        sampled: desc.sampled,
        framebuffer: desc.framebuffer,
        raw,
        memory,
        view,
        sampler,
        backing_size: requirements.size,
        layout: vk::ImageLayout::UNDEFINED,
    })
}

fn build_sampler(device: &ash::Device, desc: &ImageDesc) -> GfxResult<vk::Sampler> {
    let filter = match desc.sampler_filter {
        crate::types::SamplerFilterMode::Nearest => vk::Filter::NEAREST,
        crate::types::SamplerFilterMode::Linear => vk::Filter::LINEAR,
    };
    let wrap = match desc.sampler_wrap {
        crate::types::SamplerWrapMode::Repeat => vk::SamplerAddressMode::REPEAT,
        crate::types::SamplerWrapMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        crate::types::SamplerWrapMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        crate::types::SamplerWrapMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
    };
    let info = vk::SamplerCreateInfo::default()
        .mag_filter(filter)
        .min_filter(filter)
        .address_mode_u(wrap)
        .address_mode_v(wrap)
        .address_mode_w(wrap)
        .anisotropy_enable(desc.anisotropy > 1.0)
        .max_anisotropy(desc.anisotropy)
        .max_lod(desc.num_mips.max(1) as f32);
    unsafe { device.create_sampler(&info, None) }.map_err(Into::into)
}

pub fn destroy_image_object(device: &ash::Device, obj: &ImageObject) {
    unsafe {
        if let Some(sampler) = obj.sampler {
            device.destroy_sampler(sampler, None);
        }
        device.destroy_image_view(obj.view, None);
        device.destroy_image(obj.raw, None);
        device.free_memory(obj.memory, None);
    }
}

/// Builds the pair of barriers a content-carrying image upload needs:
/// `UNDEFINED -> TRANSFER_DST` before the mip copy, and
/// `TRANSFER_DST -> SHADER_READ_ONLY` after it.
pub fn upload_barriers(image: vk::Image, aspect: vk::ImageAspectFlags, mip_count: u32) -> (vk::ImageMemoryBarrier<'static>, vk::ImageMemoryBarrier<'static>) {
    let range = vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: mip_count,
        base_array_layer: 0,
        layer_count: 1,
    };
    let to_transfer_dst = vk::ImageMemoryBarrier::default()
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .image(image)
        .subresource_range(range);
    let to_shader_read = vk::ImageMemoryBarrier::default()
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ)
        .image(image)
        .subresource_range(range);
    (to_transfer_dst, to_shader_read)
}

/// Builds the single barrier a framebuffer image needs on creation:
/// `UNDEFINED -> {color,depth}-attachment-optimal`.
pub fn framebuffer_barrier(image: vk::Image, aspect: vk::ImageAspectFlags, is_depth: bool) -> vk::ImageMemoryBarrier<'static> {
    let new_layout = if is_depth {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    } else {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    };
    let dst_access = if is_depth {
        vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
    } else {
        vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
    };
    vk::ImageMemoryBarrier::default()
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(new_layout)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(dst_access)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
}
