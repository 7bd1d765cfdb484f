//! Swapchain entity: surface, image ring, per-image views, the default
//! render pass, and an optional depth attachment. Recreated in place on
//! `OUT_OF_DATE`/resize rather than replaced, so handles held elsewhere
//! (the frame scheduler's per-image fence array) stay structurally
//! valid across a resize.

use crate::error::{GfxResult, SwapchainError};
use ash::khr;
use ash::vk;

pub struct SwapchainImage {
    pub raw: vk::Image,
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
}

pub struct Swapchain {
    loader: khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    surface_loader: khr::surface::Instance,
    pub raw: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<SwapchainImage>,
    pub render_pass: vk::RenderPass,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    depth: Option<(vk::Image, vk::DeviceMemory, vk::ImageView)>,
    vsync: bool,
}

impl Swapchain {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
        memory_props: &vk::PhysicalDeviceMemoryProperties,
        surface: vk::SurfaceKHR,
        surface_loader: khr::surface::Instance,
        loader: khr::swapchain::Device,
        requested_extent: vk::Extent2D,
        vsync: bool,
        srgb: bool,
        depth_format: Option<crate::image::ImageFormat>,
    ) -> GfxResult<Self> {
        let mut swapchain = Self {
            loader,
            surface,
            surface_loader,
            raw: vk::SwapchainKHR::null(),
            format: vk::Format::UNDEFINED,
            extent: requested_extent,
            images: Vec::new(),
            render_pass: vk::RenderPass::null(),
            pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            depth: None,
            vsync,
        };
        swapchain.recreate(instance, device, physical_device, memory_props, requested_extent, srgb, depth_format)?;
        Ok(swapchain)
    }

    /// Tears down the current swapchain (keeping the old one alive as
    /// `old_swapchain` for the brief overlap Vulkan allows) and builds
    /// a fresh one at `requested_extent`. Called on `OUT_OF_DATE` and on
    /// an explicit resize request.
    #[allow(clippy::too_many_arguments)]
    pub fn recreate(
        &mut self,
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
        memory_props: &vk::PhysicalDeviceMemoryProperties,
        requested_extent: vk::Extent2D,
        srgb: bool,
        depth_format: Option<crate::image::ImageFormat>,
    ) -> GfxResult<()> {
        profiling::scope!("Swapchain::recreate");
        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)?
        };
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)?
        };
        let chosen = formats
            .iter()
            .find(|f| {
                let wants_srgb = f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR;
                let is_srgb_format = matches!(f.format, vk::Format::B8G8R8A8_SRGB | vk::Format::R8G8B8A8_SRGB);
                wants_srgb && (is_srgb_format == srgb)
            })
            .or_else(|| formats.first())
            .copied()
            .ok_or(SwapchainError::SurfaceLost)?;

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: requested_extent.width.clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
                height: requested_extent.height.clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
            }
        };

        let present_mode = if self.vsync { vk::PresentModeKHR::FIFO } else { vk::PresentModeKHR::MAILBOX };
        let image_count = (capabilities.min_image_count + 1).min(if capabilities.max_image_count == 0 {
            u32::MAX
        } else {
            capabilities.max_image_count
        });

        let old_swapchain = self.raw;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(chosen.format)
            .image_color_space(chosen.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let raw = unsafe { self.loader.create_swapchain(&create_info, None)? };
        self.destroy_images_and_pass(device);
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }

        self.raw = raw;
        self.format = chosen.format;
        self.extent = extent;
        self.pre_transform = capabilities.current_transform;

        let has_depth = depth_format.is_some();
        self.render_pass = build_render_pass(device, chosen.format, depth_format)?;
        if let Some(df) = depth_format {
            self.depth = Some(build_depth_attachment(device, memory_props, df, extent)?);
        }

        let raw_images = unsafe { self.loader.get_swapchain_images(raw)? };
        self.images = raw_images
            .into_iter()
            .map(|image| build_swapchain_image(device, image, chosen.format, self.render_pass, extent, self.depth.map(|d| d.2), has_depth))
            .collect::<GfxResult<Vec<_>>>()?;

        let _ = instance;
        Ok(())
    }

    fn destroy_images_and_pass(&mut self, device: &ash::Device) {
        for image in self.images.drain(..) {
            unsafe {
                device.destroy_framebuffer(image.framebuffer, None);
                device.destroy_image_view(image.view, None);
            }
        }
        if self.render_pass != vk::RenderPass::null() {
            unsafe { device.destroy_render_pass(self.render_pass, None) };
        }
        if let Some((image, memory, view)) = self.depth.take() {
            unsafe {
                device.destroy_image_view(view, None);
                device.destroy_image(image, None);
                device.free_memory(memory, None);
            }
        }
    }

    /// Acquires the next image. `OUT_OF_DATE` and `SUBOPTIMAL` are
    /// reported distinctly so the caller can schedule a resize without
    /// treating a merely-suboptimal acquire as fatal (§4.14 step 4).
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), SwapchainError> {
        match unsafe { self.loader.acquire_next_image(self.raw, u64::MAX, semaphore, vk::Fence::null()) } {
            Ok((index, suboptimal)) => Ok((index, suboptimal)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(SwapchainError::OutOfDate),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(SwapchainError::DeviceLost),
            Err(_) => Err(SwapchainError::SurfaceLost),
        }
    }

    pub fn present(&self, queue: vk::Queue, image_index: u32, wait_semaphores: &[vk::Semaphore]) -> Result<(), SwapchainError> {
        let swapchains = [self.raw];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        match unsafe { self.loader.queue_present(queue, &info) } {
            Ok(_suboptimal) => Ok(()),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(SwapchainError::OutOfDate),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(SwapchainError::DeviceLost),
            Err(_) => Err(SwapchainError::SurfaceLost),
        }
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        self.destroy_images_and_pass(device);
        if self.raw != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.raw, None) };
        }
        unsafe { self.surface_loader.destroy_surface(self.surface, None) };
    }
}

fn build_render_pass(device: &ash::Device, color_format: vk::Format, depth_format: Option<crate::image::ImageFormat>) -> GfxResult<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::default()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);
    let color_ref = vk::AttachmentReference::default().attachment(0).layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let mut attachments = vec![color_attachment];
    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(std::slice::from_ref(&color_ref));

    let depth_ref = vk::AttachmentReference::default().attachment(1).layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    if let Some(df) = depth_format {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(df.to_vk())
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
        subpass = subpass.depth_stencil_attachment(&depth_ref);
    }

    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(std::slice::from_ref(&dependency));
    unsafe { device.create_render_pass(&info, None) }.map_err(Into::into)
}

fn build_depth_attachment(
    device: &ash::Device,
    memory_props: &vk::PhysicalDeviceMemoryProperties,
    format: crate::image::ImageFormat,
    extent: vk::Extent2D,
) -> GfxResult<(vk::Image, vk::DeviceMemory, vk::ImageView)> {
    let create_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format.to_vk())
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);
    let image = unsafe { device.create_image(&create_info, None)? };
    let requirements = unsafe { device.get_image_memory_requirements(image) };
    let memory_type = (0..memory_props.memory_type_count)
        .find(|&i| {
            (requirements.memory_type_bits & (1 << i)) != 0
                && memory_props.memory_types[i as usize].property_flags.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL)
        })
        .ok_or(crate::error::GfxError::NoSuitableAdapter)?;
    let alloc_info = vk::MemoryAllocateInfo::default().allocation_size(requirements.size).memory_type_index(memory_type);
    let memory = unsafe { device.allocate_memory(&alloc_info, None)? };
    unsafe { device.bind_image_memory(image, memory, 0)? };

    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format.to_vk())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::DEPTH,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });
    let view = unsafe { device.create_image_view(&view_info, None)? };
    Ok((image, memory, view))
}

#[allow(clippy::too_many_arguments)]
fn build_swapchain_image(
    device: &ash::Device,
    raw: vk::Image,
    format: vk::Format,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    depth_view: Option<vk::ImageView>,
    has_depth: bool,
) -> GfxResult<SwapchainImage> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(raw)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });
    let view = unsafe { device.create_image_view(&view_info, None)? };

    let mut attachments = vec![view];
    if has_depth {
        attachments.push(depth_view.expect("depth_view present when has_depth is true"));
    }
    let fb_info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(&attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);
    let framebuffer = unsafe { device.create_framebuffer(&fb_info, None)? };

    Ok(SwapchainImage { raw, view, framebuffer })
}
