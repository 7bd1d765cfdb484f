//! Per-thread command recording (§4.13, first half). Each recording
//! thread owns one [`CommandBufferThreadState`]: a command pool and a
//! free/active buffer list per in-flight frame, so a worker thread
//! never contends with another thread's pool allocator — matching the
//! one-pool-per-thread-per-frame discipline Vulkan's spec recommends
//! and the original engine's `gfxCmdBegin`/`gfxCmdEnd` pairing relied
//! on.

use crate::error::GfxResult;
use ash::vk;
use parking_lot::Mutex;

struct FramePool {
    pool: vk::CommandPool,
    free: Vec<vk::CommandBuffer>,
    active: Vec<vk::CommandBuffer>,
}

impl FramePool {
    fn new(device: &ash::Device, queue_family: u32) -> GfxResult<Self> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { device.create_command_pool(&info, None)? };
        Ok(Self {
            pool,
            free: Vec::new(),
            active: Vec::new(),
        })
    }
}

/// One thread's command-recording state across all in-flight frames.
/// Not `Sync` by design — the owning thread is the only one that ever
/// touches it; other threads only see its contributions once they land
/// in the global `pending_submit` list.
pub struct CommandBufferThreadState {
    frames: Vec<FramePool>,
    current: Option<vk::CommandBuffer>,
    timestamp_written_this_frame: bool,
}

impl CommandBufferThreadState {
    pub fn new(device: &ash::Device, queue_family: u32, frames_in_flight: usize) -> GfxResult<Self> {
        let mut frames = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            frames.push(FramePool::new(device, queue_family)?);
        }
        Ok(Self {
            frames,
            current: None,
            timestamp_written_this_frame: false,
        })
    }

    /// Opens a command buffer for `frame_index`, allocating a fresh one
    /// from the pool's free list if it is empty, and marks it current
    /// for this thread. Writes a top-of-pipe timestamp on the first
    /// `begin` call this frame when `query_pool` is provided.
    pub fn begin(
        &mut self,
        device: &ash::Device,
        frame_index: usize,
        query_pool: Option<vk::QueryPool>,
    ) -> GfxResult<vk::CommandBuffer> {
        let frame = &mut self.frames[frame_index];
        let buffer = if let Some(buf) = frame.free.pop() {
            buf
        } else {
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(frame.pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            unsafe { device.allocate_command_buffers(&alloc_info)?[0] }
        };

        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device.reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(buffer, &begin_info)?;
        }

        if !self.timestamp_written_this_frame {
            if let Some(pool) = query_pool {
                unsafe {
                    device.cmd_reset_query_pool(buffer, pool, 0, 2);
                    device.cmd_write_timestamp(buffer, vk::PipelineStageFlags::TOP_OF_PIPE, pool, 0);
                }
            }
            self.timestamp_written_this_frame = true;
        }

        frame.active.push(buffer);
        self.current = Some(buffer);
        Ok(buffer)
    }

    /// Closes the currently-open recording and appends it to `pending`
    /// under the caller-held spinlock, matching §4.13's "append to a
    /// global, spinlock-guarded `pending_submit` list".
    pub fn end(&mut self, device: &ash::Device, pending: &Mutex<Vec<vk::CommandBuffer>>) -> GfxResult<()> {
        let Some(buffer) = self.current.take() else {
            return Ok(());
        };
        unsafe { device.end_command_buffer(buffer)? };
        pending.lock().push(buffer);
        Ok(())
    }

    /// Returns every buffer allocated for `frame_index` to its pool's
    /// free list and clears the per-frame timestamp flag; called once
    /// that frame's in-flight fence has signaled.
    pub fn reclaim_frame(&mut self, frame_index: usize) {
        let frame = &mut self.frames[frame_index];
        frame.free.append(&mut frame.active);
        self.timestamp_written_this_frame = false;
    }

    pub fn current(&self) -> Option<vk::CommandBuffer> {
        self.current
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        for frame in &self.frames {
            unsafe { device.destroy_command_pool(frame.pool, None) };
        }
    }
}

/// Viewport/scissor orientation transform (§4.13 last paragraph): the
/// rotation applied so the same draw code works whether the swapchain
/// reports an identity pre-transform or a 90/180/270-degree one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrientationTransform {
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl OrientationTransform {
    pub fn from_surface_transform(transform: vk::SurfaceTransformFlagsKHR) -> Self {
        match transform {
            vk::SurfaceTransformFlagsKHR::ROTATE_90 => Self::Rotate90,
            vk::SurfaceTransformFlagsKHR::ROTATE_180 => Self::Rotate180,
            vk::SurfaceTransformFlagsKHR::ROTATE_270 => Self::Rotate270,
            _ => Self::Identity,
        }
    }

    /// Applies the rotation to a logical `(x, y, width, height)`
    /// viewport/scissor rect expressed against an unrotated framebuffer
    /// of size `(fb_width, fb_height)`.
    pub fn apply(self, x: f32, y: f32, width: f32, height: f32, fb_width: f32, fb_height: f32) -> (f32, f32, f32, f32) {
        match self {
            Self::Identity => (x, y, width, height),
            Self::Rotate90 => (fb_height - y - height, x, height, width),
            Self::Rotate180 => (fb_width - x - width, fb_height - y - height, width, height),
            Self::Rotate270 => (y, fb_width - x - width, height, width),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_transform_is_a_no_op() {
        let (x, y, w, h) = OrientationTransform::Identity.apply(10.0, 20.0, 100.0, 50.0, 800.0, 600.0);
        assert_eq!((x, y, w, h), (10.0, 20.0, 100.0, 50.0));
    }

    #[test]
    fn rotate_180_flips_both_axes() {
        let (x, y, w, h) = OrientationTransform::Rotate180.apply(10.0, 20.0, 100.0, 50.0, 800.0, 600.0);
        assert_eq!((x, y, w, h), (800.0 - 10.0 - 100.0, 600.0 - 20.0 - 50.0, 100.0, 50.0));
    }

    #[test]
    fn from_surface_transform_maps_every_rotation() {
        assert_eq!(
            OrientationTransform::from_surface_transform(vk::SurfaceTransformFlagsKHR::ROTATE_90),
            OrientationTransform::Rotate90
        );
        assert_eq!(
            OrientationTransform::from_surface_transform(vk::SurfaceTransformFlagsKHR::IDENTITY),
            OrientationTransform::Identity
        );
    }
}
