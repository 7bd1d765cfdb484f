//! Frame scheduler (§4.14): fences, frame-index rotation, acquire and
//! present. `MAX_FRAMES_IN_FLIGHT` bounds how many frames' worth of GPU
//! work can be outstanding at once; a per-swapchain-image fence array
//! additionally prevents an acquired image from being written by two
//! overlapping frames.

use crate::deferred::DeferredQueue;
use crate::error::{GfxError, GfxResult, SwapchainError};
use crate::gc::GarbageCollector;
use crate::swapchain::Swapchain;
use ash::vk;

pub struct FrameScheduler {
    max_frames_in_flight: usize,
    current_frame: usize,
    frame_counter: u64,
    in_flight_fences: Vec<vk::Fence>,
    image_available: Vec<vk::Semaphore>,
    render_finished: Vec<vk::Semaphore>,
    /// Indexed by swapchain image index; `null()` until a frame first
    /// references that image.
    images_in_flight: Vec<vk::Fence>,
    pub current_image_index: Option<u32>,
}

impl FrameScheduler {
    pub fn new(device: &ash::Device, max_frames_in_flight: usize, swapchain_image_count: usize) -> GfxResult<Self> {
        let mut in_flight_fences = Vec::with_capacity(max_frames_in_flight);
        let mut image_available = Vec::with_capacity(max_frames_in_flight);
        let mut render_finished = Vec::with_capacity(max_frames_in_flight);
        for _ in 0..max_frames_in_flight {
            let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
            in_flight_fences.push(unsafe { device.create_fence(&fence_info, None)? });
            let sem_info = vk::SemaphoreCreateInfo::default();
            image_available.push(unsafe { device.create_semaphore(&sem_info, None)? });
            render_finished.push(unsafe { device.create_semaphore(&sem_info, None)? });
        }
        Ok(Self {
            max_frames_in_flight,
            current_frame: 0,
            frame_counter: 0,
            in_flight_fences,
            image_available,
            render_finished,
            images_in_flight: vec![vk::Fence::null(); swapchain_image_count],
            current_image_index: None,
        })
    }

    pub fn current_frame_index(&self) -> usize {
        self.current_frame
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// §4.14 `begin_frame` steps 2-4: wait on this slot's fence, drain
    /// the deferred queue into a fresh command buffer (the caller
    /// supplies the buffer since recording is the command module's
    /// job), and acquire the next swapchain image. Returns the acquired
    /// image index; on `OUT_OF_DATE` surfaces
    /// `Err(GfxError::Swapchain(SwapchainError::OutOfDate))` so the
    /// caller (the device, which owns the swapchain recreation logic)
    /// can recreate the swapchain before the frame proceeds, without
    /// advancing `current_frame` (testable property F / scenario F).
    pub fn begin_frame(
        &mut self,
        device: &ash::Device,
        swapchain: &mut Swapchain,
        deferred: &DeferredQueue,
        open_deferred_buffer: impl FnOnce(&ash::Device) -> GfxResult<vk::CommandBuffer>,
    ) -> GfxResult<Option<u32>> {
        profiling::scope!("FrameScheduler::begin_frame");
        let fence = self.in_flight_fences[self.current_frame];
        unsafe {
            device.wait_for_fences(&[fence], true, u64::MAX)?;
        }

        if !deferred.is_empty() {
            let buf = open_deferred_buffer(device)?;
            deferred.replay(device, buf);
        }

        match swapchain.acquire_next_image(self.image_available[self.current_frame]) {
            Ok((index, _suboptimal)) => {
                let image_fence = self.images_in_flight[index as usize];
                if image_fence != vk::Fence::null() {
                    unsafe { device.wait_for_fences(&[image_fence], true, u64::MAX)? };
                }
                self.images_in_flight[index as usize] = fence;
                self.current_image_index = Some(index);
                Ok(Some(index))
            }
            Err(SwapchainError::OutOfDate) => {
                self.current_image_index = None;
                Err(GfxError::Swapchain(SwapchainError::OutOfDate))
            }
            Err(SwapchainError::DeviceLost) => Err(GfxError::DeviceLost),
            Err(e) => Err(GfxError::Swapchain(e)),
        }
    }

    /// §4.14 `end_frame` steps 2-6: snapshot pending submits (done by
    /// the caller, passed in as `submits`), rotate the frame index,
    /// submit, present, and run garbage collection.
    pub fn end_frame(
        &mut self,
        device: &ash::Device,
        queue: vk::Queue,
        swapchain: &Swapchain,
        submits: &[vk::CommandBuffer],
        gc: &GarbageCollector,
    ) -> GfxResult<()> {
        profiling::scope!("FrameScheduler::end_frame");
        let Some(image_index) = self.current_image_index else {
            // No image was acquired this frame (OUT_OF_DATE path); nothing to submit or present.
            self.frame_counter += 1;
            return Ok(());
        };

        let fence = self.in_flight_fences[self.current_frame];
        unsafe { device.reset_fences(&[fence])? };

        let wait_semaphores = [self.image_available[self.current_frame]];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.render_finished[self.current_frame]];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(submits)
            .signal_semaphores(&signal_semaphores);
        {
            profiling::scope!("vkQueueSubmit");
            unsafe { device.queue_submit(queue, std::slice::from_ref(&submit_info), fence)? };
        }

        self.current_frame = (self.current_frame + 1) % self.max_frames_in_flight;
        self.frame_counter += 1;

        let present_result = {
            profiling::scope!("vkQueuePresentKHR");
            swapchain.present(queue, image_index, &signal_semaphores)
        };
        match present_result {
            Ok(()) => {}
            Err(SwapchainError::OutOfDate) | Err(SwapchainError::Suboptimal) => {
                // Caller is expected to notice the next acquire failing and resize then;
                // presenting to a stale swapchain is not itself a fatal error (§5 cancellation note).
            }
            Err(SwapchainError::DeviceLost) => return Err(GfxError::DeviceLost),
            Err(e) => return Err(GfxError::Swapchain(e)),
        }

        gc.collect(device, self.frame_counter, false);
        self.current_image_index = None;
        Ok(())
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        for fence in self.in_flight_fences.drain(..) {
            unsafe { device.destroy_fence(fence, None) };
        }
        for sem in self.image_available.drain(..).chain(self.render_finished.drain(..)) {
            unsafe { device.destroy_semaphore(sem, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_index_rotates_modulo_max_in_flight() {
        // Exercise the pure rotation arithmetic `end_frame` performs,
        // without requiring a live device/queue/swapchain.
        let max_frames_in_flight = 3usize;
        let mut current = 0usize;
        for expected in [1, 2, 0, 1] {
            current = (current + 1) % max_frames_in_flight;
            assert_eq!(current, expected);
        }
    }
}
