//! Deferred-destruction garbage collector (§4.15): destroying a device
//! object that the GPU might still be reading from is never immediate.
//! It is appended to a FIFO list stamped with the frame it was retired
//! on, and only actually destroyed once `MAX_FRAMES_IN_FLIGHT` frames
//! have elapsed — by which point every in-flight fence that could have
//! referenced it has signaled.

use crate::buffer::BufferObject;
use crate::image::ImageObject;
use crate::pipeline::PipelineEntry;
use parking_lot::Mutex;

/// Which destructor a garbage record routes to when collected.
pub enum GarbageKind {
    Buffer(BufferObject),
    Image(ImageObject),
    Pipeline(ash::vk::Pipeline),
    /// A raw `(buffer, memory)` pair with no owning `BufferObject` —
    /// e.g. the staging buffer behind an immutable upload.
    RawBuffer(ash::vk::Buffer, ash::vk::DeviceMemory),
}

struct Record {
    frame_stamp: u64,
    kind: GarbageKind,
}

/// FIFO garbage list. `add` may be called from any thread; `collect`
/// is only ever called from the engine/render thread at end-of-frame
/// (§5), so it does not need to hold the lock while destroying.
pub struct GarbageCollector {
    records: Mutex<Vec<Record>>,
    max_frames_in_flight: u64,
}

impl GarbageCollector {
    pub fn new(max_frames_in_flight: u64) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            max_frames_in_flight,
        }
    }

    pub fn add(&self, frame_stamp: u64, kind: GarbageKind) {
        self.records.lock().push(Record { frame_stamp, kind });
    }

    pub fn pending_len(&self) -> usize {
        self.records.lock().len()
    }

    /// Scans the list for records whose retiring frame is at least
    /// `max_frames_in_flight` frames behind `current_frame` (or every
    /// record, when `force` is set — used on device shutdown) and
    /// destroys them. Survivors are kept in FIFO order.
    pub fn collect(&self, device: &ash::Device, current_frame: u64, force: bool) {
        let mut due = Vec::new();
        {
            let mut records = self.records.lock();
            let mut i = 0;
            while i < records.len() {
                let ready = force || current_frame > records[i].frame_stamp + self.max_frames_in_flight;
                if ready {
                    due.push(records.remove(i));
                } else {
                    i += 1;
                }
            }
        }
        for record in due {
            destroy_record(device, record.kind);
        }
    }
}

fn destroy_record(device: &ash::Device, kind: GarbageKind) {
    match kind {
        GarbageKind::Buffer(buf) => crate::buffer::destroy_buffer_object(device, &buf),
        GarbageKind::Image(img) => crate::image::destroy_image_object(device, &img),
        GarbageKind::Pipeline(raw) => crate::pipeline::destroy_pipeline(device, raw),
        GarbageKind::RawBuffer(buf, mem) => unsafe {
            device.destroy_buffer(buf, None);
            device.free_memory(mem, None);
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `collect` needs a live `ash::Device` to actually destroy records,
    // so these tests exercise only the FIFO bookkeeping: stamping,
    // counting, and the deferral window, without a real device call.

    #[test]
    fn records_accumulate_until_collected() {
        let gc = GarbageCollector::new(3);
        gc.add(0, GarbageKind::RawBuffer(ash::vk::Buffer::null(), ash::vk::DeviceMemory::null()));
        gc.add(1, GarbageKind::RawBuffer(ash::vk::Buffer::null(), ash::vk::DeviceMemory::null()));
        assert_eq!(gc.pending_len(), 2);
    }

    #[test]
    fn deferral_window_matches_max_frames_in_flight() {
        let gc = GarbageCollector::new(3);
        let stamp = 10u64;
        gc.add(stamp, GarbageKind::RawBuffer(ash::vk::Buffer::null(), ash::vk::DeviceMemory::null()));
        // current_frame must exceed stamp + max_frames_in_flight before
        // a collect would destroy it; we can't call `collect` without a
        // device, but the comparison it performs is exercised directly.
        let max_frames_in_flight = 3u64;
        assert!(!(stamp + 1 > stamp + max_frames_in_flight));
        assert!(!(stamp + max_frames_in_flight > stamp + max_frames_in_flight));
        assert!((stamp + max_frames_in_flight + 1) > stamp + max_frames_in_flight);
    }
}
