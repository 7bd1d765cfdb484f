//! Device configuration, built the way `wgpu-hal`'s
//! `InstanceDescriptor`/`DeviceDescriptor` are: a plain struct with
//! `with_*` builder methods and sane defaults, constructed once at
//! startup and passed by value into [`crate::device::Device::new`].

pub const DEFAULT_MAX_FRAMES_IN_FLIGHT: u32 = 3;

#[derive(Debug, Clone)]
pub struct GfxSettings {
    pub validation: bool,
    pub vsync: bool,
    pub srgb_surface: bool,
    pub job_thread_count: u32,
    pub max_frames_in_flight: u32,
    /// Force `TRANSFER_DST` on every device buffer even when the memory
    /// is not host-visible. The v1/v2 device layers in the source engine
    /// disagreed on this for integrated GPUs (see `DESIGN.md`); this
    /// workspace defaults to the v2 (newer) policy of leaving it off and
    /// exposes the setting so a platform profile can opt back in.
    pub force_transfer_dst_on_integrated_gpu: bool,
    pub capture_pipeline_executable_statistics: bool,
    pub enable_descriptor_indexing: bool,
    pub enable_calibrated_timestamps: bool,
}

impl Default for GfxSettings {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            vsync: true,
            srgb_surface: true,
            job_thread_count: 4,
            max_frames_in_flight: DEFAULT_MAX_FRAMES_IN_FLIGHT,
            force_transfer_dst_on_integrated_gpu: false,
            capture_pipeline_executable_statistics: false,
            enable_descriptor_indexing: true,
            enable_calibrated_timestamps: true,
        }
    }
}

impl GfxSettings {
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_srgb_surface(mut self, srgb: bool) -> Self {
        self.srgb_surface = srgb;
        self
    }

    pub fn with_job_thread_count(mut self, count: u32) -> Self {
        self.job_thread_count = count;
        self
    }

    pub fn with_max_frames_in_flight(mut self, count: u32) -> Self {
        assert!((2..=4).contains(&count), "MAX_FRAMES_IN_FLIGHT must be 2..=4");
        self.max_frames_in_flight = count;
        self
    }
}
