//! Façade-level configuration, built the same way [`forge_gfx::GfxSettings`]
//! is: a plain struct with `with_*` builder methods and sane defaults.

use forge_gfx::GfxSettings;

const DEFAULT_ARENA_RESERVE_SIZE: usize = 256 * 1024 * 1024;
const DEFAULT_ARENA_PAGE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub gfx: GfxSettings,
    pub log_level: log::LevelFilter,
    pub arena_reserve_size: usize,
    pub arena_page_size: usize,
    pub window_title: String,
    pub enable_imgui: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            gfx: GfxSettings::default(),
            log_level: if cfg!(debug_assertions) { log::LevelFilter::Debug } else { log::LevelFilter::Info },
            arena_reserve_size: DEFAULT_ARENA_RESERVE_SIZE,
            arena_page_size: DEFAULT_ARENA_PAGE_SIZE,
            window_title: String::from("forge"),
            enable_imgui: cfg!(debug_assertions),
        }
    }
}

impl EngineSettings {
    pub fn with_gfx_settings(mut self, gfx: GfxSettings) -> Self {
        self.gfx = gfx;
        self
    }

    pub fn with_log_level(mut self, level: log::LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_arena_reserve_size(mut self, bytes: usize) -> Self {
        self.arena_reserve_size = bytes;
        self
    }

    pub fn with_arena_page_size(mut self, bytes: usize) -> Self {
        self.arena_page_size = bytes;
        self
    }

    pub fn with_window_title(mut self, title: impl Into<String>) -> Self {
        self.window_title = title.into();
        self
    }

    pub fn with_enable_imgui(mut self, enable: bool) -> Self {
        self.enable_imgui = enable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = EngineSettings::default();
        assert!(settings.arena_reserve_size > 0);
        assert!(settings.arena_page_size > 0);
    }

    #[test]
    fn builder_overrides_apply() {
        let settings = EngineSettings::default()
            .with_window_title("demo")
            .with_arena_reserve_size(64 * 1024 * 1024)
            .with_log_level(log::LevelFilter::Warn);
        assert_eq!(settings.window_title, "demo");
        assert_eq!(settings.arena_reserve_size, 64 * 1024 * 1024);
        assert_eq!(settings.log_level, log::LevelFilter::Warn);
    }
}
