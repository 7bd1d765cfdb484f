//! The application-facing façade: owns the root arena, the "Engine" and
//! "Jobs" named proxy allocators plus the registry of additional named
//! proxies a memory-stats view iterates, the graphics device, and the
//! per-frame bookkeeping `Engine.cpp`'s main loop drives (reconnect
//! retries, shortcut dispatch, boot-asset blank-clear override).
//!
//! Every method takes `&self`: like [`forge_gfx::device::Device`], all
//! mutable state lives behind interior mutability so worker threads can
//! register shortcuts, allocators or console commands without the app
//! needing a `&mut Engine`.

use crate::console::{ConsoleRegistry, VmemCommand};
use crate::error::{EngineError, EngineResult};
use crate::hooks::{AssetManager, DebugDraw, ImGuiBridge, RemoteConsole};
use crate::settings::EngineSettings;
use crate::shortcuts::{Key, Modifiers, ShortcutRegistry};
use forge_core::{Allocator, BumpArena, HeapAllocator, ProxyAllocator, ProxyStats};
use forge_gfx::types::Extent2D;
use forge_gfx::Device;
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

const RECONNECT_INTERVAL_SECONDS: f32 = 5.0;
const RECONNECT_MAX_ATTEMPTS: u32 = 3;

/// A named allocator the memory-stats view can list without knowing its
/// concrete wrapped type.
pub trait NamedAllocator: Send + Sync {
    fn name(&self) -> &str;
    fn stats(&self) -> ProxyStats;
}

impl<A: Allocator + Send + Sync> NamedAllocator for ProxyAllocator<A> {
    fn name(&self) -> &str {
        ProxyAllocator::name(self)
    }

    fn stats(&self) -> ProxyStats {
        ProxyAllocator::stats(self)
    }
}

/// One tick's worth of input the shortcut dispatcher reads. Polling the
/// platform keyboard is the app's job; the façade only consumes the
/// snapshot.
pub struct FrameInput<'a> {
    pub modifiers: Modifiers,
    pub pressed_keys: &'a [Key],
}

pub struct Engine {
    settings: EngineSettings,
    root_arena: BumpArena,
    engine_allocator: Arc<ProxyAllocator<HeapAllocator>>,
    jobs_allocator: Arc<ProxyAllocator<HeapAllocator>>,
    allocator_registry: Mutex<Vec<Arc<dyn NamedAllocator>>>,
    device: Device,
    shortcuts: Mutex<ShortcutRegistry>,
    console: ConsoleRegistry,
    assets: Option<Arc<dyn AssetManager>>,
    imgui: Option<Arc<dyn ImGuiBridge>>,
    debug_draw: Option<Arc<dyn DebugDraw>>,
    remote_console: Option<Arc<dyn RemoteConsole>>,
    update_callback: Mutex<Option<Box<dyn FnMut(f32) + Send>>>,
    boot_callbacks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    boot_resources_ready: AtomicBool,
    reconnect_timer: Mutex<f32>,
    reconnect_attempts: AtomicU32,
    last_dt: Mutex<f32>,
    frame_count: AtomicU64,
    total_time_seconds: Mutex<f64>,
}

impl Engine {
    /// Creates the root arena, boots the graphics device for `window`/
    /// `display`, and registers the built-in `vmem` console command.
    /// Collaborators out of this crate's scope (asset manager, ImGui,
    /// debug draw, remote console, the app's own update callback) are
    /// wired in afterwards via the `set_*` methods.
    pub fn initialize(
        settings: EngineSettings,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        extent: Extent2D,
    ) -> EngineResult<Self> {
        log::set_max_level(settings.log_level);

        let root_arena = BumpArena::new(settings.arena_reserve_size, settings.arena_page_size, false);
        let engine_allocator = Arc::new(ProxyAllocator::new("Engine", HeapAllocator::new()));
        let jobs_allocator = Arc::new(ProxyAllocator::new("Jobs", HeapAllocator::new()));
        let allocator_registry: Mutex<Vec<Arc<dyn NamedAllocator>>> = Mutex::new(vec![
            Arc::clone(&engine_allocator) as Arc<dyn NamedAllocator>,
            Arc::clone(&jobs_allocator) as Arc<dyn NamedAllocator>,
        ]);

        let device = Device::new(display, window, extent, settings.gfx.clone())?;

        let console = ConsoleRegistry::new();
        console.register(Box::new(VmemCommand));

        Ok(Self {
            settings,
            root_arena,
            engine_allocator,
            jobs_allocator,
            allocator_registry,
            device,
            shortcuts: Mutex::new(ShortcutRegistry::new()),
            console,
            assets: None,
            imgui: None,
            debug_draw: None,
            remote_console: None,
            update_callback: Mutex::new(None),
            boot_callbacks: Mutex::new(Vec::new()),
            boot_resources_ready: AtomicBool::new(false),
            reconnect_timer: Mutex::new(0.0),
            reconnect_attempts: AtomicU32::new(0),
            last_dt: Mutex::new(0.0),
            frame_count: AtomicU64::new(0),
            total_time_seconds: Mutex::new(0.0),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn root_arena(&self) -> &BumpArena {
        &self.root_arena
    }

    pub fn root_arena_reserve_size(&self) -> usize {
        self.settings.arena_reserve_size
    }

    pub fn engine_allocator(&self) -> &Arc<ProxyAllocator<HeapAllocator>> {
        &self.engine_allocator
    }

    pub fn jobs_allocator(&self) -> &Arc<ProxyAllocator<HeapAllocator>> {
        &self.jobs_allocator
    }

    /// Wraps `inner` in a named [`ProxyAllocator`] and adds it to the
    /// registry the memory-stats view iterates, returning the typed proxy
    /// so the caller can actually allocate through it.
    pub fn register_allocator<A: Allocator + Send + Sync + 'static>(
        &self,
        name: impl Into<String>,
        inner: A,
    ) -> Arc<ProxyAllocator<A>> {
        let proxy = Arc::new(ProxyAllocator::new(name, inner));
        self.allocator_registry.lock().push(Arc::clone(&proxy) as Arc<dyn NamedAllocator>);
        proxy
    }

    /// Snapshots every registered named allocator's bookkeeping, for a
    /// memory-stats view.
    pub fn allocator_stats(&self) -> Vec<(String, ProxyStats)> {
        self.allocator_registry
            .lock()
            .iter()
            .map(|a| (a.name().to_string(), a.stats()))
            .collect()
    }

    pub fn console(&self) -> &ConsoleRegistry {
        &self.console
    }

    pub fn set_asset_manager(&mut self, assets: Arc<dyn AssetManager>) {
        self.assets = Some(assets);
    }

    pub fn set_imgui_bridge(&mut self, imgui: Arc<dyn ImGuiBridge>) {
        self.imgui = Some(imgui);
    }

    pub fn set_debug_draw(&mut self, debug_draw: Arc<dyn DebugDraw>) {
        self.debug_draw = Some(debug_draw);
    }

    pub fn set_remote_console(&mut self, remote: Arc<dyn RemoteConsole>) {
        self.remote_console = Some(remote);
    }

    /// Installs the app's per-frame update callback. While the boot-time
    /// asset group is still loading, `begin_frame` does not call it —
    /// see [`Engine::register_initialize_resources`].
    pub fn set_update_callback(&self, callback: impl FnMut(f32) + Send + 'static) {
        *self.update_callback.lock() = Some(Box::new(callback));
    }

    /// Parses `binding` (e.g. `"Ctrl+Shift+F5"`) and registers `callback`
    /// to fire on the tick where every named key is held with exactly
    /// those modifiers. Rejects a binding already registered.
    pub fn register_shortcut(
        &self,
        binding: &str,
        callback: impl FnMut() + Send + 'static,
    ) -> EngineResult<()> {
        self.shortcuts.lock().register(binding, callback)
    }

    /// Appends `callback` to the list fired once, in registration order,
    /// the tick the boot-time asset group finishes loading. Until then,
    /// `begin_frame` draws a blank-clear frame instead of calling the
    /// app's update callback.
    pub fn register_initialize_resources(&self, callback: impl FnOnce() + Send + 'static) {
        self.boot_callbacks.lock().push(Box::new(callback));
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    pub fn total_time_seconds(&self) -> f64 {
        *self.total_time_seconds.lock()
    }

    fn tick_remote_reconnect(&self, dt: f32) {
        let Some(remote) = &self.remote_console else { return };
        if remote.is_connected() {
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.reconnect_timer.lock() = 0.0;
            return;
        }
        if self.reconnect_attempts.load(Ordering::Relaxed) >= RECONNECT_MAX_ATTEMPTS {
            return;
        }
        let mut timer = self.reconnect_timer.lock();
        *timer += dt;
        if *timer < RECONNECT_INTERVAL_SECONDS {
            return;
        }
        *timer = 0.0;
        drop(timer);
        if !remote.try_reconnect() {
            let attempts = self.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
            log::warn!("remote console reconnect attempt {attempts}/{RECONNECT_MAX_ATTEMPTS} failed");
        }
    }

    /// Frame-time accounting, the reconnect retry loop, shortcut dispatch,
    /// the ImGui/debug-draw frame wrapper, and the device's own
    /// `begin_frame`. Returns the swapchain image index the device
    /// acquired, or `None` if the swapchain is mid-recreation this frame.
    pub fn begin_frame(&self, dt: f32, input: Option<&FrameInput<'_>>) -> EngineResult<Option<u32>> {
        *self.last_dt.lock() = dt;
        *self.total_time_seconds.lock() += dt as f64;
        self.frame_count.fetch_add(1, Ordering::Relaxed);

        self.tick_remote_reconnect(dt);

        if let Some(input) = input {
            self.shortcuts.lock().dispatch(input.modifiers, input.pressed_keys);
        }

        if let Some(imgui) = &self.imgui {
            imgui.begin_frame();
        }
        if let Some(debug_draw) = &self.debug_draw {
            debug_draw.begin_frame();
        }

        let image_index = self.device.begin_frame()?;

        let assets_ready = self.assets.as_ref().map_or(true, |a| a.boot_group_finished());
        if !assets_ready {
            if image_index.is_some() {
                let cmd = self.device.cmd_begin()?;
                self.device.cmd_begin_swapchain_render_pass(cmd, [0.0, 0.0, 0.0, 1.0])?;
                self.device.cmd_end_swapchain_render_pass(cmd);
                self.device.cmd_end()?;
            }
            return Ok(image_index);
        }

        if !self.boot_resources_ready.swap(true, Ordering::AcqRel) {
            for callback in std::mem::take(&mut *self.boot_callbacks.lock()) {
                callback();
            }
        }

        if let Some(assets) = &self.assets {
            assets.update(dt);
        }
        if let Some(update) = self.update_callback.lock().as_mut() {
            update(dt);
        }

        Ok(image_index)
    }

    /// Submits the frame's recorded work, wraps the ImGui frame, and
    /// resets this frame's transient-allocator scratch space.
    pub fn end_frame(&self) -> EngineResult<()> {
        if let Some(imgui) = &self.imgui {
            imgui.end_frame();
        }
        self.device.end_frame()?;
        forge_core::transient::reset(*self.last_dt.lock());
        Ok(())
    }
}
