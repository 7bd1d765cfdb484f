//! Interfaces the façade calls into but does not implement: the asset
//! loader, the ImGui bridge, the debug-draw overlay and the remote
//! console client. Each lives entirely outside this crate's scope; the
//! façade only needs a stable seam to drive them from `begin_frame`/
//! `end_frame`.

/// Drives per-frame asset streaming and reports whether the boot-time
/// asset group has finished loading.
pub trait AssetManager: Send + Sync {
    fn update(&self, dt: f32);
    fn boot_group_finished(&self) -> bool;
}

/// Wraps the ImGui per-frame begin/end pair.
pub trait ImGuiBridge: Send + Sync {
    fn begin_frame(&self);
    fn end_frame(&self);
}

/// Wraps whatever per-frame setup the debug-draw overlay needs before the
/// app records its own draw calls.
pub trait DebugDraw: Send + Sync {
    fn begin_frame(&self);
}

/// The remote console client `end_frame`'s reconnect loop drives. Real
/// implementations own the socket; this crate only calls `is_connected`
/// and `try_reconnect` on the retry schedule.
pub trait RemoteConsole: Send + Sync {
    fn is_connected(&self) -> bool;
    fn try_reconnect(&self) -> bool;
}
