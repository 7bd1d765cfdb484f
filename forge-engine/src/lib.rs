//! The application-facing façade built on top of [`forge_gfx`]: the root
//! arena, the named proxy-allocator registry, the frame lifecycle
//! (reconnect retries, shortcut dispatch, boot-asset blank-clear
//! override) and the console command table — the way `wgpu` sits on top
//! of `wgpu-core`/`wgpu-hal` in the workspace this one is modeled on.
//!
//! Collaborators the original engine wires in here but that are out of
//! this crate's scope — the asset loader, ImGui, the debug-draw overlay,
//! the remote console client, the window event loop — are exposed only
//! as the trait seams in [`hooks`]; a real application implements them
//! and hands them to [`Engine`] through its `set_*` methods.

pub mod console;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod settings;
pub mod shortcuts;

pub use console::{ConsoleCommand, ConsoleRegistry, VmemCommand};
pub use engine::{Engine, FrameInput, NamedAllocator};
pub use error::{EngineError, EngineResult, ShortcutParseError};
pub use hooks::{AssetManager, DebugDraw, ImGuiBridge, RemoteConsole};
pub use settings::EngineSettings;
pub use shortcuts::{parse_shortcut, Key, Modifiers, ShortcutRegistry};
