//! Error types for the façade's own fallible boundaries. Device creation
//! and frame errors propagate straight from [`forge_gfx::GfxError`]; the
//! shortcut parser gets its own small enum since a malformed binding
//! string is a caller mistake, not a device-level failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Gfx(#[from] forge_gfx::GfxError),
    #[error("shortcut binding {0:?} is already registered")]
    DuplicateShortcut(String),
    #[error(transparent)]
    Shortcut(#[from] ShortcutParseError),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShortcutParseError {
    #[error("shortcut binding is empty")]
    Empty,
    #[error("unrecognized key name {0:?}")]
    UnknownKey(String),
    #[error("shortcut binding names more than two non-modifier keys")]
    TooManyKeys,
}
