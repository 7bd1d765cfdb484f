//! Shortcut-key registration and dispatch, grounded in `Engine.cpp`'s
//! binding table: a string like `"Ctrl+Shift+F5"` parses into a modifier
//! mask plus up to two non-modifier keys, and the whole chord must be
//! held for the bound callback to fire.

use crate::error::ShortcutParseError;
use arrayvec::ArrayVec;
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Modifiers: u8 {
        const CTRL  = 0b0001;
        const SHIFT = 0b0010;
        const ALT   = 0b0100;
        const SUPER = 0b1000;
    }
}

/// A single non-modifier key named in a shortcut binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    A, B, C, D, E, F, G, H, I, J, K, L, M,
    N, O, P, Q, R, S, T, U, V, W, X, Y, Z,
    Num0, Num1, Num2, Num3, Num4, Num5, Num6, Num7, Num8, Num9,
    F1, F2, F3, F4, F5, F6, F7, F8, F9, F10, F11, F12,
    F13, F14, F15, F16, F17, F18, F19, F20, F21, F22, F23, F24,
    Enter, Escape, Space, Tab, Backspace, Delete,
    Up, Down, Left, Right,
}

impl std::str::FromStr for Key {
    type Err = ShortcutParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use Key::*;
        Ok(match s {
            "A" => A, "B" => B, "C" => C, "D" => D, "E" => E, "F" => F, "G" => G,
            "H" => H, "I" => I, "J" => J, "K" => K, "L" => L, "M" => M, "N" => N,
            "O" => O, "P" => P, "Q" => Q, "R" => R, "S" => S, "T" => T, "U" => U,
            "V" => V, "W" => W, "X" => X, "Y" => Y, "Z" => Z,
            "0" => Num0, "1" => Num1, "2" => Num2, "3" => Num3, "4" => Num4,
            "5" => Num5, "6" => Num6, "7" => Num7, "8" => Num8, "9" => Num9,
            "F1" => F1, "F2" => F2, "F3" => F3, "F4" => F4, "F5" => F5, "F6" => F6,
            "F7" => F7, "F8" => F8, "F9" => F9, "F10" => F10, "F11" => F11, "F12" => F12,
            "F13" => F13, "F14" => F14, "F15" => F15, "F16" => F16, "F17" => F17, "F18" => F18,
            "F19" => F19, "F20" => F20, "F21" => F21, "F22" => F22, "F23" => F23, "F24" => F24,
            "Enter" => Enter, "Escape" | "Esc" => Escape, "Space" => Space, "Tab" => Tab,
            "Backspace" => Backspace, "Delete" | "Del" => Delete,
            "Up" => Up, "Down" => Down, "Left" => Left, "Right" => Right,
            other => return Err(ShortcutParseError::UnknownKey(other.to_string())),
        })
    }
}

/// Parses a binding string such as `"Ctrl+Shift+F5"` into a modifier mask
/// and up to two ordinary keys.
pub fn parse_shortcut(spec: &str) -> Result<(Modifiers, ArrayVec<Key, 2>), ShortcutParseError> {
    let mut modifiers = Modifiers::empty();
    let mut keys = ArrayVec::new();

    let tokens: Vec<&str> = spec.split('+').map(str::trim).filter(|t| !t.is_empty()).collect();
    if tokens.is_empty() {
        return Err(ShortcutParseError::Empty);
    }

    for token in tokens {
        match token {
            "Ctrl" | "Control" => modifiers |= Modifiers::CTRL,
            "Shift" => modifiers |= Modifiers::SHIFT,
            "Alt" => modifiers |= Modifiers::ALT,
            "Super" | "Cmd" | "Win" => modifiers |= Modifiers::SUPER,
            other => {
                if keys.is_full() {
                    return Err(ShortcutParseError::TooManyKeys);
                }
                keys.push(other.parse::<Key>()?);
            }
        }
    }

    if keys.is_empty() {
        return Err(ShortcutParseError::Empty);
    }

    Ok((modifiers, keys))
}

struct ShortcutEntry {
    modifiers: Modifiers,
    keys: ArrayVec<Key, 2>,
    callback: Box<dyn FnMut() + Send>,
}

/// Holds every bound shortcut and dispatches against a per-frame snapshot
/// of the currently held modifiers and keys.
#[derive(Default)]
pub struct ShortcutRegistry {
    entries: Vec<ShortcutEntry>,
}

impl ShortcutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `binding` and registers `callback` to fire while every key it
    /// names is held. Rejects a binding identical to one already registered.
    pub fn register(
        &mut self,
        binding: &str,
        callback: impl FnMut() + Send + 'static,
    ) -> Result<(), crate::error::EngineError> {
        let (modifiers, keys) = parse_shortcut(binding)?;
        if self.entries.iter().any(|e| e.modifiers == modifiers && e.keys == keys) {
            return Err(crate::error::EngineError::DuplicateShortcut(binding.to_string()));
        }
        self.entries.push(ShortcutEntry { modifiers, keys, callback: Box::new(callback) });
        Ok(())
    }

    /// Fires every binding whose modifiers exactly match `modifiers` and
    /// whose keys are all present in `pressed`.
    pub fn dispatch(&mut self, modifiers: Modifiers, pressed: &[Key]) {
        for entry in &mut self.entries {
            if entry.modifiers == modifiers && entry.keys.iter().all(|k| pressed.contains(k)) {
                (entry.callback)();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modifiers_and_key() {
        let (modifiers, keys) = parse_shortcut("Ctrl+Shift+F5").unwrap();
        assert_eq!(modifiers, Modifiers::CTRL | Modifiers::SHIFT);
        assert_eq!(keys.as_slice(), &[Key::F5]);
    }

    #[test]
    fn rejects_three_keys() {
        let err = parse_shortcut("Ctrl+A+B+C").unwrap_err();
        assert_eq!(err, ShortcutParseError::TooManyKeys);
    }

    #[test]
    fn rejects_unknown_key() {
        let err = parse_shortcut("Ctrl+Nonsense").unwrap_err();
        assert!(matches!(err, ShortcutParseError::UnknownKey(_)));
    }

    #[test]
    fn duplicate_binding_is_rejected() {
        let mut registry = ShortcutRegistry::new();
        registry.register("Ctrl+S", || {}).unwrap();
        let err = registry.register("Ctrl+S", || {}).unwrap_err();
        assert!(matches!(err, crate::error::EngineError::DuplicateShortcut(_)));
    }

    #[test]
    fn dispatch_fires_matching_binding() {
        let mut registry = ShortcutRegistry::new();
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired2 = fired.clone();
        registry.register("Ctrl+S", move || fired2.store(true, std::sync::atomic::Ordering::SeqCst)).unwrap();
        registry.dispatch(Modifiers::CTRL, &[Key::S]);
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }
}
