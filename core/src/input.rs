//! Platform-agnostic input types.
//!
//! The window layer translates native events into [`InputEvent`]s; scenes
//! consume them without depending on any windowing crate.

/// Physical keyboard key identifier (US QWERTY names).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum KeyCode {
    // Letters
    A,
    D,
    E,
    Q,
    S,
    W,

    // Modifiers
    ShiftLeft,
    ControlLeft,
    AltLeft,

    // Arrows
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,

    // Common keys
    Space,
    Enter,
    Escape,
    Tab,
    F1,
}

/// Mouse button identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Source of an input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Input {
    Key(KeyCode),
    MouseButton(MouseButton),
    /// Relative cursor motion along x, in pixels.
    MouseX,
    /// Relative cursor motion along y, in pixels.
    MouseY,
    /// Wheel delta in lines.
    MouseWheel,
}

/// One keyed input sample.
///
/// `data` is the analog value: 1.0/0.0 for pressed/released buttons, the
/// delta for axes. `port` identifies the device (0 for keyboard and mouse).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputEvent {
    pub repeated: bool,
    pub input: Input,
    pub port: u32,
    pub data: f32,
}

impl InputEvent {
    pub fn key(key: KeyCode, pressed: bool, repeated: bool) -> Self {
        Self {
            repeated,
            input: Input::Key(key),
            port: 0,
            data: if pressed { 1.0 } else { 0.0 },
        }
    }

    pub fn axis(input: Input, delta: f32) -> Self {
        Self {
            repeated: false,
            input,
            port: 0,
            data: delta,
        }
    }

    /// A fresh press of `key`, ignoring auto-repeat.
    pub fn is_first_press_of(&self, key: KeyCode) -> bool {
        self.input == Input::Key(key) && self.data == 1.0 && !self.repeated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_press_ignores_repeat_and_release() {
        assert!(InputEvent::key(KeyCode::Escape, true, false).is_first_press_of(KeyCode::Escape));
        assert!(!InputEvent::key(KeyCode::Escape, true, true).is_first_press_of(KeyCode::Escape));
        assert!(!InputEvent::key(KeyCode::Escape, false, false).is_first_press_of(KeyCode::Escape));
        assert!(!InputEvent::key(KeyCode::W, true, false).is_first_press_of(KeyCode::Escape));
    }
}
