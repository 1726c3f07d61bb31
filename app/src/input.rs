//! Input conversion utilities.
//!
//! Maps winit keyboard, mouse and wheel events to engine-agnostic
//! [`lumen_core::input::InputEvent`] values.

use lumen_core::input::{Input, InputEvent, KeyCode, MouseButton};
use winit::event::{ElementState, MouseScrollDelta};
use winit::keyboard;

/// Pixels of smooth scrolling that count as one wheel line.
const PIXELS_PER_LINE: f64 = 40.0;

/// Convert a winit [`keyboard::KeyCode`] to an engine [`KeyCode`], if a
/// mapping exists.
pub fn map_winit_key(key: keyboard::KeyCode) -> Option<KeyCode> {
    Some(match key {
        keyboard::KeyCode::KeyA => KeyCode::A,
        keyboard::KeyCode::KeyD => KeyCode::D,
        keyboard::KeyCode::KeyE => KeyCode::E,
        keyboard::KeyCode::KeyQ => KeyCode::Q,
        keyboard::KeyCode::KeyS => KeyCode::S,
        keyboard::KeyCode::KeyW => KeyCode::W,

        keyboard::KeyCode::ShiftLeft => KeyCode::ShiftLeft,
        keyboard::KeyCode::ControlLeft => KeyCode::ControlLeft,
        keyboard::KeyCode::AltLeft => KeyCode::AltLeft,

        keyboard::KeyCode::ArrowUp => KeyCode::ArrowUp,
        keyboard::KeyCode::ArrowDown => KeyCode::ArrowDown,
        keyboard::KeyCode::ArrowLeft => KeyCode::ArrowLeft,
        keyboard::KeyCode::ArrowRight => KeyCode::ArrowRight,

        keyboard::KeyCode::Space => KeyCode::Space,
        keyboard::KeyCode::Enter => KeyCode::Enter,
        keyboard::KeyCode::Escape => KeyCode::Escape,
        keyboard::KeyCode::Tab => KeyCode::Tab,
        keyboard::KeyCode::F1 => KeyCode::F1,

        _ => return None,
    })
}

pub fn map_winit_button(button: winit::event::MouseButton) -> Option<MouseButton> {
    match button {
        winit::event::MouseButton::Left => Some(MouseButton::Left),
        winit::event::MouseButton::Right => Some(MouseButton::Right),
        winit::event::MouseButton::Middle => Some(MouseButton::Middle),
        _ => None,
    }
}

/// Event for a physical key change, or `None` for unmapped keys.
pub fn key_event(
    key: keyboard::PhysicalKey,
    state: ElementState,
    repeat: bool,
) -> Option<InputEvent> {
    let keyboard::PhysicalKey::Code(code) = key else {
        return None;
    };
    let key = map_winit_key(code)?;
    Some(InputEvent::key(key, state == ElementState::Pressed, repeat))
}

pub fn button_event(button: winit::event::MouseButton, state: ElementState) -> Option<InputEvent> {
    let button = map_winit_button(button)?;
    Some(InputEvent {
        repeated: false,
        input: Input::MouseButton(button),
        port: 0,
        data: if state == ElementState::Pressed { 1.0 } else { 0.0 },
    })
}

/// Wheel delta in lines.
pub fn wheel_event(delta: MouseScrollDelta) -> InputEvent {
    let lines = match delta {
        MouseScrollDelta::LineDelta(_, y) => y,
        MouseScrollDelta::PixelDelta(pos) => (pos.y / PIXELS_PER_LINE) as f32,
    };
    InputEvent::axis(Input::MouseWheel, lines)
}

/// Turns absolute cursor positions into relative motion events.
#[derive(Debug, Default, Clone, Copy)]
pub struct CursorTracker {
    last: Option<(f64, f64)>,
}

impl CursorTracker {
    /// Motion since the previous position; the first sample yields nothing.
    pub fn moved(&mut self, x: f64, y: f64) -> Vec<InputEvent> {
        let Some((last_x, last_y)) = self.last.replace((x, y)) else {
            return Vec::new();
        };
        let mut events = Vec::with_capacity(2);
        if x != last_x {
            events.push(InputEvent::axis(Input::MouseX, (x - last_x) as f32));
        }
        if y != last_y {
            events.push(InputEvent::axis(Input::MouseY, (y - last_y) as f32));
        }
        events
    }

    /// Forget the last position, e.g. when the cursor leaves the window.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_maps_with_repeat_flag() {
        let event = key_event(
            keyboard::PhysicalKey::Code(keyboard::KeyCode::Escape),
            ElementState::Pressed,
            true,
        )
        .unwrap();
        assert_eq!(event.input, Input::Key(KeyCode::Escape));
        assert!(event.repeated);
        assert!(!event.is_first_press_of(KeyCode::Escape));
    }

    #[test]
    fn test_unmapped_key() {
        assert!(map_winit_key(keyboard::KeyCode::KeyZ).is_none());
    }

    #[test]
    fn test_cursor_tracker_emits_deltas() {
        let mut tracker = CursorTracker::default();
        assert!(tracker.moved(10.0, 10.0).is_empty());

        let events = tracker.moved(13.0, 8.0);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], InputEvent::axis(Input::MouseX, 3.0));
        assert_eq!(events[1], InputEvent::axis(Input::MouseY, -2.0));

        assert_eq!(tracker.moved(13.0, 9.0), vec![InputEvent::axis(Input::MouseY, 1.0)]);

        tracker.reset();
        assert!(tracker.moved(0.0, 0.0).is_empty());
    }

    #[test]
    fn test_wheel_pixels_to_lines() {
        let event = wheel_event(MouseScrollDelta::PixelDelta(winit::dpi::PhysicalPosition::new(
            0.0, 80.0,
        )));
        assert_eq!(event.data, 2.0);
    }
}
