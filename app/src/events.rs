//! Window and input events delivered to scenes.

use std::collections::VecDeque;

use lumen_core::input::InputEvent;

/// Window lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    Closed,
    Destroyed,
    Moved { x: i32, y: i32 },
    FullscreenEntered,
    FullscreenExited,
    FocusLost,
    FocusReceived,
    Maximized,
    Minimized,
    Resized { width: u32, height: u32 },
    /// Left the maximized or minimized state.
    Restored,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppEvent {
    Input(InputEvent),
    Window(WindowEvent),
}

impl From<InputEvent> for AppEvent {
    fn from(event: InputEvent) -> Self {
        Self::Input(event)
    }
}

impl From<WindowEvent> for AppEvent {
    fn from(event: WindowEvent) -> Self {
        Self::Window(event)
    }
}

/// FIFO of events collected between two frames.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<AppEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: impl Into<AppEvent>) {
        self.events.push_back(event.into());
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Take every queued event in arrival order.
    pub fn drain(&mut self) -> Vec<AppEvent> {
        self.events.drain(..).collect()
    }
}

/// Derives state-change events from polled window state.
///
/// winit reports maximize, minimize and fullscreen only as properties of the
/// window, so the shell samples them after every resize.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WindowStateTracker {
    maximized: bool,
    minimized: bool,
    fullscreen: bool,
}

impl WindowStateTracker {
    pub fn observe(
        &mut self,
        maximized: bool,
        minimized: bool,
        fullscreen: bool,
    ) -> Vec<WindowEvent> {
        let mut events = Vec::new();
        if fullscreen != self.fullscreen {
            events.push(if fullscreen {
                WindowEvent::FullscreenEntered
            } else {
                WindowEvent::FullscreenExited
            });
        }

        let was_resting = !self.maximized && !self.minimized;
        if minimized && !self.minimized {
            events.push(WindowEvent::Minimized);
        } else if maximized && !self.maximized && !minimized {
            events.push(WindowEvent::Maximized);
        } else if !maximized && !minimized && !was_resting {
            events.push(WindowEvent::Restored);
        }

        *self = Self {
            maximized,
            minimized,
            fullscreen,
        };
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::input::KeyCode;

    #[test]
    fn test_queue_preserves_order() {
        let mut queue = EventQueue::new();
        queue.push(WindowEvent::FocusReceived);
        queue.push(InputEvent::key(KeyCode::W, true, false));
        queue.push(WindowEvent::Resized {
            width: 800,
            height: 600,
        });
        assert_eq!(queue.len(), 3);

        let events = queue.drain();
        assert_eq!(events[0], AppEvent::Window(WindowEvent::FocusReceived));
        assert!(matches!(events[1], AppEvent::Input(_)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_state_tracker_transitions() {
        let mut tracker = WindowStateTracker::default();
        assert!(tracker.observe(false, false, false).is_empty());
        assert_eq!(tracker.observe(true, false, false), vec![WindowEvent::Maximized]);
        assert!(tracker.observe(true, false, false).is_empty());
        assert_eq!(tracker.observe(true, true, false), vec![WindowEvent::Minimized]);
        assert_eq!(tracker.observe(false, false, false), vec![WindowEvent::Restored]);
        assert_eq!(
            tracker.observe(false, false, true),
            vec![WindowEvent::FullscreenEntered]
        );
        assert_eq!(
            tracker.observe(false, false, false),
            vec![WindowEvent::FullscreenExited]
        );
    }
}
