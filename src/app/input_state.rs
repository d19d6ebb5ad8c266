use std::collections::HashSet;

use winit::dpi::PhysicalPosition;
use winit::event::{ElementState, MouseButton, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Keyboard and mouse state accumulated from window events and drained once
/// per frame.
///
/// Held keys are polled by the camera controller; the mouse delta
/// accumulates between `reset_frame` calls so look input survives any ratio
/// of events to frames.
#[derive(Default)]
pub struct InputState {
    held: HashSet<KeyCode>,
    look_dragging: bool,
    cursor: Option<PhysicalPosition<f64>>,
    mouse_delta: (f32, f32),
}

impl InputState {
    pub fn process_window_events(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    self.on_key(code, event.state);
                }
            }
            WindowEvent::MouseInput {
                button: MouseButton::Left,
                state,
                ..
            } => {
                self.on_left_button(*state == ElementState::Pressed);
            }
            WindowEvent::CursorMoved { position, .. } => self.on_cursor_moved(*position),
            WindowEvent::CursorLeft { .. } => self.cursor = None,
            // Key releases never arrive once focus is gone; drop everything.
            WindowEvent::Focused(false) => self.clear(),
            _ => {}
        }
    }

    pub(crate) fn on_key(&mut self, code: KeyCode, state: ElementState) {
        match state {
            ElementState::Pressed => {
                self.held.insert(code);
            }
            ElementState::Released => {
                self.held.remove(&code);
            }
        }
    }

    pub(crate) fn on_left_button(&mut self, pressed: bool) {
        self.look_dragging = pressed;
    }

    pub(crate) fn on_cursor_moved(&mut self, position: PhysicalPosition<f64>) {
        if let Some(prev) = self.cursor {
            self.mouse_delta.0 += (position.x - prev.x) as f32;
            self.mouse_delta.1 += (position.y - prev.y) as f32;
        }
        self.cursor = Some(position);
    }

    pub fn is_held(&self, code: KeyCode) -> bool {
        self.held.contains(&code)
    }

    pub fn is_look_dragging(&self) -> bool {
        self.look_dragging
    }

    /// Cursor travel in pixels since the last `reset_frame`.
    pub fn mouse_delta(&self) -> (f32, f32) {
        self.mouse_delta
    }

    /// Resets the per-frame accumulators. Held state persists.
    pub fn reset_frame(&mut self) {
        self.mouse_delta = (0.0, 0.0);
    }

    fn clear(&mut self) {
        self.held.clear();
        self.look_dragging = false;
        self.cursor = None;
        self.mouse_delta = (0.0, 0.0);
    }
}
