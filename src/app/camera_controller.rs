use winit::keyboard::KeyCode;

use crate::app::input_state::InputState;
use crate::renderer::camera::Camera;

/// Per-frame input policy: WASD flies the camera, Space and left Ctrl change
/// altitude, dragging the left mouse button looks around, and the arrow keys
/// steer the sun.
pub struct CameraController {
    move_speed: f32,
    /// Radians of camera rotation per pixel of mouse travel.
    look_sensitivity: f32,
    sun_speed: f32,
}

impl Default for CameraController {
    fn default() -> Self {
        Self {
            move_speed: 25.0,
            look_sensitivity: 0.002,
            sun_speed: 2.5,
        }
    }
}

impl CameraController {
    /// Applies one frame of input to the camera and returns the sun steering
    /// deltas as `(delta_theta, delta_phi)` for the scene to consume.
    pub fn process_input(
        &self,
        input_state: &InputState,
        delta_time: f32,
        camera: &mut Camera,
    ) -> (f32, f32) {
        let distance = self.move_speed * delta_time;
        if input_state.is_held(KeyCode::KeyW) {
            camera.walk(distance);
        }
        if input_state.is_held(KeyCode::KeyS) {
            camera.walk(-distance);
        }
        if input_state.is_held(KeyCode::KeyD) {
            camera.strafe(distance);
        }
        if input_state.is_held(KeyCode::KeyA) {
            camera.strafe(-distance);
        }
        if input_state.is_held(KeyCode::Space) {
            camera.rise(distance);
        }
        if input_state.is_held(KeyCode::ControlLeft) {
            camera.rise(-distance);
        }

        if input_state.is_look_dragging() {
            let (dx, dy) = input_state.mouse_delta();
            // Dragging right turns right; dragging down pitches down.
            camera.rotate(dx * self.look_sensitivity, -dy * self.look_sensitivity);
        }

        let step = self.sun_speed * delta_time;
        let mut delta_theta = 0.0;
        let mut delta_phi = 0.0;
        if input_state.is_held(KeyCode::ArrowLeft) {
            delta_theta -= step;
        }
        if input_state.is_held(KeyCode::ArrowRight) {
            delta_theta += step;
        }
        if input_state.is_held(KeyCode::ArrowUp) {
            delta_phi -= step;
        }
        if input_state.is_held(KeyCode::ArrowDown) {
            delta_phi += step;
        }
        (delta_theta, delta_phi)
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use winit::dpi::PhysicalPosition;
    use winit::event::ElementState;

    use super::*;

    #[test]
    fn forward_key_flies_along_the_view_direction() {
        let controller = CameraController::default();
        let mut input = InputState::default();
        let mut camera = Camera::new(Vec3::ZERO, 0.0, 0.0);

        input.on_key(KeyCode::KeyW, ElementState::Pressed);
        let sun = controller.process_input(&input, 0.1, &mut camera);

        // Yaw 0 faces +X; 25 units/s for a tenth of a second.
        assert!((camera.get_position() - Vec3::X * 2.5).length() < 1e-5);
        assert_eq!(sun, (0.0, 0.0));
    }

    #[test]
    fn opposing_keys_cancel() {
        let controller = CameraController::default();
        let mut input = InputState::default();
        let mut camera = Camera::new(Vec3::ZERO, 0.0, 0.0);

        input.on_key(KeyCode::KeyW, ElementState::Pressed);
        input.on_key(KeyCode::KeyS, ElementState::Pressed);
        controller.process_input(&input, 0.1, &mut camera);

        assert!(camera.get_position().length() < 1e-6);
    }

    #[test]
    fn look_requires_the_drag_button() {
        let controller = CameraController::default();
        let mut input = InputState::default();
        let mut camera = Camera::new(Vec3::ZERO, 0.0, 0.0);

        input.on_cursor_moved(PhysicalPosition::new(100.0, 100.0));
        input.on_cursor_moved(PhysicalPosition::new(150.0, 120.0));
        controller.process_input(&input, 0.016, &mut camera);
        assert!((camera.get_forward() - Vec3::X).length() < 1e-6);

        input.on_left_button(true);
        controller.process_input(&input, 0.016, &mut camera);

        // 50 px right at 0.002 rad/px turns 0.1 rad; 20 px down pitches
        // -0.04 rad.
        assert!((camera.get_pitch() + 0.04).abs() < 1e-6);
        assert!(camera.get_forward().z > 0.0);
    }

    #[test]
    fn arrows_steer_the_sun() {
        let controller = CameraController::default();
        let mut input = InputState::default();
        let mut camera = Camera::new(Vec3::ZERO, 0.0, 0.0);

        input.on_key(KeyCode::ArrowRight, ElementState::Pressed);
        input.on_key(KeyCode::ArrowUp, ElementState::Pressed);
        let (delta_theta, delta_phi) = controller.process_input(&input, 0.2, &mut camera);

        assert!((delta_theta - 0.5).abs() < 1e-6);
        assert!((delta_phi + 0.5).abs() < 1e-6);
    }
}
