use std::f32::consts::FRAC_PI_2;

use glam::{Mat4, Vec3};

use crate::renderer::util;

/// First-person fly camera. Orientation is yaw/pitch only, so the horizon
/// stays level.
pub struct Camera {
    position: Vec3,
    yaw: f32,
    pitch: f32,
    world_up: Vec3,
    fov_y: f32,
    aspect: f32,
    near: f32,
    far: f32,
    proj: Mat4,
}

impl Camera {
    /// Keep the pitch just short of straight up/down so the forward vector
    /// never becomes parallel to the world up vector.
    const PITCH_LIMIT: f32 = FRAC_PI_2 - 0.001;

    pub fn new(position: Vec3, yaw: f32, pitch: f32) -> Self {
        let mut camera = Self {
            position,
            yaw,
            pitch: pitch.clamp(-Self::PITCH_LIMIT, Self::PITCH_LIMIT),
            world_up: Vec3::Y,
            fov_y: 0.25 * std::f32::consts::PI,
            aspect: 1.0,
            near: 1.0,
            far: 1000.0,
            proj: Mat4::IDENTITY,
        };
        camera.update_proj();
        camera
    }

    pub fn set_lens(&mut self, fov_y: f32, aspect: f32, near: f32, far: f32) {
        self.fov_y = fov_y;
        self.aspect = aspect;
        self.near = near;
        self.far = far;
        self.update_proj();
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
        self.update_proj();
    }

    fn update_proj(&mut self) {
        // Right-handed, depth 0..1. The shader build negates clip-space Y for
        // the presentation surface, so the projection itself stays Y-up.
        self.proj = Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
    }

    /// Moves along the view direction.
    pub fn walk(&mut self, distance: f32) {
        self.position += self.get_forward() * distance;
    }

    /// Moves along the camera's right axis.
    pub fn strafe(&mut self, distance: f32) {
        self.position += self.get_right() * distance;
    }

    /// Moves along the world up axis.
    pub fn rise(&mut self, distance: f32) {
        self.position += self.world_up * distance;
    }

    pub fn rotate(&mut self, delta_yaw: f32, delta_pitch: f32) {
        self.yaw += delta_yaw;
        self.pitch = (self.pitch + delta_pitch).clamp(-Self::PITCH_LIMIT, Self::PITCH_LIMIT);
    }

    pub fn get_view_mat(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.get_forward(), self.world_up)
    }

    pub fn get_proj_mat(&self) -> Mat4 {
        self.proj
    }

    pub fn get_viewproj_mat(&self) -> Mat4 {
        self.proj * self.get_view_mat()
    }

    pub fn get_forward(&self) -> Vec3 {
        util::calculate_direction(self.pitch, self.yaw)
    }

    pub fn get_right(&self) -> Vec3 {
        self.get_forward().cross(self.world_up).normalize()
    }

    pub fn get_position(&self) -> Vec3 {
        self.position
    }

    pub fn get_pitch(&self) -> f32 {
        self.pitch
    }

    pub fn get_aspect(&self) -> f32 {
        self.aspect
    }

    pub fn get_near(&self) -> f32 {
        self.near
    }

    pub fn get_far(&self) -> f32 {
        self.far
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_aspect_rebuilds_projection() {
        let mut camera = Camera::new(Vec3::ZERO, 0.0, 0.0);
        camera.set_aspect(1024.0 / 768.0);
        assert!((camera.get_aspect() - 1024.0 / 768.0).abs() < 1e-6);

        // perspective_rh: m00 = 1 / (aspect * tan(fov/2)), |m11| = 1 / tan(fov/2).
        let proj = camera.get_proj_mat();
        let derived_aspect = proj.y_axis.y.abs() / proj.x_axis.x;
        assert!((derived_aspect - camera.get_aspect()).abs() < 1e-4);
    }

    #[test]
    fn projection_leaves_the_y_flip_to_the_shaders() {
        let camera = Camera::new(Vec3::ZERO, 0.0, 0.0);
        assert!(camera.get_proj_mat().y_axis.y > 0.0);
    }

    #[test]
    fn pitch_stays_clamped() {
        let mut camera = Camera::new(Vec3::ZERO, 0.0, 0.0);
        camera.rotate(0.0, 10.0);
        assert!(camera.get_pitch() < FRAC_PI_2);
        camera.rotate(0.0, -20.0);
        assert!(camera.get_pitch() > -FRAC_PI_2);
        // Forward must never degenerate at the clamp.
        assert!(camera.get_forward().cross(Vec3::Y).length() > 0.0);
    }

    #[test]
    fn walk_moves_along_forward() {
        let mut camera = Camera::new(Vec3::ZERO, 0.3, -0.2);
        let forward = camera.get_forward();
        camera.walk(2.5);
        assert!((camera.get_position() - forward * 2.5).length() < 1e-5);
    }

    #[test]
    fn strafe_is_horizontal() {
        let mut camera = Camera::new(Vec3::ZERO, 0.7, -0.4);
        camera.strafe(3.0);
        assert!(camera.get_position().y.abs() < 1e-6);
        camera.rise(1.5);
        assert!((camera.get_position().y - 1.5).abs() < 1e-6);
    }
}
