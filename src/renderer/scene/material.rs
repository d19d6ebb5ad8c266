use glam::{Vec3, Vec4};

use crate::renderer::shader_data::MaterialData;

/// Surface parameters for the lighting model. Edits are tracked per frame
/// slot so every in-flight copy of the material buffer catches up.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub diffuse_albedo: Vec4,
    pub fresnel_r0: Vec3,
    pub roughness: f32,
    dirty_frames: u32,
}

impl Material {
    pub fn new(
        name: impl Into<String>,
        diffuse_albedo: Vec4,
        fresnel_r0: Vec3,
        roughness: f32,
        frames_in_flight: u32,
    ) -> Self {
        Self {
            name: name.into(),
            diffuse_albedo,
            fresnel_r0,
            roughness,
            dirty_frames: frames_in_flight,
        }
    }

    /// Call after mutating the surface parameters.
    pub fn mark_dirty(&mut self, frames_in_flight: u32) {
        self.dirty_frames = frames_in_flight;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_frames > 0
    }

    pub(crate) fn consume_dirty_frame(&mut self) {
        self.dirty_frames = self.dirty_frames.saturating_sub(1);
    }

    pub fn gpu_data(&self) -> MaterialData {
        MaterialData {
            diffuse_albedo: self.diffuse_albedo,
            fresnel_r0: self.fresnel_r0,
            roughness: self.roughness,
        }
    }
}
