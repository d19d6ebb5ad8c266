use color_eyre::Result;
use color_eyre::eyre::eyre;

/// Contains configuration options for the renderer like frame-queue depth,
/// vsync, and the camera lens.
#[derive(Clone)]
pub struct RenderConfig {
    /// Number of frame-resource slots the CPU may run ahead of the GPU.
    pub frames_in_flight: usize,
    pub vsync: bool,
    pub clear_color: [f32; 4],
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl RenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight < 2 {
            return Err(eyre!(
                "frames_in_flight must be at least 2, got {}",
                self.frames_in_flight
            ));
        }
        if self.near <= 0.0 || self.far <= self.near {
            return Err(eyre!(
                "invalid depth range: near {} far {}",
                self.near,
                self.far
            ));
        }
        Ok(())
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            vsync: true,
            // Steel blue.
            clear_color: [0.274, 0.510, 0.706, 1.0],
            fov_y: 0.25 * std::f32::consts::PI,
            near: 1.0,
            far: 1000.0,
        }
    }
}
