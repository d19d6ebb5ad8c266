use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec4, Vec2, Vec3, Vec4};

/// Largest light array the pass constants carry; the live counts travel in
/// `PassData::light_counts`.
pub const MAX_LIGHTS: usize = 16;

/// One light source. Field order matters: it packs into exactly three
/// std140 vec4 slots, shared between directional and spot lights.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct LightData {
    pub strength: Vec3,
    pub falloff_start: f32,
    pub direction: Vec3,
    pub falloff_end: f32,
    pub position: Vec3,
    pub spot_power: f32,
}

/// Data unique to each render item, one 256-byte-strided element per item in
/// every frame slot's object buffer.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct ObjectData {
    pub world: Mat4,
}

/// Data unique to each material, one 256-byte-strided element per material in
/// every frame slot's material buffer.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct MaterialData {
    pub diffuse_albedo: Vec4,
    pub fresnel_r0: Vec3,
    pub roughness: f32,
}

/// Data shared by the whole pass, rewritten every frame. Mirrors the
/// `PerPass` uniform block in `shaders/scene.vert` / `scene.frag` byte for
/// byte (std140).
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct PassData {
    pub view: Mat4,
    pub inv_view: Mat4,
    pub proj: Mat4,
    pub inv_proj: Mat4,
    pub view_proj: Mat4,
    pub inv_view_proj: Mat4,
    pub eye_pos: Vec3,
    pub _pad0: f32,
    pub target_size: Vec2,
    pub inv_target_size: Vec2,
    pub near_z: f32,
    pub far_z: f32,
    pub total_time: f32,
    pub delta_time: f32,
    pub ambient_light: Vec4,
    /// x = directional light count, y = spot light count.
    pub light_counts: UVec4,
    pub lights: [LightData; MAX_LIGHTS],
}

impl Default for PassData {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Data unique to each vertex passed as elements into the vertex buffer.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct VertexData {
    pub position: Vec3,
    pub normal: Vec3,
}

impl VertexData {
    pub fn new(position: Vec3, normal: Vec3) -> Self {
        Self { position, normal }
    }
}
