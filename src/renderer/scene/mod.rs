pub mod geometry;
pub mod material;
pub mod shapes;

use std::f32::consts::{FRAC_PI_2, PI};

use color_eyre::Result;
use color_eyre::eyre::eyre;
use glam::{Mat4, UVec4, Vec3, Vec4};

use crate::renderer::scene::geometry::{GeometryLibrary, MaterialId, SubmeshId};
use crate::renderer::scene::material::Material;
use crate::renderer::shader_data::{LightData, MAX_LIGHTS, ObjectData, PassData};
use crate::renderer::util::spherical_to_cartesian;

/// Lowest sun elevation the steering allows, just above grazing.
const SUN_PHI_MIN: f32 = 0.1;

/// One drawable: a submesh, the material shading it, and its world
/// transform. An item's position in the scene list doubles as its slot in
/// the per-object uniform buffer.
pub struct RenderItem {
    pub world: Mat4,
    pub submesh: SubmeshId,
    pub material: MaterialId,
    dirty_frames: u32,
}

impl RenderItem {
    pub fn is_dirty(&self) -> bool {
        self.dirty_frames > 0
    }
}

/// The world being drawn: render items, the fixed spot-light ring, and the
/// steerable sun expressed as spherical angles around the scene origin.
pub struct Scene {
    items: Vec<RenderItem>,
    spot_lights: Vec<LightData>,
    pub ambient_light: Vec4,
    sun_theta: f32,
    sun_phi: f32,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            spot_lights: Vec::new(),
            ambient_light: Vec4::new(0.25, 0.25, 0.35, 1.0),
            sun_theta: 1.25 * PI,
            sun_phi: 0.1,
        }
    }

    /// Adds a drawable and returns its object-buffer slot. The item starts
    /// dirty so every frame slot picks up its transform.
    pub fn add_item(
        &mut self,
        submesh: SubmeshId,
        material: MaterialId,
        world: Mat4,
        frames_in_flight: u32,
    ) -> usize {
        let index = self.items.len();
        self.items.push(RenderItem {
            world,
            submesh,
            material,
            dirty_frames: frames_in_flight,
        });
        index
    }

    pub fn set_world(&mut self, index: usize, world: Mat4, frames_in_flight: u32) {
        let item = &mut self.items[index];
        item.world = world;
        item.dirty_frames = frames_in_flight;
    }

    pub fn items(&self) -> &[RenderItem] {
        &self.items
    }

    pub fn add_spot_light(&mut self, light: LightData) {
        self.spot_lights.push(light);
    }

    pub fn spot_light_count(&self) -> usize {
        self.spot_lights.len()
    }

    /// Steers the sun by spherical-angle deltas. Azimuth wraps freely;
    /// elevation stays between grazing and straight overhead.
    pub fn rotate_sun(&mut self, delta_theta: f32, delta_phi: f32) {
        self.sun_theta += delta_theta;
        self.sun_phi = (self.sun_phi + delta_phi).clamp(SUN_PHI_MIN, FRAC_PI_2);
    }

    pub fn sun_angles(&self) -> (f32, f32) {
        (self.sun_theta, self.sun_phi)
    }

    /// Copies the spot ring plus the sun into the pass constants. The sun
    /// takes the slot after the ring, hanging over the scene center and
    /// pointing down along its spherical angles.
    pub fn write_lights(&self, pass: &mut PassData) -> Result<()> {
        let count = self.spot_lights.len() + 1;
        if count > MAX_LIGHTS {
            return Err(eyre!(
                "{count} spot lights exceed the pass capacity of {MAX_LIGHTS}"
            ));
        }

        pass.lights[..self.spot_lights.len()].copy_from_slice(&self.spot_lights);
        pass.lights[self.spot_lights.len()] = LightData {
            strength: Vec3::new(1.0, 0.4, 0.3),
            falloff_start: 2.0,
            direction: -spherical_to_cartesian(1.0, self.sun_theta, self.sun_phi),
            falloff_end: 1000.0,
            position: Vec3::new(0.0, 10.0, 0.0),
            spot_power: 8.0,
        };
        pass.light_counts = UVec4::new(0, count as u32, 0, 0);
        Ok(())
    }

    /// Writes every dirty item through `write` as `(object slot, data)` and
    /// consumes one dirty frame from each.
    pub fn write_dirty_objects(
        &mut self,
        mut write: impl FnMut(usize, &ObjectData) -> Result<()>,
    ) -> Result<()> {
        for (index, item) in self.items.iter_mut().enumerate() {
            if item.is_dirty() {
                write(index, &ObjectData { world: item.world })?;
                item.dirty_frames -= 1;
            }
        }
        Ok(())
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the hillside scene: a displaced terrain grid, a ring of ten
/// columns capped with spheres, a box pedestal carrying an orb, a spot
/// light over each column, and the steerable sun.
pub fn build_hillside(frames_in_flight: u32) -> Result<(GeometryLibrary, Scene)> {
    let mut library = GeometryLibrary::new();

    library.add_mesh("grid", &shapes::make_hills(160.0, 160.0, 100, 100))?;
    library.add_mesh("box", &shapes::make_box(5.0, 2.0, 5.0))?;
    library.add_mesh("sphere", &shapes::make_geosphere(1.0, 3))?;
    library.add_mesh("cylinder", &shapes::make_cylinder(0.5, 0.3, 3.0, 10, 10))?;

    library.add_material(Material::new(
        "orb",
        Vec4::new(0.12, 0.10, 0.05, 1.0),
        Vec3::new(1.000, 0.766, 0.336),
        0.15,
        frames_in_flight,
    ))?;
    library.add_material(Material::new(
        "box",
        Vec4::new(0.8, 0.2, 0.2, 1.0),
        Vec3::new(0.9, 0.7, 0.5),
        0.25,
        frames_in_flight,
    ))?;
    library.add_material(Material::new(
        "sphere",
        Vec4::new(0.2, 0.5, 0.8, 1.0),
        Vec3::new(0.6, 0.6, 0.9),
        0.2,
        frames_in_flight,
    ))?;
    library.add_material(Material::new(
        "column",
        Vec4::new(0.5, 0.5, 0.5, 1.0),
        Vec3::new(0.8, 0.8, 0.8),
        0.3,
        frames_in_flight,
    ))?;
    // "stone" has no instance yet; it still gets a material-buffer slot.
    library.add_material(Material::new(
        "stone",
        Vec4::new(0.1, 0.1, 0.1, 1.0),
        Vec3::new(0.5, 0.5, 0.5),
        0.7,
        frames_in_flight,
    ))?;
    library.add_material(Material::new(
        "hills",
        Vec4::new(0.45, 0.33, 0.18, 1.0),
        Vec3::new(0.800, 0.600, 0.400),
        0.55,
        frames_in_flight,
    ))?;

    let grid = library.submesh_id("grid")?;
    let box_mesh = library.submesh_id("box")?;
    let sphere = library.submesh_id("sphere")?;
    let cylinder = library.submesh_id("cylinder")?;

    let hills_mat = library.material_id("hills")?;
    let box_mat = library.material_id("box")?;
    let sphere_mat = library.material_id("sphere")?;
    let column_mat = library.material_id("column")?;
    let orb_mat = library.material_id("orb")?;

    let mut scene = Scene::new();
    scene.add_item(grid, hills_mat, Mat4::IDENTITY, frames_in_flight);

    for k in 0..10 {
        let theta = k as f32 * PI / 5.0;
        let (sin, cos) = theta.sin_cos();
        scene.add_item(
            cylinder,
            column_mat,
            Mat4::from_translation(Vec3::new(12.0 * cos, 1.5, 12.0 * sin)),
            frames_in_flight,
        );
        scene.add_item(
            sphere,
            sphere_mat,
            Mat4::from_translation(Vec3::new(12.0 * cos, 3.5, 12.0 * sin)),
            frames_in_flight,
        );
        scene.add_spot_light(LightData {
            strength: Vec3::new(1.0, 0.95, 0.8),
            falloff_start: 2.0,
            direction: Vec3::NEG_Y,
            falloff_end: 10_000.0,
            position: Vec3::new(12.0 * cos, 5.0, 12.0 * sin),
            spot_power: 32.0,
        });
    }

    scene.add_item(
        box_mesh,
        box_mat,
        Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)),
        frames_in_flight,
    );
    // The orb rests on the pedestal, lit by the ring around it.
    scene.add_item(
        sphere,
        orb_mat,
        Mat4::from_translation(Vec3::new(0.0, 3.0, 0.0)),
        frames_in_flight,
    );

    Ok((library, scene))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hillside_scene_has_the_expected_population() {
        let (library, scene) = build_hillside(3).unwrap();

        // Terrain + 10 columns + 10 spheres + pedestal + orb.
        assert_eq!(scene.items().len(), 23);
        assert_eq!(scene.spot_light_count(), 10);
        assert_eq!(library.material_count(), 6);

        let grid = library.submesh_id("grid").unwrap();
        let hills = library.material_id("hills").unwrap();
        assert_eq!(scene.items()[0].submesh, grid);
        assert_eq!(scene.items()[0].material, hills);
        assert!(scene.items().iter().all(RenderItem::is_dirty));
    }

    #[test]
    fn world_edits_redirty_exactly_one_item() {
        let mut scene = Scene::new();
        scene.add_item(0, 0, Mat4::IDENTITY, 2);
        scene.add_item(0, 0, Mat4::IDENTITY, 2);

        for _ in 0..2 {
            let mut written = Vec::new();
            scene
                .write_dirty_objects(|index, _| {
                    written.push(index);
                    Ok(())
                })
                .unwrap();
            assert_eq!(written, vec![0, 1]);
        }

        let mut written = Vec::new();
        scene
            .write_dirty_objects(|index, _| {
                written.push(index);
                Ok(())
            })
            .unwrap();
        assert!(written.is_empty());

        scene.set_world(1, Mat4::from_translation(Vec3::X), 2);
        let mut written = Vec::new();
        scene
            .write_dirty_objects(|index, data| {
                written.push(index);
                assert_eq!(data.world.w_axis.x, 1.0);
                Ok(())
            })
            .unwrap();
        assert_eq!(written, vec![1]);
    }

    #[test]
    fn lights_fill_the_pass_block_in_ring_then_sun_order() {
        let (_, scene) = build_hillside(3).unwrap();
        let mut pass = PassData::default();
        scene.write_lights(&mut pass).unwrap();

        assert_eq!(pass.light_counts, UVec4::new(0, 11, 0, 0));
        assert_eq!(pass.lights[0].spot_power, 32.0);
        assert_eq!(pass.lights[0].direction, Vec3::NEG_Y);
        assert_eq!(pass.lights[9].spot_power, 32.0);
        assert_eq!(pass.lights[10].spot_power, 8.0);
        assert_eq!(pass.lights[10].position, Vec3::new(0.0, 10.0, 0.0));

        // The sun starts nearly overhead and its direction is unit length.
        let sun_dir = pass.lights[10].direction;
        assert!(sun_dir.y < -0.9);
        assert!((sun_dir.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn sun_elevation_clamps_but_azimuth_wraps() {
        let mut scene = Scene::new();

        scene.rotate_sun(0.0, -10.0);
        assert_eq!(scene.sun_angles().1, SUN_PHI_MIN);

        scene.rotate_sun(0.0, 10.0);
        assert_eq!(scene.sun_angles().1, FRAC_PI_2);

        let before = scene.sun_angles().0;
        scene.rotate_sun(7.0, 0.0);
        assert_eq!(scene.sun_angles().0, before + 7.0);
    }

    #[test]
    fn overfull_light_lists_are_rejected() {
        let mut scene = Scene::new();
        for _ in 0..MAX_LIGHTS {
            scene.add_spot_light(LightData::default());
        }
        let mut pass = PassData::default();
        assert!(scene.write_lights(&mut pass).is_err());
    }
}
