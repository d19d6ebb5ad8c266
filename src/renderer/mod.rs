pub mod camera;
pub mod config;
pub mod scene;
pub mod shader_data;
pub mod upload;
pub mod util;

mod descriptors;
mod device;
mod frame;
mod pipeline;
mod queue;
mod recorder;
mod shader;
mod swapchain;
mod target;

use std::f32::consts::FRAC_PI_2;
use std::mem::{offset_of, size_of};
use std::sync::Arc;

use ash::vk;
use color_eyre::Result;
use glam::{Vec2, Vec3};
use smallvec::smallvec;
use winit::window::Window;

use crate::renderer::camera::Camera;
use crate::renderer::config::RenderConfig;
use crate::renderer::descriptors::SceneDescriptors;
use crate::renderer::device::RenderDevice;
use crate::renderer::frame::{FrameRing, FrameResources};
use crate::renderer::pipeline::{
    BlendState, DepthState, PipelineCache, PipelineRecipe, RasterState, TargetDesc,
    VertexAttribute, VertexLayout,
};
use crate::renderer::queue::{FenceTimeline, SubmitQueue};
use crate::renderer::scene::Scene;
use crate::renderer::scene::geometry::GeometryLibrary;
use crate::renderer::shader::ShaderSet;
use crate::renderer::shader_data::{PassData, VertexData};
use crate::renderer::target::{DEPTH_FORMAT, RenderTarget};

/// Where the fly camera wakes up: south of the pedestal, looking along +Z
/// at the scene.
const CAMERA_START_POSITION: Vec3 = Vec3::new(0.0, 5.0, -5.0);
const CAMERA_START_YAW: f32 = FRAC_PI_2;

/// Owns the device, the frame ring, and the hillside scene, and turns all of
/// it into submitted frames.
///
/// Field order is drop order: everything holding device resources sits above
/// `device`, which tears the instance down last.
pub struct Renderer {
    config: RenderConfig,
    camera: Camera,
    scene: Scene,
    shaders: ShaderSet,
    wireframe: bool,
    resize_requested: bool,

    frames: FrameRing<FrameResources>,
    geometry: GeometryLibrary,
    pipelines: PipelineCache,
    descriptors: SceneDescriptors,
    queue: SubmitQueue,
    target: RenderTarget,
    device: RenderDevice,
}

impl Renderer {
    pub fn new(window: Arc<Window>, config: RenderConfig) -> Result<Self> {
        config.validate()?;
        let frames_in_flight = config.frames_in_flight as u32;

        let device = RenderDevice::new(&window)?;
        let target = RenderTarget::new(&device, window, &config)?;
        let descriptors = SceneDescriptors::new(device.logical.clone(), frames_in_flight)?;
        let shaders = ShaderSet::load()?;
        let pipelines = PipelineCache::new(device.logical.clone());
        let queue = SubmitQueue::new(device.logical.clone(), device.graphics_queue)?;

        let (mut geometry, scene) = scene::build_hillside(frames_in_flight)?;
        geometry.upload(device.allocator(), device.logical.clone())?;

        let mut payloads = Vec::with_capacity(config.frames_in_flight);
        for slot in 0..config.frames_in_flight {
            payloads.push(FrameResources::new(
                slot,
                device.queue_family_index,
                scene.items().len() as u32,
                geometry.material_count() as u32,
                device.allocator(),
                device.logical.clone(),
            )?);
        }
        let frames = FrameRing::new(payloads);

        for (slot, frame) in frames.iter().enumerate() {
            descriptors.write_slot(
                slot,
                frame.object_cb.raw(),
                frame.object_cb.element_size(),
                frame.material_cb.raw(),
                frame.material_cb.element_size(),
                frame.pass_cb.raw(),
                frame.pass_cb.element_size(),
            );
        }

        let mut camera = Camera::new(CAMERA_START_POSITION, CAMERA_START_YAW, 0.0);
        camera.set_lens(config.fov_y, target.aspect_ratio(), config.near, config.far);

        log::info!(
            "Renderer ready: {} frame slots, {} render items, {} materials, {} vertices, {} indices",
            frames.len(),
            scene.items().len(),
            geometry.material_count(),
            geometry.vertex_count(),
            geometry.index_count(),
        );

        Ok(Self {
            config,
            camera,
            scene,
            shaders,
            wireframe: false,
            resize_requested: false,
            frames,
            geometry,
            pipelines,
            descriptors,
            queue,
            target,
            device,
        })
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// Steers the sun spot light by spherical-angle deltas.
    pub fn rotate_sun(&mut self, delta_theta: f32, delta_phi: f32) {
        self.scene.rotate_sun(delta_theta, delta_phi);
    }

    pub fn toggle_wireframe(&mut self) {
        self.wireframe = !self.wireframe;
        log::info!(
            "Wireframe {}",
            if self.wireframe { "on" } else { "off" }
        );
    }

    /// Marks the swapchain for recreation before the next frame.
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    /// Advances to the next frame slot, waiting for its previous use to
    /// finish on the GPU if it has not yet. This is the one blocking wait of
    /// the steady state. Once the slot is free its constant buffers take this
    /// frame's dirty world matrices, dirty materials, and the pass block.
    pub fn update(&mut self, total_time: f32, delta_time: f32) -> Result<()> {
        if self.is_minimized() {
            // Minimized; there is nothing to present to.
            return Ok(());
        }
        if self.resize_requested {
            self.recreate_target()?;
        }

        self.frames.advance(&self.queue)?;
        self.write_frame_constants(total_time, delta_time)
    }

    /// Records, submits, and presents the current slot. Swapchain staleness
    /// is absorbed here by skipping the present and recreating the target on
    /// the next `update`.
    pub fn draw(&mut self) -> Result<()> {
        if self.is_minimized() {
            return Ok(());
        }

        let (image_acquired, render_done) = {
            let frame = self.frames.current();
            (frame.image_acquired, frame.render_done)
        };

        let Some((image_index, suboptimal)) = self.target.swapchain.acquire(image_acquired)?
        else {
            self.resize_requested = true;
            return Ok(());
        };
        if suboptimal {
            self.resize_requested = true;
        }

        let cmd = self.record_frame(image_index)?;

        let fence_value = self.queue.submit_and_signal(cmd, image_acquired, render_done)?;
        self.frames.stamp(fence_value);

        let stale = self
            .target
            .swapchain
            .present(self.queue.raw(), render_done, image_index)?;
        if stale {
            self.resize_requested = true;
        }
        Ok(())
    }

    fn is_minimized(&self) -> bool {
        let size = self.target.window.inner_size();
        size.width == 0 || size.height == 0
    }

    fn recreate_target(&mut self) -> Result<()> {
        // The old swapchain views are destroyed during the rebuild; neither
        // our submissions nor the presentation engine may still hold them.
        self.queue.flush()?;
        self.device.wait_idle()?;

        self.target.resize(&self.device)?;
        self.camera.set_aspect(self.target.aspect_ratio());
        self.resize_requested = false;
        Ok(())
    }

    /// Copies everything the shaders read this frame into the current slot's
    /// buffers: dirty world matrices, dirty materials, and the pass block.
    fn write_frame_constants(&mut self, total_time: f32, delta_time: f32) -> Result<()> {
        let frame = self.frames.current_mut();

        let object_cb = &mut frame.object_cb;
        self.scene
            .write_dirty_objects(|index, data| object_cb.copy_data(index as u32, data))?;

        let material_cb = &mut frame.material_cb;
        self.geometry
            .write_dirty_materials(|index, data| material_cb.copy_data(index as u32, data))?;

        let pass = build_pass_data(
            &self.camera,
            &self.scene,
            self.target.extent(),
            total_time,
            delta_time,
        )?;
        frame.pass_cb.copy_data(0, &pass)?;
        Ok(())
    }

    fn record_frame(&mut self, image_index: u32) -> Result<vk::CommandBuffer> {
        let device = &self.device.logical;
        let slot = self.frames.index();
        let color_image = self.target.swapchain.images[image_index as usize];
        let color_view = self.target.swapchain.image_views[image_index as usize];

        let frame = self.frames.current_mut();
        frame.recorder.reset()?;
        let cmd = frame.recorder.begin()?;

        recorder::barrier_frame_start(device, cmd, color_image, self.target.depth.image);

        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(color_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.config.clear_color,
                },
            })];
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.target.depth.view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });
        let rendering_info = vk::RenderingInfo::default()
            .render_area(self.target.scissor())
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);

        let recipe = PipelineRecipe {
            vertex_shader: &self.shaders.scene_vert,
            fragment_shader: Some(&self.shaders.scene_frag),
            vertex_layout: scene_vertex_layout(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            raster: RasterState {
                polygon_mode: if self.wireframe {
                    vk::PolygonMode::LINE
                } else {
                    vk::PolygonMode::FILL
                },
                ..RasterState::default()
            },
            depth: DepthState::default(),
            blend: BlendState::default(),
        };
        let target_desc = TargetDesc {
            color_formats: smallvec![self.target.swapchain.format],
            depth_format: Some(DEPTH_FORMAT),
            sample_count: 1,
        };
        let pipeline_layout = self.descriptors.pipeline_layout();
        let pipeline = self
            .pipelines
            .get_or_create(pipeline_layout, &recipe, &target_desc)?;

        let buffers = self.geometry.buffers()?;
        let set = self.descriptors.set_for_slot(slot);

        unsafe {
            device.cmd_begin_rendering(cmd, &rendering_info);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            device.cmd_set_viewport(cmd, 0, &[self.target.viewport()]);
            device.cmd_set_scissor(cmd, 0, &[self.target.scissor()]);
            device.cmd_bind_vertex_buffers(cmd, 0, &[buffers.vertex.buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, buffers.index.buffer, 0, vk::IndexType::UINT16);
        }

        for (index, item) in self.scene.items().iter().enumerate() {
            // Dynamic offsets are consumed in binding order: object, material.
            let offsets = [
                frame.object_cb.offset_of(index as u32) as u32,
                frame.material_cb.offset_of(item.material as u32) as u32,
            ];
            let submesh = self.geometry.submesh(item.submesh);
            unsafe {
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    pipeline_layout,
                    0,
                    &[set],
                    &offsets,
                );
                device.cmd_draw_indexed(
                    cmd,
                    submesh.index_count,
                    1,
                    submesh.start_index,
                    submesh.base_vertex,
                    0,
                );
            }
        }

        unsafe {
            device.cmd_end_rendering(cmd);
        }
        recorder::barrier_frame_end(device, cmd, color_image);

        frame.recorder.end()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Field drops run right after this; nothing may still be executing.
        if let Err(e) = self.queue.flush() {
            log::error!("Failed to flush the queue during renderer teardown: {e}");
        }
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to drain the GPU during renderer teardown: {e}");
        }
    }
}

fn scene_vertex_layout() -> VertexLayout {
    VertexLayout {
        stride: size_of::<VertexData>() as u32,
        attributes: vec![
            VertexAttribute {
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(VertexData, position) as u32,
            },
            VertexAttribute {
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(VertexData, normal) as u32,
            },
        ],
    }
}

fn build_pass_data(
    camera: &Camera,
    scene: &Scene,
    extent: vk::Extent2D,
    total_time: f32,
    delta_time: f32,
) -> Result<PassData> {
    let view = camera.get_view_mat();
    let proj = camera.get_proj_mat();
    let view_proj = camera.get_viewproj_mat();

    let width = extent.width.max(1) as f32;
    let height = extent.height.max(1) as f32;

    let mut pass = PassData {
        view,
        inv_view: view.inverse(),
        proj,
        inv_proj: proj.inverse(),
        view_proj,
        inv_view_proj: view_proj.inverse(),
        eye_pos: camera.get_position(),
        target_size: Vec2::new(width, height),
        inv_target_size: Vec2::new(1.0 / width, 1.0 / height),
        near_z: camera.get_near(),
        far_z: camera.get_far(),
        total_time,
        delta_time,
        ambient_light: scene.ambient_light,
        ..PassData::default()
    };
    scene.write_lights(&mut pass)?;
    Ok(pass)
}

#[cfg(test)]
mod tests {
    use glam::Mat4;

    use super::*;

    #[test]
    fn vertex_layout_mirrors_the_vertex_struct() {
        let layout = scene_vertex_layout();
        assert_eq!(layout.stride, 24);
        assert_eq!(layout.attributes.len(), 2);
        assert_eq!(layout.attributes[0].offset, 0);
        assert_eq!(layout.attributes[1].offset, 12);
        assert!(
            layout
                .attributes
                .iter()
                .all(|a| a.format == vk::Format::R32G32B32_SFLOAT)
        );
    }

    #[test]
    fn pass_data_is_consistent_with_the_camera() {
        let mut camera = Camera::new(Vec3::new(0.0, 5.0, -5.0), FRAC_PI_2, 0.0);
        camera.set_aspect(16.0 / 9.0);
        let scene = Scene::new();
        let extent = vk::Extent2D {
            width: 1600,
            height: 900,
        };

        let pass = build_pass_data(&camera, &scene, extent, 2.0, 0.016).unwrap();

        assert_eq!(pass.eye_pos, camera.get_position());
        assert_eq!(pass.near_z, camera.get_near());
        assert_eq!(pass.far_z, camera.get_far());
        assert_eq!(pass.target_size, Vec2::new(1600.0, 900.0));
        assert!((pass.target_size * pass.inv_target_size - Vec2::ONE).length() < 1e-6);

        let round_trip = pass.inv_view * pass.view;
        assert!(round_trip.abs_diff_eq(Mat4::IDENTITY, 1e-4));
        let round_trip = pass.inv_view_proj * pass.view_proj;
        assert!(round_trip.abs_diff_eq(Mat4::IDENTITY, 1e-3));

        // A bare scene still carries the sun.
        assert_eq!(pass.light_counts.y, 1);
        assert_eq!(pass.ambient_light, scene.ambient_light);
    }

    #[test]
    fn start_pose_faces_the_scene_center() {
        let camera = Camera::new(CAMERA_START_POSITION, CAMERA_START_YAW, 0.0);
        let forward = camera.get_forward();
        assert!((forward - Vec3::Z).length() < 1e-6);
    }
}
