use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use smallvec::SmallVec;

use crate::renderer::shader::create_shader_module;

/// Vertex input layout: a single binding plus its attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: vk::Format,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterState {
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
}

impl Default for RasterState {
    fn default() -> Self {
        // Front faces land counter-clockwise in framebuffer space once the
        // shader build's clip-space Y flip is applied.
        Self {
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthState {
    pub test_enable: bool,
    pub write_enable: bool,
    pub compare_op: vk::CompareOp,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            test_enable: true,
            write_enable: true,
            compare_op: vk::CompareOp::LESS,
        }
    }
}

/// Per-attachment blend state, applied to every color target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendState {
    pub enable: bool,
    pub src_color: vk::BlendFactor,
    pub dst_color: vk::BlendFactor,
    pub color_op: vk::BlendOp,
    pub src_alpha: vk::BlendFactor,
    pub dst_alpha: vk::BlendFactor,
    pub alpha_op: vk::BlendOp,
    pub write_mask: vk::ColorComponentFlags,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            enable: false,
            src_color: vk::BlendFactor::ONE,
            dst_color: vk::BlendFactor::ZERO,
            color_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ZERO,
            alpha_op: vk::BlendOp::ADD,
            write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

/// Structural description of a graphics pipeline. Two recipes that agree
/// field for field resolve to the same cached pipeline.
#[derive(Debug, Clone)]
pub struct PipelineRecipe<'a> {
    pub vertex_shader: &'a [u32],
    pub fragment_shader: Option<&'a [u32]>,
    pub vertex_layout: VertexLayout,
    pub topology: vk::PrimitiveTopology,
    pub raster: RasterState,
    pub depth: DepthState,
    pub blend: BlendState,
}

/// Attachment formats and sample count the pipeline renders into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDesc {
    pub color_formats: SmallVec<[vk::Format; 4]>,
    pub depth_format: Option<vk::Format>,
    pub sample_count: u32,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn hash_combine(seed: &mut u64, value: u64) {
    *seed ^= value
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(*seed << 6)
        .wrapping_add(*seed >> 2);
}

/// Structural hash over everything that feeds pipeline creation. Any
/// single-field difference between two descriptions yields a different key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey(u64);

impl PipelineKey {
    pub fn compute(
        layout: vk::PipelineLayout,
        recipe: &PipelineRecipe,
        target: &TargetDesc,
    ) -> Self {
        let mut seed = 0u64;
        hash_combine(&mut seed, layout.as_raw());

        hash_combine(&mut seed, fnv1a(bytemuck::cast_slice(recipe.vertex_shader)));
        match recipe.fragment_shader {
            Some(words) => hash_combine(&mut seed, fnv1a(bytemuck::cast_slice(words))),
            None => hash_combine(&mut seed, 0),
        }

        hash_combine(&mut seed, recipe.vertex_layout.stride as u64);
        hash_combine(&mut seed, recipe.vertex_layout.attributes.len() as u64);
        for attribute in &recipe.vertex_layout.attributes {
            hash_combine(&mut seed, attribute.location as u64);
            hash_combine(&mut seed, attribute.format.as_raw() as u64);
            hash_combine(&mut seed, attribute.offset as u64);
        }

        hash_combine(&mut seed, recipe.topology.as_raw() as u64);

        hash_combine(&mut seed, recipe.raster.polygon_mode.as_raw() as u64);
        hash_combine(&mut seed, recipe.raster.cull_mode.as_raw() as u64);
        hash_combine(&mut seed, recipe.raster.front_face.as_raw() as u64);

        hash_combine(&mut seed, recipe.depth.test_enable as u64);
        hash_combine(&mut seed, recipe.depth.write_enable as u64);
        hash_combine(&mut seed, recipe.depth.compare_op.as_raw() as u64);

        hash_combine(&mut seed, recipe.blend.enable as u64);
        hash_combine(&mut seed, recipe.blend.src_color.as_raw() as u64);
        hash_combine(&mut seed, recipe.blend.dst_color.as_raw() as u64);
        hash_combine(&mut seed, recipe.blend.color_op.as_raw() as u64);
        hash_combine(&mut seed, recipe.blend.src_alpha.as_raw() as u64);
        hash_combine(&mut seed, recipe.blend.dst_alpha.as_raw() as u64);
        hash_combine(&mut seed, recipe.blend.alpha_op.as_raw() as u64);
        hash_combine(&mut seed, recipe.blend.write_mask.as_raw() as u64);

        hash_combine(&mut seed, target.color_formats.len() as u64);
        for format in &target.color_formats {
            hash_combine(&mut seed, format.as_raw() as u64);
        }
        hash_combine(
            &mut seed,
            target.depth_format.map_or(0, |format| format.as_raw() as u64),
        );
        hash_combine(&mut seed, target.sample_count as u64);

        Self(seed)
    }
}

/// Rejects descriptions the API would refuse at creation time, before they
/// reach the key.
fn validate(layout: vk::PipelineLayout, recipe: &PipelineRecipe, target: &TargetDesc) -> Result<()> {
    if layout == vk::PipelineLayout::null() {
        return Err(eyre!("pipeline layout must not be null"));
    }
    if recipe.vertex_shader.is_empty() {
        return Err(eyre!("vertex shader bytecode is empty"));
    }
    if target.sample_count < 1 {
        return Err(eyre!("sample count must be at least 1"));
    }
    if !target.color_formats.is_empty() && recipe.fragment_shader.is_none() {
        return Err(eyre!(
            "{} color target(s) but no fragment shader",
            target.color_formats.len()
        ));
    }
    Ok(())
}

/// The device-free half of the cache: a keyed map with insert-once
/// semantics.
#[derive(Default)]
struct PipelineStore {
    pipelines: HashMap<PipelineKey, vk::Pipeline>,
}

impl PipelineStore {
    fn get_or_insert_with(
        &mut self,
        key: PipelineKey,
        create: impl FnOnce() -> Result<vk::Pipeline>,
    ) -> Result<vk::Pipeline> {
        if let Some(&pipeline) = self.pipelines.get(&key) {
            return Ok(pipeline);
        }
        let pipeline = create()?;
        self.pipelines.insert(key, pipeline);
        Ok(pipeline)
    }

    fn len(&self) -> usize {
        self.pipelines.len()
    }
}

/// Cache of graphics pipelines keyed by their structural description.
pub struct PipelineCache {
    store: PipelineStore,
    device: Arc<ash::Device>,
}

impl PipelineCache {
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self {
            store: PipelineStore::default(),
            device,
        }
    }

    /// Returns the pipeline for this description, creating it on first use.
    /// Structurally identical descriptions share one handle.
    pub fn get_or_create(
        &mut self,
        layout: vk::PipelineLayout,
        recipe: &PipelineRecipe,
        target: &TargetDesc,
    ) -> Result<vk::Pipeline> {
        validate(layout, recipe, target)?;
        let key = PipelineKey::compute(layout, recipe, target);

        let device = &self.device;
        let mut created = false;
        let pipeline = self.store.get_or_insert_with(key, || {
            created = true;
            build_graphics_pipeline(device, layout, recipe, target)
        })?;
        if created {
            log::debug!(
                "Created pipeline {key:?} ({} cached)",
                self.store.len()
            );
        }
        Ok(pipeline)
    }

    /// Destroys every cached pipeline. The caller must have drained the GPU
    /// first.
    pub fn clear(&mut self) {
        for (_, pipeline) in self.store.pipelines.drain() {
            unsafe {
                self.device.destroy_pipeline(pipeline, None);
            }
        }
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        self.clear();
    }
}

fn build_graphics_pipeline(
    device: &ash::Device,
    layout: vk::PipelineLayout,
    recipe: &PipelineRecipe,
    target: &TargetDesc,
) -> Result<vk::Pipeline> {
    let vert_module = create_shader_module(device, recipe.vertex_shader)?;
    let frag_module = match recipe.fragment_shader {
        Some(words) => match create_shader_module(device, words) {
            Ok(module) => Some(module),
            Err(e) => {
                unsafe { device.destroy_shader_module(vert_module, None) };
                return Err(e);
            }
        },
        None => None,
    };

    let entry = c"main";
    let mut stages: SmallVec<[vk::PipelineShaderStageCreateInfo; 2]> = SmallVec::new();
    stages.push(
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_module)
            .name(entry),
    );
    if let Some(module) = frag_module {
        stages.push(
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(module)
                .name(entry),
        );
    }

    let binding_descs = [vk::VertexInputBindingDescription {
        binding: 0,
        stride: recipe.vertex_layout.stride,
        input_rate: vk::VertexInputRate::VERTEX,
    }];
    let attribute_descs: SmallVec<[vk::VertexInputAttributeDescription; 4]> = recipe
        .vertex_layout
        .attributes
        .iter()
        .map(|attribute| vk::VertexInputAttributeDescription {
            location: attribute.location,
            binding: 0,
            format: attribute.format,
            offset: attribute.offset,
        })
        .collect();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descs)
        .vertex_attribute_descriptions(&attribute_descs);

    let input_assembly =
        vk::PipelineInputAssemblyStateCreateInfo::default().topology(recipe.topology);

    // Viewport and scissor are dynamic; only the counts matter here.
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let raster = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(recipe.raster.polygon_mode)
        .cull_mode(recipe.raster.cull_mode)
        .front_face(recipe.raster.front_face)
        .line_width(1.0);

    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(sample_count_flags(target.sample_count)?);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(recipe.depth.test_enable)
        .depth_write_enable(recipe.depth.write_enable)
        .depth_compare_op(recipe.depth.compare_op)
        .max_depth_bounds(1.0);

    let blend_attachments: SmallVec<[vk::PipelineColorBlendAttachmentState; 4]> = target
        .color_formats
        .iter()
        .map(|_| {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(recipe.blend.enable)
                .src_color_blend_factor(recipe.blend.src_color)
                .dst_color_blend_factor(recipe.blend.dst_color)
                .color_blend_op(recipe.blend.color_op)
                .src_alpha_blend_factor(recipe.blend.src_alpha)
                .dst_alpha_blend_factor(recipe.blend.dst_alpha)
                .alpha_blend_op(recipe.blend.alpha_op)
                .color_write_mask(recipe.blend.write_mask)
        })
        .collect();
    let color_blend =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let mut rendering_info =
        vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&target.color_formats);
    if let Some(depth_format) = target.depth_format {
        rendering_info = rendering_info.depth_attachment_format(depth_format);
    }

    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&raster)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info);

    let result = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
    };

    unsafe {
        device.destroy_shader_module(vert_module, None);
        if let Some(module) = frag_module {
            device.destroy_shader_module(module, None);
        }
    }

    match result {
        Ok(pipelines) => Ok(pipelines[0]),
        Err((_, e)) => Err(e).wrap_err("vkCreateGraphicsPipelines failed"),
    }
}

fn sample_count_flags(count: u32) -> Result<vk::SampleCountFlags> {
    match count {
        1 => Ok(vk::SampleCountFlags::TYPE_1),
        2 => Ok(vk::SampleCountFlags::TYPE_2),
        4 => Ok(vk::SampleCountFlags::TYPE_4),
        8 => Ok(vk::SampleCountFlags::TYPE_8),
        16 => Ok(vk::SampleCountFlags::TYPE_16),
        _ => Err(eyre!("unsupported sample count {count}")),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use smallvec::smallvec;

    use super::*;

    const VS: &[u32] = &[0x0723_0203, 0x0001_0600, 0x0000_002a];
    const FS: &[u32] = &[0x0723_0203, 0x0001_0600, 0x0000_0007];

    fn layout() -> vk::PipelineLayout {
        vk::PipelineLayout::from_raw(0x1000)
    }

    fn recipe() -> PipelineRecipe<'static> {
        PipelineRecipe {
            vertex_shader: VS,
            fragment_shader: Some(FS),
            vertex_layout: VertexLayout {
                stride: 24,
                attributes: vec![
                    VertexAttribute {
                        location: 0,
                        format: vk::Format::R32G32B32_SFLOAT,
                        offset: 0,
                    },
                    VertexAttribute {
                        location: 1,
                        format: vk::Format::R32G32B32_SFLOAT,
                        offset: 12,
                    },
                ],
            },
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            raster: RasterState::default(),
            depth: DepthState::default(),
            blend: BlendState::default(),
        }
    }

    fn target() -> TargetDesc {
        TargetDesc {
            color_formats: smallvec![vk::Format::B8G8R8A8_SRGB],
            depth_format: Some(vk::Format::D32_SFLOAT),
            sample_count: 1,
        }
    }

    fn key(recipe: &PipelineRecipe, target: &TargetDesc) -> PipelineKey {
        PipelineKey::compute(layout(), recipe, target)
    }

    #[test]
    fn identical_descriptions_share_a_key() {
        assert_eq!(key(&recipe(), &target()), key(&recipe(), &target()));
    }

    #[test]
    fn every_field_feeds_the_key() {
        let base = key(&recipe(), &target());
        let mut variants = Vec::new();

        {
            let mut r = recipe();
            r.vertex_shader = FS;
            variants.push(key(&r, &target()));
        }
        {
            let mut r = recipe();
            r.fragment_shader = None;
            let depth_only = TargetDesc {
                color_formats: smallvec![],
                depth_format: Some(vk::Format::D32_SFLOAT),
                sample_count: 1,
            };
            variants.push(PipelineKey::compute(layout(), &r, &depth_only));
        }
        {
            let mut r = recipe();
            r.vertex_layout.stride = 32;
            variants.push(key(&r, &target()));
        }
        {
            let mut r = recipe();
            r.vertex_layout.attributes[1].offset = 16;
            variants.push(key(&r, &target()));
        }
        {
            let mut r = recipe();
            r.vertex_layout.attributes[1].format = vk::Format::R32G32_SFLOAT;
            variants.push(key(&r, &target()));
        }
        {
            let mut r = recipe();
            r.topology = vk::PrimitiveTopology::LINE_LIST;
            variants.push(key(&r, &target()));
        }
        {
            let mut r = recipe();
            r.raster.polygon_mode = vk::PolygonMode::LINE;
            variants.push(key(&r, &target()));
        }
        {
            let mut r = recipe();
            r.raster.cull_mode = vk::CullModeFlags::NONE;
            variants.push(key(&r, &target()));
        }
        {
            let mut r = recipe();
            r.raster.front_face = vk::FrontFace::CLOCKWISE;
            variants.push(key(&r, &target()));
        }
        {
            let mut r = recipe();
            r.depth.test_enable = false;
            variants.push(key(&r, &target()));
        }
        {
            let mut r = recipe();
            r.depth.write_enable = false;
            variants.push(key(&r, &target()));
        }
        {
            let mut r = recipe();
            r.depth.compare_op = vk::CompareOp::LESS_OR_EQUAL;
            variants.push(key(&r, &target()));
        }
        {
            let mut r = recipe();
            r.blend.enable = true;
            variants.push(key(&r, &target()));
        }
        {
            let mut r = recipe();
            r.blend.write_mask = vk::ColorComponentFlags::R;
            variants.push(key(&r, &target()));
        }
        {
            let mut t = target();
            t.color_formats = smallvec![vk::Format::R8G8B8A8_UNORM];
            variants.push(key(&recipe(), &t));
        }
        {
            let mut t = target();
            t.color_formats.push(vk::Format::R16G16B16A16_SFLOAT);
            variants.push(key(&recipe(), &t));
        }
        {
            let mut t = target();
            t.depth_format = None;
            variants.push(key(&recipe(), &t));
        }
        {
            let mut t = target();
            t.sample_count = 4;
            variants.push(key(&recipe(), &t));
        }
        variants.push(PipelineKey::compute(
            vk::PipelineLayout::from_raw(0x2000),
            &recipe(),
            &target(),
        ));

        for variant in &variants {
            assert_ne!(*variant, base);
        }
        let unique: HashSet<PipelineKey> = variants.iter().copied().collect();
        assert_eq!(unique.len(), variants.len());
    }

    #[test]
    fn store_returns_the_same_handle_for_an_equal_key() {
        let mut store = PipelineStore::default();
        let key = key(&recipe(), &target());

        let mut created = 0;
        let first = store
            .get_or_insert_with(key, || {
                created += 1;
                Ok(vk::Pipeline::from_raw(0xAAAA))
            })
            .unwrap();
        let second = store
            .get_or_insert_with(key, || {
                created += 1;
                Ok(vk::Pipeline::from_raw(0xBBBB))
            })
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(created, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn distinct_keys_create_distinct_pipelines() {
        let mut store = PipelineStore::default();
        let solid = key(&recipe(), &target());
        let wire = {
            let mut r = recipe();
            r.raster.polygon_mode = vk::PolygonMode::LINE;
            key(&r, &target())
        };

        let a = store
            .get_or_insert_with(solid, || Ok(vk::Pipeline::from_raw(1)))
            .unwrap();
        let b = store
            .get_or_insert_with(wire, || Ok(vk::Pipeline::from_raw(2)))
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn color_targets_require_a_fragment_shader() {
        let mut r = recipe();
        r.fragment_shader = None;
        assert!(validate(layout(), &r, &target()).is_err());

        // Depth-only rendering without a fragment shader is legal.
        let depth_only = TargetDesc {
            color_formats: smallvec![],
            depth_format: Some(vk::Format::D32_SFLOAT),
            sample_count: 1,
        };
        assert!(validate(layout(), &r, &depth_only).is_ok());
    }

    #[test]
    fn rejects_null_layout_zero_samples_and_empty_vertex_shader() {
        assert!(validate(vk::PipelineLayout::null(), &recipe(), &target()).is_err());

        let mut t = target();
        t.sample_count = 0;
        assert!(validate(layout(), &recipe(), &t).is_err());

        let mut r = recipe();
        r.vertex_shader = &[];
        assert!(validate(layout(), &r, &target()).is_err());
    }
}
