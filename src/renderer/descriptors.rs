use std::sync::Arc;

use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::WrapErr;

/// Descriptor plumbing for the scene pass.
///
/// One set per frame slot, written once at startup. Bindings 0 and 1 are
/// dynamic uniform buffers, so per-draw data is selected with dynamic
/// offsets instead of per-draw descriptor writes. Binding 2 is the per-pass
/// block, one element per slot, bound at offset zero.
pub struct SceneDescriptors {
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    device: Arc<ash::Device>,
}

impl SceneDescriptors {
    pub fn new(device: Arc<ash::Device>, frames_in_flight: u32) -> Result<Self> {
        let bindings = layout_bindings();
        let set_layout = unsafe {
            device
                .create_descriptor_set_layout(
                    &vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings),
                    None,
                )
                .wrap_err("vkCreateDescriptorSetLayout failed")?
        };

        let set_layouts = [set_layout];
        let pipeline_layout = unsafe {
            match device.create_pipeline_layout(
                &vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts),
                None,
            ) {
                Ok(layout) => layout,
                Err(e) => {
                    device.destroy_descriptor_set_layout(set_layout, None);
                    return Err(e).wrap_err("vkCreatePipelineLayout failed");
                }
            }
        };

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                descriptor_count: 2 * frames_in_flight,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: frames_in_flight,
            },
        ];
        let pool = unsafe {
            match device.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .max_sets(frames_in_flight)
                    .pool_sizes(&pool_sizes),
                None,
            ) {
                Ok(pool) => pool,
                Err(e) => {
                    device.destroy_pipeline_layout(pipeline_layout, None);
                    device.destroy_descriptor_set_layout(set_layout, None);
                    return Err(e).wrap_err("vkCreateDescriptorPool failed");
                }
            }
        };

        let per_set_layouts = vec![set_layout; frames_in_flight as usize];
        let sets = unsafe {
            match device.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default()
                    .descriptor_pool(pool)
                    .set_layouts(&per_set_layouts),
            ) {
                Ok(sets) => sets,
                Err(e) => {
                    device.destroy_descriptor_pool(pool, None);
                    device.destroy_pipeline_layout(pipeline_layout, None);
                    device.destroy_descriptor_set_layout(set_layout, None);
                    return Err(e).wrap_err("vkAllocateDescriptorSets failed");
                }
            }
        };

        Ok(Self {
            set_layout,
            pipeline_layout,
            pool,
            sets,
            device,
        })
    }

    /// Points one slot's set at that slot's constant buffers. The ranges are
    /// the size of a single element; dynamic offsets walk the rest.
    pub fn write_slot(
        &self,
        slot_index: usize,
        object_buffer: vk::Buffer,
        object_range: u64,
        material_buffer: vk::Buffer,
        material_range: u64,
        pass_buffer: vk::Buffer,
        pass_range: u64,
    ) {
        let set = self.sets[slot_index];

        let object_info = [vk::DescriptorBufferInfo {
            buffer: object_buffer,
            offset: 0,
            range: object_range,
        }];
        let material_info = [vk::DescriptorBufferInfo {
            buffer: material_buffer,
            offset: 0,
            range: material_range,
        }];
        let pass_info = [vk::DescriptorBufferInfo {
            buffer: pass_buffer,
            offset: 0,
            range: pass_range,
        }];

        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .buffer_info(&object_info),
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .buffer_info(&material_info),
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(2)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&pass_info),
        ];

        unsafe {
            self.device.update_descriptor_sets(&writes, &[]);
        }
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub fn set_for_slot(&self, slot_index: usize) -> vk::DescriptorSet {
        self.sets[slot_index]
    }
}

impl Drop for SceneDescriptors {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

fn layout_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 3] {
    [
        vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX),
        vk::DescriptorSetLayoutBinding::default()
            .binding(1)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        vk::DescriptorSetLayoutBinding::default()
            .binding(2)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_match_the_shader_interface() {
        let bindings = layout_bindings();

        assert_eq!(bindings[0].binding, 0);
        assert_eq!(
            bindings[0].descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
        );
        assert!(bindings[0].stage_flags.contains(vk::ShaderStageFlags::VERTEX));

        assert_eq!(bindings[1].binding, 1);
        assert_eq!(
            bindings[1].descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
        );
        assert!(bindings[1].stage_flags.contains(vk::ShaderStageFlags::FRAGMENT));

        assert_eq!(bindings[2].binding, 2);
        assert_eq!(bindings[2].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert!(
            bindings[2]
                .stage_flags
                .contains(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
        );

        for binding in &bindings {
            assert_eq!(binding.descriptor_count, 1);
        }
    }
}
