use std::sync::Arc;

use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use smallvec::{SmallVec, smallvec};

/// One frame slot's command pool and primary command buffer.
///
/// The pool is the slot's private allocator: it is reset wholesale once the
/// slot's fence value has been reached, then the buffer is re-recorded.
/// Reset/begin/end are guarded so misuse surfaces as an error instead of a
/// validation crash.
pub struct CommandRecorder {
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    is_recording: bool,
    device: Arc<ash::Device>,
}

impl CommandRecorder {
    pub fn new(device: Arc<ash::Device>, queue_family_index: u32) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default().queue_family_index(queue_family_index);
        let pool = unsafe {
            device
                .create_command_pool(&pool_info, None)
                .wrap_err("vkCreateCommandPool failed")?
        };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffer = match unsafe { device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(e).wrap_err("vkAllocateCommandBuffers failed");
            }
        };

        Ok(Self {
            pool,
            buffer,
            is_recording: false,
            device,
        })
    }

    /// Recycles the pool and with it the command buffer. Only legal once the
    /// GPU has finished the previous recording; the frame ring guarantees
    /// that via its fence wait.
    pub fn reset(&mut self) -> Result<()> {
        if self.is_recording {
            return Err(eyre!("Cannot reset a command pool while recording"));
        }
        unsafe {
            self.device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
                .wrap_err("vkResetCommandPool failed")?;
        }
        Ok(())
    }

    pub fn begin(&mut self) -> Result<vk::CommandBuffer> {
        if self.is_recording {
            return Err(eyre!("Command buffer is already recording"));
        }
        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .begin_command_buffer(self.buffer, &begin_info)
                .wrap_err("vkBeginCommandBuffer failed")?;
        }
        self.is_recording = true;
        Ok(self.buffer)
    }

    pub fn end(&mut self) -> Result<vk::CommandBuffer> {
        if !self.is_recording {
            return Err(eyre!("Command buffer is not recording"));
        }
        unsafe {
            self.device
                .end_command_buffer(self.buffer)
                .wrap_err("vkEndCommandBuffer failed")?;
        }
        self.is_recording = false;
        Ok(self.buffer)
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        if self.is_recording {
            log::warn!("Dropping CommandRecorder while still recording");
        }
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Image barriers issued together at frame start: the back buffer moves into
/// color-attachment use (old contents discarded; the pass clears anyway) and
/// the depth image into depth-attachment use.
pub fn barrier_frame_start(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    color: vk::Image,
    depth: vk::Image,
) {
    let barriers: SmallVec<[vk::ImageMemoryBarrier2; 2]> = smallvec![
        vk::ImageMemoryBarrier2::default()
            .image(color)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .src_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags2::NONE)
            .dst_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
            .subresource_range(subresource_range(vk::ImageAspectFlags::COLOR)),
        vk::ImageMemoryBarrier2::default()
            .image(depth)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .src_stage_mask(
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags2::NONE)
            .dst_stage_mask(
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .subresource_range(subresource_range(vk::ImageAspectFlags::DEPTH)),
    ];
    let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
    unsafe {
        device.cmd_pipeline_barrier2(cmd, &dependency);
    }
}

/// Hands the rendered back buffer to the presentation engine.
pub fn barrier_frame_end(device: &ash::Device, cmd: vk::CommandBuffer, color: vk::Image) {
    let barriers = [vk::ImageMemoryBarrier2::default()
        .image(color)
        .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .src_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::NONE)
        .dst_access_mask(vk::AccessFlags2::NONE)
        .subresource_range(subresource_range(vk::ImageAspectFlags::COLOR))];
    let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
    unsafe {
        device.cmd_pipeline_barrier2(cmd, &dependency);
    }
}

fn subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}
