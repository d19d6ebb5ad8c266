use std::sync::Arc;

use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::WrapErr;

/// Contract of the queue's monotonically increasing completion counter.
///
/// `signal`, `completed`, and `wait` talk to the device; `is_reached` and
/// `flush` are derived from them, so the frame ring and the drain logic run
/// the same code against the real queue and the simulated timeline used in
/// tests. Value 0 is reserved for "never signaled".
pub trait FenceTimeline {
    /// Schedules the next fence value to be signaled after all work submitted
    /// so far, and returns that value.
    fn signal(&mut self) -> Result<u64>;

    /// The latest fence value the device has completed.
    fn completed(&self) -> Result<u64>;

    /// Blocks the calling thread until `completed() >= value`.
    fn wait(&self, value: u64) -> Result<()>;

    fn is_reached(&self, value: u64) -> Result<bool> {
        Ok(self.completed()? >= value)
    }

    /// Drains the queue: signals a fresh value and blocks until it lands.
    fn flush(&mut self) -> Result<()> {
        let value = self.signal()?;
        self.wait(value)
    }
}

/// The graphics queue paired with the timeline semaphore that fences it.
///
/// Every submission that matters to the frame ring goes through
/// [`SubmitQueue::submit_and_signal`], which fuses the payload and the next
/// timeline value into one submission; `FenceTimeline::signal` covers the
/// payload-less case (flushing).
pub struct SubmitQueue {
    device: Arc<ash::Device>,
    queue: vk::Queue,
    timeline: vk::Semaphore,
    last_signaled: u64,
}

impl SubmitQueue {
    pub fn new(device: Arc<ash::Device>, queue: vk::Queue) -> Result<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let timeline = unsafe {
            device
                .create_semaphore(&info, None)
                .wrap_err("vkCreateSemaphore (timeline) failed")?
        };

        Ok(Self {
            device,
            queue,
            timeline,
            last_signaled: 0,
        })
    }

    pub fn raw(&self) -> vk::Queue {
        self.queue
    }

    /// Submits one recorded command buffer. The submission waits on
    /// `image_acquired` before touching color output, signals `render_done`
    /// for the presentation engine, and signals the next timeline value.
    /// Returns the signaled value for stamping the frame slot.
    pub fn submit_and_signal(
        &mut self,
        cmd: vk::CommandBuffer,
        image_acquired: vk::Semaphore,
        render_done: vk::Semaphore,
    ) -> Result<u64> {
        let value = self.last_signaled + 1;

        let cmd_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
        let wait_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(image_acquired)
            .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)];
        let signal_infos = [
            vk::SemaphoreSubmitInfo::default()
                .semaphore(render_done)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
            vk::SemaphoreSubmitInfo::default()
                .semaphore(self.timeline)
                .value(value)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
        ];
        let submit = vk::SubmitInfo2::default()
            .command_buffer_infos(&cmd_infos)
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos);

        unsafe {
            self.device
                .queue_submit2(self.queue, &[submit], vk::Fence::null())
                .wrap_err("vkQueueSubmit2 failed")?;
        }

        self.last_signaled = value;
        Ok(value)
    }
}

impl FenceTimeline for SubmitQueue {
    fn signal(&mut self) -> Result<u64> {
        let value = self.last_signaled + 1;

        // A submission with no command buffers is still ordered after all
        // prior submissions on the queue.
        let signal_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(self.timeline)
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let submit = vk::SubmitInfo2::default().signal_semaphore_infos(&signal_infos);

        unsafe {
            self.device
                .queue_submit2(self.queue, &[submit], vk::Fence::null())
                .wrap_err("vkQueueSubmit2 (fence signal) failed")?;
        }

        self.last_signaled = value;
        Ok(value)
    }

    fn completed(&self) -> Result<u64> {
        let value = unsafe {
            self.device
                .get_semaphore_counter_value(self.timeline)
                .wrap_err("vkGetSemaphoreCounterValue failed")?
        };
        Ok(value)
    }

    fn wait(&self, value: u64) -> Result<()> {
        let semaphores = [self.timeline];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe {
            self.device
                .wait_semaphores(&wait_info, u64::MAX)
                .wrap_err("vkWaitSemaphores failed")?;
        }
        Ok(())
    }
}

impl Drop for SubmitQueue {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.timeline, None);
        }
    }
}
