use std::sync::{Arc, Mutex};

use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use gpu_allocator::vulkan::Allocator;

use crate::renderer::queue::FenceTimeline;
use crate::renderer::recorder::CommandRecorder;
use crate::renderer::shader_data::{MaterialData, ObjectData, PassData};
use crate::renderer::upload::{UploadBuffer, UploadKind};

struct Slot<S> {
    payload: S,
    /// Fence value stamped at submit. 0 means the slot has never been
    /// submitted and is free to use.
    last_fence: u64,
}

/// Ring of frame slots advanced once per frame.
///
/// Before handing a slot back for reuse, [`FrameRing::advance`] blocks on the
/// fence value stamped at the slot's last submission, so the CPU runs at most
/// `len()` frames ahead of the GPU and never rewrites a slot the GPU still
/// reads. This wait is the only blocking point of the steady-state frame
/// loop.
pub struct FrameRing<S> {
    slots: Vec<Slot<S>>,
    cursor: usize,
}

impl<S> FrameRing<S> {
    pub fn new(payloads: Vec<S>) -> Self {
        assert!(payloads.len() >= 2, "frame ring needs at least two slots");
        // The cursor starts on the last slot so the first advance lands on
        // slot 0.
        let cursor = payloads.len() - 1;
        Self {
            slots: payloads
                .into_iter()
                .map(|payload| Slot {
                    payload,
                    last_fence: 0,
                })
                .collect(),
            cursor,
        }
    }

    /// Moves to the next slot, blocking until the GPU has released it.
    pub fn advance(&mut self, fence: &impl FenceTimeline) -> Result<&mut S> {
        self.cursor = (self.cursor + 1) % self.slots.len();
        let slot = &mut self.slots[self.cursor];
        if slot.last_fence != 0 && !fence.is_reached(slot.last_fence)? {
            fence.wait(slot.last_fence)?;
        }
        Ok(&mut slot.payload)
    }

    /// Stamps the current slot with the fence value signaled for its
    /// submission.
    pub fn stamp(&mut self, fence_value: u64) {
        self.slots[self.cursor].last_fence = fence_value;
    }

    pub fn current(&self) -> &S {
        &self.slots[self.cursor].payload
    }

    pub fn current_mut(&mut self) -> &mut S {
        &mut self.slots[self.cursor].payload
    }

    pub fn current_fence(&self) -> u64 {
        self.slots[self.cursor].last_fence
    }

    pub fn index(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &S> {
        self.slots.iter().map(|slot| &slot.payload)
    }
}

/// Everything one in-flight frame owns exclusively: its command recorder,
/// its strided constant buffers, and the binary semaphores that order it
/// against the presentation engine.
pub struct FrameResources {
    pub recorder: CommandRecorder,
    pub object_cb: UploadBuffer<ObjectData>,
    pub material_cb: UploadBuffer<MaterialData>,
    pub pass_cb: UploadBuffer<PassData>,
    pub image_acquired: vk::Semaphore,
    pub render_done: vk::Semaphore,
    device: Arc<ash::Device>,
}

impl FrameResources {
    pub fn new(
        slot_index: usize,
        queue_family_index: u32,
        object_count: u32,
        material_count: u32,
        mem_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let recorder = CommandRecorder::new(device.clone(), queue_family_index)?;

        let object_cb = UploadBuffer::new(
            object_count,
            UploadKind::Constant,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            &format!("frame{slot_index}.object"),
            mem_allocator.clone(),
            device.clone(),
        )?;
        let material_cb = UploadBuffer::new(
            material_count,
            UploadKind::Constant,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            &format!("frame{slot_index}.material"),
            mem_allocator.clone(),
            device.clone(),
        )?;
        let pass_cb = UploadBuffer::new(
            1,
            UploadKind::Constant,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            &format!("frame{slot_index}.pass"),
            mem_allocator,
            device.clone(),
        )?;

        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let image_acquired = unsafe {
            device
                .create_semaphore(&semaphore_info, None)
                .wrap_err("vkCreateSemaphore failed")?
        };
        let render_done = unsafe {
            device
                .create_semaphore(&semaphore_info, None)
                .wrap_err("vkCreateSemaphore failed")?
        };

        Ok(Self {
            recorder,
            object_cb,
            material_cb,
            pass_cb,
            image_acquired,
            render_done,
            device,
        })
    }
}

impl Drop for FrameResources {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.image_acquired, None);
            self.device.destroy_semaphore(self.render_done, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::queue::testing::FakeTimeline;

    fn ring(n: usize) -> FrameRing<usize> {
        FrameRing::new((0..n).collect())
    }

    #[test]
    fn first_pass_over_the_ring_never_waits() {
        let mut ring = ring(3);
        let fence = FakeTimeline::stalled();
        for expected in 0..3 {
            let slot = *ring.advance(&fence).unwrap();
            assert_eq!(slot, expected);
        }
        assert!(fence.waits().is_empty());
    }

    #[test]
    fn ten_frames_with_instant_fence_never_block() {
        let mut ring = ring(3);
        let mut fence = FakeTimeline::instant();

        let mut per_slot: Vec<Vec<u64>> = vec![Vec::new(); 3];
        for _ in 0..10 {
            ring.advance(&fence).unwrap();
            let value = fence.signal().unwrap();
            ring.stamp(value);
            per_slot[ring.index()].push(value);
        }

        assert!(fence.waits().is_empty());
        assert_eq!(per_slot[0], vec![1, 4, 7, 10]);
        assert_eq!(per_slot[1], vec![2, 5, 8]);
        assert_eq!(per_slot[2], vec![3, 6, 9]);
        for fences in &per_slot {
            assert!(fences.windows(2).all(|pair| pair[0] < pair[1]));
        }
    }

    #[test]
    fn reusing_an_unreached_slot_blocks_on_its_fence() {
        let mut ring = ring(3);
        let mut fence = FakeTimeline::stalled();
        for _ in 0..3 {
            ring.advance(&fence).unwrap();
            let value = fence.signal().unwrap();
            ring.stamp(value);
        }

        // Wrapping back to slot 0, whose fence value 1 has not completed.
        let slot = *ring.advance(&fence).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(fence.waits(), vec![1]);
    }

    #[test]
    fn reached_slots_are_reused_without_waiting() {
        let mut ring = ring(2);
        let mut fence = FakeTimeline::stalled();
        for _ in 0..2 {
            ring.advance(&fence).unwrap();
            let value = fence.signal().unwrap();
            ring.stamp(value);
        }

        // The GPU caught up on its own; no wait should be issued.
        fence.set_completed(2);
        ring.advance(&fence).unwrap();
        ring.advance(&fence).unwrap();
        assert!(fence.waits().is_empty());
    }

    #[test]
    fn stamp_applies_to_the_current_slot() {
        let mut ring = ring(2);
        let fence = FakeTimeline::instant();

        ring.advance(&fence).unwrap();
        ring.stamp(7);
        assert_eq!(ring.index(), 0);
        assert_eq!(ring.current_fence(), 7);

        ring.advance(&fence).unwrap();
        ring.stamp(9);
        assert_eq!(ring.current_fence(), 9);

        // Coming back around, slot 0 still carries its own stamp.
        fence.set_completed(9);
        ring.advance(&fence).unwrap();
        assert_eq!(ring.current_fence(), 7);
    }

    #[test]
    #[should_panic]
    fn rejects_fewer_than_two_slots() {
        FrameRing::new(vec![0usize]);
    }
}
