use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use ash::vk;
use bytemuck::Pod;
use color_eyre::Result;
use color_eyre::eyre::{OptionExt, WrapErr, eyre};
use gpu_allocator::{
    MemoryLocation,
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
};

use crate::renderer::util::align_up;

/// Offset alignment required of constant-buffer elements. 256 satisfies
/// every conforming `minUniformBufferOffsetAlignment`.
pub const CONSTANT_ALIGNMENT: u64 = 256;

/// A GPU buffer bound to its own allocation, freed on drop.
pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: u64,

    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl Buffer {
    pub fn new(
        size: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
        mem_loc: MemoryLocation,
        mem_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let buffer = {
            let buffer_info = vk::BufferCreateInfo {
                size,
                usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                ..Default::default()
            };
            unsafe {
                device
                    .create_buffer(&buffer_info, None)
                    .wrap_err("vkCreateBuffer failed")?
            }
        };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let allocation = mem_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: mem_loc,
                linear: true,
                allocation_scheme: AllocationScheme::DedicatedBuffer(buffer),
            })
            .wrap_err_with(|| format!("allocating {size} bytes for buffer {name:?}"))?;

        unsafe {
            device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .wrap_err("vkBindBufferMemory failed")?;
        }

        Ok(Self {
            buffer,
            size,

            allocation: Some(allocation),
            memory_allocator: mem_allocator,
            device,
        })
    }

    /// Writes a slice of plain data at a byte offset. Only valid for
    /// host-visible buffers.
    pub fn write_slice<T: Pod>(&mut self, data: &[T], byte_offset: usize) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mapped = self.mapped_mut()?;
        mapped[byte_offset..byte_offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn mapped_mut(&mut self) -> Result<&mut [u8]> {
        self.allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or_eyre("buffer is not host-visible")
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.memory_allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        log::error!("Failed to free buffer allocation: {e}");
                    }
                }
                Err(e) => log::error!("Memory allocator poisoned: {e}"),
            }
        }
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// Element placement of an upload buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    /// Each element padded out to a 256-byte stride, so `index * stride` is
    /// always a legal constant-buffer offset.
    Constant,
    /// Tightly packed elements (vertex and index data).
    Packed,
}

pub(crate) fn stride_for(element_size: usize, kind: UploadKind) -> usize {
    match kind {
        UploadKind::Constant => align_up(element_size as u64, CONSTANT_ALIGNMENT) as usize,
        UploadKind::Packed => element_size,
    }
}

pub(crate) fn write_element(mapped: &mut [u8], stride: usize, index: usize, bytes: &[u8]) {
    let start = index * stride;
    mapped[start..start + bytes.len()].copy_from_slice(bytes);
}

/// Fixed-capacity array of `T` in persistently mapped host-visible memory.
/// The mapping lives as long as the buffer; writes are plain memcpys.
pub struct UploadBuffer<T: Pod> {
    buffer: Buffer,
    stride: usize,
    capacity: u32,
    _element: PhantomData<T>,
}

impl<T: Pod> UploadBuffer<T> {
    pub fn new(
        capacity: u32,
        kind: UploadKind,
        usage: vk::BufferUsageFlags,
        name: &str,
        mem_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let stride = stride_for(size_of::<T>(), kind);
        let size = stride as u64 * capacity as u64;
        let buffer = Buffer::new(
            size,
            usage,
            name,
            MemoryLocation::CpuToGpu,
            mem_allocator,
            device,
        )?;

        Ok(Self {
            buffer,
            stride,
            capacity,
            _element: PhantomData,
        })
    }

    /// Copies `value` into element `index`. An out-of-range index is a
    /// programmer error.
    pub fn copy_data(&mut self, index: u32, value: &T) -> Result<()> {
        assert!(
            index < self.capacity,
            "upload write at {index} outside capacity {}",
            self.capacity
        );
        let stride = self.stride;
        let mapped = self.buffer.mapped_mut()?;
        write_element(mapped, stride, index as usize, bytemuck::bytes_of(value));
        Ok(())
    }

    /// Byte offset of element `index`, as bound via dynamic offsets.
    pub fn offset_of(&self, index: u32) -> u64 {
        index as u64 * self.stride as u64
    }

    pub fn raw(&self) -> vk::Buffer {
        self.buffer.buffer
    }

    pub fn element_size(&self) -> u64 {
        size_of::<T>() as u64
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3, Vec4};

    use super::*;
    use crate::renderer::shader_data::{MaterialData, ObjectData};

    #[test]
    fn constant_stride_rounds_up_to_256() {
        assert_eq!(stride_for(size_of::<ObjectData>(), UploadKind::Constant), 256);
        assert_eq!(stride_for(300, UploadKind::Constant), 512);
        assert_eq!(stride_for(256, UploadKind::Constant), 256);
    }

    #[test]
    fn packed_stride_is_element_size() {
        assert_eq!(stride_for(24, UploadKind::Packed), 24);
    }

    #[test]
    fn element_write_round_trips() {
        let stride = stride_for(size_of::<ObjectData>(), UploadKind::Constant);
        let mut mapped = vec![0u8; stride * 8];

        let value = ObjectData {
            world: Mat4::from_translation(Vec3::new(1.0, -2.0, 3.0)),
        };
        write_element(&mut mapped, stride, 5, bytemuck::bytes_of(&value));

        let start = 5 * stride;
        let read: &ObjectData = bytemuck::from_bytes(&mapped[start..start + size_of::<ObjectData>()]);
        assert_eq!(read.world, value.world);
    }

    #[test]
    fn element_write_leaves_neighbors_untouched() {
        let stride = stride_for(size_of::<MaterialData>(), UploadKind::Constant);
        let mut mapped = vec![0u8; stride * 4];

        let a = MaterialData {
            diffuse_albedo: Vec4::splat(0.25),
            fresnel_r0: Vec3::splat(0.02),
            roughness: 0.9,
        };
        let b = MaterialData {
            diffuse_albedo: Vec4::splat(0.75),
            fresnel_r0: Vec3::splat(0.08),
            roughness: 0.1,
        };
        write_element(&mut mapped, stride, 1, bytemuck::bytes_of(&a));
        write_element(&mut mapped, stride, 2, bytemuck::bytes_of(&b));
        write_element(&mut mapped, stride, 1, bytemuck::bytes_of(&a));

        let at = |index: usize| -> MaterialData {
            let start = index * stride;
            *bytemuck::from_bytes(&mapped[start..start + size_of::<MaterialData>()])
        };
        assert_eq!(at(1).roughness, 0.9);
        assert_eq!(at(2).roughness, 0.1);
        // Slot 0 and 3 were never written.
        assert_eq!(at(0).diffuse_albedo, Vec4::ZERO);
        assert_eq!(at(3).diffuse_albedo, Vec4::ZERO);
    }

    #[test]
    fn same_element_in_distinct_slots_does_not_alias() {
        // One host region per frame slot, as the frame ring lays them out.
        let stride = stride_for(size_of::<ObjectData>(), UploadKind::Constant);
        let mut slots: Vec<Vec<u8>> = (0..3).map(|_| vec![0u8; stride * 4]).collect();

        for (slot_index, slot) in slots.iter_mut().enumerate() {
            let value = ObjectData {
                world: Mat4::from_translation(Vec3::splat(slot_index as f32 + 1.0)),
            };
            write_element(slot, stride, 2, bytemuck::bytes_of(&value));
        }

        for (slot_index, slot) in slots.iter().enumerate() {
            let start = 2 * stride;
            let read: &ObjectData =
                bytemuck::from_bytes(&slot[start..start + size_of::<ObjectData>()]);
            let expected = Mat4::from_translation(Vec3::splat(slot_index as f32 + 1.0));
            assert_eq!(read.world, expected);
        }
    }
}
