use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::Allocator;

use crate::renderer::scene::material::Material;
use crate::renderer::scene::shapes::MeshData;
use crate::renderer::shader_data::{MaterialData, VertexData};
use crate::renderer::upload::Buffer;

pub type SubmeshId = usize;
pub type MaterialId = usize;

/// Where a mesh landed inside the shared vertex and index buffers.
#[derive(Debug, Clone, Copy)]
pub struct Submesh {
    pub index_count: u32,
    pub start_index: u32,
    pub base_vertex: i32,
}

/// Shared geometry and index buffers on the device.
pub struct GeometryBuffers {
    pub vertex: Buffer,
    pub index: Buffer,
}

/// Every mesh in the scene concatenated into one vertex and one index
/// stream, addressed by submesh ranges, plus the material registry. Meshes
/// and materials are looked up by name once at scene-build time and by dense
/// index afterwards.
#[derive(Default)]
pub struct GeometryLibrary {
    vertices: Vec<VertexData>,
    indices: Vec<u16>,
    submeshes: Vec<Submesh>,
    submesh_names: HashMap<String, SubmeshId>,

    materials: Vec<Material>,
    material_names: HashMap<String, MaterialId>,

    buffers: Option<GeometryBuffers>,
}

impl GeometryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a mesh to the shared streams. Indices narrow to 16 bits; a
    /// mesh too large for that is rejected rather than silently wrapped.
    pub fn add_mesh(&mut self, name: impl Into<String>, mesh: &MeshData) -> Result<SubmeshId> {
        let name = name.into();
        if self.submesh_names.contains_key(&name) {
            return Err(eyre!("Mesh {name:?} is already registered"));
        }
        if mesh.vertices.len() > usize::from(u16::MAX) + 1 {
            return Err(eyre!(
                "Mesh {name:?} has {} vertices, more than 16-bit indices can address",
                mesh.vertices.len()
            ));
        }

        let submesh = Submesh {
            index_count: mesh.indices.len() as u32,
            start_index: self.indices.len() as u32,
            base_vertex: self.vertices.len() as i32,
        };

        for &index in &mesh.indices {
            let narrow = u16::try_from(index)
                .map_err(|_| eyre!("Mesh {name:?} index {index} does not fit in 16 bits"))?;
            self.indices.push(narrow);
        }
        self.vertices.extend_from_slice(&mesh.vertices);

        let id = self.submeshes.len();
        self.submeshes.push(submesh);
        self.submesh_names.insert(name, id);
        Ok(id)
    }

    pub fn add_material(&mut self, material: Material) -> Result<MaterialId> {
        if self.material_names.contains_key(&material.name) {
            return Err(eyre!("Material {:?} is already registered", material.name));
        }
        let id = self.materials.len();
        self.material_names.insert(material.name.clone(), id);
        self.materials.push(material);
        Ok(id)
    }

    pub fn submesh_id(&self, name: &str) -> Result<SubmeshId> {
        self.submesh_names
            .get(name)
            .copied()
            .ok_or_else(|| eyre!("Unknown mesh {name:?}"))
    }

    pub fn submesh(&self, id: SubmeshId) -> &Submesh {
        &self.submeshes[id]
    }

    pub fn material_id(&self, name: &str) -> Result<MaterialId> {
        self.material_names
            .get(name)
            .copied()
            .ok_or_else(|| eyre!("Unknown material {name:?}"))
    }

    pub fn material_mut(&mut self, id: MaterialId) -> &mut Material {
        &mut self.materials[id]
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Writes every dirty material through `write` as `(material index,
    /// data)` and consumes one dirty frame from each.
    pub fn write_dirty_materials(
        &mut self,
        mut write: impl FnMut(usize, &MaterialData) -> Result<()>,
    ) -> Result<()> {
        for (index, material) in self.materials.iter_mut().enumerate() {
            if material.is_dirty() {
                write(index, &material.gpu_data())?;
                material.consume_dirty_frame();
            }
        }
        Ok(())
    }

    /// Creates the device buffers and copies the concatenated streams in.
    /// The streams live in host-visible memory, which a scene of this size
    /// never notices.
    pub fn upload(
        &mut self,
        allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<()> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(eyre!("No geometry to upload"));
        }

        let vertex_size = std::mem::size_of_val(self.vertices.as_slice()) as u64;
        let mut vertex = Buffer::new(
            vertex_size,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            "geometry.vertex",
            MemoryLocation::CpuToGpu,
            allocator.clone(),
            device.clone(),
        )?;
        vertex.write_slice(&self.vertices, 0)?;

        let index_size = std::mem::size_of_val(self.indices.as_slice()) as u64;
        let mut index = Buffer::new(
            index_size,
            vk::BufferUsageFlags::INDEX_BUFFER,
            "geometry.index",
            MemoryLocation::CpuToGpu,
            allocator,
            device,
        )?;
        index.write_slice(&self.indices, 0)?;

        log::info!(
            "Uploaded {} vertices / {} indices across {} submeshes",
            self.vertices.len(),
            self.indices.len(),
            self.submeshes.len()
        );

        self.buffers = Some(GeometryBuffers { vertex, index });
        Ok(())
    }

    pub fn buffers(&self) -> Result<&GeometryBuffers> {
        self.buffers
            .as_ref()
            .ok_or_else(|| eyre!("Geometry has not been uploaded yet"))
    }
}
