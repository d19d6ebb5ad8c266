use std::collections::HashMap;
use std::f32::consts::TAU;

use glam::Vec3;

use crate::renderer::shader_data::VertexData;

/// Procedural mesh before it joins the shared geometry buffers. Indices are
/// 32-bit here; the geometry library narrows them on upload.
#[derive(Debug, Clone)]
pub struct MeshData {
    pub vertices: Vec<VertexData>,
    pub indices: Vec<u32>,
}

/// Axis-aligned box centered on the origin, 4 vertices per face so every
/// face gets a flat normal.
pub fn make_box(width: f32, height: f32, depth: f32) -> MeshData {
    let w2 = 0.5 * width;
    let h2 = 0.5 * height;
    let d2 = 0.5 * depth;

    let face = |positions: [[f32; 3]; 4], normal: [f32; 3]| {
        positions.map(|p| VertexData::new(Vec3::from(p), Vec3::from(normal)))
    };

    let faces = [
        // Front
        face(
            [
                [-w2, -h2, -d2],
                [-w2, h2, -d2],
                [w2, h2, -d2],
                [w2, -h2, -d2],
            ],
            [0.0, 0.0, -1.0],
        ),
        // Back
        face(
            [
                [-w2, -h2, d2],
                [w2, -h2, d2],
                [w2, h2, d2],
                [-w2, h2, d2],
            ],
            [0.0, 0.0, 1.0],
        ),
        // Top
        face(
            [
                [-w2, h2, -d2],
                [-w2, h2, d2],
                [w2, h2, d2],
                [w2, h2, -d2],
            ],
            [0.0, 1.0, 0.0],
        ),
        // Bottom
        face(
            [
                [-w2, -h2, -d2],
                [w2, -h2, -d2],
                [w2, -h2, d2],
                [-w2, -h2, d2],
            ],
            [0.0, -1.0, 0.0],
        ),
        // Left
        face(
            [
                [-w2, -h2, d2],
                [-w2, h2, d2],
                [-w2, h2, -d2],
                [-w2, -h2, -d2],
            ],
            [-1.0, 0.0, 0.0],
        ),
        // Right
        face(
            [
                [w2, -h2, -d2],
                [w2, h2, -d2],
                [w2, h2, d2],
                [w2, -h2, d2],
            ],
            [1.0, 0.0, 0.0],
        ),
    ];

    let vertices = faces.into_iter().flatten().collect();
    let indices = (0..6u32)
        .flat_map(|f| {
            let base = f * 4;
            [base, base + 1, base + 2, base, base + 2, base + 3]
        })
        .collect();

    MeshData { vertices, indices }
}

/// Flat grid in the XZ plane centered on the origin, `rows` x `columns`
/// vertices with +Y normals.
pub fn make_grid(width: f32, depth: f32, rows: u32, columns: u32) -> MeshData {
    debug_assert!(rows >= 2 && columns >= 2);

    let half_width = 0.5 * width;
    let half_depth = 0.5 * depth;
    let dx = width / (columns - 1) as f32;
    let dz = depth / (rows - 1) as f32;

    let mut vertices = Vec::with_capacity((rows * columns) as usize);
    for i in 0..rows {
        let z = half_depth - i as f32 * dz;
        for j in 0..columns {
            let x = -half_width + j as f32 * dx;
            vertices.push(VertexData::new(Vec3::new(x, 0.0, z), Vec3::Y));
        }
    }

    let mut indices = Vec::with_capacity(((rows - 1) * (columns - 1) * 6) as usize);
    for i in 0..rows - 1 {
        for j in 0..columns - 1 {
            let row = i * columns + j;
            let next_row = (i + 1) * columns + j;
            indices.extend_from_slice(&[row, row + 1, next_row]);
            indices.extend_from_slice(&[next_row, row + 1, next_row + 1]);
        }
    }

    MeshData { vertices, indices }
}

/// Grid displaced into rolling hills, with analytic normals so lighting does
/// not need a neighbor pass.
pub fn make_hills(width: f32, depth: f32, rows: u32, columns: u32) -> MeshData {
    let mut mesh = make_grid(width, depth, rows, columns);
    for vertex in &mut mesh.vertices {
        let (x, z) = (vertex.position.x, vertex.position.z);
        vertex.position.y = hill_height(x, z);
        vertex.normal = hill_normal(x, z);
    }
    mesh
}

pub fn hill_height(x: f32, z: f32) -> f32 {
    0.3 * (z * (0.1 * x).sin() + x * (0.1 * z).cos())
}

fn hill_normal(x: f32, z: f32) -> Vec3 {
    // Partial derivatives of the height function.
    Vec3::new(
        -0.03 * z * (0.1 * x).cos() - 0.3 * (0.1 * z).cos(),
        1.0,
        -0.3 * (0.1 * x).sin() + 0.03 * x * (0.1 * z).sin(),
    )
    .normalize()
}

/// Open-ended truncated cone plus caps, centered on the origin with its axis
/// along Y.
pub fn make_cylinder(
    bottom_radius: f32,
    top_radius: f32,
    height: f32,
    slice_count: u32,
    stack_count: u32,
) -> MeshData {
    debug_assert!(slice_count >= 3 && stack_count >= 1);

    let mut vertices = Vec::new();
    let mut indices = Vec::new();

    let stack_height = height / stack_count as f32;
    let radius_step = (top_radius - bottom_radius) / stack_count as f32;
    let d_theta = TAU / slice_count as f32;

    // Side rings, bottom to top. Each ring duplicates its first vertex so
    // the seam closes with distinct indices.
    for i in 0..=stack_count {
        let y = -0.5 * height + i as f32 * stack_height;
        let radius = bottom_radius + i as f32 * radius_step;
        for j in 0..=slice_count {
            let (sin, cos) = (j as f32 * d_theta).sin_cos();
            let normal =
                Vec3::new(height * cos, bottom_radius - top_radius, height * sin).normalize();
            vertices.push(VertexData::new(
                Vec3::new(radius * cos, y, radius * sin),
                normal,
            ));
        }
    }

    let ring_vertex_count = slice_count + 1;
    for i in 0..stack_count {
        for j in 0..slice_count {
            indices.extend_from_slice(&[
                i * ring_vertex_count + j,
                (i + 1) * ring_vertex_count + j,
                (i + 1) * ring_vertex_count + j + 1,
            ]);
            indices.extend_from_slice(&[
                i * ring_vertex_count + j,
                (i + 1) * ring_vertex_count + j + 1,
                i * ring_vertex_count + j + 1,
            ]);
        }
    }

    build_cylinder_cap(
        &mut vertices,
        &mut indices,
        top_radius,
        0.5 * height,
        slice_count,
        true,
    );
    build_cylinder_cap(
        &mut vertices,
        &mut indices,
        bottom_radius,
        -0.5 * height,
        slice_count,
        false,
    );

    MeshData { vertices, indices }
}

fn build_cylinder_cap(
    vertices: &mut Vec<VertexData>,
    indices: &mut Vec<u32>,
    radius: f32,
    y: f32,
    slice_count: u32,
    top: bool,
) {
    let base = vertices.len() as u32;
    let normal = if top { Vec3::Y } else { -Vec3::Y };
    let d_theta = TAU / slice_count as f32;

    for j in 0..=slice_count {
        let (sin, cos) = (j as f32 * d_theta).sin_cos();
        vertices.push(VertexData::new(
            Vec3::new(radius * cos, y, radius * sin),
            normal,
        ));
    }
    let center = vertices.len() as u32;
    vertices.push(VertexData::new(Vec3::new(0.0, y, 0.0), normal));

    for j in 0..slice_count {
        if top {
            indices.extend_from_slice(&[center, base + j + 1, base + j]);
        } else {
            indices.extend_from_slice(&[center, base + j, base + j + 1]);
        }
    }
}

/// Sphere built by subdividing an icosahedron, so triangles keep a uniform
/// area instead of pinching at the poles.
pub fn make_geosphere(radius: f32, subdivisions: u32) -> MeshData {
    const X: f32 = 0.525_731;
    const Z: f32 = 0.850_651;

    let mut positions: Vec<Vec3> = vec![
        Vec3::new(-X, 0.0, Z),
        Vec3::new(X, 0.0, Z),
        Vec3::new(-X, 0.0, -Z),
        Vec3::new(X, 0.0, -Z),
        Vec3::new(0.0, Z, X),
        Vec3::new(0.0, Z, -X),
        Vec3::new(0.0, -Z, X),
        Vec3::new(0.0, -Z, -X),
        Vec3::new(Z, X, 0.0),
        Vec3::new(-Z, X, 0.0),
        Vec3::new(Z, -X, 0.0),
        Vec3::new(-Z, -X, 0.0),
    ];
    let mut indices: Vec<u32> = vec![
        1, 4, 0, 4, 9, 0, 4, 5, 9, 8, 5, 4, 1, 8, 4, //
        1, 10, 8, 10, 3, 8, 8, 3, 5, 3, 2, 5, 3, 7, 2, //
        3, 10, 7, 10, 6, 7, 6, 11, 7, 6, 0, 11, 6, 1, 0, //
        10, 1, 6, 11, 0, 9, 2, 11, 9, 5, 2, 9, 11, 2, 7,
    ];

    for _ in 0..subdivisions.min(6) {
        let mut midpoints: HashMap<(u32, u32), u32> = HashMap::new();
        let mut next = Vec::with_capacity(indices.len() * 4);
        for tri in indices.chunks_exact(3) {
            let m01 = midpoint(&mut positions, &mut midpoints, tri[0], tri[1]);
            let m12 = midpoint(&mut positions, &mut midpoints, tri[1], tri[2]);
            let m02 = midpoint(&mut positions, &mut midpoints, tri[0], tri[2]);
            next.extend_from_slice(&[
                tri[0], m01, m02, //
                m01, tri[1], m12, //
                m02, m12, tri[2], //
                m01, m12, m02,
            ]);
        }
        indices = next;
    }

    let vertices = positions
        .into_iter()
        .map(|position| {
            let normal = position.normalize();
            VertexData::new(normal * radius, normal)
        })
        .collect();

    MeshData { vertices, indices }
}

/// Shared midpoints keep subdivided edges watertight.
fn midpoint(
    positions: &mut Vec<Vec3>,
    cache: &mut HashMap<(u32, u32), u32>,
    a: u32,
    b: u32,
) -> u32 {
    let key = (a.min(b), a.max(b));
    *cache.entry(key).or_insert_with(|| {
        let index = positions.len() as u32;
        let mid = (positions[a as usize] + positions[b as usize]) * 0.5;
        positions.push(mid);
        index
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_indices_in_bounds(mesh: &MeshData) {
        let count = mesh.vertices.len() as u32;
        assert!(mesh.indices.iter().all(|&i| i < count));
        assert_eq!(mesh.indices.len() % 3, 0);
    }

    #[test]
    fn box_has_a_flat_quad_per_face() {
        let mesh = make_box(5.0, 2.0, 5.0);
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.indices.len(), 36);
        assert_indices_in_bounds(&mesh);

        for vertex in &mesh.vertices {
            assert!(vertex.position.x.abs() <= 2.5);
            assert!(vertex.position.y.abs() <= 1.0);
            assert!((vertex.normal.length() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn grid_counts_and_extents() {
        let mesh = make_grid(160.0, 160.0, 100, 100);
        assert_eq!(mesh.vertices.len(), 100 * 100);
        assert_eq!(mesh.indices.len(), 99 * 99 * 6);
        assert_indices_in_bounds(&mesh);

        let min_x = mesh
            .vertices
            .iter()
            .map(|v| v.position.x)
            .fold(f32::INFINITY, f32::min);
        let max_z = mesh
            .vertices
            .iter()
            .map(|v| v.position.z)
            .fold(f32::NEG_INFINITY, f32::max);
        assert!((min_x + 80.0).abs() < 1e-3);
        assert!((max_z - 80.0).abs() < 1e-3);
        assert!(mesh.vertices.iter().all(|v| v.normal == Vec3::Y));
    }

    #[test]
    fn hills_displace_height_and_normals() {
        let mesh = make_hills(160.0, 160.0, 50, 50);
        for vertex in &mesh.vertices {
            let expected = hill_height(vertex.position.x, vertex.position.z);
            assert!((vertex.position.y - expected).abs() < 1e-5);
            assert!((vertex.normal.length() - 1.0).abs() < 1e-5);
            assert!(vertex.normal.y > 0.0);
        }
    }

    #[test]
    fn cylinder_counts() {
        let slices = 10;
        let stacks = 10;
        let mesh = make_cylinder(0.5, 0.3, 3.0, slices, stacks);

        let ring = slices + 1;
        let side_vertices = (stacks + 1) * ring;
        let cap_vertices = 2 * (ring + 1);
        assert_eq!(mesh.vertices.len() as u32, side_vertices + cap_vertices);

        let side_indices = stacks * slices * 6;
        let cap_indices = 2 * slices * 3;
        assert_eq!(mesh.indices.len() as u32, side_indices + cap_indices);
        assert_indices_in_bounds(&mesh);
    }

    #[test]
    fn cylinder_radius_tapers_with_height() {
        let mesh = make_cylinder(0.5, 0.3, 3.0, 10, 10);
        for vertex in &mesh.vertices {
            let radial = Vec3::new(vertex.position.x, 0.0, vertex.position.z).length();
            // Radius interpolates linearly from 0.5 at the bottom ring to
            // 0.3 at the top; caps include a zero-radius center vertex.
            let t = (vertex.position.y + 1.5) / 3.0;
            let expected = 0.5 + (0.3 - 0.5) * t;
            assert!(radial < expected + 1e-4);
        }
    }

    #[test]
    fn geosphere_counts_follow_subdivision() {
        for subdivisions in 0..4u32 {
            let mesh = make_geosphere(1.0, subdivisions);
            let triangles = 20 * 4u32.pow(subdivisions);
            assert_eq!(mesh.indices.len() as u32, triangles * 3);
            assert_eq!(mesh.vertices.len() as u32, 10 * 4u32.pow(subdivisions) + 2);
            assert_indices_in_bounds(&mesh);
        }
    }

    #[test]
    fn geosphere_vertices_sit_on_the_sphere() {
        let radius = 2.5;
        let mesh = make_geosphere(radius, 3);
        for vertex in &mesh.vertices {
            assert!((vertex.position.length() - radius).abs() < 1e-4);
            // Normal points radially outward.
            assert!((vertex.normal - vertex.position / radius).length() < 1e-4);
        }
    }
}
