// src/geometry/mesh.rs
// Vertex, triangle and mesh records with GPU-compatible layouts
// Exists so asset loaders hand the core one flat vertex array and one indexed triangle array per mesh
// RELEVANT FILES:src/geometry/validate.rs,src/accel/blas.rs,src/shaders/scene_buffers.wgsl

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::accel::types::Aabb;

/// Mesh vertex (matches `Vertex` in scene_buffers.wgsl, 32 bytes).
///
/// The texture coordinate is split around the normal so that both 3-vectors
/// start on a 16-byte boundary in the storage buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub u: f32,
    pub normal: [f32; 3],
    pub v: f32,
}

impl Vertex {
    pub fn new(position: [f32; 3], uv: [f32; 2], normal: [f32; 3]) -> Self {
        Self {
            position,
            u: uv[0],
            normal,
            v: uv[1],
        }
    }

    /// Vertex with only a position; uv and normal are zero
    pub fn at(position: [f32; 3]) -> Self {
        Self::new(position, [0.0; 2], [0.0; 3])
    }

    pub fn uv(&self) -> [f32; 2] {
        [self.u, self.v]
    }

    pub fn pos(&self) -> Vec3 {
        Vec3::from(self.position)
    }
}

/// Indexed triangle with material index (matches `Triangle` in scene_buffers.wgsl, 16 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Triangle {
    pub indices: [u32; 3],
    pub material: u32,
}

impl Triangle {
    pub fn new(indices: [u32; 3], material: u32) -> Self {
        Self { indices, material }
    }
}

impl From<[u32; 3]> for Triangle {
    fn from(indices: [u32; 3]) -> Self {
        Self {
            indices,
            material: 0,
        }
    }
}

/// Triangle mesh: flat vertex array plus indexed triangles
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub triangles: Vec<Triangle>,
}

impl Mesh {
    pub fn new(vertices: Vec<Vertex>, triangles: Vec<Triangle>) -> Self {
        Self {
            vertices,
            triangles,
        }
    }

    /// Build a mesh from bare positions and index triples
    pub fn from_positions(positions: &[[f32; 3]], indices: &[[u32; 3]]) -> Self {
        Self {
            vertices: positions.iter().copied().map(Vertex::at).collect(),
            triangles: indices.iter().copied().map(Triangle::from).collect(),
        }
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn triangle_count(&self) -> u32 {
        self.triangles.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Get triangle corner positions by index
    pub fn triangle_positions(&self, tri_idx: usize) -> Option<[Vec3; 3]> {
        let tri = self.triangles.get(tri_idx)?;
        let v0 = self.vertices.get(tri.indices[0] as usize)?.pos();
        let v1 = self.vertices.get(tri.indices[1] as usize)?.pos();
        let v2 = self.vertices.get(tri.indices[2] as usize)?.pos();
        Some([v0, v1, v2])
    }

    /// Bounds of all vertices (empty AABB for an empty mesh)
    pub fn bounds(&self) -> Aabb {
        let mut aabb = Aabb::empty();
        for v in &self.vertices {
            aabb.expand_point(v.pos());
        }
        aabb
    }

    /// Assign one material index to every triangle
    pub fn with_material(mut self, material: u32) -> Self {
        for tri in &mut self.triangles {
            tri.material = material;
        }
        self
    }
}

/// Reusable builder for common test meshes
pub struct MeshBuilder;

impl MeshBuilder {
    /// Single triangle in the z=0 plane
    pub fn triangle() -> Mesh {
        Mesh::from_positions(
            &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0]],
            &[[0, 1, 2]],
        )
    }

    /// Unit quad in the z=0 plane centred on the origin (2 triangles)
    pub fn quad() -> Mesh {
        Mesh::from_positions(
            &[
                [-1.0, -1.0, 0.0],
                [1.0, -1.0, 0.0],
                [1.0, 1.0, 0.0],
                [-1.0, 1.0, 0.0],
            ],
            &[[0, 1, 2], [0, 2, 3]],
        )
    }

    /// Axis-aligned cube spanning [-h, h] on every axis (12 triangles, 8 vertices)
    pub fn cube(half_extent: f32) -> Mesh {
        let h = half_extent;
        Mesh::from_positions(
            &[
                [-h, -h, -h],
                [h, -h, -h],
                [h, h, -h],
                [-h, h, -h],
                [-h, -h, h],
                [h, -h, h],
                [h, h, h],
                [-h, h, h],
            ],
            &[
                // Front face
                [0, 1, 2],
                [0, 2, 3],
                // Right face
                [1, 5, 6],
                [1, 6, 2],
                // Back face
                [5, 4, 7],
                [5, 7, 6],
                // Left face
                [4, 0, 3],
                [4, 3, 7],
                // Top face
                [3, 2, 6],
                [3, 6, 7],
                // Bottom face
                [4, 5, 1],
                [4, 1, 0],
            ],
        )
    }

    /// Regular grid of `n x n` quads on the y=0 plane spanning [-size/2, size/2]
    pub fn grid(n: u32, size: f32) -> Mesh {
        let n = n.max(1);
        let step = size / n as f32;
        let origin = -size * 0.5;
        let mut positions = Vec::with_capacity(((n + 1) * (n + 1)) as usize);
        for z in 0..=n {
            for x in 0..=n {
                positions.push([origin + x as f32 * step, 0.0, origin + z as f32 * step]);
            }
        }
        let row = n + 1;
        let mut indices = Vec::with_capacity((n * n * 2) as usize);
        for z in 0..n {
            for x in 0..n {
                let i = z * row + x;
                indices.push([i, i + row, i + 1]);
                indices.push([i + 1, i + row, i + row + 1]);
            }
        }
        let mut mesh = Mesh::from_positions(&positions, &indices);
        for v in &mut mesh.vertices {
            v.normal = [0.0, 1.0, 0.0];
        }
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_and_triangle_layout() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(std::mem::size_of::<Triangle>(), 16);

        let v = Vertex::new([1.0, 2.0, 3.0], [0.25, 0.75], [0.0, 1.0, 0.0]);
        assert_eq!(v.uv(), [0.25, 0.75]);
        assert_eq!(v.pos(), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn cube_mesh_counts_and_bounds() {
        let mesh = MeshBuilder::cube(1.0);
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(mesh.triangle_count(), 12);
        let b = mesh.bounds();
        assert_eq!(b.min, Vec3::splat(-1.0));
        assert_eq!(b.max, Vec3::splat(1.0));
    }

    #[test]
    fn grid_mesh_counts() {
        let mesh = MeshBuilder::grid(4, 2.0);
        assert_eq!(mesh.vertex_count(), 25);
        assert_eq!(mesh.triangle_count(), 32);
        assert!(mesh.triangle_positions(31).is_some());
        assert!(mesh.triangle_positions(32).is_none());
    }

    #[test]
    fn with_material_tags_every_triangle() {
        let mesh = MeshBuilder::quad().with_material(7);
        assert!(mesh.triangles.iter().all(|t| t.material == 7));
    }
}
