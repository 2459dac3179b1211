// src/geometry/validate.rs
// Mesh validation and statistics
// Exists to reject malformed geometry before it reaches the BLAS builder or the scene buffers
// RELEVANT FILES:src/geometry/mesh.rs,src/scene/mod.rs,src/error.rs

use crate::accel::types::Aabb;
use crate::error::{TraceError, TraceResult};

use super::Mesh;

/// Basic statistics collected for a mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshStats {
    pub vertex_count: u32,
    pub triangle_count: u32,
    pub bounds: Aabb,
    pub degenerate_triangles: u32,
    pub average_triangle_area: f32,
    pub memory_usage_bytes: u64,
}

/// Non-fatal issues found while scanning a mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshValidationIssue {
    DegenerateTriangle { triangle: usize },
}

/// Validate triangle indices against the vertex array.
///
/// Returns the list of non-fatal issues (degenerate triangles). Out-of-range
/// indices are fatal. An empty mesh passes validation; rejecting it is the
/// scene builder's call.
pub fn validate_mesh(mesh: &Mesh) -> TraceResult<Vec<MeshValidationIssue>> {
    let vertex_count = mesh.vertices.len();
    let mut issues = Vec::new();

    for (triangle, tri) in mesh.triangles.iter().enumerate() {
        if let Some(&index) = tri.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(TraceError::InvalidTriangle {
                triangle,
                index,
                vertex_count,
            });
        }
        if triangle_area(mesh, triangle) <= 1e-12 {
            issues.push(MeshValidationIssue::DegenerateTriangle { triangle });
        }
    }

    Ok(issues)
}

/// Compute statistics for a mesh with valid indices
pub fn compute_mesh_stats(mesh: &Mesh) -> MeshStats {
    let mut total_area = 0.0f32;
    let mut degenerate_triangles = 0u32;
    for i in 0..mesh.triangles.len() {
        let area = triangle_area(mesh, i);
        if area <= 1e-12 {
            degenerate_triangles += 1;
        }
        total_area += area;
    }

    let average_triangle_area = if mesh.triangles.is_empty() {
        0.0
    } else {
        total_area / mesh.triangles.len() as f32
    };

    MeshStats {
        vertex_count: mesh.vertex_count(),
        triangle_count: mesh.triangle_count(),
        bounds: mesh.bounds(),
        degenerate_triangles,
        average_triangle_area,
        memory_usage_bytes: (std::mem::size_of_val(mesh.vertices.as_slice())
            + std::mem::size_of_val(mesh.triangles.as_slice())) as u64,
    }
}

fn triangle_area(mesh: &Mesh, tri_idx: usize) -> f32 {
    match mesh.triangle_positions(tri_idx) {
        Some([p0, p1, p2]) => (p1 - p0).cross(p2 - p0).length() * 0.5,
        None => 0.0,
    }
}
