// src/geometry/mod.rs
// Geometry store: flat per-mesh vertex and indexed triangle arrays
// Exists to feed the BLAS builder and the shared scene geometry buffers
// RELEVANT FILES:src/geometry/mesh.rs,src/geometry/validate.rs,src/accel/blas.rs,src/scene/mod.rs

mod mesh;
mod validate;

pub use mesh::{Mesh, MeshBuilder, Triangle, Vertex};
pub use validate::{compute_mesh_stats, validate_mesh, MeshStats, MeshValidationIssue};
