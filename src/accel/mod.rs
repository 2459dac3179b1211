// src/accel/mod.rs
// Acceleration structures module for wavetrace - per-mesh BLAS, scene TLAS, instance transforms and CPU traversal.
// This module provides the node layouts and builders whose output the wavefront intersect and shadow phases consume.
// RELEVANT FILES:src/scene/mod.rs,src/path_tracing/wavefront/cpu.rs,src/shaders/scene_buffers.wgsl

pub mod blas;
pub mod instancing;
pub mod tlas;
pub mod traverse;
pub mod types;

pub use blas::{node_cost, BlasBuild, BlasBuilder, BlasOffsets, BlasOptions};
pub use instancing::{compute_world_aabb, Instance, InstanceData, INSTANCE_AABB_EPSILON};
pub use tlas::{TlasBuild, TlasBuilder, TLAS_INSTANCE_SOFT_LIMIT};
pub use traverse::{HitRecord, Ray, Traverser};
pub use types::{Aabb, BuildStats, GpuBvhNode, GpuTlasNode};
