//! Wavefront path tracing core: BLAS/TLAS construction over instanced meshes
//! and the ray/hit/shadow queue protocol that drives the phase kernels.
//!
//! Rust: wgpu 0.19 for the device path, rayon for the host executor.

pub mod accel;
pub mod error;
pub mod geometry;
pub mod gpu;
pub mod path_tracing;
pub mod scene;

pub use accel::{
    Aabb, BlasBuilder, BlasOptions, GpuBvhNode, GpuTlasNode, HitRecord, Instance, InstanceData,
    Ray, TlasBuilder, Traverser,
};
pub use error::{TraceError, TraceResult};
pub use geometry::{Mesh, MeshBuilder, Triangle, Vertex};
pub use gpu::GpuContext;
pub use path_tracing::wavefront::queues::{
    compute_dispatch_size, FrameParams, HitItem, QueueHeader, QueueKind, RayItem, ShadowItem,
    WorkQueue, MISS_MATERIAL,
};
pub use path_tracing::wavefront::{
    CpuWavefront, FrameInfo, FrameStats, ShadeResult, ShadingKernels, WavefrontScheduler,
};
pub use path_tracing::TracerParams;
pub use scene::{GpuScene, SceneBuffers, SceneBuilder, SceneInfo};
