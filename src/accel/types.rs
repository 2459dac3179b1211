// src/accel/types.rs
// Core types for BVH acceleration structures - AABB, linearized nodes and build statistics.
// This file exists to provide the GPU-compatible node layouts shared by the BLAS and TLAS builders.
// RELEVANT FILES:src/accel/blas.rs,src/accel/tlas.rs,src/shaders/scene_buffers.wgsl

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Axis-aligned bounding box used during construction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create empty AABB (inverted bounds for union operations)
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_arrays(min: [f32; 3], max: [f32; 3]) -> Self {
        Self::new(Vec3::from(min), Vec3::from(max))
    }

    pub fn expand_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Grow every face outward by `eps`
    pub fn padded(&self, eps: f32) -> Aabb {
        Aabb::new(self.min - Vec3::splat(eps), self.max + Vec3::splat(eps))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    /// Check if AABB is valid (min <= max)
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    /// Half of the surface area; zero for invalid boxes
    pub fn half_area(&self) -> f32 {
        if !self.is_valid() {
            return 0.0;
        }
        let e = self.extent();
        e.x * (e.y + e.z) + e.y * e.z
    }

    pub fn surface_area(&self) -> f32 {
        2.0 * self.half_area()
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    pub fn contains_aabb(&self, other: &Aabb) -> bool {
        self.contains_point(other.min) && self.contains_point(other.max)
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

/// Linearized BLAS node - GPU compatible layout matching `BvhNode` in scene_buffers.wgsl (32 bytes)
///
/// `tri_count == 0` marks an internal node whose children occupy slots
/// `index` and `index + 1`; otherwise `index` is the first triangle of the leaf.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuBvhNode {
    pub a: [f32; 3],
    pub tri_count: u32,
    pub b: [f32; 3],
    pub index: u32,
}

impl GpuBvhNode {
    pub fn internal(aabb: &Aabb, first_child: u32) -> Self {
        Self {
            a: aabb.min.to_array(),
            tri_count: 0,
            b: aabb.max.to_array(),
            index: first_child,
        }
    }

    pub fn leaf(aabb: &Aabb, first_tri: u32, tri_count: u32) -> Self {
        Self {
            a: aabb.min.to_array(),
            tri_count,
            b: aabb.max.to_array(),
            index: first_tri,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.tri_count > 0
    }

    pub fn aabb(&self) -> Aabb {
        Aabb::from_arrays(self.a, self.b)
    }

    /// Child slots for internal nodes
    pub fn children(&self) -> Option<(u32, u32)> {
        if self.is_leaf() {
            None
        } else {
            Some((self.index, self.index + 1))
        }
    }

    /// Triangle range for leaf nodes (first, count)
    pub fn triangles(&self) -> Option<(u32, u32)> {
        if self.is_leaf() {
            Some((self.index, self.tri_count))
        } else {
            None
        }
    }
}

/// Linearized TLAS node - GPU compatible layout matching `TlasNode` in scene_buffers.wgsl (32 bytes)
///
/// Leaves reference a scene instance by id; internal nodes reference their
/// first child, the second child sits at `index + 1`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuTlasNode {
    pub a: [f32; 3],
    pub is_leaf: u32,
    pub b: [f32; 3],
    pub index: u32,
}

impl GpuTlasNode {
    pub fn leaf(aabb: &Aabb, instance: u32) -> Self {
        Self {
            a: aabb.min.to_array(),
            is_leaf: 1,
            b: aabb.max.to_array(),
            index: instance,
        }
    }

    pub fn internal(aabb: &Aabb, first_child: u32) -> Self {
        Self {
            a: aabb.min.to_array(),
            is_leaf: 0,
            b: aabb.max.to_array(),
            index: first_child,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.is_leaf != 0
    }

    pub fn aabb(&self) -> Aabb {
        Aabb::from_arrays(self.a, self.b)
    }

    pub fn children(&self) -> Option<(u32, u32)> {
        if self.is_leaf() {
            None
        } else {
            Some((self.index, self.index + 1))
        }
    }

    pub fn instance(&self) -> Option<u32> {
        if self.is_leaf() {
            Some(self.index)
        } else {
            None
        }
    }
}

// Verify the struct layouts match the WGSL structs at compile time
const _: () = {
    assert!(std::mem::size_of::<GpuBvhNode>() == 32);
    assert!(std::mem::size_of::<GpuTlasNode>() == 32);
};

/// Statistics from BVH construction
#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    pub build_time_ms: f32,
    pub primitive_count: u32,
    pub node_count: u32,
    pub leaf_count: u32,
    pub internal_count: u32,
    pub max_depth: u32,
    pub avg_leaf_size: f32,
}

impl BuildStats {
    pub(crate) fn finish(&mut self, started: std::time::Instant) {
        self.build_time_ms = started.elapsed().as_secs_f32() * 1000.0;
        self.internal_count = self.node_count - self.leaf_count;
        if self.leaf_count > 0 {
            self.avg_leaf_size = self.primitive_count as f32 / self.leaf_count as f32;
        }
    }
}
