// src/accel/blas.rs
// Per-mesh bottom-level BVH builder: candidate-plane binary split with a surface-area cost, linearized breadth-first.
// This file exists to turn one mesh's triangle list into a flat node array plus the matching triangle permutation.
// RELEVANT FILES:src/accel/types.rs,src/scene/mod.rs,src/accel/traverse.rs,src/shaders/wavefront_queues.wgsl

use std::collections::VecDeque;
use std::time::Instant;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::accel::types::{Aabb, BuildStats, GpuBvhNode};
use crate::error::{TraceError, TraceResult};
use crate::geometry::{Mesh, Triangle, Vertex};

/// Options for BLAS construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlasOptions {
    /// Nodes at this depth are never split
    pub max_depth: u32,
    /// Fractional split-plane positions tried along every axis
    pub split_candidates: Vec<f32>,
    /// Padding applied to every node box so flat geometry keeps a non-zero extent
    pub bound_epsilon: f32,
    /// Nodes holding this many triangles or fewer stay leaves
    pub max_leaf_triangles: u32,
}

impl Default for BlasOptions {
    fn default() -> Self {
        Self {
            max_depth: 16,
            split_candidates: vec![0.20, 0.35, 0.50, 0.65, 0.80],
            bound_epsilon: 1e-5,
            max_leaf_triangles: 2,
        }
    }
}

impl BlasOptions {
    pub fn validate(&self) -> TraceResult<()> {
        if self.split_candidates.is_empty() {
            return Err(TraceError::config("split_candidates must not be empty"));
        }
        if let Some(s) = self
            .split_candidates
            .iter()
            .find(|s| !(**s > 0.0 && **s < 1.0))
        {
            return Err(TraceError::config(format!(
                "split candidate {s} outside (0, 1)"
            )));
        }
        if !(self.bound_epsilon >= 0.0) {
            return Err(TraceError::config("bound_epsilon must be >= 0"));
        }
        Ok(())
    }
}

/// Offsets of a BLAS inside the combined scene buffers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlasOffsets {
    /// Slot of this BLAS's root in the combined node array
    pub node: u32,
    /// Position of this BLAS's first triangle in the combined triangle array
    pub triangle: u32,
}

/// Result of one BLAS build
#[derive(Debug, Clone)]
pub struct BlasBuild {
    /// Breadth-first node array; indices are already rebased by the build offsets
    pub nodes: Vec<GpuBvhNode>,
    /// Input triangles permuted into leaf order
    pub triangles: Vec<Triangle>,
    /// `order[k]` is the input position of `triangles[k]`
    pub order: Vec<u32>,
    /// Slot of the root node in the combined node array
    pub root_offset: u32,
    pub bounds: Aabb,
    pub stats: BuildStats,
}

impl BlasBuild {
    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    pub fn leaf_count(&self) -> u32 {
        self.nodes.iter().filter(|n| n.is_leaf()).count() as u32
    }

    /// Node stored at an absolute slot of the combined array
    pub fn node(&self, slot: u32) -> Option<&GpuBvhNode> {
        self.nodes.get(slot.checked_sub(self.root_offset)? as usize)
    }
}

/// Cost of a node holding `count` triangles inside `bounds`
pub fn node_cost(bounds: &Aabb, count: usize) -> f32 {
    count as f32 * bounds.surface_area()
}

/// Per-build triangle record
#[derive(Debug, Clone, Copy)]
struct BvhTriangle {
    index: u32,
    min: Vec3,
    max: Vec3,
    mid: Vec3,
}

/// Build-time node; children are arena handles
#[derive(Debug)]
struct BuildNode {
    bounds: Aabb,
    tris: Vec<u32>,
    children: Option<(usize, usize)>,
    depth: u32,
}

struct Split {
    left: Vec<u32>,
    right: Vec<u32>,
    left_bounds: Aabb,
    right_bounds: Aabb,
}

/// CPU BLAS builder
#[derive(Debug, Clone, Default)]
pub struct BlasBuilder {
    options: BlasOptions,
}

impl BlasBuilder {
    pub fn new(options: BlasOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BlasOptions {
        &self.options
    }

    /// Build a standalone BLAS (root at slot 0, first triangle at 0)
    pub fn build(&self, triangles: &[Triangle], vertices: &[Vertex]) -> TraceResult<BlasBuild> {
        self.build_at(triangles, vertices, BlasOffsets::default())
    }

    pub fn build_mesh(&self, mesh: &Mesh) -> TraceResult<BlasBuild> {
        self.build(&mesh.triangles, &mesh.vertices)
    }

    /// Build a BLAS whose node and triangle indices point into combined buffers
    pub fn build_at(
        &self,
        triangles: &[Triangle],
        vertices: &[Vertex],
        offsets: BlasOffsets,
    ) -> TraceResult<BlasBuild> {
        let started = Instant::now();
        let bvh_tris = prepare_triangles(triangles, vertices)?;

        let mut stats = BuildStats {
            primitive_count: triangles.len() as u32,
            ..Default::default()
        };

        if bvh_tris.is_empty() {
            return Ok(BlasBuild {
                nodes: Vec::new(),
                triangles: Vec::new(),
                order: Vec::new(),
                root_offset: offsets.node,
                bounds: Aabb::empty(),
                stats,
            });
        }

        let arena = self.build_tree(&bvh_tris, &mut stats);
        let (nodes, order) = linearize(&arena, &bvh_tris, offsets);

        stats.node_count = nodes.len() as u32;
        stats.leaf_count = nodes.iter().filter(|n| n.is_leaf()).count() as u32;
        stats.finish(started);

        log::debug!(
            "BLAS built: {} triangles, {} nodes, {} leaves, depth {}, {:.3} ms",
            stats.primitive_count,
            stats.node_count,
            stats.leaf_count,
            stats.max_depth,
            stats.build_time_ms
        );

        Ok(BlasBuild {
            triangles: order.iter().map(|&i| triangles[i as usize]).collect(),
            order,
            root_offset: offsets.node,
            bounds: arena[0].bounds,
            nodes,
            stats,
        })
    }

    /// Grow the build tree from a single root covering every triangle
    fn build_tree(&self, bvh_tris: &[BvhTriangle], stats: &mut BuildStats) -> Vec<BuildNode> {
        let all: Vec<u32> = (0..bvh_tris.len() as u32).collect();
        let mut arena = vec![BuildNode {
            bounds: self.bounds_of(bvh_tris, &all),
            tris: all,
            children: None,
            depth: 0,
        }];

        let mut pending = vec![0usize];
        while let Some(handle) = pending.pop() {
            let node = &arena[handle];
            stats.max_depth = stats.max_depth.max(node.depth);
            if node.tris.len() as u32 <= self.options.max_leaf_triangles
                || node.depth >= self.options.max_depth
            {
                continue;
            }

            let Some(split) = self.find_split(bvh_tris, node) else {
                continue;
            };

            let depth = node.depth + 1;
            let left = arena.len();
            arena.push(BuildNode {
                bounds: split.left_bounds,
                tris: split.left,
                children: None,
                depth,
            });
            arena.push(BuildNode {
                bounds: split.right_bounds,
                tris: split.right,
                children: None,
                depth,
            });
            arena[handle].children = Some((left, left + 1));
            arena[handle].tris = Vec::new();
            pending.push(left + 1);
            pending.push(left);
        }

        arena
    }

    /// Try every axis and candidate plane; keep the lowest summed child cost
    /// that strictly beats the node's own cost
    fn find_split(&self, bvh_tris: &[BvhTriangle], node: &BuildNode) -> Option<Split> {
        let mut best_cost = node_cost(&node.bounds, node.tris.len());
        let mut best: Option<Split> = None;

        for axis in 0..3 {
            for &s in &self.options.split_candidates {
                let plane = node.bounds.min * (1.0 - s) + node.bounds.max * s;
                let (left, right): (Vec<u32>, Vec<u32>) = node
                    .tris
                    .iter()
                    .partition(|&&t| bvh_tris[t as usize].mid[axis] < plane[axis]);
                if left.is_empty() || right.is_empty() {
                    continue;
                }

                let left_bounds = self.bounds_of(bvh_tris, &left);
                let right_bounds = self.bounds_of(bvh_tris, &right);
                let cost =
                    node_cost(&left_bounds, left.len()) + node_cost(&right_bounds, right.len());
                if cost < best_cost {
                    best_cost = cost;
                    best = Some(Split {
                        left,
                        right,
                        left_bounds,
                        right_bounds,
                    });
                }
            }
        }

        best
    }

    fn bounds_of(&self, bvh_tris: &[BvhTriangle], tris: &[u32]) -> Aabb {
        let mut aabb = Aabb::empty();
        for &t in tris {
            let tri = &bvh_tris[t as usize];
            aabb.expand_point(tri.min);
            aabb.expand_point(tri.max);
        }
        aabb.padded(self.options.bound_epsilon)
    }
}

fn prepare_triangles(triangles: &[Triangle], vertices: &[Vertex]) -> TraceResult<Vec<BvhTriangle>> {
    triangles
        .iter()
        .enumerate()
        .map(|(i, tri)| {
            let mut min = Vec3::splat(f32::INFINITY);
            let mut max = Vec3::splat(f32::NEG_INFINITY);
            for &idx in &tri.indices {
                let v = vertices
                    .get(idx as usize)
                    .ok_or(TraceError::InvalidTriangle {
                        triangle: i,
                        index: idx,
                        vertex_count: vertices.len(),
                    })?;
                min = min.min(v.pos());
                max = max.max(v.pos());
            }
            Ok(BvhTriangle {
                index: i as u32,
                min,
                max,
                mid: (min + max) * 0.5,
            })
        })
        .collect()
}

/// Flatten the build tree breadth-first.
///
/// An internal node popped as the j-th internal node gets children at
/// `1 + 2j` and `2 + 2j` because children are enqueued in the same order
/// their slots are reserved.
fn linearize(
    arena: &[BuildNode],
    bvh_tris: &[BvhTriangle],
    offsets: BlasOffsets,
) -> (Vec<GpuBvhNode>, Vec<u32>) {
    let mut nodes = Vec::with_capacity(arena.len());
    let mut order = Vec::with_capacity(bvh_tris.len());
    let mut next_child = 1u32;

    let mut queue = VecDeque::from([0usize]);
    while let Some(handle) = queue.pop_front() {
        let node = &arena[handle];
        match node.children {
            None => {
                let first = offsets.triangle + order.len() as u32;
                nodes.push(GpuBvhNode::leaf(&node.bounds, first, node.tris.len() as u32));
                order.extend(node.tris.iter().map(|&t| bvh_tris[t as usize].index));
            }
            Some((left, right)) => {
                nodes.push(GpuBvhNode::internal(&node.bounds, offsets.node + next_child));
                next_child += 2;
                queue.push_back(left);
                queue.push_back(right);
            }
        }
    }

    (nodes, order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::MeshBuilder;

    #[test]
    fn default_options_validate() {
        BlasOptions::default().validate().unwrap();
        let bad = BlasOptions {
            split_candidates: vec![0.5, 1.5],
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn cost_prefers_halved_box() {
        let parent = Aabb::new(Vec3::ZERO, Vec3::splat(2.0));
        let left = Aabb::new(Vec3::ZERO, Vec3::new(1.0, 2.0, 2.0));
        let right = Aabb::new(Vec3::new(1.0, 0.0, 0.0), Vec3::splat(2.0));
        assert_eq!(node_cost(&parent, 6), 144.0);
        assert_eq!(node_cost(&left, 3) + node_cost(&right, 3), 96.0);
    }

    #[test]
    fn single_triangle_is_one_leaf() {
        let mesh = MeshBuilder::triangle();
        let blas = BlasBuilder::default().build_mesh(&mesh).unwrap();
        assert_eq!(blas.nodes.len(), 1);
        assert_eq!(blas.nodes[0].triangles(), Some((0, 1)));
        assert_eq!(blas.order, vec![0]);
    }

    #[test]
    fn two_triangles_never_split() {
        let blas = BlasBuilder::default().build_mesh(&MeshBuilder::quad()).unwrap();
        assert_eq!(blas.nodes.len(), 1);
        assert_eq!(blas.nodes[0].triangles(), Some((0, 2)));
    }

    #[test]
    fn empty_mesh_yields_no_nodes() {
        let blas = BlasBuilder::default().build(&[], &[]).unwrap();
        assert!(blas.nodes.is_empty());
        assert!(blas.triangles.is_empty());
    }

    #[test]
    fn invalid_index_is_an_error() {
        let mesh = Mesh::from_positions(&[[0.0; 3]], &[[0, 0, 3]]);
        assert!(matches!(
            BlasBuilder::default().build_mesh(&mesh),
            Err(TraceError::InvalidTriangle { index: 3, .. })
        ));
    }

    #[test]
    fn children_are_consecutive_and_ahead() {
        let blas = BlasBuilder::default()
            .build_mesh(&MeshBuilder::grid(8, 4.0))
            .unwrap();
        assert!(blas.nodes.len() > 1);
        for (i, node) in blas.nodes.iter().enumerate() {
            if let Some((l, r)) = node.children() {
                assert!(l as usize > i);
                assert_eq!(r, l + 1);
                assert!((r as usize) < blas.nodes.len());
            }
        }
    }

    #[test]
    fn offsets_rebase_children_and_leaves() {
        let mesh = MeshBuilder::grid(4, 2.0);
        let local = BlasBuilder::default().build_mesh(&mesh).unwrap();
        let offsets = BlasOffsets {
            node: 100,
            triangle: 40,
        };
        let placed = BlasBuilder::default()
            .build_at(&mesh.triangles, &mesh.vertices, offsets)
            .unwrap();

        assert_eq!(placed.root_offset, 100);
        assert_eq!(placed.order, local.order);
        for (a, b) in local.nodes.iter().zip(&placed.nodes) {
            assert_eq!(a.tri_count, b.tri_count);
            if a.is_leaf() {
                assert_eq!(a.index + 40, b.index);
            } else {
                assert_eq!(a.index + 100, b.index);
            }
        }
        assert!(placed.node(100).is_some());
        assert!(placed.node(99).is_none());
    }
}
