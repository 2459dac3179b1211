// src/accel/tlas.rs
// Scene-level TLAS builder: greedy agglomerative clustering of instance boxes with a nearest-neighbour chain.
// This file exists to produce the 2N-1 node top-level array (root at slot 0) consumed by the intersect kernel.
// RELEVANT FILES:src/accel/types.rs,src/accel/instancing.rs,src/scene/mod.rs,src/accel/traverse.rs

use std::time::Instant;

use crate::accel::types::{Aabb, BuildStats, GpuTlasNode};
use crate::error::{TraceError, TraceResult};

/// Instance counts above this make the O(N^2) partner search noticeable
pub const TLAS_INSTANCE_SOFT_LIMIT: usize = 512;

/// Result of a TLAS build
#[derive(Debug, Clone)]
pub struct TlasBuild {
    /// Exactly `2N - 1` nodes; slot 0 is the root
    pub nodes: Vec<GpuTlasNode>,
    pub stats: BuildStats,
}

impl TlasBuild {
    pub fn root(&self) -> &GpuTlasNode {
        &self.nodes[0]
    }

    pub fn bounds(&self) -> Aabb {
        self.nodes[0].aabb()
    }
}

/// Open-list entry: a cluster that has not been merged yet
#[derive(Debug, Clone, Copy)]
struct Cluster {
    bounds: Aabb,
    node: GpuTlasNode,
}

/// CPU TLAS builder over world-space instance boxes
#[derive(Debug, Default)]
pub struct TlasBuilder;

impl TlasBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Cluster `instance_bounds[i]` (instance id `i`) into a flat binary tree.
    ///
    /// Pairs are merged only when they are mutually nearest, so a partner
    /// search never has to restart from scratch: the chain A -> B -> C is
    /// followed until it closes.
    pub fn build(&self, instance_bounds: &[Aabb]) -> TraceResult<TlasBuild> {
        let started = Instant::now();
        let count = instance_bounds.len();
        if count == 0 {
            return Err(TraceError::NoInstances);
        }
        if count > TLAS_INSTANCE_SOFT_LIMIT {
            log::warn!(
                "TLAS build over {} instances: agglomerative clustering is O(N^2) per merge step",
                count
            );
        }

        let mut open: Vec<Cluster> = instance_bounds
            .iter()
            .enumerate()
            .map(|(i, bounds)| Cluster {
                bounds: *bounds,
                node: GpuTlasNode::leaf(bounds, i as u32),
            })
            .collect();

        let mut nodes = vec![GpuTlasNode::leaf(&Aabb::empty(), u32::MAX); 2 * count - 1];
        let mut end = nodes.len() - 1;

        let mut a = 0usize;
        let mut b = best_match(&open, a);
        while open.len() > 1 {
            let c = best_match(&open, b);
            let pair_cost = merged_cost(&open[a], &open[b]);
            if c == a || merged_cost(&open[b], &open[c]) >= pair_cost {
                // Remove the higher index first so the lower one stays valid
                let (hi, lo) = if a > b { (a, b) } else { (b, a) };
                let cluster_hi = open.swap_remove(hi);
                let cluster_lo = open.swap_remove(lo);
                let (cluster_a, cluster_b) = if a > b {
                    (cluster_hi, cluster_lo)
                } else {
                    (cluster_lo, cluster_hi)
                };

                nodes[end] = cluster_a.node;
                nodes[end - 1] = cluster_b.node;
                let bounds = cluster_a.bounds.union(&cluster_b.bounds);
                open.push(Cluster {
                    bounds,
                    node: GpuTlasNode::internal(&bounds, (end - 1) as u32),
                });
                end -= 2;

                a = open.len() - 1;
                if open.len() > 1 {
                    b = best_match(&open, a);
                }
            } else {
                a = b;
                b = c;
            }
        }

        nodes[0] = open[0].node;

        let mut stats = BuildStats {
            primitive_count: count as u32,
            node_count: nodes.len() as u32,
            leaf_count: count as u32,
            max_depth: tree_depth(&nodes),
            ..Default::default()
        };
        stats.finish(started);

        log::debug!(
            "TLAS built: {} instances, {} nodes, depth {}, {:.3} ms",
            count,
            stats.node_count,
            stats.max_depth,
            stats.build_time_ms
        );

        Ok(TlasBuild { nodes, stats })
    }
}

/// Half surface area of the box enclosing both clusters
fn merged_cost(a: &Cluster, b: &Cluster) -> f32 {
    a.bounds.union(&b.bounds).half_area()
}

/// Index of the cheapest merge partner for `open[target]`; ties keep the lowest index
fn best_match(open: &[Cluster], target: usize) -> usize {
    let mut best = usize::MAX;
    let mut best_cost = f32::INFINITY;
    for (i, cluster) in open.iter().enumerate() {
        if i == target {
            continue;
        }
        let cost = merged_cost(&open[target], cluster);
        if cost < best_cost || best == usize::MAX {
            best_cost = cost;
            best = i;
        }
    }
    best
}

fn tree_depth(nodes: &[GpuTlasNode]) -> u32 {
    let mut max_depth = 0;
    let mut stack = vec![(0usize, 0u32)];
    while let Some((slot, depth)) = stack.pop() {
        max_depth = max_depth.max(depth);
        if let Some((l, r)) = nodes[slot].children() {
            stack.push((l as usize, depth + 1));
            stack.push((r as usize, depth + 1));
        }
    }
    max_depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn unit_box_at(x: f32) -> Aabb {
        Aabb::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0))
    }

    #[test]
    fn zero_instances_rejected() {
        assert_eq!(TlasBuilder::new().build(&[]).unwrap_err(), TraceError::NoInstances);
    }

    #[test]
    fn single_instance_is_leaf_root() {
        let tlas = TlasBuilder::new().build(&[unit_box_at(0.0)]).unwrap();
        assert_eq!(tlas.nodes.len(), 1);
        assert_eq!(tlas.root().instance(), Some(0));
    }

    #[test]
    fn two_instances_share_root() {
        let tlas = TlasBuilder::new()
            .build(&[unit_box_at(0.0), unit_box_at(5.0)])
            .unwrap();
        assert_eq!(tlas.nodes.len(), 3);
        assert_eq!(tlas.root().children(), Some((1, 2)));
        let mut ids = vec![
            tlas.nodes[1].instance().unwrap(),
            tlas.nodes[2].instance().unwrap(),
        ];
        ids.sort();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn nearest_boxes_merge_first() {
        // Two tight pairs far apart: each pair must become a sibling pair
        let boxes = [
            unit_box_at(0.0),
            unit_box_at(100.0),
            unit_box_at(1.5),
            unit_box_at(101.5),
        ];
        let tlas = TlasBuilder::new().build(&boxes).unwrap();
        assert_eq!(tlas.nodes.len(), 7);

        for node in &tlas.nodes {
            if let Some((l, r)) = node.children() {
                let (nl, nr) = (&tlas.nodes[l as usize], &tlas.nodes[r as usize]);
                if let (Some(x), Some(y)) = (nl.instance(), nr.instance()) {
                    let mut pair = [x, y];
                    pair.sort();
                    assert!(pair == [0, 2] || pair == [1, 3], "unexpected pair {pair:?}");
                }
            }
        }
    }

    #[test]
    fn equal_costs_terminate() {
        // Identical boxes make every candidate tie
        let boxes = vec![unit_box_at(0.0); 9];
        let tlas = TlasBuilder::new().build(&boxes).unwrap();
        assert_eq!(tlas.nodes.len(), 17);
        let leaves = tlas.nodes.iter().filter(|n| n.is_leaf()).count();
        assert_eq!(leaves, 9);
    }
}
