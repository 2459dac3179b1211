// src/accel/traverse.rs
// CPU traversal of the combined TLAS + BLAS buffers: closest-hit and any-hit queries.
// This file exists as the host-side intersect and occlusion phases, and as the reference the device kernels must agree with.
// RELEVANT FILES:src/scene/mod.rs,src/accel/types.rs,src/path_tracing/wavefront/cpu.rs,src/shaders/wavefront_queues.wgsl

use glam::Vec3;

use crate::accel::types::Aabb;
use crate::scene::SceneBuffers;

/// Ray with a valid parameter interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub t_min: f32,
    pub direction: Vec3,
    pub t_max: f32,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            t_min: 1e-4,
            direction,
            t_max: f32::INFINITY,
        }
    }

    /// Segment from `from` towards `to`, stopping just short of `to`
    pub fn segment(from: Vec3, to: Vec3) -> Self {
        let direction = to - from;
        Self {
            origin: from,
            t_min: 1e-4,
            direction,
            t_max: 1.0 - 1e-4,
        }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Closest intersection found by [`Traverser::intersect_closest`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitRecord {
    pub t: f32,
    pub point: Vec3,
    /// World-space shading normal, facing against the ray
    pub normal: Vec3,
    pub front_face: bool,
    pub uv: [f32; 2],
    /// Material id of the hit instance
    pub material: u32,
    /// Material index stored on the triangle itself
    pub triangle_material: u32,
    pub instance: u32,
    /// Position of the triangle in the combined triangle buffer
    pub triangle: u32,
}

/// Slab test; returns the entry distance when the ray overlaps `[t_min, t_max]`.
///
/// Boxes are closed: an axis-parallel ray whose origin lies on a face still
/// overlaps that slab.
pub fn ray_aabb(origin: Vec3, inv_dir: Vec3, aabb: &Aabb, t_min: f32, t_max: f32) -> Option<f32> {
    let t0 = slab_distance(aabb.min - origin, inv_dir, f32::NEG_INFINITY);
    let t1 = slab_distance(aabb.max - origin, inv_dir, f32::INFINITY);
    let near = t0.min(t1).max_element().max(t_min);
    let far = t0.max(t1).min_element().min(t_max);
    (near <= far).then_some(near)
}

/// `delta * inv_dir` per axis; the `0 * inf` case on a face becomes `on_face`
fn slab_distance(delta: Vec3, inv_dir: Vec3, on_face: f32) -> Vec3 {
    let t = delta * inv_dir;
    Vec3::select(t.is_nan_mask(), Vec3::splat(on_face), t)
}

/// Möller-Trumbore ray/triangle test, returning `(t, u, v)`
pub fn ray_triangle(origin: Vec3, direction: Vec3, p: [Vec3; 3]) -> Option<(f32, f32, f32)> {
    const EPSILON: f32 = 1e-8;

    let edge1 = p[1] - p[0];
    let edge2 = p[2] - p[0];
    let h = direction.cross(edge2);
    let det = edge1.dot(h);
    if det.abs() < EPSILON {
        return None;
    }

    let inv_det = 1.0 / det;
    let s = origin - p[0];
    let u = inv_det * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = inv_det * direction.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    Some((inv_det * edge2.dot(q), u, v))
}

/// Local-space candidate before it is moved back to world space
#[derive(Debug, Clone, Copy)]
struct LocalHit {
    t: f32,
    u: f32,
    v: f32,
    instance: u32,
    triangle: u32,
}

/// Stack-based traversal state, reusable across rays
#[derive(Debug, Default)]
pub struct Traverser {
    tlas_stack: Vec<u32>,
    blas_stack: Vec<u32>,
}

impl Traverser {
    pub fn new() -> Self {
        Self {
            tlas_stack: Vec::with_capacity(32),
            blas_stack: Vec::with_capacity(64),
        }
    }

    /// Nearest hit along the ray inside `[t_min, t_max]`
    pub fn intersect_closest(&mut self, scene: &SceneBuffers, ray: &Ray) -> Option<HitRecord> {
        let hit = self.traverse(scene, ray, false)?;
        Some(resolve_hit(scene, ray, &hit))
    }

    /// True when anything blocks the ray inside `[t_min, t_max]`
    pub fn occluded(&mut self, scene: &SceneBuffers, ray: &Ray) -> bool {
        self.traverse(scene, ray, true).is_some()
    }

    fn traverse(&mut self, scene: &SceneBuffers, ray: &Ray, any_hit: bool) -> Option<LocalHit> {
        if scene.tlas_nodes.is_empty() {
            return None;
        }

        let inv_dir = ray.direction.recip();
        let mut closest: Option<LocalHit> = None;
        let mut t_max = ray.t_max;

        self.tlas_stack.clear();
        self.tlas_stack.push(0);
        while let Some(slot) = self.tlas_stack.pop() {
            let Some(node) = scene.tlas_nodes.get(slot as usize) else {
                continue;
            };
            if ray_aabb(ray.origin, inv_dir, &node.aabb(), ray.t_min, t_max).is_none() {
                continue;
            }

            match node.instance() {
                Some(instance) => {
                    if let Some(hit) = self.traverse_blas(scene, ray, instance, t_max, any_hit) {
                        t_max = hit.t;
                        closest = Some(hit);
                        if any_hit {
                            return closest;
                        }
                    }
                }
                None => {
                    let (left, right) = node.children()?;
                    self.tlas_stack.push(right);
                    self.tlas_stack.push(left);
                }
            }
        }

        closest
    }

    /// Walk one instance's BLAS with the ray moved into object space.
    ///
    /// The direction is not renormalized, so `t` is the same parameter in
    /// both spaces and can be compared against the world-space `t_max`.
    fn traverse_blas(
        &mut self,
        scene: &SceneBuffers,
        ray: &Ray,
        instance: u32,
        mut t_max: f32,
        any_hit: bool,
    ) -> Option<LocalHit> {
        let data = scene.instances.get(instance as usize)?;
        let inverse = data.inverse();
        let origin = inverse.transform_point3(ray.origin);
        let direction = inverse.transform_vector3(ray.direction);
        let inv_dir = direction.recip();

        let mut closest = None;
        self.blas_stack.clear();
        self.blas_stack.push(data.blas_root);
        while let Some(slot) = self.blas_stack.pop() {
            let Some(node) = scene.blas_nodes.get(slot as usize) else {
                continue;
            };
            if ray_aabb(origin, inv_dir, &node.aabb(), ray.t_min, t_max).is_none() {
                continue;
            }

            if let Some((first, count)) = node.triangles() {
                for triangle in first..first + count {
                    let Some(p) = triangle_positions(scene, triangle) else {
                        continue;
                    };
                    let Some((t, u, v)) = ray_triangle(origin, direction, p) else {
                        continue;
                    };
                    if t > ray.t_min && t < t_max {
                        t_max = t;
                        closest = Some(LocalHit {
                            t,
                            u,
                            v,
                            instance,
                            triangle,
                        });
                        if any_hit {
                            return closest;
                        }
                    }
                }
            } else if let Some((left, right)) = node.children() {
                self.blas_stack.push(right);
                self.blas_stack.push(left);
            }
        }

        closest
    }
}

fn triangle_positions(scene: &SceneBuffers, triangle: u32) -> Option<[Vec3; 3]> {
    let tri = scene.triangles.get(triangle as usize)?;
    let mut p = [Vec3::ZERO; 3];
    for (corner, &index) in p.iter_mut().zip(&tri.indices) {
        *corner = scene.vertices.get(index as usize)?.pos();
    }
    Some(p)
}

/// Interpolate attributes and move the normal back to world space
fn resolve_hit(scene: &SceneBuffers, ray: &Ray, hit: &LocalHit) -> HitRecord {
    let data = &scene.instances[hit.instance as usize];
    let tri = &scene.triangles[hit.triangle as usize];
    let [v0, v1, v2] = tri.indices.map(|i| scene.vertices[i as usize]);
    let w = 1.0 - hit.u - hit.v;

    let geometric = (v1.pos() - v0.pos()).cross(v2.pos() - v0.pos());
    let interpolated = Vec3::from(v0.normal) * w
        + Vec3::from(v1.normal) * hit.u
        + Vec3::from(v2.normal) * hit.v;
    let local_normal = if interpolated.length_squared() > 0.0 {
        interpolated
    } else {
        geometric
    };

    let normal_matrix = data.inverse().transpose();
    let mut normal = normal_matrix.transform_vector3(local_normal).normalize_or_zero();
    let front_face = normal.dot(ray.direction) < 0.0;
    if !front_face {
        normal = -normal;
    }

    let [uv0, uv1, uv2] = [v0.uv(), v1.uv(), v2.uv()];
    HitRecord {
        t: hit.t,
        point: ray.at(hit.t),
        normal,
        front_face,
        uv: [
            uv0[0] * w + uv1[0] * hit.u + uv2[0] * hit.v,
            uv0[1] * w + uv1[1] * hit.u + uv2[1] * hit.v,
        ],
        material: data.material_id,
        triangle_material: tri.material,
        instance: hit.instance,
        triangle: hit.triangle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::MeshBuilder;
    use crate::scene::SceneBuilder;

    fn two_cubes() -> SceneBuffers {
        let mut scene = SceneBuilder::default();
        let cube = scene.add_mesh(&MeshBuilder::cube(1.0)).unwrap();
        scene.add_instance(cube).unwrap().material_id = 1;
        let far = scene.add_instance(cube).unwrap();
        far.translate(Vec3::new(0.0, 0.0, -10.0));
        far.material_id = 2;
        scene.build().unwrap()
    }

    #[test]
    fn slab_test_hits_and_misses() {
        let aabb = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let dir = Vec3::new(0.0, 0.0, -1.0);
        let hit = ray_aabb(Vec3::new(0.0, 0.0, 5.0), dir.recip(), &aabb, 0.0, f32::INFINITY);
        assert_eq!(hit, Some(4.0));

        let miss = ray_aabb(Vec3::new(3.0, 0.0, 5.0), dir.recip(), &aabb, 0.0, f32::INFINITY);
        assert_eq!(miss, None);
    }

    #[test]
    fn slab_test_keeps_rays_on_a_face() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let dir = Vec3::new(0.0, 0.0, -1.0);

        // Origin on the x = 0 face, travelling parallel to it
        let on_min = ray_aabb(Vec3::new(0.0, 0.5, 5.0), dir.recip(), &aabb, 0.0, f32::INFINITY);
        assert_eq!(on_min, Some(4.0));
        let on_max = ray_aabb(Vec3::new(1.0, 1.0, 5.0), dir.recip(), &aabb, 0.0, f32::INFINITY);
        assert_eq!(on_max, Some(4.0));

        let outside = ray_aabb(Vec3::new(-1e-3, 0.5, 5.0), dir.recip(), &aabb, 0.0, f32::INFINITY);
        assert_eq!(outside, None);
    }

    #[test]
    fn triangle_test_reports_barycentrics() {
        let p = [Vec3::ZERO, Vec3::X, Vec3::Y];
        let (t, u, v) =
            ray_triangle(Vec3::new(0.25, 0.25, 1.0), Vec3::new(0.0, 0.0, -1.0), p).unwrap();
        assert!((t - 1.0).abs() < 1e-6);
        assert!((u - 0.25).abs() < 1e-6);
        assert!((v - 0.25).abs() < 1e-6);
        assert!(ray_triangle(Vec3::new(2.0, 2.0, 1.0), Vec3::new(0.0, 0.0, -1.0), p).is_none());
    }

    #[test]
    fn closest_hit_picks_nearest_instance() {
        let scene = two_cubes();
        let mut traverser = Traverser::new();
        let ray = Ray::new(Vec3::new(0.2, 0.1, 5.0), Vec3::new(0.0, 0.0, -1.0));

        let hit = traverser.intersect_closest(&scene, &ray).unwrap();
        assert!((hit.t - 4.0).abs() < 1e-4);
        assert_eq!(hit.material, 1);
        assert_eq!(hit.instance, 0);
        assert!((hit.normal - Vec3::Z).length() < 1e-4);
    }

    #[test]
    fn translated_instance_is_hit_in_world_space() {
        let scene = two_cubes();
        let mut traverser = Traverser::new();
        let ray = Ray::new(Vec3::new(0.3, -0.1, -4.0), Vec3::new(0.0, 0.0, -1.0));

        let hit = traverser.intersect_closest(&scene, &ray).unwrap();
        assert_eq!(hit.material, 2);
        assert!((hit.point.z + 9.0).abs() < 1e-4);
    }

    #[test]
    fn occlusion_respects_segment_end() {
        let scene = two_cubes();
        let mut traverser = Traverser::new();

        let blocked = Ray::segment(Vec3::new(0.3, 0.2, 5.0), Vec3::new(0.3, 0.2, -5.0));
        assert!(traverser.occluded(&scene, &blocked));

        let short = Ray::segment(Vec3::new(0.3, 0.2, 5.0), Vec3::new(0.3, 0.2, 2.0));
        assert!(!traverser.occluded(&scene, &short));

        let miss = Ray::new(Vec3::new(5.0, 5.0, 5.0), Vec3::new(0.0, 1.0, 0.0));
        assert!(traverser.intersect_closest(&scene, &miss).is_none());
    }
}
