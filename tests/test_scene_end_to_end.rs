// tests/test_scene_end_to_end.rs
// End-to-end host tests: mesh to BLAS, instances to TLAS, then one wavefront frame over the result.
// RELEVANT FILES:src/scene/mod.rs,src/accel/traverse.rs,src/path_tracing/wavefront/cpu.rs

use glam::{Quat, Vec3};
use wavetrace::{
    CpuWavefront, FrameInfo, HitItem, MeshBuilder, Ray, RayItem, SceneBuffers, SceneBuilder,
    ShadeResult, ShadingKernels, ShadowItem, TracerParams, Traverser, MISS_MATERIAL,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One cube mesh instanced three times along x
fn three_cubes() -> SceneBuffers {
    let mut scene = SceneBuilder::default();
    let cube = scene.add_mesh(&MeshBuilder::cube(1.0)).unwrap();
    scene.add_instance(cube).unwrap().translate(Vec3::new(-4.0, 0.0, 0.0));
    scene.add_instance(cube).unwrap();
    scene
        .add_instance(cube)
        .unwrap()
        .translate(Vec3::new(4.0, 0.0, 0.0))
        .rotate(Quat::from_rotation_y(0.3))
        .scale(Vec3::splat(0.5));
    scene.build().unwrap()
}

/// Orthographic camera over x in [-6, 6], y in [-2, 2]; light overhead along +z
struct Orthographic;

impl ShadingKernels for Orthographic {
    fn spawn(&self, pixel: u32, frame: &FrameInfo) -> Option<RayItem> {
        let (x, y) = frame.pixel_coords(pixel);
        let u = (x as f32 + 0.5) / frame.width as f32 * 12.0 - 6.0 + 0.0137;
        let v = (y as f32 + 0.5) / frame.height as f32 * 4.0 - 2.0 + 0.0071;
        Some(RayItem::new(
            Vec3::new(u, v, 10.0),
            Vec3::NEG_Z,
            pixel,
            0,
            Vec3::ONE,
        ))
    }

    fn shade(&self, hit: &HitItem, _frame: &FrameInfo) -> ShadeResult {
        if hit.material == MISS_MATERIAL {
            return ShadeResult::default();
        }
        let point = Vec3::from(hit.point) + Vec3::from(hit.normal) * 1e-3;
        ShadeResult {
            shadow: Some(ShadowItem::towards(
                point,
                point + Vec3::new(0.0, 0.0, 20.0),
                hit.pixel,
                hit.depth,
                Vec3::ONE,
            )),
            ..Default::default()
        }
    }
}

#[test]
fn instanced_scene_layout() {
    init_logging();
    let scene = three_cubes();

    assert_eq!(scene.instance_count(), 3);
    assert_eq!(scene.tlas_nodes.len(), 5);
    assert!(scene.blas_nodes.iter().any(|n| n.is_leaf()));
    assert_eq!(scene.tlas_offset(), scene.blas_nodes.len() as u32);
    assert_eq!(scene.triangles.len(), 12);

    for inst in &scene.instances {
        assert_eq!(inst.blas_root, 0);
    }
    let bounds = scene.bounds();
    assert!(bounds.contains_point(Vec3::new(-4.9, 0.0, 0.0)));
    assert!(bounds.contains_point(Vec3::new(4.2, 0.0, 0.0)));
}

#[test]
fn traversal_finds_each_instance() {
    let scene = three_cubes();
    let mut traverser = Traverser::new();

    for (x, instance) in [(-4.0f32, 0u32), (0.0, 1), (4.0, 2)] {
        let ray = Ray::new(Vec3::new(x + 0.11, 0.07, 10.0), Vec3::NEG_Z);
        let hit = traverser
            .intersect_closest(&scene, &ray)
            .unwrap_or_else(|| panic!("ray at x = {x} missed"));
        assert_eq!(hit.instance, instance);
        assert!(hit.point.z > 0.0);
    }

    // Between the cubes nothing is hit, and the segment below is unobstructed
    let gap = Ray::new(Vec3::new(2.0, 0.0, 10.0), Vec3::NEG_Z);
    assert!(traverser.intersect_closest(&scene, &gap).is_none());
    assert!(!traverser.occluded(&scene, &Ray::segment(Vec3::new(2.0, 0.0, 5.0), Vec3::new(2.0, 0.0, -5.0))));
    assert!(traverser.occluded(&scene, &Ray::segment(Vec3::new(0.1, 0.0, 5.0), Vec3::new(0.1, 0.0, -5.0))));
}

#[test]
fn one_bounce_frame_over_instances() {
    init_logging();
    let scene = three_cubes();
    let params = TracerParams::new(48, 16);
    let mut tracer = CpuWavefront::new(params).unwrap();

    let stats = tracer.render_frame(&scene, &Orthographic).unwrap();
    assert_eq!(stats.spawned, 48 * 16);

    let bounce = stats.bounces[0];
    assert_eq!(bounce.hits.count, 48 * 16);
    let hits = bounce.hits.count - bounce.misses;
    assert!(hits > 0);
    assert_eq!(bounce.shadows.count, hits);
    assert!(bounce.shadows.count <= bounce.hits.count);
    // Tops of the cubes face the light directly
    assert_eq!(bounce.unoccluded, bounce.shadows.count);

    let lit = tracer.image().iter().filter(|p| p.x > 0.5).count() as u32;
    assert_eq!(lit, hits);
}
