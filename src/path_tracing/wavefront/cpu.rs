// src/path_tracing/wavefront/cpu.rs
// Host executor for the wavefront protocol: the same phases and queue contract as the GPU path, run with rayon.
// Each phase is a data-parallel pass; returning from the pass is the barrier before the next dispatch size is computed.

use glam::Vec3;
use rayon::prelude::*;

use crate::accel::traverse::Traverser;
use crate::error::TraceResult;
use crate::path_tracing::TracerParams;
use crate::scene::SceneBuffers;

use super::queues::{HitItem, QueueHeader, QueueKind, RayItem, ShadowItem, WorkQueue};

/// Frame-level context handed to the shading kernels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub bounce: u32,
}

impl FrameInfo {
    pub fn pixel_coords(&self, pixel: u32) -> (u32, u32) {
        (pixel % self.width, pixel / self.width)
    }
}

/// What the shade phase produced for one hit item
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ShadeResult {
    /// Radiance added to the pixel right away (emission, environment on a miss)
    pub emitted: Vec3,
    /// Continuation ray for the next bounce
    pub bounce: Option<RayItem>,
    /// Visibility test whose radiance lands only if unoccluded
    pub shadow: Option<ShadowItem>,
}

/// Camera and material logic supplied by the caller
pub trait ShadingKernels: Sync {
    /// Primary ray for `pixel`, or `None` to leave it empty
    fn spawn(&self, pixel: u32, frame: &FrameInfo) -> Option<RayItem>;

    /// Respond to one hit item; misses carry `MISS_MATERIAL`
    fn shade(&self, hit: &HitItem, frame: &FrameInfo) -> ShadeResult;
}

/// Queue populations observed during one bounce
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BounceStats {
    pub rays: QueueHeader,
    pub hits: QueueHeader,
    pub shadows: QueueHeader,
    pub misses: u32,
    pub unoccluded: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameStats {
    pub frame_index: u32,
    pub spawned: u32,
    pub bounces: Vec<BounceStats>,
}

/// CPU wavefront executor with its three queues and an accumulation image
pub struct CpuWavefront {
    params: TracerParams,
    rays: WorkQueue<RayItem>,
    hits: WorkQueue<HitItem>,
    shadows: WorkQueue<ShadowItem>,
    image: Vec<Vec3>,
    frame_index: u32,
}

impl CpuWavefront {
    pub fn new(params: TracerParams) -> TraceResult<Self> {
        params.validate()?;
        let capacity = params.capacity();
        Ok(Self {
            rays: WorkQueue::new(QueueKind::Ray, capacity),
            hits: WorkQueue::new(QueueKind::Hit, capacity),
            shadows: WorkQueue::new(QueueKind::Shadow, capacity),
            image: vec![Vec3::ZERO; params.pixel_count() as usize],
            frame_index: 0,
            params,
        })
    }

    pub fn params(&self) -> &TracerParams {
        &self.params
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    /// Accumulated radiance, row-major
    pub fn image(&self) -> &[Vec3] {
        &self.image
    }

    pub fn reset_accumulation(&mut self) {
        self.image.fill(Vec3::ZERO);
        self.frame_index = 0;
    }

    /// Run spawn and then `max_bounces` rounds of intersect, shade and shadow.
    ///
    /// Any append past a queue's capacity aborts the frame with
    /// `TraceError::QueueOverflow`.
    pub fn render_frame<K: ShadingKernels>(
        &mut self,
        scene: &SceneBuffers,
        kernels: &K,
    ) -> TraceResult<FrameStats> {
        let wg = self.params.workgroup_size;
        let mut frame = FrameInfo {
            index: self.frame_index,
            width: self.params.width,
            height: self.params.height,
            bounce: 0,
        };
        let mut stats = FrameStats {
            frame_index: self.frame_index,
            ..Default::default()
        };

        self.rays.reset();
        self.hits.reset();
        self.shadows.reset();

        // Spawn: one invocation per pixel
        let rays = &self.rays;
        (0..self.params.pixel_count())
            .into_par_iter()
            .try_for_each(|pixel| -> TraceResult<()> {
                if let Some(ray) = kernels.spawn(pixel, &frame) {
                    rays.push(ray)?;
                }
                Ok(())
            })?;
        stats.spawned = self.rays.len();

        for bounce in 0..self.params.max_bounces {
            frame.bounce = bounce;
            let mut bounce_stats = BounceStats::default();

            // Intersect: every ray yields exactly one hit item
            self.hits.reset();
            bounce_stats.rays = self.rays.header(wg);
            let hits = &self.hits;
            self.rays.par_iter().try_for_each_init(
                Traverser::new,
                |traverser, ray| -> TraceResult<()> {
                    let item = match traverser.intersect_closest(scene, &ray.ray()) {
                        Some(hit) => HitItem {
                            point: hit.point.to_array(),
                            t: hit.t,
                            normal: hit.normal.to_array(),
                            material: hit.material,
                            throughput: ray.throughput,
                            pixel: ray.pixel,
                            direction: ray.direction,
                            depth: ray.depth,
                        },
                        None => HitItem::miss(ray),
                    };
                    hits.push(item)?;
                    Ok(())
                },
            )?;

            // Shade: the ray queue was consumed above and is refilled here
            self.rays.reset();
            self.shadows.reset();
            bounce_stats.hits = self.hits.header(wg);
            bounce_stats.misses = self.hits.iter().filter(|h| h.is_miss()).count() as u32;
            let (rays, shadows) = (&self.rays, &self.shadows);
            let emitted: Vec<(u32, Vec3)> = self
                .hits
                .par_iter()
                .map(|hit| -> TraceResult<Option<(u32, Vec3)>> {
                    let result = kernels.shade(hit, &frame);
                    if let Some(ray) = result.bounce {
                        rays.push(ray)?;
                    }
                    if let Some(shadow) = result.shadow {
                        shadows.push(shadow)?;
                    }
                    Ok((result.emitted != Vec3::ZERO).then_some((hit.pixel, result.emitted)))
                })
                .filter_map(|r| r.transpose())
                .collect::<TraceResult<_>>()?;
            self.accumulate(&emitted);

            // Shadow: unoccluded segments deposit their radiance
            bounce_stats.shadows = self.shadows.header(wg);
            let visible: Vec<(u32, Vec3)> = self
                .shadows
                .par_iter()
                .map_init(Traverser::new, |traverser, shadow| {
                    (!traverser.occluded(scene, &shadow.ray()))
                        .then(|| (shadow.pixel, Vec3::from(shadow.radiance)))
                })
                .flatten()
                .collect();
            bounce_stats.unoccluded = visible.len() as u32;
            self.accumulate(&visible);

            log::debug!(
                "Frame {} bounce {}: rays {} hits {} (misses {}) shadows {} (unoccluded {})",
                frame.index,
                bounce,
                bounce_stats.rays.count,
                bounce_stats.hits.count,
                bounce_stats.misses,
                bounce_stats.shadows.count,
                bounce_stats.unoccluded
            );
            stats.bounces.push(bounce_stats);
        }

        self.frame_index += 1;
        Ok(stats)
    }

    fn accumulate(&mut self, contributions: &[(u32, Vec3)]) {
        for &(pixel, radiance) in contributions {
            if let Some(dst) = self.image.get_mut(pixel as usize) {
                *dst += radiance;
            }
        }
    }
}
