// src/path_tracing/wavefront/queues.rs
// Queue management structures for wavefront path tracing
// Headers, work-item layouts and the ray/hit/shadow queues on both the host and the device

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, OnceLock};

use anyhow::{anyhow, Context, Result};
use glam::Vec3;
use rayon::prelude::*;
use wgpu::util::DeviceExt;
use wgpu::{BindGroup, BindGroupLayout, Buffer, BufferUsages, CommandEncoder, Device, Queue};

use crate::accel::traverse::Ray;
use crate::error::{TraceError, TraceResult};
use crate::path_tracing::TracerParams;

/// Material id written into hit items whose ray left the scene
pub const MISS_MATERIAL: u32 = u32::MAX;

/// Size of one header; headers sit back to back in the header buffer
pub const QUEUE_HEADER_SIZE: u64 = std::mem::size_of::<QueueHeader>() as u64;

/// Per-queue header matching WGSL `QueueHeader`.
///
/// `dispatch` comes first so the header can be copied verbatim into the
/// indirect-dispatch argument buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct QueueHeader {
    pub dispatch: [u32; 3], // workgroups for the consuming phase
    pub count: u32,         // number of items pushed
}

impl QueueHeader {
    /// Frame-start state: empty queue, minimum launch
    pub fn baseline() -> Self {
        Self {
            dispatch: [1, 1, 1],
            count: 0,
        }
    }

    pub fn sized(count: u32, workgroup_size: u32) -> Self {
        Self {
            dispatch: compute_dispatch_size(count, workgroup_size),
            count,
        }
    }
}

impl Default for QueueHeader {
    fn default() -> Self {
        Self::baseline()
    }
}

/// Workgroups needed to cover `count` items, never less than one
pub fn compute_dispatch_size(count: u32, workgroup_size: u32) -> [u32; 3] {
    [count.div_ceil(workgroup_size.max(1)).max(1), 1, 1]
}

/// The three queues of a frame, in header-buffer order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Ray,
    Hit,
    Shadow,
}

impl QueueKind {
    pub const ALL: [QueueKind; 3] = [QueueKind::Ray, QueueKind::Hit, QueueKind::Shadow];

    pub fn index(self) -> usize {
        match self {
            QueueKind::Ray => 0,
            QueueKind::Hit => 1,
            QueueKind::Shadow => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            QueueKind::Ray => "ray",
            QueueKind::Hit => "hit",
            QueueKind::Shadow => "shadow",
        }
    }

    /// Byte offset of this queue's header (and indirect arguments)
    pub fn header_offset(self) -> u64 {
        self.index() as u64 * QUEUE_HEADER_SIZE
    }

    pub fn item_size(self) -> u64 {
        let size = match self {
            QueueKind::Ray => std::mem::size_of::<RayItem>(),
            QueueKind::Hit => std::mem::size_of::<HitItem>(),
            QueueKind::Shadow => std::mem::size_of::<ShadowItem>(),
        };
        size as u64
    }
}

/// Ray-queue item matching WGSL `RayItem` (48 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RayItem {
    pub origin: [f32; 3],
    pub depth: u32,
    pub direction: [f32; 3],
    pub pixel: u32,
    pub throughput: [f32; 3],
    pub t_max: f32,
}

impl RayItem {
    pub fn new(origin: Vec3, direction: Vec3, pixel: u32, depth: u32, throughput: Vec3) -> Self {
        Self {
            origin: origin.to_array(),
            depth,
            direction: direction.to_array(),
            pixel,
            throughput: throughput.to_array(),
            t_max: f32::INFINITY,
        }
    }

    pub fn ray(&self) -> Ray {
        Ray {
            t_max: self.t_max,
            ..Ray::new(Vec3::from(self.origin), Vec3::from(self.direction))
        }
    }
}

/// Hit-queue item matching WGSL `HitItem` (64 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct HitItem {
    pub point: [f32; 3],
    pub t: f32,
    pub normal: [f32; 3],
    pub material: u32,
    pub throughput: [f32; 3],
    pub pixel: u32,
    /// Direction of the incoming ray
    pub direction: [f32; 3],
    pub depth: u32,
}

impl HitItem {
    /// Miss marker carrying the ray's context
    pub fn miss(ray: &RayItem) -> Self {
        Self {
            point: [0.0; 3],
            t: f32::INFINITY,
            normal: [0.0; 3],
            material: MISS_MATERIAL,
            throughput: ray.throughput,
            pixel: ray.pixel,
            direction: ray.direction,
            depth: ray.depth,
        }
    }

    pub fn is_miss(&self) -> bool {
        self.material == MISS_MATERIAL
    }
}

/// Shadow-queue item matching WGSL `ShadowItem` (48 bytes).
///
/// `radiance` is added to the pixel when the segment is unoccluded.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShadowItem {
    pub origin: [f32; 3],
    pub t_max: f32,
    pub direction: [f32; 3],
    pub pixel: u32,
    pub radiance: [f32; 3],
    pub depth: u32,
}

impl ShadowItem {
    /// Shadow ray from `from` towards `to`; the segment stops short of `to`
    pub fn towards(from: Vec3, to: Vec3, pixel: u32, depth: u32, radiance: Vec3) -> Self {
        let ray = Ray::segment(from, to);
        Self {
            origin: ray.origin.to_array(),
            t_max: ray.t_max,
            direction: ray.direction.to_array(),
            pixel,
            radiance: radiance.to_array(),
            depth,
        }
    }

    pub fn ray(&self) -> Ray {
        Ray {
            t_max: self.t_max,
            ..Ray::new(Vec3::from(self.origin), Vec3::from(self.direction))
        }
    }
}

/// Frame constants matching WGSL `FrameParams` (32 bytes).
///
/// Spawn launches whole workgroups, so kernels compare their invocation
/// index against `pixel_count` rather than the queue capacity.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameParams {
    pub width: u32,
    pub height: u32,
    pub pixel_count: u32,
    /// Bounce the current phase belongs to; spawn sees 0
    pub bounce: u32,
    pub frame_index: u32,
    pub max_bounces: u32,
    pub _pad: [u32; 2],
}

impl FrameParams {
    /// One entry per bounce of frame `frame_index`
    pub fn table(params: &TracerParams, frame_index: u32) -> Vec<FrameParams> {
        (0..params.max_bounces.max(1))
            .map(|bounce| FrameParams {
                width: params.width,
                height: params.height,
                pixel_count: params.pixel_count(),
                bounce,
                frame_index,
                max_bounces: params.max_bounces,
                _pad: [0; 2],
            })
            .collect()
    }
}

/// Size of one frame-constants record
pub const FRAME_PARAMS_SIZE: u64 = std::mem::size_of::<FrameParams>() as u64;

// Keep the layouts in step with src/shaders/wavefront_queues.wgsl
const _: () = {
    assert!(std::mem::size_of::<QueueHeader>() == 16);
    assert!(std::mem::size_of::<FrameParams>() == 32);
    assert!(std::mem::size_of::<RayItem>() == 48);
    assert!(std::mem::size_of::<HitItem>() == 64);
    assert!(std::mem::size_of::<ShadowItem>() == 48);
};

/// Fixed-capacity multi-producer queue for the host executor.
///
/// Appends claim a slot with an atomic fetch-and-increment, exactly like the
/// device-side `queue_claim`; every slot is written at most once per frame.
pub struct WorkQueue<T> {
    kind: QueueKind,
    count: AtomicU32,
    slots: Vec<OnceLock<T>>,
}

impl<T> WorkQueue<T> {
    pub fn new(kind: QueueKind, capacity: u32) -> Self {
        Self {
            kind,
            count: AtomicU32::new(0),
            slots: (0..capacity).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Append an item; safe to call from many threads at once
    pub fn push(&self, item: T) -> TraceResult<u32> {
        let slot = self.count.fetch_add(1, Ordering::AcqRel);
        let Some(cell) = self.slots.get(slot as usize) else {
            let err = TraceError::QueueOverflow {
                queue: self.kind.label(),
                capacity: self.capacity(),
            };
            log::error!("{}", err);
            return Err(err);
        };
        if cell.set(item).is_err() {
            // Only reachable if a reset skipped this slot
            return Err(TraceError::QueueOverflow {
                queue: self.kind.label(),
                capacity: self.capacity(),
            });
        }
        Ok(slot)
    }

    /// Number of readable items
    pub fn len(&self) -> u32 {
        self.count.load(Ordering::Acquire).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once a push has been refused this frame
    pub fn overflowed(&self) -> bool {
        self.count.load(Ordering::Acquire) > self.capacity()
    }

    pub fn header(&self, workgroup_size: u32) -> QueueHeader {
        QueueHeader::sized(self.len(), workgroup_size)
    }

    /// Items appended since the last reset; call only between phases
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.slots[..self.len() as usize]
            .iter()
            .filter_map(OnceLock::get)
    }

    /// Logical clear: the counter drops to zero and claimed slots are released
    pub fn reset(&mut self) {
        let used = (*self.count.get_mut()).min(self.capacity()) as usize;
        for slot in &mut self.slots[..used] {
            slot.take();
        }
        *self.count.get_mut() = 0;
    }
}

impl<T: Send + Sync> WorkQueue<T> {
    /// Parallel view of the appended items for the consuming phase
    pub fn par_iter(&self) -> impl ParallelIterator<Item = &T> + '_ {
        self.slots[..self.len() as usize]
            .par_iter()
            .filter_map(OnceLock::get)
    }
}

/// Fail when a read-back header shows more appends than the queue holds
pub fn check_overflow(headers: &[QueueHeader; 3], capacity: u32) -> TraceResult<()> {
    for kind in QueueKind::ALL {
        if headers[kind.index()].count > capacity {
            let err = TraceError::QueueOverflow {
                queue: kind.label(),
                capacity,
            };
            log::error!("{}", err);
            return Err(err);
        }
    }
    Ok(())
}

/// All GPU buffers for wavefront queues
pub struct QueueBuffers {
    pub capacity: u32,

    // Three headers back to back: ray, hit, shadow
    pub headers: Buffer,
    // Baseline headers copied over `headers` to reset queues mid-frame
    pub baseline: Buffer,
    // Indirect dispatch arguments, one slot per queue
    pub indirect: Buffer,

    pub ray_queue: Buffer,
    pub hit_queue: Buffer,
    pub shadow_queue: Buffer,

    // Frame constants bound at binding 4, refreshed per bounce from `frame_table`
    pub frame_params: Buffer,
    pub frame_table: Buffer,
    pub max_bounces: u32,

    readback: Buffer,
}

impl QueueBuffers {
    /// Create all queue buffers with given capacity and room for `max_bounces` frame records
    pub fn new(device: &Device, capacity: u32, max_bounces: u32) -> Result<Self> {
        if capacity == 0 {
            return Err(TraceError::config("queue capacity must be greater than zero").into());
        }
        let max_bounces = max_bounces.max(1);

        let headers_size = QUEUE_HEADER_SIZE * QueueKind::ALL.len() as u64;
        let baseline_headers = [QueueHeader::baseline(); 3];

        let headers = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("queue-headers"),
            size: headers_size,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let baseline = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("queue-headers-baseline"),
            contents: bytemuck::cast_slice(&baseline_headers),
            usage: BufferUsages::COPY_SRC,
        });

        let indirect = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("queue-indirect-args"),
            contents: bytemuck::cast_slice(&baseline_headers),
            usage: BufferUsages::INDIRECT | BufferUsages::COPY_DST,
        });

        let queue_buffer = |kind: QueueKind| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(match kind {
                    QueueKind::Ray => "ray-queue",
                    QueueKind::Hit => "hit-queue",
                    QueueKind::Shadow => "shadow-queue",
                }),
                size: kind.item_size() * capacity as u64,
                usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };

        let frame_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame-params"),
            size: FRAME_PARAMS_SIZE,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let frame_table = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame-params-table"),
            size: FRAME_PARAMS_SIZE * max_bounces as u64,
            usage: BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("queue-headers-readback"),
            size: headers_size,
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Ok(Self {
            capacity,
            headers,
            baseline,
            indirect,
            ray_queue: queue_buffer(QueueKind::Ray),
            hit_queue: queue_buffer(QueueKind::Hit),
            shadow_queue: queue_buffer(QueueKind::Shadow),
            frame_params,
            frame_table,
            max_bounces,
            readback,
        })
    }

    pub fn queue_buffer(&self, kind: QueueKind) -> &Buffer {
        match kind {
            QueueKind::Ray => &self.ray_queue,
            QueueKind::Hit => &self.hit_queue,
            QueueKind::Shadow => &self.shadow_queue,
        }
    }

    /// Upload the per-bounce frame records; extra entries past `max_bounces` are ignored
    pub fn write_frame_table(&self, queue: &Queue, table: &[FrameParams]) {
        let len = table.len().min(self.max_bounces as usize);
        queue.write_buffer(&self.frame_table, 0, bytemuck::cast_slice(&table[..len]));
    }

    /// Record the copy that makes `bounce`'s record the bound frame constants
    pub fn record_frame_params(&self, encoder: &mut CommandEncoder, bounce: u32) {
        let bounce = bounce.min(self.max_bounces - 1);
        encoder.copy_buffer_to_buffer(
            &self.frame_table,
            bounce as u64 * FRAME_PARAMS_SIZE,
            &self.frame_params,
            0,
            FRAME_PARAMS_SIZE,
        );
    }

    /// Record a reset of every header, ordered with the surrounding passes
    pub fn record_reset_all(&self, encoder: &mut CommandEncoder) {
        encoder.copy_buffer_to_buffer(
            &self.baseline,
            0,
            &self.headers,
            0,
            QUEUE_HEADER_SIZE * QueueKind::ALL.len() as u64,
        );
    }

    /// Record a reset of one header
    pub fn record_reset(&self, encoder: &mut CommandEncoder, kind: QueueKind) {
        let offset = kind.header_offset();
        encoder.copy_buffer_to_buffer(
            &self.baseline,
            offset,
            &self.headers,
            offset,
            QUEUE_HEADER_SIZE,
        );
    }

    /// Copy one header's dispatch field (and count) into the indirect arguments
    pub fn record_indirect_copy(&self, encoder: &mut CommandEncoder, kind: QueueKind) {
        let offset = kind.header_offset();
        encoder.copy_buffer_to_buffer(
            &self.headers,
            offset,
            &self.indirect,
            offset,
            QUEUE_HEADER_SIZE,
        );
    }

    /// Read back the three headers (blocks until the device is idle)
    pub fn read_headers(&self, device: &Device, queue: &Queue) -> Result<[QueueHeader; 3]> {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("queue-headers-readback-encoder"),
        });
        encoder.copy_buffer_to_buffer(&self.headers, 0, &self.readback, 0, self.readback.size());
        queue.submit(std::iter::once(encoder.finish()));

        let slice = self.readback.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| anyhow!(TraceError::readback("map_async channel closed")))?
            .context("Failed to map queue header readback buffer")?;

        let headers = {
            let data = slice.get_mapped_range();
            let mut headers = [QueueHeader::baseline(); 3];
            for (i, header) in headers.iter_mut().enumerate() {
                let start = i * QUEUE_HEADER_SIZE as usize;
                *header = bytemuck::pod_read_unaligned(
                    &data[start..start + QUEUE_HEADER_SIZE as usize],
                );
            }
            headers
        };
        self.readback.unmap();

        Ok(headers)
    }

    /// Layout shared by every phase: headers at 0, ray/hit/shadow items at 1-3,
    /// frame constants at 4
    pub fn create_bind_group_layout(device: &Device) -> BindGroupLayout {
        let storage = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("wavefront-queue-layout"),
            entries: &[
                storage(0),
                storage(1),
                storage(2),
                storage(3),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(FRAME_PARAMS_SIZE),
                    },
                    count: None,
                },
            ],
        })
    }

    pub fn create_bind_group(&self, device: &Device, layout: &BindGroupLayout) -> BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("wavefront-queue-bind-group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.headers.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.ray_queue.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.hit_queue.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.shadow_queue.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: self.frame_params.as_entire_binding(),
                },
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_header_layout() {
        let header = QueueHeader::baseline();
        let bytes = bytemuck::bytes_of(&header);
        assert_eq!(&bytes[0..4], &1u32.to_ne_bytes());
        assert_eq!(&bytes[12..16], &0u32.to_ne_bytes());
        assert_eq!(QueueKind::Shadow.header_offset(), 32);
    }

    #[test]
    fn dispatch_size_rounds_up_and_clamps() {
        assert_eq!(compute_dispatch_size(200, 64), [4, 1, 1]);
        assert_eq!(compute_dispatch_size(0, 64), [1, 1, 1]);
        assert_eq!(compute_dispatch_size(64, 64), [1, 1, 1]);
        assert_eq!(compute_dispatch_size(65, 64), [2, 1, 1]);
        assert_eq!(compute_dispatch_size(5, 0), [5, 1, 1]);
    }

    #[test]
    fn work_queue_push_and_reset() {
        let mut queue = WorkQueue::new(QueueKind::Ray, 4);
        for i in 0..3u32 {
            assert_eq!(queue.push(i).unwrap(), i);
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(queue.header(2).dispatch, [2, 1, 1]);

        queue.reset();
        assert!(queue.is_empty());
        assert_eq!(queue.header(64), QueueHeader::baseline());
        queue.push(9).unwrap();
        assert_eq!(queue.iter().copied().collect::<Vec<_>>(), vec![9]);
    }

    #[test]
    fn work_queue_overflow_is_reported() {
        let queue = WorkQueue::new(QueueKind::Hit, 2);
        queue.push(1u32).unwrap();
        queue.push(2u32).unwrap();
        assert_eq!(
            queue.push(3u32).unwrap_err(),
            TraceError::QueueOverflow {
                queue: "hit",
                capacity: 2
            }
        );
        assert!(queue.overflowed());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn concurrent_pushes_claim_distinct_slots() {
        let queue = WorkQueue::new(QueueKind::Shadow, 1000);
        (0..1000u32).into_par_iter().for_each(|i| {
            queue.push(i).unwrap();
        });
        let mut items: Vec<u32> = queue.par_iter().copied().collect();
        items.sort_unstable();
        assert_eq!(items, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn header_overflow_check() {
        let mut headers = [QueueHeader::baseline(); 3];
        check_overflow(&headers, 8).unwrap();
        headers[2].count = 9;
        assert!(matches!(
            check_overflow(&headers, 8),
            Err(TraceError::QueueOverflow { queue: "shadow", .. })
        ));
    }

    #[test]
    fn frame_table_has_one_record_per_bounce() {
        let params = TracerParams {
            queue_capacity: Some(128),
            ..TracerParams::new(10, 10).with_bounces(3)
        };
        let table = FrameParams::table(&params, 5);
        assert_eq!(table.len(), 3);
        for (bounce, record) in table.iter().enumerate() {
            assert_eq!(record.bounce, bounce as u32);
            // The guard uses the image size, not the larger queue capacity
            assert_eq!(record.pixel_count, 100);
            assert_eq!(record.frame_index, 5);
            assert_eq!(record.max_bounces, 3);
        }

        let words: &[u32] = bytemuck::cast_slice(&table[1..2]);
        assert_eq!(words, &[10, 10, 100, 1, 5, 3, 0, 0]);
    }

    #[test]
    fn miss_marker_keeps_context() {
        let ray = RayItem::new(Vec3::ZERO, Vec3::Z, 7, 1, Vec3::splat(0.5));
        let miss = HitItem::miss(&ray);
        assert!(miss.is_miss());
        assert_eq!(miss.pixel, 7);
        assert_eq!(miss.depth, 1);
        assert_eq!(miss.throughput, [0.5; 3]);
    }
}
