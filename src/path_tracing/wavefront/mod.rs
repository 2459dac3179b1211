// src/path_tracing/wavefront/mod.rs
// Wavefront Path Tracer: Main scheduler and orchestration
// Records spawn, then per bounce the dispatch-size, header copy and indirect launch of intersect, shade and shadow

pub mod cpu;
pub mod pipeline;
pub mod queues;

use std::sync::Arc;

use anyhow::{Context, Result};
use wgpu::util::DeviceExt;
use wgpu::{BindGroup, Buffer, CommandEncoder, Device, Queue};

use crate::path_tracing::TracerParams;
use pipeline::{DispatchParams, PhaseKernel, PhaseKernels, WavefrontPipelines};
use queues::{
    check_overflow, compute_dispatch_size, FrameParams, QueueBuffers, QueueHeader, QueueKind,
};

pub use cpu::{BounceStats, CpuWavefront, FrameInfo, FrameStats, ShadeResult, ShadingKernels};

/// Wavefront path tracer scheduler
/// Orchestrates queue-based path tracing on GPU with indirect launches sized from queue counts
pub struct WavefrontScheduler {
    device: Arc<Device>,
    queue: Arc<Queue>,
    params: TracerParams,
    pipelines: WavefrontPipelines,
    queue_buffers: QueueBuffers,
    queue_bind_group: BindGroup,
    // Kept alive for the params bind group
    _dispatch_params: Buffer,
    dispatch_params_bind_group: BindGroup,
    frame_index: u32,
}

impl WavefrontScheduler {
    /// Create new wavefront scheduler
    pub fn new(device: Arc<Device>, queue: Arc<Queue>, params: TracerParams) -> Result<Self> {
        params.validate()?;

        let pipelines = WavefrontPipelines::new(&device)?;
        let queue_buffers = QueueBuffers::new(&device, params.capacity(), params.max_bounces)
            .context("Failed to allocate wavefront queues")?;
        let queue_bind_group =
            queue_buffers.create_bind_group(&device, &pipelines.queue_bind_group_layout);

        let dispatch_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("queue-dispatch-params"),
            contents: bytemuck::bytes_of(&DispatchParams::new(params.workgroup_size)),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let dispatch_params_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("queue-dispatch-params-bind-group"),
            layout: &pipelines.dispatch_params_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: dispatch_params.as_entire_binding(),
            }],
        });

        log::info!(
            "Wavefront scheduler: {}x{}, {} items per queue, workgroup {}, {} bounce(s)",
            params.width,
            params.height,
            params.capacity(),
            params.workgroup_size,
            params.max_bounces
        );

        Ok(Self {
            device,
            queue,
            params,
            pipelines,
            queue_buffers,
            queue_bind_group,
            _dispatch_params: dispatch_params,
            dispatch_params_bind_group,
            frame_index: 0,
        })
    }

    pub fn params(&self) -> &TracerParams {
        &self.params
    }

    /// Pipelines and layouts phase kernels are compiled against
    pub fn pipelines(&self) -> &WavefrontPipelines {
        &self.pipelines
    }

    pub fn queue_buffers(&self) -> &QueueBuffers {
        &self.queue_buffers
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    /// Upload this frame's per-bounce constants; `render_frame` does this itself
    pub fn write_frame_params(&self) {
        let table = FrameParams::table(&self.params, self.frame_index);
        self.queue_buffers.write_frame_table(&self.queue, &table);
    }

    /// Record and submit one frame
    pub fn render_frame(&mut self, kernels: &PhaseKernels) -> Result<()> {
        self.write_frame_params();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("wavefront-frame"),
            });

        self.record_frame(&mut encoder, kernels);

        let command_buffer = encoder.finish();
        self.queue.submit(std::iter::once(command_buffer));

        self.frame_index += 1;
        Ok(())
    }

    /// Record every phase of a frame; command order is the only barrier needed.
    ///
    /// Call [`Self::write_frame_params`] before submitting a frame recorded
    /// into a caller-owned encoder.
    pub fn record_frame(&self, encoder: &mut CommandEncoder, kernels: &PhaseKernels) {
        let qb = &self.queue_buffers;

        // Reset queue counters for new frame
        qb.record_reset_all(encoder);
        qb.record_frame_params(encoder, 0);

        // Spawn is sized by the image, not by a queue
        let spawn_groups = compute_dispatch_size(self.params.pixel_count(), self.params.workgroup_size);
        self.dispatch_direct(encoder, "spawn-pass", &kernels.spawn, spawn_groups);

        for bounce in 0..self.params.max_bounces {
            log::trace!("Recording bounce {} of frame {}", bounce, self.frame_index);
            qb.record_frame_params(encoder, bounce);

            qb.record_reset(encoder, QueueKind::Hit);
            self.dispatch_size(encoder, QueueKind::Ray);
            self.dispatch_indirect(encoder, "intersect-pass", &kernels.intersect, QueueKind::Ray);

            qb.record_reset(encoder, QueueKind::Ray);
            qb.record_reset(encoder, QueueKind::Shadow);
            self.dispatch_size(encoder, QueueKind::Hit);
            self.dispatch_indirect(encoder, "shade-pass", &kernels.shade, QueueKind::Hit);

            self.dispatch_size(encoder, QueueKind::Shadow);
            self.dispatch_indirect(encoder, "shadow-pass", &kernels.shadow, QueueKind::Shadow);
        }
    }

    /// Read back the queue headers left by the last submitted frame
    pub fn read_headers(&self) -> Result<[QueueHeader; 3]> {
        let headers = self.queue_buffers.read_headers(&self.device, &self.queue)?;
        check_overflow(&headers, self.queue_buffers.capacity)?;
        log::debug!(
            "Frame {} queue counts: ray {} hit {} shadow {}",
            self.frame_index,
            headers[QueueKind::Ray.index()].count,
            headers[QueueKind::Hit.index()].count,
            headers[QueueKind::Shadow.index()].count
        );
        Ok(headers)
    }

    /// Size every queue's next launch, then copy `kind`'s header into its indirect slot
    fn dispatch_size(&self, encoder: &mut CommandEncoder, kind: QueueKind) {
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("queue-dispatch-pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines.dispatch_size);
            pass.set_bind_group(0, &self.queue_bind_group, &[]);
            pass.set_bind_group(1, &self.dispatch_params_bind_group, &[]);
            pass.dispatch_workgroups(1, 1, 1);
        }
        self.queue_buffers.record_indirect_copy(encoder, kind);
    }

    fn dispatch_direct(
        &self,
        encoder: &mut CommandEncoder,
        label: &str,
        kernel: &PhaseKernel,
        groups: [u32; 3],
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        self.bind_kernel(&mut pass, kernel);
        pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
    }

    fn dispatch_indirect(
        &self,
        encoder: &mut CommandEncoder,
        label: &str,
        kernel: &PhaseKernel,
        kind: QueueKind,
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        self.bind_kernel(&mut pass, kernel);
        pass.dispatch_workgroups_indirect(&self.queue_buffers.indirect, kind.header_offset());
    }

    fn bind_kernel<'a>(&'a self, pass: &mut wgpu::ComputePass<'a>, kernel: &'a PhaseKernel) {
        pass.set_pipeline(&kernel.pipeline);
        pass.set_bind_group(0, &self.queue_bind_group, &[]);
        for (i, group) in kernel.bind_groups.iter().enumerate() {
            pass.set_bind_group(i as u32 + 1, group, &[]);
        }
    }
}
