// src/path_tracing/wavefront/pipeline.rs
// WGSL pipeline orchestration for wavefront path tracing
// Creates the dispatch-size pipeline and compiles externally supplied phase kernels against the queue layout

use std::borrow::Cow;

use anyhow::{Context, Result};
use wgpu::{BindGroup, BindGroupLayout, ComputePipeline, Device};

use super::queues::QueueBuffers;

/// Queue structs, bindings and append helpers shared by every phase kernel
pub const QUEUE_WGSL: &str = include_str!("../../shaders/wavefront_queues.wgsl");

/// Scene node, triangle, vertex and instance declarations bound at group 1
pub const SCENE_WGSL: &str = include_str!("../../shaders/scene_buffers.wgsl");

const DISPATCH_WGSL: &str = include_str!("../../shaders/queue_dispatch.wgsl");

/// Uniform for the dispatch-size kernel (matches WGSL `DispatchParams`)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DispatchParams {
    pub workgroup_size: u32,
    pub _pad: [u32; 3],
}

impl DispatchParams {
    pub fn new(workgroup_size: u32) -> Self {
        Self {
            workgroup_size: workgroup_size.max(1),
            _pad: [0; 3],
        }
    }
}

/// One phase kernel: its pipeline plus the bind groups for groups 1..
///
/// Group 0 is always the queue bind group and is set by the scheduler.
pub struct PhaseKernel {
    pub pipeline: ComputePipeline,
    pub bind_groups: Vec<BindGroup>,
}

/// The four externally supplied kernels of a frame
pub struct PhaseKernels {
    /// One invocation per pixel; appends primary rays
    pub spawn: PhaseKernel,
    /// One invocation per ray item; appends exactly one hit item
    pub intersect: PhaseKernel,
    /// One invocation per hit item; may append rays and shadow rays
    pub shade: PhaseKernel,
    /// One invocation per shadow item; accumulates unoccluded radiance
    pub shadow: PhaseKernel,
}

/// Pipelines owned by the queue system
pub struct WavefrontPipelines {
    pub dispatch_size: ComputePipeline,

    // Shared bind group layouts
    pub queue_bind_group_layout: BindGroupLayout,
    pub dispatch_params_bind_group_layout: BindGroupLayout,
}

impl WavefrontPipelines {
    pub fn new(device: &Device) -> Result<Self> {
        let queue_bind_group_layout = QueueBuffers::create_bind_group_layout(device);

        let dispatch_params_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("queue-dispatch-params-layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<DispatchParams>() as u64,
                        ),
                    },
                    count: None,
                }],
            });

        let dispatch_size = compile_phase_kernel(
            device,
            "queue-dispatch",
            DISPATCH_WGSL,
            &queue_bind_group_layout,
            &[&dispatch_params_bind_group_layout],
        )
        .context("Failed to create queue dispatch-size pipeline")?;

        Ok(Self {
            dispatch_size,
            queue_bind_group_layout,
            dispatch_params_bind_group_layout,
        })
    }

    /// Compile a phase kernel body against the queue declarations
    pub fn compile_phase(
        &self,
        device: &Device,
        label: &str,
        body: &str,
        extra_layouts: &[&BindGroupLayout],
    ) -> Result<ComputePipeline> {
        compile_phase_kernel(
            device,
            label,
            body,
            &self.queue_bind_group_layout,
            extra_layouts,
        )
    }

    /// Compile a kernel that also reads the scene buffers.
    ///
    /// `scene_layout` lands at group 1 (see `GpuScene::create_bind_group_layout`);
    /// `extra_layouts` follow from group 2.
    pub fn compile_scene_phase(
        &self,
        device: &Device,
        label: &str,
        body: &str,
        scene_layout: &BindGroupLayout,
        extra_layouts: &[&BindGroupLayout],
    ) -> Result<ComputePipeline> {
        let mut layouts = Vec::with_capacity(extra_layouts.len() + 1);
        layouts.push(scene_layout);
        layouts.extend_from_slice(extra_layouts);
        self.compile_phase(device, label, &format!("{SCENE_WGSL}\n{body}"), &layouts)
    }
}

/// Prepend the queue declarations to `body` and build a `main` compute pipeline
/// whose group 0 is the queue layout.
///
/// Shader validation errors are captured through an error scope so they
/// surface as `Err` instead of a device panic.
fn compile_phase_kernel(
    device: &Device,
    label: &str,
    body: &str,
    queue_layout: &BindGroupLayout,
    extra_layouts: &[&BindGroupLayout],
) -> Result<ComputePipeline> {
    let source = format!("{QUEUE_WGSL}\n{body}");

    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&format!("{label}-shader")),
        source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
    });

    let mut layouts: Vec<&BindGroupLayout> = Vec::with_capacity(extra_layouts.len() + 1);
    layouts.push(queue_layout);
    layouts.extend_from_slice(extra_layouts);

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&format!("{label}-pipeline-layout")),
        bind_group_layouts: &layouts,
        push_constant_ranges: &[],
    });

    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(&format!("{label}-pipeline")),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: "main",
    });

    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        anyhow::bail!("Phase kernel '{}' failed validation: {}", label, err);
    }

    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_declarations_match_host_layouts() {
        for decl in [
            "struct BvhNode",
            "struct TlasNode",
            "struct Vertex",
            "struct Triangle",
            "struct Instance",
            "struct SceneInfo",
        ] {
            assert!(SCENE_WGSL.contains(decl), "missing {decl}");
        }
        // Scene lives at group 1 so it never collides with the queue group
        assert!(!SCENE_WGSL.contains("@group(0)"));
        assert!(QUEUE_WGSL.contains("fn spawn_has_pixel"));
        assert!(QUEUE_WGSL.contains("var<uniform> frame_params"));
    }
}
