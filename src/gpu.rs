//! Device acquisition for the wavefront scheduler and GPU tests.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::error::TraceError;

/// Queue group plus scene group, both visible to one kernel
pub const REQUIRED_STORAGE_BUFFERS: u32 = 8;

/// GPU context option for the wavefront scheduler
#[derive(Clone)]
pub enum GpuContext {
    Available {
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
    },
    NotAvailable,
}

impl GpuContext {
    /// Request a device able to run indirect compute dispatches.
    ///
    /// Falls back to `NotAvailable` (with a warning) instead of failing, so
    /// callers can pick the CPU executor.
    pub fn acquire() -> Self {
        match request_device() {
            Ok((device, queue)) => GpuContext::Available { device, queue },
            Err(e) => {
                log::warn!("GPU unavailable, use the CPU wavefront executor: {:#}", e);
                GpuContext::NotAvailable
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, GpuContext::Available { .. })
    }
}

fn request_device() -> Result<(Arc<wgpu::Device>, Arc<wgpu::Queue>)> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .ok_or_else(|| TraceError::device("no suitable GPU adapter"))?;

    let downlevel = adapter.get_downlevel_capabilities();
    if !downlevel
        .flags
        .contains(wgpu::DownlevelFlags::INDIRECT_EXECUTION)
    {
        return Err(TraceError::device(format!(
            "adapter '{}' does not support indirect execution",
            adapter.get_info().name
        ))
        .into());
    }

    let limits = adapter.limits();
    if limits.max_storage_buffers_per_shader_stage < REQUIRED_STORAGE_BUFFERS {
        return Err(TraceError::device(format!(
            "adapter '{}' exposes {} storage buffers per stage, scene kernels need {}",
            adapter.get_info().name,
            limits.max_storage_buffers_per_shader_stage,
            REQUIRED_STORAGE_BUFFERS
        ))
        .into());
    }

    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            required_features: wgpu::Features::empty(),
            required_limits: limits,
            label: Some("wavetrace-device"),
        },
        None,
    ))
    .context("request_device failed")?;

    Ok((Arc::new(device), Arc::new(queue)))
}
