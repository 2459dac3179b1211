// src/path_tracing/mod.rs
// Path tracing configuration and the wavefront queue scheduler.
// This exists to hold the frame-level parameters shared by the CPU executor and the GPU phase recorder.
// RELEVANT FILES:src/path_tracing/wavefront/mod.rs,src/path_tracing/wavefront/cpu.rs,src/shaders/queue_dispatch.wgsl,src/lib.rs

pub mod wavefront;

use serde::{Deserialize, Serialize};

use crate::error::{TraceError, TraceResult};

/// Largest bounce budget accepted by [`TracerParams::validate`]
pub const MAX_BOUNCES: u32 = 8;

/// Most workgroups a single indirect dispatch may request along x
pub const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65_535;

/// Parameters for one wavefront frame
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerParams {
    pub width: u32,
    pub height: u32,
    /// Invocations per workgroup; every phase kernel uses the same size
    pub workgroup_size: u32,
    /// Intersect/shade/shadow rounds per frame
    pub max_bounces: u32,
    /// Items per queue; `None` sizes each queue at one item per pixel
    pub queue_capacity: Option<u32>,
}

impl Default for TracerParams {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            workgroup_size: 64,
            max_bounces: 1,
            queue_capacity: None,
        }
    }
}

impl TracerParams {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    pub fn with_bounces(mut self, max_bounces: u32) -> Self {
        self.max_bounces = max_bounces;
        self
    }

    pub fn pixel_count(&self) -> u32 {
        self.width.saturating_mul(self.height)
    }

    /// Effective per-queue capacity
    pub fn capacity(&self) -> u32 {
        self.queue_capacity.unwrap_or_else(|| self.pixel_count())
    }

    pub fn validate(&self) -> TraceResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(TraceError::config(format!(
                "image size {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if self.workgroup_size == 0 {
            return Err(TraceError::config("workgroup_size must be greater than zero"));
        }
        if !(1..=MAX_BOUNCES).contains(&self.max_bounces) {
            return Err(TraceError::config(format!(
                "max_bounces must be within [1, {MAX_BOUNCES}], got {}",
                self.max_bounces
            )));
        }
        let capacity = self.capacity();
        if capacity < self.pixel_count() {
            return Err(TraceError::config(format!(
                "queue_capacity {capacity} is below one item per pixel ({})",
                self.pixel_count()
            )));
        }
        let groups = capacity.div_ceil(self.workgroup_size);
        if groups > MAX_WORKGROUPS_PER_DIMENSION {
            return Err(TraceError::config(format!(
                "queue_capacity {capacity} needs {groups} workgroups of {}, limit is {MAX_WORKGROUPS_PER_DIMENSION}",
                self.workgroup_size
            )));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> TraceResult<Self> {
        let params: Self = serde_json::from_str(json).map_err(TraceError::config)?;
        params.validate()?;
        Ok(params)
    }

    pub fn to_json(&self) -> TraceResult<String> {
        serde_json::to_string_pretty(self).map_err(TraceError::config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_serialize_and_validate() {
        let params = TracerParams::default();
        let json = params.to_json().unwrap();
        let de = TracerParams::from_json(&json).unwrap();
        assert_eq!(de, params);
        assert_eq!(de.capacity(), 512 * 512);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let params = TracerParams::from_json(r#"{ "width": 8, "height": 4, "max_bounces": 3 }"#)
            .unwrap();
        assert_eq!(params.workgroup_size, 64);
        assert_eq!(params.capacity(), 32);
        assert_eq!(params.max_bounces, 3);
    }

    #[test]
    fn rejects_invalid_params() {
        assert!(TracerParams::new(0, 4).validate().is_err());
        assert!(TracerParams::new(4, 4).with_bounces(0).validate().is_err());
        assert!(TracerParams::new(4, 4).with_bounces(9).validate().is_err());

        let small = TracerParams {
            queue_capacity: Some(15),
            ..TracerParams::new(4, 4)
        };
        assert!(small.validate().is_err());

        let huge = TracerParams {
            workgroup_size: 1,
            ..TracerParams::new(1024, 1024)
        };
        assert!(matches!(huge.validate(), Err(TraceError::Config(_))));
    }
}
