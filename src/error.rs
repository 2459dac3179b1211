//! Central error handling for wavetrace
//!
//! Structural errors surfaced while assembling a scene or running the
//! wavefront queues. None of these are transient: there is nothing to retry.

/// Centralized error type for acceleration-structure and queue operations
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TraceError {
    #[error("Mesh {mesh} has no triangles")]
    EmptyMesh { mesh: usize },

    #[error("Triangle {triangle} references vertex {index}, mesh has {vertex_count} vertices")]
    InvalidTriangle {
        triangle: usize,
        index: u32,
        vertex_count: usize,
    },

    #[error("TLAS build requires at least one instance")]
    NoInstances,

    #[error("Instance references unknown mesh {mesh}")]
    UnknownMesh { mesh: usize },

    #[error("{queue} queue overflow: capacity {capacity} exceeded")]
    QueueOverflow { queue: &'static str, capacity: u32 },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Readback error: {0}")]
    Readback(String),
}

impl TraceError {
    /// Short category label used in log lines
    pub fn category(&self) -> &'static str {
        match self {
            TraceError::EmptyMesh { .. }
            | TraceError::InvalidTriangle { .. }
            | TraceError::UnknownMesh { .. } => "Geometry",
            TraceError::NoInstances => "Scene",
            TraceError::QueueOverflow { .. } => "Queue",
            TraceError::Config(_) => "Config",
            TraceError::Device(_) => "Device",
            TraceError::Readback(_) => "Readback",
        }
    }

    pub fn config<T: ToString>(msg: T) -> Self {
        TraceError::Config(msg.to_string())
    }

    pub fn device<T: ToString>(msg: T) -> Self {
        TraceError::Device(msg.to_string())
    }

    pub fn readback<T: ToString>(msg: T) -> Self {
        TraceError::Readback(msg.to_string())
    }
}

/// Result type alias for wavetrace operations
pub type TraceResult<T> = Result<T, TraceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_and_messages() {
        let err = TraceError::QueueOverflow {
            queue: "hit",
            capacity: 16,
        };
        assert_eq!(err.category(), "Queue");
        assert_eq!(err.to_string(), "hit queue overflow: capacity 16 exceeded");

        let err = TraceError::config("max_bounces must be in 1..=8");
        assert_eq!(err.category(), "Config");
        assert!(err.to_string().contains("max_bounces"));

        let err = TraceError::device("no suitable GPU adapter");
        assert_eq!(err.category(), "Device");
        assert_eq!(err.to_string(), "Device error: no suitable GPU adapter");
    }
}
