//! Error types for rasterbatch.
//!
//! Uses thiserror for structured errors with context. Errors are split by
//! the phase in which they can occur:
//! - Pipeline construction (`PipelineError`) fails loudly, before any work
//! - Per-job execution (`ExecutionError`) is recovered by the orchestrator
//! - Pool submission (`PoolError`) and batch drain (`BatchError`) surface to
//!   the caller

use crate::core::buffer::Depth;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for one orchestrator invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub Uuid);

impl BatchId {
    /// Create a new random batch ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Top-level error type for rasterbatch.
///
/// This enum encompasses all error categories and enables automatic
/// conversion between specific error types.
#[derive(Error, Debug)]
pub enum RasterError {
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building a stage chain.
///
/// These indicate a misconfigured pipeline rather than bad input data, so
/// they are never deferred to execution time.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineError {
    #[error("Invalid parameters for stage '{stage}': {reason}")]
    InvalidStageParameters { stage: String, reason: String },

    #[error("Unsupported stage: '{0}'")]
    UnsupportedStage(String),
}

impl PipelineError {
    pub(crate) fn invalid(stage: &str, reason: impl Into<String>) -> Self {
        PipelineError::InvalidStageParameters {
            stage: stage.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors while running a job or a kernel.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to load image '{}': {reason}", .path.display())]
    ImageLoad { path: PathBuf, reason: String },

    #[error("Image '{}' is empty", .path.display())]
    ImageEmpty { path: PathBuf },

    #[error("Kernel size must be odd and positive, got {0}")]
    InvalidKernelSize(i64),

    #[error("Block size must be odd and greater than 1, got {0}")]
    InvalidBlockSize(i64),

    #[error("Histogram height must be positive, got {0}")]
    InvalidHistogramHeight(u32),

    #[error(transparent)]
    InvalidStage(#[from] PipelineError),

    #[error("Operation '{operation}' needs {expected} channel(s), buffer has {actual}")]
    ChannelCount {
        operation: &'static str,
        expected: &'static str,
        actual: u8,
    },

    #[error("Unsupported pixel depth {0:?}")]
    UnsupportedDepth(Depth),

    #[error("Buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("Failed to write '{}': {reason}", .path.display())]
    Write { path: PathBuf, reason: String },

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Execution cancelled")]
    Cancelled,
}

impl ExecutionError {
    /// Check if this error is recoverable (the batch can continue with other
    /// jobs).
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ExecutionError::Cancelled | ExecutionError::Pool(_))
    }
}

/// Errors from the worker pool.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Worker pool is closed")]
    PoolClosed,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors from a batch run.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Worker pool is closed")]
    PoolClosed,

    #[error("Batch timed out after completing {completed}/{total} jobs")]
    Timeout { completed: usize, total: usize },

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Errors while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid pipeline in config: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Errors surfaced to front-end callers.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Missing required parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("Failed to decode uploaded image: {0}")]
    Decode(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("Failed to start batch thread: {0}")]
    Spawn(std::io::Error),

    #[error("Batch thread panicked")]
    BatchPanicked,
}

/// Result type alias for pipeline construction.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type alias for execution operations.
pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_id_display() {
        let id = BatchId::new();
        assert_eq!(format!("{}", id).len(), 8);
    }

    #[test]
    fn test_recoverable_errors() {
        let load = ExecutionError::ImageLoad {
            path: PathBuf::from("broken.png"),
            reason: "truncated".to_string(),
        };
        assert!(load.is_recoverable());
        assert!(!ExecutionError::Cancelled.is_recoverable());
        assert!(!ExecutionError::Pool(PoolError::PoolClosed).is_recoverable());
    }

    #[test]
    fn test_pipeline_error_message_names_stage() {
        let err = PipelineError::invalid("threshold", "expects 1 parameter, got 0");
        assert!(err.to_string().contains("threshold"));
        assert!(err.to_string().contains("expects 1 parameter"));
    }

    #[test]
    fn test_batch_error_keeps_pool_cause() {
        let spawn = PoolError::Spawn(std::io::Error::new(std::io::ErrorKind::Other, "no threads left"));
        let err = BatchError::from(spawn);
        assert!(matches!(err, BatchError::Pool(PoolError::Spawn(_))));
        assert!(err.to_string().contains("no threads left"));

        let closed = BatchError::from(PoolError::PoolClosed);
        assert!(matches!(closed, BatchError::Pool(PoolError::PoolClosed)));
    }
}
