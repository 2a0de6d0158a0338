//! Core types for rasterbatch.
//!
//! - Pixel buffers and band views
//! - Region partitioning
//! - Error types
//! - TOML configuration

pub mod buffer;
pub mod config;
pub mod error;
pub mod region;

pub use buffer::{Depth, PixelBuffer, RegionViewMut};
pub use config::BatchConfig;
pub use error::{
    BatchError, BatchId, ConfigError, ExecutionError, ExecutionResult, PipelineError, PipelineResult,
    PoolError, RasterError, ServiceError,
};
pub use region::Region;
