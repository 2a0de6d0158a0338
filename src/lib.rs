//! # Rasterbatch - Concurrent batch raster processing
//!
//! Rasterbatch applies a chain of raster transforms (color conversion, blur,
//! binarization, channel isolation, histogram) to every image in a
//! directory, in parallel, on a bounded worker pool.
//!
//! ## Features
//!
//! - **Bounded worker pool**: fixed thread count, fork-join sub-tasks that
//!   never deadlock, cooperative cancellation on timeout
//! - **Region-parallel execution**: large images are split into horizontal
//!   bands processed concurrently, with output identical to direct execution
//! - **Failure isolation**: a bad file is logged and counted, the rest of the
//!   batch carries on
//! - **Validated pipelines**: stage parameters are checked when the chain is
//!   built, never halfway through a batch
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rasterbatch::prelude::*;
//! use std::sync::Arc;
//!
//! let pool = Arc::new(WorkerPool::new(PoolConfig::new())?);
//! let orchestrator = BatchOrchestrator::new(pool, StrategyPolicy::default(), BatchOptions::default());
//!
//! let pipeline = Pipeline::parse("grayscale,blur:5,adaptive_gaussian:11:2")?;
//! let report = orchestrator.run(BatchRequest::new("scans", "scans_bin", pipeline))?;
//! println!("{}", report);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: Pixel buffers, regions, errors and configuration
//! - [`kernels`]: Raster kernels over `image`/`imageproc`
//! - [`pipeline`]: Stages, the stage registry and stage chains
//! - [`execution`]: Worker pool, execution strategy and progress events
//! - [`batch`]: Directory enumeration, codec I/O and the batch orchestrator
//! - [`service`]: Single-image and background-batch entry points

#![warn(clippy::all)]

pub mod batch;
pub mod core;
pub mod execution;
pub mod kernels;
pub mod pipeline;
pub mod service;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use rasterbatch::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::buffer::{Depth, PixelBuffer};
    pub use crate::core::config::BatchConfig;
    pub use crate::core::region::{partition, Region};

    // Errors
    pub use crate::core::error::{
        BatchError, BatchId, ConfigError, ExecutionError, PipelineError, PoolError, RasterError,
        ServiceError,
    };

    // Pipeline
    pub use crate::pipeline::{ParamValue, Pipeline, Stage, StageConfig, StageRegistry, ThresholdMethod};

    // Execution
    pub use crate::execution::{
        AwaitOutcome, Dimension, PoolConfig, PoolState, ProgressUpdate, StrategyMode, StrategyPolicy,
        TaskContext, TaskHandle, WorkerPool,
    };

    // Batch
    pub use crate::batch::{BatchOptions, BatchOrchestrator, BatchReport, BatchRequest};
    pub use crate::service::{BatchAccepted, BatchTicket, ImageService};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
        assert_eq!(super::NAME, "rasterbatch");
    }

    #[test]
    fn test_prelude_pipeline_on_pool() {
        let pool = WorkerPool::new(PoolConfig::new().with_threads(2)).unwrap();
        let buffer = PixelBuffer::from_fn(32, 16, 3, |x, y, c| (x * 7 + y * 3 + c as u32) as u8).unwrap();
        let pipeline = Pipeline::parse("grayscale,otsu").unwrap();
        let expected = pipeline.apply(&buffer).unwrap();

        let policy = StrategyPolicy::new().with_mode(StrategyMode::RegionParallel);
        let out = crate::execution::execute_on_pool(&pool, std::sync::Arc::new(pipeline), buffer, policy).unwrap();
        assert_eq!(out, expected);
    }
}
