//! Execution layer.
//!
//! This module owns the worker pool and the per-job execution strategy.

pub mod pool;
pub mod progress;
pub mod strategy;

pub use pool::{AwaitOutcome, PoolConfig, PoolState, PoolStats, TaskContext, TaskHandle, WorkerPool};
pub use progress::{ProgressCallback, ProgressTracker, ProgressUpdate};
pub use strategy::{
    execute_on_pool, run_pipeline, Dimension, ExecutionStrategy, StrategyMode, StrategyPolicy,
    DEFAULT_REGION_THRESHOLD,
};
