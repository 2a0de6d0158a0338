//! Stage chains applied to each job.
//!
//! Stages are built through [`StageRegistry`], which validates names and
//! parameters before any image is touched.

pub mod chain;
pub mod registry;
pub mod stage;

pub use chain::{Pipeline, StageConfig};
pub use registry::{StageCategory, StageEntry, StageRegistry};
pub use stage::{BandKernel, ChannelSpace, ParamValue, Prepared, Stage, ThresholdMethod};
