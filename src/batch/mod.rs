//! Batch processing: enumeration, dispatch, drain and reporting.

pub mod io;
pub mod orchestrator;
pub mod report;

pub use io::{decode_image, encode_png, list_images, read_image, write_image, ListOptions};
pub use orchestrator::{
    BatchOptions, BatchOrchestrator, BatchRequest, DEFAULT_DRAIN_TIMEOUT, DEFAULT_OUTPUT_PREFIX,
};
pub use report::{BatchPhase, BatchReport, JobFailure};
