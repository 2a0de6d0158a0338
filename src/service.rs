//! Front-end operation modes.
//!
//! [`ImageService`] is what a transport layer (CLI, HTTP handler) calls into.
//! It exposes synchronous single-image calls (PNG bytes back, or a file
//! written to disk) and an asynchronous batch trigger that validates its arguments,
//! hands the batch to the orchestrator on a background thread and returns
//! an acknowledgement straight away.

use crate::batch::io::{decode_image, encode_png, read_image, write_image};
use crate::batch::orchestrator::{BatchOrchestrator, BatchRequest};
use crate::batch::report::BatchReport;
use crate::core::buffer::PixelBuffer;
use crate::core::error::{BatchError, ServiceError};
use crate::execution::strategy::execute_on_pool;
use crate::pipeline::Pipeline;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{error, info};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Acknowledgement returned as soon as a batch has been handed off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchAccepted {
    pub message: String,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub pipeline: String,
}

/// Handle to a batch running in the background.
#[derive(Debug)]
pub struct BatchTicket {
    accepted: BatchAccepted,
    handle: JoinHandle<Result<BatchReport, BatchError>>,
}

impl BatchTicket {
    pub fn accepted(&self) -> &BatchAccepted {
        &self.accepted
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the batch completes.
    pub fn join(self) -> Result<BatchReport, ServiceError> {
        match self.handle.join() {
            Ok(result) => Ok(result?),
            Err(_) => Err(ServiceError::BatchPanicked),
        }
    }
}

/// Single-image and batch entry points over one shared orchestrator.
#[derive(Debug, Clone)]
pub struct ImageService {
    orchestrator: Arc<BatchOrchestrator>,
    pipeline: Arc<Pipeline>,
    batches: Arc<AtomicUsize>,
}

impl ImageService {
    /// `pipeline` is used for single-image calls.
    pub fn new(orchestrator: Arc<BatchOrchestrator>, pipeline: Pipeline) -> Self {
        Self {
            orchestrator,
            pipeline: Arc::new(pipeline),
            batches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn orchestrator(&self) -> &Arc<BatchOrchestrator> {
        &self.orchestrator
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Decode `bytes`, run the pipeline and return the result as PNG.
    pub fn process_bytes(&self, bytes: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let buffer = decode_image(bytes).map_err(|e| ServiceError::Decode(e.to_string()))?;
        self.process_buffer(buffer)
    }

    /// Read the image at `path`, run the pipeline and return the result as PNG.
    pub fn process_path(&self, path: &Path) -> Result<Vec<u8>, ServiceError> {
        let buffer = read_image(path)?;
        self.process_buffer(buffer)
    }

    /// Read `input`, run the pipeline and write the result to `output`.
    /// The output format follows the extension of `output`.
    pub fn process_file(&self, input: &Path, output: &Path) -> Result<(), ServiceError> {
        let result = self.run(read_image(input)?)?;
        write_image(output, &result)?;
        Ok(())
    }

    fn process_buffer(&self, buffer: PixelBuffer) -> Result<Vec<u8>, ServiceError> {
        let output = self.run(buffer)?;
        Ok(encode_png(&output)?)
    }

    fn run(&self, buffer: PixelBuffer) -> Result<PixelBuffer, ServiceError> {
        let output = execute_on_pool(
            self.orchestrator.pool(),
            Arc::clone(&self.pipeline),
            buffer,
            *self.orchestrator.policy(),
        )?;
        Ok(output)
    }

    /// Start a batch in the background.
    ///
    /// Both directories are required. The returned ticket can be dropped;
    /// the batch keeps running and logs its own report.
    pub fn start_batch(
        &self,
        input_dir: Option<PathBuf>,
        output_dir: Option<PathBuf>,
        pipeline: Pipeline,
    ) -> Result<BatchTicket, ServiceError> {
        let input_dir = input_dir.ok_or(ServiceError::MissingParameter("input"))?;
        let output_dir = output_dir.ok_or(ServiceError::MissingParameter("output"))?;

        let accepted = BatchAccepted {
            message: format!(
                "Batch processing started. Input: {}, Output: {}",
                input_dir.display(),
                output_dir.display()
            ),
            input_dir: input_dir.clone(),
            output_dir: output_dir.clone(),
            pipeline: pipeline.to_string(),
        };

        let orchestrator = Arc::clone(&self.orchestrator);
        let request = BatchRequest::new(input_dir, output_dir, pipeline);
        let n = self.batches.fetch_add(1, Ordering::Relaxed);
        let handle = thread::Builder::new()
            .name(format!("batch-{}", n))
            .spawn(move || {
                let result = orchestrator.run(request);
                if let Err(e) = &result {
                    error!("Background batch failed: {}", e);
                }
                result
            })
            .map_err(ServiceError::Spawn)?;

        info!("{}", accepted.message);
        Ok(BatchTicket { accepted, handle })
    }
}

/// Render PNG bytes as a `data:` URI.
pub fn png_data_uri(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64.encode(png))
}
