//! Batch orchestrator.
//!
//! One run walks `Idle -> Enumerating -> Dispatching -> Draining ->
//! Completed`: list the input directory, submit one job task per image,
//! then wait for every job with a single deadline. A job that fails is
//! logged and counted; it never stops its siblings. If the deadline passes,
//! the pool is terminated and the remaining jobs are reported as
//! cancelled.

use crate::batch::io::{list_images, output_path, read_image, write_image, ListOptions};
use crate::batch::report::{BatchPhase, BatchReport, JobFailure};
use crate::core::error::{BatchError, BatchId, ExecutionError, ExecutionResult};
use crate::execution::pool::{PoolState, TaskContext, WorkerPool};
use crate::execution::progress::{ProgressCallback, ProgressTracker, ProgressUpdate};
use crate::execution::strategy::{run_pipeline, StrategyPolicy};
use crate::execution::AwaitOutcome;
use crate::pipeline::Pipeline;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Prefix added to every output file name.
pub const DEFAULT_OUTPUT_PREFIX: &str = "processado_";

/// How long a batch may take to drain before it is force-terminated.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Batch run options.
#[derive(Clone)]
pub struct BatchOptions {
    pub output_prefix: String,
    pub drain_timeout: Duration,
    pub listing: ListOptions,
    pub progress_callback: Option<Arc<ProgressCallback>>,
}

impl std::fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("output_prefix", &self.output_prefix)
            .field("drain_timeout", &self.drain_timeout)
            .field("listing", &self.listing)
            .field("progress_callback", &self.progress_callback.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            listing: ListOptions::default(),
            progress_callback: None,
        }
    }
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_prefix = prefix.into();
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_listing(mut self, listing: ListOptions) -> Self {
        self.listing = listing;
        self
    }

    /// Set progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }
}

/// Input of one orchestrator run.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub pipeline: Arc<Pipeline>,
}

impl BatchRequest {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, pipeline: Pipeline) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            pipeline: Arc::new(pipeline),
        }
    }
}

/// One image's unit of work.
struct Job {
    batch_id: BatchId,
    source: PathBuf,
    output: PathBuf,
    pipeline: Arc<Pipeline>,
    policy: StrategyPolicy,
    tracker: Arc<ProgressTracker>,
}

impl Job {
    fn run(self, ctx: &TaskContext) -> ExecutionResult<()> {
        let file = file_name(&self.source);
        self.tracker.job_started(&file);
        let started = Instant::now();

        let outcome = self.process(ctx);
        match &outcome {
            Ok(()) => {
                debug!("[batch {}] wrote '{}'", self.batch_id, self.output.display());
                self.tracker
                    .job_completed(&file, started.elapsed().as_millis() as u64);
            }
            Err(ExecutionError::Cancelled) => {
                debug!("[batch {}] {} cancelled", self.batch_id, file);
            }
            Err(err) => {
                error!("[batch {}] {} failed: {}", self.batch_id, file, err);
                self.tracker.job_failed(&file, err.to_string());
            }
        }
        outcome
    }

    fn process(&self, ctx: &TaskContext) -> ExecutionResult<()> {
        ctx.check_cancelled()?;
        let buffer = read_image(&self.source)?;
        let output = run_pipeline(&self.pipeline, &buffer, &self.policy, ctx)?;
        ctx.check_cancelled()?;
        write_image(&self.output, &output)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Runs batches on a pool it owns for its whole lifetime.
#[derive(Debug)]
pub struct BatchOrchestrator {
    pool: Arc<WorkerPool>,
    policy: StrategyPolicy,
    options: BatchOptions,
}

impl BatchOrchestrator {
    pub fn new(pool: Arc<WorkerPool>, policy: StrategyPolicy, options: BatchOptions) -> Self {
        Self {
            pool,
            policy,
            options,
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn policy(&self) -> &StrategyPolicy {
        &self.policy
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Process every image of `request.input_dir` into `request.output_dir`.
    ///
    /// Per-job failures are recorded in the report. Only a closed pool is an
    /// error.
    pub fn run(&self, request: BatchRequest) -> Result<BatchReport, BatchError> {
        if self.pool.state() != PoolState::Running {
            return Err(BatchError::PoolClosed);
        }

        let started = Instant::now();
        let mut report = BatchReport::new(BatchId::new());
        let batch_id = report.batch_id;

        self.enter(&mut report, BatchPhase::Enumerating);
        let files = list_images(&request.input_dir, &self.options.listing);
        report.total = files.len();
        info!(
            "[batch {}] {} image(s) in '{}', pipeline '{}'",
            batch_id,
            files.len(),
            request.input_dir.display(),
            request.pipeline
        );

        let mut tracker = ProgressTracker::new(batch_id, files.len());
        if let Some(callback) = &self.options.progress_callback {
            tracker = tracker.with_callback(Arc::clone(callback));
        }
        tracker.start();
        let tracker = Arc::new(tracker);

        self.enter(&mut report, BatchPhase::Dispatching);
        let mut handles = Vec::with_capacity(files.len());
        for source in files {
            let job = Job {
                batch_id,
                output: output_path(
                    &request.output_dir,
                    &request.input_dir,
                    &source,
                    &self.options.output_prefix,
                ),
                source,
                pipeline: Arc::clone(&request.pipeline),
                policy: self.policy,
                tracker: Arc::clone(&tracker),
            };
            let file = file_name(&job.source);
            let handle = self.pool.submit(move |ctx| job.run(ctx)).map_err(|e| {
                error!("[batch {}] could not submit {}: {}", batch_id, file, e);
                BatchError::from(e)
            })?;
            handles.push((file, handle));
        }

        self.enter(&mut report, BatchPhase::Draining);
        // An unrepresentable deadline means no bound at all.
        let deadline = started.checked_add(self.options.drain_timeout);
        for (file, handle) in handles {
            let result = match deadline {
                Some(_) if report.timed_out => handle.join(),
                None => handle.join(),
                Some(deadline) => match handle.wait_deadline(deadline) {
                    Some(result) => result,
                    None => {
                        warn!(
                            "[batch {}] not drained within {:?}, terminating pool",
                            batch_id, self.options.drain_timeout
                        );
                        report.timed_out = true;
                        tracker.cancel();
                        self.pool.terminate();
                        handle.join()
                    }
                },
            };

            match result.and_then(|job| job) {
                Ok(()) => report.succeeded += 1,
                Err(err) if !err.is_recoverable() => report.cancelled += 1,
                Err(err) => report.failures.push(JobFailure {
                    file,
                    message: err.to_string(),
                }),
            }
        }

        report.elapsed = started.elapsed();
        self.enter(&mut report, BatchPhase::Completed);
        tracker.complete();
        info!("{}", report);
        Ok(report)
    }

    /// Stop accepting batches and wait for outstanding work.
    pub fn shutdown(&self, timeout: Duration) -> AwaitOutcome {
        self.pool.shutdown();
        self.pool.await_all(timeout)
    }

    fn enter(&self, report: &mut BatchReport, phase: BatchPhase) {
        debug!("[batch {}] {} -> {}", report.batch_id, report.phase, phase);
        report.phase = phase;
    }
}
