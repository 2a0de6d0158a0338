//! Progress tracking for batch runs.

use crate::core::error::BatchId;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A progress update event.
#[derive(Debug, Clone)]
pub enum ProgressUpdate {
    /// The batch has been enumerated and dispatch is starting.
    Started { batch_id: BatchId, total_jobs: usize },
    /// A job task began running on a worker.
    JobStarted { file: String },
    /// A job finished and its output was written.
    JobCompleted {
        file: String,
        duration_ms: u64,
        index: usize,
        total: usize,
    },
    /// A job failed; the batch continues.
    JobFailed { file: String, message: String },
    /// Overall progress percentage.
    Progress {
        percent: f32,
        elapsed_ms: u64,
        estimated_remaining_ms: Option<u64>,
    },
    /// All jobs have terminated.
    Completed {
        total_duration_ms: u64,
        succeeded: usize,
        failed: usize,
    },
    /// The batch was cancelled by the drain timeout.
    Cancelled,
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Tracks batch progress across worker threads.
pub struct ProgressTracker {
    batch_id: BatchId,
    total_jobs: usize,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicBool,
    start_time: Option<Instant>,
    callback: Option<Arc<ProgressCallback>>,
    /// Durations of finished jobs, for estimation
    job_times: parking_lot::Mutex<Vec<u64>>,
}

impl ProgressTracker {
    pub fn new(batch_id: BatchId, total_jobs: usize) -> Self {
        Self {
            batch_id,
            total_jobs,
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            start_time: None,
            callback: None,
            job_times: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Set a callback for progress updates.
    pub fn with_callback(mut self, callback: Arc<ProgressCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Start tracking.
    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
        self.send_update(ProgressUpdate::Started {
            batch_id: self.batch_id,
            total_jobs: self.total_jobs,
        });
    }

    pub fn job_started(&self, file: &str) {
        self.send_update(ProgressUpdate::JobStarted {
            file: file.to_string(),
        });
    }

    pub fn job_completed(&self, file: &str, duration_ms: u64) {
        let done = self.succeeded.fetch_add(1, Ordering::Relaxed) + 1;
        self.job_times.lock().push(duration_ms);

        self.send_update(ProgressUpdate::JobCompleted {
            file: file.to_string(),
            duration_ms,
            index: (done + self.failed.load(Ordering::Relaxed)) as usize,
            total: self.total_jobs,
        });
        self.send_progress_update();
    }

    pub fn job_failed(&self, file: &str, message: String) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.send_update(ProgressUpdate::JobFailed {
            file: file.to_string(),
            message,
        });
        self.send_progress_update();
    }

    /// Mark the batch cancelled. Only the first call emits `Cancelled`.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::Relaxed) {
            self.send_update(ProgressUpdate::Cancelled);
        }
    }

    /// Complete tracking.
    pub fn complete(&self) {
        let duration = self
            .start_time
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        self.send_update(ProgressUpdate::Completed {
            total_duration_ms: duration,
            succeeded: self.succeeded.load(Ordering::Relaxed) as usize,
            failed: self.failed.load(Ordering::Relaxed) as usize,
        });
    }

    /// Share of jobs finished, successful or not.
    pub fn progress_percent(&self) -> f32 {
        if self.total_jobs == 0 {
            return 100.0;
        }
        let finished = self.succeeded.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed);
        (finished as f32 / self.total_jobs as f32) * 100.0
    }

    /// Estimate remaining time in milliseconds from the mean job duration.
    ///
    /// Jobs run in parallel, so this is an upper bound.
    pub fn estimated_remaining_ms(&self) -> Option<u64> {
        let times = self.job_times.lock();
        if times.is_empty() {
            return None;
        }

        let avg_time: u64 = times.iter().sum::<u64>() / times.len() as u64;
        let finished = (self.succeeded.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)) as usize;
        let remaining = self.total_jobs.saturating_sub(finished);

        Some(avg_time * remaining as u64)
    }

    fn send_update(&self, update: ProgressUpdate) {
        if let Some(ref callback) = self.callback {
            callback(update);
        }
    }

    fn send_progress_update(&self) {
        let elapsed = self
            .start_time
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        self.send_update(ProgressUpdate::Progress {
            percent: self.progress_percent(),
            elapsed_ms: elapsed,
            estimated_remaining_ms: self.estimated_remaining_ms(),
        });
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("batch_id", &self.batch_id)
            .field("total_jobs", &self.total_jobs)
            .field("percent", &self.progress_percent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_progress_calculation() {
        let tracker = ProgressTracker::new(BatchId::new(), 4);
        assert_eq!(tracker.progress_percent(), 0.0);

        tracker.job_completed("a.png", 10);
        tracker.job_failed("b.png", "corrupt".to_string());
        assert_eq!(tracker.progress_percent(), 50.0);
        assert_eq!(tracker.estimated_remaining_ms(), Some(20));
    }

    #[test]
    fn test_empty_batch_is_complete() {
        let tracker = ProgressTracker::new(BatchId::new(), 0);
        assert_eq!(tracker.progress_percent(), 100.0);
        assert_eq!(tracker.estimated_remaining_ms(), None);
    }

    #[test]
    fn test_cancellation_reported_once() {
        let cancels = Arc::new(AtomicUsize::new(0));
        let cancels_clone = cancels.clone();
        let callback: ProgressCallback = Box::new(move |update| {
            if let ProgressUpdate::Cancelled = update {
                cancels_clone.fetch_add(1, Ordering::Relaxed);
            }
        });
        let tracker = ProgressTracker::new(BatchId::new(), 10).with_callback(Arc::new(callback));

        tracker.cancel();
        tracker.cancel();
        assert_eq!(cancels.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_callback_invoked() {
        let failures = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let (failures_clone, calls_clone) = (failures.clone(), calls.clone());

        let callback: ProgressCallback = Box::new(move |update| {
            calls_clone.fetch_add(1, Ordering::Relaxed);
            if let ProgressUpdate::JobFailed { .. } = update {
                failures_clone.fetch_add(1, Ordering::Relaxed);
            }
        });
        let mut tracker = ProgressTracker::new(BatchId::new(), 2).with_callback(Arc::new(callback));

        tracker.start();
        tracker.job_started("a.png");
        tracker.job_completed("a.png", 5);
        tracker.job_failed("b.png", "bad".to_string());
        tracker.complete();

        // Started, JobStarted, JobCompleted + Progress, JobFailed + Progress, Completed
        assert_eq!(calls.load(Ordering::Relaxed), 7);
        assert_eq!(failures.load(Ordering::Relaxed), 1);
    }
}
