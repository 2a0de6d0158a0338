//! Batch completion report.

use crate::core::error::BatchId;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Lifecycle phase of one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Idle,
    Enumerating,
    Dispatching,
    Draining,
    Completed,
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchPhase::Idle => "idle",
            BatchPhase::Enumerating => "enumerating",
            BatchPhase::Dispatching => "dispatching",
            BatchPhase::Draining => "draining",
            BatchPhase::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// A job that did not produce an output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub file: String,
    pub message: String,
}

/// What one batch run did.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: BatchId,
    /// Jobs enumerated
    pub total: usize,
    pub succeeded: usize,
    /// Jobs that failed on their own (bad input, write error, panic)
    pub failures: Vec<JobFailure>,
    /// Jobs dropped or interrupted by the drain timeout
    pub cancelled: usize,
    #[serde(serialize_with = "serialize_duration_ms", rename = "elapsed_ms")]
    pub elapsed: Duration,
    pub timed_out: bool,
    pub phase: BatchPhase,
}

impl BatchReport {
    pub(crate) fn new(batch_id: BatchId) -> Self {
        Self {
            batch_id,
            total: 0,
            succeeded: 0,
            failures: Vec::new(),
            cancelled: 0,
            elapsed: Duration::ZERO,
            timed_out: false,
            phase: BatchPhase::Idle,
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Every job succeeded and nothing was cancelled.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.cancelled == 0 && !self.timed_out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch {}: {} job(s), {} succeeded, {} failed",
            self.batch_id,
            self.total,
            self.succeeded,
            self.failed()
        )?;
        if self.cancelled > 0 {
            write!(f, ", {} cancelled", self.cancelled)?;
        }
        write!(f, " in {:.2}s", self.elapsed.as_secs_f64())?;
        if self.timed_out {
            write!(f, " (timed out)")?;
        }
        for failure in &self.failures {
            write!(f, "\n  {}: {}", failure.file, failure.message)?;
        }
        Ok(())
    }
}

fn serialize_duration_ms<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}
