//! Job progress broadcaster for real-time job status streaming.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Status of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// `completed` and `failed` end a job attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown job status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    /// Unique job identifier.
    pub job_id: String,
    /// Overall job status.
    pub status: JobStatus,
    /// Percentage in `[0, 100]`.
    pub progress: u8,
    pub processed_rows: u64,
    pub success_count: u64,
    pub failed_count: u64,
    pub total_rows: u64,
    /// Error log (set on completion and failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// Timestamp of this event.
    pub timestamp: DateTime<Utc>,
}

/// Running counters carried by an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub total_rows: u64,
    pub processed_rows: u64,
    pub success_count: u64,
    pub failed_count: u64,
}

impl JobProgressEvent {
    /// Creates a progress event without error log or timestamps.
    pub fn new(job_id: &str, status: JobStatus, progress: u8, counters: Counters) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            progress: progress.min(100),
            processed_rows: counters.processed_rows,
            success_count: counters.success_count,
            failed_count: counters.failed_count,
            total_rows: counters.total_rows,
            errors: None,
            started_at: None,
            completed_at: None,
            timestamp: Utc::now(),
        }
    }

    /// The 0% event sent when a job enters `processing`.
    pub fn started(job_id: &str, started_at: &str) -> Self {
        let mut event = Self::new(job_id, JobStatus::Processing, 0, Counters::default());
        event.started_at = Some(started_at.to_string());
        event
    }

    /// Terminal success event.
    pub fn completed(
        job_id: &str,
        counters: Counters,
        errors: &[String],
        completed_at: &str,
    ) -> Self {
        let mut event = Self::new(job_id, JobStatus::Completed, 100, counters);
        event.errors = Some(errors.to_vec());
        event.completed_at = Some(completed_at.to_string());
        event
    }

    /// Terminal failure event carrying the fatal error.
    pub fn failed(
        job_id: &str,
        progress: u8,
        counters: Counters,
        error: &str,
        completed_at: &str,
    ) -> Self {
        let mut event = Self::new(job_id, JobStatus::Failed, progress, counters);
        event.errors = Some(vec![error.to_string()]);
        event.completed_at = Some(completed_at.to_string());
        event
    }
}

/// Broadcasts job progress events for streaming.
///
/// Sending never blocks: the channel is a bounded ring, so slow subscribers
/// lose the oldest events instead of stalling the worker.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        if let Err(e) = self.sender.send(event) {
            log::debug!("Dropped progress event for job {}: no subscribers", e.0.job_id);
        }
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
