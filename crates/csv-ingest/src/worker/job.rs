use std::path::PathBuf;

use serde::Serialize;

use crate::broadcast::JobStatus;
use crate::pipeline::PipelineContext;

/// Message handed to the worker: which job to run and where its upload lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub job_id: String,
    pub filepath: PathBuf,
}

impl QueuedJob {
    pub fn new(job_id: &str, filepath: PathBuf) -> Self {
        Self {
            job_id: job_id.to_string(),
            filepath,
        }
    }
}

/// Final counters of one job run that reached a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub job_id: String,
    pub status: JobStatus,
    pub total_rows: u64,
    pub success_count: u64,
    pub failed_count: u64,
    pub errors: Vec<String>,
}

impl JobOutcome {
    pub(crate) fn from_context(ctx: &PipelineContext, status: JobStatus) -> Self {
        Self {
            job_id: ctx.job_id().to_string(),
            status,
            total_rows: ctx.counters.total_rows,
            success_count: ctx.counters.success_count,
            failed_count: ctx.counters.failed_count,
            errors: ctx.errors.as_slice().to_vec(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// What the worker reports after each delivery.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: String,
    /// One-based delivery attempt.
    pub attempt: u32,
    pub outcome: Option<JobOutcome>,
    pub error: Option<String>,
    /// The job was put back on the queue for another attempt.
    pub will_retry: bool,
}

impl JobResult {
    pub fn success(job: &QueuedJob, attempt: u32, outcome: JobOutcome) -> Self {
        Self {
            job_id: job.job_id.clone(),
            attempt,
            outcome: Some(outcome),
            error: None,
            will_retry: false,
        }
    }

    pub fn failure(job: &QueuedJob, attempt: u32, error: String, will_retry: bool) -> Self {
        Self {
            job_id: job.job_id.clone(),
            attempt,
            outcome: None,
            error: Some(error),
            will_retry,
        }
    }

    /// No further delivery of this job will happen.
    pub fn is_final(&self) -> bool {
        !self.will_retry
    }
}
