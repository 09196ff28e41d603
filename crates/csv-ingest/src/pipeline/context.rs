use crate::broadcast::Counters;
use crate::db::job_repo::JobProgress;
use crate::worker::job::QueuedJob;

/// Error messages collected during a run, capped at a fixed length.
/// Messages past the cap are dropped; the first ones are kept.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    entries: Vec<String>,
    limit: usize,
}

impl ErrorLog {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            limit,
        }
    }

    pub fn push(&mut self, message: String) {
        if self.entries.len() < self.limit {
            self.entries.push(message);
        }
    }

    pub fn extend<I: IntoIterator<Item = String>>(&mut self, messages: I) {
        for message in messages {
            self.push(message);
        }
    }

    pub fn as_slice(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Mutable state of one job attempt.
pub struct PipelineContext {
    // Input
    pub job: QueuedJob,

    // Step 2 result
    pub started_at: Option<String>,

    // Running totals. `processed_rows` always equals success + failed.
    pub counters: Counters,

    pub errors: ErrorLog,
}

impl PipelineContext {
    pub fn new(job: QueuedJob, error_log_limit: usize) -> Self {
        Self {
            job,
            started_at: None,
            counters: Counters::default(),
            errors: ErrorLog::new(error_log_limit),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job.job_id
    }

    pub fn record_successes(&mut self, count: u64) {
        self.counters.success_count += count;
        self.counters.processed_rows += count;
    }

    pub fn record_failure(&mut self) {
        self.counters.failed_count += 1;
        self.counters.processed_rows += 1;
    }

    /// `round(processed / total * 100)`, clamped to `[0, 100]`.
    pub fn progress(&self) -> u8 {
        percent(self.counters.processed_rows, self.counters.total_rows)
    }

    /// Snapshot for [`job_repo::update_progress`](crate::db::job_repo::update_progress).
    pub fn job_progress(&self) -> JobProgress<'_> {
        JobProgress {
            processed_rows: self.counters.processed_rows,
            success_count: self.counters.success_count,
            failed_count: self.counters.failed_count,
            progress: self.progress(),
            errors: self.errors.as_slice(),
        }
    }
}

pub(crate) fn percent(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (processed as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}
