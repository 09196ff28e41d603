//! Startup sweep for jobs left `processing` by a crashed process.

use log::{info, warn};

use crate::broadcast::{Counters, JobProgressEvent, JobStatus};
use crate::db::{job_repo, now_timestamp, Database, DatabaseError};
use crate::pipeline::ProgressReporter;

/// Error recorded on jobs found in flight at startup.
pub const CRASH_ERROR: &str = "server crashed during processing";

/// Marks every `processing` job as `failed` and broadcasts the change.
///
/// Must run before the worker starts consuming. Safe to repeat: a job is only
/// touched while it is still `processing`.
pub fn recover_crashed_jobs(
    db: &Database,
    progress: &dyn ProgressReporter,
) -> Result<usize, DatabaseError> {
    let crashed = db.with_conn(|c| job_repo::find_by_status(c, JobStatus::Processing))?;
    if crashed.is_empty() {
        return Ok(0);
    }

    info!("Found {} crashed job(s), marking as failed", crashed.len());

    let mut recovered = 0;
    for job in crashed {
        let completed_at = now_timestamp();
        let changed = db.with_conn(|c| {
            job_repo::fail_if_processing(c, &job.id, CRASH_ERROR, &completed_at)
        })?;
        if !changed {
            warn!("Job {} left processing before it could be recovered", job.id);
            continue;
        }

        let counters = Counters {
            total_rows: job.total_rows,
            processed_rows: job.processed_rows,
            success_count: job.success_count,
            failed_count: job.failed_count,
        };
        let mut event =
            JobProgressEvent::failed(&job.id, job.progress, counters, CRASH_ERROR, &completed_at);
        event.started_at = job.started_at.clone();
        progress.report(event);
        recovered += 1;
    }

    Ok(recovered)
}
