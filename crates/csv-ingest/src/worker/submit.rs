//! Registering uploads as jobs.

use std::path::PathBuf;

use log::info;

use crate::db::{job_repo, Database};
use crate::error::{Result, WorkerError};
use crate::sanitize::redact_path;

use super::job::QueuedJob;
use super::queue::JobQueue;

/// Creates a `pending` job for an upload and queues its first delivery.
pub fn submit_upload(db: &Database, queue: &JobQueue, path: PathBuf) -> Result<QueuedJob> {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| WorkerError::InvalidUpload(path.clone()))?;

    let job = db.with_conn(|c| job_repo::create(c, &filename, &path.display().to_string()))?;
    info!("Created job {} for {}", job.id, redact_path(&path));

    let queued = QueuedJob::new(&job.id, path);
    queue.enqueue(queued.clone())?;
    Ok(queued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::JobStatus;
    use crate::error::IngestError;

    #[test]
    fn test_submit_creates_pending_job_and_queues_it() {
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(4, 3);

        let queued = submit_upload(&db, &queue, PathBuf::from("/uploads/people.csv")).unwrap();

        let job = db
            .with_conn(|c| job_repo::find_by_id(c, &queued.job_id))
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.filename, "people.csv");

        let delivery = queue.receiver().try_recv().unwrap();
        assert_eq!(delivery.job, queued);
        assert_eq!(delivery.attempt, 1);
    }

    #[test]
    fn test_path_without_file_name_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(4, 3);

        let err = submit_upload(&db, &queue, PathBuf::from("/")).unwrap_err();

        assert!(matches!(
            err,
            IngestError::Worker(WorkerError::InvalidUpload(ref p)) if p == &PathBuf::from("/")
        ));
        assert_eq!(err.to_string(), "Worker error: Not a file path: /");
        assert!(queue.receiver().is_empty());
        let jobs = db
            .with_conn(|c| job_repo::find_by_status(c, JobStatus::Pending))
            .unwrap();
        assert!(jobs.is_empty());
    }
}
