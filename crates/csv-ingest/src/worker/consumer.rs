use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::pipeline::{Pipeline, ProgressReporter};

use super::job::JobResult;
use super::queue::{Delivery, JobQueue};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const RESULT_CAPACITY: usize = 16;

/// Single consumer of a [`JobQueue`]. Jobs run strictly one after another on
/// a dedicated thread.
pub struct Worker {
    result_receiver: Receiver<JobResult>,
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    pub fn spawn(
        pipeline: Pipeline,
        queue: JobQueue,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<Self, WorkerError> {
        let (result_sender, result_receiver) = bounded::<JobResult>(RESULT_CAPACITY);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("csv-ingest-worker".to_string())
            .spawn(move || run_worker(pipeline, queue, result_sender, shutdown_flag, progress))
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        info!("Worker started");

        Ok(Self {
            result_receiver,
            handle,
            shutdown,
        })
    }

    /// Blocks until the worker reports on a delivery.
    pub fn recv_result(&self) -> Option<JobResult> {
        self.result_receiver.recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<JobResult> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    /// Flag that stops the worker between deliveries once set. A job already
    /// running finishes first.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn wait(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Unblocks a worker stuck sending a result nobody reads.
        drop(self.result_receiver);

        if let Err(e) = self.handle.join() {
            error!("Worker panicked: {:?}", e);
        } else {
            info!("Worker stopped");
        }
    }
}

fn run_worker(
    pipeline: Pipeline,
    queue: JobQueue,
    result_sender: Sender<JobResult>,
    shutdown: Arc<AtomicBool>,
    progress: Arc<dyn ProgressReporter>,
) {
    debug!("Worker loop started");

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker received shutdown signal");
            break;
        }

        let delivery = match queue.receiver().recv_timeout(POLL_INTERVAL) {
            Ok(delivery) => delivery,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Job queue disconnected");
                break;
            }
        };

        let mut next = Some(delivery);
        while let Some(delivery) = next.take() {
            let (result, inline_retry) = process_delivery(&pipeline, &queue, delivery, &*progress);
            if let Err(e) = result_sender.send(result) {
                error!("Failed to send job result: {}", e);
                return;
            }
            next = inline_retry;
        }
    }

    debug!("Worker loop stopped");
}

/// Runs one delivery. A retryable failure is put back on the queue; if the
/// queue is full the delivery is returned to be run immediately.
fn process_delivery(
    pipeline: &Pipeline,
    queue: &JobQueue,
    delivery: Delivery,
    progress: &dyn ProgressReporter,
) -> (JobResult, Option<Delivery>) {
    info!(
        "Starting job {} (attempt {}/{})",
        delivery.job.job_id,
        delivery.attempt,
        queue.max_attempts()
    );

    let error = match pipeline.run(&delivery.job, progress) {
        Ok(outcome) => {
            info!(
                "Job {} finished as {}: {} success, {} failed",
                outcome.job_id, outcome.status, outcome.success_count, outcome.failed_count
            );
            return (
                JobResult::success(&delivery.job, delivery.attempt, outcome),
                None,
            );
        }
        Err(e) => e,
    };

    let retry = error.is_retryable() && queue.should_retry(&delivery);
    if !retry {
        error!(
            "Job {} failed permanently after {} attempt(s): {}",
            delivery.job.job_id, delivery.attempt, error
        );
        return (
            JobResult::failure(&delivery.job, delivery.attempt, error.to_string(), false),
            None,
        );
    }

    warn!(
        "Job {} failed on attempt {}, retrying: {}",
        delivery.job.job_id, delivery.attempt, error
    );
    let result = JobResult::failure(&delivery.job, delivery.attempt, error.to_string(), true);
    match queue.redeliver(delivery) {
        Ok(()) => (result, None),
        Err(next) => {
            debug!("Queue full, retrying job {} in place", next.job.job_id);
            (result, Some(next))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::JobStatus;
    use crate::db::{job_repo, Database};
    use crate::pipeline::{NoopProgress, PipelineConfig};
    use crate::worker::job::QueuedJob;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn start(db: &Database, queue: &JobQueue) -> Worker {
        let pipeline = Pipeline::new(db.clone(), Arc::new(PipelineConfig::default()));
        Worker::spawn(pipeline, queue.clone(), Arc::new(NoopProgress)).unwrap()
    }

    fn queued(db: &Database, path: &Path) -> QueuedJob {
        let job = db
            .with_conn(|c| job_repo::create(c, "w.csv", &path.display().to_string()))
            .unwrap();
        QueuedJob::new(&job.id, path.to_path_buf())
    }

    #[test]
    fn test_worker_start_and_stop() {
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(4, 3);
        let worker = start(&db, &queue);

        assert!(!worker.is_shutdown());
        worker.shutdown();
        assert!(worker.is_shutdown());
        worker.wait();
    }

    #[test]
    fn test_processes_job() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("w.csv");
        std::fs::write(&path, "name,email,phone,company\nA,a@x.com,,Co\n").unwrap();

        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(4, 3);
        let worker = start(&db, &queue);

        let job = queued(&db, &path);
        queue.enqueue(job.clone()).unwrap();

        let result = worker.recv_result().unwrap();
        assert!(result.is_final());
        assert_eq!(result.attempt, 1);
        let outcome = result.outcome.unwrap();
        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.success_count, 1);

        worker.wait();
    }

    #[test]
    fn test_retryable_failure_is_redelivered_until_limit() {
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(4, 3);
        let worker = start(&db, &queue);

        let job = queued(&db, &PathBuf::from("/nonexistent/missing.csv"));
        queue.enqueue(job).unwrap();

        let attempts: Vec<JobResult> = (0..3).filter_map(|_| worker.recv_result()).collect();
        assert_eq!(
            attempts.iter().map(|r| r.attempt).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(attempts[..2].iter().all(|r| r.will_retry));
        assert!(attempts[2].is_final());
        assert!(attempts[2].error.is_some());

        worker.wait();
    }

    #[test]
    fn test_structural_failure_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cols.csv");
        std::fs::write(&path, "name,email\nA,a@x.com\n").unwrap();

        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(4, 3);
        let worker = start(&db, &queue);

        queue.enqueue(queued(&db, &path)).unwrap();

        let result = worker.recv_result().unwrap();
        assert!(result.is_final());
        assert_eq!(result.attempt, 1);
        assert!(result.error.unwrap().contains("phone, company"));

        worker.wait();
    }
}
