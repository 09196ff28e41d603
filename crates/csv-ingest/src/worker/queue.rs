//! In-process job queue with bounded capacity and attempt counting.
//!
//! Not durable: jobs queued here are lost with the process. Crash recovery
//! resolves whatever was in flight at the next start.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::error::WorkerError;

use super::job::QueuedJob;

/// A job plus the one-based attempt number of this delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub job: QueuedJob,
    pub attempt: u32,
}

#[derive(Clone)]
pub struct JobQueue {
    sender: Sender<Delivery>,
    receiver: Receiver<Delivery>,
    max_attempts: u32,
}

impl JobQueue {
    pub fn new(capacity: usize, max_attempts: u32) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Queues the first delivery of a job, blocking while the queue is full.
    pub fn enqueue(&self, job: QueuedJob) -> Result<(), WorkerError> {
        log::debug!("Job {} queued", job.job_id);
        self.sender
            .send(Delivery { job, attempt: 1 })
            .map_err(|_| WorkerError::ChannelClosed)
    }

    /// Whether a delivery that failed with a retryable error gets another try.
    pub fn should_retry(&self, delivery: &Delivery) -> bool {
        delivery.attempt < self.max_attempts
    }

    /// Puts a job back for its next attempt without blocking.
    ///
    /// Returns the delivery when the queue is full, so the caller can run it
    /// directly instead.
    pub fn redeliver(&self, delivery: Delivery) -> Result<(), Delivery> {
        let next = Delivery {
            attempt: delivery.attempt + 1,
            job: delivery.job,
        };
        match self.sender.try_send(next) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(d)) | Err(TrySendError::Disconnected(d)) => Err(d),
        }
    }

    pub fn receiver(&self) -> &Receiver<Delivery> {
        &self.receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn job(id: &str) -> QueuedJob {
        QueuedJob::new(id, PathBuf::from(format!("/uploads/{}.csv", id)))
    }

    #[test]
    fn test_fifo_with_first_attempt() {
        let queue = JobQueue::new(4, 3);
        queue.enqueue(job("a")).unwrap();
        queue.enqueue(job("b")).unwrap();

        assert_eq!(queue.receiver().len(), 2);
        let first = queue.receiver().recv().unwrap();
        assert_eq!(first.job.job_id, "a");
        assert_eq!(first.attempt, 1);
    }

    #[test]
    fn test_redeliver_increments_attempt() {
        let queue = JobQueue::new(4, 3);
        queue.enqueue(job("a")).unwrap();
        let delivery = queue.receiver().recv().unwrap();

        assert!(queue.should_retry(&delivery));
        queue.redeliver(delivery).unwrap();
        let again = queue.receiver().recv().unwrap();
        assert_eq!(again.attempt, 2);

        let last = Delivery {
            attempt: 3,
            ..again
        };
        assert!(!queue.should_retry(&last));
    }

    #[test]
    fn test_redeliver_on_full_queue_hands_back() {
        let queue = JobQueue::new(1, 3);
        queue.enqueue(job("a")).unwrap();

        let returned = queue
            .redeliver(Delivery {
                job: job("b"),
                attempt: 1,
            })
            .unwrap_err();
        assert_eq!(returned.attempt, 2);
        assert_eq!(returned.job.job_id, "b");
    }
}
