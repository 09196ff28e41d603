//! Redelivery, crash recovery and the queue worker, end to end.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{CsvBuilder, TestHarness};

use csv_ingest::broadcast::JobStatus;
use csv_ingest::db::customer_repo::{self, NewCustomer};
use csv_ingest::db::failed_row_repo::{self, NewFailedRow};
use csv_ingest::db::job_repo;
use csv_ingest::pipeline::BroadcastProgress;
use csv_ingest::worker::{recover_crashed_jobs, JobQueue, Worker, CRASH_ERROR};

const RESULT_TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn test_redelivery_after_partial_attempt() {
    let harness = TestHarness::new();
    let csv = CsvBuilder::new()
        .customer("A", "a@x.com", "", "Co")
        .customer("B", "b@x.com", "", "Co")
        .customer("C", "", "", "Co")
        .customer("D", "d@x.com", "", "Co")
        .build();
    let job = harness.create_job(harness.write_csv("retry.csv", &csv));

    // State left by an attempt that died after its first batch and one
    // rejected row.
    harness
        .db
        .with_transaction(|tx| {
            job_repo::mark_processing(tx, &job.job_id, "2026-01-01T00:00:00Z")?;
            for (name, email) in [("A", "a@x.com"), ("B", "b@x.com")] {
                customer_repo::insert(
                    tx,
                    &job.job_id,
                    &NewCustomer {
                        name,
                        email,
                        phone: None,
                        company: "Co",
                    },
                )?;
            }
            failed_row_repo::insert(
                tx,
                &job.job_id,
                &NewFailedRow {
                    row_number: 4,
                    name: Some("C"),
                    email: None,
                    phone: None,
                    company: Some("Co"),
                    error: "Row 4: Email is required",
                },
            )
        })
        .unwrap();

    let outcome = harness.run(&job).unwrap();

    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.total_rows, 4);
    assert_eq!(outcome.success_count, 3);
    assert_eq!(outcome.failed_count, 1);

    // No duplicate customers and exactly one failed-row record.
    assert_eq!(harness.customers(&job.job_id).len(), 3);
    let failed = harness.failed_rows(&job.job_id);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].row_number, 4);
}

#[test]
fn test_rerun_of_finished_job_is_stable() {
    let harness = TestHarness::new();
    let csv = CsvBuilder::new()
        .customers("again", 30)
        .customer("Bad", "bad", "", "Co")
        .build();

    let (job, first) = harness.run_csv("again.csv", &csv);
    let first = first.unwrap();
    let second = harness.run(&job).unwrap();

    assert_eq!(first.success_count, second.success_count);
    assert_eq!(first.failed_count, second.failed_count);
    assert_eq!(harness.customers(&job.job_id).len(), 30);
    assert_eq!(harness.failed_rows(&job.job_id).len(), 1);
}

#[test]
fn test_crash_recovery_fails_processing_jobs_once() {
    let mut harness = TestHarness::new();
    let interrupted = harness.create_job(harness.write_csv("a.csv", "name,email,phone,company\n"));
    let pending = harness.create_job(harness.write_csv("b.csv", "name,email,phone,company\n"));
    harness
        .db
        .with_conn(|c| {
            job_repo::mark_processing(c, &interrupted.job_id, "2026-01-01T00:00:00Z")?;
            job_repo::set_total_rows(c, &interrupted.job_id, 500)
        })
        .unwrap();

    let progress = BroadcastProgress::new(harness.broadcaster.clone());
    assert_eq!(recover_crashed_jobs(&harness.db, &progress).unwrap(), 1);
    assert_eq!(recover_crashed_jobs(&harness.db, &progress).unwrap(), 0);

    let row = harness.job(&interrupted.job_id);
    assert_eq!(row.status, JobStatus::Failed);
    assert_eq!(row.errors, vec![CRASH_ERROR.to_string()]);
    assert!(row.completed_at.is_some());
    assert_eq!(harness.job(&pending.job_id).status, JobStatus::Pending);

    let events = harness.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].job_id, interrupted.job_id);
    assert_eq!(events[0].status, JobStatus::Failed);
    assert_eq!(events[0].total_rows, 500);
    assert_eq!(events[0].errors, Some(vec![CRASH_ERROR.to_string()]));
}

#[test]
fn test_worker_processes_jobs_in_order() {
    let harness = TestHarness::new();
    let queue = JobQueue::new(8, 3);
    let progress = Arc::new(BroadcastProgress::new(harness.broadcaster.clone()));
    let worker = Worker::spawn(harness.pipeline(), queue.clone(), progress).unwrap();

    let good = harness.create_job(
        harness.write_csv("good.csv", &CsvBuilder::new().customers("w", 3).build()),
    );
    let broken = harness.create_job(harness.write_csv(
        "broken.csv",
        &CsvBuilder::with_headers(&["name", "email"]).row(&["A", "a@x.com"]).build(),
    ));
    queue.enqueue(good.clone()).unwrap();
    queue.enqueue(broken.clone()).unwrap();

    let first = worker.recv_result_timeout(RESULT_TIMEOUT).unwrap();
    assert_eq!(first.job_id, good.job_id);
    assert!(first.outcome.unwrap().is_success());

    let second = worker.recv_result_timeout(RESULT_TIMEOUT).unwrap();
    assert_eq!(second.job_id, broken.job_id);
    assert!(second.is_final());
    assert_eq!(second.attempt, 1);
    assert!(second.error.unwrap().contains("Missing columns: phone, company"));

    worker.wait();

    assert_eq!(harness.job(&good.job_id).status, JobStatus::Completed);
    assert_eq!(harness.job(&broken.job_id).status, JobStatus::Failed);
}
