//! Batch transactions that fail at commit time fall back to row-by-row
//! commits, isolating the offending row.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};

use common::{CsvBuilder, TestHarness};

use csv_ingest::broadcast::{JobProgressEvent, JobStatus};
use csv_ingest::db::customer_repo::{self, NewCustomer};
use csv_ingest::db::{job_repo, Database};
use csv_ingest::pipeline::{PipelineConfig, ProgressReporter};

/// Inserts a customer owning `email` the first time a processing event with
/// a known total arrives, after the validator already checked the file.
struct ConflictInjector {
    db: Database,
    email: &'static str,
    fired: AtomicBool,
}

impl ProgressReporter for ConflictInjector {
    fn report(&self, event: JobProgressEvent) {
        if event.status != JobStatus::Processing || event.total_rows == 0 {
            return;
        }
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        self.db
            .with_transaction(|tx| {
                let other = job_repo::create(tx, "other.csv", "/uploads/other.csv")?;
                customer_repo::insert(
                    tx,
                    &other.id,
                    &NewCustomer {
                        name: "Concurrent",
                        email: self.email,
                        phone: None,
                        company: "Elsewhere",
                    },
                )
            })
            .unwrap();
    }
}

#[test]
fn test_fallback_isolates_conflicting_row() {
    let harness = TestHarness::with_config(PipelineConfig {
        batch_size: 5,
        emit_interval: 1,
        ..PipelineConfig::default()
    });
    let csv = CsvBuilder::new().customers("row", 5).build();
    let job = harness.create_job(harness.write_csv("race.csv", &csv));

    let injector = ConflictInjector {
        db: harness.db.clone(),
        email: "row2@example.com",
        fired: AtomicBool::new(false),
    };
    let outcome = harness.run_with(&job, &injector).unwrap();

    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.success_count, 4);
    assert_eq!(outcome.failed_count, 1);

    let failed = harness.failed_rows(&job.job_id);
    assert_eq!(failed.len(), 1);
    // Third data row, file line 4.
    assert_eq!(failed[0].row_number, 4);
    assert_eq!(failed[0].email.as_deref(), Some("row2@example.com"));
    assert_eq!(
        failed[0].error,
        "Row 4: Database error - Email already exists in database"
    );

    let emails: Vec<String> = harness
        .customers(&job.job_id)
        .into_iter()
        .map(|c| c.email)
        .collect();
    assert_eq!(
        emails,
        vec![
            "row0@example.com",
            "row1@example.com",
            "row3@example.com",
            "row4@example.com"
        ]
    );

    let row = harness.job(&job.job_id);
    assert_eq!(row.processed_rows, 5);
    assert_eq!(row.success_count + row.failed_count, row.total_rows);
}

#[test]
fn test_clean_batches_do_not_fall_back() {
    let harness = TestHarness::with_config(PipelineConfig {
        batch_size: 3,
        ..PipelineConfig::default()
    });
    let csv = CsvBuilder::new().customers("ok", 10).build();

    let (job, result) = harness.run_csv("ok.csv", &csv);
    let outcome = result.unwrap();

    assert_eq!(outcome.success_count, 10);
    assert!(harness.failed_rows(&job.job_id).is_empty());
}
