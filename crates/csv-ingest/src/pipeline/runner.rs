use std::sync::Arc;

use tracing::{debug, info, info_span, warn};

use crate::broadcast::{JobProgressEvent, JobStatus};
use crate::db::failed_row_repo::{self, NewFailedRow};
use crate::db::{job_repo, now_timestamp, Database};
use crate::reader::{self, CsvRow, RowReader};
use crate::sanitize::{self, SanitizedRow};
use crate::validator::{RowValidator, Validation};
use crate::worker::job::{JobOutcome, QueuedJob};

use super::batch::{BatchCommitter, PendingRow};
use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::PipelineError;
use super::progress::{EmitThrottle, ProgressReporter};

/// Error recorded on a job whose file has no data rows.
pub const EMPTY_FILE_ERROR: &str = "CSV file is empty";

pub struct Pipeline {
    db: Database,
    config: Arc<PipelineConfig>,
}

impl Pipeline {
    pub fn new(db: Database, config: Arc<PipelineConfig>) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Processes one delivery of a job from start to a terminal status.
    ///
    /// An empty file ends in `failed` but returns `Ok`, since redelivering it
    /// cannot change the result. Every other failure marks the job `failed`,
    /// broadcasts it and returns the error to the caller.
    pub fn run(
        &self,
        job: &QueuedJob,
        progress: &dyn ProgressReporter,
    ) -> Result<JobOutcome, PipelineError> {
        let filename = sanitize::redact_path(&job.filepath);
        let _pipeline_span = info_span!("pipeline",
            job_id = %job.job_id,
            filename = %filename,
        )
        .entered();

        let mut ctx = PipelineContext::new(job.clone(), self.config.error_log_limit);

        match self.run_steps(&mut ctx, progress) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("Job {} failed: {}", ctx.job_id(), e);
                self.fail_job(&ctx, &e.to_string(), progress);
                Err(e)
            }
        }
    }

    fn run_steps(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<JobOutcome, PipelineError> {
        // Step 1: Purge failed rows left by a previous attempt
        {
            let _step = info_span!("purge_failed_rows").entered();
            let purged = self
                .db
                .with_conn(|c| failed_row_repo::delete_by_job(c, ctx.job_id()))?;
            if purged > 0 {
                info!(
                    "Retry detected, removed {} failed rows from the previous attempt",
                    purged
                );
            }
        }

        // Step 2: Mark processing
        {
            let started_at = now_timestamp();
            self.db
                .with_conn(|c| job_repo::mark_processing(c, ctx.job_id(), &started_at))?;
            progress.report(JobProgressEvent::started(ctx.job_id(), &started_at));
            ctx.started_at = Some(started_at);
        }

        // Step 3: Count rows
        let total_rows = {
            let _step = info_span!("count_rows").entered();
            reader::count_rows(&ctx.job.filepath)?
        };
        if total_rows == 0 {
            return self.fail_empty(ctx, progress);
        }

        // Step 4: Persist total
        ctx.counters.total_rows = total_rows;
        self.db
            .with_conn(|c| job_repo::set_total_rows(c, ctx.job_id(), total_rows))?;
        info!("Total rows to process: {}", total_rows);

        // Step 5: Preload emails into the validator
        let mut validator = RowValidator::new();
        {
            let _step = info_span!("initialize_validator").entered();
            let emails = reader::collect_emails(&ctx.job.filepath)?;
            validator.initialize(
                &self.db,
                ctx.job_id(),
                &emails,
                self.config.email_lookup_chunk,
            )?;
        }

        // Steps 6-8: Validate, commit and report
        {
            let _step = info_span!("process_rows", total_rows).entered();
            self.step_process_rows(ctx, &mut validator, progress)?;
        }

        // Step 9: Complete
        self.step_complete(ctx, progress)
    }

    fn step_process_rows(
        &self,
        ctx: &mut PipelineContext,
        validator: &mut RowValidator,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let committer = BatchCommitter::new(&self.db);
        let batch_size = self.config.batch_size.max(1);
        let mut throttle = EmitThrottle::new(self.config.emit_interval);
        let mut batch: Vec<PendingRow> = Vec::with_capacity(batch_size);
        let total_rows = ctx.counters.total_rows;

        for item in RowReader::open(&ctx.job.filepath)? {
            let csv_row = item?;
            let row_number = csv_row.row_number();
            let is_last = csv_row.index as u64 + 1 >= total_rows;
            let row = SanitizedRow::from_raw(&csv_row.raw);

            match validator.validate_row(&row, row_number)? {
                Validation::Valid => batch.push(PendingRow {
                    index: csv_row.index,
                    row_number,
                    row,
                }),
                Validation::AlreadyCommitted => {
                    debug!("Row {} was committed by a previous attempt", row_number);
                    ctx.record_successes(1);
                }
                Validation::Invalid(errors) => {
                    self.record_invalid(ctx, &csv_row, errors)?;
                }
            }

            if batch.len() >= batch_size || (is_last && !batch.is_empty()) {
                Self::flush(&committer, &mut batch, ctx)?;
            }

            if throttle.tick(is_last) {
                progress.report(JobProgressEvent::new(
                    ctx.job_id(),
                    JobStatus::Processing,
                    ctx.progress(),
                    ctx.counters,
                ));
                debug!(
                    "Progress: {}% ({}/{}) - {} ok, {} failed",
                    ctx.progress(),
                    ctx.counters.processed_rows,
                    total_rows,
                    ctx.counters.success_count,
                    ctx.counters.failed_count
                );
            }
        }

        // The file may have grown since it was counted.
        if !batch.is_empty() {
            Self::flush(&committer, &mut batch, ctx)?;
        }

        Ok(())
    }

    fn flush(
        committer: &BatchCommitter<'_>,
        batch: &mut Vec<PendingRow>,
        ctx: &mut PipelineContext,
    ) -> Result<(), PipelineError> {
        let summary = committer.commit(batch, ctx)?;
        if summary.fell_back {
            debug!(
                "Row-by-row fallback: {} committed, {} failed",
                summary.committed, summary.failed
            );
        }
        batch.clear();
        Ok(())
    }

    /// Stores a rejected row with its original values and counts it, in one
    /// transaction with the job's counters.
    fn record_invalid(
        &self,
        ctx: &mut PipelineContext,
        csv_row: &CsvRow,
        errors: Vec<String>,
    ) -> Result<(), PipelineError> {
        let message = errors.join(", ");
        ctx.record_failure();
        ctx.errors.extend(errors);

        let raw = &csv_row.raw;
        let failed = NewFailedRow {
            row_number: csv_row.row_number(),
            name: raw.name.as_deref(),
            email: raw.email.as_deref(),
            phone: raw.phone.as_deref(),
            company: raw.company.as_deref(),
            error: &message,
        };
        self.db.with_transaction(|tx| {
            failed_row_repo::insert(tx, ctx.job_id(), &failed)?;
            job_repo::update_progress(tx, ctx.job_id(), &ctx.job_progress())
        })?;
        Ok(())
    }

    fn step_complete(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<JobOutcome, PipelineError> {
        let completed_at = now_timestamp();
        self.db.with_transaction(|tx| {
            job_repo::update_progress(tx, ctx.job_id(), &ctx.job_progress())?;
            job_repo::mark_completed(tx, ctx.job_id(), &completed_at)
        })?;

        let mut event = JobProgressEvent::completed(
            ctx.job_id(),
            ctx.counters,
            ctx.errors.as_slice(),
            &completed_at,
        );
        event.started_at = ctx.started_at.clone();
        progress.report(event);

        info!(
            "Job {} completed: {} success, {} failed",
            ctx.job_id(),
            ctx.counters.success_count,
            ctx.counters.failed_count
        );

        Ok(JobOutcome::from_context(ctx, JobStatus::Completed))
    }

    fn fail_empty(
        &self,
        ctx: &PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<JobOutcome, PipelineError> {
        warn!("Job {}: {}", ctx.job_id(), EMPTY_FILE_ERROR);
        let completed_at = now_timestamp();
        self.db.with_conn(|c| {
            job_repo::mark_failed(c, ctx.job_id(), EMPTY_FILE_ERROR, &completed_at)
        })?;
        progress.report(JobProgressEvent::failed(
            ctx.job_id(),
            0,
            ctx.counters,
            EMPTY_FILE_ERROR,
            &completed_at,
        ));

        let mut outcome = JobOutcome::from_context(ctx, JobStatus::Failed);
        outcome.errors = vec![EMPTY_FILE_ERROR.to_string()];
        Ok(outcome)
    }

    /// Best effort: the original error is what the caller sees, so a failure
    /// to persist the `failed` status is only logged.
    fn fail_job(&self, ctx: &PipelineContext, error: &str, progress: &dyn ProgressReporter) {
        let completed_at = now_timestamp();
        if let Err(e) = self
            .db
            .with_conn(|c| job_repo::mark_failed(c, ctx.job_id(), error, &completed_at))
        {
            warn!("Could not mark job {} as failed: {}", ctx.job_id(), e);
        }
        progress.report(JobProgressEvent::failed(
            ctx.job_id(),
            ctx.progress(),
            ctx.counters,
            error,
            &completed_at,
        ));
    }
}
