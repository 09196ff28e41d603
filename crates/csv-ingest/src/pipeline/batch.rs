//! Transactional persistence of validated rows.
//!
//! A batch is first written as one transaction. If that fails, every row is
//! retried in a transaction of its own so a single bad row cannot sink its
//! neighbours; rows that still fail become failed-row records.

use tracing::warn;

use crate::db::customer_repo::{self, NewCustomer};
use crate::db::failed_row_repo::{self, NewFailedRow};
use crate::db::{job_repo, Database, DatabaseError};
use crate::sanitize::SanitizedRow;

use super::context::PipelineContext;

/// A validated row waiting to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRow {
    pub index: usize,
    pub row_number: u64,
    pub row: SanitizedRow,
}

impl PendingRow {
    fn customer(&self) -> NewCustomer<'_> {
        NewCustomer {
            name: &self.row.name,
            email: &self.row.email,
            phone: self.row.phone.as_deref(),
            company: &self.row.company,
        }
    }
}

/// Result of [`BatchCommitter::commit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub committed: u64,
    pub failed: u64,
    /// True when the batch transaction failed and rows were retried one by one.
    pub fell_back: bool,
}

pub struct BatchCommitter<'a> {
    db: &'a Database,
}

impl<'a> BatchCommitter<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Inserts every row and advances the job's counters in one transaction.
    /// On error nothing is written and `ctx` is unchanged.
    pub fn commit_batch(
        &self,
        rows: &[PendingRow],
        ctx: &mut PipelineContext,
    ) -> Result<(), DatabaseError> {
        if rows.is_empty() {
            return Ok(());
        }

        let customers: Vec<NewCustomer<'_>> = rows.iter().map(PendingRow::customer).collect();
        let previous = ctx.counters;
        ctx.record_successes(rows.len() as u64);

        let result = self.db.with_transaction(|tx| {
            customer_repo::insert_many(tx, ctx.job_id(), &customers)?;
            job_repo::update_progress(tx, ctx.job_id(), &ctx.job_progress())
        });

        if result.is_err() {
            ctx.counters = previous;
        }
        result
    }

    /// Inserts one row and advances the counters by one, in one transaction.
    pub fn commit_single(
        &self,
        row: &PendingRow,
        ctx: &mut PipelineContext,
    ) -> Result<(), DatabaseError> {
        let previous = ctx.counters;
        ctx.record_successes(1);

        let result = self.db.with_transaction(|tx| {
            customer_repo::insert(tx, ctx.job_id(), &row.customer())?;
            job_repo::update_progress(tx, ctx.job_id(), &ctx.job_progress())
        });

        if result.is_err() {
            ctx.counters = previous;
        }
        result
    }

    /// Commits `rows` as a batch, falling back to row-by-row on failure.
    ///
    /// Only an error while recording a row's failure is returned; a row that
    /// cannot be inserted is counted as failed and processing continues.
    pub fn commit(
        &self,
        rows: &[PendingRow],
        ctx: &mut PipelineContext,
    ) -> Result<CommitSummary, DatabaseError> {
        let batch_error = match self.commit_batch(rows, ctx) {
            Ok(()) => {
                return Ok(CommitSummary {
                    committed: rows.len() as u64,
                    ..Default::default()
                })
            }
            Err(e) => e,
        };

        warn!(
            "Batch of {} rows failed for job {}, falling back to row-by-row: {}",
            rows.len(),
            ctx.job_id(),
            batch_error
        );

        let mut summary = CommitSummary {
            fell_back: true,
            ..Default::default()
        };
        for row in rows {
            match self.commit_single(row, ctx) {
                Ok(()) => summary.committed += 1,
                Err(e) => {
                    let message = fallback_error(row.row_number, &e);
                    warn!("{}", message);
                    self.record_row_failure(row, &message, ctx)?;
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Writes the failed-row record and the incremented counters together.
    fn record_row_failure(
        &self,
        row: &PendingRow,
        message: &str,
        ctx: &mut PipelineContext,
    ) -> Result<(), DatabaseError> {
        let previous = (ctx.counters, ctx.errors.clone());
        ctx.record_failure();
        ctx.errors.push(message.to_string());

        let failed = NewFailedRow {
            row_number: row.row_number,
            name: Some(row.row.name.as_str()),
            email: Some(row.row.email.as_str()),
            phone: row.row.phone.as_deref(),
            company: Some(row.row.company.as_str()),
            error: message,
        };
        let result = self.db.with_transaction(|tx| {
            failed_row_repo::insert(tx, ctx.job_id(), &failed)?;
            job_repo::update_progress(tx, ctx.job_id(), &ctx.job_progress())
        });

        if result.is_err() {
            (ctx.counters, ctx.errors) = previous;
        }
        result
    }
}

/// Failure text for a row rejected during row-by-row fallback. Validated rows
/// only trip a constraint when another writer took the email after the
/// existence snapshot.
fn fallback_error(row_number: u64, err: &DatabaseError) -> String {
    if err.is_constraint_violation() {
        format!(
            "Row {}: Database error - Email already exists in database",
            row_number
        )
    } else {
        format!("Row {}: Database error - {}", row_number, err)
    }
}
