//! Downloadable CSV of the rows a job could not import.

use csv::{QuoteStyle, Terminator, WriterBuilder};
use thiserror::Error;

use crate::db::{failed_row_repo, job_repo, Database, DatabaseError};

const REPORT_HEADER: &str = "rowNumber,name,email,phone,company,error\n";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("No failed rows to generate report for job {job_id}")]
    NoFailedRows { job_id: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Failed to write report: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Renders the failed rows of a job, ordered by row number.
///
/// Every data field is quoted with embedded quotes doubled; absent values are
/// written as `""`.
pub fn error_report_csv(db: &Database, job_id: &str) -> Result<String, ReportError> {
    let (job, rows) = db.with_conn(|c| {
        let job = job_repo::find_by_id(c, job_id)?;
        let rows = failed_row_repo::find_by_job(c, job_id)?;
        Ok((job, rows))
    })?;

    if job.is_none() {
        return Err(ReportError::JobNotFound(job_id.to_string()));
    }
    if rows.is_empty() {
        return Err(ReportError::NoFailedRows {
            job_id: job_id.to_string(),
        });
    }

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(REPORT_HEADER.as_bytes().to_vec());

    for row in &rows {
        writer.write_record([
            row.row_number.to_string().as_str(),
            row.name.as_deref().unwrap_or_default(),
            row.email.as_deref().unwrap_or_default(),
            row.phone.as_deref().unwrap_or_default(),
            row.company.as_deref().unwrap_or_default(),
            row.error.as_str(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;

    log::debug!("Error report for job {}: {} row(s)", job_id, rows.len());

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
