//! Job repository: CRUD operations for the `jobs` table.
//!
//! Functions take a `&Connection` so they compose inside
//! [`Database::with_transaction`](super::Database::with_transaction).

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{now_timestamp, DatabaseError};
use crate::broadcast::JobStatus;

/// A job row from the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRow {
    pub id: String,
    pub filename: String,
    pub source_path: String,
    pub status: JobStatus,
    pub progress: u8,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub success_count: u64,
    pub failed_count: u64,
    pub errors: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status: String = row.get("status")?;
        let status = status.parse::<JobStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
        })?;
        let errors: String = row.get("errors")?;
        let errors: Vec<String> = serde_json::from_str(&errors).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
        })?;

        Ok(Self {
            id: row.get("id")?,
            filename: row.get("filename")?,
            source_path: row.get("source_path")?,
            status,
            progress: row.get("progress")?,
            total_rows: row.get("total_rows")?,
            processed_rows: row.get("processed_rows")?,
            success_count: row.get("success_count")?,
            failed_count: row.get("failed_count")?,
            errors,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Counter snapshot written after every batch or failed row.
#[derive(Debug, Clone, Copy)]
pub struct JobProgress<'a> {
    pub processed_rows: u64,
    pub success_count: u64,
    pub failed_count: u64,
    pub progress: u8,
    pub errors: &'a [String],
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Creates a new job in `pending` state and returns it.
pub fn create(
    conn: &Connection,
    filename: &str,
    source_path: &str,
) -> Result<JobRow, DatabaseError> {
    let now = now_timestamp();
    let job = JobRow {
        id: uuid::Uuid::new_v4().to_string(),
        filename: filename.to_string(),
        source_path: source_path.to_string(),
        status: JobStatus::Pending,
        progress: 0,
        total_rows: 0,
        processed_rows: 0,
        success_count: 0,
        failed_count: 0,
        errors: Vec::new(),
        created_at: now.clone(),
        updated_at: now,
        started_at: None,
        completed_at: None,
    };
    insert(conn, &job)?;
    Ok(job)
}

/// Inserts a job row as-is.
pub fn insert(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (id, filename, source_path, status, progress, total_rows,
         processed_rows, success_count, failed_count, errors, created_at, updated_at,
         started_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            job.id,
            job.filename,
            job.source_path,
            job.status.as_str(),
            job.progress,
            job.total_rows,
            job.processed_rows,
            job.success_count,
            job.failed_count,
            serde_json::to_string(&job.errors)?,
            job.created_at,
            job.updated_at,
            job.started_at,
            job.completed_at,
        ],
    )?;
    Ok(())
}

/// Finds a job by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let job = conn
        .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], JobRow::from_row)
        .optional()?;
    Ok(job)
}

/// Lists jobs newest first.
pub fn list(conn: &Connection, filter: &JobFilter) -> Result<Vec<JobRow>, DatabaseError> {
    let limit = filter.limit.unwrap_or(100) as i64;
    let offset = filter.offset.unwrap_or(0) as i64;

    let rows = match filter.status {
        Some(status) => {
            let mut stmt = conn.prepare(
                "SELECT * FROM jobs WHERE status = ?1
                 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(params![status.as_str(), limit, offset], JobRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt =
                conn.prepare("SELECT * FROM jobs ORDER BY created_at DESC LIMIT ?1 OFFSET ?2")?;
            let rows = stmt
                .query_map(params![limit, offset], JobRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };

    Ok(rows)
}

/// Returns every job currently in the given status, oldest first.
pub fn find_by_status(conn: &Connection, status: JobStatus) -> Result<Vec<JobRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM jobs WHERE status = ?1 ORDER BY created_at ASC")?;
    let rows = stmt
        .query_map(params![status.as_str()], JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Moves a job to `processing`, stamping `started_at` and resetting every
/// counter left over from a previous attempt.
pub fn mark_processing(conn: &Connection, id: &str, started_at: &str) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status = 'processing', progress = 0, total_rows = 0,
         processed_rows = 0, success_count = 0, failed_count = 0, errors = '[]',
         started_at = ?2, completed_at = NULL, updated_at = ?2
         WHERE id = ?1",
        params![id, started_at],
    )?;
    ensure_changed(changed, id)
}

/// Persists the row count found by the counting pass.
pub fn set_total_rows(conn: &Connection, id: &str, total_rows: u64) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET total_rows = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, total_rows, now_timestamp()],
    )?;
    ensure_changed(changed, id)
}

/// Writes the running counters, progress percentage and error log.
pub fn update_progress(
    conn: &Connection,
    id: &str,
    progress: &JobProgress<'_>,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET processed_rows = ?2, success_count = ?3, failed_count = ?4,
         progress = ?5, errors = ?6, updated_at = ?7
         WHERE id = ?1",
        params![
            id,
            progress.processed_rows,
            progress.success_count,
            progress.failed_count,
            progress.progress,
            serde_json::to_string(progress.errors)?,
            now_timestamp(),
        ],
    )?;
    ensure_changed(changed, id)
}

/// Marks a job `completed` with progress 100.
pub fn mark_completed(
    conn: &Connection,
    id: &str,
    completed_at: &str,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status = 'completed', progress = 100, completed_at = ?2, updated_at = ?2
         WHERE id = ?1",
        params![id, completed_at],
    )?;
    ensure_changed(changed, id)
}

/// Marks a job `failed`, replacing its error log with the single fatal error.
pub fn mark_failed(
    conn: &Connection,
    id: &str,
    error: &str,
    completed_at: &str,
) -> Result<(), DatabaseError> {
    let errors = serde_json::to_string(&[error])?;
    let changed = conn.execute(
        "UPDATE jobs SET status = 'failed', errors = ?2, completed_at = ?3, updated_at = ?3
         WHERE id = ?1",
        params![id, errors, completed_at],
    )?;
    ensure_changed(changed, id)
}

/// Marks a job `failed` only if it is still `processing`.
///
/// Returns whether the row changed, so repeated sweeps touch a job once.
pub fn fail_if_processing(
    conn: &Connection,
    id: &str,
    error: &str,
    completed_at: &str,
) -> Result<bool, DatabaseError> {
    let errors = serde_json::to_string(&[error])?;
    let changed = conn.execute(
        "UPDATE jobs SET status = 'failed', errors = ?2, completed_at = ?3, updated_at = ?3
         WHERE id = ?1 AND status = 'processing'",
        params![id, errors, completed_at],
    )?;
    Ok(changed > 0)
}

fn ensure_changed(changed: usize, id: &str) -> Result<(), DatabaseError> {
    if changed == 0 {
        return Err(DatabaseError::NotFound(format!("job {}", id)));
    }
    Ok(())
}
