//! Failed-row repository. Rejected rows kept for the error report.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use super::{now_timestamp, DatabaseError};

/// A persisted failed row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRowRecord {
    pub id: String,
    pub job_id: String,
    pub row_number: u64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub error: String,
    pub created_at: String,
}

impl FailedRowRecord {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            row_number: row.get("row_number")?,
            name: row.get("name")?,
            email: row.get("email")?,
            phone: row.get("phone")?,
            company: row.get("company")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Fields of a failed row about to be written.
#[derive(Debug, Clone, Copy)]
pub struct NewFailedRow<'a> {
    pub row_number: u64,
    pub name: Option<&'a str>,
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub company: Option<&'a str>,
    pub error: &'a str,
}

/// Records a rejected row for `job_id`.
pub fn insert(
    conn: &Connection,
    job_id: &str,
    row: &NewFailedRow<'_>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO failed_rows (id, job_id, row_number, name, email, phone, company, error,
         created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            uuid::Uuid::new_v4().to_string(),
            job_id,
            row.row_number,
            row.name,
            row.email,
            row.phone,
            row.company,
            row.error,
            now_timestamp(),
        ],
    )?;
    Ok(())
}

/// Failed rows for a job ordered by row number.
pub fn find_by_job(conn: &Connection, job_id: &str) -> Result<Vec<FailedRowRecord>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM failed_rows WHERE job_id = ?1 ORDER BY row_number, rowid")?;
    let rows = stmt
        .query_map(params![job_id], FailedRowRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_by_job(conn: &Connection, job_id: &str) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT COUNT(*) FROM failed_rows WHERE job_id = ?1",
        params![job_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// Deletes every failed row of a job, returning how many were removed.
pub fn delete_by_job(conn: &Connection, job_id: &str) -> Result<usize, DatabaseError> {
    let deleted = conn.execute("DELETE FROM failed_rows WHERE job_id = ?1", params![job_id])?;
    Ok(deleted)
}
