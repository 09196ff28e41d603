//! Customer repository: inserts and email lookups for the `customers` table.

use rusqlite::{params, params_from_iter, Connection, Row};
use serde::Serialize;

use super::{now_timestamp, DatabaseError};

/// A persisted customer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: String,
    pub job_id: String,
    pub created_at: String,
}

impl CustomerRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            email: row.get("email")?,
            phone: row.get("phone")?,
            company: row.get("company")?,
            job_id: row.get("job_id")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Fields of a customer about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomer<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub phone: Option<&'a str>,
    pub company: &'a str,
}

/// Inserts one customer owned by `job_id`.
pub fn insert(
    conn: &Connection,
    job_id: &str,
    customer: &NewCustomer<'_>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO customers (id, name, email, phone, company, job_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            uuid::Uuid::new_v4().to_string(),
            customer.name,
            customer.email,
            customer.phone,
            customer.company,
            job_id,
            now_timestamp(),
        ],
    )?;
    Ok(())
}

/// Inserts every customer in order, stopping at the first failure.
///
/// Callers wrap this in a transaction so a failure leaves nothing behind.
pub fn insert_many(
    conn: &Connection,
    job_id: &str,
    customers: &[NewCustomer<'_>],
) -> Result<(), DatabaseError> {
    let created_at = now_timestamp();
    let mut stmt = conn.prepare_cached(
        "INSERT INTO customers (id, name, email, phone, company, job_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for customer in customers {
        stmt.execute(params![
            uuid::Uuid::new_v4().to_string(),
            customer.name,
            customer.email,
            customer.phone,
            customer.company,
            job_id,
            created_at,
        ])?;
    }
    Ok(())
}

/// An email already present in `customers`, with the job that created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingEmail {
    pub email: String,
    pub job_id: String,
}

/// Most bound parameters SQLite accepts in one statement.
pub const MAX_LOOKUP_EMAILS: usize = 32766;

/// Returns which of `emails` are already stored. One query per call; callers
/// keep the slice at or under [`MAX_LOOKUP_EMAILS`].
pub fn find_existing_emails(
    conn: &Connection,
    emails: &[String],
) -> Result<Vec<ExistingEmail>, DatabaseError> {
    if emails.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; emails.len()].join(", ");
    let sql = format!(
        "SELECT email, job_id FROM customers WHERE email IN ({})",
        placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(emails.iter()), |row| {
            Ok(ExistingEmail {
                email: row.get(0)?,
                job_id: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// All customers created by a job, in insertion order.
pub fn find_by_job(conn: &Connection, job_id: &str) -> Result<Vec<CustomerRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM customers WHERE job_id = ?1 ORDER BY created_at, rowid")?;
    let rows = stmt
        .query_map(params![job_id], CustomerRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Number of customers created by a job.
pub fn count_by_job(conn: &Connection, job_id: &str) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT COUNT(*) FROM customers WHERE job_id = ?1",
        params![job_id],
        |r| r.get(0),
    )?;
    Ok(count)
}
