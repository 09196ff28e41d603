//! Per-job row validation.
//!
//! A [`RowValidator`] is created fresh for every job attempt. It snapshots
//! which of the file's emails already exist in the database, then checks rows
//! one at a time against required fields, email format, and uniqueness both
//! against the snapshot and against earlier rows of the same file.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::db::customer_repo::{self, MAX_LOOKUP_EMAILS};
use crate::db::{Database, DatabaseError};
use crate::sanitize::{normalize_email, SanitizedRow};

static RE_EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("Row validator used before initialize()")]
    NotInitialized,

    #[error("Email lookup failed: {0}")]
    Database(#[from] DatabaseError),
}

/// Outcome of validating one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// The row may be inserted.
    Valid,
    /// The row was inserted by an earlier attempt of this same job. It counts
    /// as a success and must not be inserted again.
    AlreadyCommitted,
    /// Every failed rule, in check order, each prefixed with `Row N: `.
    Invalid(Vec<String>),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Validation::Invalid(_))
    }
}

#[derive(Debug, Default)]
pub struct RowValidator {
    /// Emails persisted by other jobs.
    existing: HashSet<String>,
    /// Emails persisted by a previous attempt of the current job.
    committed_by_job: HashSet<String>,
    /// Emails of rows accepted so far in this file.
    seen: HashSet<String>,
    initialized: bool,
}

impl RowValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Loads which of `emails` are already persisted, querying at most
    /// `chunk_size` emails per round trip. The chunk is clamped to
    /// `1..=MAX_LOOKUP_EMAILS`.
    ///
    /// Must run once before [`validate_row`](Self::validate_row). Calling it
    /// again replaces the snapshot and forgets the in-file set.
    pub fn initialize(
        &mut self,
        db: &Database,
        job_id: &str,
        emails: &[String],
        chunk_size: usize,
    ) -> Result<(), ValidatorError> {
        let mut unique: Vec<String> = Vec::with_capacity(emails.len());
        let mut dedup = HashSet::with_capacity(emails.len());
        for email in emails {
            let email = normalize_email(email);
            if !email.is_empty() && dedup.insert(email.clone()) {
                unique.push(email);
            }
        }

        log::debug!(
            "Checking {} unique emails against the database for job {}",
            unique.len(),
            job_id
        );

        self.existing.clear();
        self.committed_by_job.clear();
        self.seen.clear();

        let chunk_size = chunk_size.clamp(1, MAX_LOOKUP_EMAILS);
        for chunk in unique.chunks(chunk_size) {
            let found = db.with_conn(|conn| customer_repo::find_existing_emails(conn, chunk))?;
            for hit in found {
                let email = normalize_email(&hit.email);
                if hit.job_id == job_id {
                    self.committed_by_job.insert(email);
                } else {
                    self.existing.insert(email);
                }
            }
        }

        log::debug!(
            "Found {} existing emails ({} from a previous attempt) for job {}",
            self.existing.len() + self.committed_by_job.len(),
            self.committed_by_job.len(),
            job_id
        );

        self.initialized = true;
        Ok(())
    }

    /// Checks one sanitized row. `row_number` is the one-based file line
    /// including the header.
    ///
    /// The only state change is recording the email of an accepted row.
    pub fn validate_row(
        &mut self,
        row: &SanitizedRow,
        row_number: u64,
    ) -> Result<Validation, ValidatorError> {
        if !self.initialized {
            return Err(ValidatorError::NotInitialized);
        }

        let mut errors = Vec::new();
        let mut fail = |message: &str| errors.push(format!("Row {}: {}", row_number, message));

        if row.name.is_empty() {
            fail("Name is required");
        }

        let mut already_committed = false;
        if row.email.is_empty() {
            fail("Email is required");
        } else if !RE_EMAIL.is_match(&row.email) {
            fail("Invalid email format");
        } else {
            if self.existing.contains(&row.email) {
                fail("Email already exists in database");
            }
            if self.seen.contains(&row.email) {
                fail("Duplicate email within this CSV file");
            }
            already_committed = self.committed_by_job.contains(&row.email);
        }

        if row.company.is_empty() {
            fail("Company is required");
        }

        if !errors.is_empty() {
            return Ok(Validation::Invalid(errors));
        }

        self.seen.insert(row.email.clone());
        if already_committed {
            Ok(Validation::AlreadyCommitted)
        } else {
            Ok(Validation::Valid)
        }
    }
}
