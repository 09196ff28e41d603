//! Normalization of row values before validation and persistence, and
//! helpers for keeping file paths out of tracing span attributes.

use std::path::Path;

use crate::reader::RawRow;

/// Canonical form used for every email comparison: trimmed and lower-cased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// A row with every field trimmed and the email lower-cased.
///
/// Empty strings stand in for absent required fields so the validator can
/// report them; an absent phone stays `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizedRow {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: String,
}

impl SanitizedRow {
    pub fn from_raw(raw: &RawRow) -> Self {
        let trimmed = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string()
        };

        Self {
            name: trimmed(&raw.name),
            email: raw.email.as_deref().map(normalize_email).unwrap_or_default(),
            phone: raw
                .phone
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            company: trimmed(&raw.company),
        }
    }
}

/// Returns only the filename component of a path (no directory).
///
/// Used for span fields and log lines that should not carry directories.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}
