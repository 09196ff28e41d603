use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::db::default_database_path;

/// Environment variable that overrides `databasePath`.
pub const DATABASE_ENV: &str = "CSV_INGEST_DATABASE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestConfig {
    /// Validated rows per commit transaction.
    pub batch_size: usize,
    /// Processed rows between two progress broadcasts.
    pub emit_interval: u64,
    /// Row errors kept on the job record.
    pub error_log_limit: usize,
    /// Emails per lookup query when preloading existing customers.
    pub email_lookup_chunk: usize,
    pub max_attempts: u32,
    pub broadcast_capacity: usize,
    pub queue_capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            emit_interval: 100,
            error_log_limit: 100,
            email_lookup_chunk: 1000,
            max_attempts: 3,
            broadcast_capacity: 100,
            queue_capacity: 64,
            database_path: None,
        }
    }
}

impl IngestConfig {
    /// Database file to open: the configured path, else the per-user default.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path.clone().or_else(default_database_path)
    }
}
