use crate::config::IngestConfig;

/// Tuning knobs for a single job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Valid rows per insert transaction.
    pub batch_size: usize,
    /// Rows between two throttled progress broadcasts.
    pub emit_interval: u64,
    /// Maximum entries kept in a job's error log.
    pub error_log_limit: usize,
    /// Emails per lookup query while initializing the validator.
    pub email_lookup_chunk: usize,
}

impl PipelineConfig {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            emit_interval: config.emit_interval,
            error_log_limit: config.error_log_limit,
            email_lookup_chunk: config.email_lookup_chunk,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}
