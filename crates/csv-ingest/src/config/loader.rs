use std::path::{Path, PathBuf};

use crate::config::schema::{IngestConfig, DATABASE_ENV};
use crate::db::customer_repo::MAX_LOOKUP_EMAILS;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<IngestConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<IngestConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let mut config: IngestConfig = serde_json::from_value(json_value)?;

    apply_env_overrides(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Defaults plus environment overrides, for runs without a config file.
pub fn config_from_env() -> Result<IngestConfig, ConfigError> {
    let mut config = IngestConfig::default();
    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut IngestConfig) {
    if let Ok(path) = std::env::var(DATABASE_ENV) {
        let path = path.trim();
        if !path.is_empty() {
            log::debug!("{} overrides database path", DATABASE_ENV);
            config.database_path = Some(PathBuf::from(path));
        }
    }
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &IngestConfig) -> Result<(), ConfigError> {
    let sizes = [
        ("batchSize", config.batch_size as u64),
        ("emitInterval", config.emit_interval),
        ("errorLogLimit", config.error_log_limit as u64),
        ("emailLookupChunk", config.email_lookup_chunk as u64),
        ("maxAttempts", u64::from(config.max_attempts)),
        ("broadcastCapacity", config.broadcast_capacity as u64),
        ("queueCapacity", config.queue_capacity as u64),
    ];
    if let Some((name, _)) = sizes.iter().find(|(_, value)| *value == 0) {
        return Err(ConfigError::Validation {
            message: format!("{} must be greater than 0", name),
        });
    }

    if config.email_lookup_chunk > MAX_LOOKUP_EMAILS {
        return Err(ConfigError::Validation {
            message: format!("emailLookupChunk must be at most {}", MAX_LOOKUP_EMAILS),
        });
    }

    if let Some(path) = &config.database_path {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation {
                message: "databasePath must not be empty".to_string(),
            });
        }
    }

    Ok(())
}
