//! JSON configuration: typed settings plus a schema-checked loader.

pub mod loader;
pub mod schema;

pub use loader::{config_from_env, load_config, load_config_from_str};
pub use schema::{IngestConfig, DATABASE_ENV};
