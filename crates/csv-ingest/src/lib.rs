pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod reader;
pub mod report;
pub mod sanitize;
pub mod validator;
pub mod worker;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent, JobStatus};
pub use config::{load_config, IngestConfig};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, IngestError, Result, WorkerError};
pub use pipeline::{Pipeline, PipelineConfig, PipelineContext, PipelineError};
pub use report::{error_report_csv, ReportError};
pub use worker::{recover_crashed_jobs, submit_upload, JobQueue, QueuedJob, Worker};
