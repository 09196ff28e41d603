pub mod batch;
pub mod config;
pub mod context;
pub mod error;
pub mod progress;
pub mod runner;

pub use batch::{BatchCommitter, CommitSummary, PendingRow};
pub use config::PipelineConfig;
pub use context::{ErrorLog, PipelineContext};
pub use error::PipelineError;
pub use progress::{
    BroadcastProgress, EmitThrottle, NoopProgress, ProgressReporter, RecordingProgress,
};
pub use runner::{Pipeline, EMPTY_FILE_ERROR};
