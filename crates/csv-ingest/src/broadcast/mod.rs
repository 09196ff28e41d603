//! Broadcasting of job progress events.
//!
//! The pipeline and crash recovery publish here; any number of subscribers
//! (the worker binary, tests) consume the stream.

pub mod job_progress;

pub use job_progress::{Counters, JobProgressBroadcaster, JobProgressEvent, JobStatus};
