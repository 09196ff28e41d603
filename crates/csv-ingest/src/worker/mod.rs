pub mod consumer;
pub mod job;
pub mod queue;
pub mod recovery;
pub mod submit;

pub use consumer::Worker;
pub use job::{JobOutcome, JobResult, QueuedJob};
pub use queue::{Delivery, JobQueue};
pub use recovery::{recover_crashed_jobs, CRASH_ERROR};
pub use submit::submit_upload;
