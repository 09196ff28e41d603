//! Test harness for isolated job runs.
//!
//! Each `TestHarness` owns a temporary upload directory, an in-memory
//! database and a broadcaster with one subscriber that records every event
//! the pipeline sends.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use assert_fs::prelude::*;
use assert_fs::TempDir;
use tokio::sync::broadcast;

use csv_ingest::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use csv_ingest::db::customer_repo::{self, CustomerRow};
use csv_ingest::db::failed_row_repo::{self, FailedRowRecord};
use csv_ingest::db::job_repo::{self, JobRow};
use csv_ingest::db::Database;
use csv_ingest::pipeline::{
    BroadcastProgress, Pipeline, PipelineConfig, PipelineError, ProgressReporter,
};
use csv_ingest::worker::{JobOutcome, QueuedJob};

const EVENT_CAPACITY: usize = 4096;

pub struct TestHarness {
    pub dir: TempDir,
    pub db: Database,
    pub broadcaster: JobProgressBroadcaster,
    events: broadcast::Receiver<JobProgressEvent>,
    config: PipelineConfig,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let broadcaster = JobProgressBroadcaster::new(EVENT_CAPACITY);
        let events = broadcaster.subscribe();
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
            db: Database::open_in_memory().expect("Failed to open database"),
            broadcaster,
            events,
            config,
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.db.clone(), Arc::new(self.config.clone()))
    }

    /// Writes an upload file into the temp directory.
    pub fn write_csv(&self, name: &str, content: &str) -> PathBuf {
        let file = self.dir.child(name);
        file.write_str(content).expect("Failed to write CSV");
        file.path().to_path_buf()
    }

    /// Creates a `pending` job for an upload and returns its queue message.
    pub fn create_job(&self, path: PathBuf) -> QueuedJob {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let job = self
            .db
            .with_conn(|c| job_repo::create(c, &filename, &path.display().to_string()))
            .expect("Failed to create job");
        QueuedJob::new(&job.id, path)
    }

    /// Writes `content`, creates a job for it and runs it once.
    pub fn run_csv(
        &self,
        name: &str,
        content: &str,
    ) -> (QueuedJob, Result<JobOutcome, PipelineError>) {
        let job = self.create_job(self.write_csv(name, content));
        let result = self.run(&job);
        (job, result)
    }

    pub fn run(&self, job: &QueuedJob) -> Result<JobOutcome, PipelineError> {
        let progress = BroadcastProgress::new(self.broadcaster.clone());
        self.pipeline().run(job, &progress)
    }

    pub fn run_with(
        &self,
        job: &QueuedJob,
        progress: &dyn ProgressReporter,
    ) -> Result<JobOutcome, PipelineError> {
        self.pipeline().run(job, progress)
    }

    pub fn job(&self, job_id: &str) -> JobRow {
        self.db
            .with_conn(|c| job_repo::find_by_id(c, job_id))
            .expect("Failed to load job")
            .expect("Job not found")
    }

    pub fn customers(&self, job_id: &str) -> Vec<CustomerRow> {
        self.db
            .with_conn(|c| customer_repo::find_by_job(c, job_id))
            .expect("Failed to load customers")
    }

    pub fn failed_rows(&self, job_id: &str) -> Vec<FailedRowRecord> {
        self.db
            .with_conn(|c| failed_row_repo::find_by_job(c, job_id))
            .expect("Failed to load failed rows")
    }

    /// Every event received since the last call, oldest first.
    pub fn drain_events(&mut self) -> Vec<JobProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
