use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use csv_ingest::broadcast::{JobProgressBroadcaster, JobStatus};
use csv_ingest::config::{config_from_env, load_config, IngestConfig};
use csv_ingest::db::job_repo::{self, JobFilter};
use csv_ingest::db::Database;
use csv_ingest::pipeline::{BroadcastProgress, Pipeline, PipelineConfig, ProgressReporter};
use csv_ingest::report::error_report_csv;
use csv_ingest::worker::{recover_crashed_jobs, submit_upload, JobQueue, Worker};
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

const RESULT_POLL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(
    name = "csv-ingest-worker",
    version,
    about = "Imports customer CSV files into the job database"
)]
struct Cli {
    /// JSON config file; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the config and CSV_INGEST_DATABASE.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a job per file and process them one after another.
    Run {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Mark jobs interrupted by a crash as failed.
    Recover,
    /// List jobs as JSON, newest first.
    Jobs {
        #[arg(long)]
        status: Option<JobStatus>,
        #[arg(long, default_value_t = 100)]
        limit: u64,
    },
    /// Write the failed-row report of a job as CSV.
    Report {
        job_id: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs)?;

    let config = resolve_config(cli.config.as_deref(), cli.database)?;
    let db_path = config
        .resolved_database_path()
        .ok_or_else(|| anyhow!("could not determine a database path; pass --database"))?;
    let db = Database::open(&db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;

    match cli.command {
        Command::Run { files } => run(&db, &config, files),
        Command::Recover => recover(&db, &config),
        Command::Jobs { status, limit } => list_jobs(&db, status, limit),
        Command::Report { job_id, output } => write_report(&db, &job_id, output.as_deref()),
    }
}

fn init_logging(json: bool) -> anyhow::Result<()> {
    tracing_log::LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn resolve_config(path: Option<&Path>, database: Option<PathBuf>) -> anyhow::Result<IngestConfig> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => config_from_env()?,
    };
    if database.is_some() {
        config.database_path = database;
    }
    Ok(config)
}

/// Prints every broadcast event as one JSON line on stdout until all senders
/// are gone.
fn spawn_event_printer(broadcaster: &JobProgressBroadcaster) -> anyhow::Result<JoinHandle<()>> {
    let mut receiver = broadcaster.subscribe();
    let handle = thread::Builder::new()
        .name("csv-ingest-events".to_string())
        .spawn(move || loop {
            match receiver.blocking_recv() {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Failed to encode progress event: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event printer lagged, {} event(s) dropped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        })?;
    Ok(handle)
}

fn run(db: &Database, config: &IngestConfig, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let broadcaster = JobProgressBroadcaster::new(config.broadcast_capacity);
    let printer = spawn_event_printer(&broadcaster)?;
    let progress: Arc<dyn ProgressReporter> =
        Arc::new(BroadcastProgress::new(broadcaster.clone()));

    let recovered = recover_crashed_jobs(db, &*progress)?;
    if recovered > 0 {
        info!("Recovered {} interrupted job(s)", recovered);
    }

    let pipeline = Pipeline::new(db.clone(), Arc::new(PipelineConfig::from_config(config)));
    let queue = JobQueue::new(config.queue_capacity, config.max_attempts);
    let worker = Worker::spawn(pipeline, queue.clone(), Arc::clone(&progress))?;

    let shutdown = worker.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Received Ctrl+C, stopping after the current job");
        shutdown.store(true, Ordering::Relaxed);
    })?;

    let mut pending = 0usize;
    for path in files {
        submit_upload(db, &queue, path)?;
        pending += 1;
    }

    let (mut completed, mut failed) = (0usize, 0usize);
    while pending > 0 {
        let Some(result) = worker.recv_result_timeout(RESULT_POLL) else {
            if worker.is_shutdown() {
                warn!("Stopped with {} job(s) unfinished", pending);
                break;
            }
            continue;
        };
        if !result.is_final() {
            continue;
        }
        pending -= 1;
        match &result.outcome {
            Some(outcome) if outcome.is_success() => completed += 1,
            _ => failed += 1,
        }
    }

    worker.wait();
    drop(progress);
    drop(broadcaster);
    if printer.join().is_err() {
        warn!("Event printer panicked");
    }

    info!("Finished: {} completed, {} failed", completed, failed);
    if failed > 0 {
        bail!("{} job(s) failed", failed);
    }
    Ok(())
}

fn recover(db: &Database, config: &IngestConfig) -> anyhow::Result<()> {
    let broadcaster = JobProgressBroadcaster::new(config.broadcast_capacity);
    let printer = spawn_event_printer(&broadcaster)?;

    let recovered = recover_crashed_jobs(db, &BroadcastProgress::new(broadcaster.clone()))?;
    info!("Recovered {} interrupted job(s)", recovered);

    drop(broadcaster);
    if printer.join().is_err() {
        warn!("Event printer panicked");
    }
    Ok(())
}

fn list_jobs(db: &Database, status: Option<JobStatus>, limit: u64) -> anyhow::Result<()> {
    let filter = JobFilter {
        status,
        limit: Some(limit),
        offset: None,
    };
    let jobs = db.with_conn(|c| job_repo::list(c, &filter))?;
    println!("{}", serde_json::to_string_pretty(&jobs)?);
    Ok(())
}

fn write_report(db: &Database, job_id: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let report = error_report_csv(db, job_id)?;
    match output {
        Some(path) => {
            std::fs::write(path, report)
                .with_context(|| format!("writing report to {}", path.display()))?;
            info!("Wrote error report for job {} to {}", job_id, path.display());
        }
        None => print!("{}", report),
    }
    Ok(())
}
