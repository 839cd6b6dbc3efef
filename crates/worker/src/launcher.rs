//! Ways of running one worker for one job.
//!
//! A launcher resolves once the worker has finished. Dropping the returned
//! future stops the worker: the child process is killed, or the task is
//! aborted. The pool relies on this for timeouts and cancellation.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use atrium_core::job::{
    JobDescriptor, ProgressUpdate, WorkerMessage, WorkerReport, ENV_JOB_OUTPUT_DIR,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::task::AbortOnDropHandle;

use crate::config::{WorkerMode, WorkerPoolConfig};
use crate::runner::{run_job, JobContext};
use crate::source::{PgTableSource, TableSource};

/// How a launch ended.
#[derive(Debug, Clone)]
pub enum LaunchResult {
    /// The worker produced its terminal message.
    Reported(WorkerMessage),
    /// The worker ended without a usable terminal message.
    Crashed(String),
    /// The worker could not be started.
    SpawnFailed(String),
}

/// Starts a worker for a job and waits for its terminal message.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(
        &self,
        descriptor: &JobDescriptor,
        worker_id: &str,
        progress: mpsc::UnboundedSender<ProgressUpdate>,
    ) -> LaunchResult;
}

/// Build the launcher selected by `config.mode`.
pub fn from_config(config: &WorkerPoolConfig, db: &atrium_db::DbPool) -> Arc<dyn WorkerLauncher> {
    match config.mode {
        WorkerMode::Process => Arc::new(ProcessLauncher::new(config)),
        WorkerMode::Inline => Arc::new(
            InlineLauncher::new(config.output_dir.clone())
                .with_source(Arc::new(PgTableSource::new(db.clone()))),
        ),
    }
}

// ---------------------------------------------------------------------------
// Child process
// ---------------------------------------------------------------------------

/// Runs each job in its own `atrium-worker` child process.
///
/// The job is passed through environment variables; reports come back as
/// JSON lines on the child's stdout. The child's stderr is inherited so its
/// logs land next to the dispatcher's.
pub struct ProcessLauncher {
    worker_bin: PathBuf,
    output_dir: PathBuf,
    database_url: Option<String>,
}

impl ProcessLauncher {
    pub fn new(config: &WorkerPoolConfig) -> Self {
        Self {
            worker_bin: config.worker_bin.clone(),
            output_dir: config.output_dir.clone(),
            database_url: config.database_url.clone(),
        }
    }

    fn command(&self, descriptor: &JobDescriptor, worker_id: &str) -> Command {
        let mut cmd = Command::new(&self.worker_bin);
        cmd.envs(descriptor.to_env(worker_id))
            .env(ENV_JOB_OUTPUT_DIR, &self.output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        match &self.database_url {
            Some(url) => cmd.env("DATABASE_URL", url),
            None => cmd.env_remove("DATABASE_URL"),
        };
        cmd
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(
        &self,
        descriptor: &JobDescriptor,
        worker_id: &str,
        progress: mpsc::UnboundedSender<ProgressUpdate>,
    ) -> LaunchResult {
        let mut child = match self.command(descriptor, worker_id).spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(
                    job_id = %descriptor.job_id,
                    bin = %self.worker_bin.display(),
                    error = %e,
                    "Failed to spawn worker",
                );
                return LaunchResult::SpawnFailed(format!(
                    "failed to spawn {}: {e}",
                    self.worker_bin.display()
                ));
            }
        };

        let Some(stdout) = child.stdout.take() else {
            return LaunchResult::Crashed("worker stdout was not captured".into());
        };
        let mut lines = BufReader::new(stdout).lines();
        let mut terminal: Option<WorkerMessage> = None;

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match WorkerReport::parse_line(&line) {
                    Some(report) if report.job_id() != descriptor.job_id => {
                        tracing::warn!(
                            job_id = %descriptor.job_id,
                            reported = %report.job_id(),
                            "Ignoring report for another job",
                        );
                    }
                    Some(WorkerReport::Progress(update)) => {
                        let _ = progress.send(update);
                    }
                    Some(WorkerReport::Terminal(msg)) => {
                        if terminal.is_none() {
                            terminal = Some(msg);
                        } else {
                            tracing::warn!(job_id = %descriptor.job_id, "Ignoring extra terminal message");
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => {
                        tracing::warn!(job_id = %descriptor.job_id, line = %line, "Unparseable worker output");
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(job_id = %descriptor.job_id, error = %e, "Failed to read worker output");
                    break;
                }
            }
        }

        let status = child.wait().await;
        match (terminal, status) {
            (Some(msg), _) => LaunchResult::Reported(msg),
            (None, Ok(status)) => LaunchResult::Crashed(format!(
                "worker exited ({status}) without reporting a result"
            )),
            (None, Err(e)) => LaunchResult::Crashed(format!("failed to wait for worker: {e}")),
        }
    }
}

// ---------------------------------------------------------------------------
// In-process task
// ---------------------------------------------------------------------------

/// Runs each job as a Tokio task in the current process.
pub struct InlineLauncher {
    output_dir: PathBuf,
    source: Option<Arc<dyn TableSource>>,
}

impl InlineLauncher {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn TableSource>) -> Self {
        self.source = Some(source);
        self
    }
}

#[async_trait]
impl WorkerLauncher for InlineLauncher {
    async fn launch(
        &self,
        descriptor: &JobDescriptor,
        worker_id: &str,
        progress: mpsc::UnboundedSender<ProgressUpdate>,
    ) -> LaunchResult {
        let mut ctx = JobContext::new(worker_id, self.output_dir.clone());
        if let Some(source) = &self.source {
            ctx = ctx.with_source(Arc::clone(source));
        }
        let descriptor = descriptor.clone();

        let handle = AbortOnDropHandle::new(tokio::spawn(async move {
            run_job(&descriptor, &ctx, &progress).await
        }));

        match handle.await {
            Ok(msg) => LaunchResult::Reported(msg),
            Err(e) if e.is_panic() => LaunchResult::Crashed("worker task panicked".into()),
            Err(e) => LaunchResult::Crashed(format!("worker task failed: {e}")),
        }
    }
}
