//! Executes one job and turns its result into the terminal message.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use atrium_core::job::{JobDescriptor, ProgressUpdate, WorkerMessage, WorkerReport};
use tokio::sync::mpsc;

use crate::handlers;
use crate::source::TableSource;

/// Everything a handler may use besides its descriptor.
#[derive(Clone)]
pub struct JobContext {
    pub worker_id: String,
    pub output_dir: PathBuf,
    pub source: Option<Arc<dyn TableSource>>,
}

impl JobContext {
    pub fn new(worker_id: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            worker_id: worker_id.into(),
            output_dir: output_dir.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn TableSource>) -> Self {
        self.source = Some(source);
        self
    }
}

/// Receives non-terminal progress reports from a running handler.
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

impl ProgressSink for mpsc::UnboundedSender<ProgressUpdate> {
    fn report(&self, update: ProgressUpdate) {
        // The receiver is gone once the job has been cancelled or timed out.
        let _ = self.send(update);
    }
}

/// Drops every progress report.
pub struct DiscardProgress;

impl ProgressSink for DiscardProgress {
    fn report(&self, _update: ProgressUpdate) {}
}

/// Writes progress reports as JSON lines on stdout (process workers).
pub struct StdoutProgress;

impl ProgressSink for StdoutProgress {
    fn report(&self, update: ProgressUpdate) {
        if let Err(e) = write_report(&mut std::io::stdout().lock(), &WorkerReport::Progress(update)) {
            tracing::warn!(error = %e, "Failed to write progress report");
        }
    }
}

/// Write one report line and flush, so the parent sees it immediately.
pub fn write_report(out: &mut impl Write, report: &WorkerReport) -> std::io::Result<()> {
    writeln!(out, "{}", report.to_line())?;
    out.flush()
}

/// Run the handler for `descriptor` and produce its terminal message.
///
/// Always returns exactly one message carrying `descriptor.job_id`, whether
/// the handler succeeded or failed.
pub async fn run_job(
    descriptor: &JobDescriptor,
    ctx: &JobContext,
    progress: &dyn ProgressSink,
) -> WorkerMessage {
    tracing::info!(
        job_id = %descriptor.job_id,
        job_type = %descriptor.job_type,
        worker_id = %ctx.worker_id,
        "Job started",
    );

    match handlers::execute(descriptor, ctx, progress).await {
        Ok(data) => {
            tracing::info!(job_id = %descriptor.job_id, "Job completed");
            WorkerMessage::succeeded(&descriptor.job_id, data)
        }
        Err(e) => {
            tracing::warn!(job_id = %descriptor.job_id, error = %e, "Job failed");
            WorkerMessage::failed(&descriptor.job_id, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_core::job::JobType;
    use serde_json::json;

    #[tokio::test]
    async fn success_message_references_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = JobContext::new("worker-1", dir.path());
        let descriptor = JobDescriptor::new("abc", JobType::Generic, json!({"x": 1}));

        let msg = run_job(&descriptor, &ctx, &DiscardProgress).await;

        assert!(msg.success);
        assert_eq!(msg.job_id, "abc");
        assert!(msg.error.is_none());
    }

    #[tokio::test]
    async fn handler_error_becomes_failure_message() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = JobContext::new("worker-1", dir.path());
        // Extract without a table name.
        let descriptor = JobDescriptor::new("abc", JobType::Extract, json!({}));

        let msg = run_job(&descriptor, &ctx, &DiscardProgress).await;

        assert!(!msg.success);
        assert_eq!(msg.job_id, "abc");
        assert!(msg.data.is_none());
        assert!(msg.error.unwrap().contains("Invalid payload"));
    }

    #[test]
    fn reports_are_written_one_per_line() {
        let mut out = Vec::new();
        write_report(
            &mut out,
            &WorkerReport::Progress(ProgressUpdate::new("1", 50, None)),
        )
        .unwrap();
        write_report(
            &mut out,
            &WorkerReport::Terminal(WorkerMessage::succeeded("1", json!({}))),
        )
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(matches!(
            WorkerReport::parse_line(lines[1]),
            Some(WorkerReport::Terminal(_))
        ));
    }

    #[tokio::test]
    async fn channel_sink_forwards_updates() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.report(ProgressUpdate::new("1", 10, None));
        assert_eq!(rx.recv().await.unwrap().percent, 10);
    }
}
