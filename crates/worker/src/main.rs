//! `atrium-worker` -- runs exactly one job and exits.
//!
//! Spawned by the dispatcher's process launcher. Reads the job from the
//! environment, writes JSON report lines to stdout and logs to stderr.
//!
//! # Environment variables
//!
//! | Variable         | Required | Default     | Description                        |
//! |------------------|----------|-------------|------------------------------------|
//! | `JOB_ID`         | yes      | --          | Job identifier                     |
//! | `JOB_TYPE`       | yes      | --          | Job type name                      |
//! | `JOB_PAYLOAD`    | no       | `{}`        | JSON payload                       |
//! | `WORKER_ID`      | no       | `worker-0`  | Pool slot label                    |
//! | `DATABASE_URL`   | no       | --          | Needed by jobs that read tables    |
//! | `JOB_OUTPUT_DIR` | no       | `./backups` | Directory for output files         |
//!
//! # Exit status
//!
//! `0` after a success message, `1` after a failure message, `2` when
//! `JOB_ID` or `JOB_TYPE` is missing (nothing is written to stdout).

use std::process::ExitCode;
use std::sync::Arc;

use atrium_core::job::{WorkerInput, WorkerMessage, WorkerReport, ENV_JOB_OUTPUT_DIR};
use atrium_worker::config::DEFAULT_OUTPUT_DIR;
use atrium_worker::runner::{run_job, write_report, JobContext, StdoutProgress};
use atrium_worker::source::PgTableSource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atrium_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let input = match WorkerInput::from_lookup(|name| std::env::var(name).ok()) {
        Ok(input) => input,
        Err(e) => {
            tracing::error!(error = %e, "Worker started without a job");
            return ExitCode::from(2);
        }
    };

    let job_id = input.job_id.clone();
    let worker_id = input.worker_id.clone();

    let message = match input.into_descriptor() {
        Ok(descriptor) => {
            let output_dir =
                std::env::var(ENV_JOB_OUTPUT_DIR).unwrap_or_else(|_| DEFAULT_OUTPUT_DIR.into());
            let mut ctx = JobContext::new(&worker_id, output_dir);
            if let Ok(url) = std::env::var("DATABASE_URL") {
                match PgTableSource::connect_lazy(&url) {
                    Ok(source) => ctx = ctx.with_source(Arc::new(source)),
                    Err(e) => tracing::warn!(error = %e, "Invalid DATABASE_URL; table access disabled"),
                }
            }
            run_job(&descriptor, &ctx, &StdoutProgress).await
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Rejected job input");
            WorkerMessage::failed(&job_id, e.to_string())
        }
    };

    let success = message.success;
    if let Err(e) = write_report(&mut std::io::stdout().lock(), &WorkerReport::Terminal(message)) {
        tracing::error!(job_id = %job_id, error = %e, "Failed to write terminal message");
        return ExitCode::FAILURE;
    }

    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
