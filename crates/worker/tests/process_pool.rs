//! The worker pool driving real `atrium-worker` child processes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use atrium_core::job::{JobDescriptor, JobType};
use atrium_worker::config::{WorkerMode, WorkerPoolConfig};
use atrium_worker::launcher::ProcessLauncher;
use atrium_worker::{JobOutcome, OutcomeKind, PoolEvent, WorkerPool};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;

const WORKER: &str = env!("CARGO_BIN_EXE_atrium-worker");

fn process_config(
    worker_bin: impl Into<PathBuf>,
    job_timeout: Duration,
    output: &TempDir,
) -> WorkerPoolConfig {
    WorkerPoolConfig {
        concurrency: 2,
        job_timeout,
        mode: WorkerMode::Process,
        worker_bin: worker_bin.into(),
        output_dir: output.path().to_path_buf(),
        database_url: None,
    }
}

fn process_pool(config: &WorkerPoolConfig) -> (WorkerPool, mpsc::UnboundedReceiver<PoolEvent>) {
    WorkerPool::new(
        Arc::new(ProcessLauncher::new(config)),
        config.concurrency,
        config.job_timeout,
    )
}

async fn run_one(
    pool: &WorkerPool,
    rx: &mut mpsc::UnboundedReceiver<PoolEvent>,
    descriptor: JobDescriptor,
) -> (Vec<i16>, JobOutcome) {
    let permit = pool.try_acquire().expect("free slot");
    let worker_id = pool.next_worker_id();
    pool.dispatch(permit, descriptor, worker_id).await.unwrap();

    let mut progress = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("no pool event within 30s")
            .expect("pool event channel closed");
        match event {
            PoolEvent::Progress(update) => progress.push(update.percent),
            PoolEvent::Finished(outcome) => return (progress, outcome),
        }
    }
}

#[tokio::test]
async fn generic_job_succeeds_in_a_child_process() {
    let output = tempfile::tempdir().unwrap();
    let config = process_config(WORKER, Duration::from_secs(30), &output);
    let (pool, mut rx) = process_pool(&config);

    let descriptor = JobDescriptor::new("78", JobType::Generic, json!({"n": 3}));
    let (_, outcome) = run_one(&pool, &mut rx, descriptor).await;

    assert_eq!(outcome.job_id, "78");
    assert_matches!(outcome.kind, OutcomeKind::Succeeded(data) => {
        assert_eq!(data["jobId"], "78");
        assert_eq!(data["payload"]["n"], 3);
    });
    assert_eq!(pool.available_slots(), 2);
}

#[tokio::test]
async fn child_progress_arrives_before_the_outcome() {
    let output = tempfile::tempdir().unwrap();
    let config = process_config(WORKER, Duration::from_secs(30), &output);
    let (pool, mut rx) = process_pool(&config);

    let descriptor =
        JobDescriptor::new("79", JobType::FineTuning, json!({"epochs": 3, "step_ms": 1}));
    let (progress, outcome) = run_one(&pool, &mut rx, descriptor).await;

    assert_matches!(outcome.kind, OutcomeKind::Succeeded(_));
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "got: {progress:?}");
}

#[tokio::test]
async fn slow_child_is_killed_at_the_timeout() {
    let output = tempfile::tempdir().unwrap();
    let config = process_config(WORKER, Duration::from_secs(1), &output);
    let (pool, mut rx) = process_pool(&config);

    let descriptor =
        JobDescriptor::new("77", JobType::FineTuning, json!({"epochs": 50, "step_ms": 1000}));
    let (_, outcome) = run_one(&pool, &mut rx, descriptor).await;

    assert_eq!(outcome.kind, OutcomeKind::TimedOut(Duration::from_secs(1)));
    assert!(outcome.elapsed < Duration::from_secs(10), "took {:?}", outcome.elapsed);
    assert_eq!(pool.available_slots(), 2);
    assert!(!pool.is_running("77").await);
}

#[cfg(unix)]
#[tokio::test]
async fn child_exiting_without_a_result_is_a_crash() {
    let output = tempfile::tempdir().unwrap();
    let config = process_config("/bin/true", Duration::from_secs(30), &output);
    let (pool, mut rx) = process_pool(&config);

    let descriptor = JobDescriptor::new("80", JobType::Generic, json!({}));
    let (_, outcome) = run_one(&pool, &mut rx, descriptor).await;

    assert_matches!(outcome.kind, OutcomeKind::Crashed(reason) => {
        assert!(reason.contains("without reporting a result"), "got: {reason}");
    });
    assert_eq!(pool.available_slots(), 2);
}

#[tokio::test]
async fn missing_worker_binary_fails_to_spawn() {
    let output = tempfile::tempdir().unwrap();
    let missing = output.path().join("no-such-worker");
    let config = process_config(missing, Duration::from_secs(30), &output);
    let (pool, mut rx) = process_pool(&config);

    let descriptor = JobDescriptor::new("81", JobType::Generic, json!({}));
    let (_, outcome) = run_one(&pool, &mut rx, descriptor).await;

    assert_matches!(outcome.kind, OutcomeKind::SpawnFailed(reason) => {
        assert!(reason.contains("no-such-worker"), "got: {reason}");
    });
}
