//! Runs the `atrium-worker` binary the way the process launcher does.

use std::process::{Command, Output};

use atrium_core::job::WorkerReport;
use serde_json::Value;

const WORKER: &str = env!("CARGO_BIN_EXE_atrium-worker");

fn run_worker(vars: &[(&str, &str)], output_dir: &std::path::Path) -> Output {
    let mut cmd = Command::new(WORKER);
    cmd.env_clear()
        .env("JOB_OUTPUT_DIR", output_dir)
        .current_dir(output_dir);
    for (name, value) in vars {
        cmd.env(name, value);
    }
    cmd.output().expect("failed to run worker binary")
}

fn stdout_reports(output: &Output) -> Vec<WorkerReport> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| WorkerReport::parse_line(line).expect("unparseable stdout line"))
        .collect()
}

fn terminal(output: &Output) -> (bool, Value) {
    let line = String::from_utf8_lossy(&output.stdout)
        .lines()
        .last()
        .expect("worker wrote nothing")
        .to_string();
    let value: Value = serde_json::from_str(&line).unwrap();
    (value["success"].as_bool().unwrap(), value)
}

#[test]
fn missing_job_id_exits_without_a_message() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_worker(&[("JOB_TYPE", "backup")], dir.path());

    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
}

#[test]
fn missing_job_type_exits_without_a_message() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_worker(&[("JOB_ID", "1")], dir.path());

    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
}

#[test]
fn backup_job_reports_success() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_worker(
        &[
            ("JOB_ID", "backup-env-123"),
            ("JOB_TYPE", "backup"),
            ("JOB_PAYLOAD", r#"{"database":"test_db"}"#),
        ],
        dir.path(),
    );

    assert!(output.status.success());
    let (success, msg) = terminal(&output);
    assert!(success);
    assert_eq!(msg["jobId"], "backup-env-123");
    assert_eq!(msg["data"]["jobId"], "backup-env-123");
    assert_eq!(msg["data"]["type"], "backup");
    assert!(std::path::Path::new(msg["data"]["file"].as_str().unwrap()).exists());
}

#[test]
fn generic_job_echoes_payload() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_worker(
        &[
            ("JOB_ID", "g1"),
            ("JOB_TYPE", "generic"),
            ("JOB_PAYLOAD", r#"{"n":3}"#),
            ("WORKER_ID", "worker-9"),
        ],
        dir.path(),
    );

    assert!(output.status.success());
    let (success, msg) = terminal(&output);
    assert!(success);
    assert_eq!(msg["data"]["payload"]["n"], 3);
}

#[test]
fn unknown_type_reports_failure_for_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_worker(&[("JOB_ID", "u1"), ("JOB_TYPE", "teleport")], dir.path());

    assert_eq!(output.status.code(), Some(1));
    let (success, msg) = terminal(&output);
    assert!(!success);
    assert_eq!(msg["jobId"], "u1");
    assert!(msg["error"].as_str().unwrap().contains("teleport"));
    assert!(msg.get("data").is_none());
}

#[test]
fn malformed_payload_reports_failure() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_worker(
        &[("JOB_ID", "m1"), ("JOB_TYPE", "generic"), ("JOB_PAYLOAD", "{not json")],
        dir.path(),
    );

    assert_eq!(output.status.code(), Some(1));
    let (success, msg) = terminal(&output);
    assert!(!success);
    assert_eq!(msg["jobId"], "m1");
}

#[test]
fn extract_without_database_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_worker(
        &[
            ("JOB_ID", "e1"),
            ("JOB_TYPE", "extract"),
            ("JOB_PAYLOAD", r#"{"table":"users"}"#),
        ],
        dir.path(),
    );

    assert_eq!(output.status.code(), Some(1));
    let (success, msg) = terminal(&output);
    assert!(!success);
    assert!(msg["error"].as_str().unwrap().contains("DATABASE_URL"));
}

#[test]
fn fine_tuning_reports_progress_then_one_terminal_message() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_worker(
        &[
            ("JOB_ID", "ft1"),
            ("JOB_TYPE", "fine-tuning"),
            ("JOB_PAYLOAD", r#"{"epochs":3,"step_ms":1}"#),
        ],
        dir.path(),
    );

    assert!(output.status.success());
    let reports = stdout_reports(&output);
    assert_eq!(reports.len(), 4);
    assert!(reports.iter().all(|r| r.job_id() == "ft1"));
    let terminals = reports
        .iter()
        .filter(|r| matches!(r, WorkerReport::Terminal(_)))
        .count();
    assert_eq!(terminals, 1);
    assert!(matches!(reports.last(), Some(WorkerReport::Terminal(m)) if m.success));
}
