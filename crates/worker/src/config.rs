use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use atrium_core::error::CoreError;
use atrium_core::job::ENV_JOB_OUTPUT_DIR;

/// File name of the worker executable, without platform suffix.
pub const WORKER_BIN_NAME: &str = "atrium-worker";

/// Output directory used when `JOB_OUTPUT_DIR` is not set.
pub const DEFAULT_OUTPUT_DIR: &str = "./backups";

/// How a job is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// One `atrium-worker` child process per job.
    Process,
    /// One Tokio task per job inside the dispatcher's process.
    Inline,
}

impl FromStr for WorkerMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "process" => Ok(WorkerMode::Process),
            "inline" => Ok(WorkerMode::Inline),
            other => Err(CoreError::Validation(format!(
                "Unknown worker mode '{other}' (expected 'process' or 'inline')"
            ))),
        }
    }
}

/// Worker pool configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Maximum number of jobs executing at once.
    pub concurrency: usize,
    /// Wall-clock limit per job; the worker is killed when it expires.
    pub job_timeout: Duration,
    pub mode: WorkerMode,
    /// Path of the worker executable (process mode only).
    pub worker_bin: PathBuf,
    /// Directory for backup and extract output files.
    pub output_dir: PathBuf,
    /// Forwarded to process workers so they can open their own pool.
    pub database_url: Option<String>,
}

impl WorkerPoolConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var              | Default                                      |
    /// |----------------------|----------------------------------------------|
    /// | `WORKER_CONCURRENCY` | `4`                                          |
    /// | `JOB_TIMEOUT_SECS`   | `300`                                        |
    /// | `WORKER_MODE`        | `process`                                    |
    /// | `WORKER_BIN`         | `atrium-worker` next to the current binary   |
    /// | `JOB_OUTPUT_DIR`     | `./backups`                                  |
    /// | `DATABASE_URL`       | unset                                        |
    pub fn from_env() -> Self {
        let concurrency: usize = std::env::var("WORKER_CONCURRENCY")
            .unwrap_or_else(|_| "4".into())
            .parse()
            .expect("WORKER_CONCURRENCY must be a valid usize");
        assert!(concurrency > 0, "WORKER_CONCURRENCY must be at least 1");

        let job_timeout_secs: u64 = std::env::var("JOB_TIMEOUT_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("JOB_TIMEOUT_SECS must be a valid u64");

        let mode: WorkerMode = std::env::var("WORKER_MODE")
            .unwrap_or_else(|_| "process".into())
            .parse()
            .unwrap_or_else(|e| panic!("{e}"));

        let worker_bin = std::env::var("WORKER_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_worker_bin());

        let output_dir = std::env::var(ENV_JOB_OUTPUT_DIR)
            .unwrap_or_else(|_| DEFAULT_OUTPUT_DIR.into())
            .into();

        Self {
            concurrency,
            job_timeout: Duration::from_secs(job_timeout_secs),
            mode,
            worker_bin,
            output_dir,
            database_url: std::env::var("DATABASE_URL").ok(),
        }
    }

    /// In-process configuration with no database forwarding.
    pub fn inline(concurrency: usize, job_timeout: Duration, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            concurrency: concurrency.max(1),
            job_timeout,
            mode: WorkerMode::Inline,
            worker_bin: default_worker_bin(),
            output_dir: output_dir.into(),
            database_url: None,
        }
    }
}

/// Dispatcher loop configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Delay between claim attempts.
    pub poll_interval: Duration,
    /// Running jobs claimed longer ago than this, and not running in this
    /// dispatcher's pool, are failed as orphans.
    pub orphan_grace: Duration,
    /// Delay between orphan sweeps after the one at start-up.
    pub orphan_sweep_interval: Duration,
}

impl DispatcherConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default              |
    /// |------------------------|----------------------|
    /// | `DISPATCH_INTERVAL_MS` | `1000`               |
    /// | `ORPHAN_GRACE_SECS`    | `JOB_TIMEOUT_SECS`   |
    /// | `ORPHAN_SWEEP_SECS`    | `60`                 |
    pub fn from_env(pool: &WorkerPoolConfig) -> Self {
        let poll_ms: u64 = std::env::var("DISPATCH_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("DISPATCH_INTERVAL_MS must be a valid u64");

        let orphan_grace = std::env::var("ORPHAN_GRACE_SECS")
            .ok()
            .map(|v| {
                v.parse::<u64>()
                    .expect("ORPHAN_GRACE_SECS must be a valid u64")
            })
            .map(Duration::from_secs)
            .unwrap_or(pool.job_timeout);

        let sweep_secs: u64 = std::env::var("ORPHAN_SWEEP_SECS")
            .unwrap_or_else(|_| "60".into())
            .parse()
            .expect("ORPHAN_SWEEP_SECS must be a valid u64");

        Self {
            poll_interval: Duration::from_millis(poll_ms.max(1)),
            orphan_grace,
            orphan_sweep_interval: Duration::from_secs(sweep_secs.max(1)),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            orphan_grace: Duration::from_secs(300),
            orphan_sweep_interval: Duration::from_secs(60),
        }
    }
}

/// `atrium-worker` in the directory of the running executable, falling back
/// to a bare name resolved through `PATH`.
fn default_worker_bin() -> PathBuf {
    let file_name = format!("{WORKER_BIN_NAME}{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)))
        .unwrap_or_else(|| PathBuf::from(file_name))
}
