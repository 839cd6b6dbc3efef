//! Process configuration for the `atrium-api` binary.
//!
//! Everything is read from the environment once at start-up. A value that is
//! present but malformed aborts start-up with a message naming the variable.

use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use atrium_worker::config::{DispatcherConfig, WorkerPoolConfig};

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Origins allowed by CORS; `CORS_ORIGINS` is a comma-separated list.
    pub cors_origins: Vec<String>,
    /// Per-request limit; slower requests get 408.
    pub request_timeout: Duration,
    /// How long shutdown waits for the dispatcher to drain running jobs.
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `3000`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                    |
    pub fn from_env() -> Self {
        let host: IpAddr = env_or("HOST", "0.0.0.0");
        let port: u16 = env_or("PORT", "3000");
        let origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into());

        Self {
            bind_addr: SocketAddr::new(host, port),
            cors_origins: parse_origins(&origins),
            request_timeout: Duration::from_secs(env_or("REQUEST_TIMEOUT_SECS", "30")),
            shutdown_timeout: Duration::from_secs(env_or("SHUTDOWN_TIMEOUT_SECS", "30")),
        }
    }
}

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub server: ServerConfig,
    pub workers: WorkerPoolConfig,
    pub dispatcher: DispatcherConfig,
}

impl AppConfig {
    /// Load the full configuration. `DATABASE_URL` is required.
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let workers = WorkerPoolConfig::from_env();
        let dispatcher = DispatcherConfig::from_env(&workers);

        Self {
            database_url,
            server: ServerConfig::from_env(),
            workers,
            dispatcher,
        }
    }
}

/// Parse `key` from the environment, falling back to `default`.
fn env_or<T>(key: &str, default: &str) -> T
where
    T: FromStr,
    T::Err: Display,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse()
        .unwrap_or_else(|e| panic!("{key} has an invalid value '{raw}': {e}"))
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
