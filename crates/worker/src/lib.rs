//! Job execution: the worker runtime and the dispatcher that drives it.
//!
//! - [`runner`] / [`handlers`]: execute one job and produce exactly one
//!   terminal [`WorkerMessage`](atrium_core::job::WorkerMessage). Used by the
//!   `atrium-worker` binary and by the in-process launcher.
//! - [`launcher`]: run a worker as a child process or as a Tokio task.
//! - [`pool`]: bounded concurrency, per-job timeout and cancellation.
//! - [`dispatcher`]: claims pending rows, feeds the pool, and is the only
//!   writer of terminal job state.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod launcher;
pub mod pool;
pub mod runner;
pub mod source;

pub use dispatcher::JobDispatcher;
pub use error::WorkerError;
pub use pool::{JobOutcome, OutcomeKind, PoolEvent, WorkerPool};
