//! HTTP front end of the job system: submit, inspect, cancel and retry jobs,
//! and stream their lifecycle events.
//!
//! The binary in `main.rs` also owns the dispatcher; this library holds the
//! pieces the integration tests build an app from.

pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
