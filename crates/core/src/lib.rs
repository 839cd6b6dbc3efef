//! Domain types shared by the job store, the worker and the API server.
//!
//! This crate has no internal dependencies and no I/O: everything here is
//! plain data, validation and (de)serialization.

pub mod error;
pub mod job;
pub mod job_events;
pub mod types;
