//! In-process job event bus.
//!
//! - [`EventBus`]: publish/subscribe hub backed by `tokio::sync::broadcast`.
//! - [`JobEvent`]: lifecycle event envelope forwarded to WebSocket clients.

pub mod bus;

pub use bus::{EventBus, JobEvent};
