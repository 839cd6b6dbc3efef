//! Job lifecycle events and the broadcast bus that carries them.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the dispatcher, which
//! publishes, and the API, which forwards events to WebSocket clients.

use atrium_core::job_events::{
    MSG_TYPE_JOB_CANCELLED, MSG_TYPE_JOB_CLAIMED, MSG_TYPE_JOB_COMPLETED, MSG_TYPE_JOB_FAILED,
    MSG_TYPE_JOB_PROGRESS,
};
use atrium_core::types::{DbId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// A job lifecycle event.
///
/// `event_type` is one of the `MSG_TYPE_JOB_*` constants and is serialized
/// as `type` so the value can be sent to clients as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub job_id: DbId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<i16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: Timestamp,
}

impl JobEvent {
    fn new(event_type: &str, job_id: DbId) -> Self {
        Self {
            event_type: event_type.to_string(),
            job_id,
            worker_id: None,
            percent: None,
            message: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn claimed(job_id: DbId, worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: Some(worker_id.into()),
            ..Self::new(MSG_TYPE_JOB_CLAIMED, job_id)
        }
    }

    pub fn progress(job_id: DbId, percent: i16, message: Option<String>) -> Self {
        Self {
            percent: Some(percent),
            message,
            ..Self::new(MSG_TYPE_JOB_PROGRESS, job_id)
        }
    }

    pub fn completed(job_id: DbId) -> Self {
        Self::new(MSG_TYPE_JOB_COMPLETED, job_id)
    }

    pub fn failed(job_id: DbId, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(MSG_TYPE_JOB_FAILED, job_id)
        }
    }

    pub fn cancelled(job_id: DbId) -> Self {
        Self::new(MSG_TYPE_JOB_CANCELLED, job_id)
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so any number of subscribers can
/// independently receive every published [`JobEvent`].
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed events are dropped and
    /// slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Events published with no subscribers are dropped.
    pub fn publish(&self, event: JobEvent) {
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
