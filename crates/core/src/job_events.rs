//! WebSocket message type constants for background job events.
//!
//! Used by the dispatcher when publishing lifecycle events and by the API
//! when forwarding them to connected WebSocket clients.

/// Job claimed by a worker slot and started.
pub const MSG_TYPE_JOB_CLAIMED: &str = "job_claimed";

/// Progress update during job execution (percentage + message).
pub const MSG_TYPE_JOB_PROGRESS: &str = "job_progress";

/// Job completed successfully.
pub const MSG_TYPE_JOB_COMPLETED: &str = "job_completed";

/// Job failed, crashed, or timed out.
pub const MSG_TYPE_JOB_FAILED: &str = "job_failed";

/// Job was cancelled on request.
pub const MSG_TYPE_JOB_CANCELLED: &str = "job_cancelled";
