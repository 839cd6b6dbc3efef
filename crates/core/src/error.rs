use crate::types::DbId;

/// Domain failures, independent of HTTP and storage.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Job {0} not found")]
    JobNotFound(DbId),

    /// Rejected input: unknown job type, malformed payload, bad identifier.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The job's current status does not allow the requested transition.
    #[error("Job {job_id} cannot be {action} while {status}")]
    InvalidTransition {
        job_id: DbId,
        action: &'static str,
        status: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_names_the_job_and_status() {
        let err = CoreError::InvalidTransition {
            job_id: 7,
            action: "cancelled",
            status: "completed".into(),
        };
        assert_eq!(err.to_string(), "Job 7 cannot be cancelled while completed");
    }
}
