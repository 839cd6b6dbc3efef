use atrium_core::error::CoreError;

/// Failure while executing a job inside a worker.
///
/// The `Display` text becomes the `error` of the job's terminal message.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The payload does not have the shape the job type expects.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// A table-reading job ran without a database connection.
    #[error("No table source available; set DATABASE_URL for the worker")]
    NoTableSource,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
