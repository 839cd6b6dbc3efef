use atrium_core::error::CoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Message shown in place of anything that must not leak to clients.
const SANITIZED_MESSAGE: &str = "An internal error occurred";

/// Error returned by every HTTP handler.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// No route matched the request path.
    #[error("Not found: {0}")]
    NotFound(String),
}

pub type AppResult<T> = Result<T, AppError>;

/// JSON body of every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl ErrorBody {
    fn new(code: &'static str, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }

    fn sanitized() -> Self {
        Self::new("INTERNAL_ERROR", SANITIZED_MESSAGE)
    }
}

impl AppError {
    fn status_and_body(&self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::Core(CoreError::JobNotFound(id)) => (
                StatusCode::NOT_FOUND,
                ErrorBody::new("NOT_FOUND", format!("Job {id} not found")),
            ),
            AppError::Core(CoreError::Validation(msg)) => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new("VALIDATION_ERROR", msg.as_str()),
            ),
            AppError::Core(err @ CoreError::InvalidTransition { .. }) => {
                (StatusCode::CONFLICT, ErrorBody::new("CONFLICT", err.to_string()))
            }
            AppError::Database(err) => database_error(err),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new("BAD_REQUEST", msg.as_str()),
            ),
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, ErrorBody::new("NOT_FOUND", msg.as_str()))
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

/// Map a sqlx error to a response.
///
/// Check violations (23514) come from the `jobs` constraints on type and
/// progress and are the caller's fault; everything else is logged and
/// sanitized.
fn database_error(err: &sqlx::Error) -> (StatusCode, ErrorBody) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            ErrorBody::new("NOT_FOUND", "Job not found"),
        ),
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23514") => {
            let constraint = db_err.constraint().unwrap_or("unknown");
            (
                StatusCode::BAD_REQUEST,
                ErrorBody::new(
                    "VALIDATION_ERROR",
                    format!("Value violates constraint: {constraint}"),
                ),
            )
        }
        other => {
            tracing::error!(error = %other, "Database error");
            (StatusCode::INTERNAL_SERVER_ERROR, ErrorBody::sanitized())
        }
    }
}
