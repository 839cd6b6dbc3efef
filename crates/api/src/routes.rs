//! URL layout of the server.
//!
//! ```text
//! GET  /health                     service, database and pool health
//!
//! GET  /api/v1/ws                  job event stream (WebSocket)
//! GET  /api/v1/jobs                list (status, job_type, limit, offset)
//! POST /api/v1/jobs                submit
//! GET  /api/v1/jobs/{id}           get
//! POST /api/v1/jobs/{id}/cancel    cancel a pending or running job
//! POST /api/v1/jobs/{id}/retry     re-submit a failed or cancelled job
//! ```

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{health, jobs};
use crate::state::AppState;
use crate::ws;

/// Root-level routes, outside the versioned API.
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health::health_check))
}

/// Routes mounted under `/api/v1`.
pub fn api_routes() -> Router<AppState> {
    let jobs = Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/retry", post(jobs::retry_job));

    Router::new()
        .route("/ws", get(ws::job_event_stream))
        .nest("/jobs", jobs)
}
