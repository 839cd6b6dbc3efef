use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    /// `ok`, or `degraded` when the database is unreachable.
    pub status: &'static str,
    pub version: &'static str,
    pub db_healthy: bool,
    pub jobs_in_flight: usize,
    pub worker_slots_free: usize,
}

/// GET /health
///
/// Always 200; the body says whether the database answers and how busy the
/// worker pool is.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthReport> {
    let db_healthy = atrium_db::health_check(&state.pool).await.is_ok();
    if !db_healthy {
        tracing::warn!("Health check: database unreachable");
    }

    Json(HealthReport {
        status: if db_healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
        jobs_in_flight: state.workers.in_flight_count().await,
        worker_slots_free: state.workers.available_slots(),
    })
}
