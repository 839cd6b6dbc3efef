//! Handlers for the `/jobs` resource.

use atrium_core::error::CoreError;
use atrium_core::types::DbId;
use atrium_db::models::job::{CreateJob, Job, JobFilter, JobListQuery};
use atrium_db::models::status::JobStatus;
use atrium_db::repositories::JobRepo;
use atrium_events::JobEvent;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::response;
use crate::state::AppState;

/// A job row with its status spelled out.
#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    pub status: Option<JobStatus>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        let status = job.status();
        Self { job, status }
    }
}

async fn find_job(pool: &sqlx::PgPool, job_id: DbId) -> AppResult<Job> {
    JobRepo::find_by_id(pool, job_id)
        .await?
        .ok_or(AppError::Core(CoreError::JobNotFound(job_id)))
}

/// Conflict error describing the status the job is in now.
async fn transition_conflict(
    pool: &sqlx::PgPool,
    job_id: DbId,
    action: &'static str,
) -> AppResult<AppError> {
    let current = find_job(pool, job_id).await?;
    let status = current
        .status()
        .map(JobStatus::name)
        .unwrap_or("unknown")
        .to_string();
    Ok(AppError::Core(CoreError::InvalidTransition {
        job_id,
        action,
        status,
    }))
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Submit a new job. Returns 201 with the created job, which starts
/// `pending` and is picked up by the dispatcher.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(input): Json<CreateJob>,
) -> AppResult<impl IntoResponse> {
    let job_type = input.validate()?;
    let job = JobRepo::create(&state.pool, &input).await?;

    tracing::info!(job_id = job.id, job_type = %job_type, "Job submitted");

    Ok(response::created(JobView::from(job)))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// Newest first. Supports `status`, `job_type`, `limit` and `offset`.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let filter = JobFilter::try_from(params)?;
    let jobs: Vec<JobView> = JobRepo::list(&state.pool, &filter)
        .await?
        .into_iter()
        .map(JobView::from)
        .collect();

    Ok(response::ok(jobs))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = find_job(&state.pool, job_id).await?;
    Ok(response::ok(JobView::from(job)))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// Cancel a pending or running job. Returns 204 on success, 409 if the job
/// is already in a terminal state. A running worker is stopped; its late
/// report is discarded by the dispatcher.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    find_job(&state.pool, job_id).await?;

    if !JobRepo::cancel(&state.pool, job_id).await? {
        return Err(transition_conflict(&state.pool, job_id, "cancelled").await?);
    }

    // The row may have been claimed after it was read, so the pool is always
    // asked to stop the job.
    if !state.workers.cancel(&job_id.to_string()).await {
        tracing::debug!(job_id, "Cancelled job had no worker in flight");
    }

    state.event_bus.publish(JobEvent::cancelled(job_id));
    tracing::info!(job_id, "Job cancelled");

    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/retry
///
/// Create a new pending job from a failed or cancelled job's type and
/// payload, linked through `retry_of_job_id`. There is no automatic retry.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let original = find_job(&state.pool, job_id).await?;

    let retryable = matches!(
        original.status(),
        Some(JobStatus::Failed) | Some(JobStatus::Cancelled)
    );
    if !retryable {
        return Err(AppError::BadRequest(
            "Only failed or cancelled jobs can be retried".into(),
        ));
    }

    let Some(new_job) = JobRepo::retry(&state.pool, job_id).await? else {
        return Err(transition_conflict(&state.pool, job_id, "retried").await?);
    };

    tracing::info!(
        original_job_id = job_id,
        new_job_id = new_job.id,
        "Job retried",
    );

    Ok(response::created(JobView::from(new_job)))
}
