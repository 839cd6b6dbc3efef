//! Repository for the `jobs` table.
//!
//! Every status transition is a single guarded `UPDATE ... WHERE status_id =
//! <expected>` so a transition happens at most once and a late or duplicate
//! report cannot move a job out of a terminal state. Callers get `true` when
//! the row actually changed.

use atrium_core::types::{DbId, Timestamp};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::models::job::{CreateJob, Job, JobFilter};
use crate::models::status::JobStatus;

const COLUMNS: &str = "\
    id, job_type, status_id, payload, result, error_message, worker_id, \
    progress_percent, progress_message, retry_of_job_id, \
    claimed_at, finished_at, created_at, updated_at";

/// Page size bounds for [`JobRepo::list`].
const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 100;

/// Provides CRUD operations and lifecycle transitions for background jobs.
pub struct JobRepo;

impl JobRepo {
    /// Create a new pending job.
    ///
    /// The type is stored as given; callers validate it first with
    /// [`CreateJob::validate`].
    pub async fn create(pool: &PgPool, input: &CreateJob) -> Result<Job, sqlx::Error> {
        let payload = input
            .payload
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));

        let query = format!(
            "INSERT INTO jobs (job_type, status_id, payload) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(&input.job_type)
            .bind(JobStatus::Pending.id())
            .bind(payload)
            .fetch_one(pool)
            .await
    }

    /// Move a specific pending job to running on behalf of `worker_id`.
    ///
    /// Returns `false` if the job does not exist or is no longer pending.
    pub async fn mark_running(
        pool: &PgPool,
        job_id: DbId,
        worker_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = $2, worker_id = $3, claimed_at = NOW() \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(job_id)
        .bind(JobStatus::Running.id())
        .bind(worker_id)
        .bind(JobStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically claim the oldest pending job and mark it running.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent dispatchers never
    /// claim the same row.
    pub async fn claim_next(pool: &PgPool, worker_id: &str) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, worker_id = $1, claimed_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE status_id = $3 \
                 ORDER BY created_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             AND status_id = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(worker_id)
            .bind(JobStatus::Running.id())
            .bind(JobStatus::Pending.id())
            .fetch_optional(pool)
            .await
    }

    /// Record a progress report for a running job.
    pub async fn update_progress(
        pool: &PgPool,
        job_id: DbId,
        percent: i16,
        message: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET progress_percent = $2, progress_message = $3 \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(job_id)
        .bind(percent.clamp(0, 100))
        .bind(message)
        .bind(JobStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a running job as completed with its result payload.
    pub async fn mark_completed(
        pool: &PgPool,
        job_id: DbId,
        result: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let outcome = sqlx::query(
            "UPDATE jobs \
             SET status_id = $2, result = $3, error_message = NULL, \
                 progress_percent = 100, finished_at = NOW() \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(job_id)
        .bind(JobStatus::Completed.id())
        .bind(result)
        .bind(JobStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }

    /// Mark a running job as failed with an error message.
    ///
    /// No automatic retry is performed; see [`JobRepo::retry`].
    pub async fn mark_failed(pool: &PgPool, job_id: DbId, error: &str) -> Result<bool, sqlx::Error> {
        let outcome = sqlx::query(
            "UPDATE jobs \
             SET status_id = $2, error_message = $3, finished_at = NOW() \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(job_id)
        .bind(JobStatus::Failed.id())
        .bind(error)
        .bind(JobStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }

    /// Cancel a pending or running job.
    ///
    /// Returns `false` if the job is already completed, failed, or cancelled.
    pub async fn cancel(pool: &PgPool, job_id: DbId) -> Result<bool, sqlx::Error> {
        let outcome = sqlx::query(
            "UPDATE jobs \
             SET status_id = $2, finished_at = NOW() \
             WHERE id = $1 AND status_id IN ($3, $4)",
        )
        .bind(job_id)
        .bind(JobStatus::Cancelled.id())
        .bind(JobStatus::Pending.id())
        .bind(JobStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }

    /// Create a new pending job from a failed or cancelled job's type and
    /// payload, linked through `retry_of_job_id`.
    ///
    /// Returns `None` if the original does not exist or is not retryable.
    /// This is the only way a job is ever re-run.
    pub async fn retry(pool: &PgPool, job_id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (job_type, status_id, payload, retry_of_job_id) \
             SELECT job_type, $2, payload, id FROM jobs \
             WHERE id = $1 AND status_id IN ($3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(JobStatus::Pending.id())
            .bind(JobStatus::Failed.id())
            .bind(JobStatus::Cancelled.id())
            .fetch_optional(pool)
            .await
    }

    /// Fail every job that has been running since before `claimed_before`,
    /// except those listed in `live`.
    ///
    /// The dispatcher sweeps with this at start-up and then periodically,
    /// passing the jobs its own pool is still running, so a row whose worker
    /// died with an earlier dispatcher cannot stay `running` forever.
    pub async fn fail_orphaned(
        pool: &PgPool,
        claimed_before: Timestamp,
        live: &[DbId],
        error: &str,
    ) -> Result<u64, sqlx::Error> {
        let outcome = sqlx::query(
            "UPDATE jobs \
             SET status_id = $2, error_message = $3, finished_at = NOW() \
             WHERE status_id = $4 AND claimed_at < $1 AND id <> ALL($5)",
        )
        .bind(claimed_before)
        .bind(JobStatus::Failed.id())
        .bind(error)
        .bind(JobStatus::Running.id())
        .bind(live)
        .execute(pool)
        .await?;
        Ok(outcome.rows_affected())
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List jobs, newest first, with optional status and type filters.
    ///
    /// Page size is clamped to `1..=MAX_LIMIT`; a negative offset is 0.
    pub async fn list(pool: &PgPool, filter: &JobFilter) -> Result<Vec<Job>, sqlx::Error> {
        let limit = filter.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = filter.offset.unwrap_or(0).max(0);

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM jobs WHERE TRUE"));
        if let Some(status) = filter.status {
            qb.push(" AND status_id = ").push_bind(status.id());
        }
        if let Some(job_type) = filter.job_type {
            qb.push(" AND job_type = ").push_bind(job_type.as_str());
        }
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        qb.build_query_as::<Job>().fetch_all(pool).await
    }
}
