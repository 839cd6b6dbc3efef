//! Job entity models and DTOs for the background job store.

use atrium_core::error::CoreError;
use atrium_core::job::{JobDescriptor, JobType};
use atrium_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::{JobStatus, StatusId};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    pub job_type: String,
    pub status_id: StatusId,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
    pub progress_percent: i16,
    pub progress_message: Option<String>,
    pub retry_of_job_id: Option<DbId>,
    pub claimed_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::from_id(self.status_id)
    }

    /// Build the worker input for this row.
    ///
    /// Fails only if the stored `job_type` is not a known type, which the
    /// table's check constraint already prevents.
    pub fn descriptor(&self) -> Result<JobDescriptor, CoreError> {
        let job_type: JobType = self.job_type.parse()?;
        Ok(JobDescriptor::new(
            self.id.to_string(),
            job_type,
            self.payload.clone(),
        ))
    }
}

/// DTO for submitting a new job via `POST /api/v1/jobs`.
///
/// `job_type` stays a plain string here so an unknown type surfaces as a
/// validation error instead of a body rejection.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJob {
    pub job_type: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

impl CreateJob {
    pub fn new(job_type: JobType, payload: serde_json::Value) -> Self {
        Self {
            job_type: job_type.as_str().to_string(),
            payload: Some(payload),
        }
    }

    /// Check the type name and that the payload, when present, is an object.
    pub fn validate(&self) -> Result<JobType, CoreError> {
        let job_type: JobType = self.job_type.parse()?;
        if let Some(payload) = &self.payload {
            if !payload.is_object() {
                return Err(CoreError::Validation(
                    "Job payload must be a JSON object".into(),
                ));
            }
        }
        Ok(job_type)
    }
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    /// Filter by status name (e.g. `pending`, `failed`).
    pub status: Option<String>,
    /// Filter by job type name.
    pub job_type: Option<JobType>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

/// Validated listing filter passed to [`JobRepo::list`](crate::repositories::JobRepo::list).
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TryFrom<JobListQuery> for JobFilter {
    type Error = CoreError;

    fn try_from(query: JobListQuery) -> Result<Self, Self::Error> {
        let status = query
            .status
            .as_deref()
            .map(|name| {
                JobStatus::from_name(name)
                    .ok_or_else(|| CoreError::Validation(format!("Unknown job status '{name}'")))
            })
            .transpose()?;

        Ok(Self {
            status,
            job_type: query.job_type,
            limit: query.limit,
            offset: query.offset,
        })
    }
}
