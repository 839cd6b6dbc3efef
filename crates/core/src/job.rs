//! Job protocol shared by the dispatcher and its workers.
//!
//! A worker receives a [`JobDescriptor`] (through environment variables when
//! it runs as a child process, or directly when it runs in-process), may
//! emit any number of [`ProgressUpdate`]s, and finishes with exactly one
//! [`WorkerMessage`]. On the process transport each report is one JSON
//! object per stdout line.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Environment contract
// ---------------------------------------------------------------------------

/// Job identifier handed to a worker process.
pub const ENV_JOB_ID: &str = "JOB_ID";

/// Job type name handed to a worker process.
pub const ENV_JOB_TYPE: &str = "JOB_TYPE";

/// JSON-encoded job payload handed to a worker process.
pub const ENV_JOB_PAYLOAD: &str = "JOB_PAYLOAD";

/// Pool slot label of the worker process.
pub const ENV_WORKER_ID: &str = "WORKER_ID";

/// Directory where backup and extract jobs write their files.
pub const ENV_JOB_OUTPUT_DIR: &str = "JOB_OUTPUT_DIR";

/// Worker label used when `WORKER_ID` is not set.
pub const DEFAULT_WORKER_ID: &str = "worker-0";

/// Maximum length of a PostgreSQL identifier.
const MAX_IDENTIFIER_LEN: usize = 63;

// ---------------------------------------------------------------------------
// Job type
// ---------------------------------------------------------------------------

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    Default,
    Backup,
    Extract,
    FineTuning,
    Generic,
}

impl JobType {
    /// Every job type, in declaration order.
    pub const ALL: [JobType; 5] = [
        JobType::Default,
        JobType::Backup,
        JobType::Extract,
        JobType::FineTuning,
        JobType::Generic,
    ];

    /// Wire name stored in `jobs.job_type` and passed as `JOB_TYPE`.
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Default => "default",
            JobType::Backup => "backup",
            JobType::Extract => "extract",
            JobType::FineTuning => "fine-tuning",
            JobType::Generic => "generic",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = JobType::ALL.iter().map(|t| t.as_str()).collect();
                CoreError::Validation(format!(
                    "Unknown job type '{s}' (expected one of: {})",
                    known.join(", ")
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Worker input
// ---------------------------------------------------------------------------

/// Everything a worker needs to execute one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub job_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub payload: serde_json::Value,
}

impl JobDescriptor {
    pub fn new(job_id: impl Into<String>, job_type: JobType, payload: serde_json::Value) -> Self {
        Self {
            job_id: job_id.into(),
            job_type,
            payload,
        }
    }

    /// Environment variables that carry this descriptor to a child process.
    pub fn to_env(&self, worker_id: &str) -> Vec<(&'static str, String)> {
        vec![
            (ENV_JOB_ID, self.job_id.clone()),
            (ENV_JOB_TYPE, self.job_type.as_str().to_string()),
            (ENV_JOB_PAYLOAD, self.payload.to_string()),
            (ENV_WORKER_ID, worker_id.to_string()),
        ]
    }
}

/// Returned when a required worker variable is absent or empty.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Missing required environment variable {0}")]
pub struct MissingEnv(pub &'static str);

/// Raw, unvalidated worker input as read from the environment.
///
/// Splitting the raw read from validation lets a worker that was given a
/// job id but a bad type or payload still report a failure for that id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInput {
    pub job_id: String,
    pub job_type: String,
    pub payload: Option<String>,
    pub worker_id: String,
}

impl WorkerInput {
    /// Read the input through `lookup` (usually `std::env::var(..).ok()`).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MissingEnv>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(MissingEnv(name))
        };

        Ok(Self {
            job_id: required(ENV_JOB_ID)?,
            job_type: required(ENV_JOB_TYPE)?,
            payload: lookup(ENV_JOB_PAYLOAD).filter(|v| !v.trim().is_empty()),
            worker_id: lookup(ENV_WORKER_ID)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_WORKER_ID.to_string()),
        })
    }

    /// Validate the job type and decode the payload. A missing payload
    /// decodes to an empty object.
    pub fn into_descriptor(self) -> Result<JobDescriptor, CoreError> {
        let job_type: JobType = self.job_type.parse()?;
        let payload = match self.payload {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                CoreError::Validation(format!("{ENV_JOB_PAYLOAD} is not valid JSON: {e}"))
            })?,
            None => serde_json::Value::Object(Default::default()),
        };
        Ok(JobDescriptor::new(self.job_id, job_type, payload))
    }
}

// ---------------------------------------------------------------------------
// Worker output
// ---------------------------------------------------------------------------

/// The single terminal report a worker emits for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerMessage {
    pub success: bool,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerMessage {
    pub fn succeeded(job_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            job_id: job_id.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(job_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            job_id: job_id.into(),
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Non-terminal progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub job_id: String,
    /// Clamped to `0..=100` by [`ProgressUpdate::new`].
    pub percent: i16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressUpdate {
    pub fn new(job_id: impl Into<String>, percent: i16, message: Option<String>) -> Self {
        Self {
            job_id: job_id.into(),
            percent: percent.clamp(0, 100),
            message,
        }
    }
}

/// Any line a worker may write to its report channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerReport {
    /// Tried first: a terminal message has no `percent` field.
    Progress(ProgressUpdate),
    Terminal(WorkerMessage),
}

impl WorkerReport {
    /// Parse one report line. Returns `None` for blank or non-report lines.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        serde_json::from_str(line).ok()
    }

    /// Encode as a single line without the trailing newline.
    pub fn to_line(&self) -> String {
        // Serializing these plain structs cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn job_id(&self) -> &str {
        match self {
            WorkerReport::Progress(p) => &p.job_id,
            WorkerReport::Terminal(m) => &m.job_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Validate a table name before it is interpolated into SQL.
///
/// Rules:
/// - Must start with an ASCII letter or underscore.
/// - Remaining characters must be ASCII alphanumeric or underscore.
/// - Must not exceed 63 characters.
pub fn validate_identifier(name: &str) -> Result<(), CoreError> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid_head || !valid_tail || name.len() > MAX_IDENTIFIER_LEN {
        return Err(CoreError::Validation(format!(
            "'{name}' is not a valid table name"
        )));
    }
    Ok(())
}

/// Build an output file name qualified by job id and timestamp, e.g.
/// `users-42-20240101T120000123Z.jsonl`.
///
/// Characters of `prefix` and `job_id` that are unsafe in file names are
/// replaced with `_`.
pub fn output_file_name(prefix: &str, job_id: &str, at: Timestamp, extension: &str) -> String {
    format!(
        "{}-{}-{}.{extension}",
        file_safe(prefix),
        file_safe(job_id),
        at.format("%Y%m%dT%H%M%S%3fZ")
    )
}

fn file_safe(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
