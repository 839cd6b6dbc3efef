//! `extract`: dump one table's rows as JSON lines.

use atrium_core::job::{output_file_name, validate_identifier, JobDescriptor, ProgressUpdate};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::{parse_payload, write_new_file};
use crate::error::WorkerError;
use crate::runner::{JobContext, ProgressSink};

#[derive(Debug, Deserialize)]
struct ExtractPayload {
    table: String,
    limit: Option<i64>,
}

pub async fn run(
    descriptor: &JobDescriptor,
    ctx: &JobContext,
    progress: &dyn ProgressSink,
) -> Result<serde_json::Value, WorkerError> {
    let payload: ExtractPayload = parse_payload(&descriptor.payload)?;
    validate_identifier(&payload.table)?;
    if payload.limit.is_some_and(|n| n < 0) {
        return Err(WorkerError::InvalidPayload("limit must not be negative".into()));
    }

    let source = ctx.source.as_ref().ok_or(WorkerError::NoTableSource)?;
    let rows = source.fetch_rows(&payload.table, payload.limit).await?;
    progress.report(ProgressUpdate::new(
        &descriptor.job_id,
        50,
        Some(format!("fetched {} rows", rows.len())),
    ));

    let mut contents = Vec::new();
    for row in &rows {
        serde_json::to_writer(&mut contents, row)?;
        contents.push(b'\n');
    }

    let file_name = output_file_name(&payload.table, &descriptor.job_id, Utc::now(), "jsonl");
    let path = write_new_file(&ctx.output_dir, &file_name, &contents).await?;

    tracing::info!(
        job_id = %descriptor.job_id,
        table = %payload.table,
        rows = rows.len(),
        "Extract written",
    );

    Ok(json!({
        "jobId": descriptor.job_id,
        "type": descriptor.job_type.as_str(),
        "table": payload.table,
        "file": path.to_string_lossy(),
        "rows": rows.len(),
    }))
}
