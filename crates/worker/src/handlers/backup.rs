//! `backup`: snapshot the requested tables of a database into one JSON file.

use atrium_core::job::{output_file_name, validate_identifier, JobDescriptor, ProgressUpdate};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map};

use super::{parse_payload, write_new_file};
use crate::error::WorkerError;
use crate::runner::{JobContext, ProgressSink};

#[derive(Debug, Deserialize)]
struct BackupPayload {
    database: String,
    #[serde(default)]
    tables: Vec<String>,
}

pub async fn run(
    descriptor: &JobDescriptor,
    ctx: &JobContext,
    progress: &dyn ProgressSink,
) -> Result<serde_json::Value, WorkerError> {
    let payload: BackupPayload = parse_payload(&descriptor.payload)?;
    if payload.database.trim().is_empty() {
        return Err(WorkerError::InvalidPayload("database must not be empty".into()));
    }
    for table in &payload.tables {
        validate_identifier(table)?;
    }

    let mut dumped = Map::new();
    let mut total_rows = 0usize;
    if !payload.tables.is_empty() {
        let source = ctx.source.as_ref().ok_or(WorkerError::NoTableSource)?;
        let count = payload.tables.len();
        for (i, table) in payload.tables.iter().enumerate() {
            let rows = source.fetch_rows(table, None).await?;
            total_rows += rows.len();
            dumped.insert(table.clone(), serde_json::Value::Array(rows));

            let percent = ((i + 1) * 100 / count) as i16;
            progress.report(ProgressUpdate::new(
                &descriptor.job_id,
                percent,
                Some(format!("table {}/{count}: {table}", i + 1)),
            ));
        }
    }

    let now = Utc::now();
    let file_name = output_file_name(
        &format!("backup-{}", payload.database),
        &descriptor.job_id,
        now,
        "json",
    );
    let document = json!({
        "manifest": {
            "jobId": descriptor.job_id,
            "database": payload.database,
            "workerId": ctx.worker_id,
            "createdAt": now,
            "tables": payload.tables,
        },
        "tables": dumped,
    });
    let path = write_new_file(&ctx.output_dir, &file_name, &serde_json::to_vec_pretty(&document)?).await?;

    tracing::info!(
        job_id = %descriptor.job_id,
        file = %path.display(),
        rows = total_rows,
        "Backup written",
    );

    Ok(json!({
        "jobId": descriptor.job_id,
        "type": descriptor.job_type.as_str(),
        "database": payload.database,
        "file": path.to_string_lossy(),
        "tables": payload.tables,
        "rows": total_rows,
    }))
}
