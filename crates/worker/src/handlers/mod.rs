//! Per-type job handlers.
//!
//! Each handler returns the `data` object of a successful terminal message.
//! Every `data` object carries `jobId` and `type`.

pub mod backup;
pub mod extract;
pub mod fine_tuning;
pub mod generic;

use std::path::{Path, PathBuf};

use atrium_core::job::{JobDescriptor, JobType};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;

use crate::error::WorkerError;
use crate::runner::{JobContext, ProgressSink};

/// Dispatch `descriptor` to the handler for its type.
pub async fn execute(
    descriptor: &JobDescriptor,
    ctx: &JobContext,
    progress: &dyn ProgressSink,
) -> Result<serde_json::Value, WorkerError> {
    match descriptor.job_type {
        JobType::Backup => backup::run(descriptor, ctx, progress).await,
        JobType::Extract => extract::run(descriptor, ctx, progress).await,
        JobType::FineTuning => fine_tuning::run(descriptor, progress).await,
        JobType::Generic | JobType::Default => Ok(generic::run(descriptor)),
    }
}

/// Decode a job payload into the handler's payload type.
fn parse_payload<T: DeserializeOwned>(payload: &serde_json::Value) -> Result<T, WorkerError> {
    serde_json::from_value(payload.clone()).map_err(|e| WorkerError::InvalidPayload(e.to_string()))
}

/// Create `dir/file_name` and write `contents` to it.
///
/// Fails if the file already exists: output files are never overwritten.
async fn write_new_file(dir: &Path, file_name: &str, contents: &[u8]) -> Result<PathBuf, WorkerError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await?;
    file.write_all(contents).await?;
    file.flush().await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn write_new_file_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        write_new_file(dir.path(), "a.json", b"{}").await.unwrap();
        assert_matches!(
            write_new_file(dir.path(), "a.json", b"{}").await,
            Err(WorkerError::Io(_))
        );
    }

    #[tokio::test]
    async fn write_new_file_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let path = write_new_file(&nested, "x.jsonl", b"1\n").await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"1\n");
    }
}
