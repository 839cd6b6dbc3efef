//! `fine-tuning`: simulated training run that reports progress per epoch.

use std::time::Duration;

use atrium_core::job::{JobDescriptor, ProgressUpdate};
use serde::Deserialize;
use serde_json::json;

use super::parse_payload;
use crate::error::WorkerError;
use crate::runner::ProgressSink;

const DEFAULT_MODEL: &str = "base";
const DEFAULT_EPOCHS: u32 = 3;
const MAX_EPOCHS: u32 = 100;
const DEFAULT_STEP_MS: u64 = 200;

#[derive(Debug, Deserialize)]
struct FineTuningPayload {
    model: Option<String>,
    epochs: Option<u32>,
    step_ms: Option<u64>,
}

pub async fn run(
    descriptor: &JobDescriptor,
    progress: &dyn ProgressSink,
) -> Result<serde_json::Value, WorkerError> {
    let payload: FineTuningPayload = parse_payload(&descriptor.payload)?;
    let model = payload.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let epochs = payload.epochs.unwrap_or(DEFAULT_EPOCHS);
    if epochs == 0 || epochs > MAX_EPOCHS {
        return Err(WorkerError::InvalidPayload(format!(
            "epochs must be between 1 and {MAX_EPOCHS}"
        )));
    }
    let step = Duration::from_millis(payload.step_ms.unwrap_or(DEFAULT_STEP_MS));

    let mut loss = 1.0_f64;
    for epoch in 1..=epochs {
        tokio::time::sleep(step).await;
        loss = training_loss(epoch);

        let percent = (epoch * 100 / epochs) as i16;
        progress.report(ProgressUpdate::new(
            &descriptor.job_id,
            percent,
            Some(format!("epoch {epoch}/{epochs}")),
        ));
        tracing::debug!(job_id = %descriptor.job_id, epoch, loss, "Epoch finished");
    }

    Ok(json!({
        "jobId": descriptor.job_id,
        "type": descriptor.job_type.as_str(),
        "model": model,
        "epochs": epochs,
        "loss": loss,
    }))
}

/// Loss after `epoch`, decaying towards zero.
fn training_loss(epoch: u32) -> f64 {
    let raw = 1.0 / (1.0 + f64::from(epoch));
    (raw * 10_000.0).round() / 10_000.0
}
