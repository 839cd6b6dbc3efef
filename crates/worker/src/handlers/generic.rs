//! Generic and default jobs: no work beyond acknowledging the payload.

use atrium_core::job::JobDescriptor;
use serde_json::json;

pub fn run(descriptor: &JobDescriptor) -> serde_json::Value {
    json!({
        "jobId": descriptor.job_id,
        "type": descriptor.job_type.as_str(),
        "payload": descriptor.payload,
    })
}
