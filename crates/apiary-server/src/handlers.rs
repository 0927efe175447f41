//! Handler manifest: one handler per queue this host serves.

use apiary_jobs::{handler_fn, Handler, Job, JobError};
use serde_json::{json, Value};
use tracing::info;

/// Every `(queue, handler)` pair this host registers.
pub fn manifest() -> Vec<(&'static str, Handler)> {
    vec![("default", handler_fn(echo))]
}

/// Logs the payload and returns it with the attempt count.
async fn echo(job: Job) -> Result<Value, JobError> {
    info!(queue = %job.queue, job_id = %job.id, "Handling job #{}", job.id);
    Ok(json!({
        "echo": job.data,
        "attempt": job.attempts_made,
    }))
}
