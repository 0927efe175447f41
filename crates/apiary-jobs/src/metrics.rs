//! Prometheus metrics for queue monitoring.

use crate::backend::HealthSnapshot;
use crate::event::QueueEvent;
use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Metric names.
pub mod names {
    /// Total jobs completed successfully.
    pub const JOBS_SUCCEEDED_TOTAL: &str = "apiary_jobs_succeeded_total";
    /// Total jobs failed with no attempts left.
    pub const JOBS_FAILED_TOTAL: &str = "apiary_jobs_failed_total";
    /// Total job retries.
    pub const JOBS_RETRYING_TOTAL: &str = "apiary_jobs_retrying_total";
    /// Total stalled jobs detected.
    pub const JOBS_STALLED_TOTAL: &str = "apiary_jobs_stalled_total";
    /// Total broker-level errors.
    pub const QUEUE_ERRORS_TOTAL: &str = "apiary_queue_errors_total";
    /// Total failed health probes and stall sweeps.
    pub const HEALTH_PROBE_FAILURES_TOTAL: &str = "apiary_health_probe_failures_total";

    /// Jobs waiting.
    pub const QUEUE_WAITING: &str = "apiary_queue_waiting";
    /// Jobs active.
    pub const QUEUE_ACTIVE: &str = "apiary_queue_active";
    /// Jobs succeeded.
    pub const QUEUE_SUCCEEDED: &str = "apiary_queue_succeeded";
    /// Jobs failed.
    pub const QUEUE_FAILED: &str = "apiary_queue_failed";
    /// Jobs delayed.
    pub const QUEUE_DELAYED: &str = "apiary_queue_delayed";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        names::JOBS_SUCCEEDED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(
        names::JOBS_FAILED_TOTAL,
        "Total number of jobs that failed with no attempts left"
    );
    describe_counter!(
        names::JOBS_RETRYING_TOTAL,
        "Total number of job retries"
    );
    describe_counter!(
        names::JOBS_STALLED_TOTAL,
        "Total number of stalled jobs detected"
    );
    describe_counter!(
        names::QUEUE_ERRORS_TOTAL,
        "Total number of broker-level queue errors"
    );
    describe_counter!(
        names::HEALTH_PROBE_FAILURES_TOTAL,
        "Total number of failed health probes and stall sweeps"
    );

    describe_gauge!(names::QUEUE_WAITING, "Jobs waiting in the queue");
    describe_gauge!(names::QUEUE_ACTIVE, "Jobs currently claimed by a worker");
    describe_gauge!(names::QUEUE_SUCCEEDED, "Jobs recorded as succeeded");
    describe_gauge!(names::QUEUE_FAILED, "Jobs recorded as failed");
    describe_gauge!(names::QUEUE_DELAYED, "Jobs scheduled for later");
}

/// Count a lifecycle event.
pub fn record_event(queue: &str, event: &QueueEvent) {
    let name = match event {
        QueueEvent::Ready => return,
        QueueEvent::Error { .. } => names::QUEUE_ERRORS_TOTAL,
        QueueEvent::Succeeded { .. } => names::JOBS_SUCCEEDED_TOTAL,
        QueueEvent::Retrying { .. } => names::JOBS_RETRYING_TOTAL,
        QueueEvent::Failed { .. } => names::JOBS_FAILED_TOTAL,
        QueueEvent::Stalled { .. } => names::JOBS_STALLED_TOTAL,
    };
    counter!(name, "queue" => queue.to_string()).increment(1);
}

/// Publish a health snapshot as gauges.
pub fn record_snapshot(queue: &str, snapshot: &HealthSnapshot) {
    let queue = queue.to_string();
    gauge!(names::QUEUE_WAITING, "queue" => queue.clone()).set(snapshot.waiting as f64);
    gauge!(names::QUEUE_ACTIVE, "queue" => queue.clone()).set(snapshot.active as f64);
    gauge!(names::QUEUE_SUCCEEDED, "queue" => queue.clone()).set(snapshot.succeeded as f64);
    gauge!(names::QUEUE_FAILED, "queue" => queue.clone()).set(snapshot.failed as f64);
    gauge!(names::QUEUE_DELAYED, "queue" => queue).set(snapshot.delayed as f64);
}

/// Count a failed probe. `probe` is `health` or `stall`.
pub fn record_probe_failure(queue: &str, probe: &'static str) {
    counter!(
        names::HEALTH_PROBE_FAILURES_TOTAL,
        "queue" => queue.to_string(),
        "probe" => probe
    )
    .increment(1);
}
