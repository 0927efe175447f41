//! Event observer: turns queue lifecycle events into log lines.

use crate::backend::QueueBackend;
use crate::event::QueueEvent;
use crate::metrics;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

/// Logs every lifecycle event of one queue.
///
/// Observability only: nothing here influences job outcomes.
pub struct EventObserver;

impl EventObserver {
    /// Subscribe to `queue` and spawn the logging loop.
    ///
    /// The subscription is taken before this returns, so events emitted after
    /// the call are never missed.
    pub fn attach(queue: &dyn QueueBackend) -> JoinHandle<()> {
        let rx = queue.subscribe();
        let name = queue.name().to_string();
        let span = tracing::info_span!("observer", queue = %name);
        tokio::spawn(Self::run(name, rx).instrument(span))
    }

    async fn run(queue: String, mut rx: broadcast::Receiver<QueueEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    log_event(&queue, &event);
                    metrics::record_event(&queue, &event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(queue = %queue, skipped, "Event observer lagged, skipped events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

/// Write the log line for one event.
pub fn log_event(queue: &str, event: &QueueEvent) {
    match event {
        QueueEvent::Ready => {
            info!(queue = %queue, "Queue {} is ready", queue);
        }
        QueueEvent::Error { message } => {
            error!(queue = %queue, error = %message, "Queue {} received redis error: {}", queue, message);
        }
        QueueEvent::Succeeded { job, result } => {
            info!(
                queue = %queue,
                job_id = %job.id,
                result = %result,
                "Queue {} successfully completed job #{}",
                queue,
                job.id
            );
        }
        QueueEvent::Retrying { job, error } => {
            warn!(
                queue = %queue,
                job_id = %job.id,
                attempt = job.attempts_made,
                error = %error,
                "Queue {} is retrying job #{} after error: {}",
                queue,
                job.id,
                error
            );
        }
        QueueEvent::Failed { job, error } => {
            error!(
                queue = %queue,
                job_id = %job.id,
                attempt = job.attempts_made,
                error = %error,
                "Queue {} received error on job #{}: {}",
                queue,
                job.id,
                error
            );
        }
        QueueEvent::Stalled { job_id } => {
            warn!(queue = %queue, job_id = %job_id, "Queue {} detected stalled job #{}", queue, job_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::job::{Job, JobId, JobOptions};
    use crate::memory::MemoryBroker;
    use crate::backend::Broker;
    use serde_json::json;
    use std::sync::Arc;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_log_event_writes_one_line_per_kind() {
        let job = Arc::new(Job::new(JobId::from(1u64), "q", json!({}), JobOptions::default()));
        let events = [
            QueueEvent::Ready,
            QueueEvent::Error {
                message: "ECONNREFUSED".to_string(),
            },
            QueueEvent::Succeeded {
                job: job.clone(),
                result: json!({"ok": true}),
            },
            QueueEvent::Retrying {
                job: job.clone(),
                error: "boom".to_string(),
            },
            QueueEvent::Failed {
                job,
                error: "boom".to_string(),
            },
            QueueEvent::Stalled {
                job_id: JobId::from(2u64),
            },
        ];
        for event in &events {
            log_event("q", event);
        }

        assert!(logs_contain("Queue q is ready"));
        assert!(logs_contain("Queue q received redis error: ECONNREFUSED"));
        assert!(logs_contain("Queue q successfully completed job #1"));
        assert!(logs_contain("Queue q is retrying job #1 after error: boom"));
        assert!(logs_contain("Queue q received error on job #1: boom"));
        assert!(logs_contain("Queue q detected stalled job #2"));
    }

    #[tokio::test]
    async fn test_attach_subscribes_immediately() {
        let broker = MemoryBroker::new();
        let queue = broker.open("q", &QueueConfig::defaults("q")).unwrap();
        let before = broker.subscriber_count("q");

        let handle = EventObserver::attach(queue.as_ref());
        assert_eq!(broker.subscriber_count("q"), before + 1);

        handle.abort();
    }
}
