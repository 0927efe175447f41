//! Queue lifecycle events.
//!
//! Each queue handle publishes its lifecycle on a bounded broadcast channel.
//! Observers subscribe independently; a slow subscriber lags and skips
//! events instead of holding up the publisher.

use crate::job::{Job, JobId};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default capacity of a queue's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A lifecycle signal emitted by a queue handle.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// The queue is connected and operable.
    Ready,
    /// Broker-level error not tied to a job.
    Error { message: String },
    /// A handler completed.
    Succeeded { job: Arc<Job>, result: Value },
    /// A handler failed and the job will be attempted again.
    Retrying { job: Arc<Job>, error: String },
    /// A handler failed and no attempts remain.
    Failed { job: Arc<Job>, error: String },
    /// A claimed job missed its stall deadline and was put back.
    Stalled { job_id: JobId },
}

impl QueueEvent {
    /// Short name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            QueueEvent::Ready => "ready",
            QueueEvent::Error { .. } => "error",
            QueueEvent::Succeeded { .. } => "succeeded",
            QueueEvent::Retrying { .. } => "retrying",
            QueueEvent::Failed { .. } => "failed",
            QueueEvent::Stalled { .. } => "stalled",
        }
    }

    /// ID of the job the event refers to, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            QueueEvent::Succeeded { job, .. }
            | QueueEvent::Retrying { job, .. }
            | QueueEvent::Failed { job, .. } => Some(&job.id),
            QueueEvent::Stalled { job_id } => Some(job_id),
            QueueEvent::Ready | QueueEvent::Error { .. } => None,
        }
    }
}

/// Broadcast bus for one queue's events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: QueueEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(QueueEvent::Ready);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_each_subscriber_gets_every_event() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(QueueEvent::Ready);
        bus.publish(QueueEvent::Stalled { job_id: JobId::from(3u64) });

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap().kind(), "ready");
            assert_eq!(rx.recv().await.unwrap().kind(), "stalled");
        }
    }

    #[test]
    fn test_job_id_accessor() {
        let job = Arc::new(Job::new(JobId::from(9u64), "q", json!({}), JobOptions::default()));
        let event = QueueEvent::Failed {
            job,
            error: "boom".to_string(),
        };
        assert_eq!(event.job_id().map(JobId::as_str), Some("9"));
        assert!(QueueEvent::Ready.job_id().is_none());
    }
}
