//! Common test infrastructure for queue integration tests.

#![allow(dead_code)]

use apiary_config::{BeeSettings, ConnectionSettings, QueueOverrides, QueueSettings, WorkerOverrides};
use apiary_jobs::QueueEvent;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::redis::{Redis, REDIS_PORT};
use tokio::sync::broadcast;

/// Upper bound on how long a test waits for an event, in (virtual) time.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(120);

/// `bee` settings with one queue at the given concurrency.
pub fn bee_with_concurrency(name: &str, concurrency: usize) -> BeeSettings {
    let mut bee = BeeSettings::new();
    bee.insert(
        name.to_string(),
        QueueSettings {
            worker: WorkerOverrides {
                concurrency: Some(concurrency),
            },
            ..QueueSettings::default()
        },
    );
    bee
}

/// Waits for the next event matching `pred`, skipping the rest.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<QueueEvent>, mut pred: F) -> QueueEvent
where
    F: FnMut(&QueueEvent) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("Timed out waiting for queue event")
}

/// Waits for the next job outcome: succeeded, retrying or failed.
pub async fn next_outcome(rx: &mut broadcast::Receiver<QueueEvent>) -> QueueEvent {
    wait_for(rx, |event| {
        matches!(
            event,
            QueueEvent::Succeeded { .. } | QueueEvent::Retrying { .. } | QueueEvent::Failed { .. }
        )
    })
    .await
}

/// Redis container wrapper.
pub struct TestRedis {
    _container: ContainerAsync<Redis>,
    port: u16,
}

impl TestRedis {
    /// Starts a fresh Redis container.
    pub async fn new() -> Self {
        let container = Redis::default()
            .start()
            .await
            .expect("Failed to start Redis container");

        let port = container
            .get_host_port_ipv4(REDIS_PORT)
            .await
            .expect("Failed to get Redis port");

        Self {
            _container: container,
            port,
        }
    }

    /// Connection URL of this container.
    pub fn url(&self) -> String {
        format!("redis://127.0.0.1:{}", self.port)
    }

    /// `bee` settings pointing `name` at this container.
    pub fn bee(&self, name: &str, overrides: QueueOverrides) -> BeeSettings {
        let mut bee = BeeSettings::new();
        bee.insert(
            name.to_string(),
            QueueSettings {
                queue: QueueOverrides {
                    connection: Some(ConnectionSettings {
                        host: "127.0.0.1".to_string(),
                        port: self.port,
                        ..ConnectionSettings::default()
                    }),
                    ..overrides
                },
                worker: WorkerOverrides {
                    concurrency: Some(2),
                },
            },
        );
        bee
    }
}
