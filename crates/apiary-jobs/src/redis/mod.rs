//! Redis-backed broker.

mod queue;

pub use queue::RedisQueue;

use crate::backend::{Broker, QueueBackend};
use crate::config::QueueConfig;
use crate::error::{JobError, JobResult};
use crate::event::EventBus;
use deadpool_redis::{Config, Pool, Runtime};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Create a Redis connection pool for `url`. Opens no connection.
pub fn create_pool(url: &str) -> JobResult<Pool> {
    Config::from_url(url)
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| JobError::Configuration(format!("Failed to create Redis pool: {}", e)))
}

/// Redis key builder for one queue.
///
/// Keys follow `{prefix}:{queue}:{suffix}`.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    base: String,
}

impl RedisKeys {
    pub fn new(prefix: &str, queue: &str) -> Self {
        Self {
            base: format!("{}:{}", prefix, queue),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.base, suffix)
    }

    /// Job ID counter (string).
    pub fn id(&self) -> String {
        self.key("id")
    }

    /// Job data (hash: job_id -> job JSON).
    pub fn jobs(&self) -> String {
        self.key("jobs")
    }

    /// Ready jobs (list; pushed left, claimed right).
    pub fn waiting(&self) -> String {
        self.key("waiting")
    }

    /// Claimed jobs (list).
    pub fn active(&self) -> String {
        self.key("active")
    }

    /// Succeeded job IDs (set).
    pub fn succeeded(&self) -> String {
        self.key("succeeded")
    }

    /// Failed job IDs (set).
    pub fn failed(&self) -> String {
        self.key("failed")
    }

    /// Delayed jobs (sorted set by due time in ms).
    pub fn delayed(&self) -> String {
        self.key("delayed")
    }

    /// Claim heartbeats (hash: job_id -> ms timestamp).
    pub fn claims(&self) -> String {
        self.key("claims")
    }
}

/// Opens [`RedisQueue`] handles, sharing one pool per connection URL.
#[derive(Default)]
pub struct RedisBroker {
    pools: Mutex<HashMap<String, Pool>>,
    buses: Mutex<HashMap<String, EventBus>>,
}

impl RedisBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool_for(&self, url: &str) -> JobResult<Pool> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(url) {
            return Ok(pool.clone());
        }
        info!(url = %url, "Creating Redis connection pool");
        let pool = create_pool(url)?;
        pools.insert(url.to_string(), pool.clone());
        Ok(pool)
    }

    fn bus_for(&self, name: &str) -> EventBus {
        self.buses.lock().entry(name.to_string()).or_default().clone()
    }
}

impl Broker for RedisBroker {
    fn open(&self, name: &str, config: &QueueConfig) -> JobResult<Arc<dyn QueueBackend>> {
        let pool = self.pool_for(&config.connection.url())?;
        Ok(Arc::new(RedisQueue::new(
            name,
            config.clone(),
            pool,
            self.bus_for(name),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_keys() {
        let keys = RedisKeys::new("bq", "emails");

        assert_eq!(keys.id(), "bq:emails:id");
        assert_eq!(keys.jobs(), "bq:emails:jobs");
        assert_eq!(keys.waiting(), "bq:emails:waiting");
        assert_eq!(keys.active(), "bq:emails:active");
        assert_eq!(keys.delayed(), "bq:emails:delayed");
        assert_eq!(keys.claims(), "bq:emails:claims");
    }

    #[tokio::test]
    async fn test_open_does_no_io() {
        let broker = RedisBroker::new();
        let mut config = QueueConfig::defaults("emails");
        config.connection.port = 1;

        let queue = broker.open("emails", &config).unwrap();
        assert_eq!(queue.name(), "emails");

        // Same URL reuses the pool.
        broker.open("reports", &config).unwrap();
        assert_eq!(broker.pools.lock().len(), 1);
    }
}
