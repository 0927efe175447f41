//! Apiary Jobs - Queue Worker Orchestration
//!
//! Runs a set of named job queues against a broker:
//! - Per-queue configuration resolved over documented defaults
//! - Handler registration, one handler per queue name
//! - Concurrent dispatch with a per-queue concurrency limit
//! - Periodic health probes and stalled-job sweeps
//! - Lifecycle events turned into structured logs and metrics
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        QueueService                           │
//! │                                                               │
//! │  ProcessorRegistry ──► WorkerDispatcher ──► start_one(name)   │
//! │                              │                                │
//! │              ┌───────────────┼──────────────────┐             │
//! │              ▼               ▼                  ▼             │
//! │     ConfigResolver     QueueRegistry       HealthMonitor      │
//! │                              │            (health, stalls)    │
//! │                              ▼                                │
//! │                   Broker ──► QueueBackend ──► EventObserver   │
//! │              (Memory | Redis)   │  broadcast                  │
//! │                                 ▼                             │
//! │                      process(concurrency, handler)            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use apiary_jobs::{MemoryBroker, QueueService};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let service = QueueService::builder(config.bee.clone(), Arc::new(MemoryBroker::new()))
//!     .worker("emails", |job| async move {
//!         send_email(&job.data).await?;
//!         Ok(json!({"sent": true}))
//!     })
//!     .build();
//!
//! let running = service.run().await?;
//! ```

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod job;
pub mod memory;
pub mod metrics;
pub mod monitor;
pub mod observer;
pub mod queue_registry;
pub mod redis;
pub mod registry;
pub mod retry;
pub mod service;

pub use backend::{handler_fn, Broker, Handler, HealthSnapshot, JobTable, QueueBackend, StalledReport};
pub use config::{ConfigResolver, QueueConfig, WorkerConfig};
pub use dispatcher::{RunningQueue, WorkerDispatcher};
pub use error::{JobError, JobResult};
pub use event::{EventBus, QueueEvent};
pub use job::{Backoff, Job, JobId, JobOptions};
pub use memory::MemoryBroker;
pub use self::metrics::register_metrics;
pub use monitor::{HealthMonitor, MonitorSettings, ProbeStats};
pub use observer::EventObserver;
pub use queue_registry::QueueRegistry;
pub use self::redis::{RedisBroker, RedisKeys, RedisQueue};
pub use registry::ProcessorRegistry;
pub use retry::{ReconnectAttempt, ReconnectStrategy, RECONNECT_DELAY};
pub use service::{QueueService, QueueServiceBuilder};

/// Re-export commonly used items
pub mod prelude {
    pub use crate::backend::{handler_fn, Broker, QueueBackend};
    pub use crate::job::{Job, JobId, JobOptions};
    pub use crate::service::QueueService;
    pub use crate::{JobError, JobResult};
}
