//! Queue service facade: register handlers, then run every queue.

use crate::backend::{Broker, Handler, QueueBackend};
use crate::config::ConfigResolver;
use crate::dispatcher::{RunningQueue, WorkerDispatcher};
use crate::error::{JobError, JobResult};
use crate::job::Job;
use crate::metrics::register_metrics;
use crate::monitor::{HealthMonitor, MonitorSettings};
use crate::queue_registry::QueueRegistry;
use crate::registry::ProcessorRegistry;
use apiary_config::BeeSettings;
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Builder for [`QueueService`].
pub struct QueueServiceBuilder {
    settings: BeeSettings,
    broker: Arc<dyn Broker>,
    processors: ProcessorRegistry,
    monitor: MonitorSettings,
}

impl QueueServiceBuilder {
    /// Bind an async closure to `name`. A later binding for the same name wins.
    pub fn worker<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        self.processors.worker(name, f);
        self
    }

    /// Bind a prepared handler to `name`.
    pub fn handler(mut self, name: impl Into<String>, handler: Handler) -> Self {
        self.processors.register(name, handler);
        self
    }

    /// Bind every `(name, handler)` pair of a manifest.
    pub fn manifest<S, I>(mut self, manifest: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, Handler)>,
    {
        self.processors.extend(manifest);
        self
    }

    /// Override the probe periods.
    pub fn monitor_settings(mut self, monitor: MonitorSettings) -> Self {
        self.monitor = monitor;
        self
    }

    /// Freeze the registrations.
    pub fn build(self) -> QueueService {
        let resolver = Arc::new(ConfigResolver::new(self.settings));
        let processors = Arc::new(self.processors);
        let queues = QueueRegistry::new(resolver.clone(), self.broker);
        let dispatcher = WorkerDispatcher::new(
            processors.clone(),
            queues.clone(),
            HealthMonitor::new(self.monitor),
        );

        QueueService {
            resolver,
            processors,
            queues,
            dispatcher,
        }
    }
}

/// Registration and startup surface for the queue runtime.
pub struct QueueService {
    resolver: Arc<ConfigResolver>,
    processors: Arc<ProcessorRegistry>,
    queues: QueueRegistry,
    dispatcher: WorkerDispatcher,
}

impl QueueService {
    /// Start building a service over the `bee` settings and a broker.
    pub fn builder(settings: BeeSettings, broker: Arc<dyn Broker>) -> QueueServiceBuilder {
        QueueServiceBuilder {
            settings,
            broker,
            processors: ProcessorRegistry::new(),
            monitor: MonitorSettings::default(),
        }
    }

    /// Where a host keeps one handler module per queue: `{app_dir}/res/bee/*`.
    pub fn discovery_pattern(app_dir: impl AsRef<Path>) -> PathBuf {
        app_dir.as_ref().join("res").join("bee").join("*")
    }

    /// Start every queue with a bound handler.
    ///
    /// Queues that are only configured, e.g. producer-side queues, are left
    /// alone. Fails before opening any queue if a bound queue is not a worker.
    pub async fn run(&self) -> JobResult<Vec<RunningQueue>> {
        register_metrics();
        info!(queues = self.processors.len(), "Starting {} queues", self.processors.len());
        self.dispatcher.start_all().await
    }

    /// Open a handle to `name`, e.g. to submit jobs.
    pub fn get_queue(&self, name: &str) -> JobResult<Arc<dyn QueueBackend>> {
        self.queues.get_queue(name)
    }

    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    pub fn dispatcher(&self) -> &WorkerDispatcher {
        &self.dispatcher
    }
}
