//! Worker dispatcher: starts processing for every registered queue.

use crate::backend::QueueBackend;
use crate::error::{JobError, JobResult};
use crate::monitor::{HealthMonitor, ProbeStats};
use crate::observer::EventObserver;
use crate::queue_registry::QueueRegistry;
use crate::registry::ProcessorRegistry;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// A started queue and the tasks that serve it.
pub struct RunningQueue {
    name: String,
    concurrency: usize,
    queue: Arc<dyn QueueBackend>,
    stats: Arc<ProbeStats>,
    observer: JoinHandle<()>,
    processing: JoinHandle<()>,
    health_probe: JoinHandle<()>,
    stall_sweep: JoinHandle<()>,
}

impl RunningQueue {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Concurrency the processing loop was started with.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// The handle shared by the processing loop, observer and probes.
    pub fn queue(&self) -> &Arc<dyn QueueBackend> {
        &self.queue
    }

    /// Probe outcome counters.
    pub fn stats(&self) -> &ProbeStats {
        &self.stats
    }

    /// Returns true once every task has ended.
    pub fn is_finished(&self) -> bool {
        self.observer.is_finished()
            && self.processing.is_finished()
            && self.health_probe.is_finished()
            && self.stall_sweep.is_finished()
    }

    /// Stop the processing loop, probes and observer.
    ///
    /// Jobs in flight are dropped; the broker's stall sweep hands them back.
    pub fn abort(&self) {
        info!(queue = %self.name, "Stopping queue {}", self.name);
        self.processing.abort();
        self.health_probe.abort();
        self.stall_sweep.abort();
        self.observer.abort();
    }
}

impl fmt::Debug for RunningQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningQueue")
            .field("name", &self.name)
            .field("concurrency", &self.concurrency)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Binds registered handlers to queue handles and starts them.
#[derive(Clone)]
pub struct WorkerDispatcher {
    processors: Arc<ProcessorRegistry>,
    queues: QueueRegistry,
    monitor: HealthMonitor,
}

impl WorkerDispatcher {
    pub fn new(
        processors: Arc<ProcessorRegistry>,
        queues: QueueRegistry,
        monitor: HealthMonitor,
    ) -> Self {
        Self {
            processors,
            queues,
            monitor,
        }
    }

    /// Start every queue in the processor registry.
    pub async fn start_all(&self) -> JobResult<Vec<RunningQueue>> {
        let names: Vec<String> = self.processors.names().map(str::to_string).collect();
        self.start_queues(&names).await
    }

    /// Start the given queues.
    ///
    /// Every name is checked for a handler and a worker configuration before
    /// any queue is opened, so a configuration error fails without network
    /// activity. If a queue still fails to start, the queues already started
    /// are aborted.
    pub async fn start_queues(&self, names: &[String]) -> JobResult<Vec<RunningQueue>> {
        for name in names {
            if !self.processors.contains(name) {
                error!(queue = %name, "No handler registered for queue {}", name);
                return Err(JobError::MissingHandler(name.clone()));
            }
            if !self.queues.resolver().resolve_queue_config(name).is_worker {
                error!(queue = %name, "Queue {} has a handler but is not a worker", name);
                return Err(JobError::NotWorker(name.clone()));
            }
        }

        let mut running = Vec::with_capacity(names.len());
        for name in names {
            match self.start_one(name).await {
                Ok(queue) => running.push(queue),
                Err(e) => {
                    error!(queue = %name, error = %e, "Failed to start queue {}", name);
                    for queue in &running {
                        queue.abort();
                    }
                    return Err(e);
                }
            }
        }
        Ok(running)
    }

    /// Start one queue: observer, processing loop, then both probes.
    pub async fn start_one(&self, name: &str) -> JobResult<RunningQueue> {
        info!(queue = %name, "Starting queue {}...", name);

        let handler = self
            .processors
            .lookup(name)
            .ok_or_else(|| JobError::MissingHandler(name.to_string()))?;

        let worker = self.queues.resolver().resolve_worker_config(name);
        let queue = self.queues.get_queue(name)?;

        let observer = EventObserver::attach(queue.as_ref());

        let processing = match queue.process(worker.concurrency, handler).await {
            Ok(handle) => handle,
            Err(e) => {
                observer.abort();
                return Err(e);
            }
        };

        let stats = Arc::new(ProbeStats::default());
        let health_probe = self.monitor.start_health_probe(queue.clone(), stats.clone());
        let stall_sweep = self.monitor.start_stall_sweep(queue.clone(), stats.clone());

        info!(
            queue = %name,
            concurrency = worker.concurrency,
            "Queue {} processing with concurrency {}",
            name,
            worker.concurrency
        );

        Ok(RunningQueue {
            name: name.to_string(),
            concurrency: worker.concurrency,
            queue,
            stats,
            observer,
            processing,
            health_probe,
            stall_sweep,
        })
    }

    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }
}
