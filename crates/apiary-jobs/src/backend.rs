//! Broker contract.
//!
//! The broker owns job storage, claiming, retries and stall remediation.
//! This crate only drives it through [`QueueBackend`] and opens handles
//! through [`Broker`].

use crate::config::QueueConfig;
use crate::error::{JobError, JobResult};
use crate::event::QueueEvent;
use crate::job::{Job, JobId, JobOptions};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Job handler function type.
pub type Handler = Arc<dyn Fn(Job) -> BoxFuture<'static, Result<Value, JobError>> + Send + Sync>;

/// Wraps an async closure into a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
{
    Arc::new(move |job| Box::pin(f(job)))
}

/// Job counts reported by a health probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub waiting: u64,
    pub active: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub delayed: u64,
    /// Most recently assigned job ID.
    pub newest_job: Option<JobId>,
}

/// Result of a stalled-job sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StalledReport {
    /// Jobs found stalled and handed back to the queue.
    pub count: u64,
}

/// A live handle to one named queue on the broker.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Queue name.
    fn name(&self) -> &str;

    /// Configuration the handle was opened with.
    fn config(&self) -> &QueueConfig;

    /// Subscribe to lifecycle events. Never blocks.
    fn subscribe(&self) -> broadcast::Receiver<QueueEvent>;

    /// Connect to the broker, retrying per the configured reconnect strategy
    /// until it succeeds. Emits [`QueueEvent::Ready`] on success.
    async fn connect(&self) -> JobResult<()>;

    /// Fetch job counts.
    async fn check_health(&self) -> JobResult<HealthSnapshot>;

    /// Detect jobs claimed longer than the stall interval and hand them back.
    async fn check_stalled_jobs(&self) -> JobResult<StalledReport>;

    /// Start consuming jobs with up to `concurrency` handlers in flight.
    ///
    /// Returns once the processing loop is spawned; the loop connects first.
    async fn process(&self, concurrency: usize, handler: Handler) -> JobResult<JoinHandle<()>>;

    /// Submit a job.
    async fn create_job(&self, data: Value, options: JobOptions) -> JobResult<JobId>;

    /// Local copy of an unfinished job, kept when `store_jobs` is on.
    fn stored_job(&self, id: &JobId) -> Option<Arc<Job>>;
}

/// Opens queue handles.
pub trait Broker: Send + Sync {
    /// Open a handle to `name`. Performs no network I/O.
    fn open(&self, name: &str, config: &QueueConfig) -> JobResult<Arc<dyn QueueBackend>>;
}

/// Jobs a handle created or claimed and has not yet seen finish.
///
/// Disabled tables accept writes and stay empty.
#[derive(Debug, Default)]
pub struct JobTable {
    enabled: bool,
    jobs: Mutex<HashMap<JobId, Arc<Job>>>,
}

impl JobTable {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Record the latest state of a job.
    pub fn track(&self, job: Arc<Job>) {
        if self.enabled {
            self.jobs.lock().insert(job.id.clone(), job);
        }
    }

    /// Drop a finished job.
    pub fn forget(&self, id: &JobId) {
        if self.enabled {
            self.jobs.lock().remove(id);
        }
    }

    pub fn get(&self, id: &JobId) -> Option<Arc<Job>> {
        self.jobs.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs a handler for one attempt, enforcing the job's timeout.
pub(crate) async fn run_handler(handler: &Handler, job: Job) -> Result<Value, JobError> {
    let timeout = job.timeout();
    let fut = handler(job);
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(JobError::Timeout(limit.as_millis() as u64)),
        },
        None => fut.await,
    }
}
