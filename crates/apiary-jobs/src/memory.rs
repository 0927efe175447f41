//! In-process broker.
//!
//! Keeps every queue in memory with the same bookkeeping the Redis adapter
//! keeps in keys: a FIFO waiting list, claimed jobs with a claim instant,
//! succeeded/failed sets and a delayed set. Handles opened for the same name
//! share one state, the way Redis handles share keys.

use crate::backend::{run_handler, Broker, Handler, HealthSnapshot, JobTable, QueueBackend, StalledReport};
use crate::config::QueueConfig;
use crate::error::{JobError, JobResult};
use crate::event::{EventBus, QueueEvent};
use crate::job::{Job, JobId, JobOptions};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, Instrument};

/// Broker that keeps all queues in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    queues: Arc<Mutex<HashMap<String, Arc<QueueState>>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, name: &str) -> Arc<QueueState> {
        self.queues
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(QueueState::default()))
            .clone()
    }

    /// Make the next `n` connection attempts on `name` fail.
    pub fn fail_next_connects(&self, name: &str, n: u32) {
        self.state(name).failing_connects.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` health checks on `name` fail.
    pub fn fail_next_health_checks(&self, name: &str, n: u32) {
        self.state(name).failing_health.store(n, Ordering::SeqCst);
    }

    /// Make every later `open` of `name` fail.
    pub fn refuse_open(&self, name: &str) {
        self.state(name).refuse_open.store(true, Ordering::SeqCst);
    }

    /// Emit a broker-level error on `name`.
    pub fn simulate_error(&self, name: &str, message: impl Into<String>) {
        self.state(name).events.publish(QueueEvent::Error {
            message: message.into(),
        });
    }

    /// Connection attempts made on `name`, failed or not.
    pub fn connect_attempts(&self, name: &str) -> u64 {
        self.state(name).connect_attempts.load(Ordering::SeqCst)
    }

    /// Successful connections made on `name`.
    pub fn times_connected(&self, name: &str) -> u32 {
        self.state(name).times_connected.load(Ordering::SeqCst)
    }

    /// Health checks requested on `name`, failed or not.
    pub fn health_checks(&self, name: &str) -> u64 {
        self.state(name).health_checks.load(Ordering::SeqCst)
    }

    /// Stalled-job sweeps requested on `name`, failed or not.
    pub fn stall_checks(&self, name: &str) -> u64 {
        self.state(name).stall_checks.load(Ordering::SeqCst)
    }

    /// Live event subscribers on `name`.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.state(name).events.subscriber_count()
    }

    /// The broker's record of a job, if it still has one.
    pub fn job(&self, name: &str, id: &JobId) -> Option<Job> {
        self.state(name).store.lock().jobs.get(id).cloned()
    }
}

impl Broker for MemoryBroker {
    fn open(&self, name: &str, config: &QueueConfig) -> JobResult<Arc<dyn QueueBackend>> {
        let state = self.state(name);
        if state.refuse_open.load(Ordering::SeqCst) {
            return Err(JobError::Connection(format!("queue {} cannot be opened", name)));
        }
        Ok(Arc::new(MemoryQueue {
            name: name.to_string(),
            config: config.clone(),
            state,
            table: Arc::new(JobTable::new(config.store_jobs)),
            processing: AtomicBool::new(false),
        }))
    }
}

#[derive(Debug, Default)]
struct Store {
    next_id: u64,
    jobs: HashMap<JobId, Job>,
    waiting: VecDeque<JobId>,
    active: HashMap<JobId, Instant>,
    succeeded: HashSet<JobId>,
    failed: HashSet<JobId>,
    delayed: BTreeMap<(Instant, u64), JobId>,
    delayed_seq: u64,
}

impl Store {
    fn schedule(&mut self, id: JobId, at: Instant) {
        self.delayed_seq += 1;
        self.delayed.insert((at, self.delayed_seq), id);
    }

    /// Move due delayed jobs to the back of the waiting list.
    fn promote_due(&mut self, now: Instant, limit: u64) -> u64 {
        let mut moved = 0;
        while moved < limit {
            let Some(entry) = self.delayed.first_entry() else {
                break;
            };
            if entry.key().0 > now {
                break;
            }
            let id = entry.remove();
            self.waiting.push_back(id);
            moved += 1;
        }
        moved
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.keys().next().map(|(at, _)| *at)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    events: EventBus,
    store: Mutex<Store>,
    notify: Notify,
    connected: AtomicBool,
    times_connected: AtomicU32,
    connect_attempts: AtomicU64,
    failing_connects: AtomicU32,
    failing_health: AtomicU32,
    refuse_open: AtomicBool,
    health_checks: AtomicU64,
    stall_checks: AtomicU64,
}

impl QueueState {
    fn try_connect(&self) -> JobResult<()> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            let message = "connect ECONNREFUSED".to_string();
            self.events.publish(QueueEvent::Error {
                message: message.clone(),
            });
            return Err(JobError::Connection(message));
        }
        Ok(())
    }

    /// Connect through the reconnect strategy, then announce readiness.
    async fn connect(&self, name: &str, config: &QueueConfig) {
        let times_connected = self.times_connected.load(Ordering::SeqCst);
        let ((), failures) = config
            .reconnect
            .connect_with(name, times_connected, || async { self.try_connect() })
            .await;

        self.connected.store(true, Ordering::SeqCst);
        self.times_connected.fetch_add(1, Ordering::SeqCst);
        debug!(queue = %name, failures, "Connected to in-memory broker");
        self.events.publish(QueueEvent::Ready);
    }

    fn ensure_connected(&self, name: &str) -> JobResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(JobError::Connection(format!("queue {} is not connected", name)))
        }
    }

    /// Wait for a ready job, claim it and bump its attempt count.
    async fn claim(&self, config: &QueueConfig) -> Job {
        loop {
            let wake_at = {
                let mut store = self.store.lock();
                if config.activate_delayed_jobs {
                    store.promote_due(Instant::now(), config.scan_count.max(1));
                }
                if let Some(id) = store.waiting.pop_front() {
                    store.active.insert(id.clone(), Instant::now());
                    if let Some(job) = store.jobs.get_mut(&id) {
                        job.attempts_made += 1;
                        return job.clone();
                    }
                    // Record removed underneath us; skip it.
                    store.active.remove(&id);
                    continue;
                }
                if config.activate_delayed_jobs {
                    store.next_due().map(|due| {
                        due.min(Instant::now() + config.delayed_debounce().max(Duration::from_millis(1)))
                    })
                } else {
                    None
                }
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Keep the claim on `id` fresh while its handler runs.
    fn touch(&self, id: &JobId) {
        if let Some(claimed_at) = self.store.lock().active.get_mut(id) {
            *claimed_at = Instant::now();
        }
    }

    fn finish(&self, config: &QueueConfig, mut job: Job, result: Result<Value, JobError>) -> QueueEvent {
        let mut store = self.store.lock();
        store.active.remove(&job.id);
        if let Some(record) = store.jobs.get(&job.id) {
            job.attempts_made = record.attempts_made;
        }

        match result {
            Ok(result) => {
                if config.remove_on_success {
                    store.jobs.remove(&job.id);
                } else {
                    store.succeeded.insert(job.id.clone());
                }
                QueueEvent::Succeeded {
                    job: Arc::new(job),
                    result,
                }
            }
            Err(e) if job.can_retry() => {
                let delay = job.retry_delay();
                if delay.is_zero() {
                    store.waiting.push_back(job.id.clone());
                } else {
                    store.schedule(job.id.clone(), Instant::now() + delay);
                }
                self.notify.notify_one();
                QueueEvent::Retrying {
                    job: Arc::new(job),
                    error: e.to_string(),
                }
            }
            Err(e) => {
                if config.remove_on_failure {
                    store.jobs.remove(&job.id);
                } else {
                    store.failed.insert(job.id.clone());
                }
                QueueEvent::Failed {
                    job: Arc::new(job),
                    error: e.to_string(),
                }
            }
        }
    }
}

/// A handle to one in-memory queue.
pub struct MemoryQueue {
    name: String,
    config: QueueConfig,
    state: Arc<QueueState>,
    table: Arc<JobTable>,
    processing: AtomicBool,
}

impl MemoryQueue {
    async fn run_job(state: Arc<QueueState>, table: Arc<JobTable>, config: QueueConfig, handler: Handler, job: Job) {
        let id = job.id.clone();
        table.track(Arc::new(job.clone()));
        debug!(queue = %config.name, job_id = %id, attempt = job.attempts_made, "Processing job");

        let heartbeat_every = (config.stall_interval() / 2).max(Duration::from_millis(1));
        let run = run_handler(&handler, job.clone());
        tokio::pin!(run);

        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                _ = tokio::time::sleep(heartbeat_every) => state.touch(&id),
            }
        };

        let event = state.finish(&config, job, result);
        match &event {
            QueueEvent::Retrying { job, .. } => table.track(job.clone()),
            _ => table.forget(&id),
        }
        state.events.publish(event);
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.state.events.subscribe()
    }

    async fn connect(&self) -> JobResult<()> {
        self.state.connect(&self.name, &self.config).await;
        Ok(())
    }

    async fn check_health(&self) -> JobResult<HealthSnapshot> {
        self.state.health_checks.fetch_add(1, Ordering::SeqCst);
        self.state.ensure_connected(&self.name)?;
        let failing = self
            .state
            .failing_health
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(JobError::Connection("health check timed out".to_string()));
        }

        let store = self.state.store.lock();
        Ok(HealthSnapshot {
            waiting: store.waiting.len() as u64,
            active: store.active.len() as u64,
            succeeded: store.succeeded.len() as u64,
            failed: store.failed.len() as u64,
            delayed: store.delayed.len() as u64,
            newest_job: (store.next_id > 0).then(|| JobId::from(store.next_id)),
        })
    }

    async fn check_stalled_jobs(&self) -> JobResult<StalledReport> {
        self.state.stall_checks.fetch_add(1, Ordering::SeqCst);
        self.state.ensure_connected(&self.name)?;
        let limit = self.config.stall_interval();
        let now = Instant::now();

        let stalled: Vec<JobId> = {
            let mut store = self.state.store.lock();
            let mut stalled: Vec<JobId> = store
                .active
                .iter()
                .filter(|(_, claimed_at)| now.duration_since(**claimed_at) >= limit)
                .map(|(id, _)| id.clone())
                .collect();
            stalled.sort();
            for id in &stalled {
                store.active.remove(id);
                store.waiting.push_front(id.clone());
            }
            stalled
        };

        for id in &stalled {
            self.state.notify.notify_one();
            self.state.events.publish(QueueEvent::Stalled { job_id: id.clone() });
        }
        Ok(StalledReport {
            count: stalled.len() as u64,
        })
    }

    async fn process(&self, concurrency: usize, handler: Handler) -> JobResult<JoinHandle<()>> {
        if !self.config.is_worker {
            return Err(JobError::NotWorker(self.name.clone()));
        }
        if self.processing.swap(true, Ordering::SeqCst) {
            return Err(JobError::AlreadyProcessing(self.name.clone()));
        }

        let name = self.name.clone();
        let config = self.config.clone();
        let state = self.state.clone();
        let table = self.table.clone();
        let concurrency = concurrency.max(1);
        let span = tracing::info_span!("queue", queue = %name);

        let handle = tokio::spawn(
            async move {
                state.connect(&name, &config).await;
                info!(queue = %name, concurrency, "Queue {} processing jobs", name);

                let semaphore = Arc::new(Semaphore::new(concurrency));
                let mut tasks = JoinSet::new();

                loop {
                    while let Some(done) = tasks.try_join_next() {
                        if let Err(e) = done {
                            error!(queue = %name, error = %e, "Job task panicked");
                        }
                    }

                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                        break;
                    };
                    let job = state.claim(&config).await;

                    let state = state.clone();
                    let table = table.clone();
                    let config = config.clone();
                    let handler = handler.clone();
                    tasks.spawn(async move {
                        MemoryQueue::run_job(state, table, config, handler, job).await;
                        drop(permit);
                    });
                }
            }
            .instrument(span),
        );

        Ok(handle)
    }

    async fn create_job(&self, data: Value, options: JobOptions) -> JobResult<JobId> {
        let (job, delayed) = {
            let mut store = self.state.store.lock();
            store.next_id += 1;
            let id = JobId::from(store.next_id);
            let job = Job::new(id.clone(), self.name.clone(), data, options);
            let delay = job.remaining_delay();

            store.jobs.insert(id.clone(), job.clone());
            match delay {
                Some(delay) => store.schedule(id, Instant::now() + delay),
                None => store.waiting.push_back(id),
            }
            (job, delay.is_some())
        };

        self.state.notify.notify_one();
        debug!(queue = %self.name, job_id = %job.id, delayed, "Created job");
        let id = job.id.clone();
        self.table.track(Arc::new(job));
        Ok(id)
    }

    fn stored_job(&self, id: &JobId) -> Option<Arc<Job>> {
        self.table.get(id)
    }
}
