//! Redis queue handle.

use super::RedisKeys;
use crate::backend::{run_handler, Handler, HealthSnapshot, JobTable, QueueBackend, StalledReport};
use crate::config::QueueConfig;
use crate::error::{JobError, JobResult};
use crate::event::{EventBus, QueueEvent};
use crate::job::{Job, JobId, JobOptions};
use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::Pool;
use parking_lot::Mutex;
use redis::AsyncCommands;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// Seconds a claim blocks waiting for a job before re-checking delayed jobs.
const CLAIM_BLOCK_SECS: u64 = 1;

/// A handle to one Redis-backed queue.
pub struct RedisQueue {
    inner: Arc<Inner>,
    processing: AtomicBool,
}

struct Inner {
    name: String,
    config: QueueConfig,
    pool: Pool,
    keys: RedisKeys,
    events: EventBus,
    table: JobTable,
    connected: AtomicBool,
    times_connected: AtomicU32,
    /// Active ids without a claim entry at the last sweep.
    unclaimed: Mutex<HashSet<String>>,
}

impl RedisQueue {
    pub fn new(name: &str, config: QueueConfig, pool: Pool, events: EventBus) -> Self {
        let keys = RedisKeys::new(&config.prefix, name);
        let table = JobTable::new(config.store_jobs);
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                config,
                pool,
                keys,
                events,
                table,
                connected: AtomicBool::new(false),
                times_connected: AtomicU32::new(0),
                unclaimed: Mutex::new(HashSet::new()),
            }),
            processing: AtomicBool::new(false),
        }
    }

    /// Read a job from the broker's job hash.
    pub async fn get_job(&self, id: &JobId) -> JobResult<Option<Job>> {
        self.inner.load_job(id).await
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl Inner {
    async fn conn(&self) -> JobResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    async fn ping_once(&self) -> JobResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut *conn).await?;
        Ok(())
    }

    async fn ping(&self) -> JobResult<()> {
        let result = self.ping_once().await;
        if let Err(e) = &result {
            self.events.publish(QueueEvent::Error {
                message: e.to_string(),
            });
        }
        result
    }

    async fn connect(&self) {
        let times_connected = self.times_connected.load(Ordering::SeqCst);
        let ((), failures) = self
            .config
            .reconnect
            .connect_with(&self.name, times_connected, || self.ping())
            .await;

        self.connected.store(true, Ordering::SeqCst);
        self.times_connected.fetch_add(1, Ordering::SeqCst);
        debug!(queue = %self.name, failures, "Connected to Redis");
        self.events.publish(QueueEvent::Ready);
    }

    fn ensure_connected(&self) -> JobResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(JobError::Connection(format!("queue {} is not connected", self.name)))
        }
    }

    async fn load_job(&self, id: &JobId) -> JobResult<Option<Job>> {
        let mut conn = self.conn().await?;
        let json: Option<String> = conn.hget(self.keys.jobs(), id.as_str()).await?;
        json.map(|json| Job::from_json(&json)).transpose()
    }

    /// Move due delayed jobs to the waiting list, at most `scan_count` per call.
    async fn activate_delayed(&self) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        let limit = self.config.scan_count.max(1) as isize;
        let due: Vec<String> = conn
            .zrangebyscore_limit(self.keys.delayed(), 0i64, now_ms(), 0, limit)
            .await?;

        let mut moved = 0u64;
        for id in due {
            // ZREM decides the winner when several workers race for a job.
            let removed: u64 = conn.zrem(self.keys.delayed(), &id).await?;
            if removed == 1 {
                let _: () = conn.lpush(self.keys.waiting(), &id).await?;
                moved += 1;
            }
        }
        if moved > 0 {
            debug!(queue = %self.name, count = moved, "Activated delayed jobs");
        }
        Ok(moved)
    }

    /// Block briefly for a waiting job and claim it.
    async fn claim(&self) -> JobResult<Option<Job>> {
        let mut conn = self.conn().await?;
        let id: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(self.keys.waiting())
            .arg(self.keys.active())
            .arg(CLAIM_BLOCK_SECS)
            .query_async(&mut *conn)
            .await?;
        let Some(id) = id else {
            return Ok(None);
        };

        let json: Option<String> = conn.hget(self.keys.jobs(), &id).await?;
        let Some(json) = json else {
            warn!(queue = %self.name, job_id = %id, "Claimed job has no data, dropping");
            let _: () = conn.lrem(self.keys.active(), 0, &id).await?;
            return Ok(None);
        };

        let mut job = match Job::from_json(&json) {
            Ok(job) => job,
            Err(e) => {
                warn!(queue = %self.name, job_id = %id, error = %e, "Claimed job has unreadable data, marking failed");
                let _: () = redis::pipe()
                    .lrem(self.keys.active(), 0, &id)
                    .ignore()
                    .sadd(self.keys.failed(), &id)
                    .ignore()
                    .query_async(&mut *conn)
                    .await?;
                return Ok(None);
            }
        };
        job.attempts_made += 1;
        let _: () = redis::pipe()
            .hset(self.keys.jobs(), &id, job.to_json()?)
            .hset(self.keys.claims(), &id, now_ms())
            .query_async(&mut *conn)
            .await?;
        Ok(Some(job))
    }

    async fn touch(&self, id: &JobId) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.hset(self.keys.claims(), id.as_str(), now_ms()).await?;
        Ok(())
    }

    /// Record the outcome of one attempt and build the matching event.
    async fn finish(&self, job: Job, result: Result<Value, JobError>) -> JobResult<QueueEvent> {
        let mut conn = self.conn().await?;
        let id = job.id.as_str().to_string();
        let mut pipe = redis::pipe();
        pipe.lrem(self.keys.active(), 0, &id).ignore();
        pipe.hdel(self.keys.claims(), &id).ignore();

        let event = match result {
            Ok(result) => {
                if self.config.remove_on_success {
                    pipe.hdel(self.keys.jobs(), &id).ignore();
                } else {
                    pipe.sadd(self.keys.succeeded(), &id).ignore();
                }
                QueueEvent::Succeeded {
                    job: Arc::new(job),
                    result,
                }
            }
            Err(e) if job.can_retry() => {
                let delay = job.retry_delay();
                if delay.is_zero() {
                    pipe.lpush(self.keys.waiting(), &id).ignore();
                } else {
                    let due = now_ms() + delay.as_millis() as i64;
                    pipe.zadd(self.keys.delayed(), &id, due).ignore();
                }
                QueueEvent::Retrying {
                    job: Arc::new(job),
                    error: e.to_string(),
                }
            }
            Err(e) => {
                if self.config.remove_on_failure {
                    pipe.hdel(self.keys.jobs(), &id).ignore();
                } else {
                    pipe.sadd(self.keys.failed(), &id).ignore();
                }
                QueueEvent::Failed {
                    job: Arc::new(job),
                    error: e.to_string(),
                }
            }
        };

        let _: () = pipe.query_async(&mut *conn).await?;
        Ok(event)
    }

    async fn run_job(self: Arc<Self>, handler: Handler, job: Job) {
        let id = job.id.clone();
        self.table.track(Arc::new(job.clone()));
        debug!(queue = %self.name, job_id = %id, attempt = job.attempts_made, "Processing job");

        let heartbeat_every = (self.config.stall_interval() / 2).max(Duration::from_millis(1));
        let run = run_handler(&handler, job.clone());
        tokio::pin!(run);

        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                _ = tokio::time::sleep(heartbeat_every) => {
                    if let Err(e) = self.touch(&id).await {
                        warn!(queue = %self.name, job_id = %id, error = %e, "Failed to refresh job claim");
                    }
                }
            }
        };

        match self.finish(job, result).await {
            Ok(event) => {
                match &event {
                    QueueEvent::Retrying { job, .. } => self.table.track(job.clone()),
                    _ => self.table.forget(&id),
                }
                self.events.publish(event);
            }
            Err(e) => {
                error!(queue = %self.name, job_id = %id, error = %e, "Failed to record job outcome");
                self.events.publish(QueueEvent::Error {
                    message: e.to_string(),
                });
            }
        }
    }

    async fn process_loop(self: Arc<Self>, concurrency: usize, handler: Handler) {
        self.connect().await;
        info!(queue = %self.name, concurrency, "Queue {} processing jobs", self.name);

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();
        let mut last_activation: Option<Instant> = None;

        loop {
            while let Some(done) = tasks.try_join_next() {
                if let Err(e) = done {
                    error!(queue = %self.name, error = %e, "Job task panicked");
                }
            }

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };

            if self.config.activate_delayed_jobs
                && last_activation.map_or(true, |at| at.elapsed() >= self.config.delayed_debounce())
            {
                last_activation = Some(Instant::now());
                if let Err(e) = self.activate_delayed().await {
                    warn!(queue = %self.name, error = %e, "Delayed job activation failed");
                }
            }

            match self.claim().await {
                Ok(Some(job)) => {
                    let inner = self.clone();
                    let handler = handler.clone();
                    tasks.spawn(async move {
                        inner.run_job(handler, job).await;
                        drop(permit);
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    error!(queue = %self.name, error = %e, "Queue {} lost its Redis connection", self.name);
                    self.events.publish(QueueEvent::Error {
                        message: e.to_string(),
                    });
                    self.connected.store(false, Ordering::SeqCst);
                    self.connect().await;
                }
            }
        }
    }
}

#[async_trait]
impl QueueBackend for RedisQueue {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    async fn connect(&self) -> JobResult<()> {
        self.inner.connect().await;
        Ok(())
    }

    async fn check_health(&self) -> JobResult<HealthSnapshot> {
        self.inner.ensure_connected()?;
        let keys = &self.inner.keys;
        let mut conn = self.inner.conn().await?;

        let (waiting, active, succeeded, failed, delayed, newest): (
            u64,
            u64,
            u64,
            u64,
            u64,
            Option<u64>,
        ) = redis::pipe()
            .llen(keys.waiting())
            .llen(keys.active())
            .scard(keys.succeeded())
            .scard(keys.failed())
            .zcard(keys.delayed())
            .get(keys.id())
            .query_async(&mut *conn)
            .await?;

        Ok(HealthSnapshot {
            waiting,
            active,
            succeeded,
            failed,
            delayed,
            newest_job: newest.map(JobId::from),
        })
    }

    async fn check_stalled_jobs(&self) -> JobResult<StalledReport> {
        self.inner.ensure_connected()?;
        let inner = &self.inner;
        let keys = &inner.keys;
        let mut conn = inner.conn().await?;

        let claims: HashMap<String, i64> = conn.hgetall(keys.claims()).await?;
        let active: Vec<String> = conn.lrange(keys.active(), 0, -1).await?;
        let cutoff = now_ms() - inner.config.stall_interval_ms as i64;

        // An active id with no claim entry lost its claim write. It is only
        // taken as stalled once it has stayed unclaimed for a whole sweep, so a
        // claim that is still in flight is left alone.
        let unclaimed: HashSet<String> = active
            .into_iter()
            .filter(|id| !claims.contains_key(id))
            .collect();
        let orphaned: Vec<String> = {
            let mut previous = inner.unclaimed.lock();
            let orphaned = unclaimed.intersection(&previous).cloned().collect();
            *previous = unclaimed;
            orphaned
        };

        let mut stalled: Vec<String> = claims
            .into_iter()
            .filter(|(_, claimed_at)| *claimed_at <= cutoff)
            .map(|(id, _)| id)
            .chain(orphaned)
            .collect();
        stalled.sort();
        stalled.dedup();

        let mut count = 0u64;
        for id in stalled {
            // Only the sweeper that removes the active entry re-queues the job.
            let removed: u64 = conn.lrem(keys.active(), 0, &id).await?;
            let _: () = conn.hdel(keys.claims(), &id).await?;
            if removed == 0 {
                continue;
            }
            let _: () = conn.rpush(keys.waiting(), &id).await?;
            inner.events.publish(QueueEvent::Stalled {
                job_id: JobId::from(id),
            });
            count += 1;
        }
        Ok(StalledReport { count })
    }

    async fn process(&self, concurrency: usize, handler: Handler) -> JobResult<JoinHandle<()>> {
        if !self.inner.config.is_worker {
            return Err(JobError::NotWorker(self.inner.name.clone()));
        }
        if self.processing.swap(true, Ordering::SeqCst) {
            return Err(JobError::AlreadyProcessing(self.inner.name.clone()));
        }

        let span = tracing::info_span!("queue", queue = %self.inner.name);
        let inner = self.inner.clone();
        Ok(tokio::spawn(
            inner.process_loop(concurrency.max(1), handler).instrument(span),
        ))
    }

    async fn create_job(&self, data: Value, options: JobOptions) -> JobResult<JobId> {
        let inner = &self.inner;
        let keys = &inner.keys;
        let mut conn = inner.conn().await?;

        let next: u64 = conn.incr(keys.id(), 1).await?;
        let job = Job::new(JobId::from(next), inner.name.clone(), data, options);
        let json = job.to_json()?;
        let id = job.id.as_str().to_string();

        let mut pipe = redis::pipe();
        pipe.hset(keys.jobs(), &id, json).ignore();
        match job.remaining_delay() {
            Some(delay) => {
                let due = now_ms() + delay.as_millis() as i64;
                pipe.zadd(keys.delayed(), &id, due).ignore();
            }
            None => {
                pipe.lpush(keys.waiting(), &id).ignore();
            }
        }
        let _: () = pipe.query_async(&mut *conn).await?;

        debug!(queue = %inner.name, job_id = %job.id, "Created job");
        let job_id = job.id.clone();
        inner.table.track(Arc::new(job));
        Ok(job_id)
    }

    fn stored_job(&self, id: &JobId) -> Option<Arc<Job>> {
        self.inner.table.get(id)
    }
}
