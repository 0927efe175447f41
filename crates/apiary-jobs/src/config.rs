//! Per-queue configuration resolution.
//!
//! User settings from the `bee` section are shallow-merged over the
//! documented defaults: a key the user supplies wins, every other key keeps
//! its default. The reconnect strategy is always installed, whatever the user
//! wrote.

use crate::retry::ReconnectStrategy;
use apiary_config::{BeeSettings, ConnectionSettings, QueueOverrides};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_PREFIX: &str = "bq";
pub const DEFAULT_STALL_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_NEAR_TERM_WINDOW_MS: u64 = 60_000;
pub const DEFAULT_DELAYED_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_SCAN_COUNT: u64 = 100;
pub const DEFAULT_CONCURRENCY: usize = 100;

/// Resolved, immutable configuration for one queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueConfig {
    /// Queue name.
    pub name: String,

    /// Key prefix for broker keys.
    pub prefix: String,

    /// Milliseconds before a claimed job is considered stalled.
    pub stall_interval_ms: u64,

    /// Milliseconds horizon for near-term delayed jobs.
    pub near_term_window_ms: u64,

    /// Milliseconds debounce for delayed-job polling.
    pub delayed_debounce_ms: u64,

    /// Broker connection parameters.
    pub connection: ConnectionSettings,

    pub is_worker: bool,
    pub get_events: bool,
    pub send_events: bool,
    pub store_jobs: bool,
    pub ensure_scripts: bool,
    pub activate_delayed_jobs: bool,
    pub remove_on_success: bool,
    pub remove_on_failure: bool,

    /// Batch size for scans against the broker.
    pub scan_count: u64,

    /// Reconnect policy, always the constant-delay strategy.
    #[serde(skip)]
    pub reconnect: ReconnectStrategy,
}

impl QueueConfig {
    /// The documented defaults for a queue named `name`.
    pub fn defaults(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: DEFAULT_PREFIX.to_string(),
            stall_interval_ms: DEFAULT_STALL_INTERVAL_MS,
            near_term_window_ms: DEFAULT_NEAR_TERM_WINDOW_MS,
            delayed_debounce_ms: DEFAULT_DELAYED_DEBOUNCE_MS,
            connection: ConnectionSettings::default(),
            is_worker: true,
            get_events: true,
            send_events: true,
            store_jobs: true,
            ensure_scripts: true,
            activate_delayed_jobs: false,
            remove_on_success: false,
            remove_on_failure: false,
            scan_count: DEFAULT_SCAN_COUNT,
            reconnect: ReconnectStrategy::default(),
        }
    }

    /// Applies user overrides on top of this configuration.
    fn merge(mut self, overrides: &QueueOverrides) -> Self {
        if let Some(prefix) = &overrides.prefix {
            self.prefix = prefix.clone();
        }
        if let Some(connection) = &overrides.connection {
            self.connection = connection.clone();
        }
        self.stall_interval_ms = overrides.stall_interval.unwrap_or(self.stall_interval_ms);
        self.near_term_window_ms = overrides.near_term_window.unwrap_or(self.near_term_window_ms);
        self.delayed_debounce_ms = overrides.delayed_debounce.unwrap_or(self.delayed_debounce_ms);
        self.is_worker = overrides.is_worker.unwrap_or(self.is_worker);
        self.get_events = overrides.get_events.unwrap_or(self.get_events);
        self.send_events = overrides.send_events.unwrap_or(self.send_events);
        self.store_jobs = overrides.store_jobs.unwrap_or(self.store_jobs);
        self.ensure_scripts = overrides.ensure_scripts.unwrap_or(self.ensure_scripts);
        self.activate_delayed_jobs = overrides
            .activate_delayed_jobs
            .unwrap_or(self.activate_delayed_jobs);
        self.remove_on_success = overrides.remove_on_success.unwrap_or(self.remove_on_success);
        self.remove_on_failure = overrides.remove_on_failure.unwrap_or(self.remove_on_failure);
        self.scan_count = overrides.scan_count.unwrap_or(self.scan_count);
        self
    }

    /// Returns the stall interval as Duration.
    pub fn stall_interval(&self) -> Duration {
        Duration::from_millis(self.stall_interval_ms)
    }

    /// Returns the delayed-job debounce as Duration.
    pub fn delayed_debounce(&self) -> Duration {
        Duration::from_millis(self.delayed_debounce_ms)
    }

    /// Returns the near-term window as Duration.
    pub fn near_term_window(&self) -> Duration {
        Duration::from_millis(self.near_term_window_ms)
    }
}

/// Resolved worker configuration for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerConfig {
    /// Maximum number of jobs in flight. Always at least 1.
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Resolves queue and worker configuration from the `bee` settings.
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    settings: Arc<BeeSettings>,
}

impl ConfigResolver {
    /// Creates a resolver over the given settings.
    pub fn new(settings: BeeSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    /// Resolves the queue configuration for `name`.
    ///
    /// A queue with no section resolves to the defaults.
    pub fn resolve_queue_config(&self, name: &str) -> QueueConfig {
        let base = QueueConfig::defaults(name);
        let mut config = match self.settings.get(name) {
            Some(section) => base.merge(&section.queue),
            None => base,
        };
        config.reconnect = ReconnectStrategy::default();
        config
    }

    /// Resolves the worker configuration for `name`.
    pub fn resolve_worker_config(&self, name: &str) -> WorkerConfig {
        let concurrency = self
            .settings
            .get(name)
            .and_then(|section| section.worker.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY)
            .max(1);
        WorkerConfig { concurrency }
    }
}
