//! Health monitor: periodic health probe and stalled-job sweep per queue.
//!
//! Both probes run on their own timer for as long as their task lives. A
//! failed tick is logged and counted; the next tick runs as scheduled.

use crate::backend::QueueBackend;
use crate::metrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn, Instrument};

/// Default period of both probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(5000);

/// Probe periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Period of the health probe.
    pub health_interval: Duration,
    /// Period of the stalled-job sweep.
    pub stall_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            health_interval: DEFAULT_PROBE_INTERVAL,
            stall_interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

/// Outcome counters for one queue's probes.
#[derive(Debug, Default)]
pub struct ProbeStats {
    health_ok: AtomicU64,
    health_failed: AtomicU64,
    sweeps_ok: AtomicU64,
    sweeps_failed: AtomicU64,
}

impl ProbeStats {
    pub fn health_ok(&self) -> u64 {
        self.health_ok.load(Ordering::Relaxed)
    }

    pub fn health_failed(&self) -> u64 {
        self.health_failed.load(Ordering::Relaxed)
    }

    pub fn sweeps_ok(&self) -> u64 {
        self.sweeps_ok.load(Ordering::Relaxed)
    }

    pub fn sweeps_failed(&self) -> u64 {
        self.sweeps_failed.load(Ordering::Relaxed)
    }
}

/// Starts the periodic probes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthMonitor {
    settings: MonitorSettings,
}

impl HealthMonitor {
    pub fn new(settings: MonitorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> MonitorSettings {
        self.settings
    }

    /// Spawn the health probe for `queue`. First tick after one period.
    pub fn start_health_probe(
        &self,
        queue: Arc<dyn QueueBackend>,
        stats: Arc<ProbeStats>,
    ) -> JoinHandle<()> {
        let period = self.settings.health_interval;
        let span = tracing::info_span!("health_probe", queue = %queue.name());

        tokio::spawn(
            async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    ticker.tick().await;
                    let name = queue.name();
                    match queue.check_health().await {
                        Ok(snapshot) => {
                            stats.health_ok.fetch_add(1, Ordering::Relaxed);
                            metrics::record_snapshot(name, &snapshot);
                            info!(
                                queue = %name,
                                waiting = snapshot.waiting,
                                active = snapshot.active,
                                succeeded = snapshot.succeeded,
                                failed = snapshot.failed,
                                delayed = snapshot.delayed,
                                newest_job = ?snapshot.newest_job,
                                "Queue {} health",
                                name
                            );
                        }
                        Err(e) => {
                            stats.health_failed.fetch_add(1, Ordering::Relaxed);
                            metrics::record_probe_failure(name, "health");
                            warn!(queue = %name, error = %e, "Queue {} healthcheck failed", name);
                        }
                    }
                }
            }
            .instrument(span),
        )
    }

    /// Spawn the stalled-job sweep for `queue`. First tick after one period.
    pub fn start_stall_sweep(
        &self,
        queue: Arc<dyn QueueBackend>,
        stats: Arc<ProbeStats>,
    ) -> JoinHandle<()> {
        let period = self.settings.stall_interval;
        let span = tracing::info_span!("stall_sweep", queue = %queue.name());

        tokio::spawn(
            async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    ticker.tick().await;
                    let name = queue.name();
                    match queue.check_stalled_jobs().await {
                        Ok(report) => {
                            stats.sweeps_ok.fetch_add(1, Ordering::Relaxed);
                            info!(queue = %name, count = report.count, "Queue {} has {} stalled jobs", name, report.count);
                        }
                        Err(e) => {
                            stats.sweeps_failed.fetch_add(1, Ordering::Relaxed);
                            metrics::record_probe_failure(name, "stall");
                            warn!(queue = %name, error = %e, "Queue {} stalled job check failed", name);
                        }
                    }
                }
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Broker;
    use crate::config::QueueConfig;
    use crate::memory::MemoryBroker;
    use tracing_test::traced_test;

    #[test]
    fn test_default_intervals() {
        let settings = MonitorSettings::default();
        assert_eq!(settings.health_interval, Duration::from_secs(5));
        assert_eq!(settings.stall_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_probe_stats_start_at_zero() {
        let stats = ProbeStats::default();
        assert_eq!(stats.health_ok(), 0);
        assert_eq!(stats.health_failed(), 0);
        assert_eq!(stats.sweeps_ok(), 0);
        assert_eq!(stats.sweeps_failed(), 0);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_stall_sweep_logs_every_count() {
        let broker = MemoryBroker::new();
        let queue = broker.open("q", &QueueConfig::defaults("q")).unwrap();
        queue.connect().await.unwrap();

        let stats = Arc::new(ProbeStats::default());
        let monitor = HealthMonitor::new(MonitorSettings::default());
        let sweep = monitor.start_stall_sweep(queue, stats.clone());

        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert_eq!(stats.sweeps_ok(), 1);
        assert!(logs_contain("Queue q has 0 stalled jobs"));

        sweep.abort();
    }
}
