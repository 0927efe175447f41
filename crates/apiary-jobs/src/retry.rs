//! Broker reconnection policy.
//!
//! Every queue gets the same policy: wait a constant delay after each failed
//! connection attempt and try again, with no ceiling on attempts.

use crate::error::JobResult;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Delay between reconnection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Details of a failed connection attempt, passed to the strategy.
#[derive(Debug, Clone)]
pub struct ReconnectAttempt {
    /// Attempt number (1-based).
    pub attempt: u32,

    /// Time spent waiting between attempts so far.
    pub total_retry_time: Duration,

    /// How many times this handle has connected successfully before.
    pub times_connected: u32,

    /// Error message of the failed attempt.
    pub error: String,
}

/// Constant-delay reconnection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectStrategy {
    delay: Duration,
}

impl Default for ReconnectStrategy {
    fn default() -> Self {
        Self::constant(RECONNECT_DELAY)
    }
}

impl ReconnectStrategy {
    /// Creates a strategy that always waits `delay`.
    pub fn constant(delay: Duration) -> Self {
        Self { delay }
    }

    /// The configured delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Logs the failed attempt and returns how long to wait before the next one.
    ///
    /// Always returns the constant delay, whatever the attempt count or error.
    pub fn next_delay(&self, queue: &str, attempt: &ReconnectAttempt) -> Duration {
        warn!(
            queue = %queue,
            attempt = attempt.attempt,
            total_retry_time_ms = attempt.total_retry_time.as_millis() as u64,
            times_connected = attempt.times_connected,
            error = %attempt.error,
            "Broker reconnect attempt #{} failed, retrying in {:?}",
            attempt.attempt,
            self.delay
        );
        self.delay
    }

    /// Drives `connect` until it succeeds, sleeping between failures.
    ///
    /// Never gives up. Returns the value of the first successful attempt and
    /// the number of failed attempts before it.
    pub async fn connect_with<F, Fut, T>(
        &self,
        queue: &str,
        times_connected: u32,
        mut connect: F,
    ) -> (T, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = JobResult<T>>,
    {
        let mut failures = 0u32;
        let mut total_retry_time = Duration::ZERO;

        loop {
            match connect().await {
                Ok(value) => return (value, failures),
                Err(e) => {
                    failures += 1;
                    let attempt = ReconnectAttempt {
                        attempt: failures,
                        total_retry_time,
                        times_connected,
                        error: e.to_string(),
                    };
                    let delay = self.next_delay(queue, &attempt);
                    tokio::time::sleep(delay).await;
                    total_retry_time += delay;
                }
            }
        }
    }
}
