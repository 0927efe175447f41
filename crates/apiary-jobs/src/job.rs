//! Job definitions.

use crate::error::JobResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Unique job identifier, assigned by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates a job ID from a string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for JobId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

/// Delay applied before a failed job is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry right away.
    #[default]
    Immediate,
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },
    /// Delay doubles with each attempt.
    Exponential { delay_ms: u64 },
}

impl Backoff {
    /// Delay before the retry that follows `attempt` (1-based) failed attempts.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Immediate => Duration::ZERO,
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { delay_ms } => {
                let exp = attempt.saturating_sub(1).min(32);
                Duration::from_millis(delay_ms.saturating_mul(1u64 << exp))
            }
        }
    }
}

/// Options set by the producer when a job is created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Number of retries after the first failed attempt.
    #[serde(default)]
    pub retries: u32,

    /// Delay between retries.
    #[serde(default)]
    pub backoff: Backoff,

    /// Do not run before this instant.
    #[serde(default)]
    pub delay_until: Option<DateTime<Utc>>,

    /// Fail the attempt if the handler runs longer than this.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl JobOptions {
    /// Set the retry count.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the retry backoff.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay the job until the given instant.
    pub fn delay_until(mut self, at: DateTime<Utc>) -> Self {
        self.delay_until = Some(at);
        self
    }

    /// Set the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }
}

/// A job as delivered to handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job ID.
    pub id: JobId,

    /// Queue name.
    pub queue: String,

    /// Producer payload.
    pub data: Value,

    /// Producer options.
    #[serde(default)]
    pub options: JobOptions,

    /// Number of attempts started, including the current one.
    #[serde(default)]
    pub attempts_made: u32,

    /// When the job was created.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Create a job record.
    pub fn new(id: JobId, queue: impl Into<String>, data: Value, options: JobOptions) -> Self {
        Self {
            id,
            queue: queue.into(),
            data,
            options,
            attempts_made: 0,
            created_at: Utc::now(),
        }
    }

    /// Returns true if another attempt is allowed after the current one fails.
    pub fn can_retry(&self) -> bool {
        self.attempts_made <= self.options.retries
    }

    /// Delay before the next attempt, per the job's backoff.
    pub fn retry_delay(&self) -> Duration {
        self.options.backoff.delay_for(self.attempts_made)
    }

    /// Returns the per-attempt timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.options.timeout_ms.map(Duration::from_millis)
    }

    /// Returns the time left until `delay_until`, if it is in the future.
    pub fn remaining_delay(&self) -> Option<Duration> {
        let until = self.options.delay_until?;
        (until - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> JobResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> JobResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
