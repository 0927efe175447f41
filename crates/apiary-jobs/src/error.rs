//! Job and queue error types.

use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// Handler returned an error.
    #[error("Job execution failed: {0}")]
    ExecutionFailed(String),

    /// Handler exceeded the job's timeout.
    #[error("Job timed out after {0} ms")]
    Timeout(u64),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Broker is unreachable or the connection dropped.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A queue was started without a bound handler.
    #[error("No handler registered for queue {0}")]
    MissingHandler(String),

    /// `process` was called on a queue configured with `is_worker = false`.
    #[error("Queue {0} is not configured as a worker")]
    NotWorker(String),

    /// `process` was called twice on the same handle.
    #[error("Queue {0} is already processing")]
    AlreadyProcessing(String),

    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Returns true if the broker may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobError::ExecutionFailed(_)
                | JobError::Timeout(_)
                | JobError::Redis(_)
                | JobError::Pool(_)
                | JobError::Connection(_)
        )
    }

    /// Returns true for errors that are fatal at startup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            JobError::Configuration(_) | JobError::MissingHandler(_) | JobError::NotWorker(_)
        )
    }

    /// Shorthand for a handler failure.
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::ExecutionFailed(message.into())
    }
}

impl From<apiary_core::ApiaryError> for JobError {
    fn from(err: apiary_core::ApiaryError) -> Self {
        match err {
            apiary_core::ApiaryError::Configuration(msg) => JobError::Configuration(msg),
            other => JobError::Internal(other.to_string()),
        }
    }
}
