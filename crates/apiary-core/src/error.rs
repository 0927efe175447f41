//! Unified error type for the Apiary runtime.

use thiserror::Error;

/// Errors raised outside of job execution: configuration loading,
/// telemetry setup, and host-level failures.
#[derive(Error, Debug)]
pub enum ApiaryError {
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An external dependency (broker, exporter) failed.
    #[error("External service error: {service} - {message}")]
    ExternalService { service: String, message: String },

    /// Filesystem or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiaryError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration<T: Into<String>>(message: T) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates an external service error.
    #[must_use]
    pub fn external<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Checks if this error is retriable.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::ExternalService { .. } | Self::Io(_))
    }
}

impl From<serde_json::Error> for ApiaryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON serialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ApiaryError::configuration("bad").error_code(), "CONFIGURATION_ERROR");
        assert_eq!(ApiaryError::external("redis", "down").error_code(), "EXTERNAL_SERVICE_ERROR");
        assert_eq!(ApiaryError::internal("oops").error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_retriable_errors() {
        assert!(ApiaryError::external("redis", "connection refused").is_retriable());
        assert!(!ApiaryError::configuration("missing queue").is_retriable());
        assert!(!ApiaryError::internal("bug").is_retriable());
    }

    #[test]
    fn test_error_display() {
        let err = ApiaryError::external("redis", "connection refused");
        let msg = err.to_string();
        assert!(msg.contains("redis") && msg.contains("connection refused"));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = ApiaryError::from(json_err);
        assert!(matches!(err, ApiaryError::Internal(msg) if msg.contains("JSON")));
    }
}
