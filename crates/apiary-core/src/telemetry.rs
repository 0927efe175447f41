//! Tracing subscriber setup.
//!
//! Every Apiary binary calls [`init_telemetry`] once at startup. Library
//! crates only emit through `tracing` macros and never install a subscriber.

use crate::{ApiaryError, ApiaryResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Default filter directive, used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Emit newline-delimited JSON instead of human-readable lines.
    #[serde(default)]
    pub json: bool,

    /// Whether to enable console output.
    #[serde(default = "default_console_output")]
    pub console_output: bool,
}

fn default_service_name() -> String {
    "apiary".to_string()
}

fn default_filter() -> String {
    "info,apiary=debug".to_string()
}

fn default_console_output() -> bool {
    true
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            filter: default_filter(),
            json: false,
            console_output: default_console_output(),
        }
    }
}

impl TelemetryConfig {
    /// Builds the env filter, preferring `RUST_LOG` over the configured directive.
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.filter))
    }
}

/// Initialize the global tracing subscriber.
///
/// Returns an error instead of panicking when a subscriber is already set.
pub fn init_telemetry(config: &TelemetryConfig) -> ApiaryResult<()> {
    if !config.console_output {
        return Ok(());
    }

    let registry = tracing_subscriber::registry().with(config.env_filter());

    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    result.map_err(|e| ApiaryError::Internal(format!("Failed to install tracing subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        json = config.json,
        "Telemetry initialized"
    );

    Ok(())
}
