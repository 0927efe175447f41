//! Application configuration structures.

use crate::BeeSettings;
use apiary_core::{ApiaryError, ApiaryResult, TelemetryConfig};
use serde::{Deserialize, Serialize};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Logging configuration.
    #[serde(default)]
    pub logging: TelemetryConfig,

    /// Metrics exporter configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Per-queue settings keyed by queue name.
    #[serde(default)]
    pub bee: BeeSettings,
}

impl AppConfig {
    /// Parses a configuration from a TOML document.
    pub fn from_toml_str(source: &str) -> ApiaryResult<Self> {
        toml::from_str(source).map_err(|e| ApiaryError::Configuration(e.to_string()))
    }

    /// Names of every queue with a `bee` section.
    pub fn queue_names(&self) -> Vec<String> {
        self.bee.keys().cloned().collect()
    }
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Environment (development, staging, production).
    pub environment: String,
    /// Application root directory; handler manifests live under it.
    pub app_dir: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "apiary".to_string(),
            environment: "development".to_string(),
            app_dir: ".".to_string(),
        }
    }
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Install the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Listen address for the scrape endpoint.
    #[serde(default = "default_metrics_addr")]
    pub listen_addr: String,
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_metrics_addr(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.app.name, "apiary");
        assert!(!config.metrics.enabled);
        assert!(config.bee.is_empty());
    }

    #[test]
    fn test_from_toml_bee_section() {
        let config = AppConfig::from_toml_str(
            r#"
            [bee.emails.queue]
            remove_on_success = true
            stall_interval = 10000

            [bee.emails.queue.connection]
            host = "redis.internal"

            [bee.emails.worker]
            concurrency = 8

            [bee.thumbnails]
            "#,
        )
        .unwrap();

        assert_eq!(config.queue_names(), vec!["emails", "thumbnails"]);

        let emails = &config.bee["emails"];
        assert_eq!(emails.queue.remove_on_success, Some(true));
        assert_eq!(emails.queue.stall_interval, Some(10000));
        assert_eq!(emails.worker.concurrency, Some(8));
        let conn = emails.queue.connection.as_ref().unwrap();
        assert_eq!(conn.host, "redis.internal");
        assert_eq!(conn.port, 6379);

        let thumbnails = &config.bee["thumbnails"];
        assert_eq!(thumbnails.queue.remove_on_success, None);
        assert_eq!(thumbnails.worker.concurrency, None);
    }

    #[test]
    fn test_from_toml_invalid() {
        let err = AppConfig::from_toml_str("[bee.emails.worker]\nconcurrency = \"lots\"").unwrap_err();
        assert!(matches!(err, ApiaryError::Configuration(_)));
    }
}
