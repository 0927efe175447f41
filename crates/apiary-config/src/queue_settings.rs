//! Per-queue user settings, as written in the `bee` configuration section.
//!
//! Every field is optional. Absent keys are filled from the documented
//! defaults when the job runtime resolves a queue's configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The `bee` section: queue name to its user-supplied settings.
pub type BeeSettings = BTreeMap<String, QueueSettings>;

/// Settings for a single named queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Queue/broker options.
    #[serde(default)]
    pub queue: QueueOverrides,

    /// Worker options.
    #[serde(default)]
    pub worker: WorkerOverrides,
}

/// User overrides for queue options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueOverrides {
    /// Key prefix for the queue's broker keys.
    #[serde(default)]
    pub prefix: Option<String>,

    /// Milliseconds before a claimed job is considered stalled.
    #[serde(default, alias = "stallInterval")]
    pub stall_interval: Option<u64>,

    /// Milliseconds horizon for near-term delayed jobs.
    #[serde(default, alias = "nearTermWindow")]
    pub near_term_window: Option<u64>,

    /// Milliseconds debounce for delayed-job polling.
    #[serde(default, alias = "delayedDebounce")]
    pub delayed_debounce: Option<u64>,

    /// Broker connection. Replaces the default connection as a whole.
    #[serde(default, alias = "redis")]
    pub connection: Option<ConnectionSettings>,

    #[serde(default, alias = "isWorker")]
    pub is_worker: Option<bool>,

    #[serde(default, alias = "getEvents")]
    pub get_events: Option<bool>,

    #[serde(default, alias = "sendEvents")]
    pub send_events: Option<bool>,

    #[serde(default, alias = "storeJobs")]
    pub store_jobs: Option<bool>,

    #[serde(default, alias = "ensureScripts")]
    pub ensure_scripts: Option<bool>,

    #[serde(default, alias = "activateDelayedJobs")]
    pub activate_delayed_jobs: Option<bool>,

    #[serde(default, alias = "removeOnSuccess")]
    pub remove_on_success: Option<bool>,

    #[serde(default, alias = "removeOnFailure")]
    pub remove_on_failure: Option<bool>,

    /// Batch size for scans against the broker.
    #[serde(default, alias = "redisScanCount", alias = "scanCount")]
    pub scan_count: Option<u64>,
}

/// User overrides for worker options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerOverrides {
    /// Maximum number of jobs in flight for the queue.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

/// Broker connection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub db: i64,

    /// Extra client options, passed through as URL query parameters.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db: 0,
            options: BTreeMap::new(),
        }
    }
}

impl ConnectionSettings {
    /// Renders the connection as a `redis://` URL.
    pub fn url(&self) -> String {
        let mut url = format!("redis://{}:{}/{}", self.host, self.port, self.db);
        if !self.options.is_empty() {
            let query: Vec<String> = self
                .options
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_url() {
        let conn = ConnectionSettings::default();
        assert_eq!(conn.url(), "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn test_connection_url_with_options() {
        let mut conn = ConnectionSettings {
            host: "redis.internal".to_string(),
            db: 2,
            ..ConnectionSettings::default()
        };
        conn.options.insert("protocol".to_string(), "resp3".to_string());
        assert_eq!(conn.url(), "redis://redis.internal:6379/2?protocol=resp3");
    }

    #[test]
    fn test_partial_connection_keeps_defaults() {
        let conn: ConnectionSettings = serde_json::from_str(r#"{"host": "10.0.0.5"}"#).unwrap();
        assert_eq!(conn.host, "10.0.0.5");
        assert_eq!(conn.port, 6379);
        assert_eq!(conn.db, 0);
    }

    #[test]
    fn test_camel_case_aliases() {
        let overrides: QueueOverrides = serde_json::from_str(
            r#"{"stallInterval": 1000, "removeOnSuccess": true, "redisScanCount": 50}"#,
        )
        .unwrap();
        assert_eq!(overrides.stall_interval, Some(1000));
        assert_eq!(overrides.remove_on_success, Some(true));
        assert_eq!(overrides.scan_count, Some(50));
        assert_eq!(overrides.prefix, None);
    }

    #[test]
    fn test_empty_section() {
        let settings: QueueSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, QueueSettings::default());
    }
}
