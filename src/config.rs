use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.jobtrail.dev";

/// How a client ships completed jobs' events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Each job's events are sent in one request when the job completes.
    #[default]
    PerJob,
    /// Events from all jobs accumulate in a shared buffer that is flushed on
    /// a timer or when it reaches `batch_size`.
    Batch,
}

/// Serializable client settings.
///
/// Every field except the API key has a default, so a config file only needs
/// to name what it changes. Apply it with
/// [`ClientBuilder::config`](crate::ClientBuilder::config).
///
/// # Example
///
/// ```rust
/// use jobtrail::{ClientConfig, DeliveryMode};
///
/// let config: ClientConfig = serde_json::from_str(
///     r#"{"api_key": "jt_live_123", "mode": "batch", "batch_size": 50}"#,
/// ).unwrap();
///
/// assert_eq!(config.mode, DeliveryMode::Batch);
/// assert_eq!(config.batch_size, 50);
/// assert_eq!(config.max_retries, 3);
///
/// let client = jobtrail::Client::builder().config(config).build().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Bearer credential for the ingestion endpoint. Required.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base address of the ingestion service.
    /// Default: "https://api.jobtrail.dev"
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub mode: DeliveryMode,

    /// Batch mode: period of the background flush, in milliseconds.
    /// Default: 5000
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Batch mode: buffer length that triggers an immediate flush.
    /// Default: 100
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Retries after the first attempt of each delivery.
    /// Default: 3
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-attempt request timeout, in milliseconds.
    /// Default: 10000
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Suppress all network activity.
    #[serde(default)]
    pub disabled: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            mode: DeliveryMode::default(),
            flush_interval_ms: default_flush_interval_ms(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            request_timeout_ms: default_request_timeout_ms(),
            disabled: false,
        }
    }
}

impl ClientConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Default value functions for serde
// ---------------------------------------------------------------------------

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_flush_interval_ms() -> u64 {
    5000
}

fn default_batch_size() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout_ms() -> u64 {
    10_000
}
