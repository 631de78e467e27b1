//! Application configuration management.

use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Outbox dispatcher configuration.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Advisory lock and idempotency configuration.
    #[serde(default)]
    pub locks: LockConfig,
    /// Outbox publisher configuration.
    #[serde(default)]
    pub publisher: PublisherConfig,
    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Outbox dispatcher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Delay between poll cycles in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum number of records claimed per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Attempts after which a record is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    /// Seconds after which a PROCESSING claim is considered abandoned.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    /// First retry delay in seconds.
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,
    /// Upper bound for the retry delay in seconds.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Identifier stamped on claimed rows. Generated when absent.
    #[serde(default)]
    pub worker_id: Option<String>,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_batch_size() -> u64 {
    50
}

fn default_max_attempts() -> i32 {
    20
}

fn default_lock_timeout_secs() -> u64 {
    300 // 5 minutes
}

fn default_base_backoff_secs() -> u64 {
    5
}

fn default_max_backoff_secs() -> u64 {
    600 // 10 minutes
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            lock_timeout_secs: default_lock_timeout_secs(),
            base_backoff_secs: default_base_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            worker_id: None,
        }
    }
}

/// Advisory lock and idempotency configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Maximum wait for a posting or rebuild lock, in seconds.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Seconds a STARTED idempotency key is considered alive.
    #[serde(default = "default_idempotency_liveness_secs")]
    pub idempotency_liveness_secs: u64,
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_idempotency_liveness_secs() -> u64 {
    300 // 5 minutes
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_secs: default_acquire_timeout_secs(),
            idempotency_liveness_secs: default_idempotency_liveness_secs(),
        }
    }
}

/// Which transport the outbox dispatcher publishes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PublisherKind {
    /// Write each record to the log (development).
    #[default]
    Log,
    /// POST each record as JSON to an HTTP endpoint.
    Webhook,
}

/// Outbox publisher configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PublisherConfig {
    /// Transport selection.
    #[serde(default)]
    pub kind: PublisherKind,
    /// Endpoint for the webhook publisher.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Request timeout for the webhook publisher, in seconds.
    #[serde(default = "default_publish_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_publish_timeout_secs() -> u64 {
    10
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LogConfig {
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("TALLY").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
