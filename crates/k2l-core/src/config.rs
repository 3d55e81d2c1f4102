//! Configuration structures for k2l.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted for the default lake path.
pub const LAKE_PATH_ENV: &str = "K2L_LAKE_PATH";

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Kafka source configuration
    pub kafka: KafkaConfig,

    /// Lake configuration
    #[serde(default)]
    pub lake: LakeConfig,

    /// Sync loop configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Kafka source configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: Vec<String>,

    /// Topic to copy
    pub topic: String,

    /// Partition to copy
    #[serde(default)]
    pub partition: i32,

    /// Group id reported to the broker (offsets are never committed)
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Where to start when the lake is empty
    #[serde(default)]
    pub start_offset: StartOffset,

    /// Timeout for metadata and watermark requests in milliseconds
    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,

    /// Security configuration
    #[serde(default)]
    pub security: KafkaSecurityConfig,
}

impl KafkaConfig {
    /// Minimal configuration for one topic.
    pub fn new(bootstrap_servers: Vec<String>, topic: impl Into<String>) -> Self {
        Self {
            bootstrap_servers,
            topic: topic.into(),
            partition: 0,
            group_id: default_group_id(),
            start_offset: StartOffset::default(),
            metadata_timeout_ms: default_metadata_timeout_ms(),
            security: KafkaSecurityConfig::default(),
        }
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }
}

/// Source position used when the lake holds no records yet.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    /// Start from the earliest retained offset
    #[default]
    Earliest,
    /// Start from the end of the partition
    Latest,
}

/// Kafka security configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KafkaSecurityConfig {
    /// Security protocol (PLAINTEXT, SSL, SASL_SSL, SASL_PLAINTEXT)
    pub protocol: Option<String>,

    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512)
    pub sasl_mechanism: Option<String>,

    /// SASL username
    pub sasl_username: Option<String>,

    /// SASL password
    pub sasl_password: Option<String>,

    /// SSL CA certificate location
    pub ssl_ca_location: Option<PathBuf>,
}

/// Lake configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LakeConfig {
    /// Lake root directory
    #[serde(default = "default_lake_path")]
    pub path: PathBuf,

    /// fsync segments and journal entries before acknowledging a commit
    #[serde(default = "default_fsync")]
    pub fsync: bool,
}

impl Default for LakeConfig {
    fn default() -> Self {
        Self {
            path: default_lake_path(),
            fsync: default_fsync(),
        }
    }
}

/// Sync loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Byte threshold for a single batch read
    #[serde(default = "default_batch_threshold_bytes")]
    pub batch_threshold_bytes: usize,

    /// Timeout for a single batch read in milliseconds
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Whether the high-water bound is captured once or refreshed per batch
    #[serde(default)]
    pub high_water_policy: HighWaterPolicy,

    /// Pause between syncs in watch mode
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    /// Retries of a failed sync (retryable errors only)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial retry backoff in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Maximum retry backoff in milliseconds
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_threshold_bytes: default_batch_threshold_bytes(),
            batch_timeout_ms: default_batch_timeout_ms(),
            high_water_policy: HighWaterPolicy::default(),
            interval_seconds: default_interval_seconds(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl SyncConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// How a sync bounds its work.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HighWaterPolicy {
    /// Capture the high-water mark once when the sync starts (default)
    #[default]
    Snapshot,
    /// Re-query the high-water mark after each committed batch
    Repoll,
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Metrics HTTP port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Health check HTTP port
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            health_port: default_health_port(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    /// Info level (default)
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_group_id() -> String {
    "k2l".into()
}
fn default_metadata_timeout_ms() -> u64 {
    10_000
}
fn default_lake_path() -> PathBuf {
    std::env::var_os(LAKE_PATH_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./lake"))
}
fn default_fsync() -> bool {
    true
}
fn default_batch_threshold_bytes() -> usize {
    10 * 1024 * 1024 // 10 MiB
}
fn default_batch_timeout_ms() -> u64 {
    5000
}
fn default_interval_seconds() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_retry_max_delay_ms() -> u64 {
    30_000
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_health_port() -> u16 {
    8080
}

impl Config {
    /// Configuration for one topic with every other setting defaulted.
    pub fn for_topic(bootstrap_servers: Vec<String>, topic: impl Into<String>) -> Self {
        Self {
            kafka: KafkaConfig::new(bootstrap_servers, topic),
            lake: LakeConfig::default(),
            sync: SyncConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.kafka.bootstrap_servers.is_empty() {
            return Err(crate::Error::Config(
                "At least one bootstrap server required".into(),
            ));
        }

        if self.kafka.topic.is_empty() {
            return Err(crate::Error::Config("Kafka topic is required".into()));
        }

        if self.kafka.partition < 0 {
            return Err(crate::Error::Config(format!(
                "Partition must be non-negative, got {}",
                self.kafka.partition
            )));
        }

        if self.kafka.group_id.is_empty() {
            return Err(crate::Error::Config("Group id is required".into()));
        }

        if self.lake.path.as_os_str().is_empty() {
            return Err(crate::Error::Config("Lake path is required".into()));
        }

        if self.sync.batch_threshold_bytes == 0 {
            return Err(crate::Error::Config(
                "batch_threshold_bytes must be greater than zero".into(),
            ));
        }

        if self.sync.batch_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "batch_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.sync.retry_base_delay_ms > self.sync.retry_max_delay_ms {
            return Err(crate::Error::Config(
                "retry_base_delay_ms must not exceed retry_max_delay_ms".into(),
            ));
        }

        if !self.lake.fsync {
            tracing::warn!("Lake fsync disabled; commits may be lost on power failure");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_config() -> Config {
        let mut config = Config::for_topic(vec!["localhost:9092".into()], "events");
        config.lake.path = PathBuf::from("/tmp/k2l-lake");
        config
    }

    #[test]
    fn test_default_sync_config() {
        let config = SyncConfig::default();
        assert_eq!(config.batch_threshold_bytes, 10 * 1024 * 1024);
        assert_eq!(config.batch_timeout(), Duration::from_secs(5));
        assert_eq!(config.high_water_policy, HighWaterPolicy::Snapshot);
        assert_eq!(config.interval_seconds, 30);
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_config_validation() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_servers() {
        let mut config = test_config();
        config.kafka.bootstrap_servers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_threshold() {
        let mut config = test_config();
        config.sync.batch_threshold_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.sync.batch_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_negative_partition() {
        let mut config = test_config();
        config.kafka.partition = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_monitoring_config() {
        let config = MonitoringConfig::default();
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.health_port, 8080);
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_minimal_toml() {
        let config: Config = toml::from_str(
            r#"
            [kafka]
            bootstrap_servers = ["broker:9092"]
            topic = "orders"
            "#,
        )
        .unwrap();

        assert_eq!(config.kafka.partition, 0);
        assert_eq!(config.kafka.group_id, "k2l");
        assert_eq!(config.kafka.start_offset, StartOffset::Earliest);
        assert_eq!(config.kafka.metadata_timeout(), Duration::from_secs(10));
        assert!(config.lake.fsync);
        assert_eq!(config.sync.batch_timeout_ms, 5000);
    }

    #[test]
    fn test_full_toml() {
        let config: Config = toml::from_str(
            r#"
            [kafka]
            bootstrap_servers = ["a:9092", "b:9092"]
            topic = "orders"
            partition = 3
            start_offset = "latest"

            [lake]
            path = "/data/lake"
            fsync = false

            [sync]
            batch_threshold_bytes = 1024
            batch_timeout_ms = 250
            high_water_policy = "repoll"

            [monitoring]
            log_level = "debug"
            log_format = "text"
            "#,
        )
        .unwrap();

        assert_eq!(config.kafka.partition, 3);
        assert_eq!(config.kafka.start_offset, StartOffset::Latest);
        assert_eq!(config.lake.path, PathBuf::from("/data/lake"));
        assert!(!config.lake.fsync);
        assert_eq!(config.sync.high_water_policy, HighWaterPolicy::Repoll);
        assert_eq!(config.sync.batch_timeout(), Duration::from_millis(250));
        assert_eq!(config.monitoring.log_level.as_str(), "debug");
        assert_eq!(config.monitoring.log_format, LogFormat::Text);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[kafka]\nbootstrap_servers = [\"localhost:9092\"]\ntopic = \"t\"\n\n[lake]\npath = \"/tmp/l\""
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.kafka.topic, "t");

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "[kafka]\nbootstrap_servers = []\ntopic = \"t\"").unwrap();
        assert!(matches!(
            Config::from_file(bad.path()),
            Err(crate::Error::Config(_))
        ));
    }
}
