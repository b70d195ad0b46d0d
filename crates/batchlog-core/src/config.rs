//! Configuration structures for batchlog.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.

use crate::event::Layout;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Event cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Cut trigger configuration
    #[serde(default)]
    pub trigger: TriggerConfig,

    /// Destination storage configuration
    pub storage: StorageConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Event cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Cache name, used in every published object key
    #[serde(default = "default_cache_name")]
    pub name: String,

    /// Tags attached to every publish context
    #[serde(default)]
    pub tags: Vec<String>,

    /// Host name recorded in publish contexts (defaults to $HOSTNAME)
    pub host_name: Option<String>,

    /// Layout used to render events into batch objects
    #[serde(default)]
    pub layout: Layout,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: default_cache_name(),
            tags: Vec::new(),
            host_name: None,
            layout: Layout::default(),
        }
    }
}

/// When the live buffer is cut.
///
/// Either rule alone, or both combined (whichever fires first).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TriggerConfig {
    /// Cut after this many events
    pub capacity: Option<usize>,

    /// Cut after this many seconds since the last cut
    pub period_seconds: Option<u64>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            capacity: Some(default_capacity()),
            period_seconds: Some(default_period_seconds()),
        }
    }
}

/// Destination storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// `s3://bucket/prefix` or a local directory
    pub location: String,

    /// AWS region
    pub aws_region: Option<String>,

    /// AWS access key ID
    pub aws_access_key_id: Option<String>,

    /// AWS secret access key
    pub aws_secret_access_key: Option<String>,

    /// S3 endpoint (for MinIO or other S3-compatible storage)
    pub s3_endpoint: Option<String>,
}

impl StorageConfig {
    /// Whether the location points at S3.
    pub fn is_s3(&self) -> bool {
        self.location.starts_with("s3://")
    }

    /// Split `s3://bucket/prefix` into bucket and prefix.
    pub fn s3_bucket_and_prefix(&self) -> Option<(&str, &str)> {
        let rest = self.location.strip_prefix("s3://")?;
        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return None;
        }
        Some((bucket, prefix))
    }
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
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive string for an `EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
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
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions

fn default_cache_name() -> String {
    "batchlog".to_string()
}
fn default_capacity() -> usize {
    1000
}
fn default_period_seconds() -> u64 {
    60
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_health_port() -> u16 {
    8080
}

/// Check that a cache name is usable inside an object key.
pub fn validate_cache_name(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::InvalidConfiguration(
            "cache name is required".into(),
        ));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(crate::Error::InvalidConfiguration(format!(
            "cache name {:?} contains invalid character {:?}",
            name, c
        )));
    }
    Ok(())
}

impl Config {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        validate_cache_name(&self.cache.name)?;

        if self.trigger.capacity.is_none() && self.trigger.period_seconds.is_none() {
            return Err(crate::Error::InvalidConfiguration(
                "trigger requires capacity, period_seconds, or both".into(),
            ));
        }

        if self.trigger.capacity == Some(0) {
            return Err(crate::Error::InvalidConfiguration(
                "trigger.capacity must be greater than zero".into(),
            ));
        }

        if self.trigger.period_seconds == Some(0) {
            return Err(crate::Error::InvalidConfiguration(
                "trigger.period_seconds must be greater than zero".into(),
            ));
        }

        if self.storage.location.is_empty() {
            return Err(crate::Error::InvalidConfiguration(
                "storage.location is required".into(),
            ));
        }

        if self.storage.is_s3() && self.storage.s3_bucket_and_prefix().is_none() {
            return Err(crate::Error::InvalidConfiguration(format!(
                "invalid S3 location: {}",
                self.storage.location
            )));
        }

        if self.storage.is_s3() && self.storage.aws_region.is_none() {
            tracing::warn!("S3 storage without explicit AWS region will use environment defaults");
        }

        Ok(())
    }

    /// Host name for publish contexts: configured value, else `$HOSTNAME`.
    pub fn resolved_host_name(&self) -> Option<String> {
        self.cache
            .host_name
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
    }
}
