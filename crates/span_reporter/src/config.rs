//! Reporter configuration.
//!
//! Values come from [`ReporterConfig::default`], a deserialized document
//! (`#[serde(default)]`, so partial documents work), or environment
//! variables via [`ReporterConfig::from_env`]. The config is validated once
//! when the reporter is built and never changes afterwards.

use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const FLUSH_DELAY_MS_ENV: &str = "SPAN_REPORTER_FLUSH_DELAY_MS";
pub const MAX_BATCH_SIZE_ENV: &str = "SPAN_REPORTER_MAX_BATCH_SIZE";
pub const MAX_QUEUE_SIZE_ENV: &str = "SPAN_REPORTER_MAX_QUEUE_SIZE";
pub const ASYNC_ENV: &str = "SPAN_REPORTER_ASYNC";
pub const LOG_ONLY_ENV: &str = "SPAN_REPORTER_LOG_ONLY";
pub const EXPORT_TIMEOUT_MS_ENV: &str = "SPAN_REPORTER_EXPORT_TIMEOUT_MS";
pub const URL_ENV: &str = "SPAN_REPORTER_URL";
pub const INDEX_PREFIX_ENV: &str = "SPAN_REPORTER_INDEX_PREFIX";

/// Errors raised while building or validating a configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_batch_size must be greater than zero")]
    ZeroBatchSize,
    #[error("max_queue_size must be greater than zero")]
    ZeroQueueSize,
    #[error("flush_delay_ms must be greater than zero")]
    ZeroFlushDelay,
    #[error("max_batch_size ({batch}) exceeds max_queue_size ({queue})")]
    BatchLargerThanQueue { batch: usize, queue: usize },
    #[error("invalid value {value:?} for {name}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Configuration for the span reporter
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Interval of the periodic flush in milliseconds
    pub flush_delay_ms: u64,
    /// Maximum spans per bulk request; also the early-flush threshold
    pub max_batch_size: usize,
    /// Maximum number of spans waiting for a flush
    pub max_queue_size: usize,
    /// `false` makes every report wait for one flush cycle
    pub async_mode: bool,
    /// Write spans to the log instead of the destination
    pub log_only_mode: bool,
    /// Upper bound for one bulk request in milliseconds
    pub export_timeout_ms: u64,
    /// Base URL of the destination
    pub url: String,
    /// Index name prefix; the UTC date is appended per flush
    pub index_prefix: String,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            flush_delay_ms: 1_000,
            max_batch_size: 100,
            max_queue_size: 10_000,
            async_mode: true,
            log_only_mode: false,
            export_timeout_ms: 10_000,
            url: "http://localhost:9200".to_string(),
            index_prefix: "spans".to_string(),
        }
    }
}

impl ReporterConfig {
    /// Defaults overridden by `SPAN_REPORTER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the
    /// `SPAN_REPORTER_*` names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, FLUSH_DELAY_MS_ENV)? {
            config.flush_delay_ms = v;
        }
        if let Some(v) = parse_var(&lookup, MAX_BATCH_SIZE_ENV)? {
            config.max_batch_size = v;
        }
        if let Some(v) = parse_var(&lookup, MAX_QUEUE_SIZE_ENV)? {
            config.max_queue_size = v;
        }
        if let Some(v) = parse_var(&lookup, ASYNC_ENV)? {
            config.async_mode = v;
        }
        if let Some(v) = parse_var(&lookup, LOG_ONLY_ENV)? {
            config.log_only_mode = v;
        }
        if let Some(v) = parse_var(&lookup, EXPORT_TIMEOUT_MS_ENV)? {
            config.export_timeout_ms = v;
        }
        if let Some(v) = lookup(URL_ENV) {
            config.url = v;
        }
        if let Some(v) = lookup(INDEX_PREFIX_ENV) {
            config.index_prefix = v;
        }

        Ok(config)
    }

    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_ms)
    }

    /// Checks the invariants the reporter relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        if self.flush_delay_ms == 0 {
            return Err(ConfigError::ZeroFlushDelay);
        }
        if self.max_batch_size > self.max_queue_size {
            return Err(ConfigError::BatchLargerThanQueue {
                batch: self.max_batch_size,
                queue: self.max_queue_size,
            });
        }
        Ok(())
    }

    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn with_async_mode(mut self, async_mode: bool) -> Self {
        self.async_mode = async_mode;
        self
    }

    pub fn with_log_only_mode(mut self, log_only: bool) -> Self {
        self.log_only_mode = log_only;
        self
    }

    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_index_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.index_prefix = prefix.into();
        self
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = ReporterConfig::default();
        assert_eq!(config.flush_delay(), Duration::from_secs(1));
        assert!(config.async_mode);
        assert!(!config.log_only_mode);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_inconsistent_sizes() {
        let config = ReporterConfig::default().with_max_batch_size(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroBatchSize));

        let config = ReporterConfig::default()
            .with_max_batch_size(50)
            .with_max_queue_size(10);
        assert_eq!(
            config.validate(),
            Err(ConfigError::BatchLargerThanQueue {
                batch: 50,
                queue: 10
            })
        );

        let config = ReporterConfig::default().with_flush_delay(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroFlushDelay));
    }

    #[test]
    fn test_from_lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            (FLUSH_DELAY_MS_ENV, "250"),
            (MAX_BATCH_SIZE_ENV, "2"),
            (MAX_QUEUE_SIZE_ENV, " 10 "),
            (ASYNC_ENV, "false"),
            (INDEX_PREFIX_ENV, "traces"),
        ]
        .into_iter()
        .collect();

        let config =
            ReporterConfig::from_lookup(|name| vars.get(name).map(|v| (*v).to_string())).unwrap();
        assert_eq!(config.flush_delay_ms, 250);
        assert_eq!(config.max_batch_size, 2);
        assert_eq!(config.max_queue_size, 10);
        assert!(!config.async_mode);
        assert_eq!(config.index_prefix, "traces");
        assert_eq!(config.url, "http://localhost:9200");
    }

    #[test]
    fn test_from_lookup_reports_bad_values() {
        let err = ReporterConfig::from_lookup(|name| {
            (name == MAX_QUEUE_SIZE_ENV).then(|| "lots".to_string())
        })
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidEnv {
                name: MAX_QUEUE_SIZE_ENV,
                value: "lots".to_string()
            }
        );
    }

    #[test]
    fn test_deserialize_partial_document() {
        let config: ReporterConfig =
            serde_json::from_str(r#"{"max_batch_size": 500, "log_only_mode": true}"#).unwrap();
        assert_eq!(config.max_batch_size, 500);
        assert!(config.log_only_mode);
        assert_eq!(config.max_queue_size, 10_000);
    }
}
