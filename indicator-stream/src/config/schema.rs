//! Configuration schema types.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigurationError;
use crate::logging::LogConfig;

use super::validation::ConfigValidator;

/// Largest cache bound a hub accepts, and the default when none is given.
pub const MAX_CACHE_SIZE_LIMIT: usize = 1_932_735_282; // 0.9 * i32::MAX

/// Root configuration for a streaming graph.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Cache settings shared by a provider and its hubs
    pub hub: HubConfig,

    /// Tick deduplication settings
    pub dedup: DedupConfig,

    /// Log output settings
    pub logging: LoggingSection,
}

impl StreamConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigurationError::FileNotFound(path.display().to_string()));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| ConfigurationError::Read(format!("{}: {}", path.display(), e)))?;

        let config = Self::from_toml_str(&content)?;
        info!("Loaded stream configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigurationError> {
        let config: StreamConfig =
            toml::from_str(content).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        ConfigValidator::validate(&config)?;
        debug!(
            "Stream configuration: max_cache_size={}, dedup_window={}s, dedup_capacity={}",
            config.hub.max_cache_size, config.dedup.window_secs, config.dedup.capacity
        );
        Ok(config)
    }

    /// Build the logging configuration described by the `[logging]` section.
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            format: self.logging.format.parse().unwrap_or_default(),
            level: self.logging.level.clone(),
            ..LogConfig::default()
        }
    }
}

/// Cache settings for a provider or hub.
///
/// Computing hubs copy the config of their provider at construction, so a
/// whole chain shares one cache bound unless a hub is given its own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HubConfig {
    /// Maximum number of cached items before the oldest are pruned
    pub max_cache_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_cache_size: MAX_CACHE_SIZE_LIMIT,
        }
    }
}

impl HubConfig {
    /// Config with the given cache bound.
    pub fn with_max_cache_size(max_cache_size: usize) -> Self {
        Self { max_cache_size }
    }
}

/// Tick deduplication settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DedupConfig {
    /// Ids older than this (relative to the newest tick) are forgotten
    pub window_secs: u64,
    /// Hard limit on remembered ids; the oldest are evicted first
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            capacity: 10_000,
        }
    }
}

impl DedupConfig {
    /// Dedup window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSection {
    /// pretty, compact or json
    pub format: String,
    /// Default level filter when RUST_LOG is not set
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: "pretty".to_string(),
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;

    #[test]
    fn test_stream_config_default() {
        let config = StreamConfig::default();
        assert_eq!(config.hub.max_cache_size, MAX_CACHE_SIZE_LIMIT);
        assert_eq!(config.dedup.window(), Duration::from_secs(60));
        assert_eq!(config.dedup.capacity, 10_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = StreamConfig::from_toml_str(
            r#"
            [hub]
            max_cache_size = 500

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.hub.max_cache_size, 500);
        assert_eq!(config.dedup, DedupConfig::default());
        assert_eq!(config.log_config().format, LogFormat::Json);
        assert_eq!(config.log_config().level, "info");
    }

    #[test]
    fn test_parse_rejects_invalid_values() {
        let err = StreamConfig::from_toml_str("[hub]\nmax_cache_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));

        let err = StreamConfig::from_toml_str("[hub\n").unwrap_err();
        assert!(matches!(err, ConfigurationError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = StreamConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigurationError::FileNotFound(_)));
    }
}
