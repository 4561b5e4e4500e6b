//! Configuration validation rules.
//!
//! Validation runs before a configuration is handed to any hub, so a bad
//! file never produces a partially built graph.

use crate::error::{ConfigurationError, ValidationError};
use crate::logging::LogFormat;

use super::schema::*;

/// Validates stream configuration values.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate every section, returning the first problem found.
    pub fn validate(config: &StreamConfig) -> Result<(), ConfigurationError> {
        Self::validate_hub(&config.hub).map_err(Self::into_config_error)?;
        Self::validate_dedup(&config.dedup).map_err(Self::into_config_error)?;
        Self::validate_logging(&config.logging)?;
        Ok(())
    }

    /// Cache bound must be within `1..=MAX_CACHE_SIZE_LIMIT`.
    pub fn validate_hub(config: &HubConfig) -> Result<(), ValidationError> {
        if config.max_cache_size == 0 || config.max_cache_size > MAX_CACHE_SIZE_LIMIT {
            return Err(ValidationError::out_of_range(
                "max_cache_size",
                config.max_cache_size,
                1,
                MAX_CACHE_SIZE_LIMIT,
            ));
        }
        Ok(())
    }

    pub fn validate_dedup(config: &DedupConfig) -> Result<(), ValidationError> {
        if config.window_secs == 0 {
            return Err(ValidationError::not_positive("window_secs", config.window_secs));
        }
        if config.capacity == 0 {
            return Err(ValidationError::not_positive("capacity", config.capacity));
        }
        Ok(())
    }

    pub fn validate_logging(config: &LoggingSection) -> Result<(), ConfigurationError> {
        config.format.parse::<LogFormat>()?;
        if config.level.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "logging.level",
                "level must not be empty",
            ));
        }
        Ok(())
    }

    fn into_config_error(err: ValidationError) -> ConfigurationError {
        ConfigurationError::invalid_value(err.field(), err.to_string())
    }
}
