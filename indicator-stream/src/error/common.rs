//! Configuration and validation errors.
//!
//! These cover everything that can go wrong before a hub is built: loading
//! settings files and checking parameter ranges. [`super::HubError`] wraps
//! both with `#[from]`.

use thiserror::Error;

/// Configuration-related errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// Field has invalid value
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// Configuration file could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    /// Configuration file could not be read
    #[error("Failed to read config file: {0}")]
    Read(String),
}

impl ConfigurationError {
    /// Create an InvalidValue error
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigurationError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Parameter validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    /// Value is out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: String,
        min: String,
        max: String,
    },

    /// Value must be strictly positive
    #[error("{field} must be greater than zero, got {value}")]
    NotPositive { field: &'static str, value: String },
}

impl ValidationError {
    /// Create an OutOfRange validation error
    pub fn out_of_range(
        field: &'static str,
        value: impl ToString,
        min: impl ToString,
        max: impl ToString,
    ) -> Self {
        ValidationError::OutOfRange {
            field,
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }

    /// Create a NotPositive validation error
    pub fn not_positive(field: &'static str, value: impl ToString) -> Self {
        ValidationError::NotPositive {
            field,
            value: value.to_string(),
        }
    }

    /// Name of the offending field
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::OutOfRange { field, .. } => field,
            ValidationError::NotPositive { field, .. } => field,
        }
    }
}
