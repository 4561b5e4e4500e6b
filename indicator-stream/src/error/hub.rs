//! Errors raised by providers and hubs.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::common::{ConfigurationError, ValidationError};

/// Number of identical consecutive arrivals a node tolerates before it
/// treats the stream as a runaway feedback loop.
pub const OVERFLOW_THRESHOLD: u32 = 100;

/// Result alias used across the streaming graph.
pub type HubResult<T> = Result<T, HubError>;

/// Errors raised by stream providers and hubs.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum HubError {
    /// Invalid construction parameters (non-positive periods and the like)
    #[error("Invalid parameter '{parameter}': {reason}")]
    Construction { parameter: String, reason: String },

    /// A required argument or upstream provider is absent
    #[error("Required argument '{argument}' is missing")]
    NullInput { argument: &'static str },

    /// Timestamps out of order, duplicated, or missing from a provider
    #[error("Sequence error at {timestamp}: {reason}")]
    Sequence {
        timestamp: DateTime<Utc>,
        reason: String,
    },

    /// Identical arrivals exceeded the repeat threshold
    #[error(
        "{hub}: a repeated stream update exceeded the {threshold} attempt threshold. \
         Check and remove circular chains or check your stream provider. Provider terminated."
    )]
    Overflow { hub: String, threshold: u32 },

    /// Mutation attempted on a node that faulted earlier
    #[error("{hub} is faulted; reset the fault before sending more data")]
    Faulted { hub: String },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigurationError),
}

/// Settings handed straight to a constructor are construction parameters.
impl From<ValidationError> for HubError {
    fn from(err: ValidationError) -> Self {
        HubError::construction(err.field(), err.to_string())
    }
}

impl HubError {
    /// Create a Construction error
    pub fn construction(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        HubError::Construction {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Create a NullInput error
    pub fn null_input(argument: &'static str) -> Self {
        HubError::NullInput { argument }
    }

    /// Create a Sequence error
    pub fn sequence(timestamp: DateTime<Utc>, reason: impl Into<String>) -> Self {
        HubError::Sequence {
            timestamp,
            reason: reason.into(),
        }
    }

    /// Create an Overflow error for the named hub
    pub fn overflow(hub: impl Into<String>) -> Self {
        HubError::Overflow {
            hub: hub.into(),
            threshold: OVERFLOW_THRESHOLD,
        }
    }

    /// Create a Faulted error for the named hub
    pub fn faulted(hub: impl Into<String>) -> Self {
        HubError::Faulted { hub: hub.into() }
    }

    /// Returns true for the fatal repeat-overflow condition
    pub fn is_overflow(&self) -> bool {
        matches!(self, HubError::Overflow { .. })
    }
}
