//! Error classification traits.
//!
//! Errors describe themselves so callers can decide whether the problem is
//! in their input, their settings, or the graph itself.

use super::common::*;
use super::hub::HubError;

/// Classification of error types for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Permanent errors that won't resolve on retry (invalid input)
    Permanent,
    /// Configuration errors (missing config, invalid settings)
    Configuration,
    /// Internal errors (runaway feedback loops, faulted nodes)
    Internal,
}

/// Trait for errors that can classify themselves.
pub trait ErrorClassification {
    /// Returns the category of this error
    fn category(&self) -> ErrorCategory;

    /// Returns true if this error is permanent and won't succeed on retry
    fn is_permanent(&self) -> bool {
        matches!(self.category(), ErrorCategory::Permanent)
    }

    /// Returns true if the node that raised it needs `reset_fault` or
    /// `reinitialize` before it accepts data again
    fn requires_reset(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

impl ErrorClassification for ConfigurationError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

impl ErrorClassification for ValidationError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Permanent
    }
}

impl ErrorClassification for HubError {
    fn category(&self) -> ErrorCategory {
        match self {
            HubError::Construction { .. } => ErrorCategory::Permanent,
            HubError::NullInput { .. } => ErrorCategory::Permanent,
            HubError::Sequence { .. } => ErrorCategory::Permanent,
            HubError::Overflow { .. } => ErrorCategory::Internal,
            HubError::Faulted { .. } => ErrorCategory::Internal,
            HubError::Config(e) => e.category(),
        }
    }
}
