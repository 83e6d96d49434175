//! Unified error types for the beacon core library.
//!
//! [`BeaconError`] covers every failure mode of the tracking system. None of them
//! is fatal to the tracking loop: the loop degrades (empty scan, stale cache,
//! missed notification) and keeps running. Module-specific errors such as
//! [`ConfigError`](crate::config::ConfigError) convert into it.
//!
//! # Example
//!
//! ```rust
//! use beacon_core::error::{BeaconError, Result};
//!
//! fn require_radio(available: bool) -> Result<()> {
//!     if !available {
//!         return Err(BeaconError::ScanUnavailable("no adapter".into()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The unified error type for all beacon tracking operations.
#[derive(Debug, Error)]
pub enum BeaconError {
    // =========================================================================
    // SCAN ERRORS
    // =========================================================================
    /// The radio session could not run (no adapter, driver error, feature disabled).
    #[error("Beacon scan unavailable: {0}")]
    ScanUnavailable(String),

    // =========================================================================
    // PERSISTENCE ERRORS
    // =========================================================================
    /// Storage stayed unreachable after the retry bound.
    #[error("Persistence failure for '{key}' after {attempts} attempt(s): {message}")]
    PersistenceFailure {
        /// Storage key that could not be read or written.
        key: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last underlying error message.
        message: String,
    },

    // =========================================================================
    // NOTIFICATION ERRORS
    // =========================================================================
    /// A notification sink was unreachable or rejected the change event.
    #[error("Notification failure: {0}")]
    NotificationFailure(String),

    // =========================================================================
    // SETTINGS ERRORS
    // =========================================================================
    /// A settings mutation field carried a value of the wrong type.
    #[error("Invalid settings field '{field}': expected {expected}")]
    InvalidSettingsField {
        /// Field name as received.
        field: String,
        /// Human-readable expected type.
        expected: &'static str,
    },

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration sources could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // LOW-LEVEL ERRORS
    // =========================================================================
    /// A value could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for beacon operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

impl BeaconError {
    /// Returns `true` if this error comes from the radio side.
    #[inline]
    #[must_use]
    pub const fn is_scan_error(&self) -> bool {
        matches!(self, Self::ScanUnavailable(_))
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ScanUnavailable(_) => "SCAN_UNAVAILABLE",
            Self::PersistenceFailure { .. } => "PERSISTENCE_FAILURE",
            Self::NotificationFailure(_) => "NOTIFICATION_FAILURE",
            Self::InvalidSettingsField { .. } => "INVALID_SETTINGS_FIELD",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for BeaconError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::Load(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<reqwest::Error> for BeaconError {
    fn from(err: reqwest::Error) -> Self {
        Self::NotificationFailure(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    fn persistence_failure() -> BeaconError {
        BeaconError::PersistenceFailure {
            key: "beacons_data".into(),
            attempts: 5,
            message: "disk full".into(),
        }
    }

    #[test]
    fn test_error_classification() {
        assert!(BeaconError::ScanUnavailable("no adapter".into()).is_scan_error());
        assert!(!persistence_failure().is_scan_error());
        assert!(!BeaconError::Io(IoErr::new(ErrorKind::NotFound, "x")).is_scan_error());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            BeaconError::ScanUnavailable("x".into()).error_code(),
            "SCAN_UNAVAILABLE"
        );
        assert_eq!(persistence_failure().error_code(), "PERSISTENCE_FAILURE");
    }

    #[test]
    fn test_error_display_messages() {
        let msg = persistence_failure().to_string();
        assert!(msg.contains("beacons_data"));
        assert!(msg.contains("5 attempt"));

        let err = BeaconError::InvalidSettingsField {
            field: "run_flag".into(),
            expected: "boolean",
        };
        assert!(err.to_string().contains("run_flag"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<BeaconError>();
        assert_sync::<BeaconError>();
    }
}
