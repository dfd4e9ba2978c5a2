//! Unified error types for the rollcall core library.
//!
//! This module provides a unified error type [`RollcallError`] that covers all failure
//! modes of the proximity core. Boundary modules keep their own specific error types
//! ([`PlatformError`](crate::platform::PlatformError), [`SinkError`](crate::sink::SinkError),
//! [`ConfigError`](crate::config::ConfigError)) and convert into this one.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Retry-aware**: Callers can tell caller errors from transient radio failures
//! - **HTTP-ready**: Error types include HTTP status codes and error codes
//!
//! # Example
//!
//! ```rust
//! use rollcall_core::error::{Result, RollcallError};
//!
//! fn require_non_negative(expected: i64) -> Result<u32> {
//!     u32::try_from(expected)
//!         .map_err(|_| RollcallError::InvalidInput(format!("negative headcount {expected}")))
//! }
//! assert!(require_non_negative(-1).is_err());
//! ```

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// The two radio activities guarded by single-session invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Outgoing advertisement.
    Advertising,
    /// Bounded discovery scan.
    Scanning,
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Advertising => f.write_str("advertising"),
            Self::Scanning => f.write_str("scanning"),
        }
    }
}

/// The unified error type for all rollcall operations.
#[derive(Debug, Error)]
pub enum RollcallError {
    // =========================================================================
    // CALLER ERRORS
    // =========================================================================
    /// Malformed identity or advertisement payload.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Invalid argument to a pure computation (e.g. a negative headcount).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A second advertisement or scan was requested while one is running.
    #[error("Already {0}. Stop the current session first.")]
    AlreadyActive(Activity),

    // =========================================================================
    // PLATFORM ERRORS
    // =========================================================================
    /// The user or OS declined one or more required permissions.
    #[error("{group} permissions denied: {}", .denied.join(", "))]
    PermissionDenied {
        /// Name of the permission group that was requested.
        group: String,
        /// Permissions that were not granted, in request order.
        denied: Vec<String>,
    },

    /// BLE advertising or scanning is not available on this device.
    #[error("BLE {activity} is not supported on this device: {reason}")]
    PlatformUnsupported {
        /// Which capability is missing.
        activity: Activity,
        /// Platform-provided explanation.
        reason: String,
    },

    /// The platform radio rejected an operation. Usually transient.
    #[error("Bluetooth platform error: {0}")]
    Platform(String),

    // =========================================================================
    // CONFIGURATION & I/O ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for rollcall operations.
pub type Result<T> = std::result::Result<T, RollcallError>;

impl RollcallError {
    /// Returns `true` if the caller supplied bad input and retrying the same call is pointless.
    #[inline]
    #[must_use]
    pub const fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPayload(_) | Self::InvalidInput(_) | Self::AlreadyActive(_)
        )
    }

    /// Returns `true` if this error is related to the Bluetooth platform.
    #[inline]
    #[must_use]
    pub const fn is_platform_error(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. } | Self::PlatformUnsupported { .. } | Self::Platform(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if the same operation may succeed when retried later.
    ///
    /// Unsupported hardware and permission denials are never retried automatically.
    #[inline]
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Platform(_))
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::InvalidPayload(_) | Self::InvalidInput(_) => 400,

            // 403 Forbidden - permission refused
            Self::PermissionDenied { .. } => 403,

            // 404 Not Found
            Self::ConfigNotFound(_) => 404,

            // 409 Conflict - radio already busy
            Self::AlreadyActive(_) => 409,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error
            Self::IoError(_) => 500,

            // 501 Not Implemented - hardware cannot do this at all
            Self::PlatformUnsupported { .. } => 501,

            // 503 Service Unavailable - radio hiccup
            Self::Platform(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::AlreadyActive(_) => "ALREADY_ACTIVE",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::PlatformUnsupported { .. } => "PLATFORM_UNSUPPORTED",
            Self::Platform(_) => "PLATFORM_ERROR",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for RollcallError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::Load(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::Serialize(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::Write { path, source } => Self::IoError(std::io::Error::new(
                source.kind(),
                format!("Failed to write {}: {source}", path.display()),
            )),
            ConfigError::Validation(problems) => Self::ConfigValidationError(problems.join("; ")),
        }
    }
}

impl From<crate::platform::PlatformError> for RollcallError {
    fn from(err: crate::platform::PlatformError) -> Self {
        Self::Platform(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
