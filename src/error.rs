//! Custom error types for the fly-scan library.
//!
//! This module defines the primary error type, `ScanError`, used by every layer
//! between the trajectory compiler and the controller channels. Using the
//! `thiserror` crate, it provides a single place where the failure modes of a
//! scan are named and formatted.
//!
//! ## Error Hierarchy
//!
//! - **`Validation`**: The scan request cannot be mapped onto the hardware: an
//!   axis without a motor, motors spread over several coordinate systems, two
//!   axes on one CS axis letter, a zero duration, an out of range point index.
//! - **`Kinematic`**: A point or ramp asks an axis to move at or above its
//!   `max_velocity`.
//! - **`Convergence`**: The velocity profile solver could not agree on one
//!   shared duration for all axes of a gap, or could not meet the distance
//!   constraint inside the velocity limit.
//! - **`FirmwareMismatch`**: The trajectory program loaded on the controller is
//!   not the version this library writes buffers for.
//! - **`HardwareTimeout`**: A channel read or write did not complete in time.
//! - **`Hardware`**: The controller acknowledged an action with a failure status.
//! - **`InvalidState`**: A controller operation was requested in a state that
//!   does not allow it (e.g. `execute` before the buffer was built).
//! - **`Config`**: Wraps [`ConfigError`](crate::config::ConfigError).
//!
//! Everything up to and including `FirmwareMismatch` is raised before the first
//! buffer write of a scan. Nothing is retried automatically.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Convenience alias for results using the scan error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Kinematic error on axis '{axis}': velocity {velocity} exceeds limit {limit}")]
    Kinematic {
        axis: String,
        velocity: f64,
        limit: f64,
    },

    #[error("Convergence error: {0}")]
    Convergence(String),

    #[error("Firmware mismatch: trajectory program version {found} detected, version {expected} required")]
    FirmwareMismatch { found: f64, expected: f64 },

    #[error("Hardware timeout: {operation} did not complete within {timeout:?}")]
    HardwareTimeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("Invalid scan state: cannot {action} while {state}")]
    InvalidState { action: String, state: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ScanError {
    /// Build a `Validation` error from anything displayable.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True for errors the scan request itself is responsible for, as opposed
    /// to the controller.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Kinematic { .. } | Self::Convergence(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScanError::validation("axis q has no motor");
        assert_eq!(err.to_string(), "Validation error: axis q has no motor");
    }

    #[test]
    fn test_kinematic_error_names_axis_and_limit() {
        let err = ScanError::Kinematic {
            axis: "x".into(),
            velocity: 12.5,
            limit: 10.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("'x'"));
        assert!(msg.contains("12.5"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn test_firmware_mismatch_display() {
        let err = ScanError::FirmwareMismatch {
            found: 1.0,
            expected: 2.0,
        };
        assert!(err.to_string().contains("version 1 detected"));
        assert!(!err.is_request_error());
    }

    #[test]
    fn test_timeout_display() {
        let err = ScanError::HardwareTimeout {
            operation: "build".into(),
            timeout: Duration::from_millis(250),
        };
        assert!(err.to_string().contains("build did not complete within 250ms"));
    }
}
