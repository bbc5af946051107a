// Calibration error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Calibration error code constants
///
/// Error code range: 3001-3004
pub struct CalibrationErrorCodes;

impl CalibrationErrorCodes {
    /// Calibration window elapsed before enough audio arrived
    pub const TIMEOUT: i32 = 3001;

    /// Too few samples collected to trust the estimate
    pub const INSUFFICIENT_SAMPLES: i32 = 3002;

    /// Room was too loud to measure a noise floor
    pub const TOO_LOUD: i32 = 3003;

    /// Measured statistics were not finite
    pub const INVALID_MEASUREMENT: i32 = 3004;
}

/// Log a calibration error with structured context
///
/// Calibration faults are never fatal; this records which default the
/// pipeline fell back to.
pub fn log_calibration_error(err: &CalibrationError, context: &str) {
    error!(
        "Calibration error in {}: code={}, component=Calibrator, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Startup calibration faults
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// Wall-clock budget exceeded
    Timeout { elapsed_ms: u64, budget_ms: u64 },

    /// Not enough samples to produce an estimate
    InsufficientSamples { collected: usize, required: usize },

    /// Ambient RMS above the accepted ceiling
    TooLoud { rms: f32, max_allowed: f32 },

    /// NaN/Inf in the accumulated statistics
    InvalidMeasurement { reason: String },
}

impl ErrorCode for CalibrationError {
    fn code(&self) -> i32 {
        match self {
            CalibrationError::Timeout { .. } => CalibrationErrorCodes::TIMEOUT,
            CalibrationError::InsufficientSamples { .. } => {
                CalibrationErrorCodes::INSUFFICIENT_SAMPLES
            }
            CalibrationError::TooLoud { .. } => CalibrationErrorCodes::TOO_LOUD,
            CalibrationError::InvalidMeasurement { .. } => {
                CalibrationErrorCodes::INVALID_MEASUREMENT
            }
        }
    }

    fn message(&self) -> String {
        match self {
            CalibrationError::Timeout {
                elapsed_ms,
                budget_ms,
            } => format!(
                "Calibration timed out after {} ms (budget {} ms)",
                elapsed_ms, budget_ms
            ),
            CalibrationError::InsufficientSamples {
                collected,
                required,
            } => format!(
                "Insufficient calibration samples: {} collected, {} required",
                collected, required
            ),
            CalibrationError::TooLoud { rms, max_allowed } => format!(
                "Ambient level too high for calibration: rms {:.4} > {:.4}",
                rms, max_allowed
            ),
            CalibrationError::InvalidMeasurement { reason } => {
                format!("Invalid calibration measurement: {}", reason)
            }
        }
    }
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CalibrationError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for CalibrationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_error_codes() {
        assert_eq!(
            CalibrationError::Timeout {
                elapsed_ms: 5000,
                budget_ms: 4000
            }
            .code(),
            CalibrationErrorCodes::TIMEOUT
        );
        assert_eq!(
            CalibrationError::InsufficientSamples {
                collected: 10,
                required: 100
            }
            .code(),
            CalibrationErrorCodes::INSUFFICIENT_SAMPLES
        );
        assert_eq!(
            CalibrationError::TooLoud {
                rms: 0.4,
                max_allowed: 0.15
            }
            .code(),
            CalibrationErrorCodes::TOO_LOUD
        );
        assert_eq!(
            CalibrationError::InvalidMeasurement {
                reason: "nan".to_string()
            }
            .code(),
            CalibrationErrorCodes::INVALID_MEASUREMENT
        );
    }

    #[test]
    fn test_calibration_error_messages() {
        let err = CalibrationError::InsufficientSamples {
            collected: 5,
            required: 10,
        };
        assert_eq!(
            err.message(),
            "Insufficient calibration samples: 5 collected, 10 required"
        );

        let err = CalibrationError::Timeout {
            elapsed_ms: 4100,
            budget_ms: 4000,
        };
        assert!(err.message().contains("timed out"));
    }

    #[test]
    fn test_calibration_error_display() {
        let err = CalibrationError::TooLoud {
            rms: 0.3,
            max_allowed: 0.15,
        };
        let display = format!("{}", err);
        assert!(display.contains("CalibrationError"));
        assert!(display.contains(&err.code().to_string()));
    }
}
