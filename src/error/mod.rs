// Error types for the audio feature pipeline
//
// Faults are handled at the lowest layer that can recover from them. Each type
// carries a numeric code so telemetry consumers can aggregate without parsing
// message text.
//
// Code ranges:
// - 1001-1006: capture faults (skip the hop, keep running)
// - 2001-2003: numeric faults (substitute last-good value, count)
// - 3001-3004: calibration faults (fall back to defaults)

mod calibration;
mod capture;
mod numeric;

pub use calibration::{log_calibration_error, CalibrationError, CalibrationErrorCodes};
pub use capture::{log_capture_error, CaptureError, CaptureErrorCodes};
pub use numeric::{NumericFault, NumericFaultCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, so the telemetry surface can report them
/// uniformly.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
