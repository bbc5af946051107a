// Capture error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Capture error code constants
///
/// Error code range: 1001-1006
pub struct CaptureErrorCodes;

impl CaptureErrorCodes {
    /// Capture queue overflowed and samples were lost
    pub const OVERRUN: i32 = 1001;

    /// No chunk arrived within the capture wait budget
    pub const TIMEOUT: i32 = 1002;

    /// Driver reported a fault on the input stream
    pub const DRIVER_FAULT: i32 = 1003;

    /// Failed to open the input device or stream
    pub const STREAM_OPEN_FAILED: i32 = 1004;

    /// Capture side of the queue was dropped
    pub const DISCONNECTED: i32 = 1005;

    /// Finite source (file replay, synthetic run) has no more samples
    pub const SOURCE_EXHAUSTED: i32 = 1006;
}

/// Log a capture error with structured context
///
/// Called once per skipped hop; callers rate-limit when faults repeat.
pub fn log_capture_error(err: &CaptureError, context: &str) {
    error!(
        "Capture error in {}: code={}, component=SampleSource, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Faults raised while pulling the next sample chunk
///
/// Every variant except `Disconnected` and `SourceExhausted` is recoverable:
/// the hop is skipped and counted, never filled with substitute samples.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// Queue was full when the capture side tried to push
    Overrun { dropped_chunks: u64 },

    /// No chunk within the wait budget
    Timeout { waited_ms: u64 },

    /// Driver-level stream error
    DriverFault { details: String },

    /// Input device or stream could not be opened
    StreamOpenFailed { reason: String },

    /// Capture thread went away
    Disconnected,

    /// End of a finite source
    SourceExhausted,
}

impl CaptureError {
    /// Whether the producer loop can keep running after this fault
    ///
    /// Total loss of the capture source is the only condition that stops the
    /// loop; a supervisor is expected to rebuild the pipeline.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CaptureError::Disconnected
                | CaptureError::SourceExhausted
                | CaptureError::StreamOpenFailed { .. }
        )
    }
}

impl ErrorCode for CaptureError {
    fn code(&self) -> i32 {
        match self {
            CaptureError::Overrun { .. } => CaptureErrorCodes::OVERRUN,
            CaptureError::Timeout { .. } => CaptureErrorCodes::TIMEOUT,
            CaptureError::DriverFault { .. } => CaptureErrorCodes::DRIVER_FAULT,
            CaptureError::StreamOpenFailed { .. } => CaptureErrorCodes::STREAM_OPEN_FAILED,
            CaptureError::Disconnected => CaptureErrorCodes::DISCONNECTED,
            CaptureError::SourceExhausted => CaptureErrorCodes::SOURCE_EXHAUSTED,
        }
    }

    fn message(&self) -> String {
        match self {
            CaptureError::Overrun { dropped_chunks } => {
                format!("Capture queue overrun ({} chunks dropped)", dropped_chunks)
            }
            CaptureError::Timeout { waited_ms } => {
                format!("No capture chunk within {} ms", waited_ms)
            }
            CaptureError::DriverFault { details } => format!("Driver fault: {}", details),
            CaptureError::StreamOpenFailed { reason } => {
                format!("Failed to open capture stream: {}", reason)
            }
            CaptureError::Disconnected => "Capture source disconnected".to_string(),
            CaptureError::SourceExhausted => "Capture source exhausted".to_string(),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CaptureError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for CaptureError {}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::DriverFault {
            details: err.to_string(),
        }
    }
}
