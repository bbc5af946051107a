// Numeric fault classification

use crate::error::ErrorCode;
use std::fmt;

/// Numeric fault code constants
///
/// Error code range: 2001-2003
pub struct NumericFaultCodes;

impl NumericFaultCodes {
    /// A frequency bin produced NaN or infinity
    pub const NON_FINITE_BIN: i32 = 2001;

    /// Tempo output was NaN or infinite
    pub const NON_FINITE_TEMPO: i32 = 2002;

    /// A value was finite but outside its documented range
    pub const OUT_OF_RANGE: i32 = 2003;
}

/// NaN/Inf/out-of-range value caught inside the producer chain
///
/// Never returned to callers. The stage that catches it substitutes a safe
/// value and records the fault in the frame metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericFault {
    NonFiniteBin { bin: usize },
    NonFiniteTempo,
    OutOfRange { field: &'static str, value: f32 },
}

impl ErrorCode for NumericFault {
    fn code(&self) -> i32 {
        match self {
            NumericFault::NonFiniteBin { .. } => NumericFaultCodes::NON_FINITE_BIN,
            NumericFault::NonFiniteTempo => NumericFaultCodes::NON_FINITE_TEMPO,
            NumericFault::OutOfRange { .. } => NumericFaultCodes::OUT_OF_RANGE,
        }
    }

    fn message(&self) -> String {
        match self {
            NumericFault::NonFiniteBin { bin } => {
                format!("Bin {} magnitude was not finite; clamped to 0", bin)
            }
            NumericFault::NonFiniteTempo => {
                "Tempo output was not finite; kept last valid estimate".to_string()
            }
            NumericFault::OutOfRange { field, value } => {
                format!("{} out of range ({})", field, value)
            }
        }
    }
}

impl fmt::Display for NumericFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NumericFault::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for NumericFault {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_fault_codes() {
        assert_eq!(NumericFault::NonFiniteBin { bin: 3 }.code(), 2001);
        assert_eq!(NumericFault::NonFiniteTempo.code(), 2002);
        assert_eq!(
            NumericFault::OutOfRange {
                field: "bpm",
                value: 512.0
            }
            .code(),
            2003
        );
    }

    #[test]
    fn test_numeric_fault_message() {
        let fault = NumericFault::NonFiniteBin { bin: 12 };
        assert!(fault.message().contains("Bin 12"));
        assert!(format!("{}", fault).contains("code 2001"));
    }
}
