// Calibration module - startup measurement of the capture path
//
// The Calibrator listens to the room before analysis starts and measures the
// DC offset and noise floor the quality monitor is seeded with. Failure is
// never fatal: the pipeline falls back to CalibrationResult::fallback().

pub mod calibrator;

pub use calibrator::{CalibrationPhase, CalibrationResult, Calibrator};
