//! Core telemetry event types exposed to the CLI and debug HTTP surfaces.

use serde::{Deserialize, Serialize};

/// Fault families surfaced via telemetry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticError {
    CaptureFault,
    NumericFault,
    CalibrationFault,
    ConfigFallback,
}

/// Metric events emitted by the pipeline at report cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    HopTiming {
        hops: u64,
        last_us: u64,
        avg_us: f32,
        max_us: u64,
        budget_overruns: u64,
    },
    DroppedChunk {
        skipped_hops: u64,
        capture_overruns: u64,
        occupancy_percent: f32,
    },
    Quality {
        rms: f32,
        snr_db: f32,
        dc_offset: f32,
        noise_floor: f32,
        flags: u8,
    },
    Tempo {
        bpm: f32,
        confidence: f32,
        locked: bool,
    },
    Error {
        kind: DiagnosticError,
        code: i32,
        context: String,
    },
    Calibration {
        dc_offset: f32,
        noise_floor: f32,
        fallback: bool,
    },
}
