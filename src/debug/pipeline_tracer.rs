// Pipeline Tracer - per-stage diagnostic logging for the hop loop
//
// Each stage of a hop logs its key values when tracing is enabled, which
// makes it easy to see where a signal disappears between capture and the
// published frame.
//
// Usage:
//   - Enable with LIGHTWAVE_TRACE=1 environment variable
//   - Traces appear in logs with [TRACE] prefix
//   - Each trace includes stage name, sequence id, timestamp and metrics
//
// When disabled every trace point is a single relaxed atomic load.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// Global flag to enable/disable pipeline tracing
static TRACING_ENABLED: AtomicBool = AtomicBool::new(false);

/// Counter for trace events (helps correlate related traces)
static TRACE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Global start time for relative timestamps
static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Initialize pipeline tracing based on environment variable
pub fn init() {
    let enabled = std::env::var("LIGHTWAVE_TRACE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    TRACING_ENABLED.store(enabled, Ordering::SeqCst);
    if enabled {
        log::info!("[TRACE] Pipeline tracing ENABLED - set LIGHTWAVE_TRACE=0 to disable");
    }
}

/// Check if tracing is enabled
#[inline]
pub fn is_enabled() -> bool {
    TRACING_ENABLED.load(Ordering::Relaxed)
}

/// Enable tracing at runtime
pub fn enable() {
    TRACING_ENABLED.store(true, Ordering::SeqCst);
    log::info!("[TRACE] Pipeline tracing enabled at runtime");
}

/// Disable tracing at runtime
pub fn disable() {
    TRACING_ENABLED.store(false, Ordering::SeqCst);
    log::info!("[TRACE] Pipeline tracing disabled at runtime");
}

/// Hop stages for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Chunk pulled from the sample source
    Capture,
    /// Source reported a fault and the hop was skipped
    CaptureSkip,
    /// DC removal, clip detection and RMS
    Condition,
    /// Goertzel bank and smoothing paths
    Spectrum,
    /// Spectral flux novelty and percussive flags
    Onset,
    /// Oscillator bank update
    Tempo,
    /// Feature frame assembled
    Aggregate,
    /// Frame handed to the publisher
    Publish,
    /// Calibration chunk consumed
    Calibration,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Capture => "CAPTURE",
            PipelineStage::CaptureSkip => "CAPTURE_SKIP",
            PipelineStage::Condition => "CONDITION",
            PipelineStage::Spectrum => "SPECTRUM",
            PipelineStage::Onset => "ONSET",
            PipelineStage::Tempo => "TEMPO",
            PipelineStage::Aggregate => "AGGREGATE",
            PipelineStage::Publish => "PUBLISH",
            PipelineStage::Calibration => "CAL",
        }
    }
}

fn timestamp_us() -> u64 {
    START_TIME.get_or_init(Instant::now).elapsed().as_micros() as u64
}

/// Log a trace event at a pipeline stage
///
/// Only logs if LIGHTWAVE_TRACE=1 is set or [`enable`] was called.
///
/// # Arguments
/// * `stage` - The pipeline stage
/// * `message` - Descriptive message with metrics
#[inline]
pub fn trace(stage: PipelineStage, message: &str) {
    if !is_enabled() {
        return;
    }

    let id = TRACE_COUNTER.fetch_add(1, Ordering::Relaxed);
    log::info!(
        "[TRACE] {:>12} #{:06} @{:>10}us | {}",
        stage.as_str(),
        id,
        timestamp_us(),
        message
    );
}

/// Log a trace event with formatted arguments
///
/// Formatting only happens when tracing is on.
#[macro_export]
macro_rules! trace_pipeline {
    ($stage:expr, $($arg:tt)*) => {
        if $crate::debug::pipeline_tracer::is_enabled() {
            $crate::debug::pipeline_tracer::trace($stage, &format!($($arg)*));
        }
    };
}

/// Number of trace events emitted so far
pub fn trace_count() -> u64 {
    TRACE_COUNTER.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_disable_and_count() {
        enable();
        assert!(is_enabled());
        let before = trace_count();
        trace_pipeline!(PipelineStage::Tempo, "bpm={:.1}", 120.0);
        assert!(trace_count() > before);
        disable();
        assert!(!is_enabled());
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(PipelineStage::Capture.as_str(), "CAPTURE");
        assert_eq!(PipelineStage::Tempo.as_str(), "TEMPO");
        assert_eq!(PipelineStage::Calibration.as_str(), "CAL");
    }
}
