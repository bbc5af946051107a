// Calibrator - startup DC offset and noise floor measurement
//
// State machine:
//   Idle → Measuring → Complete
//                    ↘ Failed
//
// The measurement window is counted in samples, so replay and synthetic
// sources calibrate identically to a live microphone. The wall-clock timeout
// only bounds how long a stalled or faulting source can hold up startup.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::analysis::quality::FULL_SCALE;
use crate::audio::SampleChunk;
use crate::config::{CalibrationConfig, CHUNK_SIZE, SAMPLE_RATE_HZ};
use crate::error::CalibrationError;

/// Share of the measurement window that must arrive before the timeout
const MIN_COVERAGE: f64 = 0.5;

/// Calibrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPhase {
    Idle,
    Measuring,
    Complete,
    Failed,
}

/// Values the quality monitor is seeded with
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationResult {
    /// Mean sample value, full scale = 1.0
    pub dc_offset: f32,
    /// Measured RMS after DC removal, full scale = 1.0
    pub rms: f32,
    /// RMS times the safety multiplier
    pub noise_floor: f32,
    pub samples: usize,
    /// True when these are defaults rather than a measurement
    pub fallback: bool,
}

impl CalibrationResult {
    /// Safe defaults used whenever calibration cannot complete
    pub fn fallback(config: &CalibrationConfig) -> Self {
        Self {
            dc_offset: 0.0,
            rms: 0.0,
            noise_floor: config.default_noise_floor,
            samples: 0,
            fallback: true,
        }
    }
}

/// Accumulates raw samples for the measurement window
pub struct Calibrator {
    config: CalibrationConfig,
    phase: CalibrationPhase,
    started_at: Option<Instant>,
    required_samples: usize,
    collected: usize,
    sum: i64,
    sum_squares: f64,
    outcome: Option<Result<CalibrationResult, CalibrationError>>,
}

impl Calibrator {
    pub fn new(config: &CalibrationConfig) -> Self {
        let required_samples =
            (config.duration_ms.saturating_mul(SAMPLE_RATE_HZ as u64) / 1000) as usize;
        Self {
            config: config.clone(),
            phase: CalibrationPhase::Idle,
            started_at: None,
            required_samples: required_samples.max(CHUNK_SIZE),
            collected: 0,
            sum: 0,
            sum_squares: 0.0,
            outcome: None,
        }
    }

    /// Begin measuring; restarts a finished calibrator
    pub fn start(&mut self, now: Instant) {
        self.phase = CalibrationPhase::Measuring;
        self.started_at = Some(now);
        self.collected = 0;
        self.sum = 0;
        self.sum_squares = 0.0;
        self.outcome = None;
        log::info!(
            "[Calibration] Measuring {} samples ({} ms, timeout {} ms)",
            self.required_samples,
            self.config.duration_ms,
            self.config.timeout_ms
        );
    }

    /// Accumulate one chunk; finishes once the window is full or the timeout passes
    pub fn feed(&mut self, chunk: &SampleChunk, now: Instant) -> CalibrationPhase {
        if self.phase != CalibrationPhase::Measuring {
            return self.phase;
        }
        let remaining = self.required_samples - self.collected;
        for &sample in chunk.samples.iter().take(remaining) {
            let value = sample as i64;
            self.sum += value;
            self.sum_squares += (value * value) as f64;
        }
        self.collected += remaining.min(CHUNK_SIZE);

        if self.collected >= self.required_samples {
            let outcome = self.measure();
            self.finish(outcome);
            return self.phase;
        }
        self.check_timeout(now)
    }

    /// Fail the measurement if the wall-clock budget has run out
    pub fn check_timeout(&mut self, now: Instant) -> CalibrationPhase {
        if self.phase != CalibrationPhase::Measuring {
            return self.phase;
        }
        let elapsed = self.elapsed(now);
        if elapsed <= Duration::from_millis(self.config.timeout_ms) {
            return self.phase;
        }

        let outcome = if (self.collected as f64) < self.required_samples as f64 * MIN_COVERAGE {
            Err(CalibrationError::Timeout {
                elapsed_ms: elapsed.as_millis() as u64,
                budget_ms: self.config.timeout_ms,
            })
        } else {
            // Enough audio for a usable estimate, just not the full window
            self.measure()
        };
        self.finish(outcome);
        self.phase
    }

    /// Stop early, measuring whatever has been collected
    pub fn abort(&mut self) -> Result<CalibrationResult, CalibrationError> {
        if self.phase == CalibrationPhase::Measuring {
            let outcome = if (self.collected as f64) < self.required_samples as f64 * MIN_COVERAGE
            {
                Err(CalibrationError::InsufficientSamples {
                    collected: self.collected,
                    required: self.required_samples,
                })
            } else {
                self.measure()
            };
            self.finish(outcome);
        }
        self.outcome().unwrap_or_else(|| {
            Err(CalibrationError::InsufficientSamples {
                collected: 0,
                required: self.required_samples,
            })
        })
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    /// Result of the last finished measurement
    pub fn outcome(&self) -> Option<Result<CalibrationResult, CalibrationError>> {
        self.outcome.clone()
    }

    /// Collected share of the window, 0.0 to 1.0
    pub fn progress(&self) -> f32 {
        (self.collected as f32 / self.required_samples as f32).min(1.0)
    }

    pub fn required_samples(&self) -> usize {
        self.required_samples
    }

    fn elapsed(&self, now: Instant) -> Duration {
        self.started_at
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    fn measure(&self) -> Result<CalibrationResult, CalibrationError> {
        if self.collected == 0 {
            return Err(CalibrationError::InsufficientSamples {
                collected: 0,
                required: self.required_samples,
            });
        }
        let count = self.collected as f64;
        let mean = self.sum as f64 / count;
        let variance = (self.sum_squares / count - mean * mean).max(0.0);
        let dc_offset = (mean / FULL_SCALE as f64) as f32;
        let rms = (variance.sqrt() / FULL_SCALE as f64) as f32;

        if !dc_offset.is_finite() || !rms.is_finite() {
            return Err(CalibrationError::InvalidMeasurement {
                reason: format!("dc={dc_offset} rms={rms}"),
            });
        }
        if rms > self.config.max_allowed_rms {
            return Err(CalibrationError::TooLoud {
                rms,
                max_allowed: self.config.max_allowed_rms,
            });
        }

        Ok(CalibrationResult {
            dc_offset,
            rms,
            noise_floor: rms * self.config.safety_multiplier,
            samples: self.collected,
            fallback: false,
        })
    }

    fn finish(&mut self, outcome: Result<CalibrationResult, CalibrationError>) {
        self.phase = match outcome {
            Ok(result) => {
                log::info!(
                    "[Calibration] Complete: dc={:.5} rms={:.5} noise_floor={:.5} ({} samples)",
                    result.dc_offset,
                    result.rms,
                    result.noise_floor,
                    result.samples
                );
                CalibrationPhase::Complete
            }
            Err(_) => CalibrationPhase::Failed,
        };
        self.outcome = Some(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_config() -> CalibrationConfig {
        CalibrationConfig {
            duration_ms: 80, // 10 chunks
            timeout_ms: 1000,
            ..CalibrationConfig::default()
        }
    }

    fn constant_chunk(sequence: u64, value: i16) -> SampleChunk {
        SampleChunk::new(sequence, [value; CHUNK_SIZE])
    }

    fn alternating_chunk(sequence: u64, offset: i16, amplitude: i16) -> SampleChunk {
        let mut samples = [0i16; CHUNK_SIZE];
        for (i, sample) in samples.iter_mut().enumerate() {
            *sample = if i % 2 == 0 { offset + amplitude } else { offset - amplitude };
        }
        SampleChunk::new(sequence, samples)
    }

    #[test]
    fn test_starts_idle_and_ignores_input() {
        let mut calibrator = Calibrator::new(&short_config());
        assert_eq!(calibrator.phase(), CalibrationPhase::Idle);
        let phase = calibrator.feed(&constant_chunk(0, 100), Instant::now());
        assert_eq!(phase, CalibrationPhase::Idle);
        assert_eq!(calibrator.progress(), 0.0);
    }

    #[test]
    fn test_measures_dc_and_noise_floor() {
        let mut calibrator = Calibrator::new(&short_config());
        assert_eq!(calibrator.required_samples(), 1280);
        let now = Instant::now();
        calibrator.start(now);

        let mut phase = CalibrationPhase::Measuring;
        for sequence in 0..10 {
            phase = calibrator.feed(&alternating_chunk(sequence, 328, 100), now);
        }
        assert_eq!(phase, CalibrationPhase::Complete);

        let result = calibrator.outcome().unwrap().unwrap();
        assert!((result.dc_offset - 328.0 / FULL_SCALE).abs() < 1e-6);
        assert!((result.rms - 100.0 / FULL_SCALE).abs() < 1e-6);
        assert!((result.noise_floor - result.rms * 1.2).abs() < 1e-7);
        assert!(!result.fallback);
    }

    #[test]
    fn test_loud_room_fails() {
        let mut calibrator = Calibrator::new(&short_config());
        let now = Instant::now();
        calibrator.start(now);
        for sequence in 0..10 {
            calibrator.feed(&alternating_chunk(sequence, 0, 16_000), now);
        }
        assert_eq!(calibrator.phase(), CalibrationPhase::Failed);
        assert!(matches!(
            calibrator.outcome(),
            Some(Err(CalibrationError::TooLoud { .. }))
        ));
    }

    #[test]
    fn test_timeout_without_audio_fails() {
        let mut calibrator = Calibrator::new(&short_config());
        let start = Instant::now();
        calibrator.start(start);
        calibrator.feed(&constant_chunk(0, 0), start);

        assert_eq!(
            calibrator.check_timeout(start + Duration::from_millis(500)),
            CalibrationPhase::Measuring
        );
        let phase = calibrator.check_timeout(start + Duration::from_millis(1001));
        assert_eq!(phase, CalibrationPhase::Failed);
        assert!(matches!(
            calibrator.outcome(),
            Some(Err(CalibrationError::Timeout { budget_ms: 1000, .. }))
        ));
    }

    #[test]
    fn test_timeout_with_most_audio_still_measures() {
        let mut calibrator = Calibrator::new(&short_config());
        let start = Instant::now();
        calibrator.start(start);
        for sequence in 0..6 {
            calibrator.feed(&constant_chunk(sequence, 0), start);
        }
        let phase = calibrator.check_timeout(start + Duration::from_secs(2));
        assert_eq!(phase, CalibrationPhase::Complete);
        assert_eq!(calibrator.outcome().unwrap().unwrap().samples, 6 * CHUNK_SIZE);
    }

    #[test]
    fn test_abort_with_too_little_audio() {
        let mut calibrator = Calibrator::new(&short_config());
        calibrator.start(Instant::now());
        calibrator.feed(&constant_chunk(0, 0), Instant::now());
        assert!(matches!(
            calibrator.abort(),
            Err(CalibrationError::InsufficientSamples { collected: 128, .. })
        ));
    }

    #[test]
    fn test_fallback_defaults() {
        let result = CalibrationResult::fallback(&CalibrationConfig::default());
        assert_eq!(result.dc_offset, 0.0);
        assert_eq!(result.noise_floor, 0.01);
        assert!(result.fallback);
    }
}
