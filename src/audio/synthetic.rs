//! Deterministic test signals
//!
//! `SyntheticSource` is an explicit source for tests, CLI demos and tempo
//! accuracy harnesses. It is never substituted for a failed hardware capture.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

use super::source::{SampleChunk, SampleSource};
use crate::config::{CHUNK_SIZE, SAMPLE_RATE_HZ};
use crate::error::CaptureError;

/// Seed shared by every noise-bearing pattern so runs are reproducible
const DEFAULT_SEED: u64 = 0x5A5A_FFF0;

/// Length of one click burst
const CLICK_DURATION_MS: f32 = 30.0;

/// Envelope time constant of a click burst
const CLICK_DECAY_MS: f32 = 6.0;

/// Supported deterministic waveform patterns
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyntheticPattern {
    /// Pure tone
    Sine { frequency_hz: f32 },
    /// Decaying noise bursts on every beat
    ClickTrain { bpm: f32 },
    /// Uniform white noise
    WhiteNoise,
    /// Digital zero
    Silence,
}

/// Generator implementing [`SampleSource`]
pub struct SyntheticSource {
    pattern: SyntheticPattern,
    /// Peak level, full scale = 1.0
    amplitude: f32,
    rng: StdRng,
    /// Chunks still to emit; `None` runs forever
    remaining_chunks: Option<u64>,
    sequence: u64,
    /// Absolute sample index
    position: u64,
    phase: f32,
}

impl SyntheticSource {
    /// Build a generator
    ///
    /// # Arguments
    /// * `pattern` - Waveform to produce
    /// * `amplitude` - Peak level, clamped to [0, 1]
    /// * `max_chunks` - Chunks before the source reports exhaustion (`None` = endless)
    pub fn new(pattern: SyntheticPattern, amplitude: f32, max_chunks: Option<u64>) -> Self {
        Self {
            pattern,
            amplitude: amplitude.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(DEFAULT_SEED),
            remaining_chunks: max_chunks,
            sequence: 0,
            position: 0,
            phase: 0.0,
        }
    }

    /// Endless sine
    pub fn sine(frequency_hz: f32, amplitude: f32) -> Self {
        Self::new(SyntheticPattern::Sine { frequency_hz }, amplitude, None)
    }

    /// Click train lasting `seconds`
    pub fn click_train(bpm: f32, amplitude: f32, seconds: f32) -> Self {
        Self::new(
            SyntheticPattern::ClickTrain { bpm },
            amplitude,
            Some(chunks_for_seconds(seconds)),
        )
    }

    /// Endless digital silence
    pub fn silence() -> Self {
        Self::new(SyntheticPattern::Silence, 0.0, None)
    }

    /// Replace the noise seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn pattern(&self) -> SyntheticPattern {
        self.pattern
    }

    fn next_sample(&mut self) -> f32 {
        let value = match self.pattern {
            SyntheticPattern::Sine { frequency_hz } => {
                let value = (2.0 * PI * self.phase).sin();
                self.phase += frequency_hz / SAMPLE_RATE_HZ as f32;
                if self.phase >= 1.0 {
                    self.phase -= 1.0;
                }
                value
            }
            SyntheticPattern::ClickTrain { bpm } => {
                let period = (60.0 * SAMPLE_RATE_HZ as f32 / bpm.max(1.0)) as u64;
                let offset = self.position % period.max(1);
                let t_ms = offset as f32 * 1000.0 / SAMPLE_RATE_HZ as f32;
                if t_ms < CLICK_DURATION_MS {
                    let envelope = (-t_ms / CLICK_DECAY_MS).exp();
                    envelope * self.rng.gen_range(-1.0f32..1.0)
                } else {
                    0.0
                }
            }
            SyntheticPattern::WhiteNoise => self.rng.gen_range(-1.0f32..1.0),
            SyntheticPattern::Silence => 0.0,
        };
        self.position += 1;
        value * self.amplitude
    }
}

impl SampleSource for SyntheticSource {
    fn next_chunk(&mut self) -> Result<SampleChunk, CaptureError> {
        if let Some(remaining) = self.remaining_chunks.as_mut() {
            if *remaining == 0 {
                return Err(CaptureError::SourceExhausted);
            }
            *remaining -= 1;
        }

        let mut samples = [0i16; CHUNK_SIZE];
        for sample in samples.iter_mut() {
            *sample = to_i16(self.next_sample());
        }

        let chunk = SampleChunk::new(self.sequence, samples);
        self.sequence += 1;
        Ok(chunk)
    }

    fn describe(&self) -> String {
        match self.pattern {
            SyntheticPattern::Sine { frequency_hz } => format!("synthetic-sine({:.1} Hz)", frequency_hz),
            SyntheticPattern::ClickTrain { bpm } => format!("synthetic-clicks({:.1} BPM)", bpm),
            SyntheticPattern::WhiteNoise => "synthetic-noise".to_string(),
            SyntheticPattern::Silence => "synthetic-silence".to_string(),
        }
    }
}

/// Chunks covering `seconds` of audio, rounded up
pub fn chunks_for_seconds(seconds: f32) -> u64 {
    let samples = (seconds.max(0.0) * SAMPLE_RATE_HZ as f32).ceil() as u64;
    samples.div_ceil(CHUNK_SIZE as u64)
}

/// Quantise a full-scale float to i16 with saturation
pub fn to_i16(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}
