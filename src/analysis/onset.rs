// OnsetDetector - spectral flux novelty and percussive triggers
//
// Algorithm:
// 1. Positive frame-to-frame change of the 64 autoranged bins:
//    flux_t = Σ max(0, bin_t[k] - bin_(t-1)[k]) / 64
// 2. Compress: novelty = ln(1 + flux)
// 3. Optionally divide by the mean of a short flux baseline, clamp to [0, 1]
// 4. Decay the whole novelty history, then write the new value
//
// Decaying before the write keeps a first-hop spike at full height.
// Percussive flags compare the energy of a mid and a high bin range against
// the previous hop.

use serde::Serialize;

use super::spectrum::SpectralFrame;
use crate::audio::RingBuffer;
use crate::config::{OnsetConfig, NOVELTY_HISTORY_LENGTH, NUM_BINS};

/// Largest supported moving baseline
pub const MAX_BASELINE_LENGTH: usize = 64;

/// Snare band (inclusive bin range, ~98-147 Hz)
const SNARE_BINS: (usize, usize) = (5, 10);
/// Hi-hat band (inclusive bin range, ~1-2 kHz)
const HIHAT_BINS: (usize, usize) = (50, 60);

const BASELINE_FLOOR: f32 = 0.0001;

/// Rolling novelty record consumed by the tempo tracker
#[derive(Debug, Clone, Default)]
pub struct NoveltyHistory {
    values: RingBuffer<f32, NOVELTY_HISTORY_LENGTH>,
}

impl NoveltyHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Multiply every stored value by `decay`, then append `value`
    pub fn push(&mut self, value: f32, decay: f32) {
        self.values.map_in_place(|v| v * decay);
        self.values.push_one(value);
    }

    /// Append `hops` zeros as if pushed one at a time with `decay`
    ///
    /// Runs in one pass over the history whatever the gap length.
    pub fn push_gap(&mut self, hops: usize, decay: f32) {
        let hops = hops.min(NOVELTY_HISTORY_LENGTH);
        if hops == 0 {
            return;
        }
        let factor = decay.powi(hops as i32);
        self.values.map_in_place(|v| v * factor);
        for _ in 0..hops {
            self.values.push_one(0.0);
        }
    }

    /// Scale the whole history by `factor`
    pub fn scale(&mut self, factor: f32) {
        self.values.map_in_place(|v| v * factor);
    }

    /// Value `age` hops back (0 = newest)
    pub fn newest(&self, age: usize) -> f32 {
        self.values.newest(age)
    }

    /// The newest `count` values, oldest first, as two slices
    pub fn latest(&self, count: usize) -> (&[f32], &[f32]) {
        self.values.latest(count)
    }

    pub fn max(&self) -> f32 {
        let (head, tail) = self.values.latest(NOVELTY_HISTORY_LENGTH);
        head.iter().chain(tail).copied().fold(0.0, f32::max)
    }

    pub fn capacity(&self) -> usize {
        self.values.capacity()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Percussive triggers for one hop
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OnsetFlags {
    pub snare: bool,
    pub hihat: bool,
    pub snare_energy: f32,
    pub hihat_energy: f32,
}

/// Onset stage output
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OnsetOutput {
    pub novelty: f32,
    pub flags: OnsetFlags,
}

/// Spectral flux onset detector
pub struct OnsetDetector {
    config: OnsetConfig,
    previous: [f32; NUM_BINS],
    history: NoveltyHistory,
    baseline: RingBuffer<f32, MAX_BASELINE_LENGTH>,
    baseline_length: usize,
    last_snare: f32,
    last_hihat: f32,
    output: OnsetOutput,
}

impl OnsetDetector {
    pub fn new(config: &OnsetConfig) -> Self {
        Self {
            config: config.clone(),
            previous: [0.0; NUM_BINS],
            history: NoveltyHistory::new(),
            baseline: RingBuffer::new(),
            baseline_length: config.baseline_length.min(MAX_BASELINE_LENGTH),
            last_snare: 0.0,
            last_hihat: 0.0,
            output: OnsetOutput::default(),
        }
    }

    /// Update novelty and percussive flags from this hop's spectrum
    pub fn process(&mut self, spectrum: &SpectralFrame) -> OnsetOutput {
        let mut flux = 0.0f32;
        for (previous, &current) in self.previous.iter_mut().zip(spectrum.magnitudes.iter()) {
            flux += (current - *previous).max(0.0);
            *previous = current;
        }
        let mut novelty = (flux / NUM_BINS as f32).ln_1p();

        if self.baseline_length > 0 {
            self.baseline.push_one(novelty);
            let (head, tail) = self.baseline.latest(self.baseline_length);
            let count = self.baseline.len().min(self.baseline_length).max(1);
            let mean = head.iter().chain(tail).sum::<f32>() / count as f32;
            novelty = (novelty / mean.max(BASELINE_FLOOR)).clamp(0.0, 1.0);
        }
        if !novelty.is_finite() {
            novelty = 0.0;
        }

        self.history.push(novelty, self.config.novelty_decay);

        let snare_energy = band_mean(&spectrum.fast, SNARE_BINS);
        let hihat_energy = band_mean(&spectrum.fast, HIHAT_BINS);
        let jump = self.config.trigger_jump;
        let flags = OnsetFlags {
            snare: snare_energy > self.last_snare + jump
                && snare_energy > self.config.snare_min_energy,
            hihat: hihat_energy > self.last_hihat + jump
                && hihat_energy > self.config.hihat_min_energy,
            snare_energy,
            hihat_energy,
        };
        self.last_snare = snare_energy;
        self.last_hihat = hihat_energy;

        self.output = OnsetOutput { novelty, flags };
        self.output
    }

    /// Keep the history on the hop grid across `hops` lost chunks
    pub fn fill_gap(&mut self, hops: u32) {
        self.history.push_gap(hops as usize, self.config.novelty_decay);
    }

    pub fn history(&self) -> &NoveltyHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut NoveltyHistory {
        &mut self.history
    }

    pub fn output(&self) -> OnsetOutput {
        self.output
    }
}

fn band_mean(bins: &[f32; NUM_BINS], (first, last): (usize, usize)) -> f32 {
    let slice = &bins[first..=last];
    (slice.iter().sum::<f32>() / slice.len() as f32).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(magnitudes: [f32; NUM_BINS]) -> SpectralFrame {
        SpectralFrame {
            magnitudes,
            fast: magnitudes,
            ..SpectralFrame::default()
        }
    }

    #[test]
    fn test_first_hop_spike_is_not_pre_decayed() {
        let mut detector = OnsetDetector::new(&OnsetConfig::default());
        let output = detector.process(&frame_with([1.0; NUM_BINS]));
        let expected = 1.0f32.ln_1p();
        assert!((output.novelty - expected).abs() < 1e-6);
        assert_eq!(detector.history().newest(0), output.novelty);
    }

    #[test]
    fn test_flux_is_positive_only() {
        let mut detector = OnsetDetector::new(&OnsetConfig::default());
        detector.process(&frame_with([1.0; NUM_BINS]));
        let falling = detector.process(&frame_with([0.0; NUM_BINS]));
        assert_eq!(falling.novelty, 0.0);
        let steady = detector.process(&frame_with([0.0; NUM_BINS]));
        assert_eq!(steady.novelty, 0.0);
    }

    #[test]
    fn test_history_decays_before_write() {
        let mut detector = OnsetDetector::new(&OnsetConfig::default());
        let first = detector.process(&frame_with([0.5; NUM_BINS])).novelty;
        detector.process(&frame_with([0.5; NUM_BINS]));
        assert!((detector.history().newest(1) - first * 0.999).abs() < 1e-7);
        assert_eq!(detector.history().newest(0), 0.0);
    }

    #[test]
    fn test_baseline_normalisation_clamps() {
        let config = OnsetConfig {
            baseline_length: 16,
            ..OnsetConfig::default()
        };
        let mut detector = OnsetDetector::new(&config);
        let mut bins = [0.0f32; NUM_BINS];
        for hop in 0..40 {
            bins[hop % NUM_BINS] = if hop % 2 == 0 { 0.8 } else { 0.0 };
            let output = detector.process(&frame_with(bins));
            assert!((0.0..=1.0).contains(&output.novelty));
        }
    }

    #[test]
    fn test_snare_trigger_needs_jump_and_level() {
        let mut detector = OnsetDetector::new(&OnsetConfig::default());
        let mut bins = [0.0f32; NUM_BINS];

        // Small rise stays below the minimum energy
        bins[5..=10].fill(0.05);
        assert!(!detector.process(&frame_with(bins)).flags.snare);

        bins[5..=10].fill(0.6);
        let hit = detector.process(&frame_with(bins)).flags;
        assert!(hit.snare);
        assert!(!hit.hihat);
        assert!((hit.snare_energy - 0.6).abs() < 1e-6);

        // Sustained level does not retrigger
        assert!(!detector.process(&frame_with(bins)).flags.snare);
    }

    #[test]
    fn test_hihat_trigger() {
        let mut detector = OnsetDetector::new(&OnsetConfig::default());
        let mut bins = [0.0f32; NUM_BINS];
        bins[50..=60].fill(0.3);
        let flags = detector.process(&frame_with(bins)).flags;
        assert!(flags.hihat);
        assert!(!flags.snare);
    }

    #[test]
    fn test_gap_matches_pushing_zeros() {
        let mut stepped = NoveltyHistory::new();
        let mut filled = NoveltyHistory::new();
        for value in [0.3, 0.9, 0.5] {
            stepped.push(value, 0.99);
            filled.push(value, 0.99);
        }
        for _ in 0..4 {
            stepped.push(0.0, 0.99);
        }
        filled.push_gap(4, 0.99);

        for age in 0..7 {
            assert!((stepped.newest(age) - filled.newest(age)).abs() < 1e-6, "age {age}");
        }
        assert_eq!(filled.newest(3), 0.0);
        assert!((filled.newest(5) - 0.9 * 0.99f32.powi(5)).abs() < 1e-6);
    }

    #[test]
    fn test_detector_gap_uses_novelty_decay() {
        let mut detector = OnsetDetector::new(&OnsetConfig::default());
        let first = detector.process(&frame_with([0.5; NUM_BINS])).novelty;
        detector.fill_gap(2);
        assert_eq!(detector.history().newest(0), 0.0);
        assert!((detector.history().newest(2) - first * 0.999f32.powi(2)).abs() < 1e-7);
    }

    #[test]
    fn test_novelty_history_max_and_scale() {
        let mut history = NoveltyHistory::new();
        history.push(0.2, 1.0);
        history.push(0.7, 1.0);
        history.push(0.1, 1.0);
        assert_eq!(history.max(), 0.7);
        history.scale(0.5);
        assert_eq!(history.max(), 0.35);
        assert_eq!(history.capacity(), NOVELTY_HISTORY_LENGTH);
    }
}
