// Goertzel bin table - one semitone-spaced filter per bin
//
// Each bin gets its own block size from the distance to its upper neighbour,
// so low notes integrate long windows and high notes short ones. All values
// are derived once at startup.

use std::f32::consts::PI;

use crate::audio::{RingBuffer, WindowBank};
use crate::config::{AnalyzerConfig, NUM_BINS, SAMPLE_HISTORY_LENGTH, SAMPLE_RATE_HZ};

/// Fractional distance to the next semitone up (2^(1/12) - 1)
pub const SEMITONE_RATIO: f32 = 0.05946;

/// Derived constants and latest raw magnitude of one bin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyBin {
    pub center_hz: f32,
    /// Discrete Goertzel coefficient 2cos(2πk/N)
    pub coeff: f32,
    pub block_size: usize,
    /// Window table stride for this block size
    pub window_step: f32,
    /// High-frequency tilt applied inside the root
    pub gain: f32,
    /// Last measured magnitude before noise-floor subtraction
    pub magnitude: f32,
}

impl FrequencyBin {
    /// Derive bin `index` of a bank rooted at `config.base_frequency_hz`
    pub fn new(index: usize, config: &AnalyzerConfig) -> Self {
        let center_hz = config.base_frequency_hz * 2f32.powf(index as f32 / 12.0);
        let sample_rate = SAMPLE_RATE_HZ as f32;

        let ideal = (sample_rate / (2.0 * center_hz * SEMITONE_RATIO)) as usize;
        // Multiple of 4, then into the configured range
        let block_size = (ideal - ideal % 4).clamp(config.min_block_size, config.max_block_size);

        let n = block_size as f32;
        let k = (n * center_hz / sample_rate)
            .round()
            .clamp(1.0, (block_size / 2 - 1).max(1) as f32);
        let w = 2.0 * PI * k / n;

        let progress = (index as f32 / NUM_BINS as f32).powi(4);

        Self {
            center_hz,
            coeff: 2.0 * w.cos(),
            block_size,
            window_step: WindowBank::step_for(block_size),
            gain: progress * 0.9975 + 0.0025,
            magnitude: 0.0,
        }
    }

    /// Run the filter over the newest `block_size` samples of `history`
    ///
    /// Samples are fed oldest to newest; the Hann taper is symmetric so the
    /// magnitude matches a newest-first pass exactly.
    pub fn measure(
        &mut self,
        history: &RingBuffer<f32, SAMPLE_HISTORY_LENGTH>,
        window: &WindowBank,
    ) -> f32 {
        let (head, tail) = history.latest(self.block_size);
        let mut q1 = 0.0f32;
        let mut q2 = 0.0f32;
        for (i, &sample) in head.iter().chain(tail.iter()).enumerate() {
            let q0 = self.coeff * q1 - q2 + sample * window.value_at(i as f32 * self.window_step);
            q2 = q1;
            q1 = q0;
        }

        let magnitude_squared = q1 * q1 + q2 * q2 - q1 * q2 * self.coeff;
        let normalized = magnitude_squared.max(0.0) / (self.block_size as f32 / 2.0);
        self.magnitude = (normalized * self.gain).sqrt();
        self.magnitude
    }
}

/// Build the full bank
pub fn build_bin_table(config: &AnalyzerConfig) -> [FrequencyBin; NUM_BINS] {
    std::array::from_fn(|i| FrequencyBin::new(i, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_table_invariants() {
        let bins = build_bin_table(&AnalyzerConfig::default());
        assert_eq!(bins.len(), 64);
        assert!((bins[0].center_hz - 55.0).abs() < 1e-3);
        // A7 at bin 60
        assert!((bins[60].center_hz - 1760.0).abs() < 0.1);

        for pair in bins.windows(2) {
            assert!(pair[1].center_hz > pair[0].center_hz);
            assert!(pair[1].block_size <= pair[0].block_size);
        }
        for bin in bins.iter() {
            assert!((64..=2000).contains(&bin.block_size));
            assert_eq!(bin.block_size % 4, 0);
            assert!(bin.coeff.abs() <= 2.0);
            assert!(bin.gain > 0.0 && bin.gain <= 1.0);
        }
        assert_eq!(bins[0].block_size, 2000);
        assert_eq!(bins[63].block_size, 64);
    }

    #[test]
    fn test_discrete_k_is_within_bounds() {
        let config = AnalyzerConfig::default();
        for i in 0..NUM_BINS {
            let bin = FrequencyBin::new(i, &config);
            let n = bin.block_size as f32;
            let w = (bin.coeff / 2.0).acos();
            let k = w * n / (2.0 * PI);
            assert!(k >= 0.99 && k <= n / 2.0 - 0.99, "bin {} k {}", i, k);
            assert!((k - k.round()).abs() < 0.01);
        }
    }

    #[test]
    fn test_tone_peaks_at_matching_bin() {
        let config = AnalyzerConfig::default();
        let mut bins = build_bin_table(&config);
        let window = WindowBank::new();
        let mut history: RingBuffer<f32, SAMPLE_HISTORY_LENGTH> = RingBuffer::new();

        // 440 Hz = bin 36. With k = round(N·f/fs) the realised centres sit
        // below the nominal ones, so the response peaks within one bin of it.
        let tone: Vec<f32> = (0..SAMPLE_HISTORY_LENGTH)
            .map(|n| (2.0 * PI * 440.0 * n as f32 / SAMPLE_RATE_HZ as f32).sin() * 0.5)
            .collect();
        history.push(&tone);

        // Compare without the tilt so low and high bins are on equal footing
        let mut raw = [0.0f32; NUM_BINS];
        for (i, bin) in bins.iter_mut().enumerate() {
            raw[i] = bin.measure(&history, &window) / bin.gain.sqrt();
        }
        let peak = raw
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!((35..=37).contains(&peak), "peak at bin {}", peak);
        assert!(raw[36] > raw[31] * 4.0);
        assert!(raw[36] > raw[41] * 4.0);
    }

    #[test]
    fn test_silence_measures_zero() {
        let mut bins = build_bin_table(&AnalyzerConfig::default());
        let window = WindowBank::new();
        let history: RingBuffer<f32, SAMPLE_HISTORY_LENGTH> = RingBuffer::new();
        for bin in bins.iter_mut() {
            assert_eq!(bin.measure(&history, &window), 0.0);
        }
    }
}
