// FrequencyAnalyzer - 64-bin Goertzel spectrum with post-processing
//
// Per hop:
// 1. Append the DC-corrected, full-scale samples to the rolling history
// 2. Measure every bin over its own block (gain tilt applied inside the root)
// 3. Subtract the learned per-bin noise floor
// 4. Optional four-zone AGC
// 5. Autorange against a slowly tracking global maximum, clip to [0, 1]
// 6. Fast and heavy asymmetric smoothing paths
//
// Everything is sized at construction; `process` does not allocate.

use super::goertzel::{build_bin_table, FrequencyBin};
use super::smoothing::{AsymmetricSmoother, ZoneAgc};
use crate::audio::{RingBuffer, WindowBank};
use crate::config::{hop_rate_hz, AnalyzerConfig, NUM_BANDS, NUM_BINS, SAMPLE_HISTORY_LENGTH};

/// Raw-magnitude snapshots averaged into the noise floor
const NOISE_HISTORY_LENGTH: usize = 10;
/// Share of the snapshot average treated as noise
const NOISE_FLOOR_SCALE: f32 = 0.9;
/// Hop rate the reference EMA constants were tuned at
const REFERENCE_HOP_RATE_HZ: f32 = 200.0;

const BINS_PER_BAND: usize = NUM_BINS / NUM_BANDS;

/// One hop of analyzer output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralFrame {
    /// Noise-floor subtracted magnitudes before autoranging
    pub full_scale: [f32; NUM_BINS],
    /// Autoranged magnitudes in [0, 1]
    pub magnitudes: [f32; NUM_BINS],
    pub fast: [f32; NUM_BINS],
    pub heavy: [f32; NUM_BINS],
    /// Bins that measured NaN or infinity this hop (reported as 0)
    pub non_finite_bins: u32,
}

impl Default for SpectralFrame {
    fn default() -> Self {
        Self {
            full_scale: [0.0; NUM_BINS],
            magnitudes: [0.0; NUM_BINS],
            fast: [0.0; NUM_BINS],
            heavy: [0.0; NUM_BINS],
            non_finite_bins: 0,
        }
    }
}

/// Per-bin noise floor learned from periodic snapshots of the raw spectrum
#[derive(Debug, Clone)]
struct NoiseFloor {
    history: [[f32; NUM_BINS]; NOISE_HISTORY_LENGTH],
    slot: usize,
    floor: [f32; NUM_BINS],
    alpha: f32,
    snapshot_every: u64,
}

impl NoiseFloor {
    fn new() -> Self {
        let hop_rate = hop_rate_hz();
        Self {
            history: [[0.0; NUM_BINS]; NOISE_HISTORY_LENGTH],
            slot: 0,
            floor: [0.0; NUM_BINS],
            alpha: 1.0 - 0.99f32.powf(REFERENCE_HOP_RATE_HZ / hop_rate),
            // Once per second
            snapshot_every: hop_rate.round() as u64,
        }
    }

    fn subtract(&mut self, hop_index: u64, raw: &[f32; NUM_BINS], out: &mut [f32; NUM_BINS]) {
        if hop_index % self.snapshot_every == 0 {
            self.slot = (self.slot + 1) % NOISE_HISTORY_LENGTH;
            self.history[self.slot] = *raw;
        }

        for i in 0..NUM_BINS {
            let average = self.history.iter().map(|row| row[i]).sum::<f32>()
                / NOISE_HISTORY_LENGTH as f32
                * NOISE_FLOOR_SCALE;
            self.floor[i] += (average - self.floor[i]) * self.alpha;
            out[i] = (raw[i] - self.floor[i]).max(0.0);
        }
    }

    fn reset(&mut self) {
        self.history = [[0.0; NUM_BINS]; NOISE_HISTORY_LENGTH];
        self.floor = [0.0; NUM_BINS];
        self.slot = 0;
    }
}

/// Replace non-finite values with 0
///
/// # Returns
/// Number of values replaced
pub fn sanitize_bins(bins: &mut [f32; NUM_BINS]) -> u32 {
    let mut replaced = 0;
    for bin in bins.iter_mut() {
        if !bin.is_finite() {
            *bin = 0.0;
            replaced += 1;
        }
    }
    replaced
}

/// Mean of each group of 8 adjacent bins
pub fn fold_bands(bins: &[f32; NUM_BINS]) -> [f32; NUM_BANDS] {
    std::array::from_fn(|band| {
        bins[band * BINS_PER_BAND..(band + 1) * BINS_PER_BAND]
            .iter()
            .sum::<f32>()
            / BINS_PER_BAND as f32
    })
}

/// Goertzel spectrum analyzer
pub struct FrequencyAnalyzer {
    config: AnalyzerConfig,
    bins: [FrequencyBin; NUM_BINS],
    window: WindowBank,
    history: RingBuffer<f32, SAMPLE_HISTORY_LENGTH>,
    noise_floor: NoiseFloor,
    agc: ZoneAgc,
    /// Tracked spectrum maximum for autoranging
    max_smooth: f32,
    autorange_alpha: f32,
    fast: AsymmetricSmoother<NUM_BINS>,
    heavy: AsymmetricSmoother<NUM_BINS>,
    raw: [f32; NUM_BINS],
    frame: SpectralFrame,
    hop_index: u64,
}

impl FrequencyAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            config: config.clone(),
            bins: build_bin_table(config),
            window: WindowBank::new(),
            history: RingBuffer::new(),
            noise_floor: NoiseFloor::new(),
            agc: ZoneAgc::new(config.agc_attack, config.agc_release, config.agc_floor),
            max_smooth: 0.0,
            autorange_alpha: 1.0 - 0.995f32.powf(REFERENCE_HOP_RATE_HZ / hop_rate_hz()),
            fast: AsymmetricSmoother::new(config.fast_attack, config.fast_release),
            heavy: AsymmetricSmoother::new(config.heavy_attack, config.heavy_release),
            raw: [0.0; NUM_BINS],
            frame: SpectralFrame::default(),
            hop_index: 0,
        }
    }

    /// Analyse one hop of full-scale samples (±1.0, DC already removed)
    pub fn process(&mut self, samples: &[f32]) -> &SpectralFrame {
        self.history.push(samples);

        for (raw, bin) in self.raw.iter_mut().zip(self.bins.iter_mut()) {
            *raw = bin.measure(&self.history, &self.window);
        }
        self.frame.non_finite_bins = sanitize_bins(&mut self.raw);

        let mut filtered = [0.0f32; NUM_BINS];
        if self.config.noise_floor_enabled {
            self.noise_floor
                .subtract(self.hop_index, &self.raw, &mut filtered);
        } else {
            filtered = self.raw;
        }
        self.frame.full_scale = filtered;

        if self.config.zone_agc {
            self.agc.apply(&mut filtered);
        }

        let max_val = filtered.iter().copied().fold(0.0f32, f32::max);
        self.max_smooth += (max_val - self.max_smooth) * self.autorange_alpha;
        self.max_smooth = self.max_smooth.max(self.config.autorange_floor);
        let scale = 1.0 / self.max_smooth;
        for (out, &value) in self.frame.magnitudes.iter_mut().zip(filtered.iter()) {
            *out = (value * scale).clamp(0.0, 1.0);
        }

        self.frame.fast = *self.fast.update(&self.frame.magnitudes);
        self.frame.heavy = *self.heavy.update(&self.frame.magnitudes);

        self.hop_index += 1;
        &self.frame
    }

    pub fn frame(&self) -> &SpectralFrame {
        &self.frame
    }

    pub fn bins(&self) -> &[FrequencyBin; NUM_BINS] {
        &self.bins
    }

    /// Current autorange denominator
    pub fn autorange_max(&self) -> f32 {
        self.max_smooth
    }

    /// Forget the learned noise floor, e.g. after recalibration
    pub fn reset_noise_floor(&mut self) {
        self.noise_floor.reset();
    }

    pub fn hop_index(&self) -> u64 {
        self.hop_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CHUNK_SIZE, SAMPLE_RATE_HZ};
    use std::f32::consts::PI;

    fn tone_hop(hop: usize, freq: f32, amplitude: f32) -> [f32; CHUNK_SIZE] {
        std::array::from_fn(|i| {
            let n = (hop * CHUNK_SIZE + i) as f32;
            (2.0 * PI * freq * n / SAMPLE_RATE_HZ as f32).sin() * amplitude
        })
    }

    #[test]
    fn test_silence_stays_zero() {
        let mut analyzer = FrequencyAnalyzer::new(&AnalyzerConfig::default());
        let zeros = [0.0f32; CHUNK_SIZE];
        for _ in 0..300 {
            let frame = analyzer.process(&zeros);
            assert!(frame.magnitudes.iter().all(|v| *v == 0.0));
            assert!(frame.fast.iter().all(|v| v.is_finite()));
        }
        assert_eq!(analyzer.autorange_max(), 0.0025);
    }

    #[test]
    fn test_tone_autoranges_to_unit_peak() {
        let config = AnalyzerConfig {
            noise_floor_enabled: false,
            ..AnalyzerConfig::default()
        };
        let mut analyzer = FrequencyAnalyzer::new(&config);
        for hop in 0..1500 {
            analyzer.process(&tone_hop(hop, 440.0, 0.5));
        }
        let frame = analyzer.frame();
        let peak = frame
            .magnitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!((35..=37).contains(&peak), "peak at {}", peak);
        assert!(frame.magnitudes[peak] > 0.9);
        assert!(frame.magnitudes.iter().all(|v| (0.0..=1.0).contains(v)));
        // Heavy path lags the fast path on the way up but both converge
        assert!(frame.fast[peak] > 0.8);
        assert!(frame.heavy[peak] > 0.8);
    }

    #[test]
    fn test_noise_floor_suppresses_steady_tone() {
        let mut analyzer = FrequencyAnalyzer::new(&AnalyzerConfig::default());
        let mut early = 0.0;
        for hop in 0..2500 {
            let frame = analyzer.process(&tone_hop(hop, 440.0, 0.5));
            if hop == 130 {
                early = frame.full_scale.iter().copied().fold(0.0f32, f32::max);
            }
        }
        let late = analyzer.frame().full_scale.iter().copied().fold(0.0f32, f32::max);
        // A stationary tone is learned as background
        assert!(late < early * 0.5, "early {} late {}", early, late);
    }

    #[test]
    fn test_sanitize_bins_counts_non_finite() {
        let mut bins = [0.5f32; NUM_BINS];
        bins[3] = f32::NAN;
        bins[9] = f32::INFINITY;
        assert_eq!(sanitize_bins(&mut bins), 2);
        assert_eq!(bins[3], 0.0);
        assert_eq!(bins[9], 0.0);
        assert_eq!(bins[0], 0.5);
    }

    #[test]
    fn test_fold_bands_means() {
        let mut bins = [0.0f32; NUM_BINS];
        bins[..8].fill(1.0);
        bins[56..].fill(0.5);
        let bands = fold_bands(&bins);
        assert_eq!(bands[0], 1.0);
        assert_eq!(bands[7], 0.5);
        assert_eq!(bands[3], 0.0);
    }
}
