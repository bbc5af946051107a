// ContractAggregator - assemble one FeatureFrame per hop
//
// Combines both smoothing paths, folded bands, chroma, tempo, onset flags and
// quality into the published frame. Every visual-facing value passes through
// exactly one smoothing stage: bands and chroma fold the analyzer's fast and
// heavy paths as they are, confidence is the tracker's own smoothed ratio, and
// only raw novelty is eased here. A non-finite field group reuses the
// previous frame's value and bumps `error_count`.

use super::frame::{BinArray, FeatureFrame, FRAME_VERSION};
use super::onset::OnsetOutput;
use super::quality::SignalQualitySnapshot;
use super::smoothing::smooth_toward;
use super::spectrum::{fold_bands, SpectralFrame};
use super::tempo::TempoEstimate;
use crate::config::{
    ContractConfig, CHUNK_SIZE, NUM_BINS, NUM_CHROMA, SAMPLE_RATE_HZ,
};

/// Bins folded into chroma (five full octaves)
const CHROMA_BINS: usize = 60;
const CHROMA_OCTAVES: f32 = (CHROMA_BINS / NUM_CHROMA) as f32;
/// Chroma autorange floor
const CHROMA_MAX_FLOOR: f32 = 0.2;
/// Per-hop easing of `silent_scale`
const SILENT_SCALE_RATE: f32 = 0.1;

/// Everything the producer chain computed for one hop
#[derive(Debug, Clone, Copy)]
pub struct HopFeatures<'a> {
    pub sequence: u64,
    pub hop_index: u64,
    pub spectrum: &'a SpectralFrame,
    pub onset: OnsetOutput,
    pub tempo: TempoEstimate,
    pub quality: SignalQualitySnapshot,
    /// RMS of the capture staging ring, full scale = 1.0
    pub rms: f32,
    /// Numeric faults already substituted upstream this hop
    pub upstream_faults: u32,
}

/// Builds feature frames and owns the last-good state
pub struct ContractAggregator {
    config: ContractConfig,
    hop_ms: f32,
    novelty: f32,
    silent_ms: f32,
    silent_scale: f32,
    error_count: u32,
    previous: FeatureFrame,
}

impl ContractAggregator {
    pub fn new(config: &ContractConfig) -> Self {
        Self {
            config: config.clone(),
            hop_ms: (CHUNK_SIZE as u32 * 1000) as f32 / SAMPLE_RATE_HZ as f32,
            novelty: 0.0,
            silent_ms: 0.0,
            silent_scale: 1.0,
            error_count: 0,
            previous: FeatureFrame::default(),
        }
    }

    /// Build this hop's frame
    pub fn aggregate(&mut self, hop: &HopFeatures<'_>) -> FeatureFrame {
        let previous = self.previous;
        let mut faults = hop.upstream_faults;

        let (bins_fast, bins_heavy) = if all_finite(&hop.spectrum.fast)
            && all_finite(&hop.spectrum.heavy)
        {
            (BinArray(hop.spectrum.fast), BinArray(hop.spectrum.heavy))
        } else {
            faults += 1;
            (previous.bins_fast, previous.bins_heavy)
        };

        let bands_fast = fold_bands(&bins_fast.0);
        let bands_heavy = fold_bands(&bins_heavy.0);
        let chroma = fold_chroma(&bins_heavy.0);

        let novelty = if hop.onset.novelty.is_finite() {
            self.novelty = smooth_toward(
                self.novelty,
                hop.onset.novelty,
                self.config.scalar_attack,
                self.config.scalar_release,
            );
            self.novelty
        } else {
            faults += 1;
            previous.novelty
        };

        let tempo = if tempo_is_finite(&hop.tempo) {
            TempoEstimate {
                confidence: hop.tempo.confidence.clamp(0.0, 1.0),
                ..hop.tempo
            }
        } else {
            faults += 1;
            previous.tempo
        };

        let (is_silent, silent_scale) = self.update_silence_gate(hop.rms);

        self.error_count = self.error_count.saturating_add(faults);

        let frame = FeatureFrame {
            version: FRAME_VERSION,
            sequence: hop.sequence,
            hop_index: hop.hop_index,
            bins_fast,
            bins_heavy,
            bands_fast,
            bands_heavy,
            chroma,
            novelty,
            tempo,
            onsets: hop.onset.flags,
            quality: hop.quality,
            error_count: self.error_count,
            silent_scale,
            is_silent,
        };
        self.previous = frame;
        frame
    }

    fn update_silence_gate(&mut self, rms: f32) -> (bool, f32) {
        if self.config.silence_hysteresis_ms <= 0.0 {
            self.silent_scale = 1.0;
            return (false, 1.0);
        }
        if rms.is_finite() && rms < self.config.silence_threshold {
            self.silent_ms += self.hop_ms;
        } else {
            self.silent_ms = 0.0;
        }
        let is_silent = self.silent_ms >= self.config.silence_hysteresis_ms;
        let target = if is_silent { 0.0 } else { 1.0 };
        self.silent_scale =
            target * SILENT_SCALE_RATE + self.silent_scale * (1.0 - SILENT_SCALE_RATE);
        (is_silent, self.silent_scale)
    }

    /// Frame most recently built
    pub fn last_frame(&self) -> &FeatureFrame {
        &self.previous
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }
}

/// Fold five octaves of the heavy path into 12 pitch classes, autoranged
pub fn fold_chroma(heavy: &[f32; NUM_BINS]) -> [f32; NUM_CHROMA] {
    let mut chroma = [0.0f32; NUM_CHROMA];
    for (i, &value) in heavy.iter().take(CHROMA_BINS).enumerate() {
        chroma[i % NUM_CHROMA] += value / CHROMA_OCTAVES;
    }
    let max_val = chroma.iter().copied().fold(CHROMA_MAX_FLOOR, f32::max);
    for value in chroma.iter_mut() {
        *value /= max_val;
    }
    chroma
}

fn all_finite(values: &[f32]) -> bool {
    values.iter().all(|v| v.is_finite())
}

fn tempo_is_finite(tempo: &TempoEstimate) -> bool {
    tempo.bpm.is_finite()
        && tempo.beat_phase01.is_finite()
        && tempo.confidence.is_finite()
        && tempo.beat_strength.is_finite()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop<'a>(spectrum: &'a SpectralFrame, rms: f32, index: u64) -> HopFeatures<'a> {
        HopFeatures {
            sequence: index,
            hop_index: index,
            spectrum,
            onset: OnsetOutput::default(),
            tempo: TempoEstimate {
                bpm: 120.0,
                confidence: 0.5,
                ..TempoEstimate::default()
            },
            quality: SignalQualitySnapshot::default(),
            rms,
            upstream_faults: 0,
        }
    }

    #[test]
    fn test_chroma_folds_octaves() {
        let mut heavy = [0.0f32; NUM_BINS];
        // Every A across five octaves
        for octave in 0..5 {
            heavy[octave * 12] = 1.0;
        }
        let chroma = fold_chroma(&heavy);
        assert!((chroma[0] - 1.0).abs() < 1e-6);
        assert!(chroma[1..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_chroma_floor_keeps_quiet_input_quiet() {
        let mut heavy = [0.0f32; NUM_BINS];
        heavy[3] = 0.1;
        let chroma = fold_chroma(&heavy);
        // 0.1 / 5 = 0.02 against the 0.2 floor
        assert!((chroma[3] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_frame_carries_metadata() {
        let mut aggregator = ContractAggregator::new(&ContractConfig::default());
        let spectrum = SpectralFrame::default();
        let frame = aggregator.aggregate(&hop(&spectrum, 0.1, 7));
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.hop_index, 7);
        assert_eq!(frame.tempo.bpm, 120.0);
        // Already smoothed by the tracker
        assert_eq!(frame.tempo.confidence, 0.5);
        assert_eq!(frame.error_count, 0);
        assert!(frame.is_finite());
    }

    #[test]
    fn test_novelty_step_rises_at_attack_rate() {
        let config = ContractConfig::default();
        let mut aggregator = ContractAggregator::new(&config);
        let spectrum = SpectralFrame::default();
        let mut step = hop(&spectrum, 0.1, 0);
        step.onset.novelty = 1.0;

        let attack = config.scalar_attack;
        let first = aggregator.aggregate(&step).novelty;
        assert!((first - attack).abs() < 1e-6);
        let second = aggregator.aggregate(&step).novelty;
        assert!((second - (attack + (1.0 - attack) * attack)).abs() < 1e-6);

        step.onset.novelty = 0.0;
        let falling = aggregator.aggregate(&step).novelty;
        assert!((falling - second * (1.0 - config.scalar_release)).abs() < 1e-6);
    }

    #[test]
    fn test_bands_and_chroma_are_not_smoothed_again() {
        let mut aggregator = ContractAggregator::new(&ContractConfig::default());
        let quiet = SpectralFrame::default();
        aggregator.aggregate(&hop(&quiet, 0.1, 0));

        let mut loud = SpectralFrame::default();
        loud.fast = [0.8; NUM_BINS];
        loud.heavy[12] = 0.6;
        loud.heavy[24] = 0.6;
        let frame = aggregator.aggregate(&hop(&loud, 0.1, 1));
        // A step in the analyzer paths shows up in full on the same hop
        assert_eq!(frame.bands_fast, fold_bands(&loud.fast));
        assert_eq!(frame.bands_heavy, fold_bands(&loud.heavy));
        assert_eq!(frame.chroma, fold_chroma(&loud.heavy));
    }

    #[test]
    fn test_confidence_follows_tracker_immediately() {
        let mut aggregator = ContractAggregator::new(&ContractConfig::default());
        let spectrum = SpectralFrame::default();
        let mut features = hop(&spectrum, 0.1, 0);
        aggregator.aggregate(&features);
        features.tempo.confidence = 0.0;
        assert_eq!(aggregator.aggregate(&features).tempo.confidence, 0.0);
    }

    #[test]
    fn test_non_finite_bins_reuse_previous_frame() {
        let mut aggregator = ContractAggregator::new(&ContractConfig::default());
        let mut good = SpectralFrame::default();
        good.fast[10] = 0.7;
        good.heavy[10] = 0.4;
        let first = aggregator.aggregate(&hop(&good, 0.1, 0));

        let mut bad = good;
        bad.fast[20] = f32::NAN;
        let second = aggregator.aggregate(&hop(&bad, 0.1, 1));
        assert_eq!(second.bins_fast, first.bins_fast);
        assert_eq!(second.error_count, 1);
        assert!(second.is_finite());
    }

    #[test]
    fn test_non_finite_tempo_reuses_previous() {
        let mut aggregator = ContractAggregator::new(&ContractConfig::default());
        let spectrum = SpectralFrame::default();
        let first = aggregator.aggregate(&hop(&spectrum, 0.1, 0));

        let mut broken = hop(&spectrum, 0.1, 1);
        broken.tempo.beat_phase01 = f32::NAN;
        broken.upstream_faults = 1;
        let second = aggregator.aggregate(&broken);
        assert_eq!(second.tempo, first.tempo);
        assert_eq!(second.error_count, 2);
    }

    #[test]
    fn test_silence_gate_closes_after_hysteresis() {
        let config = ContractConfig {
            silence_hysteresis_ms: 80.0,
            ..ContractConfig::default()
        };
        let mut aggregator = ContractAggregator::new(&config);
        let spectrum = SpectralFrame::default();

        // 80 ms = 10 hops
        for index in 0..9 {
            let frame = aggregator.aggregate(&hop(&spectrum, 0.0, index));
            assert!(!frame.is_silent);
        }
        let frame = aggregator.aggregate(&hop(&spectrum, 0.0, 9));
        assert!(frame.is_silent);

        let mut scale = frame.silent_scale;
        for index in 10..60 {
            scale = aggregator.aggregate(&hop(&spectrum, 0.0, index)).silent_scale;
        }
        assert!(scale < 0.01);

        // Any sound reopens the gate immediately
        let frame = aggregator.aggregate(&hop(&spectrum, 0.5, 60));
        assert!(!frame.is_silent);
        assert!(frame.silent_scale > scale);
    }

    #[test]
    fn test_silence_gate_disabled() {
        let config = ContractConfig {
            silence_hysteresis_ms: 0.0,
            ..ContractConfig::default()
        };
        let mut aggregator = ContractAggregator::new(&config);
        let spectrum = SpectralFrame::default();
        for index in 0..50 {
            let frame = aggregator.aggregate(&hop(&spectrum, 0.0, index));
            assert!(!frame.is_silent);
            assert_eq!(frame.silent_scale, 1.0);
        }
    }
}
