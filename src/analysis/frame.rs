// FeatureFrame - the published per-hop snapshot
//
// Plain `Copy` data: the publisher moves frames between cores by value and
// consumers never reach back into analyzer state.

use serde::ser::{Serialize, Serializer};

use super::onset::OnsetFlags;
use super::quality::SignalQualitySnapshot;
use super::tempo::TempoEstimate;
use crate::config::{NUM_BANDS, NUM_BINS, NUM_CHROMA};

/// Bumped whenever the frame layout changes
pub const FRAME_VERSION: u32 = 1;

/// Full-resolution spectrum; serialises as a plain JSON array
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinArray(pub [f32; NUM_BINS]);

impl Default for BinArray {
    fn default() -> Self {
        BinArray([0.0; NUM_BINS])
    }
}

impl Serialize for BinArray {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

/// One hop of audio features
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct FeatureFrame {
    pub version: u32,
    /// Capture sequence of the chunk this frame was built from
    pub sequence: u64,
    /// Producer hops since start, including skipped ones
    pub hop_index: u64,
    pub bins_fast: BinArray,
    pub bins_heavy: BinArray,
    pub bands_fast: [f32; NUM_BANDS],
    pub bands_heavy: [f32; NUM_BANDS],
    pub chroma: [f32; NUM_CHROMA],
    pub novelty: f32,
    pub tempo: TempoEstimate,
    pub onsets: OnsetFlags,
    pub quality: SignalQualitySnapshot,
    /// Numeric faults substituted since start
    pub error_count: u32,
    /// 1.0 with sound, easing to 0.0 after sustained silence
    pub silent_scale: f32,
    pub is_silent: bool,
}

impl Default for FeatureFrame {
    fn default() -> Self {
        Self {
            version: FRAME_VERSION,
            sequence: 0,
            hop_index: 0,
            bins_fast: BinArray::default(),
            bins_heavy: BinArray::default(),
            bands_fast: [0.0; NUM_BANDS],
            bands_heavy: [0.0; NUM_BANDS],
            chroma: [0.0; NUM_CHROMA],
            novelty: 0.0,
            tempo: TempoEstimate::default(),
            onsets: OnsetFlags::default(),
            quality: SignalQualitySnapshot::default(),
            error_count: 0,
            silent_scale: 1.0,
            is_silent: false,
        }
    }
}

impl FeatureFrame {
    /// True when every float field is finite
    pub fn is_finite(&self) -> bool {
        let arrays = self
            .bins_fast
            .0
            .iter()
            .chain(self.bins_heavy.0.iter())
            .chain(self.bands_fast.iter())
            .chain(self.bands_heavy.iter())
            .chain(self.chroma.iter());
        let scalars = [
            self.novelty,
            self.tempo.bpm,
            self.tempo.beat_phase01,
            self.tempo.confidence,
            self.tempo.beat_strength,
            self.silent_scale,
        ];
        arrays.chain(scalars.iter()).all(|v| v.is_finite())
    }

    /// Largest fast band energy
    pub fn peak_band(&self) -> f32 {
        self.bands_fast.iter().copied().fold(0.0, f32::max)
    }
}
