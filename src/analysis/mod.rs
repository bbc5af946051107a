// Analysis module - per-hop DSP chain from conditioned samples to FeatureFrame
//
// Architecture:
// - SignalQualityMonitor: DC removal, clip detection, RMS, SNR flags
// - FrequencyAnalyzer: 64 Goertzel bins → noise floor → autorange → fast/heavy smoothing
// - OnsetDetector: spectral flux novelty + percussive triggers
// - TempoTracker: Goertzel oscillator bank over the novelty history
// - ContractAggregator: bands, chroma, silence gate, last-good substitution
//
// Every stage owns fixed-size state allocated at construction; nothing here
// allocates or blocks once the pipeline is running.

pub mod aggregator;
pub mod frame;
pub mod goertzel;
pub mod onset;
pub mod quality;
pub mod smoothing;
pub mod spectrum;
pub mod tempo;

pub use aggregator::{fold_chroma, ContractAggregator, HopFeatures};
pub use frame::{BinArray, FeatureFrame, FRAME_VERSION};
pub use goertzel::FrequencyBin;
pub use onset::{NoveltyHistory, OnsetDetector, OnsetFlags, OnsetOutput};
pub use quality::{QualityFlags, SignalQualityMonitor, SignalQualitySnapshot};
pub use spectrum::{fold_bands, FrequencyAnalyzer, SpectralFrame};
pub use tempo::{TempoEstimate, TempoTracker};
