//! Pipeline configuration loaded once at startup
//!
//! Structural constants (sample rate, chunk size, bin count, history lengths)
//! size fixed arrays and are compile-time. Everything else is a tunable loaded
//! from JSON before the producer loop starts; there is no runtime write path,
//! a change requires rebuilding the pipeline.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Capture sample rate in Hz
pub const SAMPLE_RATE_HZ: u32 = 16_000;
/// Samples delivered per capture chunk (one hop)
pub const CHUNK_SIZE: usize = 128;
/// Number of semitone-spaced frequency bins
pub const NUM_BINS: usize = 64;
/// Folded display bands (8 bins each)
pub const NUM_BANDS: usize = 8;
/// Pitch classes
pub const NUM_CHROMA: usize = 12;
/// Staging ring for raw capture (4 chunks)
pub const CAPTURE_RING_LENGTH: usize = CHUNK_SIZE * 4;
/// Sample history feeding the analyzer; covers the longest bin window
pub const SAMPLE_HISTORY_LENGTH: usize = 2048;
/// Novelty history in hops (~8.2 s at 125 Hz)
pub const NOVELTY_HISTORY_LENGTH: usize = 1024;

/// Hops per second
pub fn hop_rate_hz() -> f32 {
    SAMPLE_RATE_HZ as f32 / CHUNK_SIZE as f32
}

/// Wall-clock length of one hop
pub fn hop_period() -> Duration {
    Duration::from_micros(CHUNK_SIZE as u64 * 1_000_000 / SAMPLE_RATE_HZ as u64)
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub analyzer: AnalyzerConfig,
    pub onset: OnsetConfig,
    pub tempo: TempoConfig,
    pub contract: ContractConfig,
    pub quality: QualityThresholds,
    pub calibration: CalibrationConfig,
    pub telemetry: TelemetryConfig,
}

/// Capture queue sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Chunks buffered between the capture callback and the hop loop
    pub queue_capacity: usize,
    /// Longest a hop waits for the next chunk before reporting a timeout
    pub wait_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            // Six hops of slack before the source is considered stalled
            wait_timeout_ms: 48,
        }
    }
}

/// Goertzel bank and spectral post-processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Centre frequency of bin 0 (A1)
    pub base_frequency_hz: f32,
    /// Shortest per-bin window
    pub min_block_size: usize,
    /// Longest per-bin window
    pub max_block_size: usize,
    pub fast_attack: f32,
    pub fast_release: f32,
    pub heavy_attack: f32,
    pub heavy_release: f32,
    /// Subtract the learned per-bin noise floor
    pub noise_floor_enabled: bool,
    /// Normalise each of the four frequency zones independently
    pub zone_agc: bool,
    pub agc_attack: f32,
    pub agc_release: f32,
    pub agc_floor: f32,
    /// Lower bound of the global autoranger
    pub autorange_floor: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            base_frequency_hz: 55.0,
            min_block_size: 64,
            max_block_size: 2000,
            fast_attack: 0.15,
            fast_release: 0.03,
            heavy_attack: 0.08,
            heavy_release: 0.015,
            noise_floor_enabled: true,
            zone_agc: false,
            agc_attack: 0.05,
            agc_release: 0.05,
            agc_floor: 0.01,
            autorange_floor: 0.0025,
        }
    }
}

/// Spectral flux and percussive trigger parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnsetConfig {
    /// Multiplier applied to the whole novelty history before each write
    pub novelty_decay: f32,
    /// Hops in the moving baseline used to normalise flux (0 disables)
    pub baseline_length: usize,
    /// Rise over the previous hop that fires a percussive trigger
    pub trigger_jump: f32,
    pub snare_min_energy: f32,
    pub hihat_min_energy: f32,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        Self {
            novelty_decay: 0.999,
            baseline_length: 0,
            trigger_jump: 0.08,
            snare_min_energy: 0.10,
            hihat_min_energy: 0.05,
        }
    }
}

/// Oscillator bank parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    pub bpm_min: f32,
    pub bpm_max: f32,
    /// Scaled magnitude above which an oscillator counts as active
    pub activity_threshold: f32,
    /// Weight of the previous smoothed value for active oscillators
    pub active_smoothing: f32,
    /// Per-hop decay for inactive oscillators
    pub inactive_decay: f32,
    /// Goertzel evaluations per hop; the bank is swept round-robin
    pub oscillators_per_hop: usize,
    /// Challenger/incumbent ratio required to switch winner
    pub hysteresis_ratio: f32,
    /// Consecutive hops the challenger must hold that ratio
    pub hysteresis_hops: u32,
    /// Confidence above which the tracker reports lock
    pub lock_threshold: f32,
    /// Fraction of a half-cycle added to measured phase to lead the beat
    pub beat_shift: f32,
    /// Fraction of the phase error towards the winner removed per hop
    pub phase_correction: f32,
    /// Minimum novelty contrast that counts as music
    pub silence_contrast: f32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            bpm_min: 60.0,
            bpm_max: 300.0,
            activity_threshold: 0.005,
            active_smoothing: 0.975,
            inactive_decay: 0.995,
            oscillators_per_hop: 16,
            hysteresis_ratio: 1.1,
            hysteresis_hops: 5,
            // 241 oscillators at 1 BPM spacing spread power over the main lobe,
            // so a clean lock sits well below the 96-bin bank's 0.3
            lock_threshold: 0.03,
            beat_shift: 0.08,
            phase_correction: 0.1,
            silence_contrast: 0.5,
        }
    }
}

/// Feature-frame smoothing and silence gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractConfig {
    /// Rise rate for visual-facing scalars
    pub scalar_attack: f32,
    /// Fall rate for visual-facing scalars
    pub scalar_release: f32,
    /// Frame RMS (full scale = 1.0) under which the room counts as silent
    pub silence_threshold: f32,
    /// Sustained silence before the gate closes; 0 disables the gate
    pub silence_hysteresis_ms: f32,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            scalar_attack: 0.5,
            scalar_release: 0.1,
            silence_threshold: 0.002,
            silence_hysteresis_ms: 10_000.0,
        }
    }
}

/// Signal-quality pass/fail thresholds
///
/// These defaults are conservative placeholders. Correct values depend on
/// the microphone, enclosure and room and should be set by someone with
/// acoustic measurement gear; every field can be overridden from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// |sample| at or above this counts towards a clip run
    pub clip_threshold: i16,
    /// Consecutive samples at the threshold that flag clipping
    pub clip_run_length: usize,
    /// Per-sample DC tracker coefficient
    pub dc_alpha: f32,
    /// DC offset (full scale = 1.0) above which the capture is flagged
    pub max_dc_offset: f32,
    /// SNR below this flags a weak or noisy signal
    pub min_snr_db: f32,
    /// Noise floor (full scale = 1.0) above which the room is flagged loud
    pub noise_floor_ceiling: f32,
    pub noise_floor_rise: f32,
    pub noise_floor_fall: f32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            clip_threshold: 32_000,
            clip_run_length: 3,
            dc_alpha: 0.001,
            max_dc_offset: 0.05,
            min_snr_db: 6.0,
            noise_floor_ceiling: 0.05,
            noise_floor_rise: 0.0005,
            noise_floor_fall: 0.01,
        }
    }
}

/// Startup DC-offset and noise-floor calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub enabled: bool,
    /// Audio to measure
    pub duration_ms: u64,
    /// Wall-clock budget; exceeding it falls back to defaults
    pub timeout_ms: u64,
    /// RMS above which the room is too loud to calibrate
    pub max_allowed_rms: f32,
    /// Multiplier applied to the measured RMS
    pub safety_multiplier: f32,
    /// Noise floor used when calibration fails
    pub default_noise_floor: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_ms: 3000,
            timeout_ms: 4500,
            max_allowed_rms: 0.15,
            safety_multiplier: 1.2,
            default_noise_floor: 0.01,
        }
    }
}

/// Telemetry cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Hops between flushes of health counters to the telemetry hub
    pub report_every_hops: u64,
    /// Hops between repeated warnings of the same fault
    pub log_every_hops: u64,
    /// Share of the hop period computation may use
    pub hop_budget_fraction: f32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            report_every_hops: 125,
            log_every_hops: 1250,
            hop_budget_fraction: 0.94,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, sanitized. Falls back to defaults when the
    /// file is missing or malformed.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<PipelineConfig>(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config.sanitized()
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load from the default location
    pub fn load() -> Self {
        Self::load_from_file("config/lightwave_audio.json")
    }

    /// Wall-clock budget for one hop of computation
    pub fn hop_budget(&self) -> Duration {
        hop_period().mul_f32(self.telemetry.hop_budget_fraction)
    }

    /// Clamp tunables into ranges the pipeline can run with
    ///
    /// Logs each correction so a bad config file is visible in the field.
    pub fn sanitized(mut self) -> Self {
        let defaults = PipelineConfig::default();

        let tempo = &mut self.tempo;
        if !(60.0..=300.0).contains(&tempo.bpm_min)
            || !(60.0..=300.0).contains(&tempo.bpm_max)
            || tempo.bpm_min + 1.0 > tempo.bpm_max
        {
            log::warn!(
                "[Config] BPM range {}-{} invalid; using {}-{}",
                tempo.bpm_min,
                tempo.bpm_max,
                defaults.tempo.bpm_min,
                defaults.tempo.bpm_max
            );
            tempo.bpm_min = defaults.tempo.bpm_min;
            tempo.bpm_max = defaults.tempo.bpm_max;
        }
        tempo.oscillators_per_hop = tempo.oscillators_per_hop.max(1);
        tempo.hysteresis_ratio = tempo.hysteresis_ratio.max(1.0);
        tempo.lock_threshold = tempo.lock_threshold.clamp(0.0, 1.0);
        tempo.phase_correction = tempo.phase_correction.clamp(0.0, 1.0);

        let analyzer = &mut self.analyzer;
        for rate in [
            &mut analyzer.fast_attack,
            &mut analyzer.fast_release,
            &mut analyzer.heavy_attack,
            &mut analyzer.heavy_release,
            &mut analyzer.agc_attack,
            &mut analyzer.agc_release,
        ] {
            if !(*rate > 0.0 && *rate <= 1.0) {
                log::warn!("[Config] Smoothing rate {} outside (0, 1]; clamping", rate);
                *rate = rate.clamp(0.001, 1.0);
            }
        }
        analyzer.min_block_size = analyzer.min_block_size.clamp(16, SAMPLE_HISTORY_LENGTH);
        analyzer.max_block_size = analyzer
            .max_block_size
            .clamp(analyzer.min_block_size, SAMPLE_HISTORY_LENGTH);

        let contract = &mut self.contract;
        contract.scalar_attack = contract.scalar_attack.clamp(0.001, 1.0);
        contract.scalar_release = contract.scalar_release.clamp(0.001, 1.0);

        self.capture.queue_capacity = self.capture.queue_capacity.max(2);
        self.quality.clip_run_length = self.quality.clip_run_length.max(1);
        self.onset.novelty_decay = self.onset.novelty_decay.clamp(0.0, 1.0);
        self.telemetry.report_every_hops = self.telemetry.report_every_hops.max(1);
        self.telemetry.log_every_hops = self.telemetry.log_every_hops.max(1);
        self.telemetry.hop_budget_fraction = self.telemetry.hop_budget_fraction.clamp(0.1, 1.0);
        self
    }
}
