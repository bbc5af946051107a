// SignalQualityMonitor - per-hop health of the captured signal
//
// Sample-domain checks (range, DC, clipping, RMS noise floor) run on the raw
// chunk before analysis; spectral checks (SNR, band energy, numeric faults)
// run on the analyzer output. Out-of-range values set flags and are logged at
// a limited rate. Nothing here halts the pipeline.

use serde::{Serialize, Serializer};

use super::spectrum::{fold_bands, SpectralFrame};
use crate::audio::SampleChunk;
use crate::config::{QualityThresholds, CHUNK_SIZE, NUM_BANDS, NUM_BINS};

/// Divisor mapping i16 samples to ±1.0
pub const FULL_SCALE: f32 = 32_768.0;

bitflags::bitflags! {
    /// Bit set of quality faults
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct QualityFlags: u8 {
        const CLIPPING = 1 << 0;
        const DC_OFFSET = 1 << 1;
        const LOW_SNR = 1 << 2;
        const NOISY_ROOM = 1 << 3;
        const NUMERIC_FAULT = 1 << 4;
    }
}

impl QualityFlags {
    /// Lower-case names of the set flags
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        [
            (Self::CLIPPING, "clipping"),
            (Self::DC_OFFSET, "dc_offset"),
            (Self::LOW_SNR, "low_snr"),
            (Self::NOISY_ROOM, "noisy_room"),
            (Self::NUMERIC_FAULT, "numeric_fault"),
        ]
        .into_iter()
        .filter(move |(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
    }
}

/// Frames carry the raw bits on the wire
impl Serialize for QualityFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

/// Quality report for one hop
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalQualitySnapshot {
    pub min_sample: i16,
    pub max_sample: i16,
    pub mean_sample: f32,
    /// Tracked DC offset, full scale = 1.0
    pub dc_offset: f32,
    /// DC-corrected RMS of the hop, full scale = 1.0
    pub rms: f32,
    pub snr_db: f32,
    pub clipping: bool,
    /// Clip runs that completed or continued this hop
    pub clip_count: u32,
    /// Slow RMS floor, full scale = 1.0
    pub noise_floor: f32,
    pub spectral_energy: [f32; NUM_BANDS],
    pub non_finite_bins: u32,
    pub flags: QualityFlags,
}

impl Default for SignalQualitySnapshot {
    fn default() -> Self {
        Self {
            min_sample: 0,
            max_sample: 0,
            mean_sample: 0.0,
            dc_offset: 0.0,
            rms: 0.0,
            snr_db: 0.0,
            clipping: false,
            clip_count: 0,
            noise_floor: 0.0,
            spectral_energy: [0.0; NUM_BANDS],
            non_finite_bins: 0,
            flags: QualityFlags::empty(),
        }
    }
}

/// Tracks capture health across hops
pub struct SignalQualityMonitor {
    thresholds: QualityThresholds,
    dc: f32,
    noise_floor: f32,
    clip_run: usize,
    snapshot: SignalQualitySnapshot,
    hops: u64,
    log_every_hops: u64,
    last_logged_flags: QualityFlags,
    last_log_hop: u64,
}

impl SignalQualityMonitor {
    pub fn new(thresholds: &QualityThresholds, log_every_hops: u64) -> Self {
        Self {
            thresholds: thresholds.clone(),
            dc: 0.0,
            noise_floor: 0.0,
            clip_run: 0,
            snapshot: SignalQualitySnapshot::default(),
            hops: 0,
            log_every_hops: log_every_hops.max(1),
            last_logged_flags: QualityFlags::empty(),
            last_log_hop: 0,
        }
    }

    /// Start from calibrated DC and noise floor instead of zero
    pub fn seed(&mut self, dc_offset: f32, noise_floor: f32) {
        self.dc = dc_offset;
        self.noise_floor = noise_floor;
    }

    /// Sample-domain pass; writes the DC-corrected full-scale chunk to `out`
    pub fn condition(&mut self, chunk: &SampleChunk, out: &mut [f32; CHUNK_SIZE]) {
        let mut min_sample = i16::MAX;
        let mut max_sample = i16::MIN;
        let mut sum = 0i64;
        let mut sum_squares = 0.0f32;
        let mut clip_count = 0u32;
        let alpha = self.thresholds.dc_alpha;
        let clip_at = self.thresholds.clip_threshold.unsigned_abs();

        for (dst, &sample) in out.iter_mut().zip(chunk.samples.iter()) {
            min_sample = min_sample.min(sample);
            max_sample = max_sample.max(sample);
            sum += sample as i64;

            if sample.unsigned_abs() >= clip_at {
                self.clip_run += 1;
                if self.clip_run == self.thresholds.clip_run_length {
                    clip_count += 1;
                }
            } else {
                self.clip_run = 0;
            }

            let x = sample as f32 / FULL_SCALE;
            self.dc += alpha * (x - self.dc);
            let corrected = x - self.dc;
            sum_squares += corrected * corrected;
            *dst = corrected;
        }

        let rms = (sum_squares / CHUNK_SIZE as f32).sqrt();
        let (rise, fall) = (self.thresholds.noise_floor_rise, self.thresholds.noise_floor_fall);
        let rate = if rms > self.noise_floor { rise } else { fall };
        self.noise_floor += (rms - self.noise_floor) * rate;

        let snapshot = &mut self.snapshot;
        snapshot.min_sample = min_sample;
        snapshot.max_sample = max_sample;
        snapshot.mean_sample = sum as f32 / CHUNK_SIZE as f32;
        snapshot.dc_offset = self.dc;
        snapshot.rms = rms;
        snapshot.clip_count = clip_count;
        snapshot.clipping = clip_count > 0 || self.clip_run >= self.thresholds.clip_run_length;
        snapshot.noise_floor = self.noise_floor;
    }

    /// Spectral pass; completes and returns this hop's snapshot
    pub fn assess(&mut self, spectrum: &SpectralFrame) -> SignalQualitySnapshot {
        let snapshot = &mut self.snapshot;
        snapshot.snr_db = estimate_snr_db(&spectrum.full_scale);
        snapshot.spectral_energy = fold_bands(&spectrum.magnitudes);
        snapshot.non_finite_bins = spectrum.non_finite_bins;

        let mut flags = QualityFlags::empty();
        flags.set(QualityFlags::CLIPPING, snapshot.clipping);
        flags.set(
            QualityFlags::DC_OFFSET,
            snapshot.dc_offset.abs() > self.thresholds.max_dc_offset,
        );
        // SNR only means something once there is signal above the floor
        let has_signal = snapshot.rms > self.noise_floor * 2.0 && snapshot.rms > 1e-4;
        flags.set(
            QualityFlags::LOW_SNR,
            has_signal && snapshot.snr_db < self.thresholds.min_snr_db,
        );
        flags.set(
            QualityFlags::NOISY_ROOM,
            self.noise_floor > self.thresholds.noise_floor_ceiling,
        );
        flags.set(QualityFlags::NUMERIC_FAULT, spectrum.non_finite_bins > 0);
        snapshot.flags = flags;

        self.hops += 1;
        self.log_flags();
        self.snapshot
    }

    /// Flag a numeric fault raised downstream of the analyzer
    pub fn mark_numeric_fault(&mut self) {
        self.snapshot.flags.insert(QualityFlags::NUMERIC_FAULT);
    }

    pub fn snapshot(&self) -> &SignalQualitySnapshot {
        &self.snapshot
    }

    pub fn dc_offset(&self) -> f32 {
        self.dc
    }

    fn log_flags(&mut self) {
        let flags = self.snapshot.flags;
        let changed = flags != self.last_logged_flags;
        let due = self.hops - self.last_log_hop >= self.log_every_hops;
        if flags.is_empty() {
            if changed {
                log::info!("[Quality] Signal quality recovered");
                self.last_logged_flags = flags;
                self.last_log_hop = self.hops;
            }
            return;
        }
        if changed || due {
            log::warn!(
                "[Quality] flags {:#07b} (dc {:.4}, snr {:.1} dB, floor {:.4}, non-finite {})",
                flags.bits(),
                self.snapshot.dc_offset,
                self.snapshot.snr_db,
                self.snapshot.noise_floor,
                self.snapshot.non_finite_bins
            );
            self.last_logged_flags = flags;
            self.last_log_hop = self.hops;
        }
    }
}

/// Peak bin against the mean of the quietest half, in dB
///
/// Returns 0 when the spectrum is empty.
pub fn estimate_snr_db(bins: &[f32; NUM_BINS]) -> f32 {
    let mut sorted = *bins;
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));
    let peak = sorted[NUM_BINS - 1];
    if peak <= 1e-9 {
        return 0.0;
    }
    let noise = sorted[..NUM_BINS / 2].iter().sum::<f32>() / (NUM_BINS / 2) as f32;
    20.0 * (peak / noise.max(1e-9)).log10()
}
