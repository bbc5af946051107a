//! TempoTracker - oscillator bank over the novelty history
//!
//! One Goertzel oscillator per integer BPM runs over the normalised novelty
//! history. The bank is swept round-robin, a fixed number of oscillators per
//! hop, so the per-hop cost is bounded regardless of the BPM range.
//!
//! Each hop:
//! 1. Normalise the history by its maximum and check for silence
//! 2. Measure the next oscillators (magnitude and phase)
//! 3. Autorange all magnitudes, quartic-scale, update the smoothed powers
//! 4. Advance every oscillator's phase by its own rate times the elapsed hops
//! 5. Pick the winner with hysteresis and derive confidence
//! 6. Advance the global beat phase by the same elapsed time and pull it
//!    towards the winner
//!
//! Every oscillator keeps its phase advancing whether or not it is measured
//! or winning, and the global beat phase only closes a fraction of its error
//! to the winner per hop, so a winner change never moves the beat phase by
//! more than the correction share of half a cycle plus one hop of advance.

use serde::Serialize;
use std::f32::consts::PI;

use super::onset::NoveltyHistory;
use crate::config::{hop_rate_hz, TempoConfig, NOVELTY_HISTORY_LENGTH};
use crate::error::NumericFault;

/// Smallest oscillator window in hops
pub const MIN_BLOCK_SIZE: usize = 32;
/// Beat ticks closer than this share of the period are suppressed
const TICK_DEBOUNCE: f32 = 0.6;
/// Novelty window inspected for silence
const SILENCE_WINDOW_SECONDS: f32 = 2.56;
/// History reduction per hop at full silence
const SILENCE_REDUCTION: f32 = 0.10;
const NOVELTY_NORMALIZE_FLOOR: f32 = 0.00001;
const AUTORANGE_FLOOR: f32 = 0.01;
const POWER_SUM_FLOOR: f32 = 0.01;

/// Tracker output for one hop
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TempoEstimate {
    pub bpm: f32,
    /// Position within the beat, 0 at the downbeat; [0, 1)
    pub beat_phase01: f32,
    /// [0, 1]
    pub confidence: f32,
    /// True on the hop a beat starts
    pub beat_tick: bool,
    pub locked: bool,
    /// Winner's smoothed power
    pub beat_strength: f32,
    /// Off-beat half of a two-beat cycle
    pub phase_inverted: bool,
    /// 0 = music, 1 = silence
    pub silence_level: f32,
}

impl TempoEstimate {
    fn initial(bpm: f32) -> Self {
        Self {
            bpm,
            beat_phase01: 0.5,
            confidence: 0.0,
            beat_tick: false,
            locked: false,
            beat_strength: 0.0,
            phase_inverted: false,
            silence_level: 1.0,
        }
    }
}

/// One oscillator of the bank
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscillatorState {
    pub target_bpm: f32,
    pub target_hz: f32,
    pub block_size: usize,
    coeff: f32,
    cosine: f32,
    sine: f32,
    /// Phase advance per hop
    phase_step: f32,
    /// (-π, π]
    pub phase: f32,
    pub phase_inverted: bool,
    pub raw_magnitude: f32,
    pub smoothed_magnitude: f32,
    pub active: bool,
}

impl OscillatorState {
    fn new(bpm: f32, neighbour_hz: f32) -> Self {
        let hop_rate = hop_rate_hz();
        let target_hz = bpm / 60.0;
        let block_size = ((hop_rate / (neighbour_hz * 0.5)) as usize)
            .clamp(MIN_BLOCK_SIZE, NOVELTY_HISTORY_LENGTH);
        let w = 2.0 * PI * target_hz / hop_rate;
        Self {
            target_bpm: bpm,
            target_hz,
            block_size,
            coeff: 2.0 * w.cos(),
            cosine: w.cos(),
            sine: w.sin(),
            phase_step: w,
            phase: 0.0,
            phase_inverted: false,
            raw_magnitude: 0.0,
            smoothed_magnitude: 0.0,
            active: false,
        }
    }

    /// Goertzel over the newest `block_size` values of `curve`
    fn measure(&mut self, curve: &[f32], beat_shift: f32) {
        let start = curve.len() - self.block_size;
        let mut q1 = 0.0f32;
        let mut q2 = 0.0f32;
        for &x in &curve[start..] {
            let q0 = self.coeff * q1 - q2 + x;
            q2 = q1;
            q1 = q0;
        }

        let real = q1 - q2 * self.cosine;
        let imag = q2 * self.sine;
        self.phase = atan2_wrapped(imag, real, PI * beat_shift, &mut self.phase_inverted);

        let magnitude_squared = q1 * q1 + q2 * q2 - q1 * q2 * self.coeff;
        self.raw_magnitude = magnitude_squared.max(0.0).sqrt() / (self.block_size as f32 / 2.0);
    }

    fn advance(&mut self, elapsed_hops: u32) {
        let step = self.phase_step * elapsed_hops as f32;
        self.phase = wrap_phase(self.phase + step, &mut self.phase_inverted);
    }

    /// Phase advance for one hop, radians
    pub fn phase_step(&self) -> f32 {
        self.phase_step
    }
}

fn atan2_wrapped(imag: f32, real: f32, shift: f32, inverted: &mut bool) -> f32 {
    wrap_phase(imag.atan2(real) + shift, inverted)
}

/// Wrap into (-π, π], toggling `inverted` on each wrap
pub fn wrap_phase(mut phase: f32, inverted: &mut bool) -> f32 {
    if !phase.is_finite() {
        return phase;
    }
    while phase > PI {
        phase -= 2.0 * PI;
        *inverted = !*inverted;
    }
    while phase <= -PI {
        phase += 2.0 * PI;
        *inverted = !*inverted;
    }
    phase
}

/// Signed shortest distance from `from` to `to`
pub fn phase_difference(to: f32, from: f32) -> f32 {
    let mut scratch = false;
    wrap_phase(to - from, &mut scratch)
}

/// Multi-oscillator beat tracker
pub struct TempoTracker {
    config: TempoConfig,
    oscillators: Vec<OscillatorState>,
    curve: Box<[f32; NOVELTY_HISTORY_LENGTH]>,
    silence_window: usize,
    next_oscillator: usize,
    winner: usize,
    challenger: usize,
    challenger_hops: u32,
    power_sum: f32,
    beat_phase: f32,
    beat_inverted: bool,
    hops_since_tick: u32,
    silence_level: f32,
    estimate: TempoEstimate,
}

impl TempoTracker {
    /// Build the bank for `[bpm_min, bpm_max]`; the only allocation
    pub fn new(config: &TempoConfig) -> Self {
        let first = config.bpm_min.round() as u32;
        let last = (config.bpm_max.round() as u32).max(first + 1);
        let neighbour_hz = 1.0 / 60.0;
        let oscillators: Vec<OscillatorState> = (first..=last)
            .map(|bpm| OscillatorState::new(bpm as f32, neighbour_hz))
            .collect();
        let winner = oscillators.len() / 2;
        let initial_bpm = oscillators[winner].target_bpm;

        log::info!(
            "[Tempo] {} oscillators, {}-{} BPM, {} per hop",
            oscillators.len(),
            first,
            last,
            config.oscillators_per_hop
        );

        Self {
            config: config.clone(),
            oscillators,
            curve: Box::new([0.0; NOVELTY_HISTORY_LENGTH]),
            silence_window: ((SILENCE_WINDOW_SECONDS * hop_rate_hz()) as usize)
                .min(NOVELTY_HISTORY_LENGTH),
            next_oscillator: 0,
            winner,
            challenger: winner,
            challenger_hops: 0,
            power_sum: 0.0,
            beat_phase: 0.0,
            beat_inverted: false,
            hops_since_tick: 0,
            silence_level: 1.0,
            estimate: TempoEstimate::initial(initial_bpm),
        }
    }

    /// Advance one hop
    ///
    /// May scale `history` down during silence.
    ///
    /// # Returns
    /// * `Ok(TempoEstimate)` - This hop's estimate
    /// * `Err(NumericFault)` - A non-finite value surfaced; the previous
    ///   estimate is kept (see [`TempoTracker::estimate`])
    pub fn update(&mut self, history: &mut NoveltyHistory) -> Result<TempoEstimate, NumericFault> {
        self.update_elapsed(history, 1)
    }

    /// Advance by `elapsed_hops` hops of wall time
    ///
    /// Used after the capture side lost chunks: oscillator and beat phases
    /// move by their rate times the elapsed hops, and the tick debounce
    /// counts the lost hops. The caller keeps `history` on the hop grid
    /// (one value per elapsed hop). Zero is treated as one.
    pub fn update_elapsed(
        &mut self,
        history: &mut NoveltyHistory,
        elapsed_hops: u32,
    ) -> Result<TempoEstimate, NumericFault> {
        let elapsed_hops = elapsed_hops.max(1);
        self.normalize(history);
        self.check_silence(history);

        let per_hop = self.config.oscillators_per_hop.min(self.oscillators.len());
        for _ in 0..per_hop {
            let index = self.next_oscillator;
            self.oscillators[index].measure(&self.curve[..], self.config.beat_shift);
            self.next_oscillator = (index + 1) % self.oscillators.len();
        }

        let max_raw = self
            .oscillators
            .iter()
            .map(|o| o.raw_magnitude)
            .fold(AUTORANGE_FLOOR, f32::max);

        self.power_sum = 0.0;
        let keep = self.config.active_smoothing;
        for osc in self.oscillators.iter_mut() {
            let scaled = (osc.raw_magnitude / max_raw).clamp(0.0, 1.0).powi(4);
            osc.active = scaled > self.config.activity_threshold;
            if osc.active {
                osc.smoothed_magnitude = osc.smoothed_magnitude * keep + scaled * (1.0 - keep);
                self.power_sum += osc.smoothed_magnitude;
            } else {
                osc.smoothed_magnitude *= self.config.inactive_decay;
            }
            osc.advance(elapsed_hops);
        }

        let best = self.argmax_smoothed();
        self.select_winner(best);

        let max_smoothed = self.oscillators[best].smoothed_magnitude;
        let mut confidence = if self.power_sum > POWER_SUM_FLOOR {
            (max_smoothed / self.power_sum).clamp(0.0, 1.0)
        } else {
            0.0
        };
        confidence *= 1.0 - self.silence_level;

        let winner = self.oscillators[self.winner];
        if !confidence.is_finite() || !winner.phase.is_finite() || !self.beat_phase.is_finite() {
            self.reset_after_fault();
            return Err(NumericFault::NonFiniteTempo);
        }

        let beat_tick = self.advance_beat(&winner, elapsed_hops);

        let bpm = if (self.config.bpm_min..=self.config.bpm_max).contains(&winner.target_bpm) {
            winner.target_bpm
        } else {
            self.estimate.bpm
        };

        let mut beat_phase01 = (self.beat_phase + PI) / (2.0 * PI);
        if beat_phase01 >= 1.0 {
            beat_phase01 = 0.0;
        }

        self.estimate = TempoEstimate {
            bpm,
            beat_phase01,
            confidence,
            beat_tick,
            locked: confidence > self.config.lock_threshold,
            beat_strength: winner.smoothed_magnitude.clamp(0.0, 1.0),
            phase_inverted: self.beat_inverted,
            silence_level: self.silence_level,
        };
        Ok(self.estimate)
    }

    fn normalize(&mut self, history: &NoveltyHistory) {
        let scale = 1.0 / history.max().max(NOVELTY_NORMALIZE_FLOOR);
        let (head, tail) = history.latest(NOVELTY_HISTORY_LENGTH);
        for (dst, &src) in self.curve.iter_mut().zip(head.iter().chain(tail)) {
            *dst = src * scale;
        }
    }

    fn check_silence(&mut self, history: &mut NoveltyHistory) {
        let window = &self.curve[NOVELTY_HISTORY_LENGTH - self.silence_window..];
        let mut min_val = 1.0f32;
        let mut max_val = 0.0f32;
        for &value in window {
            let scaled = (value.min(0.5) * 2.0).sqrt();
            max_val = max_val.max(scaled);
            min_val = min_val.min(scaled);
        }
        let silence_raw = 1.0 - (max_val - min_val).abs();

        if silence_raw > self.config.silence_contrast {
            self.silence_level = ((silence_raw - 0.5) * 2.0).clamp(0.0, 1.0);
            history.scale(1.0 - self.silence_level * SILENCE_REDUCTION);
        } else {
            self.silence_level = 0.0;
        }
    }

    /// First oscillator with the largest smoothed power
    fn argmax_smoothed(&self) -> usize {
        let mut best = 0;
        for (index, osc) in self.oscillators.iter().enumerate() {
            if osc.smoothed_magnitude > self.oscillators[best].smoothed_magnitude {
                best = index;
            }
        }
        best
    }

    /// Challenger must beat the incumbent by the hysteresis ratio for
    /// `hysteresis_hops` consecutive hops
    fn select_winner(&mut self, best: usize) {
        if best == self.winner {
            self.challenger_hops = 0;
            return;
        }
        let incumbent = self.oscillators[self.winner].smoothed_magnitude;
        let challenger = self.oscillators[best].smoothed_magnitude;
        if challenger <= incumbent * self.config.hysteresis_ratio {
            self.challenger_hops = 0;
            return;
        }
        if best == self.challenger {
            self.challenger_hops += 1;
        } else {
            self.challenger = best;
            self.challenger_hops = 1;
        }
        if self.challenger_hops >= self.config.hysteresis_hops {
            log::debug!(
                "[Tempo] Winner {} -> {} BPM",
                self.oscillators[self.winner].target_bpm,
                self.oscillators[best].target_bpm
            );
            self.winner = best;
            self.challenger_hops = 0;
        }
    }

    /// Move the beat phase `elapsed_hops` hops; true on a debounced beat start
    fn advance_beat(&mut self, winner: &OscillatorState, elapsed_hops: u32) -> bool {
        let previous = self.beat_phase;
        let advanced = self.beat_phase + winner.phase_step * elapsed_hops as f32;
        let error = phase_difference(winner.phase, advanced);
        self.beat_phase = wrap_phase(
            advanced + error * self.config.phase_correction,
            &mut self.beat_inverted,
        );

        self.hops_since_tick = self.hops_since_tick.saturating_add(elapsed_hops);
        let period_hops = hop_rate_hz() / winner.target_hz;
        let crossed = previous < 0.0 && self.beat_phase >= 0.0;
        if crossed && self.hops_since_tick as f32 >= period_hops * TICK_DEBOUNCE {
            self.hops_since_tick = 0;
            true
        } else {
            false
        }
    }

    fn reset_after_fault(&mut self) {
        log::warn!("[Tempo] Non-finite tempo state; resetting oscillator bank");
        for osc in self.oscillators.iter_mut() {
            osc.phase = 0.0;
            osc.raw_magnitude = 0.0;
            osc.smoothed_magnitude = 0.0;
            osc.active = false;
        }
        self.beat_phase = 0.0;
        self.power_sum = 0.0;
    }

    /// Last valid estimate
    pub fn estimate(&self) -> TempoEstimate {
        self.estimate
    }

    pub fn oscillators(&self) -> &[OscillatorState] {
        &self.oscillators
    }

    pub fn power_sum(&self) -> f32 {
        self.power_sum
    }

    /// Global beat phase in (-π, π]
    pub fn beat_phase(&self) -> f32 {
        self.beat_phase
    }

    pub fn winner(&self) -> &OscillatorState {
        &self.oscillators[self.winner]
    }
}
