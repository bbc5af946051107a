// Asymmetric smoothing and zone AGC
//
// Rises follow `attack`, falls follow `release`. Used for both spectral
// smoothing paths and for the visual-facing scalars of the feature frame.

use crate::config::NUM_BINS;

/// Frequency zones normalised independently by the AGC
pub const NUM_ZONES: usize = 4;
const BINS_PER_ZONE: usize = NUM_BINS / NUM_ZONES;

/// One step of attack/release smoothing
#[inline]
pub fn smooth_toward(current: f32, target: f32, attack: f32, release: f32) -> f32 {
    let alpha = if target > current { attack } else { release };
    current + (target - current) * alpha
}

/// Per-element asymmetric smoother over a fixed-size array
#[derive(Debug, Clone)]
pub struct AsymmetricSmoother<const N: usize> {
    attack: f32,
    release: f32,
    values: [f32; N],
}

impl<const N: usize> AsymmetricSmoother<N> {
    pub fn new(attack: f32, release: f32) -> Self {
        Self {
            attack,
            release,
            values: [0.0; N],
        }
    }

    /// Move every element towards `targets` and return the new state
    pub fn update(&mut self, targets: &[f32; N]) -> &[f32; N] {
        for (value, &target) in self.values.iter_mut().zip(targets.iter()) {
            *value = smooth_toward(*value, target, self.attack, self.release);
        }
        &self.values
    }

    pub fn values(&self) -> &[f32; N] {
        &self.values
    }

    pub fn reset(&mut self) {
        self.values = [0.0; N];
    }
}

/// Four-zone automatic gain control
///
/// Each zone keeps an envelope follower of its peak bin; bins are divided by
/// their zone's follower so quiet registers are not swamped by loud ones.
#[derive(Debug, Clone)]
pub struct ZoneAgc {
    followers: [f32; NUM_ZONES],
    attack: f32,
    release: f32,
    floor: f32,
}

impl ZoneAgc {
    pub fn new(attack: f32, release: f32, floor: f32) -> Self {
        Self {
            followers: [1.0; NUM_ZONES],
            attack,
            release,
            floor: floor.max(f32::EPSILON),
        }
    }

    pub fn apply(&mut self, bins: &mut [f32; NUM_BINS]) {
        for (zone, follower) in self.followers.iter_mut().enumerate() {
            let range = zone * BINS_PER_ZONE..(zone + 1) * BINS_PER_ZONE;
            let peak = bins[range.clone()].iter().copied().fold(0.0f32, f32::max);
            *follower = smooth_toward(*follower, peak, self.attack, self.release).max(self.floor);
            for bin in bins[range].iter_mut() {
                *bin /= *follower;
            }
        }
    }

    pub fn followers(&self) -> &[f32; NUM_ZONES] {
        &self.followers
    }
}
