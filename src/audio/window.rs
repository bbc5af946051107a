// WindowBank - precomputed Hann window lookup
//
// One 4096-entry table serves every window length: a window of `len` samples
// reads the table at a stride of 4096 / len. The Goertzel bank uses the same
// stride per bin so each bin's variable-length block is tapered end to end.

/// Table resolution
pub const WINDOW_LUT_SIZE: usize = 4096;

/// Hann window lookup table
#[derive(Debug, Clone)]
pub struct WindowBank {
    table: Box<[f32; WINDOW_LUT_SIZE]>,
}

impl WindowBank {
    /// Build the table; the only allocation this type makes
    pub fn new() -> Self {
        let mut table = Box::new([0.0f32; WINDOW_LUT_SIZE]);
        let denom = (WINDOW_LUT_SIZE - 1) as f32;
        // Fill the first half and mirror so the table is exactly symmetric
        for i in 0..WINDOW_LUT_SIZE / 2 {
            let value = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / denom).cos());
            table[i] = value;
            table[WINDOW_LUT_SIZE - 1 - i] = value;
        }
        Self { table }
    }

    /// Table stride for a window of `len` samples
    #[inline]
    pub fn step_for(len: usize) -> f32 {
        WINDOW_LUT_SIZE as f32 / len.max(1) as f32
    }

    /// Raw table lookup at a fractional position (truncated, clamped)
    #[inline]
    pub fn value_at(&self, position: f32) -> f32 {
        let index = (position as usize).min(WINDOW_LUT_SIZE - 1);
        self.table[index]
    }

    /// Window coefficient `index` of a `len`-sample window
    #[inline]
    pub fn coefficient(&self, index: usize, len: usize) -> f32 {
        self.value_at(index as f32 * Self::step_for(len))
    }

    /// Multiply `samples` element-wise by a window of the same length
    ///
    /// Pure: writes only `out`. Panics if the lengths differ.
    pub fn apply(&self, samples: &[f32], out: &mut [f32]) {
        assert_eq!(
            samples.len(),
            out.len(),
            "window input and output lengths must match"
        );
        let step = Self::step_for(samples.len());
        for (i, (dst, &src)) in out.iter_mut().zip(samples).enumerate() {
            *dst = src * self.value_at(i as f32 * step);
        }
    }

    /// Full table, for inspection and tests
    pub fn table(&self) -> &[f32; WINDOW_LUT_SIZE] {
        &self.table
    }
}

impl Default for WindowBank {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_symmetric_hann() {
        let bank = WindowBank::new();
        let table = bank.table();
        assert!(table[0].abs() < 1e-6);
        assert!(table[WINDOW_LUT_SIZE - 1].abs() < 1e-6);
        assert!((table[WINDOW_LUT_SIZE / 2] - 1.0).abs() < 1e-3);
        for i in 0..WINDOW_LUT_SIZE {
            assert_eq!(table[i], table[WINDOW_LUT_SIZE - 1 - i]);
        }
    }

    #[test]
    fn test_all_ones_reproduces_window_shape() {
        let bank = WindowBank::new();
        for len in [64usize, 256, 1000, 2000] {
            let ones = vec![1.0f32; len];
            let mut out = vec![0.0f32; len];
            bank.apply(&ones, &mut out);
            for (i, value) in out.iter().enumerate() {
                assert!((value - bank.coefficient(i, len)).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_all_zero_yields_zero() {
        let bank = WindowBank::new();
        let zeros = vec![0.0f32; 512];
        let mut out = vec![1.0f32; 512];
        bank.apply(&zeros, &mut out);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_window_peaks_mid_block() {
        let bank = WindowBank::new();
        let len = 128;
        let mid = bank.coefficient(len / 2, len);
        assert!(mid > 0.99);
        assert!(bank.coefficient(0, len) < 0.01);
    }

    #[test]
    #[should_panic(expected = "lengths must match")]
    fn test_mismatched_lengths_panic() {
        let bank = WindowBank::new();
        let mut out = [0.0f32; 4];
        bank.apply(&[1.0; 3], &mut out);
    }
}
