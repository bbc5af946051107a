// RingBuffer - fixed-capacity rolling sample history
//
// Capacity is a const generic so the storage is an inline array with no
// allocation after construction. Before the first full cycle the unfilled
// region reads as `T::default()` (zero for samples); afterwards the buffer
// always holds exactly `N` valid values.

/// Circular history with a single write cursor
#[derive(Debug, Clone)]
pub struct RingBuffer<T: Copy + Default, const N: usize> {
    data: [T; N],
    /// Index the next value will be written to (also the oldest value)
    cursor: usize,
    filled: usize,
}

impl<T: Copy + Default, const N: usize> RingBuffer<T, N> {
    /// Zero-filled buffer
    ///
    /// # Panics
    /// Panics if `N` is 0
    pub fn new() -> Self {
        assert!(N > 0, "ring buffer capacity must be greater than 0");
        Self {
            data: [T::default(); N],
            cursor: 0,
            filled: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Valid values written so far, saturating at capacity
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn is_full(&self) -> bool {
        self.filled == N
    }

    /// Append values, evicting the oldest ones; O(values.len())
    ///
    /// Input longer than the capacity keeps only its newest `N` values.
    pub fn push(&mut self, values: &[T]) {
        let values = if values.len() > N {
            &values[values.len() - N..]
        } else {
            values
        };

        let first = (N - self.cursor).min(values.len());
        self.data[self.cursor..self.cursor + first].copy_from_slice(&values[..first]);
        let rest = values.len() - first;
        self.data[..rest].copy_from_slice(&values[first..]);

        self.cursor = (self.cursor + values.len()) % N;
        self.filled = (self.filled + values.len()).min(N);
    }

    /// Append a single value
    pub fn push_one(&mut self, value: T) {
        self.data[self.cursor] = value;
        self.cursor = (self.cursor + 1) % N;
        self.filled = (self.filled + 1).min(N);
    }

    /// Value `age` steps back in time (0 = newest)
    ///
    /// # Panics
    /// Panics if `age >= N`
    pub fn newest(&self, age: usize) -> T {
        assert!(age < N, "age {} out of range for capacity {}", age, N);
        self.data[(self.cursor + N - 1 - age) % N]
    }

    /// The newest `count` values in chronological order, as two slices
    ///
    /// Concatenating `.0` then `.1` yields oldest-to-newest. `count` is
    /// clamped to the capacity.
    pub fn latest(&self, count: usize) -> (&[T], &[T]) {
        let count = count.min(N);
        let start = (self.cursor + N - count) % N;
        if start + count <= N {
            (&self.data[start..start + count], &self.data[..0])
        } else {
            (&self.data[start..], &self.data[..self.cursor])
        }
    }

    /// Chronological copy of the newest `out.len()` values
    pub fn copy_latest(&self, out: &mut [T]) {
        let (head, tail) = self.latest(out.len());
        out[..head.len()].copy_from_slice(head);
        out[head.len()..head.len() + tail.len()].copy_from_slice(tail);
    }

    /// Apply `f` to every stored value in place
    pub fn map_in_place(&mut self, mut f: impl FnMut(T) -> T) {
        for value in self.data.iter_mut() {
            *value = f(*value);
        }
    }

    /// Reset to the zero-filled initial state
    pub fn clear(&mut self) {
        self.data = [T::default(); N];
        self.cursor = 0;
        self.filled = 0;
    }
}

impl<T: Copy + Default, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
