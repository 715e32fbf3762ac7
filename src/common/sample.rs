/// Number of readings a [`WindowedSample`] remembers
pub const SAMPLE_WINDOW: usize = 6;

/// Sliding window over the most recent readings of a noisy signal
///
/// Consumers read the window's `min` and `max` instead of the raw value, so a
/// single outlier cannot widen or narrow a bound on its own for long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowedSample {
    values: [i32; SAMPLE_WINDOW],
    min: i32,
    max: i32,
}

impl WindowedSample {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a new reading, dropping the oldest one
    pub fn update(&mut self, value: i32) {
        self.values.copy_within(0..SAMPLE_WINDOW - 1, 1);
        self.values[0] = value;
        self.min = value;
        self.max = value;
        for v in &self.values {
            self.min = self.min.min(*v);
            self.max = self.max.max(*v);
        }
    }

    pub fn latest(&self) -> i32 {
        self.values[0]
    }

    pub fn min(&self) -> i32 {
        self.min
    }

    pub fn max(&self) -> i32 {
        self.max
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
