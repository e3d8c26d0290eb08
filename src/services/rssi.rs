//! Bounded RSSI sample window
//!
//! Samples are RSSI values in integer dBm x10 (so -58.0 dBm is stored as
//! -580). Comparisons and means stay in that integer-scaled domain to keep
//! equality tests stable.

/// Fixed-capacity ring buffer of RSSI samples.
///
/// The backing storage is allocated once at construction and never grows;
/// the oldest sample is evicted on overflow.
#[derive(Debug, Clone)]
pub struct RssiWindow {
    samples: Vec<f64>,
    next: usize,
    filled: usize,
}

impl RssiWindow {
    pub fn new(capacity: usize) -> Self {
        Self { samples: vec![0.0; capacity.max(1)], next: 0, filled: 0 }
    }

    pub fn add(&mut self, value: f64) {
        self.samples[self.next] = value;
        self.next = (self.next + 1) % self.samples.len();
        if self.filled < self.samples.len() {
            self.filled += 1;
        }
    }

    /// Mean of the currently-present samples; 0 when empty
    pub fn mean(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        let sum: f64 = self.samples[..self.filled].iter().sum();
        sum / self.filled as f64
    }

    pub fn count(&self) -> usize {
        self.filled
    }
}
