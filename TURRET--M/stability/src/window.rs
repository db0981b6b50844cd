use turret_hardware::Orientation;

use crate::config::WINDOW_LEN;

/// Fixed-capacity ring of the last [`WINDOW_LEN`] samples with per-axis sums.
///
/// The sums always equal the sum of the slots: the evicted slot is subtracted
/// before the new sample is added. Unwritten slots hold zero.
#[derive(Debug, Clone)]
pub struct StabilityWindow {
    slots: [Orientation; WINDOW_LEN],
    sum: [i64; 3],
    next: usize,
    filled: bool,
}

impl Default for StabilityWindow {
    fn default() -> Self {
        Self {
            slots: [Orientation::default(); WINDOW_LEN],
            sum: [0; 3],
            next: 0,
            filled: false,
        }
    }
}

impl StabilityWindow {
    /// Overwrites the oldest slot with `sample`.
    pub fn push(&mut self, sample: Orientation) {
        let evicted = self.slots[self.next];
        self.sum[0] += i64::from(sample.x) - i64::from(evicted.x);
        self.sum[1] += i64::from(sample.y) - i64::from(evicted.y);
        self.sum[2] += i64::from(sample.z) - i64::from(evicted.z);
        self.slots[self.next] = sample;
        self.next = (self.next + 1) % WINDOW_LEN;
        if self.next == 0 {
            self.filled = true;
        }
    }

    /// Per-axis running sums.
    #[must_use]
    pub const fn sum(&self) -> [i64; 3] {
        self.sum
    }

    /// True once every slot has been written at least once.
    #[must_use]
    pub const fn is_filled(&self) -> bool {
        self.filled
    }

    /// Per-axis average over the window, truncated toward zero.
    #[must_use]
    pub fn average(&self) -> Orientation {
        let n = WINDOW_LEN as i64;
        let axis = |sum: i64| {
            i32::try_from(sum / n).unwrap_or(if sum < 0 { i32::MIN } else { i32::MAX })
        };
        Orientation::new(axis(self.sum[0]), axis(self.sum[1]), axis(self.sum[2]))
    }
}
