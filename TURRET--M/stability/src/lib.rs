#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Stability classification from a rolling window of accelerometer samples.

/// Tuning constants.
pub mod config;
/// Rolling sample window.
pub mod window;

use serde::{Deserialize, Serialize};
use tracing::debug;
use turret_hardware::Orientation;

pub use window::StabilityWindow;

/// Snapshot of the classifier outputs, handy for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilityReport {
    /// Window has been filled at least once.
    pub filled: bool,
    /// Average magnitude off nominal gravity, or uneven.
    pub unstable: bool,
    /// Average direction off the upright reference.
    pub uneven: bool,
}

/// Classifies the turret as upright, disturbed, or tipped.
///
/// Both predicates compare the window sum against the reference scaled by the
/// window length, so no division or trigonometry happens per tick.
#[derive(Debug, Clone, Default)]
pub struct StabilityClassifier {
    window: StabilityWindow,
    unstable: bool,
    uneven: bool,
}

impl StabilityClassifier {
    /// Creates a classifier with an empty window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingests one sample and recomputes both predicates.
    pub fn sample(&mut self, orientation: Orientation) {
        self.window.push(orientation);
        if !self.window.is_filled() {
            return;
        }
        let uneven = self.compute_uneven();
        let unstable = uneven || self.compute_off_gravity();
        if uneven != self.uneven || unstable != self.unstable {
            debug!(unstable, uneven, sum = ?self.window.sum(), "stability changed");
        }
        self.uneven = uneven;
        self.unstable = unstable;
    }

    /// True when the turret is disturbed. Always true when uneven.
    #[must_use]
    pub const fn is_unstable(&self) -> bool {
        self.unstable
    }

    /// True when the turret is not standing upright.
    #[must_use]
    pub const fn is_uneven(&self) -> bool {
        self.uneven
    }

    /// True once the window has been filled at least once.
    #[must_use]
    pub const fn is_filled(&self) -> bool {
        self.window.is_filled()
    }

    /// Window average, truncated toward zero.
    #[must_use]
    pub fn average(&self) -> Orientation {
        self.window.average()
    }

    /// Current classifier outputs.
    #[must_use]
    pub const fn report(&self) -> StabilityReport {
        StabilityReport {
            filled: self.window.is_filled(),
            unstable: self.unstable,
            uneven: self.uneven,
        }
    }

    fn compute_uneven(&self) -> bool {
        let n = config::WINDOW_LEN as i128;
        let [sx, sy, sz] = self.window.sum().map(i128::from);
        let dx = sx - i128::from(config::REST.x) * n;
        let dy = sy - i128::from(config::REST.y) * n;
        let dz = sz - i128::from(config::REST.z) * n;
        dx * dx + dy * dy + dz * dz > i128::from(config::UNEVEN_DISTANCE_SQ) * n * n
    }

    fn compute_off_gravity(&self) -> bool {
        let n = config::WINDOW_LEN as i128;
        let [sx, sy, sz] = self.window.sum().map(i128::from);
        let magnitude_sq = (sx * sx + sy * sy + sz * sz) * 100 * 100;
        let gravity = i128::from(config::GRAVITY);
        let tolerance = i128::from(config::GRAVITY_TOLERANCE_PCT);
        let low = gravity * n * (100 - tolerance);
        let high = gravity * n * (100 + tolerance);
        magnitude_sq < low * low || magnitude_sq > high * high
    }
}
