//! Fade-in and fade-out tables written once at each silence boundary.
//!
//! Each table is one quantum of output frames following a raised cosine from
//! the DAC floor up to the level of a silent mixed sample, so that starting
//! and stopping output never produces a step.

use std::f64::consts::PI;

use once_cell::sync::Lazy;

use crate::config::{QUANTUM, QUANTUM_BYTES};

static RAMP_UP: Lazy<[u8; QUANTUM_BYTES]> = Lazy::new(|| {
    let mut table = [0u8; QUANTUM_BYTES];
    for frame in 0..QUANTUM {
        table[frame * 2 + 1] = ramp_level(frame);
    }
    table
});

static RAMP_DOWN: Lazy<[u8; QUANTUM_BYTES]> = Lazy::new(|| {
    let mut table = [0u8; QUANTUM_BYTES];
    for frame in 0..QUANTUM {
        table[frame * 2 + 1] = ramp_level(QUANTUM - 1 - frame);
    }
    table
});

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn ramp_level(frame: usize) -> u8 {
    let phase = frame as f64 * PI / QUANTUM as f64;
    ((1.0 - phase.cos()) / 4.0 * 215.0 + 40.0) as u8
}

/// Frames written when output starts.
#[must_use]
pub fn ramp_up() -> &'static [u8] {
    &RAMP_UP[..]
}

/// Frames written when output stops.
#[must_use]
pub fn ramp_down() -> &'static [u8] {
    &RAMP_DOWN[..]
}
