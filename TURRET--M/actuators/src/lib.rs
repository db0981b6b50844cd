#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Actuator subsystems driven once per control tick.
//!
//! Each controller accepts high-level commands from the behavior layer,
//! turns them into timed output changes, and owns at most one sound stream.

/// Timing and position constants.
pub mod config;
/// Burst-fire controller for the two gun units.
pub mod guns;
/// Wing span and turn controller.
pub mod wings;

pub use guns::{FireCommand, GunController, GunPhase, GunUnit};
pub use wings::{WingController, WingFault, WingState, WingTarget};

/// Linear ramp from `start` at `t = 0` to `end` at `t >= duration`.
#[must_use]
pub const fn interpolate(t: i32, duration: i32, start: i32, end: i32) -> i32 {
    if t < duration {
        (start * (duration - t) + end * t) / duration
    } else {
        end
    }
}
