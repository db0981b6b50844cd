#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Behavior layer of the turret firmware.
//!
//! [`BehaviorController`] decides what the turret does each tick from the
//! stability classifier and the presence sensor, and [`Turret`] runs every
//! subsystem in order against a set of drivers.

/// Tuning constants and runtime settings.
pub mod config;
/// Outer and engagement state machines.
pub mod controller;
/// Voice line pools and the sample catalog.
pub mod narration;
/// JSON log and event plumbing.
pub mod telemetry;
/// Per-tick driver.
pub mod turret;

use thiserror::Error;

pub use config::RuntimeConfig;
pub use controller::{
    BehaviorContext, BehaviorController, EngagementState, Narration, OuterState,
};
pub use narration::{sample_catalog, NarrationCategory, SampleGroup};
pub use telemetry::{random_seed, seeded_rng, BehaviorTelemetry, BehaviorTelemetryBuilder};
pub use turret::{TickReport, Turret};

/// Failures raised while setting up the behavior layer.
#[derive(Debug, Error)]
pub enum BehaviorError {
    /// A runtime setting is out of range.
    #[error("invalid runtime config: {0}")]
    InvalidConfig(String),
}
