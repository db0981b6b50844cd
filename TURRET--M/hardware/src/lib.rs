#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Driver boundary of the turret firmware.
//!
//! The behavior core never touches registers. It talks to the sensors and
//! actuators through the traits in this crate, which the firmware binds to
//! real drivers and the tests bind to the recorders in [`mock`].

/// Recording and scripted drivers for tests.
pub mod mock;
/// Simulated turret rig with simple wing physics.
pub mod sim;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures reported by driver reads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HardwareError {
    /// The bus transaction failed or timed out.
    #[error("bus transfer failed: {0}")]
    Bus(String),
    /// The device has no fresh data yet.
    #[error("device not ready")]
    NotReady,
}

/// One raw 3-axis accelerometer reading in sensor counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Orientation {
    /// X axis.
    pub x: i32,
    /// Y axis.
    pub y: i32,
    /// Z axis (gravity axis when upright).
    pub z: i32,
}

impl Orientation {
    /// Creates a reading.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Digital outputs driven by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputId {
    /// Left gun muzzle light.
    LeftGun,
    /// Right gun muzzle light.
    RightGun,
    /// Eye laser used as the status indicator.
    Laser,
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LeftGun => write!(f, "left_gun"),
            Self::RightGun => write!(f, "right_gun"),
            Self::Laser => write!(f, "laser"),
        }
    }
}

/// Pulse-width actuator channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServoChannel {
    /// Opens and closes the wings.
    Span,
    /// Turns the wings left and right.
    Turn,
}

impl fmt::Display for ServoChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Span => write!(f, "span"),
            Self::Turn => write!(f, "turn"),
        }
    }
}

/// Accelerometer driver.
pub trait OrientationSensor: Send {
    /// Reads the current orientation.
    fn read_orientation(&mut self) -> Result<Orientation, HardwareError>;
}

/// Passive infrared presence driver.
pub trait PresenceSensor: Send {
    /// Returns true while a target is in view.
    fn target_present(&mut self) -> bool;
}

/// Digital output driver.
pub trait DigitalOutput: Send {
    /// Drives an output high or low.
    fn set_output(&mut self, id: OutputId, level: bool);
}

/// Pulse-width actuator driver.
pub trait ServoOutput: Send {
    /// Sets the pulse width of a channel. Zero stops the pulse train.
    fn set_position(&mut self, channel: ServoChannel, micros: u16);
}

/// Wing end-position switch driver.
pub trait LimitSwitch: Send {
    /// Returns true while the wings rest against the closed stop.
    fn is_end_position_reached(&mut self) -> bool;
}

/// The full set of drivers handed to the control loop at startup.
pub struct TurretHardware {
    /// Accelerometer.
    pub orientation: Box<dyn OrientationSensor>,
    /// Presence sensor.
    pub presence: Box<dyn PresenceSensor>,
    /// Guns and indicator outputs.
    pub outputs: Box<dyn DigitalOutput>,
    /// Span and turn actuators.
    pub servos: Box<dyn ServoOutput>,
    /// Closed-position switch.
    pub end_switch: Box<dyn LimitSwitch>,
}

impl fmt::Debug for TurretHardware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurretHardware").finish_non_exhaustive()
    }
}
