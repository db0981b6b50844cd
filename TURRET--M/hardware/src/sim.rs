use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    DigitalOutput, HardwareError, LimitSwitch, Orientation, OrientationSensor, OutputId,
    PresenceSensor, ServoChannel, ServoOutput, TurretHardware,
};

/// Pulse width separating the opening and closing directions of the span servo.
const SPAN_STOP_US: u16 = 1500;
/// Ticks of span travel between fully closed and fully open.
const WING_TRAVEL: u32 = 100;

/// Half-open tick interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickWindow {
    /// First tick inside the window.
    pub start: u64,
    /// First tick after the window.
    pub end: u64,
}

impl TickWindow {
    /// Creates a window.
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Returns true when `tick` falls inside the window.
    #[must_use]
    pub const fn contains(&self, tick: u64) -> bool {
        tick >= self.start && tick < self.end
    }
}

/// Scripted environment for a simulated run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RigScript {
    /// Upright accelerometer reading.
    pub rest: Orientation,
    /// Reading while tipped over.
    pub tipped: Orientation,
    /// Windows during which a target stands in front of the turret.
    pub presence: Vec<TickWindow>,
    /// Windows during which the turret is being shaken.
    pub shake: Vec<TickWindow>,
    /// Windows during which the turret lies on its side.
    pub tip: Vec<TickWindow>,
    /// Per-axis uniform noise amplitude in sensor counts.
    pub noise: i32,
    /// Per-axis jitter amplitude while shaken.
    pub shake_amplitude: i32,
    /// Seed of the noise generator.
    pub seed: u64,
    /// Wings start against the closed stop.
    pub start_closed: bool,
    /// Span servo stalls and never moves (forces a wing fault).
    pub jammed: bool,
}

impl Default for RigScript {
    fn default() -> Self {
        Self {
            rest: Orientation::new(0, 0, 300),
            tipped: Orientation::new(290, 0, 40),
            presence: vec![TickWindow::new(300, 900), TickWindow::new(1_400, 1_700)],
            shake: vec![TickWindow::new(2_600, 2_700)],
            tip: vec![TickWindow::new(3_200, 3_600)],
            noise: 2,
            shake_amplitude: 180,
            seed: 7,
            start_closed: true,
            jammed: false,
        }
    }
}

#[derive(Debug)]
struct RigState {
    script: RigScript,
    tick: u64,
    extent: u32,
    span_us: u16,
    turn_us: u16,
    outputs: HashMap<OutputId, bool>,
    rng: SmallRng,
}

impl RigState {
    fn jitter(&mut self, amplitude: i32) -> i32 {
        if amplitude <= 0 {
            0
        } else {
            self.rng.gen_range(-amplitude..=amplitude)
        }
    }

    fn reading(&mut self) -> Orientation {
        let tick = self.tick;
        let tipped = self.script.tip.iter().any(|w| w.contains(tick));
        let shaken = self.script.shake.iter().any(|w| w.contains(tick));
        let base = if tipped {
            self.script.tipped
        } else {
            self.script.rest
        };
        let amplitude = if shaken {
            self.script.shake_amplitude
        } else {
            self.script.noise
        };
        Orientation::new(
            base.x + self.jitter(amplitude),
            base.y + self.jitter(amplitude),
            base.z + self.jitter(amplitude),
        )
    }
}

/// Simulated turret body shared by every driver handle.
///
/// The span servo moves the wings one step per tick in the direction its
/// pulse width selects; the end switch closes when the wings reach the
/// closed stop.
#[derive(Debug, Clone)]
pub struct SimulatedRig {
    state: Arc<Mutex<RigState>>,
}

impl SimulatedRig {
    /// Builds a rig from a script.
    #[must_use]
    pub fn new(script: RigScript) -> Self {
        let extent = if script.start_closed { 0 } else { WING_TRAVEL };
        let rng = SmallRng::seed_from_u64(script.seed);
        Self {
            state: Arc::new(Mutex::new(RigState {
                script,
                tick: 0,
                extent,
                span_us: 0,
                turn_us: 0,
                outputs: HashMap::new(),
                rng,
            })),
        }
    }

    /// Boxed driver handles for the control loop.
    #[must_use]
    pub fn hardware(&self) -> TurretHardware {
        TurretHardware {
            orientation: Box::new(self.clone()),
            presence: Box::new(self.clone()),
            outputs: Box::new(self.clone()),
            servos: Box::new(self.clone()),
            end_switch: Box::new(self.clone()),
        }
    }

    /// Advances the simulated world by one tick.
    pub fn advance(&self) {
        let mut state = self.state.lock();
        state.tick += 1;
        if state.script.jammed || state.span_us == 0 {
            return;
        }
        if state.span_us < SPAN_STOP_US {
            state.extent = (state.extent + 1).min(WING_TRAVEL);
        } else if state.span_us > SPAN_STOP_US {
            state.extent = state.extent.saturating_sub(1);
        }
    }

    /// Wing opening in ticks of travel, `0` when closed.
    #[must_use]
    pub fn wing_extent(&self) -> u32 {
        self.state.lock().extent
    }
}

impl OrientationSensor for SimulatedRig {
    fn read_orientation(&mut self) -> Result<Orientation, HardwareError> {
        Ok(self.state.lock().reading())
    }
}

impl PresenceSensor for SimulatedRig {
    fn target_present(&mut self) -> bool {
        let state = self.state.lock();
        state.script.presence.iter().any(|w| w.contains(state.tick))
    }
}

impl DigitalOutput for SimulatedRig {
    fn set_output(&mut self, id: OutputId, level: bool) {
        let mut state = self.state.lock();
        if state.outputs.insert(id, level) != Some(level) {
            debug!(tick = state.tick, ?id, level, "sim output");
        }
    }
}

impl ServoOutput for SimulatedRig {
    fn set_position(&mut self, channel: ServoChannel, micros: u16) {
        let mut state = self.state.lock();
        match channel {
            ServoChannel::Span => {
                if state.span_us != micros {
                    debug!(tick = state.tick, micros, "sim span servo");
                }
                state.span_us = micros;
            }
            ServoChannel::Turn => {
                if state.turn_us != micros {
                    trace!(tick = state.tick, micros, "sim turn servo");
                }
                state.turn_us = micros;
            }
        }
    }
}

impl LimitSwitch for SimulatedRig {
    fn is_end_position_reached(&mut self) -> bool {
        self.state.lock().extent == 0
    }
}
