use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::{
    DigitalOutput, HardwareError, LimitSwitch, Orientation, OrientationSensor, OutputId,
    PresenceSensor, ServoChannel, ServoOutput, TurretHardware,
};

/// Digital output recorder. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingOutputs {
    inner: Arc<Mutex<OutputLog>>,
}

#[derive(Debug, Default)]
struct OutputLog {
    levels: HashMap<OutputId, bool>,
    writes: Vec<(OutputId, bool)>,
}

impl RecordingOutputs {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last level written to `id`, false when never written.
    #[must_use]
    pub fn level(&self, id: OutputId) -> bool {
        self.inner.lock().levels.get(&id).copied().unwrap_or(false)
    }

    /// Every write in order.
    #[must_use]
    pub fn writes(&self) -> Vec<(OutputId, bool)> {
        self.inner.lock().writes.clone()
    }

    /// Number of writes recorded so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.inner.lock().writes.len()
    }

    /// Forgets the write history but keeps current levels.
    pub fn clear_history(&self) {
        self.inner.lock().writes.clear();
    }
}

impl DigitalOutput for RecordingOutputs {
    fn set_output(&mut self, id: OutputId, level: bool) {
        let mut log = self.inner.lock();
        log.levels.insert(id, level);
        log.writes.push((id, level));
    }
}

/// Servo recorder. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingServos {
    inner: Arc<Mutex<ServoLog>>,
}

#[derive(Debug, Default)]
struct ServoLog {
    positions: HashMap<ServoChannel, u16>,
    writes: Vec<(ServoChannel, u16)>,
}

impl RecordingServos {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last pulse width written to `channel`.
    #[must_use]
    pub fn position(&self, channel: ServoChannel) -> Option<u16> {
        self.inner.lock().positions.get(&channel).copied()
    }

    /// Every write to `channel` in order.
    #[must_use]
    pub fn history(&self, channel: ServoChannel) -> Vec<u16> {
        self.inner
            .lock()
            .writes
            .iter()
            .filter(|(ch, _)| *ch == channel)
            .map(|(_, us)| *us)
            .collect()
    }
}

impl ServoOutput for RecordingServos {
    fn set_position(&mut self, channel: ServoChannel, micros: u16) {
        let mut log = self.inner.lock();
        log.positions.insert(channel, micros);
        log.writes.push((channel, micros));
    }
}

/// A boolean input the test flips by hand. Usable as presence or limit switch.
#[derive(Debug, Clone, Default)]
pub struct SharedFlag {
    inner: Arc<Mutex<bool>>,
}

impl SharedFlag {
    /// Creates a flag with an initial value.
    #[must_use]
    pub fn new(value: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
        }
    }

    /// Sets the flag.
    pub fn set(&self, value: bool) {
        *self.inner.lock() = value;
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> bool {
        *self.inner.lock()
    }
}

impl PresenceSensor for SharedFlag {
    fn target_present(&mut self) -> bool {
        self.get()
    }
}

impl LimitSwitch for SharedFlag {
    fn is_end_position_reached(&mut self) -> bool {
        self.get()
    }
}

/// Orientation source returning whatever the test last set.
#[derive(Debug, Clone)]
pub struct ScriptedOrientation {
    inner: Arc<Mutex<Result<Orientation, HardwareError>>>,
}

impl ScriptedOrientation {
    /// Creates a source returning `orientation` until changed.
    #[must_use]
    pub fn new(orientation: Orientation) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Ok(orientation))),
        }
    }

    /// Changes the reading.
    pub fn set(&self, orientation: Orientation) {
        *self.inner.lock() = Ok(orientation);
    }

    /// Makes subsequent reads fail until [`Self::set`] is called again.
    pub fn fail(&self, error: HardwareError) {
        *self.inner.lock() = Err(error);
    }
}

impl OrientationSensor for ScriptedOrientation {
    fn read_orientation(&mut self) -> Result<Orientation, HardwareError> {
        self.inner.lock().clone()
    }
}

/// Handles onto a [`TurretHardware`] built from recorders, kept by the test.
#[derive(Debug, Clone)]
pub struct MockRig {
    /// Orientation source.
    pub orientation: ScriptedOrientation,
    /// Presence input.
    pub presence: SharedFlag,
    /// Output recorder.
    pub outputs: RecordingOutputs,
    /// Servo recorder.
    pub servos: RecordingServos,
    /// Closed-position switch.
    pub end_switch: SharedFlag,
}

impl MockRig {
    /// Upright, no target, wings resting closed.
    #[must_use]
    pub fn upright(rest: Orientation) -> Self {
        Self {
            orientation: ScriptedOrientation::new(rest),
            presence: SharedFlag::new(false),
            outputs: RecordingOutputs::new(),
            servos: RecordingServos::new(),
            end_switch: SharedFlag::new(true),
        }
    }

    /// Boxes clones of every handle into a driver set.
    #[must_use]
    pub fn hardware(&self) -> TurretHardware {
        TurretHardware {
            orientation: Box::new(self.orientation.clone()),
            presence: Box::new(self.presence.clone()),
            outputs: Box::new(self.outputs.clone()),
            servos: Box::new(self.servos.clone()),
            end_switch: Box::new(self.end_switch.clone()),
        }
    }
}
