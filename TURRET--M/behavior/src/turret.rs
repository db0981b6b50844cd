use rand::Rng;
use serde::Serialize;
use serde_json::json;
use shared_event_bus::EventKind;
use shared_logging::LogLevel;
use tracing::{error, warn};
use turret_actuators::{GunController, WingController, WingFault, WingState};
use turret_hardware::{OutputId, TurretHardware};
use turret_player::Player;
use turret_stability::{StabilityClassifier, StabilityReport};

use crate::{
    controller::{BehaviorContext, BehaviorController, EngagementState, OuterState},
    telemetry::BehaviorTelemetry,
};

/// Outcome of one control tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Outer behavior state after the tick.
    pub outer: OuterState,
    /// Engagement state after the tick.
    pub engagement: EngagementState,
    /// Wing state after the tick.
    pub wings: WingState,
    /// Classifier outputs the behavior step saw.
    pub stability: StabilityReport,
    /// A mechanical fault is latched.
    pub fault: bool,
}

/// Every subsystem of one turret, stepped in a fixed order each tick.
#[derive(Debug)]
pub struct Turret<R> {
    hardware: TurretHardware,
    classifier: StabilityClassifier,
    guns: GunController,
    wings: WingController,
    behavior: BehaviorController<R>,
    player: Player,
    telemetry: BehaviorTelemetry,
    fault: Option<WingFault>,
    tick: u64,
}

impl<R: Rng> Turret<R> {
    /// Wires the subsystems to a driver set and a player.
    #[must_use]
    pub fn new(hardware: TurretHardware, player: Player, rng: R) -> Self {
        Self {
            hardware,
            classifier: StabilityClassifier::new(),
            guns: GunController::new(),
            wings: WingController::new(),
            behavior: BehaviorController::new(rng),
            player,
            telemetry: BehaviorTelemetry::disabled(),
            fault: None,
            tick: 0,
        }
    }

    /// Attaches telemetry to the driver and the behavior controller.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: BehaviorTelemetry) -> Self {
        self.behavior = self.behavior.with_telemetry(telemetry.clone());
        self.telemetry = telemetry;
        self
    }

    /// Runs one tick: behavior, orientation sample, guns, wings.
    pub fn tick(&mut self) -> TickReport {
        self.tick += 1;
        let stability = self.classifier.report();
        let TurretHardware {
            orientation,
            presence,
            outputs,
            servos,
            end_switch,
        } = &mut self.hardware;

        let mut cx = BehaviorContext {
            presence: presence.as_mut(),
            outputs: outputs.as_mut(),
            guns: &mut self.guns,
            wings: &mut self.wings,
            player: &self.player,
        };
        self.behavior.step(self.tick, stability, &mut cx);

        match orientation.read_orientation() {
            Ok(sample) => self.classifier.sample(sample),
            Err(err) => warn!(tick = self.tick, %err, "orientation sample missed"),
        }

        self.guns.tick(outputs.as_mut(), &self.player);
        let wings = self
            .wings
            .tick(servos.as_mut(), end_switch.as_mut(), &self.player);
        if wings == WingState::Broken && self.fault.is_none() {
            self.latch_fault();
        }

        TickReport {
            tick: self.tick,
            outer: self.behavior.outer(),
            engagement: self.behavior.engagement(),
            wings,
            stability,
            fault: self.fault.is_some(),
        }
    }

    /// Latched mechanical fault. Stays set for the life of the turret.
    #[must_use]
    pub const fn fault(&self) -> Option<WingFault> {
        self.fault
    }

    /// Stops firing, asks the wings to close, and drops narration.
    pub fn shutdown(&mut self) {
        let outputs = self.hardware.outputs.as_mut();
        self.guns.shutdown(outputs, &self.player);
        outputs.set_output(OutputId::Laser, false);
        self.wings.scan(false);
        self.wings.open(false);
        self.behavior.shutdown(&self.player);
        let _ = self.telemetry.log(
            LogLevel::Info,
            self.tick,
            "turret.shutdown",
            json!({ "wings": self.wings.state() }),
        );
    }

    /// Ticks run so far.
    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.tick
    }

    /// Behavior controller.
    #[must_use]
    pub const fn behavior(&self) -> &BehaviorController<R> {
        &self.behavior
    }

    /// Gun controller.
    #[must_use]
    pub const fn guns(&self) -> &GunController {
        &self.guns
    }

    /// Wing controller.
    #[must_use]
    pub const fn wings(&self) -> &WingController {
        &self.wings
    }

    /// Stability classifier.
    #[must_use]
    pub const fn classifier(&self) -> &StabilityClassifier {
        &self.classifier
    }

    /// Player shared with the mixing thread.
    #[must_use]
    pub const fn player(&self) -> &Player {
        &self.player
    }

    fn latch_fault(&mut self) {
        self.fault = self.wings.fault();
        error!(tick = self.tick, fault = ?self.fault, "wing fault latched");
        let payload = json!({ "component": "wings", "fault": self.fault });
        let _ = self
            .telemetry
            .log(LogLevel::Error, self.tick, "turret.fault", payload.clone());
        let _ = self.telemetry.event(EventKind::Fault, self.tick, payload);
    }
}
