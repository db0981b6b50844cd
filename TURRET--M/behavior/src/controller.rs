use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_event_bus::EventKind;
use shared_logging::LogLevel;
use tracing::{debug, info};
use turret_actuators::{GunController, WingController};
use turret_hardware::{DigitalOutput, OutputId, PresenceSensor};
use turret_player::{Player, StreamHandle};
use turret_stability::StabilityReport;

use crate::{
    config::{
        ABOUT_TO_CLOSE_PROBABILITY, ABOUT_TO_CLOSE_TICKS, BACK_TO_LOSING_PROBABILITY, BLINK_MASK,
        FALLEN_RECOVERY_TICKS, LOSING_FALLBACK_TICKS, LOSING_TICKS, LOST_IDLE_TICKS,
        LOST_PROBABILITY, PICKUP_RETRIGGER_PROBABILITY, UNSTABLE_HOLD_TICKS,
        UNSTABLE_LINGER_MODULUS, WOBBLY_TICKS,
    },
    narration::NarrationCategory,
    telemetry::BehaviorTelemetry,
};

/// How the turret body is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OuterState {
    /// Upright and calm; the engagement machine runs.
    Stable,
    /// Briefly disturbed.
    Wobbly,
    /// Disturbed for a while.
    Unstable,
    /// Knocked over.
    Fallen,
}

/// What the turret is doing about targets while stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementState {
    /// Closed, waiting for a target.
    Search,
    /// Wings opening, greeting playing.
    Opening,
    /// Shooting at a present target.
    Firing,
    /// Target just left.
    Losing,
    /// Target gone for a while; sweeping.
    Lost,
    /// About to give up.
    AboutToClose,
    /// Wings closing, retiring line playing.
    Closing,
}

impl fmt::Display for OuterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stable => "stable",
            Self::Wobbly => "wobbly",
            Self::Unstable => "unstable",
            Self::Fallen => "fallen",
        })
    }
}

impl fmt::Display for EngagementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Search => "search",
            Self::Opening => "opening",
            Self::Firing => "firing",
            Self::Losing => "losing",
            Self::Lost => "lost",
            Self::AboutToClose => "about_to_close",
            Self::Closing => "closing",
        })
    }
}

/// The line most recently requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Narration {
    /// Pool it came from.
    pub category: NarrationCategory,
    /// Sample identifier.
    pub sample: &'static str,
}

/// Sensors and actuators the controller touches during one step.
pub struct BehaviorContext<'a> {
    /// Target presence input.
    pub presence: &'a mut dyn PresenceSensor,
    /// Indicator and gun outputs.
    pub outputs: &'a mut dyn DigitalOutput,
    /// Gun controller.
    pub guns: &'a mut GunController,
    /// Wing controller.
    pub wings: &'a mut WingController,
    /// Audio player.
    pub player: &'a Player,
}

/// Two-level behavior state machine.
///
/// The outer level reacts to the stability classifier. While it is
/// [`OuterState::Stable`] the engagement level reacts to target presence.
/// Both levels share one narration slot: a new line always closes the
/// current one first.
#[derive(Debug)]
pub struct BehaviorController<R> {
    outer: OuterState,
    engagement: EngagementState,
    outer_ticks: u32,
    engagement_ticks: u32,
    narration: Option<StreamHandle>,
    last_line: Option<Narration>,
    scan_paused: bool,
    tick: u64,
    rng: R,
    telemetry: BehaviorTelemetry,
}

impl<R: Rng> BehaviorController<R> {
    /// Creates a stable, searching controller drawing from `rng`.
    #[must_use]
    pub fn new(rng: R) -> Self {
        Self {
            outer: OuterState::Stable,
            engagement: EngagementState::Search,
            outer_ticks: 0,
            engagement_ticks: 0,
            narration: None,
            last_line: None,
            scan_paused: false,
            tick: 0,
            rng,
            telemetry: BehaviorTelemetry::disabled(),
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: BehaviorTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Outer state.
    #[must_use]
    pub const fn outer(&self) -> OuterState {
        self.outer
    }

    /// Engagement state, kept while the outer machine is disturbed.
    #[must_use]
    pub const fn engagement(&self) -> EngagementState {
        self.engagement
    }

    /// True while a narration line is owned.
    #[must_use]
    pub const fn narrating(&self) -> bool {
        self.narration.is_some()
    }

    /// Line most recently requested, whether or not it could be played.
    #[must_use]
    pub const fn last_line(&self) -> Option<Narration> {
        self.last_line
    }

    /// Runs one control tick.
    pub fn step(
        &mut self,
        tick: u64,
        stability: StabilityReport,
        cx: &mut BehaviorContext<'_>,
    ) -> OuterState {
        self.tick = tick;
        cx.player.reap(&mut self.narration);

        match self.outer {
            OuterState::Stable => {
                cx.outputs.set_output(OutputId::Laser, true);
                if stability.unstable {
                    self.set_outer(OuterState::Wobbly);
                    cx.guns.fire(false, cx.outputs, cx.player);
                    self.scan_paused = cx.wings.scanning();
                    cx.wings.scan(false);
                    self.outer_ticks = 0;
                } else {
                    self.engage(cx);
                }
            }
            OuterState::Wobbly => {
                self.blink(cx.outputs);
                if self.outer_ticks > WOBBLY_TICKS {
                    self.set_outer(OuterState::Unstable);
                    self.play_line(NarrationCategory::Pickup, cx.player);
                }
            }
            OuterState::Unstable => {
                self.blink(cx.outputs);
                if self.outer_ticks > UNSTABLE_HOLD_TICKS {
                    if stability.uneven {
                        self.set_outer(OuterState::Fallen);
                        cx.wings.open(false);
                        cx.outputs.set_output(OutputId::Laser, false);
                        self.set_engagement(EngagementState::Search);
                        self.scan_paused = false;
                        self.play_line(NarrationCategory::Tipped, cx.player);
                        self.outer_ticks = 0;
                    } else {
                        self.set_outer(OuterState::Stable);
                        self.resume(cx);
                    }
                } else if stability.unstable && !stability.uneven {
                    self.outer_ticks %= UNSTABLE_LINGER_MODULUS;
                    if self.narration.is_none()
                        && self.rng.gen::<f64>() < PICKUP_RETRIGGER_PROBABILITY
                    {
                        self.play_line(NarrationCategory::Pickup, cx.player);
                    }
                }
            }
            OuterState::Fallen => {
                if stability.uneven {
                    self.outer_ticks = 0;
                } else if self.outer_ticks > FALLEN_RECOVERY_TICKS {
                    self.set_outer(OuterState::Stable);
                    self.resume(cx);
                }
            }
        }
        self.outer_ticks = self.outer_ticks.saturating_add(1);
        self.outer
    }

    /// Releases the narration line.
    pub fn shutdown(&mut self, player: &Player) {
        player.release(&mut self.narration);
    }

    fn engage(&mut self, cx: &mut BehaviorContext<'_>) {
        let target = cx.presence.target_present();
        match self.engagement {
            EngagementState::Search => {
                if target {
                    cx.wings.open(true);
                    self.set_engagement(EngagementState::Opening);
                    self.engagement_ticks = 0;
                    self.play_line(NarrationCategory::Alert, cx.player);
                }
            }
            EngagementState::Opening => {
                if cx.wings.opened() && self.narration.is_none() {
                    self.enter_firing(cx);
                }
            }
            EngagementState::Firing => {
                if !target {
                    self.set_engagement(EngagementState::Losing);
                    cx.guns.fire(false, cx.outputs, cx.player);
                    self.engagement_ticks = 0;
                }
            }
            EngagementState::Losing => {
                if target {
                    self.enter_firing(cx);
                } else if self.engagement_ticks > LOSING_TICKS
                    && (self.engagement_ticks >= LOSING_FALLBACK_TICKS
                        || self.rng.gen::<f64>() < LOST_PROBABILITY)
                {
                    self.set_engagement(EngagementState::Lost);
                    cx.wings.scan(true);
                    self.engagement_ticks = 0;
                    self.play_line(NarrationCategory::Search, cx.player);
                }
            }
            EngagementState::Lost => {
                if target {
                    self.enter_firing(cx);
                } else if self.narration.is_none() && self.engagement_ticks > LOST_IDLE_TICKS {
                    let draw: f64 = self.rng.gen();
                    if draw < ABOUT_TO_CLOSE_PROBABILITY {
                        self.set_engagement(EngagementState::AboutToClose);
                        self.engagement_ticks = 0;
                    } else if draw < BACK_TO_LOSING_PROBABILITY {
                        self.set_engagement(EngagementState::Losing);
                        self.engagement_ticks = 0;
                    }
                }
            }
            EngagementState::AboutToClose => {
                if target {
                    self.enter_firing(cx);
                } else if self.engagement_ticks > ABOUT_TO_CLOSE_TICKS {
                    self.set_engagement(EngagementState::Closing);
                    cx.wings.scan(false);
                    cx.wings.open(false);
                    self.play_line(NarrationCategory::Retire, cx.player);
                }
            }
            EngagementState::Closing => {
                if cx.wings.closed() && self.narration.is_none() {
                    self.set_engagement(EngagementState::Search);
                }
            }
        }
        self.engagement_ticks = self.engagement_ticks.saturating_add(1);
    }

    fn enter_firing(&mut self, cx: &mut BehaviorContext<'_>) {
        self.set_engagement(EngagementState::Firing);
        cx.player.release(&mut self.narration);
        cx.wings.scan(false);
        cx.guns.fire(true, cx.outputs, cx.player);
    }

    /// Restarts whatever the disturbance interrupted: the guns when firing,
    /// the sweep when one was running.
    fn resume(&mut self, cx: &mut BehaviorContext<'_>) {
        if self.engagement == EngagementState::Firing {
            cx.guns.fire(true, cx.outputs, cx.player);
        } else if std::mem::take(&mut self.scan_paused) {
            cx.wings.scan(true);
        }
        debug!(engagement = %self.engagement, "engagement resumed");
    }

    fn blink(&self, outputs: &mut dyn DigitalOutput) {
        outputs.set_output(OutputId::Laser, self.outer_ticks & BLINK_MASK != 0);
    }

    fn play_line(&mut self, category: NarrationCategory, player: &Player) {
        player.release(&mut self.narration);
        let sample = category.pick(&mut self.rng);
        self.narration = player.play(sample);
        self.last_line = Some(Narration { category, sample });
        let playing = self.narration.is_some();
        debug!(category = category.label(), sample, playing, "narration");
        self.record(
            LogLevel::Info,
            "behavior.narration",
            EventKind::NarrationStarted,
            json!({ "category": category, "sample": sample, "playing": playing }),
        );
    }

    fn set_outer(&mut self, to: OuterState) {
        let from = self.outer;
        self.outer = to;
        info!(tick = self.tick, %from, %to, "outer state");
        self.record(
            LogLevel::Info,
            "behavior.outer",
            EventKind::StateChanged,
            json!({ "from": from, "to": to, "engagement": self.engagement }),
        );
    }

    fn set_engagement(&mut self, to: EngagementState) {
        let from = self.engagement;
        if from == to {
            return;
        }
        self.engagement = to;
        info!(tick = self.tick, %from, %to, "engagement state");
        self.record(
            LogLevel::Info,
            "behavior.engagement",
            EventKind::EngagementChanged,
            json!({ "from": from, "to": to, "after_ticks": self.engagement_ticks }),
        );
    }

    fn record(&self, level: LogLevel, message: &str, kind: EventKind, payload: Value) {
        let _ = self.telemetry.log(level, self.tick, message, payload.clone());
        let _ = self.telemetry.event(kind, self.tick, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narration::sample_catalog;
    use rand::rngs::mock::StepRng;
    use turret_actuators::{FireCommand, WingState, WingTarget};
    use turret_hardware::{
        mock::{RecordingOutputs, SharedFlag},
        sim::{RigScript, SimulatedRig},
    };
    use turret_player::{MemorySource, MemoryTransport, PlayerEngine};

    const CALM: StabilityReport = StabilityReport {
        filled: true,
        unstable: false,
        uneven: false,
    };
    const SHAKEN: StabilityReport = StabilityReport {
        filled: true,
        unstable: true,
        uneven: false,
    };
    const TIPPED: StabilityReport = StabilityReport {
        filled: true,
        unstable: true,
        uneven: true,
    };

    /// Draws of zero take every probabilistic branch.
    fn always() -> StepRng {
        StepRng::new(0, 0)
    }

    /// Draws of 0.9 take none of them. `gen_range` rejects this value for
    /// two-line pools, so only use it where no pickup or tipped line plays.
    fn never() -> StepRng {
        StepRng::new(u64::MAX / 10 * 9, 0)
    }

    /// Draws of 0.7: between the about-to-close and back-to-losing cuts,
    /// above every small per-tick probability.
    fn middling() -> StepRng {
        StepRng::new(u64::MAX / 10 * 7, 0)
    }

    fn library() -> MemorySource {
        let mut source = MemorySource::new();
        for group in sample_catalog() {
            for id in group.ids {
                source.insert(*id, vec![0u8; 512]);
            }
        }
        source
    }

    struct Harness {
        behavior: BehaviorController<StepRng>,
        presence: SharedFlag,
        outputs: RecordingOutputs,
        rig: SimulatedRig,
        guns: GunController,
        wings: WingController,
        player: Player,
        engine: PlayerEngine,
        transport: MemoryTransport,
        tick: u64,
    }

    impl Harness {
        fn new(rng: StepRng, script: RigScript) -> Self {
            let player = Player::new(library());
            let mut harness = Self {
                behavior: BehaviorController::new(rng),
                presence: SharedFlag::new(false),
                outputs: RecordingOutputs::new(),
                rig: SimulatedRig::new(script),
                guns: GunController::new(),
                wings: WingController::new(),
                engine: PlayerEngine::new(player.clone()),
                player,
                transport: MemoryTransport::new(),
                tick: 0,
            };
            harness.step(CALM);
            assert_eq!(harness.wings.state(), WingState::Closed);
            harness
        }

        fn step(&mut self, stability: StabilityReport) -> OuterState {
            self.tick += 1;
            let mut presence = self.presence.clone();
            let mut outputs = self.outputs.clone();
            let mut servos = self.rig.clone();
            let mut end_switch = self.rig.clone();
            let outer = {
                let mut cx = BehaviorContext {
                    presence: &mut presence,
                    outputs: &mut outputs,
                    guns: &mut self.guns,
                    wings: &mut self.wings,
                    player: &self.player,
                };
                self.behavior.step(self.tick, stability, &mut cx)
            };
            self.guns.tick(&mut outputs, &self.player);
            self.wings
                .tick(&mut servos, &mut end_switch, &self.player);
            self.rig.advance();
            self.engine.step(&mut self.transport).unwrap();
            outer
        }

        fn run_until(&mut self, stability: StabilityReport, limit: usize, done: impl Fn(&Self) -> bool) {
            for _ in 0..limit {
                if done(self) {
                    return;
                }
                self.step(stability);
            }
            assert!(done(self), "condition not reached in {limit} ticks");
        }

        fn engage(&mut self) {
            self.presence.set(true);
            self.run_until(CALM, 400, |h| {
                h.behavior.engagement() == EngagementState::Firing
            });
        }
    }

    #[test]
    fn presence_for_one_tick_starts_opening() {
        let mut h = Harness::new(always(), RigScript::default());
        h.presence.set(true);
        h.step(CALM);
        h.presence.set(false);
        assert_eq!(h.behavior.engagement(), EngagementState::Opening);
        assert_eq!(h.wings.target(), WingTarget::Open);
        assert_eq!(
            h.behavior.last_line().map(|line| line.category),
            Some(NarrationCategory::Alert)
        );
        assert!(h.behavior.narrating());
    }

    #[test]
    fn never_fires_when_the_wings_never_open() {
        let script = RigScript {
            jammed: true,
            ..RigScript::default()
        };
        let mut h = Harness::new(always(), script);
        h.presence.set(true);
        for _ in 0..1_000 {
            h.step(CALM);
        }
        assert_eq!(h.wings.state(), WingState::Broken);
        assert_eq!(h.behavior.engagement(), EngagementState::Opening);
        assert_eq!(h.guns.command(), FireCommand::Off);
    }

    #[test]
    fn firing_waits_for_wings_and_greeting() {
        let mut h = Harness::new(always(), RigScript::default());
        h.presence.set(true);
        h.step(CALM);
        for _ in 0..100 {
            h.step(CALM);
            assert_eq!(h.behavior.engagement(), EngagementState::Opening);
        }
        h.run_until(CALM, 200, |h| h.behavior.engagement() == EngagementState::Firing);
        assert!(h.wings.opened());
        assert_eq!(h.guns.command(), FireCommand::Fire);
        assert!(!h.wings.scanning());
    }

    #[test]
    fn full_engagement_cycle_returns_to_search() {
        let mut h = Harness::new(always(), RigScript::default());
        h.engage();
        h.presence.set(false);

        let mut seen = vec![h.behavior.engagement()];
        for _ in 0..3_000 {
            h.step(CALM);
            let state = h.behavior.engagement();
            if seen.last() != Some(&state) {
                seen.push(state);
            }
            if state == EngagementState::Search {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![
                EngagementState::Firing,
                EngagementState::Losing,
                EngagementState::Lost,
                EngagementState::AboutToClose,
                EngagementState::Closing,
                EngagementState::Search,
            ]
        );
        assert!(h.wings.closed());
        assert_eq!(
            h.behavior.last_line().map(|line| line.category),
            Some(NarrationCategory::Retire)
        );
    }

    #[test]
    fn losing_falls_back_to_lost_and_lost_can_hold() {
        let mut h = Harness::new(never(), RigScript::default());
        h.engage();
        h.presence.set(false);
        h.step(CALM);
        assert_eq!(h.behavior.engagement(), EngagementState::Losing);
        assert_eq!(h.guns.command(), FireCommand::Off);

        for _ in 0..350 {
            h.step(CALM);
        }
        assert_eq!(h.behavior.engagement(), EngagementState::Losing);
        h.run_until(CALM, 100, |h| h.behavior.engagement() == EngagementState::Lost);
        assert!(h.wings.scanning());

        for _ in 0..1_000 {
            h.step(CALM);
        }
        assert_eq!(h.behavior.engagement(), EngagementState::Lost);
    }

    #[test]
    fn lost_can_fall_back_to_losing_and_keeps_sweeping() {
        let mut h = Harness::new(middling(), RigScript::default());
        h.engage();
        h.presence.set(false);
        h.run_until(CALM, 500, |h| h.behavior.engagement() == EngagementState::Lost);
        assert!(h.wings.scanning());

        h.run_until(CALM, 300, |h| h.behavior.engagement() == EngagementState::Losing);
        assert!(h.wings.scanning());
        assert_eq!(h.guns.command(), FireCommand::Off);
        assert_eq!(
            h.behavior.last_line().map(|line| line.category),
            Some(NarrationCategory::Search)
        );

        h.run_until(CALM, 500, |h| h.behavior.engagement() == EngagementState::Lost);
        assert!(h.wings.scanning());
    }

    #[test]
    fn pickup_line_is_not_replayed_above_the_retrigger_odds() {
        let mut h = Harness::new(middling(), RigScript::default());
        h.run_until(SHAKEN, 20, |h| h.behavior.outer() == OuterState::Unstable);
        assert_eq!(
            h.behavior.last_line().map(|line| line.category),
            Some(NarrationCategory::Pickup)
        );
        h.run_until(SHAKEN, 20, |h| !h.behavior.narrating());
        for _ in 0..300 {
            assert_eq!(h.step(SHAKEN), OuterState::Unstable);
            assert!(!h.behavior.narrating());
        }
    }

    #[test]
    fn pickup_line_is_replayed_below_the_retrigger_odds() {
        let mut h = Harness::new(always(), RigScript::default());
        h.run_until(SHAKEN, 20, |h| h.behavior.outer() == OuterState::Unstable);
        for _ in 0..100 {
            assert_eq!(h.step(SHAKEN), OuterState::Unstable);
            assert!(h.behavior.narrating());
        }
    }

    #[test]
    fn disturbance_resumes_an_interrupted_sweep() {
        let mut h = Harness::new(middling(), RigScript::default());
        h.engage();
        h.presence.set(false);
        h.run_until(CALM, 500, |h| h.behavior.engagement() == EngagementState::Lost);
        h.run_until(CALM, 300, |h| h.behavior.engagement() == EngagementState::Losing);
        assert!(h.wings.scanning());

        assert_eq!(h.step(SHAKEN), OuterState::Wobbly);
        assert!(!h.wings.scanning());
        h.run_until(SHAKEN, 20, |h| h.behavior.outer() == OuterState::Unstable);
        h.run_until(CALM, 120, |h| h.behavior.outer() == OuterState::Stable);
        assert_eq!(h.behavior.engagement(), EngagementState::Losing);
        assert!(h.wings.scanning());
    }

    #[test]
    fn target_returning_while_lost_resumes_firing() {
        let mut h = Harness::new(always(), RigScript::default());
        h.engage();
        h.presence.set(false);
        h.run_until(CALM, 200, |h| h.behavior.engagement() == EngagementState::Lost);
        assert!(h.behavior.narrating());
        h.presence.set(true);
        h.step(CALM);
        assert_eq!(h.behavior.engagement(), EngagementState::Firing);
        assert!(!h.behavior.narrating());
        assert!(!h.wings.scanning());
        assert_eq!(h.guns.command(), FireCommand::Fire);
    }

    #[test]
    fn disturbance_pauses_and_resumes_firing() {
        let mut h = Harness::new(always(), RigScript::default());
        h.engage();

        assert_eq!(h.step(SHAKEN), OuterState::Wobbly);
        assert_eq!(h.guns.command(), FireCommand::Off);
        assert_eq!(h.behavior.engagement(), EngagementState::Firing);
        h.step(SHAKEN);
        assert!(!h.outputs.level(OutputId::Laser));

        h.run_until(SHAKEN, 20, |h| h.behavior.outer() == OuterState::Unstable);
        assert_eq!(
            h.behavior.last_line().map(|line| line.category),
            Some(NarrationCategory::Pickup)
        );
        for _ in 0..300 {
            assert_eq!(h.step(SHAKEN), OuterState::Unstable);
        }

        h.run_until(CALM, 120, |h| h.behavior.outer() == OuterState::Stable);
        assert_eq!(h.behavior.engagement(), EngagementState::Firing);
        assert_eq!(h.guns.command(), FireCommand::Fire);
    }

    #[test]
    fn tipping_over_retracts_and_recovers_after_a_long_level_hold() {
        let mut h = Harness::new(always(), RigScript::default());
        h.engage();

        h.run_until(TIPPED, 200, |h| h.behavior.outer() == OuterState::Fallen);
        assert_eq!(h.behavior.engagement(), EngagementState::Search);
        assert_eq!(h.wings.target(), WingTarget::Closed);
        assert!(!h.outputs.level(OutputId::Laser));
        assert_eq!(
            h.behavior.last_line().map(|line| line.category),
            Some(NarrationCategory::Tipped)
        );

        for _ in 0..500 {
            h.step(CALM);
        }
        h.step(TIPPED);
        for _ in 0..1_000 {
            assert_eq!(h.step(CALM), OuterState::Fallen);
        }
        h.run_until(CALM, 5, |h| h.behavior.outer() == OuterState::Stable);
    }

    #[test]
    fn disturbance_blinks_the_indicator() {
        let mut h = Harness::new(always(), RigScript::default());
        h.step(SHAKEN);
        let mut levels = Vec::new();
        for _ in 0..40 {
            h.step(SHAKEN);
            levels.push(h.outputs.level(OutputId::Laser));
        }
        assert!(levels.contains(&true));
        assert!(levels.contains(&false));
    }
}
