use serde::{Deserialize, Serialize};
use tracing::{error, info};
use turret_hardware::{LimitSwitch, ServoChannel, ServoOutput};
use turret_player::{Player, StreamHandle};

use crate::{
    config::wings::{
        CLOSE_RAMP_TICKS, CLOSE_SAMPLE, CLOSE_TIMEOUT_TICKS, OPEN_DEAD_TICKS, OPEN_RAMP_TICKS,
        OPEN_SAMPLE, SPAN_CLOSE_END, SPAN_CLOSE_START, SPAN_NEUTRAL, SPAN_OPEN_END,
        SPAN_OPEN_START, TURN_CENTER_ANGLE, TURN_LEFT, TURN_PARKED, TURN_RANGE, TURN_RIGHT,
    },
    interpolate,
};

/// Wing controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WingState {
    /// Before the first tick; position unknown.
    Initial,
    /// Span ramping open.
    Opening,
    /// Fully open, optionally sweeping.
    Open,
    /// Turning back to center before closing.
    Centering,
    /// Span ramping closed.
    Closing,
    /// Resting on the end switch.
    Closed,
    /// Mechanical fault. Terminal.
    Broken,
}

/// Position requested by the behavior layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WingTarget {
    /// Wings should be open.
    Open,
    /// Wings should be closed.
    Closed,
}

/// Why the wings gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WingFault {
    /// The end switch stayed closed well into the opening ramp.
    StuckClosed,
    /// Closing never reached the end switch.
    CloseTimeout,
}

/// Drives the span and turn actuators.
#[derive(Debug)]
pub struct WingController {
    state: WingState,
    target: WingTarget,
    tick: i32,
    angle: i32,
    scan_direction: i32,
    last_scan_direction: i32,
    fault: Option<WingFault>,
    stream: Option<StreamHandle>,
}

impl Default for WingController {
    fn default() -> Self {
        Self::new()
    }
}

impl WingController {
    /// Creates a controller that will close the wings on its first tick.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: WingState::Initial,
            target: WingTarget::Closed,
            tick: 0,
            angle: TURN_CENTER_ANGLE,
            scan_direction: 0,
            last_scan_direction: -1,
            fault: None,
            stream: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> WingState {
        self.state
    }

    /// Requested position.
    #[must_use]
    pub const fn target(&self) -> WingTarget {
        self.target
    }

    /// Turn angle in `0..=TURN_RANGE`.
    #[must_use]
    pub const fn angle(&self) -> i32 {
        self.angle
    }

    /// Latched fault, if the wings broke.
    #[must_use]
    pub const fn fault(&self) -> Option<WingFault> {
        self.fault
    }

    /// True when fully open.
    #[must_use]
    pub fn opened(&self) -> bool {
        self.state == WingState::Open
    }

    /// True when resting closed.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.state == WingState::Closed
    }

    /// True while a sweep is requested.
    #[must_use]
    pub const fn scanning(&self) -> bool {
        self.scan_direction != 0
    }

    /// Requests the wings open or closed. Takes effect on the next tick.
    pub fn open(&mut self, open: bool) {
        self.target = if open {
            WingTarget::Open
        } else {
            WingTarget::Closed
        };
    }

    /// Starts or stops the sweep. Stopping remembers the direction so a
    /// later start continues the same way.
    pub fn scan(&mut self, on: bool) {
        if on {
            if self.scan_direction == 0 {
                self.scan_direction = if self.last_scan_direction == 0 {
                    1
                } else {
                    self.last_scan_direction
                };
            }
        } else if self.scan_direction != 0 {
            self.last_scan_direction = self.scan_direction;
            self.scan_direction = 0;
        }
    }

    /// Advances the controller by one tick.
    pub fn tick(
        &mut self,
        servos: &mut dyn ServoOutput,
        end_switch: &mut dyn LimitSwitch,
        player: &Player,
    ) -> WingState {
        player.reap(&mut self.stream);
        match self.state {
            WingState::Initial => {
                servos.set_position(ServoChannel::Span, SPAN_NEUTRAL);
                self.set_turn(servos);
                self.begin_closing(servos, end_switch, player);
            }
            WingState::Opening => {
                self.tick += 1;
                set_span(servos, interpolate(self.tick, OPEN_RAMP_TICKS, SPAN_OPEN_START, SPAN_OPEN_END));
                if self.target == WingTarget::Closed {
                    self.begin_closing(servos, end_switch, player);
                } else if self.tick >= OPEN_DEAD_TICKS && end_switch.is_end_position_reached() {
                    self.broken(WingFault::StuckClosed, servos, player);
                } else if self.tick >= OPEN_RAMP_TICKS {
                    self.state = WingState::Open;
                    servos.set_position(ServoChannel::Span, SPAN_NEUTRAL);
                    player.release(&mut self.stream);
                    info!("wings open");
                }
            }
            WingState::Open => {
                if self.target == WingTarget::Closed {
                    self.begin_closing(servos, end_switch, player);
                } else if self.scan_direction != 0 {
                    self.angle += self.scan_direction;
                    if self.angle < 0 {
                        self.angle = 0;
                        self.scan_direction = 1;
                    } else if self.angle > TURN_RANGE {
                        self.angle = TURN_RANGE;
                        self.scan_direction = -1;
                    }
                    self.set_turn(servos);
                }
            }
            WingState::Centering => {
                if self.target == WingTarget::Open {
                    self.state = WingState::Open;
                    info!("wings reopened while centering");
                } else if self.angle == TURN_CENTER_ANGLE {
                    self.start_closing_ramp(servos, player);
                } else {
                    self.angle += if self.angle > TURN_CENTER_ANGLE { -1 } else { 1 };
                    self.set_turn(servos);
                }
            }
            WingState::Closing => {
                self.tick += 1;
                set_span(servos, interpolate(self.tick, CLOSE_RAMP_TICKS, SPAN_CLOSE_START, SPAN_CLOSE_END));
                if end_switch.is_end_position_reached() {
                    self.settle_closed(servos, player);
                } else if self.tick > CLOSE_TIMEOUT_TICKS {
                    self.broken(WingFault::CloseTimeout, servos, player);
                }
            }
            WingState::Closed => {
                if self.target == WingTarget::Open {
                    self.state = WingState::Opening;
                    self.tick = 0;
                    set_span(servos, SPAN_OPEN_START);
                    player.release(&mut self.stream);
                    self.stream = player.play(OPEN_SAMPLE);
                    info!("wings opening");
                }
            }
            WingState::Broken => {}
        }
        self.state
    }

    /// Parks the actuators and releases the motion sound.
    pub fn shutdown(&mut self, servos: &mut dyn ServoOutput, player: &Player) {
        player.release(&mut self.stream);
        servos.set_position(ServoChannel::Span, SPAN_NEUTRAL);
    }

    fn begin_closing(
        &mut self,
        servos: &mut dyn ServoOutput,
        end_switch: &mut dyn LimitSwitch,
        player: &Player,
    ) {
        if end_switch.is_end_position_reached() {
            self.settle_closed(servos, player);
        } else if self.state == WingState::Open {
            self.state = WingState::Centering;
            servos.set_position(ServoChannel::Span, SPAN_NEUTRAL);
            self.set_turn(servos);
            info!(angle = self.angle, "wings centering");
        } else {
            self.start_closing_ramp(servos, player);
        }
    }

    fn start_closing_ramp(&mut self, servos: &mut dyn ServoOutput, player: &Player) {
        self.state = WingState::Closing;
        self.tick = 0;
        set_span(servos, SPAN_CLOSE_START);
        player.release(&mut self.stream);
        self.stream = player.play(CLOSE_SAMPLE);
        info!("wings closing");
    }

    fn settle_closed(&mut self, servos: &mut dyn ServoOutput, player: &Player) {
        self.state = WingState::Closed;
        servos.set_position(ServoChannel::Span, SPAN_NEUTRAL);
        player.release(&mut self.stream);
        info!("wings closed");
    }

    fn broken(&mut self, fault: WingFault, servos: &mut dyn ServoOutput, player: &Player) {
        self.state = WingState::Broken;
        self.fault = Some(fault);
        servos.set_position(ServoChannel::Span, SPAN_NEUTRAL);
        servos.set_position(ServoChannel::Turn, TURN_PARKED);
        player.release(&mut self.stream);
        error!(?fault, tick = self.tick, "wings broken");
    }

    fn set_turn(&self, servos: &mut dyn ServoOutput) {
        set_span_channel(
            servos,
            ServoChannel::Turn,
            interpolate(self.angle, TURN_RANGE, TURN_LEFT, TURN_RIGHT),
        );
    }
}

fn set_span(servos: &mut dyn ServoOutput, micros: i32) {
    set_span_channel(servos, ServoChannel::Span, micros);
}

fn set_span_channel(servos: &mut dyn ServoOutput, channel: ServoChannel, micros: i32) {
    servos.set_position(channel, u16::try_from(micros).unwrap_or(SPAN_NEUTRAL));
}

#[cfg(test)]
mod tests {
    use super::*;
    use turret_hardware::mock::{RecordingServos, SharedFlag};
    use turret_player::MemorySource;

    struct Bench {
        wings: WingController,
        servos: RecordingServos,
        switch: SharedFlag,
        player: Player,
    }

    impl Bench {
        fn closed() -> Self {
            let mut bench = Self {
                wings: WingController::new(),
                servos: RecordingServos::new(),
                switch: SharedFlag::new(true),
                player: Player::new(
                    MemorySource::new()
                        .with_sample(OPEN_SAMPLE, vec![0u8; 4_096])
                        .with_sample(CLOSE_SAMPLE, vec![0u8; 4_096]),
                ),
            };
            assert_eq!(bench.tick(), WingState::Closed);
            bench
        }

        fn tick(&mut self) -> WingState {
            let mut servos = self.servos.clone();
            let mut switch = self.switch.clone();
            self.wings.tick(&mut servos, &mut switch, &self.player)
        }

        fn open_fully(&mut self) {
            self.wings.open(true);
            assert_eq!(self.tick(), WingState::Opening);
            self.switch.set(false);
            for _ in 0..OPEN_RAMP_TICKS {
                self.tick();
            }
            assert_eq!(self.wings.state(), WingState::Open);
        }
    }

    #[test]
    fn initial_tick_closes_when_switch_is_open() {
        let mut wings = WingController::new();
        let mut servos = RecordingServos::new();
        let mut switch = SharedFlag::new(false);
        let player = Player::new(MemorySource::new());
        assert_eq!(wings.tick(&mut servos, &mut switch, &player), WingState::Closing);
        assert_eq!(servos.position(ServoChannel::Turn), Some(1500));
        switch.set(true);
        assert_eq!(wings.tick(&mut servos, &mut switch, &player), WingState::Closed);
        assert_eq!(servos.position(ServoChannel::Span), Some(SPAN_NEUTRAL));
    }

    #[test]
    fn opening_takes_exactly_the_ramp() {
        let mut bench = Bench::closed();
        bench.wings.open(true);
        assert_eq!(bench.tick(), WingState::Opening);
        assert_eq!(bench.player.stream_count(), 1);
        bench.switch.set(false);
        for _ in 0..OPEN_RAMP_TICKS - 1 {
            assert_eq!(bench.tick(), WingState::Opening);
        }
        assert_eq!(bench.tick(), WingState::Open);
        assert!(bench.wings.opened());
        assert_eq!(bench.player.stream_count(), 0);
        let span = bench.servos.history(ServoChannel::Span);
        assert!(span.contains(&1300));
        assert_eq!(span.last(), Some(&SPAN_NEUTRAL));
    }

    #[test]
    fn switch_inside_dead_time_is_ignored() {
        let mut bench = Bench::closed();
        bench.wings.open(true);
        bench.tick();
        for _ in 1..OPEN_DEAD_TICKS {
            assert_eq!(bench.tick(), WingState::Opening);
        }
        bench.switch.set(false);
        for _ in 0..OPEN_RAMP_TICKS {
            bench.tick();
        }
        assert_eq!(bench.wings.state(), WingState::Open);
        assert_eq!(bench.wings.fault(), None);
    }

    #[test]
    fn switch_after_dead_time_breaks_the_wings() {
        let mut bench = Bench::closed();
        bench.wings.open(true);
        bench.tick();
        bench.switch.set(false);
        for _ in 0..OPEN_DEAD_TICKS + 5 {
            bench.tick();
        }
        bench.switch.set(true);
        assert_eq!(bench.tick(), WingState::Broken);
        assert_eq!(bench.wings.fault(), Some(WingFault::StuckClosed));
        assert_eq!(bench.servos.position(ServoChannel::Turn), Some(TURN_PARKED));

        bench.wings.open(false);
        bench.switch.set(false);
        for _ in 0..10 {
            assert_eq!(bench.tick(), WingState::Broken);
        }
        assert_eq!(bench.player.stream_count(), 0);
    }

    #[test]
    fn close_request_mid_ramp_goes_straight_to_closing() {
        let mut bench = Bench::closed();
        bench.wings.open(true);
        bench.tick();
        bench.switch.set(false);
        for _ in 0..20 {
            bench.tick();
        }
        bench.wings.open(false);
        assert_eq!(bench.tick(), WingState::Closing);
        assert_eq!(bench.player.stream_count(), 1);
        bench.switch.set(true);
        assert_eq!(bench.tick(), WingState::Closed);
        assert!(bench.wings.closed());
    }

    #[test]
    fn scan_sweeps_between_bounds() {
        let mut bench = Bench::closed();
        bench.open_fully();
        bench.wings.scan(true);
        let mut angles = Vec::new();
        for _ in 0..(TURN_RANGE * 3) {
            bench.tick();
            angles.push(bench.wings.angle());
        }
        assert!(angles.iter().all(|a| (0..=TURN_RANGE).contains(a)));
        assert!(angles.contains(&0));
        assert!(angles.contains(&TURN_RANGE));
        assert!(angles.windows(2).all(|w| (w[0] - w[1]).abs() <= 1));

        bench.wings.scan(false);
        let parked = bench.wings.angle();
        bench.tick();
        assert_eq!(bench.wings.angle(), parked);
    }

    #[test]
    fn scan_resumes_in_the_last_direction() {
        let mut bench = Bench::closed();
        bench.open_fully();
        bench.wings.scan(true);
        bench.tick();
        assert_eq!(bench.wings.angle(), TURN_CENTER_ANGLE - 1);
        bench.wings.scan(false);
        bench.wings.scan(false);
        bench.wings.scan(true);
        bench.tick();
        assert_eq!(bench.wings.angle(), TURN_CENTER_ANGLE - 2);
    }

    #[test]
    fn centering_precedes_closing_and_can_be_abandoned() {
        let mut bench = Bench::closed();
        bench.open_fully();
        bench.wings.scan(true);
        for _ in 0..10 {
            bench.tick();
        }
        bench.wings.scan(false);
        bench.wings.open(false);
        assert_eq!(bench.tick(), WingState::Centering);
        bench.tick();
        bench.wings.open(true);
        assert_eq!(bench.tick(), WingState::Open);

        bench.wings.open(false);
        assert_eq!(bench.tick(), WingState::Centering);
        while bench.wings.state() == WingState::Centering {
            bench.tick();
        }
        assert_eq!(bench.wings.state(), WingState::Closing);
        assert_eq!(bench.wings.angle(), TURN_CENTER_ANGLE);
    }

    #[test]
    fn closing_ramp_reaches_the_stop_pulse_on_time() {
        let mut bench = Bench::closed();
        bench.open_fully();
        bench.wings.open(false);
        bench.tick();
        assert_eq!(bench.tick(), WingState::Closing);
        for _ in 0..CLOSE_RAMP_TICKS - 1 {
            bench.tick();
        }
        let span = bench.servos.history(ServoChannel::Span);
        assert_ne!(span.last(), Some(&1600));
        bench.tick();
        assert_eq!(bench.servos.position(ServoChannel::Span), Some(1600));
        assert!(span.contains(&1550));
    }

    #[test]
    fn closing_times_out_into_broken() {
        let mut bench = Bench::closed();
        bench.open_fully();
        bench.wings.open(false);
        bench.tick();
        assert_eq!(bench.tick(), WingState::Closing);
        for _ in 0..CLOSE_TIMEOUT_TICKS {
            assert_eq!(bench.tick(), WingState::Closing);
        }
        assert_eq!(
            bench.servos.position(ServoChannel::Span),
            u16::try_from(SPAN_CLOSE_END).ok()
        );
        assert_eq!(bench.tick(), WingState::Broken);
        assert_eq!(bench.wings.fault(), Some(WingFault::CloseTimeout));
    }
}
