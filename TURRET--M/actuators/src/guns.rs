use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use turret_hardware::{DigitalOutput, OutputId};
use turret_player::{Player, PlayerError, StreamHandle};

use crate::config::guns::{
    BURST_PAUSE_TICKS, FIRING_SAMPLE, OFF_TICKS, ON_TICKS, SHOTS_PER_BURST,
};

/// Logical fire command shared by both units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FireCommand {
    /// Guns idle.
    Off,
    /// Guns firing bursts.
    Fire,
}

/// Phase of a single gun unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GunPhase {
    /// Dark between shots.
    Off,
    /// Lit for one shot.
    On,
    /// Dark after a full burst.
    BurstPause,
}

/// One physical gun unit and the output it drives.
#[derive(Debug, Clone)]
pub struct GunUnit {
    output: OutputId,
    phase: GunPhase,
    tick: u32,
    burst_count: u32,
}

impl GunUnit {
    const fn new(output: OutputId) -> Self {
        Self {
            output,
            phase: GunPhase::Off,
            tick: 0,
            burst_count: 0,
        }
    }

    /// Output driven by this unit.
    #[must_use]
    pub const fn output(&self) -> OutputId {
        self.output
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> GunPhase {
        self.phase
    }

    /// Shots fired in the current burst.
    #[must_use]
    pub const fn burst_count(&self) -> u32 {
        self.burst_count
    }

    fn reset(&mut self, outputs: &mut dyn DigitalOutput) {
        self.phase = GunPhase::Off;
        self.tick = 0;
        self.burst_count = 0;
        outputs.set_output(self.output, false);
    }

    /// Advances one tick. The output is written only on the tick the phase
    /// counter wraps, which yields one edge per phase change.
    fn tick(&mut self, outputs: &mut dyn DigitalOutput) {
        self.tick += 1;
        match self.phase {
            GunPhase::On if self.tick >= ON_TICKS => {
                self.burst_count += 1;
                self.phase = if self.burst_count >= SHOTS_PER_BURST {
                    GunPhase::BurstPause
                } else {
                    GunPhase::Off
                };
                self.tick = 0;
            }
            GunPhase::Off if self.tick >= OFF_TICKS => {
                self.phase = GunPhase::On;
                self.tick = 0;
            }
            GunPhase::BurstPause if self.tick >= BURST_PAUSE_TICKS => {
                self.phase = GunPhase::On;
                self.burst_count = 0;
                self.tick = 0;
            }
            _ => {}
        }
        if self.tick == 0 {
            outputs.set_output(self.output, self.phase == GunPhase::On);
        }
    }
}

/// Drives both gun units from one fire command and loops the firing sound.
#[derive(Debug)]
pub struct GunController {
    command: FireCommand,
    stream: Option<StreamHandle>,
    effect_missing: bool,
    units: [GunUnit; 2],
}

impl Default for GunController {
    fn default() -> Self {
        Self::new()
    }
}

impl GunController {
    /// Creates an idle controller for the left and right units.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            command: FireCommand::Off,
            stream: None,
            effect_missing: false,
            units: [GunUnit::new(OutputId::LeftGun), GunUnit::new(OutputId::RightGun)],
        }
    }

    /// Current command.
    #[must_use]
    pub const fn command(&self) -> FireCommand {
        self.command
    }

    /// Both units.
    #[must_use]
    pub const fn units(&self) -> &[GunUnit; 2] {
        &self.units
    }

    /// True while the firing sound is owned.
    #[must_use]
    pub const fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Starts or stops firing. Repeating the current command does nothing.
    pub fn fire(&mut self, on: bool, outputs: &mut dyn DigitalOutput, player: &Player) {
        match (on, self.command) {
            (true, FireCommand::Off) => {
                self.command = FireCommand::Fire;
                player.release(&mut self.stream);
                self.start_effect(player);
                info!("guns firing");
            }
            (false, FireCommand::Fire) => {
                self.command = FireCommand::Off;
                player.release(&mut self.stream);
                info!("guns idle");
            }
            _ => return,
        }
        for unit in &mut self.units {
            unit.reset(outputs);
        }
    }

    /// Advances both units and keeps the firing sound looping.
    pub fn tick(&mut self, outputs: &mut dyn DigitalOutput, player: &Player) {
        if self.command != FireCommand::Fire {
            return;
        }
        for unit in &mut self.units {
            unit.tick(outputs);
        }
        player.reap(&mut self.stream);
        if self.stream.is_none() && !self.effect_missing {
            self.start_effect(player);
            debug!(retriggered = self.stream.is_some(), "firing sound looped");
        }
    }

    /// True once the firing sound turned out to be absent from the library.
    #[must_use]
    pub const fn effect_missing(&self) -> bool {
        self.effect_missing
    }

    /// Plays the firing sound. A missing sample is reported once and never
    /// requested again; other failures are retried on the next tick.
    fn start_effect(&mut self, player: &Player) {
        if self.effect_missing {
            return;
        }
        match player.try_play(FIRING_SAMPLE) {
            Ok(handle) => self.stream = Some(handle),
            Err(PlayerError::NotFound(_)) => {
                self.effect_missing = true;
                warn!(sample = FIRING_SAMPLE, "firing sound missing, guns run silent");
            }
            Err(err) => debug!(error = %err, "firing sound not started"),
        }
    }

    /// Stops firing and releases the sound.
    pub fn shutdown(&mut self, outputs: &mut dyn DigitalOutput, player: &Player) {
        self.fire(false, outputs, player);
        player.release(&mut self.stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use turret_hardware::mock::RecordingOutputs;
    use turret_player::{MemorySource, MemoryTransport, PlayerEngine, SampleReader, SampleSource};

    fn player_with_effect(len: usize) -> Player {
        Player::new(MemorySource::new().with_sample(FIRING_SAMPLE, vec![0u8; len]))
    }

    #[test]
    fn burst_schedule_matches_the_pulse_train() {
        let player = player_with_effect(64);
        let mut outputs = RecordingOutputs::new();
        let mut guns = GunController::new();
        guns.fire(true, &mut outputs, &player);
        outputs.clear_history();

        let cycle = OFF_TICKS + ON_TICKS;
        let total = SHOTS_PER_BURST * cycle + BURST_PAUSE_TICKS;
        let mut pause_entries = 0;
        let mut rising = Vec::new();
        let mut previous = guns.units()[0].phase();
        for tick in 1..=total {
            let before = outputs.write_count();
            guns.tick(&mut outputs, &player);
            let phase = guns.units()[0].phase();
            if phase == GunPhase::BurstPause && previous != GunPhase::BurstPause {
                pause_entries += 1;
                assert_eq!(guns.units()[0].burst_count(), SHOTS_PER_BURST);
            }
            previous = phase;
            let writes = outputs.writes();
            if writes[before..].contains(&(OutputId::LeftGun, true)) {
                rising.push(tick);
            }
        }
        assert_eq!(pause_entries, 1);
        assert_eq!(rising, vec![3, 10, 17, 24, 50]);
        assert!(outputs.level(OutputId::RightGun));
    }

    #[test]
    fn output_is_only_written_on_phase_edges() {
        let player = player_with_effect(64);
        let mut outputs = RecordingOutputs::new();
        let mut guns = GunController::new();
        guns.fire(true, &mut outputs, &player);
        outputs.clear_history();
        for _ in 0..7 {
            guns.tick(&mut outputs, &player);
        }
        // Two units, one rising and one falling edge each.
        assert_eq!(
            outputs.writes(),
            vec![
                (OutputId::LeftGun, true),
                (OutputId::RightGun, true),
                (OutputId::LeftGun, false),
                (OutputId::RightGun, false),
            ]
        );
    }

    #[test]
    fn fire_is_idempotent_and_stop_resets_units() {
        let player = player_with_effect(64);
        let mut outputs = RecordingOutputs::new();
        let mut guns = GunController::new();
        guns.fire(true, &mut outputs, &player);
        for _ in 0..5 {
            guns.tick(&mut outputs, &player);
        }
        let phase = guns.units()[0].phase();
        guns.fire(true, &mut outputs, &player);
        assert_eq!(guns.units()[0].phase(), phase);
        assert_eq!(player.stream_count(), 1);

        guns.fire(false, &mut outputs, &player);
        assert_eq!(guns.command(), FireCommand::Off);
        assert_eq!(guns.units()[0].phase(), GunPhase::Off);
        assert!(!outputs.level(OutputId::LeftGun));
        assert!(!guns.has_stream());
        assert_eq!(player.stream_count(), 0);

        guns.fire(false, &mut outputs, &player);
        guns.tick(&mut outputs, &player);
        assert_eq!(guns.units()[0].phase(), GunPhase::Off);
    }

    #[test]
    fn firing_sound_is_retriggered_when_it_ends() {
        let player = player_with_effect(16);
        let mut engine = PlayerEngine::new(player.clone());
        let mut transport = MemoryTransport::new();
        let mut outputs = RecordingOutputs::new();
        let mut guns = GunController::new();
        guns.fire(true, &mut outputs, &player);
        engine.step(&mut transport).unwrap();
        engine.step(&mut transport).unwrap();
        assert_eq!(player.stream_count(), 1);
        guns.tick(&mut outputs, &player);
        assert!(guns.has_stream());
        assert_eq!(player.stream_count(), 1);
        assert_eq!(engine.step(&mut transport).unwrap(), turret_player::PlayerStep::Mixed);
    }

    #[test]
    fn missing_effect_does_not_stop_the_guns() {
        let player = Player::new(MemorySource::new());
        let mut outputs = RecordingOutputs::new();
        let mut guns = GunController::new();
        guns.fire(true, &mut outputs, &player);
        assert!(!guns.has_stream());
        assert!(guns.effect_missing());
        for _ in 0..3 {
            guns.tick(&mut outputs, &player);
        }
        assert!(outputs.level(OutputId::LeftGun));
        assert_eq!(player.stream_count(), 0);
    }

    #[test]
    fn missing_effect_is_not_requested_again() {
        let source = CountingSource::default();
        let opens = source.opens.clone();
        let player = Player::new(source);
        let mut outputs = RecordingOutputs::new();
        let mut guns = GunController::new();
        guns.fire(true, &mut outputs, &player);
        for _ in 0..100 {
            guns.tick(&mut outputs, &player);
        }
        guns.fire(false, &mut outputs, &player);
        guns.fire(true, &mut outputs, &player);
        guns.tick(&mut outputs, &player);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(!guns.has_stream());
    }

    #[test]
    fn full_stream_set_is_retried_on_the_next_tick() {
        let player = player_with_effect(4_096);
        let held: Vec<_> = (0..turret_player::config::MAX_STREAMS)
            .map(|_| player.try_play(FIRING_SAMPLE).unwrap())
            .collect();
        let mut outputs = RecordingOutputs::new();
        let mut guns = GunController::new();
        guns.fire(true, &mut outputs, &player);
        assert!(!guns.has_stream());
        assert!(!guns.effect_missing());

        for handle in held {
            player.close(handle).unwrap();
        }
        guns.tick(&mut outputs, &player);
        assert!(guns.has_stream());
    }

    /// Empty library that counts open attempts.
    #[derive(Default)]
    struct CountingSource {
        opens: Arc<AtomicUsize>,
    }

    impl SampleSource for CountingSource {
        fn open(&self, id: &str) -> Result<Box<dyn SampleReader>, PlayerError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Err(PlayerError::NotFound(id.to_owned()))
        }

        fn contains(&self, _id: &str) -> bool {
            false
        }
    }
}
