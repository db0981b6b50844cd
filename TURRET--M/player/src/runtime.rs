use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{error, info, warn};

use crate::{
    config::IDLE_WAIT_MS,
    engine::{PlayerEngine, PlayerStep},
    transport::AudioTransport,
    Player, PlayerError,
};

/// The mixing activity running on its own thread.
#[derive(Debug)]
pub struct PlayerRuntime {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PlayerRuntime {
    /// Starts mixing the streams of `player` into `transport`.
    pub fn spawn(
        player: Player,
        mut transport: impl AudioTransport + 'static,
    ) -> Result<Self, PlayerError> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("turret-player".into())
            .spawn(move || {
                let mut engine = PlayerEngine::new(player);
                info!("player thread started");
                while !flag.load(Ordering::Acquire) {
                    match engine.step(&mut transport) {
                        Ok(PlayerStep::Idle) => thread::sleep(Duration::from_millis(IDLE_WAIT_MS)),
                        Ok(_) => {}
                        Err(err) => {
                            warn!(error = %err, "mixing period failed");
                            thread::sleep(Duration::from_millis(IDLE_WAIT_MS));
                        }
                    }
                }
                if let Err(err) = engine.finish(&mut transport) {
                    warn!(error = %err, "final fade-out failed");
                }
                info!("player thread stopped");
            })
            .map_err(PlayerError::Spawn)?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Stops the thread after its current period and waits for it.
    pub fn shutdown(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("player thread panicked");
            }
        }
    }
}

impl Drop for PlayerRuntime {
    fn drop(&mut self) {
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{
        config::QUANTUM,
        ramp::{ramp_down, ramp_up},
        source::MemorySource,
        transport::MemoryTransport,
    };

    #[test]
    fn background_thread_plays_and_fades_out() {
        let source = MemorySource::new().with_sample("line", vec![3u8; QUANTUM * 2]);
        let player = Player::new(source);
        let transport = MemoryTransport::new();
        let runtime = PlayerRuntime::spawn(player.clone(), transport.clone()).unwrap();

        let handle = player.play("line").unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while player.is_playing(&handle) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!player.is_playing(&handle));
        player.close(handle).unwrap();

        while transport.writes().iter().all(|w| w.as_slice() != ramp_down())
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(1));
        }
        runtime.shutdown();

        let writes = transport.writes();
        assert_eq!(writes.first().map(Vec::as_slice), Some(ramp_up()));
        assert_eq!(
            writes.iter().filter(|w| w.as_slice() == ramp_down()).count(),
            1
        );
    }
}
