use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    config::QUANTUM_BYTES,
    ramp::{ramp_down, ramp_up},
    source::SampleSource,
    streams::{SampleStream, StreamHandle, StreamSet},
    transport::{write_all, AudioTransport},
    PlayerError,
};

struct Shared {
    streams: Mutex<StreamSet>,
    source: Box<dyn SampleSource>,
}

/// Cloneable handle used by stream owners to open, poll, and close streams.
#[derive(Clone)]
pub struct Player {
    shared: Arc<Shared>,
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("streams", &self.stream_count())
            .finish()
    }
}

impl Player {
    /// Creates a player reading samples from `source`.
    #[must_use]
    pub fn new(source: impl SampleSource + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                streams: Mutex::new(StreamSet::default()),
                source: Box::new(source),
            }),
        }
    }

    /// Opens a sample and adds it to the mix.
    pub fn try_play(&self, id: &str) -> Result<StreamHandle, PlayerError> {
        // Opening touches storage, so it happens before the lock is taken.
        let reader = self.shared.source.open(id)?;
        let stream = SampleStream::new(id, reader);
        let handle = self.shared.streams.lock().insert(stream)?;
        debug!(sample = id, stream = %handle.id(), "stream opened");
        Ok(handle)
    }

    /// Opens a sample and adds it to the mix, or returns `None` when it
    /// cannot be opened. Callers treat `None` as a line that already ended.
    pub fn play(&self, id: &str) -> Option<StreamHandle> {
        match self.try_play(id) {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(sample = id, error = %err, "play failed");
                None
            }
        }
    }

    /// Removes a stream from the mix and releases its reader.
    pub fn close(&self, handle: StreamHandle) -> Result<(), PlayerError> {
        let stream = self.shared.streams.lock().remove(handle.id())?;
        debug!(sample = stream.name(), stream = %handle.id(), "stream closed");
        drop(stream);
        Ok(())
    }

    /// True while the stream still has bytes left to mix.
    #[must_use]
    pub fn is_playing(&self, handle: &StreamHandle) -> bool {
        self.shared
            .streams
            .lock()
            .get(handle.id())
            .is_some_and(SampleStream::is_playing)
    }

    /// Closes the stream held in `slot`, if any, leaving the slot empty.
    pub fn release(&self, slot: &mut Option<StreamHandle>) {
        if let Some(handle) = slot.take() {
            if let Err(err) = self.close(handle) {
                warn!(error = %err, "close failed");
            }
        }
    }

    /// Closes the stream held in `slot` once it has finished playing.
    pub fn reap(&self, slot: &mut Option<StreamHandle>) {
        if slot.as_ref().is_some_and(|handle| !self.is_playing(handle)) {
            self.release(slot);
        }
    }

    /// Number of streams in the set, finished or not.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.shared.streams.lock().len()
    }
}

/// Output state of the mixing activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// Nothing is being written.
    Silent,
    /// Mixed quanta are being written.
    Playing,
}

/// What a single [`PlayerEngine::step`] wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStep {
    /// Nothing to play; the caller should wait before stepping again.
    Idle,
    /// The fade-in table was written.
    RampUp,
    /// One mixed quantum was written.
    Mixed,
    /// The fade-out table and one quantum of silence were written.
    RampDown,
}

/// The mixing state machine. Each [`Self::step`] is one output period.
pub struct PlayerEngine {
    player: Player,
    state: PlayerState,
    out: Box<[u8; QUANTUM_BYTES]>,
    silence: Box<[u8; QUANTUM_BYTES]>,
}

impl fmt::Debug for PlayerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerEngine")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl PlayerEngine {
    /// Creates an engine mixing the streams of `player`.
    #[must_use]
    pub fn new(player: Player) -> Self {
        Self {
            player,
            state: PlayerState::Silent,
            out: Box::new([0; QUANTUM_BYTES]),
            silence: Box::new([0; QUANTUM_BYTES]),
        }
    }

    /// Current output state.
    #[must_use]
    pub const fn state(&self) -> PlayerState {
        self.state
    }

    /// Runs one output period. The stream lock is released before any
    /// transport write.
    pub fn step(&mut self, transport: &mut dyn AudioTransport) -> Result<PlayerStep, PlayerError> {
        match self.state {
            PlayerState::Silent => {
                let playing = self.player.shared.streams.lock().any_playing();
                if !playing {
                    return Ok(PlayerStep::Idle);
                }
                write_all(transport, ramp_up())?;
                self.state = PlayerState::Playing;
                info!("audio output started");
                Ok(PlayerStep::RampUp)
            }
            PlayerState::Playing => {
                {
                    let mut streams = self.player.shared.streams.lock();
                    if streams.any_playing() {
                        streams.refill();
                        streams.mix(&mut self.out);
                    } else {
                        drop(streams);
                        self.stop(transport)?;
                        return Ok(PlayerStep::RampDown);
                    }
                }
                write_all(transport, &self.out[..])?;
                Ok(PlayerStep::Mixed)
            }
        }
    }

    /// Fades out if output is running. Used on shutdown.
    pub fn finish(&mut self, transport: &mut dyn AudioTransport) -> Result<(), PlayerError> {
        if self.state == PlayerState::Playing {
            self.stop(transport)?;
        }
        Ok(())
    }

    fn stop(&mut self, transport: &mut dyn AudioTransport) -> Result<(), PlayerError> {
        self.state = PlayerState::Silent;
        write_all(transport, ramp_down())?;
        write_all(transport, &self.silence[..])?;
        info!("audio output stopped");
        Ok(())
    }
}
