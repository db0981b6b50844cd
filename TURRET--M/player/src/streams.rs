use std::{fmt, io};

use tracing::warn;

use crate::{
    config::{
        LOGIC_MAX, LOGIC_MIN, MASTER_OFFSET, MASTER_RANGE, MASTER_VOLUME, MAX_STREAMS, QUANTUM,
        QUANTUM_BYTES,
    },
    source::SampleReader,
    PlayerError,
};

/// Copyable name of a stream, for logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId {
    slot: usize,
    generation: u32,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot, self.generation)
    }
}

/// Owning handle to an open stream.
///
/// Handles are move-only: closing one consumes it, so a stream has exactly
/// one owner responsible for closing it.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an open stream is mixed until its handle is closed"]
pub struct StreamHandle {
    id: StreamId,
}

impl StreamHandle {
    /// Name of the stream.
    #[must_use]
    pub const fn id(&self) -> StreamId {
        self.id
    }

    #[cfg(test)]
    pub(crate) const fn forged(id: StreamId) -> Self {
        Self { id }
    }
}

/// One open sample with its cursor and the quantum of data read for it.
pub(crate) struct SampleStream {
    name: String,
    offset: usize,
    size: usize,
    reader: Box<dyn SampleReader>,
    buf: Box<[u8; QUANTUM]>,
    filled: usize,
}

impl SampleStream {
    pub(crate) fn new(name: impl Into<String>, reader: Box<dyn SampleReader>) -> Self {
        Self {
            name: name.into(),
            offset: 0,
            size: reader.byte_len(),
            reader,
            buf: Box::new([0; QUANTUM]),
            filled: 0,
        }
    }

    pub(crate) const fn is_playing(&self) -> bool {
        self.offset < self.size
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Reads the next quantum. A source that runs dry before its declared
    /// length ends the stream so the mixer cannot stall on it.
    fn refill(&mut self) -> bool {
        self.filled = 0;
        if !self.is_playing() {
            return false;
        }
        while self.filled < QUANTUM {
            match self.reader.read(&mut self.buf[self.filled..]) {
                Ok(0) => break,
                Ok(count) => self.filled += count,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => {
                    let err = PlayerError::Read {
                        id: self.name.clone(),
                        source,
                    };
                    warn!(error = %err, "stream read failed");
                    break;
                }
            }
        }
        if self.filled == 0 {
            warn!(stream = %self.name, offset = self.offset, size = self.size, "stream ended early");
            self.offset = self.size;
            return false;
        }
        true
    }

    fn contribution(&self, index: usize) -> i32 {
        if index < self.filled && self.offset + index < self.size {
            i32::from(i8::from_ne_bytes([self.buf[index]]))
        } else {
            0
        }
    }

    fn advance(&mut self) {
        self.offset = (self.offset + QUANTUM).min(self.size);
    }
}

/// Maps a clamped signed mix value onto the attenuated unsigned DAC scale.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn scale_sample(mixed: i32) -> u8 {
    let unsigned = mixed.clamp(LOGIC_MIN, LOGIC_MAX) - LOGIC_MIN;
    (MASTER_VOLUME * unsigned / MASTER_RANGE + MASTER_OFFSET) as u8
}

/// Fixed set of stream slots. A slot's generation changes every time it is
/// freed so stale handles are detected.
pub(crate) struct StreamSet {
    slots: [Option<SampleStream>; MAX_STREAMS],
    generations: [u32; MAX_STREAMS],
}

impl Default for StreamSet {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            generations: [0; MAX_STREAMS],
        }
    }
}

impl StreamSet {
    pub(crate) fn insert(&mut self, stream: SampleStream) -> Result<StreamHandle, PlayerError> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(PlayerError::Capacity(MAX_STREAMS))?;
        self.slots[slot] = Some(stream);
        Ok(StreamHandle {
            id: StreamId {
                slot,
                generation: self.generations[slot],
            },
        })
    }

    pub(crate) fn remove(&mut self, id: StreamId) -> Result<SampleStream, PlayerError> {
        if !self.owns(id) {
            return Err(PlayerError::UnknownStream(id));
        }
        self.generations[id.slot] = self.generations[id.slot].wrapping_add(1);
        self.slots[id.slot]
            .take()
            .ok_or(PlayerError::UnknownStream(id))
    }

    pub(crate) fn get(&self, id: StreamId) -> Option<&SampleStream> {
        if self.owns(id) {
            self.slots[id.slot].as_ref()
        } else {
            None
        }
    }

    fn owns(&self, id: StreamId) -> bool {
        id.slot < MAX_STREAMS
            && self.generations[id.slot] == id.generation
            && self.slots[id.slot].is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// True while any stream still has unconsumed bytes.
    pub(crate) fn any_playing(&self) -> bool {
        self.slots.iter().flatten().any(SampleStream::is_playing)
    }

    /// Reads the next quantum of every stream. Returns true when any stream
    /// produced data.
    pub(crate) fn refill(&mut self) -> bool {
        let mut produced = false;
        for stream in self.slots.iter_mut().flatten() {
            produced |= stream.refill();
        }
        produced
    }

    /// Mixes one quantum into `out` and advances every cursor.
    pub(crate) fn mix(&mut self, out: &mut [u8; QUANTUM_BYTES]) {
        for (index, frame) in out.chunks_exact_mut(2).enumerate() {
            let sum: i32 = self
                .slots
                .iter()
                .flatten()
                .map(|stream| stream.contribution(index))
                .sum();
            frame[0] = 0;
            frame[1] = scale_sample(sum);
        }
        for stream in self.slots.iter_mut().flatten() {
            stream.advance();
        }
    }
}
