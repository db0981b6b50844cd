use std::{
    fmt,
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::{
    config::{BYTES_PER_FRAME, SAMPLE_RATE},
    PlayerError,
};

/// Blocking audio output.
pub trait AudioTransport: Send {
    /// Writes some prefix of `buf`, blocking until the device accepts it.
    fn write(&mut self, buf: &[u8]) -> Result<usize, PlayerError>;
}

/// Writes the whole buffer, failing on a transport that stops accepting data.
pub(crate) fn write_all(transport: &mut dyn AudioTransport, mut buf: &[u8]) -> Result<(), PlayerError> {
    while !buf.is_empty() {
        let written = transport.write(buf)?;
        if written == 0 {
            return Err(PlayerError::Transport(io::ErrorKind::WriteZero.into()));
        }
        buf = &buf[written..];
    }
    Ok(())
}

/// Captures every write in memory. Clones share the capture.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemoryTransport {
    /// Creates an empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Each write call's bytes, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    /// Total bytes written.
    #[must_use]
    pub fn byte_count(&self) -> usize {
        self.writes.lock().iter().map(Vec::len).sum()
    }
}

impl AudioTransport for MemoryTransport {
    fn write(&mut self, buf: &[u8]) -> Result<usize, PlayerError> {
        self.writes.lock().push(buf.to_vec());
        Ok(buf.len())
    }
}

/// Appends raw output frames to a file.
pub struct PcmFileTransport {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl fmt::Debug for PcmFileTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcmFileTransport")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl PcmFileTransport {
    /// Creates or truncates the output file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, PlayerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(PlayerError::Transport)?;
        }
        let file = File::create(&path).map_err(PlayerError::Transport)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Destination path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AudioTransport for PcmFileTransport {
    fn write(&mut self, buf: &[u8]) -> Result<usize, PlayerError> {
        self.writer.write_all(buf).map_err(PlayerError::Transport)?;
        self.writer.flush().map_err(PlayerError::Transport)?;
        Ok(buf.len())
    }
}

/// Blocks each write for the time the device would take to play it.
#[derive(Debug)]
pub struct PacedTransport<T> {
    inner: T,
    next_deadline: Option<Instant>,
}

impl<T: AudioTransport> PacedTransport<T> {
    /// Wraps `inner`.
    pub const fn new(inner: T) -> Self {
        Self {
            inner,
            next_deadline: None,
        }
    }

    /// Real-time duration of `bytes` of output.
    #[must_use]
    pub fn duration_of(bytes: usize) -> Duration {
        let frames = bytes / BYTES_PER_FRAME;
        Duration::from_micros(frames as u64 * 1_000_000 / u64::from(SAMPLE_RATE))
    }

    /// Unwraps the inner transport.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: AudioTransport> AudioTransport for PacedTransport<T> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, PlayerError> {
        let now = Instant::now();
        if let Some(deadline) = self.next_deadline {
            if deadline > now {
                thread::sleep(deadline - now);
            }
        }
        let written = self.inner.write(buf)?;
        let start = self.next_deadline.map_or(now, |deadline| deadline.max(now));
        self.next_deadline = Some(start + Self::duration_of(written));
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct Stuck;

    impl AudioTransport for Stuck {
        fn write(&mut self, _buf: &[u8]) -> Result<usize, PlayerError> {
            Ok(0)
        }
    }

    #[test]
    fn write_all_rejects_a_stuck_transport() {
        assert!(matches!(
            write_all(&mut Stuck, &[1, 2, 3]),
            Err(PlayerError::Transport(_))
        ));
    }

    #[test]
    fn pcm_file_collects_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out/turret.pcm");
        let mut transport = PcmFileTransport::create(&path).unwrap();
        write_all(&mut transport, &[0, 148, 0, 148]).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![0, 148, 0, 148]);
    }

    #[test]
    fn pacing_matches_the_sample_rate() {
        let quantum = PacedTransport::<MemoryTransport>::duration_of(2 * 22_050);
        assert_eq!(quantum, Duration::from_secs(1));
        let mut paced = PacedTransport::new(MemoryTransport::new());
        let started = Instant::now();
        write_all(&mut paced, &[0; 2 * 441]).unwrap();
        write_all(&mut paced, &[0; 2]).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(19));
        assert_eq!(paced.into_inner().byte_count(), 2 * 442);
    }
}
