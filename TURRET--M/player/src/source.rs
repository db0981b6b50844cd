use std::{
    fmt,
    fs::File,
    io::{self, Read},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use indexmap::IndexMap;

use crate::PlayerError;

/// Opens sample data by identifier.
///
/// Identifiers are relative, slash-separated paths such as `search/002.s8`.
/// Sample data is raw signed 8-bit mono at the output sample rate.
pub trait SampleSource: Send + Sync {
    /// Opens a sample for reading from its first byte.
    fn open(&self, id: &str) -> Result<Box<dyn SampleReader>, PlayerError>;

    /// Returns true when `id` can be opened.
    fn contains(&self, id: &str) -> bool;
}

/// Sequential reader over one opened sample.
pub trait SampleReader: Send {
    /// Total sample length in bytes.
    fn byte_len(&self) -> usize;

    /// Reads up to `buf.len()` bytes, returning `0` at end of data.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Samples stored as files below a root directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    /// Creates a source rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, id: &str) -> Option<PathBuf> {
        let relative = Path::new(id);
        let plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        (plain && !id.is_empty()).then(|| self.root.join(relative))
    }
}

struct FileReader {
    file: File,
    len: usize,
}

impl SampleReader for FileReader {
    fn byte_len(&self) -> usize {
        self.len
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl SampleSource for DirectorySource {
    fn open(&self, id: &str) -> Result<Box<dyn SampleReader>, PlayerError> {
        let path = self
            .resolve(id)
            .ok_or_else(|| PlayerError::NotFound(id.to_owned()))?;
        let file = File::open(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => PlayerError::NotFound(id.to_owned()),
            _ => PlayerError::Open {
                id: id.to_owned(),
                source,
            },
        })?;
        let len = file
            .metadata()
            .map_err(|source| PlayerError::Open {
                id: id.to_owned(),
                source,
            })?
            .len();
        let len = usize::try_from(len).map_err(|_| PlayerError::Open {
            id: id.to_owned(),
            source: io::Error::new(io::ErrorKind::InvalidData, "sample too large"),
        })?;
        Ok(Box::new(FileReader { file, len }))
    }

    fn contains(&self, id: &str) -> bool {
        self.resolve(id).is_some_and(|path| path.is_file())
    }
}

/// Samples held in memory, used by tests and the synthesized demo library.
#[derive(Default, Clone)]
pub struct MemorySource {
    samples: IndexMap<String, Arc<[u8]>>,
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("samples", &self.samples.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MemorySource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a sample.
    #[must_use]
    pub fn with_sample(mut self, id: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        self.insert(id, data);
        self
    }

    /// Adds or replaces a sample in place.
    pub fn insert(&mut self, id: impl Into<String>, data: impl Into<Arc<[u8]>>) {
        self.samples.insert(id.into(), data.into());
    }

    /// Shared buffer backing a sample.
    #[must_use]
    pub fn data(&self, id: &str) -> Option<&Arc<[u8]>> {
        self.samples.get(id)
    }

    /// Identifiers in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.samples.keys().map(String::as_str)
    }
}

struct MemoryReader {
    data: Arc<[u8]>,
    pos: usize,
}

impl SampleReader for MemoryReader {
    fn byte_len(&self) -> usize {
        self.data.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos..];
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        self.pos += count;
        Ok(count)
    }
}

impl SampleSource for MemorySource {
    fn open(&self, id: &str) -> Result<Box<dyn SampleReader>, PlayerError> {
        let data = self
            .samples
            .get(id)
            .ok_or_else(|| PlayerError::NotFound(id.to_owned()))?;
        Ok(Box::new(MemoryReader {
            data: Arc::clone(data),
            pos: 0,
        }))
    }

    fn contains(&self, id: &str) -> bool {
        self.samples.contains_key(id)
    }
}
