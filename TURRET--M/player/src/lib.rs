#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Audio mixing engine.
//!
//! A [`Player`] handle is shared by the control loop, which opens and closes
//! streams, and by a [`PlayerEngine`] running on its own thread, which mixes
//! every open stream into fixed quanta and writes them to an
//! [`AudioTransport`]. The stream set is the only state the two sides share
//! and it sits behind a single lock that is never held across a transport
//! write.

/// Tuning constants.
pub mod config;
/// Mixing state machine and the shared player handle.
pub mod engine;
/// Precomputed fade tables.
pub mod ramp;
/// Background mixing thread.
pub mod runtime;
/// Sample data sources.
pub mod source;
/// Stream slots and the mixing kernel.
pub mod streams;
/// Output transports.
pub mod transport;

use std::io;

use thiserror::Error;

pub use engine::{Player, PlayerEngine, PlayerState, PlayerStep};
pub use runtime::PlayerRuntime;
pub use source::{DirectorySource, MemorySource, SampleReader, SampleSource};
pub use streams::{StreamHandle, StreamId};
pub use transport::{AudioTransport, MemoryTransport, PacedTransport, PcmFileTransport};

/// Failures of the audio engine.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// No sample exists under the identifier.
    #[error("sample `{0}` not found")]
    NotFound(String),
    /// The sample exists but could not be opened.
    #[error("cannot open sample `{id}`: {source}")]
    Open {
        /// Sample identifier.
        id: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Reading sample data failed.
    #[error("reading sample `{id}` failed: {source}")]
    Read {
        /// Sample identifier.
        id: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Writing to the output transport failed.
    #[error("audio transport write failed: {0}")]
    Transport(#[source] io::Error),
    /// Every stream slot is taken.
    #[error("stream set full ({0} streams)")]
    Capacity(usize),
    /// The handle does not name a stream in the set.
    #[error("unknown stream {0}")]
    UnknownStream(StreamId),
    /// The mixing thread could not be started.
    #[error("cannot start mixing thread: {0}")]
    Spawn(#[source] io::Error),
}
