//! Output format and mixer sizing.

/// Output sample rate in Hz.
pub const SAMPLE_RATE: u32 = 22_050;

/// Samples mixed per period.
pub const QUANTUM: usize = 1024;

/// Transport bytes per output frame: 16-bit, DAC value in the high byte.
pub const BYTES_PER_FRAME: usize = 2;

/// Transport bytes per mixed quantum.
pub const QUANTUM_BYTES: usize = QUANTUM * BYTES_PER_FRAME;

/// Smallest signed input sample.
pub const LOGIC_MIN: i32 = -128;

/// Largest signed input sample.
pub const LOGIC_MAX: i32 = 127;

/// Span of the unsigned output scale.
pub const MASTER_RANGE: i32 = 256;

/// Fixed offset added after attenuation so the DAC never sees zero.
pub const MASTER_OFFSET: i32 = 40;

/// Linear attenuation numerator, over [`MASTER_RANGE`].
pub const MASTER_VOLUME: i32 = MASTER_RANGE - MASTER_OFFSET;

/// Streams that may be open at once.
pub const MAX_STREAMS: usize = 4;

/// Sleep between checks while no stream is open.
pub const IDLE_WAIT_MS: u64 = 10;
