use turret_hardware::Orientation;

/// Samples in the rolling window (one per tick).
pub const WINDOW_LEN: usize = 32;

/// Accelerometer reading of an upright turret at rest.
pub const REST: Orientation = Orientation::new(0, 0, 300);

/// Nominal magnitude of gravity in sensor counts.
pub const GRAVITY: i64 = 300;

/// Allowed deviation of the average magnitude from [`GRAVITY`], in percent.
pub const GRAVITY_TOLERANCE_PCT: i64 = 3;

/// Squared distance of the average from [`REST`] beyond which the turret is uneven.
pub const UNEVEN_DISTANCE_SQ: i64 = 20_000;
