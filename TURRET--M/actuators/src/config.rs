/// Gun burst timing, in control ticks.
pub mod guns {
    /// Ticks a unit stays dark between shots.
    pub const OFF_TICKS: u32 = 3;
    /// Ticks a shot stays lit.
    pub const ON_TICKS: u32 = 4;
    /// Shots per burst.
    pub const SHOTS_PER_BURST: u32 = 4;
    /// Ticks of the pause after a burst.
    pub const BURST_PAUSE_TICKS: u32 = 22;
    /// Sound effect looped while firing.
    pub const FIRING_SAMPLE: &str = "firing/turret_firex3.s8";
}

/// Wing actuator positions and timing. Positions are pulse widths in µs,
/// durations are control ticks.
pub mod wings {
    /// Span pulse that lets the servo rest.
    pub const SPAN_NEUTRAL: u16 = 0;
    /// Span pulse at the start of the opening ramp.
    pub const SPAN_OPEN_START: i32 = 1400;
    /// Span pulse at the end of the opening ramp.
    pub const SPAN_OPEN_END: i32 = 1200;
    /// Span pulse at the start of the closing ramp.
    pub const SPAN_CLOSE_START: i32 = 1500;
    /// Span pulse at the end of the closing ramp.
    pub const SPAN_CLOSE_END: i32 = 1600;

    /// Turn pulse at the leftmost angle.
    pub const TURN_LEFT: i32 = 1200;
    /// Turn pulse at the rightmost angle.
    pub const TURN_RIGHT: i32 = 1800;
    /// Turn angle range; angles run `0..=TURN_RANGE`.
    pub const TURN_RANGE: i32 = 128;
    /// Centered turn angle.
    pub const TURN_CENTER_ANGLE: i32 = TURN_RANGE / 2;
    /// Turn pulse while parked after a fault.
    pub const TURN_PARKED: u16 = 0;

    /// Length of the opening ramp; the wings count as open when it ends.
    pub const OPEN_RAMP_TICKS: i32 = 170;
    /// Ticks into the opening ramp before the end switch is trusted.
    pub const OPEN_DEAD_TICKS: i32 = 80;
    /// Length of the closing ramp.
    pub const CLOSE_RAMP_TICKS: i32 = 100;
    /// Ticks of closing without reaching the end switch before giving up.
    pub const CLOSE_TIMEOUT_TICKS: i32 = 250;

    /// Motion sound while opening.
    pub const OPEN_SAMPLE: &str = "wings/open.s8";
    /// Motion sound while closing.
    pub const CLOSE_SAMPLE: &str = "wings/close.s8";
}
