use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared_logging::LogLevel;

use crate::BehaviorError;

/// Control-loop period in milliseconds.
pub const TICK_PERIOD_MS: u64 = 10;

/// Ticks spent WOBBLY before the disturbance counts as sustained.
pub const WOBBLY_TICKS: u32 = 10;
/// Ticks an UNSTABLE turret is held before it is judged fallen or upright.
pub const UNSTABLE_HOLD_TICKS: u32 = 100;
/// While still unstable the hold counter is folded back modulo this.
pub const UNSTABLE_LINGER_MODULUS: u32 = 0x20;
/// Level ticks needed before a fallen turret trusts itself again.
pub const FALLEN_RECOVERY_TICKS: u32 = 1000;
/// Indicator bit that produces the blink pattern.
pub const BLINK_MASK: u32 = 0x10;
/// Per-tick chance of repeating the pickup line while lingering unstable.
pub const PICKUP_RETRIGGER_PROBABILITY: f64 = 0.02;

/// Ticks without a target before LOSING may give up.
pub const LOSING_TICKS: u32 = 100;
/// Per-tick chance of giving up once LOSING has waited long enough.
pub const LOST_PROBABILITY: f64 = 0.05;
/// LOSING always gives up after this many ticks.
pub const LOSING_FALLBACK_TICKS: u32 = 400;
/// Ticks LOST idles (after its line ends) before deciding what to do.
pub const LOST_IDLE_TICKS: u32 = 100;
/// Draw below this moves LOST to ABOUT_TO_CLOSE.
pub const ABOUT_TO_CLOSE_PROBABILITY: f64 = 0.5;
/// Draw below this (and above the previous) moves LOST back to LOSING.
pub const BACK_TO_LOSING_PROBABILITY: f64 = 0.8;
/// Ticks ABOUT_TO_CLOSE waits before retiring.
pub const ABOUT_TO_CLOSE_TICKS: u32 = 100;

/// Settings that describe a deployment rather than tune behavior.
///
/// Every field has a default, so a partial JSON file is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory holding the sample library.
    pub samples_dir: Option<PathBuf>,
    /// JSON-lines log destination.
    pub log_path: Option<PathBuf>,
    /// JSON-lines event destination.
    pub event_log: Option<PathBuf>,
    /// RNG seed; random when absent.
    pub seed: Option<u64>,
    /// Control-loop period.
    pub tick_period_ms: u64,
    /// Stop after this many ticks; run forever when absent.
    pub ticks: Option<u64>,
    /// Minimum level written to the JSON log.
    pub log_level: LogLevel,
    /// Pace the audio transport to real time.
    pub realtime_audio: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            samples_dir: None,
            log_path: None,
            event_log: None,
            seed: None,
            tick_period_ms: TICK_PERIOD_MS,
            ticks: None,
            log_level: LogLevel::Info,
            realtime_audio: true,
        }
    }
}

impl RuntimeConfig {
    /// Reads a config file: TOML when the extension is `.toml`, JSON otherwise.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        } else {
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the control loop cannot run with.
    pub fn validate(&self) -> Result<(), BehaviorError> {
        if self.tick_period_ms == 0 {
            return Err(BehaviorError::InvalidConfig(
                "tick_period_ms must be positive".into(),
            ));
        }
        if let Some(dir) = &self.samples_dir {
            if dir.as_os_str().is_empty() {
                return Err(BehaviorError::InvalidConfig(
                    "samples_dir must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}
