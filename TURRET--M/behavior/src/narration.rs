use rand::Rng;
use serde::{Deserialize, Serialize};
use turret_actuators::config::{guns, wings};

/// A family of interchangeable voice lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrationCategory {
    /// Greeting when a target shows up.
    Alert,
    /// Looking for a target that went away.
    Search,
    /// Going back to sleep.
    Retire,
    /// Being picked up or shaken.
    Pickup,
    /// Knocked over.
    Tipped,
}

const ALERT: &[&str] = &[
    "alert/i_see_you.s8",
    "alert/there_you_are.s8",
    "alert/target_acquired.s8",
];
const SEARCH: &[&str] = &[
    "search/are_you_still_there.s8",
    "search/searching.s8",
    "search/is_anyone_there.s8",
];
const RETIRE: &[&str] = &[
    "retire/hibernating.s8",
    "retire/resting.s8",
    "retire/sleep_mode_activated.s8",
];
const PICKUP: &[&str] = &["pickup/whee.s8", "pickup/put_me_down.s8"];
const TIPPED: &[&str] = &["tipped/critical_error.s8", "tipped/shutting_down.s8"];

impl NarrationCategory {
    /// Every category.
    pub const ALL: [Self; 5] = [
        Self::Alert,
        Self::Search,
        Self::Retire,
        Self::Pickup,
        Self::Tipped,
    ];

    /// Sample identifiers this category chooses from.
    #[must_use]
    pub const fn pool(self) -> &'static [&'static str] {
        match self {
            Self::Alert => ALERT,
            Self::Search => SEARCH,
            Self::Retire => RETIRE,
            Self::Pickup => PICKUP,
            Self::Tipped => TIPPED,
        }
    }

    /// Lower-case label used in logs and listings.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Search => "search",
            Self::Retire => "retire",
            Self::Pickup => "pickup",
            Self::Tipped => "tipped",
        }
    }

    /// Picks one line uniformly.
    pub fn pick<R: Rng + ?Sized>(self, rng: &mut R) -> &'static str {
        let pool = self.pool();
        pool[rng.gen_range(0..pool.len())]
    }
}

/// Named group of sample identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleGroup {
    /// Group label.
    pub label: &'static str,
    /// Identifiers in the group.
    pub ids: &'static [&'static str],
}

/// Every sample the firmware may ask the player for, grouped by purpose.
#[must_use]
pub fn sample_catalog() -> Vec<SampleGroup> {
    const FIRING: &[&str] = &[guns::FIRING_SAMPLE];
    const WINGS: &[&str] = &[wings::OPEN_SAMPLE, wings::CLOSE_SAMPLE];

    let mut groups: Vec<SampleGroup> = NarrationCategory::ALL
        .iter()
        .map(|category| SampleGroup {
            label: category.label(),
            ids: category.pool(),
        })
        .collect();
    groups.push(SampleGroup {
        label: "firing",
        ids: FIRING,
    });
    groups.push(SampleGroup {
        label: "wings",
        ids: WINGS,
    });
    groups
}
