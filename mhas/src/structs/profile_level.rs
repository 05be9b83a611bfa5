//! `mpegh3daProfileLevelIndication` values.
//!
//! ## Ranges
//!
//! - **Main** (0x01-0x05)
//! - **High** (0x06-0x0A)
//! - **Low Complexity** (0x0B-0x0F, level 2 unassigned)
//! - **Baseline** (0x10-0x14)
//!
//! Each Baseline level sits exactly 5 above the Low Complexity level it is
//! backward compatible with.

use log::warn;

pub const MAIN_LEVEL_1: u8 = 0x01;
pub const MAIN_LEVEL_5: u8 = 0x05;
pub const HIGH_LEVEL_1: u8 = 0x06;
pub const HIGH_LEVEL_5: u8 = 0x0A;
pub const LOW_COMPLEXITY_LEVEL_1: u8 = 0x0B;
pub const LOW_COMPLEXITY_LEVEL_3: u8 = 0x0D;
pub const LOW_COMPLEXITY_LEVEL_4: u8 = 0x0E;
pub const LOW_COMPLEXITY_LEVEL_5: u8 = 0x0F;
pub const BASELINE_LEVEL_1: u8 = 0x10;
pub const BASELINE_LEVEL_3: u8 = 0x12;
pub const BASELINE_LEVEL_5: u8 = 0x14;

/// Distance between a Low Complexity level and its Baseline counterpart.
pub const BASELINE_OFFSET: u8 = BASELINE_LEVEL_1 - LOW_COMPLEXITY_LEVEL_1;

/// Value reported when no decoder configuration was ever observed.
pub const DEFAULT_PROFILE_LEVEL: u8 = LOW_COMPLEXITY_LEVEL_3;

/// A profile level that may not have been observed yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileLevel(Option<u8>);

impl ProfileLevel {
    pub fn new(level: u8) -> Self {
        Self(Some(level))
    }

    pub fn set(&mut self, level: u8) {
        self.0 = Some(level);
    }

    pub fn raw(&self) -> Option<u8> {
        self.0
    }

    /// Returns the stored level, or Low Complexity Level 3 with a warning if unset.
    pub fn get(&self) -> u8 {
        match self.0 {
            Some(level) => level,
            None => {
                warn!(
                    "Retrieving Profile Level that was not set, perhaps no decoder config record was found in the input file, returning {DEFAULT_PROFILE_LEVEL} as a sensible default"
                );
                DEFAULT_PROFILE_LEVEL
            }
        }
    }
}

pub fn is_low_complexity(level: u8) -> bool {
    (LOW_COMPLEXITY_LEVEL_1..=LOW_COMPLEXITY_LEVEL_5).contains(&level)
}

/// Human readable name of a profile level, if the value is assigned.
pub fn profile_level_name(level: u8) -> Option<String> {
    let (profile, base) = match level {
        MAIN_LEVEL_1..=MAIN_LEVEL_5 => ("Main", MAIN_LEVEL_1),
        HIGH_LEVEL_1..=HIGH_LEVEL_5 => ("High", HIGH_LEVEL_1),
        0x0C => return None,
        LOW_COMPLEXITY_LEVEL_1..=LOW_COMPLEXITY_LEVEL_5 => ("Low Complexity", LOW_COMPLEXITY_LEVEL_1),
        BASELINE_LEVEL_1..=BASELINE_LEVEL_5 => ("Baseline", BASELINE_LEVEL_1),
        _ => return None,
    };

    Some(format!("{profile} Level {}", level - base + 1))
}
