use std::fmt;

use serde::{Deserialize, Serialize};

pub const MIN_ORDINARY_GOAL: u8 = 1;
pub const MAX_ORDINARY_GOAL: u8 = 10;
pub const MIN_XOR_LEVEL: u8 = 2;
pub const MAX_XOR_LEVEL: u8 = 10;

/// XOR level `n` is encoded as `XOR_GOAL_BASE + n`.
const XOR_GOAL_BASE: u8 = 10;

/// The highest encoded goal value; sizing constant for per-goal tables.
pub const MAX_GOAL_VALUE: u8 = XOR_GOAL_BASE + MAX_XOR_LEVEL;

/// A chunk's redundancy goal.
///
/// The raw byte is `0` for an unreferenced chunk, `1..=10` for an ordinary
/// replica count, and `10 + level` for an XOR scheme of the given level.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Goal(pub u8);

impl Goal {
    /// The goal of a chunk with no file references.
    pub const NONE: Goal = Goal(0);

    /// An ordinary goal of `copies` whole replicas. Panics outside `1..=10`.
    pub fn ordinary(copies: u8) -> Goal {
        assert!(
            (MIN_ORDINARY_GOAL..=MAX_ORDINARY_GOAL).contains(&copies),
            "ordinary goal {} out of range",
            copies
        );
        Goal(copies)
    }

    /// An XOR goal of the given level. Panics outside `2..=10`.
    pub fn xor(level: u8) -> Goal {
        assert!(
            (MIN_XOR_LEVEL..=MAX_XOR_LEVEL).contains(&level),
            "xor level {} out of range",
            level
        );
        Goal(XOR_GOAL_BASE + level)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn is_ordinary(self) -> bool {
        (MIN_ORDINARY_GOAL..=MAX_ORDINARY_GOAL).contains(&self.0)
    }

    pub fn is_xor(self) -> bool {
        self.0 > XOR_GOAL_BASE && self.0 <= MAX_GOAL_VALUE
    }

    /// The XOR level, if this is an XOR goal.
    pub fn xor_level(self) -> Option<u8> {
        if self.is_xor() {
            Some(self.0 - XOR_GOAL_BASE)
        } else {
            None
        }
    }
}

impl fmt::Debug for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.xor_level() {
            Some(level) => write!(f, "Goal(xor{})", level),
            None => write!(f, "Goal({})", self.0),
        }
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.xor_level() {
            Some(level) => write!(f, "xor{}", level),
            None => write!(f, "{}", self.0),
        }
    }
}
