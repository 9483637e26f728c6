//! Lap time representation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lap or segment time with millisecond resolution.
///
/// Stored as an integer so that comparisons are exact: a leaderboard record is
/// only replaced by a strictly smaller value, which floating point equality
/// would make unreliable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LapTime(u32);

impl LapTime {
    pub const fn from_millis(millis: u32) -> Self {
        Self(millis)
    }

    /// Convert from seconds, rounding to the nearest millisecond.
    ///
    /// Returns `None` for negative, non-finite or out-of-range values.
    pub fn from_secs_f64(secs: f64) -> Option<Self> {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        let millis = (secs * 1000.0).round();
        if millis > u32::MAX as f64 {
            return None;
        }
        Some(Self(millis as u32))
    }

    pub const fn as_millis(self) -> u32 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.0 as u64)
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for LapTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let minutes = self.0 / 60_000;
        let seconds = (self.0 % 60_000) / 1000;
        let millis = self.0 % 1000;
        write!(f, "{}:{:02}.{:03}", minutes, seconds, millis)
    }
}
