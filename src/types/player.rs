//! Player progression record

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use super::{LapTime, PlayerId};
use crate::level::level;

/// Moderation state applied by session management.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationFlags {
    pub is_banned: bool,
    pub is_muted: bool,
}

/// A player's cumulative progression.
///
/// Counters are only ever changed by folding race results; `level` is always
/// derived from `experience`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub username: String,
    pub total_races: u32,
    pub total_wins: u32,
    pub total_losses: u32,
    pub best_lap_time: Option<LapTime>,
    pub total_points: u64,
    pub coins: u64,
    pub experience: u64,
    pub level: u32,
    pub is_online: bool,
    pub moderation: ModerationFlags,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Player {
    /// Create a player with zeroed counters.
    pub fn new(id: PlayerId, username: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            username: username.into(),
            total_races: 0,
            total_wins: 0,
            total_losses: 0,
            best_lap_time: None,
            total_points: 0,
            coins: 0,
            experience: 0,
            level: level(0),
            is_online: false,
            moderation: ModerationFlags::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_banned(&self) -> bool {
        self.moderation.is_banned
    }

    /// Wins over races, rounded to two decimals; zero before the first race.
    pub fn win_rate(&self) -> f64 {
        if self.total_races == 0 {
            return 0.0;
        }
        let rate = self.total_wins as f64 / self.total_races as f64;
        (rate * 100.0).round() / 100.0
    }
}
