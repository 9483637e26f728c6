//! Leaderboard and achievement records

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use super::{AchievementId, CarId, GameMode, LapTime, PlayerId, TrackId};

/// A player's personal best on one track in one mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub player: PlayerId,
    pub track: TrackId,
    pub mode: GameMode,
    pub best_time: LapTime,
    pub car: Option<CarId>,
    #[serde(default)]
    pub replay: Option<Vec<u8>>,
    pub achieved_at: SystemTime,
}

/// Key identifying a leaderboard entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LeaderboardKey {
    pub player: PlayerId,
    pub track: TrackId,
    pub mode: GameMode,
}

impl LeaderboardEntry {
    pub fn key(&self) -> LeaderboardKey {
        LeaderboardKey { player: self.player, track: self.track.clone(), mode: self.mode }
    }
}

/// Achievement catalog entry. Criteria are evaluated elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: AchievementId,
    pub name: String,
    pub description: String,
    pub criteria: serde_json::Value,
    pub reward_coins: u64,
}

/// A player's progress towards, or unlock of, an achievement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerAchievement {
    pub player: PlayerId,
    pub achievement: AchievementId,
    /// Completion percentage, 0 to 100.
    pub progress: u8,
    pub unlocked_at: Option<SystemTime>,
}

impl PlayerAchievement {
    pub fn is_unlocked(&self) -> bool {
        self.unlocked_at.is_some()
    }
}
