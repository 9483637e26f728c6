//! Read models served to presentation layers
//!
//! None of these are stored. Ranks and rates are computed from the current
//! aggregate state every time a view is requested.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

use super::{CarId, GameMode, LapTime, Lobby, LobbyId, Player, PlayerId, RaceId, TrackId};

/// A player's progression with derived win rate and global rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub player: Player,
    pub win_rate: f64,
    pub global_rank: u32,
    pub achievement_count: usize,
}

/// One row of a track leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub rank: u32,
    pub player: PlayerId,
    pub username: Option<String>,
    pub best_time: LapTime,
    pub car: Option<CarId>,
    pub achieved_at: SystemTime,
}

/// Leaderboard for one track and mode, ordered by rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackLeaderboard {
    pub track: TrackId,
    pub mode: GameMode,
    pub entries: Vec<RankedEntry>,
}

/// One row of the global points ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedPlayer {
    pub rank: u32,
    pub player: PlayerId,
    pub username: String,
    pub total_points: u64,
    pub level: u32,
}

/// A lobby as shown in the lobby browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbySummary {
    pub lobby: Lobby,
    pub host_username: Option<String>,
    pub open_seats: u8,
}

/// Summary of a finished race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceSummary {
    pub race: RaceId,
    pub lobby: LobbyId,
    pub track: TrackId,
    pub mode: GameMode,
    pub winner: Option<PlayerId>,
    pub winner_username: Option<String>,
    pub racer_count: usize,
    pub duration: Option<Duration>,
    pub finished_at: Option<SystemTime>,
}
