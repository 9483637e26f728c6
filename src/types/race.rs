//! Race and race result types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

use super::{CarId, GameMode, LapTime, LobbyId, PlayerId, RaceId, TrackId};

/// Race lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceStatus {
    InProgress,
    Finished,
    Abandoned,
}

impl fmt::Display for RaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RaceStatus::InProgress => "in_progress",
            RaceStatus::Finished => "finished",
            RaceStatus::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

/// A race started from a lobby.
///
/// Track and mode are copied from the lobby when the race starts so that
/// results keep their leaderboard context if the lobby is later reconfigured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Race {
    pub id: RaceId,
    pub lobby: LobbyId,
    pub track: TrackId,
    pub mode: GameMode,
    pub laps: u32,
    /// Lobby occupancy when the race started.
    pub expected_racers: u32,
    /// Players seated when the race started. Only they may submit results.
    pub participants: Vec<PlayerId>,
    pub status: RaceStatus,
    pub winner: Option<PlayerId>,
    pub started_at: SystemTime,
    pub finished_at: Option<SystemTime>,
    pub details: serde_json::Value,
}

impl Race {
    pub fn is_finalized(&self) -> bool {
        self.status != RaceStatus::InProgress
    }

    pub fn is_participant(&self, player: PlayerId) -> bool {
        self.participants.contains(&player)
    }

    /// Wall-clock duration of a finished race.
    pub fn duration(&self) -> Option<Duration> {
        self.finished_at.and_then(|end| end.duration_since(self.started_at).ok())
    }
}

/// One player's outcome in one race. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceResult {
    pub race: RaceId,
    pub player: PlayerId,
    pub car: Option<CarId>,
    /// Finishing position, absent for a DNF that was never classified.
    pub position: Option<u32>,
    pub finish_time: Option<Duration>,
    pub best_lap_time: Option<LapTime>,
    pub laps_completed: u32,
    pub points_earned: u64,
    pub coins_earned: u64,
    pub experience_earned: u64,
    pub finished: bool,
    pub dnf_reason: Option<String>,
    #[serde(default)]
    pub replay: Option<Vec<u8>>,
}

impl RaceResult {
    /// A result with no rewards, timing or position.
    pub fn new(race: RaceId, player: PlayerId) -> Self {
        Self {
            race,
            player,
            car: None,
            position: None,
            finish_time: None,
            best_lap_time: None,
            laps_completed: 0,
            points_earned: 0,
            coins_earned: 0,
            experience_earned: 0,
            finished: false,
            dnf_reason: None,
            replay: None,
        }
    }

    pub fn is_win(&self) -> bool {
        self.position == Some(1)
    }

    /// Every classified non-winner counts as a loss, whether it finished or not.
    pub fn is_loss(&self) -> bool {
        matches!(self.position, Some(position) if position > 1)
    }

    /// Whether the result carries a time that can enter the leaderboard.
    pub fn is_qualifying(&self) -> bool {
        self.best_lap_time.is_some_and(|time| !time.is_zero())
    }
}
