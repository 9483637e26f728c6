//! Core types for progression data.
//!
//! This module provides the entities the engine persists and the read models it
//! serves:
//! - [`Player`] carries cumulative counters, presence and moderation flags
//! - [`Lobby`] and [`Membership`] describe who is waiting to race where
//! - [`Race`] and [`RaceResult`] are the input events folded into progression
//! - [`LeaderboardEntry`] holds a personal best per track and mode
//! - [`Achievement`] and [`PlayerAchievement`] are stored as opaque records
//!
//! Identifiers are UUID newtypes so that different entity ids cannot be mixed
//! up. Lap times use [`LapTime`], an integer millisecond type with exact ordering.
//!
//! ## Usage Example
//!
//! ```rust
//! use paddock::types::{LapTime, Player, PlayerId, RaceId, RaceResult};
//!
//! let player = Player::new(PlayerId::new(), "ayrton");
//! let mut result = RaceResult::new(RaceId::new(), player.id);
//! result.position = Some(1);
//! result.best_lap_time = LapTime::from_secs_f64(61.2);
//!
//! assert!(result.is_win());
//! assert!(result.is_qualifying());
//! ```

mod ids;
mod lap_time;
mod leaderboard;
mod lobby;
mod player;
mod race;
mod views;

// Re-export all public types
pub use ids::{AchievementId, CarId, LobbyId, PlayerId, RaceId, TrackId};
pub use lap_time::LapTime;
pub use leaderboard::{Achievement, LeaderboardEntry, LeaderboardKey, PlayerAchievement};
pub use lobby::{GameMode, Lobby, LobbyStatus, Membership, NewLobby, SeatSelection};
pub use player::{ModerationFlags, Player};
pub use race::{Race, RaceResult, RaceStatus};
pub use views::{
    LobbySummary, PlayerProfile, RaceSummary, RankedEntry, RankedPlayer, TrackLeaderboard,
};
