//! Lobby and membership types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

use super::{CarId, LobbyId, PlayerId, TrackId};

/// Game mode played in a lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Race,
    TimeTrial,
    Elimination,
    Drift,
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GameMode::Race => "race",
            GameMode::TimeTrial => "time_trial",
            GameMode::Elimination => "elimination",
            GameMode::Drift => "drift",
        };
        f.write_str(name)
    }
}

/// Lobby lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    Waiting,
    Starting,
    InProgress,
    Finished,
    Cancelled,
}

impl LobbyStatus {
    /// Whether the lobby is listed for players looking for a race.
    pub fn is_open(self) -> bool {
        matches!(self, LobbyStatus::Waiting | LobbyStatus::Starting)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LobbyStatus::Finished | LobbyStatus::Cancelled)
    }

    /// Legal lifecycle moves: `waiting → starting → in_progress → finished`,
    /// with cancellation possible from any non-terminal state.
    pub fn can_transition_to(self, next: LobbyStatus) -> bool {
        use LobbyStatus::*;
        matches!(
            (self, next),
            (Waiting, Starting)
                | (Starting, Waiting)
                | (Waiting, InProgress)
                | (Starting, InProgress)
                | (InProgress, Finished)
                | (Waiting | Starting | InProgress, Cancelled)
        )
    }
}

impl fmt::Display for LobbyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LobbyStatus::Waiting => "waiting",
            LobbyStatus::Starting => "starting",
            LobbyStatus::InProgress => "in_progress",
            LobbyStatus::Finished => "finished",
            LobbyStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A lobby gathering players before and during a race.
///
/// `current_players` is maintained by the membership tracker only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lobby {
    pub id: LobbyId,
    pub name: String,
    pub host: PlayerId,
    pub max_players: u8,
    pub current_players: u8,
    pub track: TrackId,
    pub mode: GameMode,
    pub status: LobbyStatus,
    pub is_private: bool,
    pub settings: serde_json::Value,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Lobby {
    pub fn is_full(&self) -> bool {
        self.current_players >= self.max_players
    }

    pub fn open_seats(&self) -> u8 {
        self.max_players.saturating_sub(self.current_players)
    }

    /// Private lobbies are only visible to their host.
    pub fn is_visible_to(&self, viewer: Option<PlayerId>) -> bool {
        !self.is_private || viewer == Some(self.host)
    }
}

/// Parameters for creating a lobby.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLobby {
    pub name: String,
    pub host: PlayerId,
    pub max_players: u8,
    pub track: TrackId,
    pub mode: GameMode,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// Seat choice made when joining a lobby.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatSelection {
    pub car: Option<CarId>,
}

/// One player's presence in a lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub lobby: LobbyId,
    pub player: PlayerId,
    pub car: Option<CarId>,
    pub is_ready: bool,
    pub joined_at: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        use LobbyStatus::*;
        assert!(Waiting.can_transition_to(Starting));
        assert!(Starting.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Finished));
        assert!(InProgress.can_transition_to(Cancelled));
        assert!(!Finished.can_transition_to(Waiting));
        assert!(!Cancelled.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(Waiting));
        assert!(!Waiting.can_transition_to(Finished));
    }

    #[test]
    fn mode_serializes_snake_case() {
        let json = serde_json::to_string(&GameMode::TimeTrial).unwrap();
        assert_eq!(json, "\"time_trial\"");
        let status: LobbyStatus = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(status, LobbyStatus::InProgress);
    }
}
