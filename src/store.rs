//! Store trait for the shared transactional persistence boundary

use std::future::Future;
use std::time::Duration;

use crate::types::{
    Achievement, AchievementId, GameMode, LeaderboardEntry, Lobby, LobbyId, Membership, Player,
    PlayerAchievement, PlayerId, Race, RaceId, RaceResult, TrackId,
};
use crate::{ProgressionError, Result};

/// Version counter attached to every mutable record.
pub type Version = u64;

/// A record together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: Version,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: Version) -> Self {
        Self { value, version }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// One write inside a [`Transaction`].
///
/// `Put*` writes carry the version the new value was computed from; the store
/// rejects them with [`ProgressionError::VersionConflict`] when the stored
/// version differs. `Insert*` writes fail when the unique key already exists.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    PutPlayer { player: Player, expected: Version },
    PutLobby { lobby: Lobby, expected: Version },
    InsertRace(Race),
    PutRace { race: Race, expected: Version },
    InsertResult(RaceResult),
    /// `expected: None` requires that no entry exists yet for the key.
    PutLeaderboardEntry { entry: LeaderboardEntry, expected: Option<Version> },
    InsertMembership(Membership),
    UpdateMembership(Membership),
    DeleteMembership { lobby: LobbyId, player: PlayerId },
}

/// A set of writes applied all-or-nothing.
///
/// Every write in a transaction must touch a different key; preconditions are
/// checked against the state before the transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    writes: Vec<Write>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: Write) -> &mut Self {
        self.writes.push(write);
        self
    }

    pub fn with(mut self, write: Write) -> Self {
        self.writes.push(write);
        self
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

/// Trait for progression stores
///
/// Stores abstract over the shared transactional database the engine writes
/// to. Every call is a potential network round trip and may fail with a
/// transient error; the engine bounds each call with a timeout.
///
/// Implementations must guarantee:
/// - `commit` applies all writes or none
/// - versions increase on every successful write of a record
/// - unique keys (`lobby × player`, `race × player`, `player × track × mode`)
///   are never duplicated
/// - deleting a player or lobby cascades to its dependent records
#[async_trait::async_trait]
pub trait Store: Send + Sync + 'static {
    /// Apply a transaction atomically.
    ///
    /// Returns:
    /// - `Ok(())` - every write was applied
    /// - `Err(VersionConflict)` - a record changed since it was read; nothing applied
    /// - `Err(Duplicate*)` - an insert hit an existing unique key; nothing applied
    /// - `Err(DanglingReference)` - a put targeted a missing record; nothing applied
    async fn commit(&self, tx: Transaction) -> Result<()>;

    async fn insert_player(&self, player: Player) -> Result<()>;
    async fn player(&self, id: PlayerId) -> Result<Option<Versioned<Player>>>;
    async fn players(&self) -> Result<Vec<Player>>;

    /// Remove a player and everything the player owns.
    ///
    /// Memberships are removed with their lobby's occupancy decremented, hosted
    /// lobbies are deleted with their races and results, and the player's
    /// results, leaderboard entries and achievement records are dropped.
    /// Returns whether the player existed.
    async fn delete_player(&self, id: PlayerId) -> Result<bool>;

    async fn insert_lobby(&self, lobby: Lobby) -> Result<()>;
    async fn lobby(&self, id: LobbyId) -> Result<Option<Versioned<Lobby>>>;
    async fn lobbies(&self) -> Result<Vec<Lobby>>;

    /// Remove a lobby with its memberships, races and their results.
    async fn delete_lobby(&self, id: LobbyId) -> Result<bool>;

    async fn membership(&self, lobby: LobbyId, player: PlayerId) -> Result<Option<Membership>>;
    async fn memberships(&self, lobby: LobbyId) -> Result<Vec<Membership>>;

    async fn race(&self, id: RaceId) -> Result<Option<Versioned<Race>>>;
    async fn races(&self) -> Result<Vec<Race>>;
    async fn results(&self, race: RaceId) -> Result<Vec<RaceResult>>;

    async fn leaderboard_entry(
        &self,
        player: PlayerId,
        track: &TrackId,
        mode: GameMode,
    ) -> Result<Option<Versioned<LeaderboardEntry>>>;
    async fn leaderboard(&self, track: &TrackId, mode: GameMode) -> Result<Vec<LeaderboardEntry>>;

    async fn put_achievement(&self, achievement: Achievement) -> Result<()>;
    async fn achievement(&self, id: AchievementId) -> Result<Option<Achievement>>;

    /// Insert or replace a player's record for one achievement.
    async fn put_player_achievement(&self, record: PlayerAchievement) -> Result<()>;
    async fn player_achievements(&self, player: PlayerId) -> Result<Vec<PlayerAchievement>>;
}

/// Run a store call with an upper bound on its duration.
///
/// A call that exceeds `limit` surfaces as [`ProgressionError::Timeout`], a
/// transient error the caller may retry.
pub(crate) async fn bounded<T, F>(limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ProgressionError::Timeout { duration: limit }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[tokio::test]
    async fn bounded_passes_results_through() {
        let value = bounded(Duration::from_millis(50), async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);

        let err = bounded::<(), _>(Duration::from_millis(50), async {
            Err(ProgressionError::store_unavailable("down"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientStore);
    }

    #[tokio::test]
    async fn bounded_times_out_slow_calls() {
        let err = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ProgressionError::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn transaction_collects_writes() {
        let mut tx = Transaction::new();
        assert!(tx.is_empty());
        tx.push(Write::DeleteMembership { lobby: LobbyId::new(), player: PlayerId::new() });
        let tx = tx.with(Write::DeleteMembership { lobby: LobbyId::new(), player: PlayerId::new() });
        assert_eq!(tx.len(), 2);
    }
}
