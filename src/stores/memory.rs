//! In-memory store

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::store::{Store, Transaction, Version, Versioned, Write};
use crate::types::{
    Achievement, AchievementId, GameMode, LeaderboardEntry, LeaderboardKey, Lobby, LobbyId,
    Membership, Player, PlayerAchievement, PlayerId, Race, RaceId, RaceResult, TrackId,
};
use crate::{ProgressionError, Result};

#[derive(Debug, Default)]
struct Tables {
    players: BTreeMap<PlayerId, Versioned<Player>>,
    lobbies: BTreeMap<LobbyId, Versioned<Lobby>>,
    memberships: BTreeMap<(LobbyId, PlayerId), Membership>,
    races: BTreeMap<RaceId, Versioned<Race>>,
    results: BTreeMap<(RaceId, PlayerId), RaceResult>,
    leaderboard: BTreeMap<LeaderboardKey, Versioned<LeaderboardEntry>>,
    achievements: BTreeMap<AchievementId, Achievement>,
    player_achievements: BTreeMap<(PlayerId, AchievementId), PlayerAchievement>,
}

impl Tables {
    fn check_version(
        entity: &'static str,
        id: impl ToString,
        stored: Option<Version>,
        expected: Version,
    ) -> Result<()> {
        match stored {
            None => Err(ProgressionError::dangling(entity, id)),
            Some(version) if version != expected => {
                Err(ProgressionError::version_conflict(entity, id))
            }
            Some(_) => Ok(()),
        }
    }

    /// Check every precondition of a transaction without changing anything.
    fn validate(&self, tx: &Transaction) -> Result<()> {
        for write in tx.writes() {
            match write {
                Write::PutPlayer { player, expected } => {
                    let stored = self.players.get(&player.id).map(|p| p.version);
                    Self::check_version("player", player.id, stored, *expected)?;
                }
                Write::PutLobby { lobby, expected } => {
                    let stored = self.lobbies.get(&lobby.id).map(|l| l.version);
                    Self::check_version("lobby", lobby.id, stored, *expected)?;
                }
                Write::InsertRace(race) => {
                    if !self.lobbies.contains_key(&race.lobby) {
                        return Err(ProgressionError::dangling("lobby", race.lobby));
                    }
                    if self.races.contains_key(&race.id) {
                        return Err(ProgressionError::version_conflict("race", race.id));
                    }
                }
                Write::PutRace { race, expected } => {
                    let stored = self.races.get(&race.id).map(|r| r.version);
                    Self::check_version("race", race.id, stored, *expected)?;
                }
                Write::InsertResult(result) => {
                    if !self.races.contains_key(&result.race) {
                        return Err(ProgressionError::dangling("race", result.race));
                    }
                    if !self.players.contains_key(&result.player) {
                        return Err(ProgressionError::dangling("player", result.player));
                    }
                    if self.results.contains_key(&(result.race, result.player)) {
                        return Err(ProgressionError::DuplicateResult {
                            race: result.race,
                            player: result.player,
                        });
                    }
                }
                Write::PutLeaderboardEntry { entry, expected } => {
                    if !self.players.contains_key(&entry.player) {
                        return Err(ProgressionError::dangling("player", entry.player));
                    }
                    let stored = self.leaderboard.get(&entry.key()).map(|e| e.version);
                    if stored != *expected {
                        return Err(ProgressionError::version_conflict(
                            "leaderboard entry",
                            format!("{}/{}/{}", entry.player, entry.track, entry.mode),
                        ));
                    }
                }
                Write::InsertMembership(membership) => {
                    if !self.lobbies.contains_key(&membership.lobby) {
                        return Err(ProgressionError::dangling("lobby", membership.lobby));
                    }
                    if !self.players.contains_key(&membership.player) {
                        return Err(ProgressionError::dangling("player", membership.player));
                    }
                    if self.memberships.contains_key(&(membership.lobby, membership.player)) {
                        return Err(ProgressionError::DuplicateMembership {
                            lobby: membership.lobby,
                            player: membership.player,
                        });
                    }
                }
                Write::UpdateMembership(membership) => {
                    if !self.memberships.contains_key(&(membership.lobby, membership.player)) {
                        return Err(ProgressionError::dangling(
                            "membership",
                            format!("{}/{}", membership.lobby, membership.player),
                        ));
                    }
                }
                Write::DeleteMembership { lobby, player } => {
                    if !self.memberships.contains_key(&(*lobby, *player)) {
                        return Err(ProgressionError::version_conflict(
                            "membership",
                            format!("{}/{}", lobby, player),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, tx: Transaction) {
        for write in tx.into_writes() {
            match write {
                Write::PutPlayer { player, expected } => {
                    self.players.insert(player.id, Versioned::new(player, expected + 1));
                }
                Write::PutLobby { lobby, expected } => {
                    self.lobbies.insert(lobby.id, Versioned::new(lobby, expected + 1));
                }
                Write::InsertRace(race) => {
                    self.races.insert(race.id, Versioned::new(race, 1));
                }
                Write::PutRace { race, expected } => {
                    self.races.insert(race.id, Versioned::new(race, expected + 1));
                }
                Write::InsertResult(result) => {
                    self.results.insert((result.race, result.player), result);
                }
                Write::PutLeaderboardEntry { entry, expected } => {
                    let version = expected.map_or(1, |v| v + 1);
                    self.leaderboard.insert(entry.key(), Versioned::new(entry, version));
                }
                Write::InsertMembership(membership) | Write::UpdateMembership(membership) => {
                    self.memberships.insert((membership.lobby, membership.player), membership);
                }
                Write::DeleteMembership { lobby, player } => {
                    self.memberships.remove(&(lobby, player));
                }
            }
        }
    }

    fn remove_lobby(&mut self, id: LobbyId) -> bool {
        if self.lobbies.remove(&id).is_none() {
            return false;
        }
        self.memberships.retain(|(lobby, _), _| *lobby != id);

        let races: Vec<RaceId> =
            self.races.values().filter(|r| r.value.lobby == id).map(|r| r.value.id).collect();
        for race in &races {
            self.races.remove(race);
        }
        self.results.retain(|(race, _), _| !races.contains(race));
        true
    }

    fn remove_player(&mut self, id: PlayerId) -> bool {
        if self.players.remove(&id).is_none() {
            return false;
        }
        let now = SystemTime::now();

        let joined: Vec<LobbyId> = self
            .memberships
            .keys()
            .filter(|(_, player)| *player == id)
            .map(|(lobby, _)| *lobby)
            .collect();
        for lobby_id in joined {
            self.memberships.remove(&(lobby_id, id));
            if let Some(lobby) = self.lobbies.get_mut(&lobby_id) {
                lobby.value.current_players = lobby.value.current_players.saturating_sub(1);
                lobby.value.updated_at = now;
                lobby.version += 1;
            }
        }

        let hosted: Vec<LobbyId> =
            self.lobbies.values().filter(|l| l.value.host == id).map(|l| l.value.id).collect();
        for lobby_id in hosted {
            self.remove_lobby(lobby_id);
        }

        for race in self.races.values_mut() {
            let mut changed = false;
            if race.value.winner == Some(id) {
                race.value.winner = None;
                changed = true;
            }
            // A running race stops waiting for a closed account
            if !race.value.is_finalized() && race.value.is_participant(id) {
                race.value.participants.retain(|player| *player != id);
                race.value.expected_racers = race.value.participants.len() as u32;
                changed = true;
            }
            if changed {
                race.version += 1;
            }
        }

        self.results.retain(|(_, player), _| *player != id);
        self.leaderboard.retain(|key, _| key.player != id);
        self.player_achievements.retain(|(player, _), _| *player != id);
        true
    }
}

/// Store that keeps every table in process memory.
///
/// Commits validate all preconditions and then apply all writes inside one
/// critical section, which gives the same all-or-nothing semantics as a
/// database transaction. Optional latency and fault injection make it usable
/// for exercising retry and timeout paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    latency: Option<Duration>,
    failing_commits: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` to mimic a network round trip.
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency: Some(latency), ..Self::default() }
    }

    /// Make the next `count` commits fail with a transient error.
    pub fn fail_next_commits(&self, count: u32) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    async fn round_trip(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn commit(&self, tx: Transaction) -> Result<()> {
        self.round_trip().await;
        if self.take_injected_failure() {
            warn!("Injected commit failure");
            return Err(ProgressionError::store_unavailable("injected commit failure"));
        }

        let mut tables = self.tables.write().await;
        tables.validate(&tx)?;
        trace!(writes = tx.len(), "Committing transaction");
        tables.apply(tx);
        Ok(())
    }

    async fn insert_player(&self, player: Player) -> Result<()> {
        self.round_trip().await;
        let mut tables = self.tables.write().await;
        if tables.players.contains_key(&player.id) {
            return Err(ProgressionError::validation("player id", "already registered"));
        }
        if tables.players.values().any(|p| p.value.username == player.username) {
            return Err(ProgressionError::DuplicateUsername { username: player.username });
        }
        tables.players.insert(player.id, Versioned::new(player, 1));
        Ok(())
    }

    async fn player(&self, id: PlayerId) -> Result<Option<Versioned<Player>>> {
        self.round_trip().await;
        Ok(self.tables.read().await.players.get(&id).cloned())
    }

    async fn players(&self) -> Result<Vec<Player>> {
        self.round_trip().await;
        Ok(self.tables.read().await.players.values().map(|p| p.value.clone()).collect())
    }

    async fn delete_player(&self, id: PlayerId) -> Result<bool> {
        self.round_trip().await;
        let removed = self.tables.write().await.remove_player(id);
        debug!(player = %id, removed, "Deleted player");
        Ok(removed)
    }

    async fn insert_lobby(&self, lobby: Lobby) -> Result<()> {
        self.round_trip().await;
        let mut tables = self.tables.write().await;
        if !tables.players.contains_key(&lobby.host) {
            return Err(ProgressionError::dangling("player", lobby.host));
        }
        if tables.lobbies.contains_key(&lobby.id) {
            return Err(ProgressionError::validation("lobby id", "already exists"));
        }
        tables.lobbies.insert(lobby.id, Versioned::new(lobby, 1));
        Ok(())
    }

    async fn lobby(&self, id: LobbyId) -> Result<Option<Versioned<Lobby>>> {
        self.round_trip().await;
        Ok(self.tables.read().await.lobbies.get(&id).cloned())
    }

    async fn lobbies(&self) -> Result<Vec<Lobby>> {
        self.round_trip().await;
        Ok(self.tables.read().await.lobbies.values().map(|l| l.value.clone()).collect())
    }

    async fn delete_lobby(&self, id: LobbyId) -> Result<bool> {
        self.round_trip().await;
        let removed = self.tables.write().await.remove_lobby(id);
        debug!(lobby = %id, removed, "Deleted lobby");
        Ok(removed)
    }

    async fn membership(&self, lobby: LobbyId, player: PlayerId) -> Result<Option<Membership>> {
        self.round_trip().await;
        Ok(self.tables.read().await.memberships.get(&(lobby, player)).cloned())
    }

    async fn memberships(&self, lobby: LobbyId) -> Result<Vec<Membership>> {
        self.round_trip().await;
        let tables = self.tables.read().await;
        Ok(tables
            .memberships
            .range((lobby, PlayerId::from_uuid(uuid::Uuid::nil()))..)
            .take_while(|((l, _), _)| *l == lobby)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn race(&self, id: RaceId) -> Result<Option<Versioned<Race>>> {
        self.round_trip().await;
        Ok(self.tables.read().await.races.get(&id).cloned())
    }

    async fn races(&self) -> Result<Vec<Race>> {
        self.round_trip().await;
        Ok(self.tables.read().await.races.values().map(|r| r.value.clone()).collect())
    }

    async fn results(&self, race: RaceId) -> Result<Vec<RaceResult>> {
        self.round_trip().await;
        let tables = self.tables.read().await;
        Ok(tables
            .results
            .range((race, PlayerId::from_uuid(uuid::Uuid::nil()))..)
            .take_while(|((r, _), _)| *r == race)
            .map(|(_, result)| result.clone())
            .collect())
    }

    async fn leaderboard_entry(
        &self,
        player: PlayerId,
        track: &TrackId,
        mode: GameMode,
    ) -> Result<Option<Versioned<LeaderboardEntry>>> {
        self.round_trip().await;
        let key = LeaderboardKey { player, track: track.clone(), mode };
        Ok(self.tables.read().await.leaderboard.get(&key).cloned())
    }

    async fn leaderboard(&self, track: &TrackId, mode: GameMode) -> Result<Vec<LeaderboardEntry>> {
        self.round_trip().await;
        let tables = self.tables.read().await;
        Ok(tables
            .leaderboard
            .values()
            .filter(|e| &e.value.track == track && e.value.mode == mode)
            .map(|e| e.value.clone())
            .collect())
    }

    async fn put_achievement(&self, achievement: Achievement) -> Result<()> {
        self.round_trip().await;
        self.tables.write().await.achievements.insert(achievement.id, achievement);
        Ok(())
    }

    async fn achievement(&self, id: AchievementId) -> Result<Option<Achievement>> {
        self.round_trip().await;
        Ok(self.tables.read().await.achievements.get(&id).cloned())
    }

    async fn put_player_achievement(&self, record: PlayerAchievement) -> Result<()> {
        self.round_trip().await;
        let mut tables = self.tables.write().await;
        if !tables.players.contains_key(&record.player) {
            return Err(ProgressionError::dangling("player", record.player));
        }
        if !tables.achievements.contains_key(&record.achievement) {
            return Err(ProgressionError::dangling("achievement", record.achievement));
        }
        tables.player_achievements.insert((record.player, record.achievement), record);
        Ok(())
    }

    async fn player_achievements(&self, player: PlayerId) -> Result<Vec<PlayerAchievement>> {
        self.round_trip().await;
        let tables = self.tables.read().await;
        Ok(tables
            .player_achievements
            .iter()
            .filter(|((p, _), _)| *p == player)
            .map(|(_, record)| record.clone())
            .collect())
    }
}
