//! Progression facade
//!
//! [`ProgressionEngine`] is the entry point for everything that changes or
//! reads progression state. Race submissions go through one versioned
//! transaction per attempt, so a batch either lands completely (results,
//! player counters, personal bests and race state together) or leaves the
//! store untouched.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::membership::MembershipTracker;
use crate::ranking::LeaderboardRanker;
use crate::stats::{StatsAggregator, fold};
use crate::store::{Store, Transaction, Versioned, Write, bounded};
use crate::types::{
    Achievement, GameMode, Lobby, LobbyId, LobbyStatus, LobbySummary, Membership, NewLobby,
    Player, PlayerAchievement, PlayerId, PlayerProfile, Race, RaceId, RaceResult, RaceStatus,
    RaceSummary, RankedPlayer, SeatSelection, TrackId, TrackLeaderboard,
};
use crate::{ProgressionError, Result, ResultFailure};

/// Shortest accepted username, in characters.
pub const MIN_USERNAME_LEN: usize = 3;
/// Longest accepted username, in characters.
pub const MAX_USERNAME_LEN: usize = 32;

/// What one player got out of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProgress {
    pub player: PlayerId,
    pub level: u32,
    pub leveled_up: bool,
    pub personal_best: bool,
}

/// Acknowledgement for an accepted batch of race results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionAck {
    pub race: RaceId,
    pub race_status: RaceStatus,
    pub winner: Option<PlayerId>,
    pub progress: Vec<PlayerProgress>,
}

impl SubmissionAck {
    pub fn applied(&self) -> usize {
        self.progress.len()
    }

    pub fn progress_for(&self, player: PlayerId) -> Option<&PlayerProgress> {
        self.progress.iter().find(|p| p.player == player)
    }
}

/// Progression and ranking engine over a [`Store`].
pub struct ProgressionEngine<S: Store> {
    store: Arc<S>,
    config: EngineConfig,
    stats: StatsAggregator<S>,
    ranker: LeaderboardRanker<S>,
    membership: MembershipTracker<S>,
}

impl<S: Store> ProgressionEngine<S> {
    /// Create an engine, rejecting invalid configuration.
    pub fn new(store: Arc<S>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            stats: StatsAggregator::new(Arc::clone(&store), &config),
            ranker: LeaderboardRanker::new(Arc::clone(&store), &config),
            membership: MembershipTracker::new(Arc::clone(&store), &config),
            store,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn stats(&self) -> &StatsAggregator<S> {
        &self.stats
    }

    pub fn ranker(&self) -> &LeaderboardRanker<S> {
        &self.ranker
    }

    pub fn membership(&self) -> &MembershipTracker<S> {
        &self.membership
    }

    fn timeout(&self) -> Duration {
        self.config.store_timeout()
    }

    // ----- Race submission -----

    /// Persist a batch of results for one race.
    ///
    /// Each result is inserted, folded into its player and offered to the
    /// track leaderboard inside a single transaction that also advances the
    /// race. Any invalid result rejects the whole batch with
    /// [`ProgressionError::BatchRejected`] listing every failing player.
    /// Submitting a result that already landed is rejected as a duplicate,
    /// which makes retrying the same batch safe.
    pub async fn submit_results(
        &self,
        race: RaceId,
        results: Vec<RaceResult>,
    ) -> Result<SubmissionAck> {
        if results.is_empty() {
            return Err(ProgressionError::validation("results", "batch is empty"));
        }
        let failures = check_batch(race, &results);
        if !failures.is_empty() {
            warn!(race = %race, failures = failures.len(), "Malformed race results rejected");
            return Err(ProgressionError::BatchRejected { race, failures });
        }

        for attempt in 1..=self.config.retry.max_attempts {
            match self.try_submit(race, &results).await {
                Ok(ack) => {
                    info!(
                        race = %race,
                        results = ack.applied(),
                        status = %ack.race_status,
                        "Race results accepted"
                    );
                    return Ok(ack);
                }
                Err(e) if e.is_version_conflict() => {
                    trace!(race = %race, attempt, "Race state changed during submission, retrying");
                    tokio::time::sleep(self.config.retry.backoff(attempt)).await;
                }
                Err(e) => {
                    warn!(race = %race, error = %e, "Race results rejected");
                    return Err(e);
                }
            }
        }

        Err(ProgressionError::ConcurrencyRetry {
            entity: "race",
            id: race.to_string(),
            attempts: self.config.retry.max_attempts,
        })
    }

    async fn try_submit(&self, race_id: RaceId, results: &[RaceResult]) -> Result<SubmissionAck> {
        let timeout = self.timeout();
        let Some(race) = bounded(timeout, self.store.race(race_id)).await? else {
            return Err(reject_all(race_id, results, |_| ProgressionError::dangling("race", race_id)));
        };
        let recorded: HashSet<PlayerId> = bounded(timeout, self.store.results(race_id))
            .await?
            .into_iter()
            .map(|result| result.player)
            .collect();

        let mut failures = Vec::new();
        let mut players = Vec::with_capacity(results.len());
        for result in results {
            let error = if recorded.contains(&result.player) {
                Some(ProgressionError::DuplicateResult { race: race_id, player: result.player })
            } else if race.value.is_finalized() {
                Some(ProgressionError::RaceFinalized { race: race_id, status: race.value.status })
            } else if !race.value.is_participant(result.player) {
                Some(ProgressionError::validation(
                    "player",
                    format!("{} was not seated when race {race_id} started", result.player),
                ))
            } else if result.is_win() && race.value.winner.is_some() {
                Some(ProgressionError::validation(
                    "position",
                    format!("race {race_id} already has a winner"),
                ))
            } else if result.laps_completed > race.value.laps {
                Some(ProgressionError::validation(
                    "laps_completed",
                    format!("{} exceeds race length of {}", result.laps_completed, race.value.laps),
                ))
            } else {
                match bounded(timeout, self.store.player(result.player)).await? {
                    None => Some(ProgressionError::dangling("player", result.player)),
                    Some(player) if player.value.is_banned() => {
                        Some(ProgressionError::PlayerBanned { player: result.player })
                    }
                    Some(player) => {
                        players.push(player);
                        None
                    }
                }
            };
            if let Some(error) = error {
                failures.push(ResultFailure { player: result.player, error });
            }
        }
        if !failures.is_empty() {
            return Err(ProgressionError::BatchRejected { race: race_id, failures });
        }

        let now = SystemTime::now();
        let mut tx = Transaction::new();
        let mut progress = Vec::with_capacity(results.len());
        for (result, player) in results.iter().zip(&players) {
            tx.push(Write::InsertResult(result.clone()));

            let folded = fold(&player.value, result, now);
            let mut entry = PlayerProgress {
                player: result.player,
                level: folded.level,
                leveled_up: folded.level > player.value.level,
                personal_best: false,
            };
            tx.push(Write::PutPlayer { player: folded, expected: player.version });

            if result.is_qualifying() {
                let existing = bounded(
                    timeout,
                    self.store.leaderboard_entry(result.player, &race.value.track, race.value.mode),
                )
                .await?;
                if let Some(write) = LeaderboardRanker::<S>::plan(
                    existing.as_ref(),
                    result,
                    &race.value.track,
                    race.value.mode,
                    now,
                ) {
                    tx.push(write);
                    entry.personal_best = true;
                }
            }
            progress.push(entry);
        }

        let mut advanced = race.value.clone();
        if advanced.winner.is_none() {
            advanced.winner = results.iter().find(|result| result.is_win()).map(|r| r.player);
        }
        let finalizing = race.value.participants.iter().all(|participant| {
            recorded.contains(participant) || results.iter().any(|r| r.player == *participant)
        });
        if finalizing {
            advanced.status = RaceStatus::Finished;
            advanced.finished_at = Some(now);
            if let Some(lobby) = bounded(timeout, self.store.lobby(race.value.lobby)).await? {
                if lobby.value.status == LobbyStatus::InProgress {
                    let mut finished = lobby.value.clone();
                    finished.status = LobbyStatus::Finished;
                    finished.updated_at = now;
                    tx.push(Write::PutLobby { lobby: finished, expected: lobby.version });
                }
            }
        }
        tx.push(Write::PutRace { race: advanced.clone(), expected: race.version });

        match bounded(timeout, self.store.commit(tx)).await {
            Ok(()) => {
                for entry in progress.iter().filter(|entry| entry.leveled_up) {
                    debug!(player = %entry.player, level = entry.level, "Player levelled up");
                }
                Ok(SubmissionAck {
                    race: race_id,
                    race_status: advanced.status,
                    winner: advanced.winner,
                    progress,
                })
            }
            Err(e) => Err(attribute_commit_failure(race_id, results, e)),
        }
    }

    // ----- Read models -----

    /// A player's record with win rate, global rank and unlocked achievements.
    pub async fn player_profile(&self, player: PlayerId) -> Result<PlayerProfile> {
        let record = self.require_player(player).await?.into_inner();
        let global_rank = self
            .ranker
            .global_rank(player)
            .await?
            .ok_or_else(|| ProgressionError::dangling("player", player))?;
        let achievement_count = bounded(self.timeout(), self.store.player_achievements(player))
            .await?
            .iter()
            .filter(|record| record.is_unlocked())
            .count();

        Ok(PlayerProfile { win_rate: record.win_rate(), player: record, global_rank, achievement_count })
    }

    pub async fn track_leaderboard(
        &self,
        track: &TrackId,
        mode: GameMode,
        limit: Option<usize>,
    ) -> Result<TrackLeaderboard> {
        self.ranker.track_leaderboard(track, mode, limit).await
    }

    pub async fn global_ranking(&self) -> Result<Vec<RankedPlayer>> {
        self.ranker.global_ranking().await
    }

    /// Lobbies still accepting players that `viewer` is allowed to see, newest first.
    pub async fn active_lobbies(&self, viewer: Option<PlayerId>) -> Result<Vec<LobbySummary>> {
        let mut lobbies: Vec<Lobby> = bounded(self.timeout(), self.store.lobbies())
            .await?
            .into_iter()
            .filter(|lobby| lobby.status.is_open() && lobby.is_visible_to(viewer))
            .collect();
        lobbies.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let usernames = self.usernames().await?;
        Ok(lobbies
            .into_iter()
            .map(|lobby| LobbySummary {
                host_username: usernames.get(&lobby.host).cloned(),
                open_seats: lobby.open_seats(),
                lobby,
            })
            .collect())
    }

    /// Finished races, most recently finished first.
    pub async fn recent_races(&self, limit: usize) -> Result<Vec<RaceSummary>> {
        let mut races: Vec<Race> = bounded(self.timeout(), self.store.races())
            .await?
            .into_iter()
            .filter(|race| race.status == RaceStatus::Finished)
            .collect();
        races.sort_by(|a, b| b.finished_at.cmp(&a.finished_at).then_with(|| a.id.cmp(&b.id)));
        races.truncate(limit);

        let usernames = self.usernames().await?;
        let mut summaries = Vec::with_capacity(races.len());
        for race in races {
            let racer_count = bounded(self.timeout(), self.store.results(race.id)).await?.len();
            summaries.push(RaceSummary {
                race: race.id,
                lobby: race.lobby,
                track: race.track.clone(),
                mode: race.mode,
                winner: race.winner,
                winner_username: race.winner.and_then(|id| usernames.get(&id).cloned()),
                racer_count,
                duration: race.duration(),
                finished_at: race.finished_at,
            });
        }
        Ok(summaries)
    }

    // ----- Players -----

    /// Mirror an externally created account into the progression store.
    pub async fn register_player(&self, id: PlayerId, username: &str) -> Result<Player> {
        validate_username(username)?;
        let player = Player::new(id, username);
        bounded(self.timeout(), self.store.insert_player(player.clone())).await?;
        info!(player = %id, username, "Player registered");
        Ok(player)
    }

    pub async fn set_presence(&self, player: PlayerId, online: bool) -> Result<Player> {
        self.update_player(player, |record| record.is_online = online).await
    }

    pub async fn set_banned(&self, player: PlayerId, banned: bool) -> Result<Player> {
        let updated = self.update_player(player, |record| record.moderation.is_banned = banned).await?;
        info!(player = %player, banned, "Moderation updated");
        Ok(updated)
    }

    /// Close an account and cascade to everything it owns.
    ///
    /// Returns whether the player existed.
    pub async fn close_account(&self, player: PlayerId) -> Result<bool> {
        let removed = bounded(self.timeout(), self.store.delete_player(player)).await?;
        if removed {
            info!(player = %player, "Account closed");
        }
        Ok(removed)
    }

    async fn update_player<F>(&self, id: PlayerId, change: F) -> Result<Player>
    where
        F: Fn(&mut Player),
    {
        for attempt in 1..=self.config.retry.max_attempts {
            let current = self.require_player(id).await?;
            let mut updated = current.value.clone();
            change(&mut updated);
            updated.updated_at = SystemTime::now();

            let tx = Transaction::new()
                .with(Write::PutPlayer { player: updated.clone(), expected: current.version });
            match bounded(self.timeout(), self.store.commit(tx)).await {
                Ok(()) => return Ok(updated),
                Err(e) if e.is_version_conflict() => {
                    trace!(player = %id, attempt, "Player changed during update, retrying");
                    tokio::time::sleep(self.config.retry.backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ProgressionError::ConcurrencyRetry {
            entity: "player",
            id: id.to_string(),
            attempts: self.config.retry.max_attempts,
        })
    }

    async fn require_player(&self, id: PlayerId) -> Result<Versioned<Player>> {
        bounded(self.timeout(), self.store.player(id))
            .await?
            .ok_or_else(|| ProgressionError::dangling("player", id))
    }

    async fn usernames(&self) -> Result<HashMap<PlayerId, String>> {
        let players = bounded(self.timeout(), self.store.players()).await?;
        Ok(players.into_iter().map(|p| (p.id, p.username)).collect())
    }

    // ----- Lobbies -----

    /// Open a new lobby in `waiting` status with no one seated.
    pub async fn create_lobby(&self, request: NewLobby) -> Result<Lobby> {
        let limits = &self.config.lobby;
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ProgressionError::validation("name", "must not be blank"));
        }
        if name.chars().count() > limits.max_name_len {
            return Err(ProgressionError::validation(
                "name",
                format!("must be at most {} characters", limits.max_name_len),
            ));
        }
        if !(limits.min_players..=limits.max_players).contains(&request.max_players) {
            return Err(ProgressionError::validation(
                "max_players",
                format!("must be between {} and {}", limits.min_players, limits.max_players),
            ));
        }
        if request.track.as_str().is_empty() {
            return Err(ProgressionError::validation("track", "must not be empty"));
        }
        let host = self.require_player(request.host).await?;
        if host.value.is_banned() {
            return Err(ProgressionError::PlayerBanned { player: request.host });
        }

        let now = SystemTime::now();
        let lobby = Lobby {
            id: LobbyId::new(),
            name: name.to_string(),
            host: request.host,
            max_players: request.max_players,
            current_players: 0,
            track: request.track,
            mode: request.mode,
            status: LobbyStatus::Waiting,
            is_private: request.is_private,
            settings: request.settings,
            created_at: now,
            updated_at: now,
        };
        bounded(self.timeout(), self.store.insert_lobby(lobby.clone())).await?;
        info!(lobby = %lobby.id, host = %lobby.host, track = %lobby.track, "Lobby created");
        Ok(lobby)
    }

    /// Move a lobby along its lifecycle.
    ///
    /// `in_progress` is only reachable through [`Self::start_race`], which
    /// creates the race in the same transaction. A lobby with a running race
    /// leaves `in_progress` when that race finishes or through
    /// [`Self::abandon_race`], never from here.
    pub async fn set_lobby_status(&self, lobby: LobbyId, status: LobbyStatus) -> Result<Lobby> {
        if status == LobbyStatus::InProgress {
            return Err(ProgressionError::validation("status", "use start_race to begin a race"));
        }
        for attempt in 1..=self.config.retry.max_attempts {
            let current = self.require_lobby(lobby).await?;
            let from = current.value.status;
            if from == status {
                return Ok(current.into_inner());
            }
            if from == LobbyStatus::InProgress || !from.can_transition_to(status) {
                return Err(ProgressionError::InvalidTransition { lobby, from, to: status });
            }

            let mut updated = current.value.clone();
            updated.status = status;
            updated.updated_at = SystemTime::now();
            let tx = Transaction::new()
                .with(Write::PutLobby { lobby: updated.clone(), expected: current.version });
            match bounded(self.timeout(), self.store.commit(tx)).await {
                Ok(()) => {
                    info!(lobby = %lobby, %from, to = %status, "Lobby status changed");
                    return Ok(updated);
                }
                Err(e) if e.is_version_conflict() => {
                    trace!(lobby = %lobby, attempt, "Lobby changed during transition, retrying");
                    tokio::time::sleep(self.config.retry.backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ProgressionError::ConcurrencyRetry {
            entity: "lobby",
            id: lobby.to_string(),
            attempts: self.config.retry.max_attempts,
        })
    }

    /// Start a race in `lobby`, expecting one result per seated player.
    ///
    /// The players seated at this point become the race's participants and
    /// are the only ones whose results [`Self::submit_results`] accepts.
    pub async fn start_race(
        &self,
        lobby: LobbyId,
        laps: u32,
        details: serde_json::Value,
    ) -> Result<Race> {
        if laps == 0 {
            return Err(ProgressionError::validation("laps", "must be at least 1"));
        }
        for attempt in 1..=self.config.retry.max_attempts {
            let current = self.require_lobby(lobby).await?;
            let from = current.value.status;
            if !from.can_transition_to(LobbyStatus::InProgress) {
                return Err(ProgressionError::InvalidTransition {
                    lobby,
                    from,
                    to: LobbyStatus::InProgress,
                });
            }
            // Seating changes bump the lobby version, so this roster is checked by the commit
            let participants: Vec<PlayerId> =
                bounded(self.timeout(), self.store.memberships(lobby))
                    .await?
                    .into_iter()
                    .map(|membership| membership.player)
                    .collect();
            if participants.is_empty() {
                return Err(ProgressionError::validation("lobby", "no players are seated"));
            }

            let now = SystemTime::now();
            let race = Race {
                id: RaceId::new(),
                lobby,
                track: current.value.track.clone(),
                mode: current.value.mode,
                laps,
                expected_racers: participants.len() as u32,
                participants,
                status: RaceStatus::InProgress,
                winner: None,
                started_at: now,
                finished_at: None,
                details: details.clone(),
            };
            let mut updated = current.value.clone();
            updated.status = LobbyStatus::InProgress;
            updated.updated_at = now;

            let tx = Transaction::new()
                .with(Write::PutLobby { lobby: updated, expected: current.version })
                .with(Write::InsertRace(race.clone()));
            match bounded(self.timeout(), self.store.commit(tx)).await {
                Ok(()) => {
                    info!(
                        lobby = %lobby,
                        race = %race.id,
                        racers = race.expected_racers,
                        "Race started"
                    );
                    return Ok(race);
                }
                Err(e) if e.is_version_conflict() => {
                    trace!(lobby = %lobby, attempt, "Lobby changed during race start, retrying");
                    tokio::time::sleep(self.config.retry.backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ProgressionError::ConcurrencyRetry {
            entity: "lobby",
            id: lobby.to_string(),
            attempts: self.config.retry.max_attempts,
        })
    }

    /// Mark an unfinished race as abandoned and cancel its lobby.
    ///
    /// Results already recorded stay folded into their players.
    pub async fn abandon_race(&self, race: RaceId) -> Result<Race> {
        for attempt in 1..=self.config.retry.max_attempts {
            let current = bounded(self.timeout(), self.store.race(race))
                .await?
                .ok_or_else(|| ProgressionError::dangling("race", race))?;
            if current.value.is_finalized() {
                return Err(ProgressionError::RaceFinalized { race, status: current.value.status });
            }

            let now = SystemTime::now();
            let mut abandoned = current.value.clone();
            abandoned.status = RaceStatus::Abandoned;
            abandoned.finished_at = Some(now);

            let mut tx = Transaction::new()
                .with(Write::PutRace { race: abandoned.clone(), expected: current.version });
            if let Some(lobby) = bounded(self.timeout(), self.store.lobby(abandoned.lobby)).await? {
                if lobby.value.status == LobbyStatus::InProgress {
                    let mut cancelled = lobby.value.clone();
                    cancelled.status = LobbyStatus::Cancelled;
                    cancelled.updated_at = now;
                    tx.push(Write::PutLobby { lobby: cancelled, expected: lobby.version });
                }
            }

            match bounded(self.timeout(), self.store.commit(tx)).await {
                Ok(()) => {
                    warn!(race = %race, lobby = %abandoned.lobby, "Race abandoned");
                    return Ok(abandoned);
                }
                Err(e) if e.is_version_conflict() => {
                    trace!(race = %race, attempt, "Race changed during abandon, retrying");
                    tokio::time::sleep(self.config.retry.backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ProgressionError::ConcurrencyRetry {
            entity: "race",
            id: race.to_string(),
            attempts: self.config.retry.max_attempts,
        })
    }

    /// Delete a lobby with its memberships, races and results.
    pub async fn delete_lobby(&self, lobby: LobbyId) -> Result<bool> {
        let removed = bounded(self.timeout(), self.store.delete_lobby(lobby)).await?;
        if removed {
            info!(lobby = %lobby, "Lobby deleted");
        }
        Ok(removed)
    }

    pub async fn join(
        &self,
        lobby: LobbyId,
        player: PlayerId,
        seat: SeatSelection,
    ) -> Result<Membership> {
        self.membership.join(lobby, player, seat).await
    }

    pub async fn leave(&self, lobby: LobbyId, player: PlayerId) -> Result<bool> {
        self.membership.leave(lobby, player).await
    }

    pub async fn set_ready(&self, lobby: LobbyId, player: PlayerId, ready: bool) -> Result<Membership> {
        self.membership.set_ready(lobby, player, ready).await
    }

    pub async fn members(&self, lobby: LobbyId) -> Result<Vec<Membership>> {
        self.membership.members(lobby).await
    }

    async fn require_lobby(&self, id: LobbyId) -> Result<Versioned<Lobby>> {
        bounded(self.timeout(), self.store.lobby(id))
            .await?
            .ok_or_else(|| ProgressionError::dangling("lobby", id))
    }

    // ----- Achievements -----

    /// Add or replace a catalog entry.
    pub async fn define_achievement(&self, achievement: Achievement) -> Result<()> {
        if achievement.name.trim().is_empty() {
            return Err(ProgressionError::validation("name", "must not be blank"));
        }
        debug!(achievement = %achievement.id, name = %achievement.name, "Achievement defined");
        bounded(self.timeout(), self.store.put_achievement(achievement)).await
    }

    /// Store progress or an unlock reported by the achievement evaluator.
    pub async fn record_achievement(&self, record: PlayerAchievement) -> Result<()> {
        if record.progress > 100 {
            return Err(ProgressionError::validation("progress", "must be between 0 and 100"));
        }
        self.require_player(record.player).await?;
        if bounded(self.timeout(), self.store.achievement(record.achievement)).await?.is_none() {
            return Err(ProgressionError::dangling("achievement", record.achievement));
        }
        if record.is_unlocked() {
            info!(player = %record.player, achievement = %record.achievement, "Achievement unlocked");
        }
        bounded(self.timeout(), self.store.put_player_achievement(record)).await
    }

    pub async fn achievements(&self, player: PlayerId) -> Result<Vec<PlayerAchievement>> {
        bounded(self.timeout(), self.store.player_achievements(player)).await
    }
}

/// Checks that need nothing but the batch itself.
fn check_batch(race: RaceId, results: &[RaceResult]) -> Vec<ResultFailure> {
    let mut seen = HashSet::with_capacity(results.len());
    let mut failures = Vec::new();
    for result in results {
        let error = if result.race != race {
            Some(ProgressionError::validation("race", format!("result belongs to race {}", result.race)))
        } else if !seen.insert(result.player) {
            Some(ProgressionError::DuplicateResult { race, player: result.player })
        } else if result.position == Some(0) {
            Some(ProgressionError::validation("position", "must be at least 1"))
        } else if result.finished && result.position.is_none() {
            Some(ProgressionError::validation("position", "finished results need a position"))
        } else if result.best_lap_time.is_some_and(|lap| lap.is_zero()) {
            Some(ProgressionError::validation("best_lap_time", "must be positive"))
        } else {
            None
        };
        if let Some(error) = error {
            failures.push(ResultFailure { player: result.player, error });
        }
    }
    failures
}

fn reject_all<F>(race: RaceId, results: &[RaceResult], error: F) -> ProgressionError
where
    F: Fn(&RaceResult) -> ProgressionError,
{
    let failures = results
        .iter()
        .map(|result| ResultFailure { player: result.player, error: error(result) })
        .collect();
    ProgressionError::BatchRejected { race, failures }
}

/// Pin a commit failure on the result that caused it.
///
/// Rows can change between the reads in `try_submit` and the commit. A
/// duplicate or a player that vanished in that window is reported against
/// its own result; a vanished race fails every result. Anything else is not
/// about a particular result and passes through.
fn attribute_commit_failure(
    race: RaceId,
    results: &[RaceResult],
    error: ProgressionError,
) -> ProgressionError {
    match error {
        ProgressionError::DuplicateResult { race, player } => ProgressionError::BatchRejected {
            race,
            failures: vec![ResultFailure {
                player,
                error: ProgressionError::DuplicateResult { race, player },
            }],
        },
        ProgressionError::DanglingReference { entity: "player", id } => {
            match results.iter().find(|result| result.player.to_string() == id) {
                Some(result) => ProgressionError::BatchRejected {
                    race,
                    failures: vec![ResultFailure {
                        player: result.player,
                        error: ProgressionError::DanglingReference { entity: "player", id },
                    }],
                },
                None => ProgressionError::DanglingReference { entity: "player", id },
            }
        }
        ProgressionError::DanglingReference { entity: "race", .. } => {
            reject_all(race, results, |_| ProgressionError::dangling("race", race))
        }
        other => other,
    }
}

fn validate_username(username: &str) -> Result<()> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
        return Err(ProgressionError::validation(
            "username",
            format!("must be {MIN_USERNAME_LEN} to {MAX_USERNAME_LEN} characters"),
        ));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(ProgressionError::validation(
            "username",
            "may only contain letters, digits, '_' and '-'",
        ));
    }
    Ok(())
}
