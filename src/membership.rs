//! Lobby membership and occupancy tracking

use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace};

use crate::config::{EngineConfig, RetryPolicy};
use crate::store::{Store, Transaction, Write, bounded};
use crate::types::{LobbyId, Membership, PlayerId, SeatSelection};
use crate::{ProgressionError, Result};

/// Keeps each lobby's occupancy equal to its live membership count.
///
/// A membership row and the occupancy change it causes are written in the
/// same transaction, guarded by the lobby's version. Concurrent joins and
/// leaves on one lobby therefore serialize; a loser re-reads and re-checks
/// capacity before trying again.
pub struct MembershipTracker<S: Store> {
    store: Arc<S>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl<S: Store> MembershipTracker<S> {
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        Self { store, retry: config.retry, timeout: config.store_timeout() }
    }

    /// Seat `player` in `lobby`.
    ///
    /// Fails with [`ProgressionError::LobbyFull`] at capacity and with
    /// [`ProgressionError::DuplicateMembership`] if the player is already seated.
    pub async fn join(
        &self,
        lobby: LobbyId,
        player: PlayerId,
        seat: SeatSelection,
    ) -> Result<Membership> {
        for attempt in 1..=self.retry.max_attempts {
            let current = bounded(self.timeout, self.store.lobby(lobby))
                .await?
                .ok_or_else(|| ProgressionError::dangling("lobby", lobby))?;
            let member = bounded(self.timeout, self.store.player(player))
                .await?
                .ok_or_else(|| ProgressionError::dangling("player", player))?;

            if member.value.is_banned() {
                return Err(ProgressionError::PlayerBanned { player });
            }
            if current.value.status.is_terminal() {
                return Err(ProgressionError::LobbyClosed { lobby, status: current.value.status });
            }
            if bounded(self.timeout, self.store.membership(lobby, player)).await?.is_some() {
                return Err(ProgressionError::DuplicateMembership { lobby, player });
            }
            if current.value.is_full() {
                return Err(ProgressionError::LobbyFull {
                    lobby,
                    max_players: current.value.max_players,
                });
            }

            let now = SystemTime::now();
            let membership =
                Membership { lobby, player, car: seat.car.clone(), is_ready: false, joined_at: now };
            let mut updated = current.value.clone();
            updated.current_players += 1;
            updated.updated_at = now;

            let tx = Transaction::new()
                .with(Write::InsertMembership(membership.clone()))
                .with(Write::PutLobby { lobby: updated, expected: current.version });

            match bounded(self.timeout, self.store.commit(tx)).await {
                Ok(()) => {
                    info!(
                        lobby = %lobby,
                        player = %player,
                        occupancy = current.value.current_players + 1,
                        "Player joined lobby"
                    );
                    return Ok(membership);
                }
                Err(e) if e.is_version_conflict() => {
                    trace!(lobby = %lobby, attempt, "Lobby changed during join, retrying");
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ProgressionError::ConcurrencyRetry {
            entity: "lobby",
            id: lobby.to_string(),
            attempts: self.retry.max_attempts,
        })
    }

    /// Remove `player` from `lobby`.
    ///
    /// Returns `false` without writing anything when the player was not seated.
    pub async fn leave(&self, lobby: LobbyId, player: PlayerId) -> Result<bool> {
        for attempt in 1..=self.retry.max_attempts {
            if bounded(self.timeout, self.store.membership(lobby, player)).await?.is_none() {
                debug!(lobby = %lobby, player = %player, "Leave ignored, player not in lobby");
                return Ok(false);
            }
            let Some(current) = bounded(self.timeout, self.store.lobby(lobby)).await? else {
                return Ok(false);
            };

            let mut updated = current.value.clone();
            updated.current_players = updated.current_players.saturating_sub(1);
            updated.updated_at = SystemTime::now();

            let tx = Transaction::new()
                .with(Write::DeleteMembership { lobby, player })
                .with(Write::PutLobby { lobby: updated, expected: current.version });

            match bounded(self.timeout, self.store.commit(tx)).await {
                Ok(()) => {
                    info!(
                        lobby = %lobby,
                        player = %player,
                        occupancy = current.value.current_players.saturating_sub(1),
                        "Player left lobby"
                    );
                    return Ok(true);
                }
                Err(e) if e.is_version_conflict() => {
                    trace!(lobby = %lobby, attempt, "Lobby changed during leave, retrying");
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ProgressionError::ConcurrencyRetry {
            entity: "lobby",
            id: lobby.to_string(),
            attempts: self.retry.max_attempts,
        })
    }

    /// Mark a seated player as ready or not ready.
    pub async fn set_ready(&self, lobby: LobbyId, player: PlayerId, ready: bool) -> Result<Membership> {
        let mut membership = bounded(self.timeout, self.store.membership(lobby, player))
            .await?
            .ok_or_else(|| ProgressionError::dangling("membership", format!("{lobby}/{player}")))?;
        membership.is_ready = ready;
        let tx = Transaction::new().with(Write::UpdateMembership(membership.clone()));
        bounded(self.timeout, self.store.commit(tx)).await?;
        Ok(membership)
    }

    /// Everyone currently seated in `lobby`.
    pub async fn members(&self, lobby: LobbyId) -> Result<Vec<Membership>> {
        bounded(self.timeout, self.store.memberships(lobby)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::stores::MemoryStore;
    use crate::types::{CarId, GameMode, Lobby, LobbyStatus, Player, TrackId};

    async fn lobby_with_capacity(store: &MemoryStore, max_players: u8) -> Lobby {
        let host = Player::new(PlayerId::new(), format!("host-{}", PlayerId::new()));
        store.insert_player(host.clone()).await.unwrap();
        let now = SystemTime::now();
        let lobby = Lobby {
            id: LobbyId::new(),
            name: "Night race".to_string(),
            host: host.id,
            max_players,
            current_players: 0,
            track: TrackId::from("interlagos"),
            mode: GameMode::Race,
            status: LobbyStatus::Waiting,
            is_private: false,
            settings: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        };
        store.insert_lobby(lobby.clone()).await.unwrap();
        lobby
    }

    async fn new_player(store: &MemoryStore) -> PlayerId {
        let id = PlayerId::new();
        store.insert_player(Player::new(id, format!("p-{id}"))).await.unwrap();
        id
    }

    async fn occupancy(store: &MemoryStore, lobby: LobbyId) -> (u8, usize) {
        let stored = store.lobby(lobby).await.unwrap().unwrap().value.current_players;
        let members = store.memberships(lobby).await.unwrap().len();
        (stored, members)
    }

    #[tokio::test]
    async fn join_and_leave_track_occupancy() {
        let store = Arc::new(MemoryStore::new());
        let lobby = lobby_with_capacity(&store, 4).await;
        let tracker = MembershipTracker::new(Arc::clone(&store), &EngineConfig::default());
        let player = new_player(&store).await;

        let seat = SeatSelection { car: Some(CarId::from("f4")) };
        let membership = tracker.join(lobby.id, player, seat).await.unwrap();
        assert_eq!(membership.car, Some(CarId::from("f4")));
        assert!(!membership.is_ready);
        assert_eq!(occupancy(&store, lobby.id).await, (1, 1));

        let ready = tracker.set_ready(lobby.id, player, true).await.unwrap();
        assert!(ready.is_ready);
        assert!(tracker.members(lobby.id).await.unwrap()[0].is_ready);

        assert!(tracker.leave(lobby.id, player).await.unwrap());
        assert_eq!(occupancy(&store, lobby.id).await, (0, 0));

        // Second leave is a silent no-op
        assert!(!tracker.leave(lobby.id, player).await.unwrap());
        assert_eq!(occupancy(&store, lobby.id).await, (0, 0));
    }

    #[tokio::test]
    async fn join_rejects_duplicates_and_full_lobbies() {
        let store = Arc::new(MemoryStore::new());
        let lobby = lobby_with_capacity(&store, 2).await;
        let tracker = MembershipTracker::new(Arc::clone(&store), &EngineConfig::default());
        let first = new_player(&store).await;
        let second = new_player(&store).await;
        let third = new_player(&store).await;

        tracker.join(lobby.id, first, SeatSelection::default()).await.unwrap();
        let err = tracker.join(lobby.id, first, SeatSelection::default()).await.unwrap_err();
        assert!(matches!(err, ProgressionError::DuplicateMembership { .. }));

        tracker.join(lobby.id, second, SeatSelection::default()).await.unwrap();
        let err = tracker.join(lobby.id, third, SeatSelection::default()).await.unwrap_err();
        assert!(matches!(err, ProgressionError::LobbyFull { max_players: 2, .. }));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(occupancy(&store, lobby.id).await, (2, 2));
    }

    #[tokio::test]
    async fn join_rejects_unknown_and_banned_players() {
        let store = Arc::new(MemoryStore::new());
        let lobby = lobby_with_capacity(&store, 4).await;
        let tracker = MembershipTracker::new(Arc::clone(&store), &EngineConfig::default());

        let err = tracker.join(lobby.id, PlayerId::new(), SeatSelection::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DanglingReference);

        let err =
            tracker.join(LobbyId::new(), PlayerId::new(), SeatSelection::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DanglingReference);

        let mut banned = Player::new(PlayerId::new(), "banned");
        banned.moderation.is_banned = true;
        store.insert_player(banned.clone()).await.unwrap();
        let err = tracker.join(lobby.id, banned.id, SeatSelection::default()).await.unwrap_err();
        assert!(matches!(err, ProgressionError::PlayerBanned { .. }));
        assert_eq!(occupancy(&store, lobby.id).await, (0, 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_for_last_seat_admit_exactly_one() {
        let store = Arc::new(MemoryStore::with_latency(Duration::from_millis(2)));
        let lobby = lobby_with_capacity(&store, 3).await;
        let tracker = Arc::new(MembershipTracker::new(Arc::clone(&store), &EngineConfig::default()));

        for _ in 0..2 {
            let player = new_player(&store).await;
            tracker.join(lobby.id, player, SeatSelection::default()).await.unwrap();
        }

        let a = new_player(&store).await;
        let b = new_player(&store).await;
        let (ra, rb) = tokio::join!(
            {
                let tracker = Arc::clone(&tracker);
                async move { tracker.join(lobby.id, a, SeatSelection::default()).await }
            },
            {
                let tracker = Arc::clone(&tracker);
                async move { tracker.join(lobby.id, b, SeatSelection::default()).await }
            }
        );

        let outcomes = [ra, rb];
        let successes = outcomes.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        let failure = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(matches!(failure, ProgressionError::LobbyFull { .. }));
        assert_eq!(occupancy(&store, lobby.id).await, (3, 3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn occupancy_matches_members_under_churn() {
        let store = Arc::new(MemoryStore::with_latency(Duration::from_millis(1)));
        let lobby = lobby_with_capacity(&store, 8).await;
        let config = EngineConfig {
            retry: RetryPolicy { max_attempts: 128, initial_backoff_ms: 1, max_backoff_ms: 4 },
            ..EngineConfig::default()
        };
        let tracker = Arc::new(MembershipTracker::new(Arc::clone(&store), &config));

        let mut players = Vec::new();
        for _ in 0..12 {
            players.push(new_player(&store).await);
        }

        let mut handles = Vec::new();
        for (i, player) in players.iter().copied().enumerate() {
            let tracker = Arc::clone(&tracker);
            let lobby = lobby.id;
            handles.push(tokio::spawn(async move {
                let joined = tracker.join(lobby, player, SeatSelection::default()).await;
                if i % 2 == 0 && joined.is_ok() {
                    tracker.leave(lobby, player).await.unwrap();
                }
                joined.map(|_| ())
            }));
        }
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) | Err(ProgressionError::LobbyFull { .. }) => {}
                Err(other) => panic!("Unexpected join failure: {other}"),
            }
        }

        let (stored, members) = occupancy(&store, lobby.id).await;
        assert_eq!(stored as usize, members);
        assert!(stored <= 8);
    }

    #[tokio::test]
    async fn closed_lobbies_reject_joins() {
        let store = Arc::new(MemoryStore::new());
        let lobby = lobby_with_capacity(&store, 4).await;
        let mut cancelled = store.lobby(lobby.id).await.unwrap().unwrap();
        cancelled.value.status = LobbyStatus::Cancelled;
        store
            .commit(Transaction::new().with(Write::PutLobby {
                lobby: cancelled.value,
                expected: cancelled.version,
            }))
            .await
            .unwrap();

        let tracker = MembershipTracker::new(Arc::clone(&store), &EngineConfig::default());
        let player = new_player(&store).await;
        let err = tracker.join(lobby.id, player, SeatSelection::default()).await.unwrap_err();
        assert!(matches!(err, ProgressionError::LobbyClosed { status: LobbyStatus::Cancelled, .. }));
    }
}
