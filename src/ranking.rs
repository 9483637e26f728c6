//! Personal-best leaderboards and rank projections
//!
//! Ranks are never stored. Every view sorts the current entries and assigns
//! ordinal ranks, so a rank can't go stale when someone else improves.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

use crate::config::{EngineConfig, RetryPolicy};
use crate::store::{Store, Transaction, Versioned, Write, bounded};
use crate::types::{
    GameMode, LeaderboardEntry, Player, PlayerId, RaceResult, RankedEntry, RankedPlayer, TrackId,
    TrackLeaderboard,
};
use crate::{ProgressionError, Result};

/// Order track entries by best time, then earlier achievement, then player.
pub fn rank_entries(
    mut entries: Vec<LeaderboardEntry>,
    usernames: &HashMap<PlayerId, String>,
) -> Vec<RankedEntry> {
    entries.sort_by(|a, b| {
        a.best_time
            .cmp(&b.best_time)
            .then_with(|| a.achieved_at.cmp(&b.achieved_at))
            .then_with(|| a.player.cmp(&b.player))
    });
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| RankedEntry {
            rank: index as u32 + 1,
            player: entry.player,
            username: usernames.get(&entry.player).cloned(),
            best_time: entry.best_time,
            car: entry.car,
            achieved_at: entry.achieved_at,
        })
        .collect()
}

/// Order players by total points, highest first, ties by player id.
pub fn rank_players(mut players: Vec<Player>) -> Vec<RankedPlayer> {
    players.sort_by(|a, b| b.total_points.cmp(&a.total_points).then_with(|| a.id.cmp(&b.id)));
    players
        .into_iter()
        .enumerate()
        .map(|(index, player)| RankedPlayer {
            rank: index as u32 + 1,
            player: player.id,
            username: player.username,
            total_points: player.total_points,
            level: player.level,
        })
        .collect()
}

/// Maintains one best-time entry per player, track and mode.
pub struct LeaderboardRanker<S: Store> {
    store: Arc<S>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl<S: Store> LeaderboardRanker<S> {
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        Self { store, retry: config.retry, timeout: config.store_timeout() }
    }

    /// Build the write that records `result` as a personal best, if it is one.
    ///
    /// Returns `None` when the result carries no lap time or does not strictly
    /// beat the existing entry; an equal time keeps the earlier record.
    pub fn plan(
        existing: Option<&Versioned<LeaderboardEntry>>,
        result: &RaceResult,
        track: &TrackId,
        mode: GameMode,
        now: SystemTime,
    ) -> Option<Write> {
        if !result.is_qualifying() {
            return None;
        }
        let time = result.best_lap_time?;
        if existing.is_some_and(|current| time >= current.value.best_time) {
            return None;
        }
        let entry = LeaderboardEntry {
            player: result.player,
            track: track.clone(),
            mode,
            best_time: time,
            car: result.car.clone(),
            replay: result.replay.clone(),
            achieved_at: now,
        };
        Some(Write::PutLeaderboardEntry { entry, expected: existing.map(|current| current.version) })
    }

    /// Record a result against the leaderboard in its own transaction.
    ///
    /// Returns whether the result became the player's new best.
    pub async fn record(&self, result: &RaceResult, track: &TrackId, mode: GameMode) -> Result<bool> {
        if !result.is_qualifying() {
            return Ok(false);
        }
        for attempt in 1..=self.retry.max_attempts {
            let existing =
                bounded(self.timeout, self.store.leaderboard_entry(result.player, track, mode))
                    .await?;
            let Some(write) =
                Self::plan(existing.as_ref(), result, track, mode, SystemTime::now())
            else {
                return Ok(false);
            };

            match bounded(self.timeout, self.store.commit(Transaction::new().with(write))).await {
                Ok(()) => {
                    debug!(player = %result.player, %track, %mode, "New personal best");
                    return Ok(true);
                }
                Err(e) if e.is_version_conflict() => {
                    trace!(player = %result.player, attempt, "Leaderboard entry changed, retrying");
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ProgressionError::ConcurrencyRetry {
            entity: "leaderboard entry",
            id: format!("{}/{}/{}", result.player, track, mode),
            attempts: self.retry.max_attempts,
        })
    }

    /// Ranked leaderboard for one track and mode, optionally truncated.
    pub async fn track_leaderboard(
        &self,
        track: &TrackId,
        mode: GameMode,
        limit: Option<usize>,
    ) -> Result<TrackLeaderboard> {
        let entries = bounded(self.timeout, self.store.leaderboard(track, mode)).await?;
        let players = bounded(self.timeout, self.store.players()).await?;
        let usernames: HashMap<PlayerId, String> =
            players.into_iter().map(|p| (p.id, p.username)).collect();

        let mut ranked = rank_entries(entries, &usernames);
        if let Some(limit) = limit {
            ranked.truncate(limit);
        }
        Ok(TrackLeaderboard { track: track.clone(), mode, entries: ranked })
    }

    /// All players ranked by total points.
    pub async fn global_ranking(&self) -> Result<Vec<RankedPlayer>> {
        let players = bounded(self.timeout, self.store.players()).await?;
        Ok(rank_players(players))
    }

    /// One player's position in the global ranking.
    pub async fn global_rank(&self, player: PlayerId) -> Result<Option<u32>> {
        let ranking = self.global_ranking().await?;
        Ok(ranking.iter().find(|row| row.player == player).map(|row| row.rank))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::types::{CarId, LapTime, RaceId};
    use proptest::prelude::*;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn entry(player: PlayerId, millis: u32, achieved: u64) -> LeaderboardEntry {
        LeaderboardEntry {
            player,
            track: TrackId::from("spa"),
            mode: GameMode::TimeTrial,
            best_time: LapTime::from_millis(millis),
            car: None,
            replay: None,
            achieved_at: at(achieved),
        }
    }

    fn lap_result(player: PlayerId, millis: u32) -> RaceResult {
        let mut result = RaceResult::new(RaceId::new(), player);
        result.best_lap_time = Some(LapTime::from_millis(millis));
        result.car = Some(CarId::from("gt3"));
        result
    }

    #[test]
    fn ties_rank_earlier_achievement_first() {
        let early = PlayerId::new();
        let late = PlayerId::new();
        let fastest = PlayerId::new();
        let entries =
            vec![entry(late, 90_000, 200), entry(early, 90_000, 100), entry(fastest, 88_000, 300)];

        let ranked = rank_entries(entries, &HashMap::new());
        let order: Vec<(u32, PlayerId)> = ranked.iter().map(|r| (r.rank, r.player)).collect();
        assert_eq!(order, vec![(1, fastest), (2, early), (3, late)]);
    }

    #[test]
    fn global_ranking_breaks_ties_by_id() {
        let mut a = Player::new(PlayerId::new(), "a");
        let mut b = Player::new(PlayerId::new(), "b");
        let mut c = Player::new(PlayerId::new(), "c");
        a.total_points = 50;
        b.total_points = 50;
        c.total_points = 80;

        let first = rank_players(vec![a.clone(), b.clone(), c.clone()]);
        let second = rank_players(vec![b.clone(), c.clone(), a.clone()]);
        assert_eq!(first, second);
        assert_eq!(first[0].player, c.id);
        let tied_first = if a.id < b.id { a.id } else { b.id };
        assert_eq!(first[1].player, tied_first);
        assert_eq!(first[2].rank, 3);
    }

    #[test]
    fn plan_only_replaces_strictly_faster_times() {
        let player = PlayerId::new();
        let track = TrackId::from("spa");
        let existing = Versioned::new(entry(player, 90_000, 100), 3);

        let equal = lap_result(player, 90_000);
        assert!(LeaderboardRanker::<MemoryStore>::plan(
            Some(&existing),
            &equal,
            &track,
            GameMode::TimeTrial,
            at(500)
        )
        .is_none());

        let faster = lap_result(player, 89_999);
        match LeaderboardRanker::<MemoryStore>::plan(
            Some(&existing),
            &faster,
            &track,
            GameMode::TimeTrial,
            at(500),
        ) {
            Some(Write::PutLeaderboardEntry { entry, expected }) => {
                assert_eq!(expected, Some(3));
                assert_eq!(entry.best_time, LapTime::from_millis(89_999));
                assert_eq!(entry.car, Some(CarId::from("gt3")));
                assert_eq!(entry.achieved_at, at(500));
            }
            other => panic!("Expected leaderboard write, got {other:?}"),
        }

        let no_time = RaceResult::new(RaceId::new(), player);
        assert!(
            LeaderboardRanker::<MemoryStore>::plan(None, &no_time, &track, GameMode::Race, at(1))
                .is_none()
        );
    }

    #[tokio::test]
    async fn record_creates_then_improves() {
        let store = Arc::new(MemoryStore::new());
        let player = Player::new(PlayerId::new(), "hotlap");
        store.insert_player(player.clone()).await.unwrap();
        let ranker = LeaderboardRanker::new(Arc::clone(&store), &EngineConfig::default());
        let track = TrackId::from("suzuka");

        assert!(ranker.record(&lap_result(player.id, 95_000), &track, GameMode::Race).await.unwrap());
        assert!(!ranker.record(&lap_result(player.id, 96_000), &track, GameMode::Race).await.unwrap());
        assert!(!ranker.record(&lap_result(player.id, 95_000), &track, GameMode::Race).await.unwrap());
        assert!(ranker.record(&lap_result(player.id, 94_500), &track, GameMode::Race).await.unwrap());

        // Same track in another mode is a separate board
        assert!(ranker.record(&lap_result(player.id, 99_000), &track, GameMode::Drift).await.unwrap());

        let board = ranker.track_leaderboard(&track, GameMode::Race, None).await.unwrap();
        assert_eq!(board.entries.len(), 1);
        assert_eq!(board.entries[0].best_time, LapTime::from_millis(94_500));
        assert_eq!(board.entries[0].username.as_deref(), Some("hotlap"));
    }

    #[tokio::test]
    async fn track_leaderboard_respects_limit() {
        let store = Arc::new(MemoryStore::new());
        let ranker = LeaderboardRanker::new(Arc::clone(&store), &EngineConfig::default());
        let track = TrackId::from("imola");

        for (i, millis) in [91_000u32, 89_000, 93_000, 90_000].into_iter().enumerate() {
            let player = Player::new(PlayerId::new(), format!("driver{i}"));
            store.insert_player(player.clone()).await.unwrap();
            ranker.record(&lap_result(player.id, millis), &track, GameMode::Race).await.unwrap();
        }

        let board = ranker.track_leaderboard(&track, GameMode::Race, Some(2)).await.unwrap();
        let times: Vec<u32> = board.entries.iter().map(|e| e.best_time.as_millis()).collect();
        assert_eq!(times, vec![89_000, 90_000]);
        assert_eq!(board.entries[1].rank, 2);
    }

    proptest! {
        #[test]
        fn ranks_are_gap_free_and_ordered(
            rows in prop::collection::vec((1u32..5_000u32, 0u64..50u64), 0..60)
        ) {
            let entries: Vec<LeaderboardEntry> = rows
                .iter()
                .map(|(millis, achieved)| entry(PlayerId::new(), *millis, *achieved))
                .collect();
            let n = entries.len();
            let ranked = rank_entries(entries, &HashMap::new());

            let ranks: Vec<u32> = ranked.iter().map(|r| r.rank).collect();
            let expected: Vec<u32> = (1..=n as u32).collect();
            prop_assert_eq!(ranks, expected);

            for pair in ranked.windows(2) {
                prop_assert!(pair[0].best_time <= pair[1].best_time);
                if pair[0].best_time == pair[1].best_time {
                    prop_assert!(pair[0].achieved_at <= pair[1].achieved_at);
                }
            }
        }
    }
}
