//! Folding race results into player progression

use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

use crate::config::{EngineConfig, RetryPolicy};
use crate::level::level;
use crate::store::{Store, Transaction, Write, bounded};
use crate::types::{Player, RaceResult};
use crate::{ProgressionError, Result};

/// Apply one race result to a player's counters.
///
/// Pure: returns the updated player and leaves the input untouched. The level
/// is recomputed from the new experience so the two can never disagree.
pub fn fold(player: &Player, result: &RaceResult, now: SystemTime) -> Player {
    let mut next = player.clone();
    next.total_races = next.total_races.saturating_add(1);
    if result.is_win() {
        next.total_wins = next.total_wins.saturating_add(1);
    } else if result.is_loss() {
        next.total_losses = next.total_losses.saturating_add(1);
    }
    if let Some(lap) = result.best_lap_time {
        if next.best_lap_time.is_none_or(|best| lap < best) {
            next.best_lap_time = Some(lap);
        }
    }
    next.total_points = next.total_points.saturating_add(result.points_earned);
    next.coins = next.coins.saturating_add(result.coins_earned);
    next.experience = next.experience.saturating_add(result.experience_earned);
    next.level = level(next.experience);
    next.updated_at = now;
    next
}

/// Serializes per-player folds through versioned writes.
pub struct StatsAggregator<S: Store> {
    store: Arc<S>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl<S: Store> StatsAggregator<S> {
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        Self { store, retry: config.retry, timeout: config.store_timeout() }
    }

    /// Fold a single result into its player in its own transaction.
    ///
    /// Lost races against concurrent folds for the same player are retried with
    /// backoff. A missing player is reported as a dangling reference and is
    /// never created.
    pub async fn fold_result(&self, result: &RaceResult) -> Result<Player> {
        for attempt in 1..=self.retry.max_attempts {
            let current = bounded(self.timeout, self.store.player(result.player))
                .await?
                .ok_or_else(|| ProgressionError::dangling("player", result.player))?;

            let updated = fold(&current.value, result, SystemTime::now());
            let tx = Transaction::new()
                .with(Write::PutPlayer { player: updated.clone(), expected: current.version });

            match bounded(self.timeout, self.store.commit(tx)).await {
                Ok(()) => {
                    debug!(
                        player = %updated.id,
                        races = updated.total_races,
                        level = updated.level,
                        "Folded race result"
                    );
                    return Ok(updated);
                }
                Err(e) if e.is_version_conflict() => {
                    trace!(player = %result.player, attempt, "Player changed during fold, retrying");
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ProgressionError::ConcurrencyRetry {
            entity: "player",
            id: result.player.to_string(),
            attempts: self.retry.max_attempts,
        })
    }
}
