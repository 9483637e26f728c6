//! Fixtures shared by unit tests and benchmarks
//!
//! Builders here produce deterministic data so benchmark runs are comparable
//! between machines.

#![cfg(any(test, feature = "benchmark"))]

use std::time::{Duration, SystemTime};

use crate::engine::ProgressionEngine;
use crate::store::Store;
use crate::types::{
    GameMode, LapTime, LeaderboardEntry, NewLobby, Player, PlayerId, Race, RaceId, RaceResult,
    SeatSelection, TrackId,
};
use crate::Result;

/// Laps raced by fixtures built with [`seeded_race`].
pub const FIXTURE_LAPS: u32 = 3;

/// `count` leaderboard entries on one board with spread-out, partly tied times.
pub fn leaderboard_entries(count: usize, track: &TrackId, mode: GameMode) -> Vec<LeaderboardEntry> {
    (0..count)
        .map(|i| LeaderboardEntry {
            player: PlayerId::new(),
            track: track.clone(),
            mode,
            best_time: LapTime::from_millis(60_000 + ((i as u32).wrapping_mul(7_919) % 20_000)),
            car: None,
            replay: None,
            achieved_at: SystemTime::UNIX_EPOCH + Duration::from_secs(i as u64),
        })
        .collect()
}

/// `count` players with varied point totals.
pub fn players(count: usize) -> Vec<Player> {
    (0..count)
        .map(|i| {
            let mut player = Player::new(PlayerId::new(), format!("driver{i:05}"));
            player.total_points = (i as u64).wrapping_mul(104_729) % 10_000;
            player
        })
        .collect()
}

/// Register `racers` players, seat them in a fresh lobby and start a race.
pub async fn seeded_race<S: Store>(
    engine: &ProgressionEngine<S>,
    racers: u8,
) -> Result<(Race, Vec<PlayerId>)> {
    let host = engine.register_player(PlayerId::new(), &unique_name("host")).await?;
    let lobby = engine
        .create_lobby(NewLobby {
            name: "Fixture lobby".to_string(),
            host: host.id,
            max_players: racers.max(engine.config().lobby.min_players),
            track: TrackId::from("fixture-ring"),
            mode: GameMode::Race,
            is_private: false,
            settings: serde_json::Value::Null,
        })
        .await?;

    let mut seated = Vec::with_capacity(usize::from(racers));
    for _ in 0..racers {
        let player = engine.register_player(PlayerId::new(), &unique_name("racer")).await?;
        engine.join(lobby.id, player.id, SeatSelection::default()).await?;
        seated.push(player.id);
    }
    let race = engine.start_race(lobby.id, FIXTURE_LAPS, serde_json::Value::Null).await?;
    Ok((race, seated))
}

/// Results for `players` finishing in the given order, first place first.
pub fn finishing_order(race: RaceId, players: &[PlayerId]) -> Vec<RaceResult> {
    players
        .iter()
        .enumerate()
        .map(|(i, player)| {
            let position = i as u32 + 1;
            let mut result = RaceResult::new(race, *player);
            result.position = Some(position);
            result.finished = true;
            result.laps_completed = FIXTURE_LAPS;
            result.finish_time = Some(Duration::from_secs(180 + u64::from(position)));
            result.best_lap_time = Some(LapTime::from_millis(59_000 + position * 250));
            result.points_earned = u64::from(25u32.saturating_sub(position * 3));
            result.coins_earned = 50;
            result.experience_earned = 120;
            result
        })
        .collect()
}

fn unique_name(prefix: &str) -> String {
    // Simple hex suffix keeps names within the username alphabet
    format!("{prefix}-{}", &PlayerId::new().as_uuid().simple().to_string()[..12])
}
