//! Background submission pipeline behaviour

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use paddock::{
    EngineConfig, ErrorKind, GameMode, LapTime, MemoryStore, NewLobby, PipelineConfig, PlayerId,
    ProgressionEngine, Race, RaceCompletion, RaceId, RaceResult, RaceStatus, SeatSelection,
    Store, SubmissionOutcome, SubmissionPipeline, TrackId,
};

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", &PlayerId::new().as_uuid().simple().to_string()[..8])
}

async fn seeded_race(
    engine: &ProgressionEngine<MemoryStore>,
    racers: usize,
) -> paddock::Result<(Race, Vec<PlayerId>)> {
    let host = engine.register_player(PlayerId::new(), &unique("host")).await?;
    let lobby = engine
        .create_lobby(NewLobby {
            name: "Pipeline heat".to_string(),
            host: host.id,
            max_players: 8,
            track: TrackId::from("silverstone"),
            mode: GameMode::Race,
            is_private: false,
            settings: serde_json::Value::Null,
        })
        .await?;
    let mut players = Vec::new();
    for _ in 0..racers {
        let player = engine.register_player(PlayerId::new(), &unique("racer")).await?;
        engine.join(lobby.id, player.id, SeatSelection::default()).await?;
        players.push(player.id);
    }
    let race = engine.start_race(lobby.id, 2, serde_json::Value::Null).await?;
    Ok((race, players))
}

fn finishing_order(race: RaceId, players: &[PlayerId]) -> Vec<RaceResult> {
    players
        .iter()
        .enumerate()
        .map(|(i, player)| {
            let mut result = RaceResult::new(race, *player);
            result.position = Some(i as u32 + 1);
            result.finished = true;
            result.laps_completed = 2;
            result.best_lap_time = Some(LapTime::from_millis(90_000 + i as u32 * 500));
            result.experience_earned = 60;
            result
        })
        .collect()
}

fn fast_retry_config() -> EngineConfig {
    EngineConfig {
        pipeline: PipelineConfig {
            max_attempts: 4,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            ..PipelineConfig::default()
        },
        ..EngineConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_failure_is_retried_to_success() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(ProgressionEngine::new(Arc::clone(&store), fast_retry_config()).unwrap());
    let (race, players) = seeded_race(&engine, 3).await.unwrap();

    let pipeline = SubmissionPipeline::spawn(Arc::clone(&engine));
    let mut outcomes = Box::pin(pipeline.outcomes());

    store.fail_next_commits(1);
    pipeline
        .submit(RaceCompletion { race: race.id, results: finishing_order(race.id, &players) })
        .await
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), outcomes.next())
        .await
        .expect("pipeline produced no outcome")
        .expect("outcome stream ended");
    match outcome {
        SubmissionOutcome::Applied { ack, attempts } => {
            assert_eq!(attempts, 2);
            assert_eq!(ack.race_status, RaceStatus::Finished);
            assert_eq!(ack.winner, Some(players[0]));
        }
        other => panic!("Expected applied outcome, got {other:?}"),
    }

    let stored = store.player(players[1]).await.unwrap().unwrap().value;
    assert_eq!(stored.total_races, 1);
    assert_eq!(stored.total_losses, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn persistent_failure_gives_up_after_max_attempts() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(ProgressionEngine::new(Arc::clone(&store), fast_retry_config()).unwrap());
    let (race, players) = seeded_race(&engine, 2).await.unwrap();

    let pipeline = SubmissionPipeline::spawn(Arc::clone(&engine));
    let mut outcomes = Box::pin(pipeline.outcomes());

    store.fail_next_commits(100);
    pipeline
        .submit(RaceCompletion { race: race.id, results: finishing_order(race.id, &players) })
        .await
        .unwrap();

    match outcomes.next().await {
        Some(SubmissionOutcome::Rejected { kind, attempts, .. }) => {
            assert_eq!(kind, ErrorKind::TransientStore);
            assert_eq!(attempts, 4);
        }
        other => panic!("Expected rejected outcome, got {other:?}"),
    }
    assert!(store.results(race.id).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_races_are_processed_concurrently() {
    let store = Arc::new(MemoryStore::with_latency(Duration::from_micros(100)));
    let engine = Arc::new(ProgressionEngine::new(Arc::clone(&store), fast_retry_config()).unwrap());

    let mut races = Vec::new();
    for _ in 0..6 {
        races.push(seeded_race(&engine, 3).await.unwrap());
    }

    let pipeline = SubmissionPipeline::spawn(Arc::clone(&engine));
    let outcomes = pipeline.outcomes();
    for (race, players) in &races {
        pipeline
            .submit(RaceCompletion { race: race.id, results: finishing_order(race.id, players) })
            .await
            .unwrap();
    }

    let collected: Vec<SubmissionOutcome> =
        tokio::time::timeout(Duration::from_secs(10), outcomes.take(races.len()).collect())
            .await
            .expect("pipeline stalled");
    assert!(collected.iter().all(SubmissionOutcome::is_applied));

    let recent = engine.recent_races(10).await.unwrap();
    assert_eq!(recent.len(), races.len());

    pipeline.shutdown();
    assert!(
        pipeline
            .submit(RaceCompletion { race: races[0].0.id, results: Vec::new() })
            .await
            .is_err()
    );
}
