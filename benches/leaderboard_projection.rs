//! Benchmarks for read-time rank projection
//!
//! Ranks are computed on every leaderboard read, so sorting cost is what a
//! busy track pays per request. Covers:
//! - Track leaderboards of increasing size
//! - Global ranking by total points

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use paddock::ranking::{rank_entries, rank_players};
use paddock::test_utils::{leaderboard_entries, players};
use paddock::{GameMode, PlayerId, TrackId};
use std::collections::HashMap;
use std::hint::black_box;

fn bench_track_ranking(c: &mut Criterion) {
    let track = TrackId::from("spa");
    let mut group = c.benchmark_group("track_ranking");

    for size in [100usize, 1_000, 10_000] {
        let entries = leaderboard_entries(size, &track, GameMode::Race);
        let usernames: HashMap<PlayerId, String> =
            entries.iter().enumerate().map(|(i, e)| (e.player, format!("driver{i}"))).collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &entries, |b, entries| {
            b.iter(|| black_box(rank_entries(black_box(entries.clone()), &usernames)))
        });
    }

    group.finish();
}

fn bench_global_ranking(c: &mut Criterion) {
    let mut group = c.benchmark_group("global_ranking");

    for size in [1_000usize, 10_000] {
        let roster = players(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &roster, |b, roster| {
            b.iter(|| black_box(rank_players(black_box(roster.clone()))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_track_ranking, bench_global_ranking);
criterion_main!(benches);
