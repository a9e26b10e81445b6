//! # playbias Performance Benchmarks
//!
//! ## Benchmark Categories
//!
//! - **Track Sets**: Set algebra over large universes
//! - **Partition Matching**: Slot assignment of a PartBias
//! - **Generation**: Filling whole playlists with the solver
//! - **Database Queries**: SQLite lookups behind the matching biases
//!
//! ## Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Run specific benchmark group
//! cargo bench track_sets
//! cargo bench generation
//! ```

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use playbias::backend::{MemoryBackend, Query};
use playbias::bias::{
    Bias, BiasPtr, Condition, GroupBias, MetaFilter, PartBias, RandomBias, TagMatchBias, UniqueBias,
};
use playbias::db;
use playbias::solver::BiasSolver;
use playbias::track::{Field, Track, TrackPtr};
use playbias::track_set::{TrackCollection, TrackSet};
use std::hint::black_box;
use tempfile::TempDir;

const GENRES: [&str; 4] = ["Rock", "Jazz", "Pop", "Folk"];

/// Helper function to create a library with realistic metadata
fn create_library(count: usize) -> Vec<Track> {
    (0..count)
        .map(|i| {
            Track::new(format!("track-{i:06}"))
                .with_title(format!("Song {i}"))
                .with_artist(format!("Artist {}", i % 97))
                .with_album(format!("Album {}", i / 12), (i % 12) as i64 + 1)
                .with_genre(GENRES[i % GENRES.len()])
                .with_year(1960 + (i % 60) as i64)
        })
        .collect()
}

fn create_tracks(count: usize) -> Vec<TrackPtr> {
    create_library(count).into_iter().map(Track::into_ptr).collect()
}

fn genre(backend: &std::sync::Arc<MemoryBackend>, name: &str) -> BiasPtr {
    TagMatchBias::new(
        backend.clone(),
        MetaFilter::text(Field::Genre, Condition::Equals, name),
    )
}

/// Benchmark the set algebra
fn benchmark_track_sets(c: &mut Criterion) {
    let mut group = c.benchmark_group("track_sets");

    for size in [1_000, 10_000, 100_000] {
        let universe = TrackCollection::new(create_tracks(size));
        let mut even = TrackSet::new(&universe, false);
        even.unite_uids(universe.uids().step_by(2).map(str::to_string).collect::<Vec<_>>());
        let mut thirds = TrackSet::new(&universe, false);
        thirds.unite_uids(universe.uids().step_by(3).map(str::to_string).collect::<Vec<_>>());

        group.bench_with_input(BenchmarkId::new("intersect", size), &size, |b, _| {
            b.iter(|| {
                let mut set = even.clone();
                set.intersect(black_box(&thirds));
                black_box(set.track_count())
            })
        });

        group.bench_with_input(BenchmarkId::new("unite_uids", size), &size, |b, _| {
            let uids: Vec<String> = universe.uids().take(500).map(str::to_string).collect();
            b.iter(|| {
                let mut set = TrackSet::new(&universe, false);
                set.unite_uids(black_box(&uids));
                black_box(set)
            })
        });
    }

    group.finish();
}

/// Benchmark partition matching on filled playlists
fn benchmark_partition(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition_matching");

    let tracks = create_tracks(2_000);
    let backend = MemoryBackend::new(tracks.clone());
    let part = PartBias::from_parts(
        0.1,
        vec![
            (genre(&backend, "Rock"), 0.3),
            (genre(&backend, "Jazz"), 0.3),
            (GroupBias::not(vec![genre(&backend, "Pop")]), 0.3),
        ],
    );
    let universe = TrackCollection::new(tracks.clone());
    // warm the lookup caches
    for child in playbias::bias::CompositeBias::biases(part.as_ref()) {
        let _ = child.matching_tracks(&[], 0, 1, &universe);
    }

    for length in [10, 50, 200] {
        let playlist = tracks[..length].to_vec();
        group.bench_with_input(BenchmarkId::new("energy", length), &playlist, |b, playlist| {
            b.iter(|| black_box(part.energy(black_box(playlist), 0)))
        });
    }

    group.finish();
}

/// Benchmark whole playlist generation
fn benchmark_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("generation");
    group.sample_size(20);

    let tracks = create_tracks(5_000);
    let universe = TrackCollection::new(tracks.clone());
    let backend = MemoryBackend::new(tracks);

    group.bench_function("random_unique_30", |b| {
        b.iter_batched(
            || GroupBias::and(vec![RandomBias::new(), UniqueBias::new()]),
            |root| black_box(BiasSolver::new(root, universe.clone()).solve(30)),
            BatchSize::SmallInput,
        )
    });

    group.bench_function("partition_30", |b| {
        b.iter_batched(
            || -> BiasPtr {
                GroupBias::and(vec![
                    UniqueBias::new(),
                    PartBias::from_parts(
                        0.5,
                        vec![(genre(&backend, "Rock"), 0.25), (genre(&backend, "Folk"), 0.25)],
                    ),
                ])
            },
            |root| black_box(BiasSolver::new(root, universe.clone()).solve(30)),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

/// Benchmark the SQLite lookups
fn benchmark_database_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("database_queries");

    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("bench_library.db");
    let mut conn = db::open(&db_path).expect("Failed to open database");
    db::import_tracks(&mut conn, &create_library(10_000)).expect("Failed to import tracks");

    group.bench_function("genre_equals", |b| {
        let query = Query::equals(Field::Genre, "Jazz");
        b.iter(|| black_box(db::find_uids(&conn, black_box(&query)).expect("query failed")))
    });

    group.bench_function("artist_or_title_contains", |b| {
        let query = Query::Or(vec![
            Query::contains(Field::Artist, "Artist 4"),
            Query::contains(Field::Title, "Song 99"),
        ]);
        b.iter(|| black_box(db::find_uids(&conn, black_box(&query)).expect("query failed")))
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_track_sets,
    benchmark_partition,
    benchmark_generation,
    benchmark_database_queries
);
criterion_main!(benches);
