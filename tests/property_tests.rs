//! Laws of the track set algebra and of the group biases built on it.

use playbias::backend::MemoryBackend;
use playbias::bias::{Bias, BiasPtr, Condition, GroupBias, MetaFilter, TagMatchBias, UniqueBias};
use playbias::track::{Field, Track, TrackPtr};
use playbias::track_set::{TrackCollection, TrackCollectionPtr, TrackSet};
use proptest::prelude::*;

const GENRES: [&str; 3] = ["Rock", "Jazz", "Pop"];

fn collection(size: usize) -> TrackCollectionPtr {
    TrackCollection::new((0..size).map(|i| Track::new(format!("U{i}")).into_ptr()))
}

fn subset(universe: &TrackCollectionPtr, members: &[bool]) -> TrackSet {
    let mut set = TrackSet::new(universe, false);
    set.unite_uids(
        members
            .iter()
            .enumerate()
            .filter(|(_, member)| **member)
            .map(|(i, _)| format!("U{i}")),
    );
    set
}

fn uids(set: &TrackSet) -> Vec<String> {
    set.uids().map(str::to_string).collect()
}

/// A universe with up to 150 tracks and three subsets of it.
fn three_subsets() -> impl Strategy<Value = (usize, Vec<bool>, Vec<bool>, Vec<bool>)> {
    (1usize..150).prop_flat_map(|size| {
        (
            Just(size),
            prop::collection::vec(any::<bool>(), size),
            prop::collection::vec(any::<bool>(), size),
            prop::collection::vec(any::<bool>(), size),
        )
    })
}

fn genre_library(genres: &[usize]) -> Vec<TrackPtr> {
    genres
        .iter()
        .enumerate()
        .map(|(i, genre)| {
            Track::new(format!("U{i}"))
                .with_genre(GENRES[*genre])
                .into_ptr()
        })
        .collect()
}

fn genre_bias(backend: &std::sync::Arc<MemoryBackend>, name: &str) -> BiasPtr {
    TagMatchBias::new(
        backend.clone(),
        MetaFilter::text(Field::Genre, Condition::Equals, name),
    )
}

proptest! {
    #[test]
    fn intersect_with_full_is_identity((size, a, _, _) in three_subsets()) {
        let universe = collection(size);
        let a = subset(&universe, &a);
        let mut result = a.clone();
        result.intersect(&TrackSet::new(&universe, true));
        prop_assert_eq!(uids(&result), uids(&a));
    }

    #[test]
    fn subtract_is_idempotent((size, a, b, _) in three_subsets()) {
        let universe = collection(size);
        let (a, b) = (subset(&universe, &a), subset(&universe, &b));
        let mut once = a.clone();
        once.subtract(&b);
        let mut twice = once.clone();
        twice.subtract(&b);
        prop_assert_eq!(uids(&twice), uids(&once));
    }

    #[test]
    fn unite_is_commutative_and_associative((size, a, b, c) in three_subsets()) {
        let universe = collection(size);
        let (a, b, c) = (subset(&universe, &a), subset(&universe, &b), subset(&universe, &c));

        let mut ab = a.clone();
        ab.unite(&b);
        let mut ba = b.clone();
        ba.unite(&a);
        prop_assert_eq!(uids(&ab), uids(&ba));

        let mut left = ab;
        left.unite(&c);
        let mut bc = b.clone();
        bc.unite(&c);
        let mut right = a.clone();
        right.unite(&bc);
        prop_assert_eq!(uids(&left), uids(&right));
    }

    #[test]
    fn track_count_matches_members((size, a, _, _) in three_subsets()) {
        let universe = collection(size);
        let set = subset(&universe, &a);
        prop_assert_eq!(set.track_count(), a.iter().filter(|member| **member).count());
        prop_assert_eq!(set.is_full(), a.iter().all(|member| *member));
        prop_assert_eq!(set.is_empty(), !a.iter().any(|member| *member));
    }

    #[test]
    fn groups_combine_like_their_set_operations(
        genres in prop::collection::vec(0usize..3, 1..60),
        played in 0usize..10,
    ) {
        let tracks = genre_library(&genres);
        let universe = TrackCollection::new(tracks.clone());
        let backend = MemoryBackend::new(tracks.clone());
        let rock = genre_bias(&backend, "Rock");
        let jazz = genre_bias(&backend, "Jazz");
        let unique: BiasPtr = UniqueBias::new();
        let playlist = &tracks[..played.min(tracks.len())];
        let context = playlist.len();
        let ask = |bias: &BiasPtr| bias.matching_tracks(playlist, context, context + 1, &universe);

        let mut expected = ask(&rock);
        expected.intersect(&ask(&unique));
        let and: BiasPtr = GroupBias::and(vec![rock.clone(), unique.clone()]);
        prop_assert_eq!(uids(&ask(&and)), uids(&expected));

        let mut expected = ask(&rock);
        expected.unite(&ask(&jazz));
        let or: BiasPtr = GroupBias::or(vec![rock.clone(), jazz.clone()]);
        prop_assert_eq!(uids(&ask(&or)), uids(&expected));

        let mut expected = TrackSet::new(&universe, true);
        expected.subtract(&ask(&rock));
        expected.subtract(&ask(&jazz));
        let not: BiasPtr = GroupBias::not(vec![rock, jazz]);
        prop_assert_eq!(uids(&ask(&not)), uids(&expected));
    }
}
