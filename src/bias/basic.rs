//! Biases that need no configuration.

use super::{Bias, BiasId, Fragment, Notifier};
use crate::track::TrackPtr;
use crate::track_set::{TrackCollectionPtr, TrackSet};
use std::sync::Arc;

/// Accepts everything.
#[derive(Default)]
pub struct RandomBias {
    id: BiasId,
    notifier: Notifier,
}

impl RandomBias {
    pub const NAME: &'static str = "randomBias";

    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Bias for RandomBias {
    fn id(&self) -> BiasId {
        self.id
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn describe(&self) -> String {
        "Random songs".to_string()
    }

    fn to_fragment(&self) -> Fragment {
        Fragment::new(Self::NAME)
    }

    fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn matching_tracks(
        &self,
        _playlist: &[TrackPtr],
        _context_count: usize,
        _final_count: usize,
        universe: &TrackCollectionPtr,
    ) -> TrackSet {
        TrackSet::new(universe, true)
    }

    fn track_matches(&self, _position: usize, _playlist: &[TrackPtr], _context_count: usize) -> bool {
        true
    }

    fn energy(&self, _playlist: &[TrackPtr], _context_count: usize) -> f64 {
        0.0
    }
}

/// Rejects tracks already in the playlist.
#[derive(Default)]
pub struct UniqueBias {
    id: BiasId,
    notifier: Notifier,
}

impl UniqueBias {
    pub const NAME: &'static str = "uniqueBias";

    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Bias for UniqueBias {
    fn id(&self) -> BiasId {
        self.id
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn describe(&self) -> String {
        "Only once in the current playlist".to_string()
    }

    fn to_fragment(&self) -> Fragment {
        Fragment::new(Self::NAME)
    }

    fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn matching_tracks(
        &self,
        playlist: &[TrackPtr],
        _context_count: usize,
        _final_count: usize,
        universe: &TrackCollectionPtr,
    ) -> TrackSet {
        let mut result = TrackSet::new(universe, true);
        result.subtract_uids(playlist.iter().map(|track| track.uid.as_str()));
        result
    }

    fn track_matches(&self, position: usize, playlist: &[TrackPtr], _context_count: usize) -> bool {
        let Some(track) = playlist.get(position) else {
            return false;
        };
        !playlist[..position]
            .iter()
            .any(|earlier| earlier.uid == track.uid)
    }
}
