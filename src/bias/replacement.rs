//! Stand-in for a bias whose type is not registered.

use super::{Bias, BiasId, Fragment, Notifier};
use crate::track::TrackPtr;
use crate::track_set::{TrackCollectionPtr, TrackSet};
use std::sync::Arc;

/// Accepts everything, like a random bias, but keeps the fragment it was
/// loaded from so saving it loses nothing. Once a provider for its name is
/// registered the factory swaps it for the real bias.
pub struct ReplacementBias {
    id: BiasId,
    notifier: Notifier,
    fragment: Fragment,
}

impl ReplacementBias {
    #[must_use]
    pub fn new(fragment: Fragment) -> Arc<Self> {
        log::info!("Using a replacement for unknown bias `{}'.", fragment.tag);
        Arc::new(Self {
            id: BiasId::next(),
            notifier: Notifier::default(),
            fragment,
        })
    }

    #[must_use]
    pub fn fragment(&self) -> &Fragment {
        &self.fragment
    }
}

impl Bias for ReplacementBias {
    fn id(&self) -> BiasId {
        self.id
    }

    fn name(&self) -> &str {
        &self.fragment.tag
    }

    fn describe(&self) -> String {
        format!("Replacement for the unknown bias \"{}\"", self.fragment.tag)
    }

    fn to_fragment(&self) -> Fragment {
        self.fragment.clone()
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
}
