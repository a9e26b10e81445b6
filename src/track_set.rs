//! # Track set algebra
//!
//! A [`TrackCollection`] is the universe of one matching session: an ordered
//! list of unique tracks. A [`TrackSet`] is a bit per universe entry.
//!
//! Sets can only be combined with sets of the same universe, and a set that
//! is still *outstanding* (waiting for an asynchronous lookup) cannot be used
//! at all. Both are programming errors and panic.

use crate::track::TrackPtr;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Shared handle to a universe.
pub type TrackCollectionPtr = Arc<TrackCollection>;

const WORD_BITS: usize = 64;

/// The ordered set of tracks eligible during one matching session.
#[derive(Debug, Default)]
pub struct TrackCollection {
    tracks: Vec<TrackPtr>,
    index: HashMap<String, usize>,
}

impl TrackCollection {
    /// Builds a universe. Later duplicates of a uid are dropped.
    #[must_use]
    pub fn new(tracks: impl IntoIterator<Item = TrackPtr>) -> TrackCollectionPtr {
        let mut collection = TrackCollection::default();
        for track in tracks {
            if collection.index.contains_key(&track.uid) {
                log::trace!("Dropping duplicate track `{}' from universe.", track.uid);
                continue;
            }
            collection
                .index
                .insert(track.uid.clone(), collection.tracks.len());
            collection.tracks.push(track);
        }
        Arc::new(collection)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    #[must_use]
    pub fn index_of(&self, uid: &str) -> Option<usize> {
        self.index.get(uid).copied()
    }

    #[must_use]
    pub fn track(&self, index: usize) -> Option<&TrackPtr> {
        self.tracks.get(index)
    }

    #[must_use]
    pub fn tracks(&self) -> &[TrackPtr] {
        &self.tracks
    }

    pub fn uids(&self) -> impl Iterator<Item = &str> {
        self.tracks.iter().map(|track| track.uid.as_str())
    }
}

/// A set of tracks relative to exactly one universe.
///
/// The default value is the outstanding set: no universe yet, the real
/// result will be delivered later.
#[derive(Clone, Default)]
pub struct TrackSet {
    universe: Option<TrackCollectionPtr>,
    bits: Vec<u64>,
}

impl TrackSet {
    /// Creates a full or an empty set over `universe`.
    #[must_use]
    pub fn new(universe: &TrackCollectionPtr, full: bool) -> Self {
        let words = universe.len().div_ceil(WORD_BITS);
        let mut set = Self {
            universe: Some(Arc::clone(universe)),
            bits: vec![if full { u64::MAX } else { 0 }; words],
        };
        set.clear_tail();
        set
    }

    /// A placeholder for a result that is still being looked up.
    #[must_use]
    pub fn outstanding() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_outstanding(&self) -> bool {
        self.universe.is_none()
    }

    #[must_use]
    pub fn universe(&self) -> Option<&TrackCollectionPtr> {
        self.universe.as_ref()
    }

    /// Whether this set was built over `universe`.
    #[must_use]
    pub fn belongs_to(&self, universe: &TrackCollectionPtr) -> bool {
        self.universe
            .as_ref()
            .is_some_and(|own| Arc::ptr_eq(own, universe))
    }

    #[must_use]
    pub fn track_count(&self) -> usize {
        self.bits.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// An outstanding set is neither empty nor full.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.is_outstanding() && self.bits.iter().all(|word| *word == 0)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        match &self.universe {
            Some(universe) => self.track_count() == universe.len(),
            None => false,
        }
    }

    #[must_use]
    pub fn contains(&self, uid: &str) -> bool {
        self.universe
            .as_ref()
            .and_then(|universe| universe.index_of(uid))
            .is_some_and(|index| self.bit(index))
    }

    /// Member tracks in universe order.
    pub fn tracks(&self) -> impl Iterator<Item = &TrackPtr> + '_ {
        let universe = self.universe.as_deref();
        universe
            .into_iter()
            .flat_map(|universe| universe.tracks().iter().enumerate())
            .filter(|(index, _)| self.bit(*index))
            .map(|(_, track)| track)
    }

    pub fn uids(&self) -> impl Iterator<Item = &str> + '_ {
        self.tracks().map(|track| track.uid.as_str())
    }

    /// Picks a member uniformly at random.
    pub fn get_random_track<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<TrackPtr> {
        let count = self.track_count();
        if count == 0 {
            return None;
        }
        let pick = rng.gen_range(0..count);
        self.tracks().nth(pick).cloned()
    }

    pub fn unite(&mut self, other: &TrackSet) {
        self.check_compatible(other, "unite");
        for (word, other) in self.bits.iter_mut().zip(&other.bits) {
            *word |= other;
        }
    }

    pub fn intersect(&mut self, other: &TrackSet) {
        self.check_compatible(other, "intersect");
        for (word, other) in self.bits.iter_mut().zip(&other.bits) {
            *word &= other;
        }
    }

    pub fn subtract(&mut self, other: &TrackSet) {
        self.check_compatible(other, "subtract");
        for (word, other) in self.bits.iter_mut().zip(&other.bits) {
            *word &= !other;
        }
    }

    pub fn unite_track(&mut self, uid: &str) {
        self.unite_uids(std::iter::once(uid));
    }

    pub fn intersect_track(&mut self, uid: &str) {
        self.intersect_uids(std::iter::once(uid));
    }

    pub fn subtract_track(&mut self, uid: &str) {
        self.subtract_uids(std::iter::once(uid));
    }

    /// Adds every uid of the list that is part of the universe.
    pub fn unite_uids<I, S>(&mut self, uids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let other = self.membership_of(uids, "unite");
        self.unite(&other);
    }

    pub fn intersect_uids<I, S>(&mut self, uids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let other = self.membership_of(uids, "intersect");
        self.intersect(&other);
    }

    pub fn subtract_uids<I, S>(&mut self, uids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let other = self.membership_of(uids, "subtract");
        self.subtract(&other);
    }

    fn membership_of<I, S>(&self, uids: I, operation: &str) -> TrackSet
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let universe = self.expect_universe(operation);
        let mut set = TrackSet::new(universe, false);
        for uid in uids {
            if let Some(index) = universe.index_of(uid.as_ref()) {
                set.bits[index / WORD_BITS] |= 1 << (index % WORD_BITS);
            }
        }
        set
    }

    fn bit(&self, index: usize) -> bool {
        self.bits
            .get(index / WORD_BITS)
            .is_some_and(|word| word & (1 << (index % WORD_BITS)) != 0)
    }

    fn clear_tail(&mut self) {
        let Some(universe) = &self.universe else {
            return;
        };
        let rest = universe.len() % WORD_BITS;
        if rest != 0 {
            if let Some(last) = self.bits.last_mut() {
                *last &= (1u64 << rest) - 1;
            }
        }
    }

    fn expect_universe(&self, operation: &str) -> &TrackCollectionPtr {
        match &self.universe {
            Some(universe) => universe,
            None => panic!("cannot {operation} an outstanding TrackSet"),
        }
    }

    fn check_compatible(&self, other: &TrackSet, operation: &str) {
        let own = self.expect_universe(operation);
        let theirs = other.expect_universe(operation);
        assert!(
            Arc::ptr_eq(own, theirs),
            "cannot {operation} TrackSets from different universes"
        );
    }
}

impl PartialEq for TrackSet {
    fn eq(&self, other: &Self) -> bool {
        match (&self.universe, &other.universe) {
            (None, None) => true,
            (Some(own), Some(theirs)) => Arc::ptr_eq(own, theirs) && self.bits == other.bits,
            _ => false,
        }
    }
}

impl fmt::Debug for TrackSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_outstanding() {
            return f.write_str("TrackSet(outstanding)");
        }
        f.debug_set().entries(self.uids()).finish()
    }
}
