//! # Biases
//!
//! A bias is one node of the constraint tree a playlist is generated from.
//! Leaves filter the universe (tag filters, searches, album order, ...),
//! composites combine their children with set algebra or split the open
//! slots between them ([`part::PartBias`]).
//!
//! ## Asynchronous results
//!
//! Leaves backed by a [`crate::backend::QueryBackend`] may not know their
//! answer yet. They return [`TrackSet::outstanding`] and later deliver the
//! real set once, as [`BiasEvent::ResultReady`], to every subscribed
//! [`BiasListener`]. Composites subscribe to their children and wait with the
//! fan-in primitives of the `join` module.
//!
//! Calling `matching_tracks` again on a bias whose previous result is still
//! outstanding is a contract violation; call [`Bias::invalidate`] first.

use crate::track::TrackPtr;
use crate::track_set::{TrackCollectionPtr, TrackSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

pub mod album_play;
pub mod basic;
pub mod composite;
pub mod fragment;
pub mod group;
pub mod if_else;
pub(crate) mod join;
pub mod part;
pub mod quiz_play;
pub mod replacement;
pub mod search_query;
pub mod similar;
pub mod simple_match;
pub mod tag_match;

pub use album_play::{AlbumPlayBias, FollowMode};
pub use basic::{RandomBias, UniqueBias};
pub use composite::CompositeBias;
pub use fragment::Fragment;
pub use group::{GroupBias, GroupMode};
pub use if_else::IfElseBias;
pub use part::PartBias;
pub use quiz_play::{QuizField, QuizPlayBias};
pub use replacement::ReplacementBias;
pub use search_query::SearchQueryBias;
pub use similar::{SimilarArtistBias, SimilarMatch};
pub use tag_match::{Condition, MetaFilter, TagMatchBias};

/// Shared handle to a bias node.
pub type BiasPtr = Arc<dyn Bias>;

/// Process-unique identity of a bias node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BiasId(u64);

impl BiasId {
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A fresh id, so biases can derive `Default`.
impl Default for BiasId {
    fn default() -> Self {
        BiasId::next()
    }
}

impl fmt::Display for BiasId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Notifications a bias sends to its listeners.
#[derive(Clone)]
pub enum BiasEvent {
    /// The real value of a previously outstanding `matching_tracks` call.
    ResultReady(TrackSet),
    /// Configuration changed, cached results are void.
    Changed,
    /// The bias should be swapped for another one, or removed (`None`).
    Replaced(Option<BiasPtr>),
    BiasAppended(BiasPtr),
    BiasRemoved(usize),
    BiasMoved { from: usize, to: usize },
    WeightsChanged,
}

impl fmt::Debug for BiasEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BiasEvent::ResultReady(set) => f.debug_tuple("ResultReady").field(set).finish(),
            BiasEvent::Changed => f.write_str("Changed"),
            BiasEvent::Replaced(Some(bias)) => write!(f, "Replaced({})", bias.name()),
            BiasEvent::Replaced(None) => f.write_str("Replaced(None)"),
            BiasEvent::BiasAppended(bias) => write!(f, "BiasAppended({})", bias.name()),
            BiasEvent::BiasRemoved(index) => write!(f, "BiasRemoved({index})"),
            BiasEvent::BiasMoved { from, to } => write!(f, "BiasMoved({from} -> {to})"),
            BiasEvent::WeightsChanged => f.write_str("WeightsChanged"),
        }
    }
}

/// Receiver of [`BiasEvent`]s.
pub trait BiasListener: Send + Sync {
    fn bias_event(&self, source: BiasId, event: &BiasEvent);
}

/// Listener registry embedded in every bias.
///
/// Listeners are held weakly; a dropped listener silently disappears.
#[derive(Default)]
pub struct Notifier {
    listeners: Mutex<Vec<Weak<dyn BiasListener>>>,
}

impl Notifier {
    pub fn subscribe(&self, listener: Weak<dyn BiasListener>) {
        lock(&self.listeners).push(listener);
    }

    pub fn unsubscribe(&self, listener: &Weak<dyn BiasListener>) {
        let target = listener.as_ptr() as *const ();
        lock(&self.listeners).retain(|known| known.as_ptr() as *const () != target);
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners)
            .iter()
            .filter(|listener| listener.strong_count() > 0)
            .count()
    }

    /// Calls every live listener. The registry lock is released first so a
    /// listener may subscribe or unsubscribe while handling the event.
    pub fn notify(&self, source: BiasId, event: &BiasEvent) {
        let live: Vec<Arc<dyn BiasListener>> = {
            let mut listeners = lock(&self.listeners);
            listeners.retain(|listener| listener.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        log::trace!("Bias {source} sends {event:?} to {} listeners.", live.len());
        for listener in live {
            listener.bias_event(source, event);
        }
    }
}

/// The contract every bias fulfils.
pub trait Bias: Send + Sync {
    fn id(&self) -> BiasId;

    /// Registered type name, also the fragment tag.
    fn name(&self) -> &str;

    /// One line summary for humans.
    fn describe(&self) -> String;

    fn to_fragment(&self) -> Fragment;

    fn notifier(&self) -> &Notifier;

    /// Tracks of `universe` acceptable at the next open position.
    ///
    /// `playlist[..context_count]` is fixed context, `final_count` is the
    /// length the playlist will have once complete. The result may be
    /// outstanding, see the module documentation.
    fn matching_tracks(
        &self,
        playlist: &[TrackPtr],
        context_count: usize,
        final_count: usize,
        universe: &TrackCollectionPtr,
    ) -> TrackSet;

    /// Whether the track already at `position` satisfies this bias. May block.
    fn track_matches(&self, position: usize, playlist: &[TrackPtr], context_count: usize) -> bool;

    /// Dissatisfaction in `[0, 1]`: the share of non-context positions that
    /// fail [`Bias::track_matches`].
    fn energy(&self, playlist: &[TrackPtr], context_count: usize) -> f64 {
        let open = playlist.len().saturating_sub(context_count);
        if open == 0 {
            return 0.0;
        }
        let misses = (context_count..playlist.len())
            .filter(|&position| !self.track_matches(position, playlist, context_count))
            .count();
        misses as f64 / open as f64
    }

    /// Drops cached and in-flight state.
    fn invalidate(&self) {}

    /// Asks the parent to put `new_bias` in this bias' place, or to remove
    /// it when `None`.
    fn replace(&self, new_bias: Option<BiasPtr>) {
        log::debug!("Bias {} ({}) asks to be replaced.", self.id(), self.name());
        self.notifier()
            .notify(self.id(), &BiasEvent::Replaced(new_bias));
    }

    fn as_composite(&self) -> Option<&dyn CompositeBias> {
        None
    }
}

/// Locks a mutex, recovering the data of a poisoned one.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Renders a bias tree as an indented outline.
#[must_use]
pub fn outline(bias: &BiasPtr) -> String {
    fn walk(bias: &BiasPtr, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&bias.describe());
        out.push('\n');
        if let Some(composite) = bias.as_composite() {
            for child in composite.biases() {
                walk(&child, depth + 1, out);
            }
        }
    }
    let mut out = String::new();
    walk(bias, 0, &mut out);
    out
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers shared by the bias unit tests.

    use super::*;
    use crate::track::Track;
    use crate::track_set::TrackCollection;

    /// Records every event it receives.
    #[derive(Default)]
    pub struct Recorder {
        pub events: Mutex<Vec<(BiasId, BiasEvent)>>,
    }

    impl Recorder {
        pub fn attach(bias: &dyn Bias) -> Arc<Self> {
            let recorder = Arc::new(Self::default());
            let weak: Weak<dyn BiasListener> = Arc::downgrade(&recorder) as Weak<dyn BiasListener>;
            bias.notifier().subscribe(weak);
            recorder
        }

        pub fn results(&self) -> Vec<TrackSet> {
            lock(&self.events)
                .iter()
                .filter_map(|(_, event)| match event {
                    BiasEvent::ResultReady(set) => Some(set.clone()),
                    _ => None,
                })
                .collect()
        }

        pub fn names(&self) -> Vec<String> {
            lock(&self.events)
                .iter()
                .map(|(_, event)| format!("{event:?}"))
                .collect()
        }
    }

    impl BiasListener for Recorder {
        fn bias_event(&self, source: BiasId, event: &BiasEvent) {
            lock(&self.events).push((source, event.clone()));
        }
    }

    /// T1..T4 with two genres and one album.
    pub fn tracks() -> Vec<TrackPtr> {
        vec![
            Track::new("T1")
                .with_title("Alpha")
                .with_artist("Ann")
                .with_genre("Rock")
                .with_album("First", 1)
                .with_year(1990)
                .into_ptr(),
            Track::new("T2")
                .with_title("Bravo")
                .with_artist("Bob")
                .with_genre("Jazz")
                .with_album("First", 2)
                .with_year(2000)
                .into_ptr(),
            Track::new("T3")
                .with_title("Charlie")
                .with_artist("Ann")
                .with_genre("Rock")
                .with_album("First", 3)
                .with_year(2010)
                .into_ptr(),
            Track::new("T4")
                .with_title("Delta")
                .with_artist("Cid")
                .with_genre("Pop")
                .with_year(2020)
                .into_ptr(),
        ]
    }

    pub fn universe() -> TrackCollectionPtr {
        TrackCollection::new(tracks())
    }

    pub fn uids(set: &TrackSet) -> Vec<&str> {
        set.uids().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Recorder;
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(BiasId::next(), BiasId::next());
    }

    #[test]
    fn test_dropped_listener_is_skipped() {
        let bias = RandomBias::new();
        let recorder = Recorder::attach(bias.as_ref());
        assert_eq!(bias.notifier().listener_count(), 1);

        drop(recorder);
        assert_eq!(bias.notifier().listener_count(), 0);
        bias.notifier().notify(bias.id(), &BiasEvent::Changed);
    }

    #[test]
    fn test_unsubscribe() {
        let bias = RandomBias::new();
        let recorder = Recorder::attach(bias.as_ref());
        let weak: Weak<dyn BiasListener> = Arc::downgrade(&recorder) as Weak<dyn BiasListener>;
        bias.notifier().unsubscribe(&weak);

        bias.notifier().notify(bias.id(), &BiasEvent::Changed);
        assert!(recorder.names().is_empty());
    }

    #[test]
    fn test_replace_announces_new_bias() {
        let bias = RandomBias::new();
        let recorder = Recorder::attach(bias.as_ref());
        bias.replace(Some(UniqueBias::new()));
        assert_eq!(recorder.names(), vec!["Replaced(uniqueBias)"]);
    }
}
