//! Shared machinery of the query-driven leaves.
//!
//! A [`LeafCore`] owns the id and listeners of a leaf bias together with a
//! result cache keyed by a string the leaf derives from its configuration.
//! Identical lookups are sent to the backend once: while a key is in flight
//! every caller gets an outstanding set and all of them are served by the
//! single [`BiasEvent::ResultReady`] that follows.

use super::{lock, BiasEvent, BiasId, Notifier};
use crate::backend::{BackendPtr, Query};
use crate::track_set::{TrackCollectionPtr, TrackSet};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How long lookup results stay valid unless configured otherwise.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(180);

struct Cached {
    set: TrackSet,
    fetched: Instant,
    /// Stands in for a failed lookup; only the round that asked sees it.
    failed: bool,
}

/// A lookup key together with the universe it was asked for.
type FlightKey = (String, usize);

fn flight_key(key: &str, universe: &TrackCollectionPtr) -> FlightKey {
    (key.to_string(), Arc::as_ptr(universe) as usize)
}

struct Flight {
    token: u64,
    universe: TrackCollectionPtr,
    invert: bool,
    /// Someone got an outstanding set and expects a notification.
    waiting: bool,
}

#[derive(Default)]
struct MatchCache {
    entries: HashMap<String, Cached>,
    in_flight: HashMap<FlightKey, Flight>,
    next_token: u64,
}

impl MatchCache {
    /// A cached result for `universe`. Without a `ttl` the entry was just
    /// written by the caller's own lookup and is taken as is.
    fn fresh(&self, key: &str, universe: &TrackCollectionPtr, ttl: Option<Duration>) -> Option<TrackSet> {
        let cached = self.entries.get(key)?;
        if !cached.set.belongs_to(universe) {
            return None;
        }
        if ttl.is_some_and(|ttl| cached.failed || cached.fetched.elapsed() > ttl) {
            return None;
        }
        Some(cached.set.clone())
    }
}

/// Identity, listeners and lookup cache of one leaf bias.
pub(crate) struct LeafCore {
    pub(crate) id: BiasId,
    pub(crate) notifier: Notifier,
    backend: BackendPtr,
    ttl: Duration,
    cache: Mutex<MatchCache>,
}

impl LeafCore {
    pub(crate) fn new(backend: BackendPtr, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: BiasId::next(),
            notifier: Notifier::default(),
            backend,
            ttl,
            cache: Mutex::new(MatchCache::default()),
        })
    }

    /// The set of tracks of `universe` matching `query`, complemented when
    /// `invert` is set. Outstanding while the backend has not answered.
    pub(crate) fn lookup(
        self: &Arc<Self>,
        key: &str,
        query: Query,
        universe: &TrackCollectionPtr,
        invert: bool,
    ) -> TrackSet {
        let token = {
            let mut cache = lock(&self.cache);
            if let Some(set) = cache.fresh(key, universe, Some(self.ttl)) {
                log::trace!("Cache hit for `{key}'.");
                return set;
            }
            if let Some(flight) = cache.in_flight.get_mut(&flight_key(key, universe)) {
                flight.waiting = true;
                return TrackSet::outstanding();
            }
            cache.next_token += 1;
            let token = cache.next_token;
            cache.in_flight.insert(
                flight_key(key, universe),
                Flight {
                    token,
                    universe: Arc::clone(universe),
                    invert,
                    waiting: false,
                },
            );
            token
        };

        log::debug!("Bias {} looks up `{key}'.", self.id);
        let weak = Arc::downgrade(self);
        let owned_key = flight_key(key, universe);
        self.backend.run(
            query,
            Box::new(move |result| {
                if let Some(core) = weak.upgrade() {
                    core.finish(&owned_key, token, result);
                }
            }),
        );

        let mut cache = lock(&self.cache);
        if let Some(flight) = cache
            .in_flight
            .get_mut(&flight_key(key, universe))
            .filter(|flight| flight.token == token)
        {
            flight.waiting = true;
            return TrackSet::outstanding();
        }
        // answered synchronously
        cache
            .fresh(key, universe, None)
            .unwrap_or_else(TrackSet::outstanding)
    }

    fn finish(&self, target: &FlightKey, token: u64, result: Result<Vec<String>>) {
        let key = target.0.as_str();
        let (set, notify) = {
            let mut cache = lock(&self.cache);
            if !cache
                .in_flight
                .get(target)
                .is_some_and(|flight| flight.token == token)
            {
                log::debug!("Dropping stale lookup result for `{key}'.");
                return;
            }
            let Some(flight) = cache.in_flight.remove(target) else {
                return;
            };

            let failed = result.is_err();
            let set = match result {
                Ok(uids) => {
                    let mut found = TrackSet::new(&flight.universe, false);
                    found.unite_uids(&uids);
                    if flight.invert {
                        let mut complement = TrackSet::new(&flight.universe, true);
                        complement.subtract(&found);
                        complement
                    } else {
                        found
                    }
                }
                Err(e) => {
                    log::warn!("Lookup `{key}' failed, using no tracks: {e:#}");
                    TrackSet::new(&flight.universe, false)
                }
            };
            cache.entries.insert(
                key.to_string(),
                Cached {
                    set: set.clone(),
                    fetched: Instant::now(),
                    failed,
                },
            );
            (set, flight.waiting)
        };

        if notify {
            self.notifier.notify(self.id, &BiasEvent::ResultReady(set));
        }
    }

    /// Membership of `uid` in a still valid cached result, if known.
    pub(crate) fn cached_match(&self, key: &str, uid: &str) -> Option<bool> {
        let cache = lock(&self.cache);
        let cached = cache.entries.get(key)?;
        if cached.failed || cached.fetched.elapsed() > self.ttl {
            return None;
        }
        let universe = cached.set.universe()?;
        universe.index_of(uid)?;
        Some(cached.set.contains(uid))
    }

    /// Forgets cached results and abandons lookups in flight.
    pub(crate) fn invalidate(&self) {
        let mut cache = lock(&self.cache);
        cache.entries.clear();
        cache.in_flight.clear();
    }

    /// Invalidates and tells listeners the configuration changed.
    pub(crate) fn changed(&self) {
        self.invalidate();
        self.notifier.notify(self.id, &BiasEvent::Changed);
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{tracks, uids, universe, Recorder};
    use super::super::BiasListener;
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::track::Field;
    use std::sync::Weak;

    struct Probe(Arc<LeafCore>);

    impl Probe {
        fn new(backend: BackendPtr, ttl: Duration) -> Self {
            Self(LeafCore::new(backend, ttl))
        }

        fn recorder(&self) -> Arc<Recorder> {
            let recorder = Arc::new(Recorder::default());
            let weak: Weak<dyn BiasListener> = Arc::downgrade(&recorder) as Weak<dyn BiasListener>;
            self.0.notifier.subscribe(weak);
            recorder
        }
    }

    fn rock() -> Query {
        Query::equals(Field::Genre, "rock")
    }

    #[test]
    fn test_synchronous_answer_is_returned_without_event() {
        let backend = MemoryBackend::new(tracks());
        let probe = Probe::new(backend.clone(), DEFAULT_CACHE_TTL);
        let recorder = probe.recorder();
        let universe = universe();

        let set = probe.0.lookup("rock", rock(), &universe, false);
        assert_eq!(uids(&set), vec!["T1", "T3"]);
        assert!(recorder.results().is_empty());

        // second call is served from the cache
        probe.0.lookup("rock", rock(), &universe, false);
        assert_eq!(backend.query_count(), 1);
    }

    #[test]
    fn test_pending_lookups_are_deduplicated() {
        let backend = MemoryBackend::deferred(tracks());
        let probe = Probe::new(backend.clone(), DEFAULT_CACHE_TTL);
        let recorder = probe.recorder();
        let universe = universe();

        assert!(probe.0.lookup("rock", rock(), &universe, false).is_outstanding());
        assert!(probe.0.lookup("rock", rock(), &universe, false).is_outstanding());
        assert_eq!(backend.query_count(), 1);

        backend.flush();
        let results = recorder.results();
        assert_eq!(results.len(), 1);
        assert_eq!(uids(&results[0]), vec!["T1", "T3"]);
    }

    #[test]
    fn test_invert_and_failure() {
        let backend = MemoryBackend::new(tracks());
        let probe = Probe::new(backend.clone(), DEFAULT_CACHE_TTL);
        let universe = universe();

        let set = probe.0.lookup("!rock", rock(), &universe, true);
        assert_eq!(uids(&set), vec!["T2", "T4"]);

        backend.set_failing(true);
        let set = probe.0.lookup("jazz", Query::equals(Field::Genre, "jazz"), &universe, true);
        assert!(set.is_empty());
    }

    #[test]
    fn test_failed_lookup_is_retried_next_round() {
        let backend = MemoryBackend::new(tracks());
        let probe = Probe::new(backend.clone(), DEFAULT_CACHE_TTL);
        let universe = universe();

        backend.set_failing(true);
        assert!(probe.0.lookup("rock", rock(), &universe, false).is_empty());
        assert_eq!(probe.0.cached_match("rock", "T1"), None);

        backend.set_failing(false);
        let set = probe.0.lookup("rock", rock(), &universe, false);
        assert_eq!(uids(&set), vec!["T1", "T3"]);
        assert_eq!(backend.query_count(), 2);
    }

    #[test]
    fn test_deferred_failure_reports_empty_set_once() {
        let backend = MemoryBackend::deferred(tracks());
        let probe = Probe::new(backend.clone(), DEFAULT_CACHE_TTL);
        let recorder = probe.recorder();
        let universe = universe();

        backend.set_failing(true);
        assert!(probe.0.lookup("rock", rock(), &universe, false).is_outstanding());
        backend.flush();
        let results = recorder.results();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_empty());

        backend.set_failing(false);
        assert!(probe.0.lookup("rock", rock(), &universe, false).is_outstanding());
        backend.flush();
        assert_eq!(uids(&recorder.results()[1]), vec!["T1", "T3"]);
    }

    #[test]
    fn test_lookups_for_different_universes_fly_separately() {
        let backend = MemoryBackend::deferred(tracks());
        let probe = Probe::new(backend.clone(), DEFAULT_CACHE_TTL);
        let recorder = probe.recorder();
        let (first, second) = (universe(), universe());

        assert!(probe.0.lookup("rock", rock(), &first, false).is_outstanding());
        assert!(probe.0.lookup("rock", rock(), &second, false).is_outstanding());
        assert_eq!(backend.query_count(), 2);

        backend.flush();
        let results = recorder.results();
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|set| set.belongs_to(&first)));
        assert!(results.iter().any(|set| set.belongs_to(&second)));
        for set in &results {
            assert_eq!(uids(set), vec!["T1", "T3"]);
        }
    }

    #[test]
    fn test_invalidate_drops_results_in_flight() {
        let backend = MemoryBackend::deferred(tracks());
        let probe = Probe::new(backend.clone(), DEFAULT_CACHE_TTL);
        let recorder = probe.recorder();
        let universe = universe();

        assert!(probe.0.lookup("rock", rock(), &universe, false).is_outstanding());
        probe.0.invalidate();
        backend.flush();
        assert!(recorder.results().is_empty());
        assert_eq!(probe.0.cached_match("rock", "T1"), None);
    }

    #[test]
    fn test_expired_entries_are_fetched_again() {
        let backend = MemoryBackend::new(tracks());
        let probe = Probe::new(backend.clone(), Duration::ZERO);
        let universe = universe();

        probe.0.lookup("rock", rock(), &universe, false);
        std::thread::sleep(Duration::from_millis(2));
        probe.0.lookup("rock", rock(), &universe, false);
        assert_eq!(backend.query_count(), 2);
    }

    #[test]
    fn test_cached_match_knows_universe_members_only() {
        let backend = MemoryBackend::new(tracks());
        let probe = Probe::new(backend, DEFAULT_CACHE_TTL);
        probe.0.lookup("rock", rock(), &universe(), false);

        assert_eq!(probe.0.cached_match("rock", "T1"), Some(true));
        assert_eq!(probe.0.cached_match("rock", "T2"), Some(false));
        assert_eq!(probe.0.cached_match("rock", "T9"), None);
    }
}
