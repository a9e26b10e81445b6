//! Tracks by artists similar to the ones already played.
//!
//! Matching runs in two stages. The similar artists of the current artists
//! are taken from the [`SimilarArtistCache`] or requested from the
//! [`SimilarityService`]; then the tracks of those artists are looked up
//! through the backend. Either stage may leave the result outstanding.

use super::simple_match::{LeafCore, DEFAULT_CACHE_TTL};
use super::{lock, Bias, BiasEvent, BiasId, Fragment, Notifier};
use crate::backend::{BackendPtr, Query};
use crate::similarity::{SimilarArtistCache, SimilarityService};
use crate::track::{Field, TrackPtr};
use crate::track_set::{TrackCollectionPtr, TrackSet};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Which artists the next track should be similar to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarMatch {
    /// The artist of the previous track.
    #[default]
    Previous,
    /// Any artist in the playlist so far.
    Playlist,
}

impl SimilarMatch {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            SimilarMatch::Previous => "previous",
            SimilarMatch::Playlist => "playlist",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "playlist" => SimilarMatch::Playlist,
            _ => SimilarMatch::Previous,
        }
    }
}

struct PendingRequest {
    universe: TrackCollectionPtr,
    waiting: bool,
}

#[derive(Default)]
struct SimilarState {
    /// Similar artists by artist key, as far as known in this session.
    similar: HashMap<String, Vec<String>>,
    pending: HashMap<String, PendingRequest>,
}

/// Leaf bias preferring artists similar to the played ones.
pub struct SimilarArtistBias {
    me: Weak<SimilarArtistBias>,
    core: Arc<LeafCore>,
    service: Arc<dyn SimilarityService>,
    cache: Arc<SimilarArtistCache>,
    mode: Mutex<SimilarMatch>,
    state: Mutex<SimilarState>,
}

impl SimilarArtistBias {
    pub const NAME: &'static str = "echoNestBias";

    #[must_use]
    pub fn new(
        backend: BackendPtr,
        service: Arc<dyn SimilarityService>,
        cache: Arc<SimilarArtistCache>,
        mode: SimilarMatch,
    ) -> Arc<Self> {
        Self::with_ttl(backend, DEFAULT_CACHE_TTL, service, cache, mode)
    }

    #[must_use]
    pub fn with_ttl(
        backend: BackendPtr,
        ttl: Duration,
        service: Arc<dyn SimilarityService>,
        cache: Arc<SimilarArtistCache>,
        mode: SimilarMatch,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            core: LeafCore::new(backend, ttl),
            service,
            cache,
            mode: Mutex::new(mode),
            state: Mutex::new(SimilarState::default()),
        })
    }

    #[must_use]
    pub fn mode(&self) -> SimilarMatch {
        *lock(&self.mode)
    }

    pub fn set_mode(&self, mode: SimilarMatch) {
        {
            let mut current = lock(&self.mode);
            if *current == mode {
                return;
            }
            *current = mode;
        }
        self.invalidate();
        self.core.notifier.notify(self.core.id, &BiasEvent::Changed);
    }

    /// Artists the track at `position` should be similar to.
    fn current_artists(&self, position: usize, playlist: &[TrackPtr]) -> Vec<String> {
        let mut artists: Vec<String> = Vec::new();
        match self.mode() {
            SimilarMatch::Previous => {
                if let Some(previous) = position.checked_sub(1).and_then(|p| playlist.get(p)) {
                    if !previous.artist.is_empty() {
                        artists.push(previous.artist.clone());
                    }
                }
            }
            SimilarMatch::Playlist => {
                for track in playlist.iter().take(position) {
                    if !track.artist.is_empty() && !artists.contains(&track.artist) {
                        artists.push(track.artist.clone());
                    }
                }
            }
        }
        artists
    }

    fn known_similar(&self, key: &str, artists: &[String]) -> Option<Vec<String>> {
        if let Some(similar) = lock(&self.state).similar.get(key) {
            return Some(similar.clone());
        }
        let similar = self.cache.get(artists)?;
        lock(&self.state)
            .similar
            .insert(key.to_string(), similar.clone());
        Some(similar)
    }

    fn lookup_tracks(&self, key: &str, similar: &[String], universe: &TrackCollectionPtr) -> TrackSet {
        let query = Query::Or(
            similar
                .iter()
                .map(|artist| Query::equals(Field::Artist, artist.clone()))
                .collect(),
        );
        self.core.lookup(&format!("artists:{key}"), query, universe, false)
    }

    fn similar_found(&self, key: &str, artists: &[String], result: Result<Vec<String>>) {
        let similar = match result {
            Ok(similar) => {
                log::debug!("Artists similar to {key}: {}", similar.join(", "));
                self.cache.insert(artists, similar.clone());
                similar
            }
            Err(e) => {
                log::warn!("Similar artist lookup for {key} failed: {e:#}");
                Vec::new()
            }
        };
        let pending = {
            let mut state = lock(&self.state);
            state.similar.insert(key.to_string(), similar.clone());
            state.pending.remove(key)
        };
        let Some(pending) = pending else {
            return;
        };

        let set = self.lookup_tracks(key, &similar, &pending.universe);
        // an outstanding lookup notifies by itself
        if pending.waiting && !set.is_outstanding() {
            self.core
                .notifier
                .notify(self.core.id, &BiasEvent::ResultReady(set));
        }
    }
}

impl Bias for SimilarArtistBias {
    fn id(&self) -> BiasId {
        self.core.id
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn describe(&self) -> String {
        match self.mode() {
            SimilarMatch::Previous => "Similar to the previous artist".to_string(),
            SimilarMatch::Playlist => "Similar to any artist in the playlist".to_string(),
        }
    }

    fn to_fragment(&self) -> Fragment {
        Fragment::new(Self::NAME).with_text_child("match", self.mode().name())
    }

    fn notifier(&self) -> &Notifier {
        &self.core.notifier
    }

    fn matching_tracks(
        &self,
        playlist: &[TrackPtr],
        _context_count: usize,
        _final_count: usize,
        universe: &TrackCollectionPtr,
    ) -> TrackSet {
        let artists = self.current_artists(playlist.len(), playlist);
        if artists.is_empty() {
            return TrackSet::new(universe, true);
        }
        let key = SimilarArtistCache::key(&artists);
        if let Some(similar) = self.known_similar(&key, &artists) {
            return self.lookup_tracks(&key, &similar, universe);
        }

        {
            let mut state = lock(&self.state);
            if let Some(pending) = state.pending.get_mut(&key) {
                pending.waiting = true;
                return TrackSet::outstanding();
            }
            state.pending.insert(
                key.clone(),
                PendingRequest {
                    universe: Arc::clone(universe),
                    waiting: false,
                },
            );
        }

        log::debug!("Asking for artists similar to {key}.");
        let me = self.me.clone();
        let request_key = key.clone();
        let request_artists = artists.clone();
        self.service.similar_artists(
            &artists,
            Box::new(move |result| {
                if let Some(bias) = me.upgrade() {
                    bias.similar_found(&request_key, &request_artists, result);
                }
            }),
        );

        {
            let mut state = lock(&self.state);
            if let Some(pending) = state.pending.get_mut(&key) {
                pending.waiting = true;
                return TrackSet::outstanding();
            }
        }
        // the service answered synchronously
        match self.known_similar(&key, &artists) {
            Some(similar) => self.lookup_tracks(&key, &similar, universe),
            None => TrackSet::outstanding(),
        }
    }

    fn track_matches(&self, position: usize, playlist: &[TrackPtr], _context_count: usize) -> bool {
        let artists = self.current_artists(position, playlist);
        if artists.is_empty() {
            return true;
        }
        let Some(track) = playlist.get(position) else {
            return false;
        };
        if track.artist.is_empty() {
            return false;
        }
        let key = SimilarArtistCache::key(&artists);
        match self.known_similar(&key, &artists) {
            Some(similar) => similar
                .iter()
                .any(|artist| artist.eq_ignore_ascii_case(&track.artist)),
            None => {
                log::warn!("No similar artists known for {key}.");
                false
            }
        }
    }

    fn invalidate(&self) {
        {
            let mut state = lock(&self.state);
            state.similar.clear();
            state.pending.clear();
        }
        self.core.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{tracks, uids, universe, Recorder};
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::similarity::{SimilarDone, SimilarityTable};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn table() -> Arc<SimilarityTable> {
        Arc::new(SimilarityTable::new([
            ("Ann".to_string(), vec!["Cid".to_string()]),
            ("Bob".to_string(), vec!["Ann".to_string(), "Cid".to_string()]),
        ]))
    }

    fn cache() -> Arc<SimilarArtistCache> {
        Arc::new(SimilarArtistCache::in_memory(Duration::from_secs(3600)))
    }

    /// Holds requests until released.
    #[derive(Default)]
    struct SlowService {
        queued: Mutex<Vec<(Vec<String>, SimilarDone)>>,
        requests: AtomicUsize,
    }

    impl SlowService {
        fn release(&self) {
            let table = table();
            let queued = std::mem::take(&mut *lock(&self.queued));
            for (artists, done) in queued {
                done(Ok(table.lookup(&artists)));
            }
        }
    }

    impl SimilarityService for SlowService {
        fn similar_artists(&self, artists: &[String], done: SimilarDone) {
            self.requests.fetch_add(1, Ordering::Relaxed);
            lock(&self.queued).push((artists.to_vec(), done));
        }
    }

    #[test]
    fn test_similar_to_previous_artist() {
        let all = tracks();
        let backend = MemoryBackend::new(all.clone());
        let bias = SimilarArtistBias::new(backend, table(), cache(), SimilarMatch::Previous);

        // T2 is by Bob, similar to Ann and Cid
        let set = bias.matching_tracks(&[all[1].clone()], 1, 2, &universe());
        assert_eq!(uids(&set), vec!["T1", "T3", "T4"]);

        assert!(bias.matching_tracks(&[], 0, 1, &universe()).is_full());
    }

    #[test]
    fn test_playlist_mode_uses_all_artists() {
        let all = tracks();
        let backend = MemoryBackend::new(all.clone());
        let bias = SimilarArtistBias::new(backend, table(), cache(), SimilarMatch::Playlist);
        assert_eq!(bias.current_artists(3, &all), vec!["Ann", "Bob"]);
    }

    #[test]
    fn test_slow_service_delivers_once() {
        let all = tracks();
        let backend = MemoryBackend::new(all.clone());
        let service = Arc::new(SlowService::default());
        let bias = SimilarArtistBias::new(backend, service.clone(), cache(), SimilarMatch::Previous);
        let recorder = Recorder::attach(bias.as_ref());
        let universe = universe();
        let playlist = [all[0].clone()];

        assert!(bias.matching_tracks(&playlist, 1, 2, &universe).is_outstanding());
        assert!(bias.matching_tracks(&playlist, 1, 2, &universe).is_outstanding());
        assert_eq!(service.requests.load(Ordering::Relaxed), 1);

        service.release();
        let results = recorder.results();
        assert_eq!(results.len(), 1);
        assert_eq!(uids(&results[0]), vec!["T4"]);
    }

    #[test]
    fn test_track_matches_uses_known_similar_artists() {
        let all = tracks();
        let backend = MemoryBackend::new(all.clone());
        let cache = cache();
        cache.insert(&["Ann".to_string()], vec!["cid".to_string()]);
        let bias = SimilarArtistBias::new(backend, table(), cache, SimilarMatch::Previous);

        let playlist = vec![all[0].clone(), all[3].clone(), all[1].clone()];
        assert!(bias.track_matches(0, &playlist, 0));
        assert!(bias.track_matches(1, &playlist, 0));
        // nothing known for Cid
        assert!(!bias.track_matches(2, &playlist, 0));
    }

    #[test]
    fn test_fragment() {
        let backend = MemoryBackend::new(Vec::new());
        let bias = SimilarArtistBias::new(backend, table(), cache(), SimilarMatch::Playlist);
        assert_eq!(bias.to_fragment().child_text("match"), Some("playlist"));
        assert_eq!(SimilarMatch::from_name("playlist"), SimilarMatch::Playlist);
        assert_eq!(SimilarMatch::from_name("bogus"), SimilarMatch::Previous);
    }
}
