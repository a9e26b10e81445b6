//! Keeps playing an album once a track of it was chosen.

use super::{lock, Bias, BiasEvent, BiasId, Fragment, Notifier};
use crate::track::{Track, TrackPtr};
use crate::track_set::{TrackCollection, TrackCollectionPtr, TrackSet};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FollowMode {
    /// The next track of the album.
    #[default]
    DirectlyFollow,
    /// Any later track of the album.
    Follow,
    /// Any track of the album.
    DontCare,
}

impl FollowMode {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            FollowMode::DirectlyFollow => "directlyFollow",
            FollowMode::Follow => "follow",
            FollowMode::DontCare => "dontCare",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "follow" => FollowMode::Follow,
            "dontCare" => FollowMode::DontCare,
            _ => FollowMode::DirectlyFollow,
        }
    }
}

fn position_on_album(track: &Track) -> (i64, i64) {
    (track.disc_number, track.track_number)
}

/// Uids acceptable after `previous`, or `None` if anything goes.
fn acceptable(mode: FollowMode, previous: &Track, catalog: &TrackCollection) -> Option<Vec<String>> {
    let key = previous.album_key()?;
    let mut album: Vec<&TrackPtr> = catalog
        .tracks()
        .iter()
        .filter(|track| track.album_key() == Some(key))
        .collect();
    if album.len() < 2 {
        return None;
    }
    album.sort_by_key(|track| position_on_album(track));

    let current = position_on_album(previous);
    let later: Vec<&TrackPtr> = album
        .iter()
        .copied()
        .filter(|track| position_on_album(track) > current)
        .collect();

    let chosen: Vec<&TrackPtr> = match mode {
        FollowMode::DontCare => album,
        FollowMode::Follow => later,
        FollowMode::DirectlyFollow => {
            let next = later.first().map(|track| position_on_album(track));
            later
                .into_iter()
                .filter(|track| Some(position_on_album(track)) == next)
                .collect()
        }
    };
    if chosen.is_empty() {
        // the album is over
        return None;
    }
    Some(chosen.into_iter().map(|track| track.uid.clone()).collect())
}

/// Leaf bias following the album of the previous track.
#[derive(Default)]
pub struct AlbumPlayBias {
    id: BiasId,
    notifier: Notifier,
    mode: Mutex<FollowMode>,
    /// Universe of the last match, used to judge placed tracks.
    catalog: Mutex<Option<TrackCollectionPtr>>,
}

impl AlbumPlayBias {
    pub const NAME: &'static str = "albumPlayBias";

    #[must_use]
    pub fn new(mode: FollowMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            ..Self::default()
        })
    }

    #[must_use]
    pub fn from_fragment(fragment: &Fragment) -> Arc<Self> {
        Self::new(FollowMode::from_name(
            fragment.child_text("follow").unwrap_or_default(),
        ))
    }

    #[must_use]
    pub fn mode(&self) -> FollowMode {
        *lock(&self.mode)
    }

    pub fn set_mode(&self, mode: FollowMode) {
        {
            let mut current = lock(&self.mode);
            if *current == mode {
                return;
            }
            *current = mode;
        }
        self.notifier.notify(self.id, &BiasEvent::Changed);
    }
}

impl Bias for AlbumPlayBias {
    fn id(&self) -> BiasId {
        self.id
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn describe(&self) -> String {
        match self.mode() {
            FollowMode::DirectlyFollow => "The next track from the album".to_string(),
            FollowMode::Follow => "Any later track from the album".to_string(),
            FollowMode::DontCare => "Tracks from the same album".to_string(),
        }
    }

    fn to_fragment(&self) -> Fragment {
        Fragment::new(Self::NAME).with_text_child("follow", self.mode().name())
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
        *lock(&self.catalog) = Some(Arc::clone(universe));
        let Some(previous) = playlist.last() else {
            return TrackSet::new(universe, true);
        };
        match acceptable(self.mode(), previous, universe) {
            Some(uids) => {
                let mut result = TrackSet::new(universe, false);
                result.unite_uids(uids);
                result
            }
            None => TrackSet::new(universe, true),
        }
    }

    fn track_matches(&self, position: usize, playlist: &[TrackPtr], _context_count: usize) -> bool {
        let Some(track) = playlist.get(position) else {
            return false;
        };
        if position == 0 {
            return true;
        }
        let previous = &playlist[position - 1];
        let catalog = lock(&self.catalog)
            .clone()
            .filter(|catalog| catalog.index_of(&track.uid).is_some())
            .unwrap_or_else(|| TrackCollection::new(playlist.iter().cloned()));
        match acceptable(self.mode(), previous, &catalog) {
            Some(uids) => uids.contains(&track.uid),
            None => true,
        }
    }

    fn invalidate(&self) {
        *lock(&self.catalog) = None;
    }
}
