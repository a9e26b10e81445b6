//! Word chain: each title (or artist, or album) starts with the character the
//! previous one ended with.

use super::simple_match::{LeafCore, DEFAULT_CACHE_TTL};
use super::{lock, Bias, BiasId, Fragment, Notifier};
use crate::backend::{BackendPtr, Query};
use crate::track::{Field, FieldValue, Track, TrackPtr};
use crate::track_set::{TrackCollectionPtr, TrackSet};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuizField {
    #[default]
    Title,
    Artist,
    Album,
}

impl QuizField {
    #[must_use]
    pub const fn field(self) -> Field {
        match self {
            QuizField::Title => Field::Title,
            QuizField::Artist => Field::Artist,
            QuizField::Album => Field::Album,
        }
    }

    /// Unknown names fall back to [`QuizField::Title`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match Field::from_playlist_name(name) {
            Field::Artist => QuizField::Artist,
            Field::Album => QuizField::Album,
            _ => QuizField::Title,
        }
    }
}

fn text(track: &Track, field: QuizField) -> &str {
    match track.value(field.field()) {
        FieldValue::Text(text) => text,
        FieldValue::Labels(_) | FieldValue::Number(_) => "",
    }
}

/// The lowercased last letter or digit of the field, if any.
fn last_char(track: &Track, field: QuizField) -> Option<char> {
    text(track, field)
        .chars()
        .rev()
        .find(|c| c.is_alphanumeric())
        .and_then(|c| c.to_lowercase().next())
}

fn starts_with(track: &Track, field: QuizField, wanted: char) -> bool {
    text(track, field)
        .chars()
        .next()
        .and_then(|c| c.to_lowercase().next())
        == Some(wanted)
}

/// Leaf bias playing a word chain on one field.
pub struct QuizPlayBias {
    core: Arc<LeafCore>,
    field: Mutex<QuizField>,
}

impl QuizPlayBias {
    pub const NAME: &'static str = "quizPlayBias";

    #[must_use]
    pub fn new(backend: BackendPtr, field: QuizField) -> Arc<Self> {
        Self::with_ttl(backend, DEFAULT_CACHE_TTL, field)
    }

    #[must_use]
    pub fn with_ttl(backend: BackendPtr, ttl: Duration, field: QuizField) -> Arc<Self> {
        Arc::new(Self {
            core: LeafCore::new(backend, ttl),
            field: Mutex::new(field),
        })
    }

    #[must_use]
    pub fn from_fragment(backend: BackendPtr, ttl: Duration, fragment: &Fragment) -> Arc<Self> {
        let field = QuizField::from_name(fragment.child_text("field").unwrap_or_default());
        Self::with_ttl(backend, ttl, field)
    }

    #[must_use]
    pub fn field(&self) -> QuizField {
        *lock(&self.field)
    }

    pub fn set_field(&self, field: QuizField) {
        {
            let mut current = lock(&self.field);
            if *current == field {
                return;
            }
            *current = field;
        }
        self.core.changed();
    }
}

impl Bias for QuizPlayBias {
    fn id(&self) -> BiasId {
        self.core.id
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn describe(&self) -> String {
        format!(
            "The {} starts with the last character of the previous one",
            self.field().field().playlist_name()
        )
    }

    fn to_fragment(&self) -> Fragment {
        Fragment::new(Self::NAME).with_text_child("field", self.field().field().playlist_name())
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
        let field = self.field();
        let Some(wanted) = playlist.last().and_then(|previous| last_char(previous, field)) else {
            return TrackSet::new(universe, true);
        };
        let key = format!("{}:{wanted}", field.field().playlist_name());
        let query = Query::begins_with(field.field(), wanted.to_string());
        self.core.lookup(&key, query, universe, false)
    }

    fn track_matches(&self, position: usize, playlist: &[TrackPtr], _context_count: usize) -> bool {
        let Some(track) = playlist.get(position) else {
            return false;
        };
        if position == 0 {
            return true;
        }
        let field = self.field();
        match last_char(&playlist[position - 1], field) {
            Some(wanted) => starts_with(track, field, wanted),
            None => true,
        }
    }

    fn invalidate(&self) {
        self.core.invalidate();
    }
}
