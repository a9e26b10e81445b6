//! Free text search bias.
//!
//! The search string is a list of whitespace separated terms which must all
//! match:
//!
//! - `word` or `"two words"` searches every text field
//! - `artist:Davis`, `album:"Kind of Blue"` search one field
//! - `year:1959`, `year:>1990`, `rating:<5` compare numbers
//!   (lengths in seconds)

use super::simple_match::{LeafCore, DEFAULT_CACHE_TTL};
use super::{lock, Bias, BiasId, Fragment, Notifier};
use crate::backend::{BackendPtr, NumberCompare, Query};
use crate::track::{Field, TrackPtr};
use crate::track_set::{TrackCollectionPtr, TrackSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Splits a search string into terms, keeping quoted parts together.
fn terms(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in text.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    terms.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        terms.push(current);
    }
    terms
}

fn term_query(term: &str) -> Query {
    let Some((name, value)) = term.split_once(':') else {
        return Query::contains(Field::Any, term);
    };
    let field = Field::from_playlist_name(name);
    if field == Field::Any || value.is_empty() {
        return Query::contains(Field::Any, term);
    }
    if !field.is_numeric() {
        return Query::contains(field, value);
    }

    let (compare, number) = match value.as_bytes()[0] {
        b'>' => (NumberCompare::Greater, &value[1..]),
        b'<' => (NumberCompare::Less, &value[1..]),
        _ => (NumberCompare::Equal, value),
    };
    match number.trim().parse::<i64>() {
        Ok(number) => {
            let scale = if field == Field::Length { 1000 } else { 1 };
            Query::number(field, compare, number.saturating_mul(scale))
        }
        Err(_) => {
            log::debug!("Ignoring non-numeric search term `{term}'.");
            Query::And(Vec::new())
        }
    }
}

/// Parses a search string. The empty search matches everything.
#[must_use]
pub fn parse(text: &str) -> Query {
    let mut parts: Vec<Query> = terms(text).iter().map(|term| term_query(term)).collect();
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        Query::And(parts)
    }
}

/// Leaf bias matching a free text search.
pub struct SearchQueryBias {
    core: Arc<LeafCore>,
    query: Mutex<String>,
}

impl SearchQueryBias {
    pub const NAME: &'static str = "searchQueryBias";

    #[must_use]
    pub fn new(backend: BackendPtr, query: impl Into<String>) -> Arc<Self> {
        Self::with_ttl(backend, DEFAULT_CACHE_TTL, query)
    }

    #[must_use]
    pub fn with_ttl(backend: BackendPtr, ttl: Duration, query: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            core: LeafCore::new(backend, ttl),
            query: Mutex::new(query.into()),
        })
    }

    #[must_use]
    pub fn from_fragment(backend: BackendPtr, ttl: Duration, fragment: &Fragment) -> Arc<Self> {
        Self::with_ttl(backend, ttl, fragment.child_text("query").unwrap_or_default())
    }

    #[must_use]
    pub fn query(&self) -> String {
        lock(&self.query).clone()
    }

    pub fn set_query(&self, query: impl Into<String>) {
        let query = query.into();
        {
            let mut current = lock(&self.query);
            if *current == query {
                return;
            }
            *current = query;
        }
        self.core.changed();
    }
}

impl Bias for SearchQueryBias {
    fn id(&self) -> BiasId {
        self.core.id
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn describe(&self) -> String {
        format!("Search for \"{}\"", self.query())
    }

    fn to_fragment(&self) -> Fragment {
        Fragment::new(Self::NAME).with_text_child("query", self.query())
    }

    fn notifier(&self) -> &Notifier {
        &self.core.notifier
    }

    fn matching_tracks(
        &self,
        _playlist: &[TrackPtr],
        _context_count: usize,
        _final_count: usize,
        universe: &TrackCollectionPtr,
    ) -> TrackSet {
        let text = self.query();
        self.core.lookup(&text, parse(&text), universe, false)
    }

    fn track_matches(&self, position: usize, playlist: &[TrackPtr], _context_count: usize) -> bool {
        let Some(track) = playlist.get(position) else {
            return false;
        };
        let text = self.query();
        self.core
            .cached_match(&text, &track.uid)
            .unwrap_or_else(|| parse(&text).matches(track))
    }

    fn invalidate(&self) {
        self.core.invalidate();
    }
}
