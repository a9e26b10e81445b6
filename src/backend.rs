//! # Query backends
//!
//! Query-driven biases never scan the library themselves. They describe what
//! they want as a [`Query`] and hand it to a [`QueryBackend`], which answers
//! with the uids of all matching tracks through a callback. The callback may
//! run before `run` returns or later on another thread.
//!
//! [`MemoryBackend`] answers from a list of tracks and is what tests and the
//! CLI's JSON mode use. The SQLite backend lives in [`crate::db`].

use crate::bias::lock;
use crate::track::{Field, FieldValue, Track, TrackPtr};
use anyhow::{anyhow, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Called exactly once with the uids matching a query.
pub type QueryDone = Box<dyn FnOnce(Result<Vec<String>>) + Send>;

/// Shared handle to a backend.
pub type BackendPtr = Arc<dyn QueryBackend>;

/// Persistent store that can look up tracks.
pub trait QueryBackend: Send + Sync {
    fn run(&self, query: Query, done: QueryDone);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NumberCompare {
    Less,
    Equal,
    Greater,
}

impl NumberCompare {
    #[must_use]
    pub fn holds(self, actual: i64, wanted: i64) -> bool {
        match self {
            NumberCompare::Less => actual < wanted,
            NumberCompare::Equal => actual == wanted,
            NumberCompare::Greater => actual > wanted,
        }
    }
}

/// A lookup request. Text comparisons ignore case.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Query {
    /// `match_begin` anchors the value at the start of the field,
    /// `match_end` at its end. Both together mean equality.
    Text {
        field: Field,
        value: String,
        match_begin: bool,
        match_end: bool,
    },
    Number {
        field: Field,
        compare: NumberCompare,
        value: i64,
    },
    /// All sub queries match. Empty matches everything.
    And(Vec<Query>),
    /// Any sub query matches. Empty matches nothing.
    Or(Vec<Query>),
}

impl Query {
    #[must_use]
    pub fn contains(field: Field, value: impl Into<String>) -> Self {
        Query::Text {
            field,
            value: value.into(),
            match_begin: false,
            match_end: false,
        }
    }

    #[must_use]
    pub fn equals(field: Field, value: impl Into<String>) -> Self {
        Query::Text {
            field,
            value: value.into(),
            match_begin: true,
            match_end: true,
        }
    }

    #[must_use]
    pub fn begins_with(field: Field, value: impl Into<String>) -> Self {
        Query::Text {
            field,
            value: value.into(),
            match_begin: true,
            match_end: false,
        }
    }

    #[must_use]
    pub fn number(field: Field, compare: NumberCompare, value: i64) -> Self {
        Query::Number {
            field,
            compare,
            value,
        }
    }

    /// Evaluates the query against one track.
    #[must_use]
    pub fn matches(&self, track: &Track) -> bool {
        match self {
            Query::Text {
                field: Field::Any,
                value,
                match_begin,
                match_end,
            } => Field::SEARCHABLE.iter().any(|&field| {
                text_matches(track.value(field), value, *match_begin, *match_end)
            }),
            Query::Text {
                field,
                value,
                match_begin,
                match_end,
            } => text_matches(track.value(*field), value, *match_begin, *match_end),
            Query::Number {
                field,
                compare,
                value,
            } => match track.value(*field) {
                FieldValue::Number(actual) => compare.holds(actual, *value),
                FieldValue::Text(_) | FieldValue::Labels(_) => false,
            },
            Query::And(parts) => parts.iter().all(|part| part.matches(track)),
            Query::Or(parts) => parts.iter().any(|part| part.matches(track)),
        }
    }
}

fn text_matches(actual: FieldValue<'_>, wanted: &str, begin: bool, end: bool) -> bool {
    let wanted = wanted.to_lowercase();
    let check = |text: &str| {
        let text = text.to_lowercase();
        match (begin, end) {
            (true, true) => text == wanted,
            (true, false) => text.starts_with(&wanted),
            (false, true) => text.ends_with(&wanted),
            (false, false) => text.contains(&wanted),
        }
    };
    match actual {
        FieldValue::Text(text) => check(text),
        FieldValue::Labels(labels) => labels.iter().any(|label| check(label)),
        FieldValue::Number(number) => check(&number.to_string()),
    }
}

/// Backend answering from an in-memory track list.
///
/// An immediate backend calls back before `run` returns. A deferred one
/// queues the queries until [`MemoryBackend::flush`], which lets tests
/// observe outstanding results.
pub struct MemoryBackend {
    tracks: Vec<TrackPtr>,
    deferred: bool,
    failing: AtomicBool,
    queue: Mutex<Vec<(Query, QueryDone)>>,
    query_count: AtomicUsize,
}

impl MemoryBackend {
    #[must_use]
    pub fn new(tracks: Vec<TrackPtr>) -> Arc<Self> {
        Arc::new(Self::build(tracks, false))
    }

    #[must_use]
    pub fn deferred(tracks: Vec<TrackPtr>) -> Arc<Self> {
        Arc::new(Self::build(tracks, true))
    }

    fn build(tracks: Vec<TrackPtr>, deferred: bool) -> Self {
        Self {
            tracks,
            deferred,
            failing: AtomicBool::new(false),
            queue: Mutex::new(Vec::new()),
            query_count: AtomicUsize::new(0),
        }
    }

    /// Makes every following query fail, for exercising error paths.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Number of queries received so far.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::Relaxed)
    }

    /// Answers every queued query. Returns how many were answered.
    pub fn flush(&self) -> usize {
        let queued = std::mem::take(&mut *lock(&self.queue));
        let count = queued.len();
        for (query, done) in queued {
            done(self.evaluate(&query));
        }
        count
    }

    fn evaluate(&self, query: &Query) -> Result<Vec<String>> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(anyhow!("memory backend is set to fail"));
        }
        Ok(self
            .tracks
            .par_iter()
            .filter(|track| query.matches(track))
            .map(|track| track.uid.clone())
            .collect())
    }
}

impl QueryBackend for MemoryBackend {
    fn run(&self, query: Query, done: QueryDone) {
        self.query_count.fetch_add(1, Ordering::Relaxed);
        log::debug!("Memory backend query: {query:?}");
        if self.deferred {
            lock(&self.queue).push((query, done));
        } else {
            done(self.evaluate(&query));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn library() -> Vec<TrackPtr> {
        let mut labelled = Track::new("3").with_title("Gamma").with_year(2001);
        labelled.labels = vec!["Favourite".to_string()];
        vec![
            Track::new("1")
                .with_title("Alpha")
                .with_artist("The Band")
                .with_year(1999)
                .into_ptr(),
            Track::new("2")
                .with_title("Beta")
                .with_artist("band of two")
                .with_year(2005)
                .into_ptr(),
            labelled.into_ptr(),
        ]
    }

    fn run(backend: &MemoryBackend, query: Query) -> Vec<String> {
        let (tx, rx) = mpsc::channel();
        backend.run(
            query,
            Box::new(move |result| {
                tx.send(result).ok();
            }),
        );
        backend.flush();
        rx.recv().unwrap().unwrap()
    }

    #[test]
    fn test_text_anchors() {
        let backend = MemoryBackend::new(library());
        assert_eq!(run(&backend, Query::contains(Field::Artist, "BAND")), ["1", "2"]);
        assert_eq!(run(&backend, Query::begins_with(Field::Artist, "band")), ["2"]);
        assert_eq!(run(&backend, Query::equals(Field::Artist, "the band")), ["1"]);
    }

    #[test]
    fn test_numbers_and_labels() {
        let backend = MemoryBackend::new(library());
        let query = Query::number(Field::Year, NumberCompare::Greater, 2000);
        assert_eq!(run(&backend, query), ["2", "3"]);
        assert_eq!(run(&backend, Query::equals(Field::Label, "favourite")), ["3"]);
        // a simple search covers labels too
        assert_eq!(run(&backend, Query::contains(Field::Any, "favou")), ["3"]);
    }

    #[test]
    fn test_empty_combinations() {
        let track = Track::new("x");
        assert!(Query::And(vec![]).matches(&track));
        assert!(!Query::Or(vec![]).matches(&track));
    }

    #[test]
    fn test_deferred_backend_waits_for_flush() {
        let backend = MemoryBackend::deferred(library());
        let (tx, rx) = mpsc::channel();
        backend.run(
            Query::contains(Field::Title, "a"),
            Box::new(move |result| {
                tx.send(result.map(|uids| uids.len())).ok();
            }),
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(backend.flush(), 1);
        assert_eq!(rx.recv().unwrap().unwrap(), 3);
        assert_eq!(backend.query_count(), 1);
    }

    #[test]
    fn test_failing_backend_reports_error() {
        let backend = MemoryBackend::new(library());
        backend.set_failing(true);
        let (tx, rx) = mpsc::channel();
        backend.run(
            Query::And(vec![]),
            Box::new(move |result| {
                tx.send(result.is_err()).ok();
            }),
        );
        assert!(rx.recv().unwrap());
    }
}
