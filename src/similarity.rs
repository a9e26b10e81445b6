//! # Similar artists
//!
//! The similar-artist bias asks a [`SimilarityService`] which artists sound
//! like the ones already in the playlist. Answers are expensive to get, so
//! they are kept in a [`SimilarArtistCache`] that persists to a JSON file and
//! is keyed by the sorted list of requested artists.

use crate::bias::lock;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Called exactly once with the similar artists.
pub type SimilarDone = Box<dyn FnOnce(Result<Vec<String>>) + Send>;

/// Something that knows which artists are alike.
pub trait SimilarityService: Send + Sync {
    fn similar_artists(&self, artists: &[String], done: SimilarDone);
}

/// A fixed artist → similar artists table, usually read from a JSON object
/// of string arrays. Lookups ignore case.
#[derive(Debug, Default)]
pub struct SimilarityTable {
    similar: HashMap<String, Vec<String>>,
}

impl SimilarityTable {
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = (String, Vec<String>)>) -> Self {
        Self {
            similar: entries
                .into_iter()
                .map(|(artist, similar)| (artist.to_lowercase(), similar))
                .collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read similarity table {}", path.display()))?;
        let entries: HashMap<String, Vec<String>> = serde_json::from_str(&data)
            .with_context(|| format!("Invalid similarity table {}", path.display()))?;
        log::debug!("Loaded similar artists for {} artists.", entries.len());
        Ok(Self::new(entries))
    }

    /// Union of the similar artists of every requested artist, first seen
    /// first.
    #[must_use]
    pub fn lookup(&self, artists: &[String]) -> Vec<String> {
        let mut seen = BTreeSet::new();
        artists
            .iter()
            .filter_map(|artist| self.similar.get(&artist.to_lowercase()))
            .flatten()
            .filter(|similar| seen.insert(similar.to_lowercase()))
            .cloned()
            .collect()
    }
}

impl SimilarityService for SimilarityTable {
    fn similar_artists(&self, artists: &[String], done: SimilarDone) {
        done(Ok(self.lookup(artists)));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    similar: Vec<String>,
    /// Seconds since the epoch.
    fetched: u64,
}

/// Disk-backed cache of similarity answers.
pub struct SimilarArtistCache {
    path: Option<PathBuf>,
    max_age: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl SimilarArtistCache {
    /// A cache that is never written to disk.
    #[must_use]
    pub fn in_memory(max_age: Duration) -> Self {
        Self {
            path: None,
            max_age,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Opens the cache file at `path`. A missing file is an empty cache.
    pub fn load(path: &Path, max_age: Duration) -> Result<Self> {
        let entries = if path.exists() {
            let data = fs::read_to_string(path)
                .with_context(|| format!("Failed to read similar artist cache {}", path.display()))?;
            serde_json::from_str(&data)
                .with_context(|| format!("Corrupt similar artist cache {}", path.display()))?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            max_age,
            entries: Mutex::new(entries),
        })
    }

    /// Cache key of an artist list: sorted, lowercased, `|` separated.
    #[must_use]
    pub fn key(artists: &[String]) -> String {
        let sorted: BTreeSet<String> = artists.iter().map(|artist| artist.to_lowercase()).collect();
        sorted.into_iter().collect::<Vec<_>>().join("|")
    }

    /// The cached answer for `artists`, if there is one that has not expired.
    #[must_use]
    pub fn get(&self, artists: &[String]) -> Option<Vec<String>> {
        let now = now_secs();
        let entries = lock(&self.entries);
        let entry = entries.get(&Self::key(artists))?;
        if now.saturating_sub(entry.fetched) > self.max_age.as_secs() {
            return None;
        }
        Some(entry.similar.clone())
    }

    /// Stores an answer and writes the cache file.
    pub fn insert(&self, artists: &[String], similar: Vec<String>) {
        lock(&self.entries).insert(
            Self::key(artists),
            CacheEntry {
                similar,
                fetched: now_secs(),
            },
        );
        if let Err(e) = self.save() {
            log::warn!("Failed to save similar artist cache: {e:#}");
        }
    }

    /// Drops expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = now_secs();
        let max_age = self.max_age.as_secs();
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_sub(entry.fetched) <= max_age);
        before - entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = {
            let entries = lock(&self.entries);
            serde_json::to_string_pretty(&*entries).context("Failed to serialize similar artist cache")?
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
