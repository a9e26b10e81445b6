//! Tracks whose tags satisfy a condition, e.g. `genre equals Rock` or
//! `year between 1990 and 1999`.

use super::simple_match::{LeafCore, DEFAULT_CACHE_TTL};
use super::{lock, Bias, BiasId, Fragment, Notifier};
use crate::backend::{BackendPtr, NumberCompare, Query};
use crate::track::{Field, TrackPtr};
use crate::track_set::{TrackCollectionPtr, TrackSet};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Equals,
    Contains,
    Less,
    Greater,
    Between,
    /// Date fields: at least `num_value` seconds ago.
    Older,
    /// Date fields: less than `num_value` seconds ago.
    Newer,
}

impl Condition {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Condition::Equals => "equals",
            Condition::Contains => "contains",
            Condition::Less => "less",
            Condition::Greater => "greater",
            Condition::Between => "between",
            Condition::Older => "older",
            Condition::Newer => "newer",
        }
    }

    /// Unknown names fall back to [`Condition::Equals`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "contains" => Condition::Contains,
            "less" => Condition::Less,
            "greater" => Condition::Greater,
            "between" => Condition::Between,
            "older" => Condition::Older,
            "newer" => Condition::Newer,
            _ => Condition::Equals,
        }
    }
}

/// A single tag condition.
///
/// Text fields use `value`, numeric fields `num_value` and, for
/// [`Condition::Between`], `num_value2`. Lengths are given in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaFilter {
    pub field: Field,
    pub condition: Condition,
    pub value: String,
    pub num_value: i64,
    pub num_value2: i64,
}

impl Default for MetaFilter {
    fn default() -> Self {
        Self {
            field: Field::Any,
            condition: Condition::Contains,
            value: String::new(),
            num_value: 0,
            num_value2: 0,
        }
    }
}

impl MetaFilter {
    #[must_use]
    pub fn text(field: Field, condition: Condition, value: impl Into<String>) -> Self {
        Self {
            field,
            condition,
            value: value.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn number(field: Field, condition: Condition, num_value: i64) -> Self {
        Self {
            field,
            condition,
            num_value,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn between(field: Field, low: i64, high: i64) -> Self {
        Self {
            field,
            condition: Condition::Between,
            num_value: low,
            num_value2: high,
            ..Self::default()
        }
    }

    /// The backend query for this filter. `now` is used by the relative date
    /// conditions. Conditions that make no sense for the field match nothing.
    #[must_use]
    pub fn to_query(&self, now: i64) -> Query {
        let field = self.field;
        let nothing = Query::Or(Vec::new());

        if field.is_numeric() {
            let scale = if field == Field::Length { 1000 } else { 1 };
            let (first, second) = (
                self.num_value.saturating_mul(scale),
                self.num_value2.saturating_mul(scale),
            );
            return match self.condition {
                Condition::Less => Query::number(field, NumberCompare::Less, first),
                Condition::Equals => Query::number(field, NumberCompare::Equal, first),
                Condition::Greater => Query::number(field, NumberCompare::Greater, first),
                Condition::Between => Query::And(vec![
                    Query::number(field, NumberCompare::Greater, first.min(second).saturating_sub(1)),
                    Query::number(field, NumberCompare::Less, first.max(second).saturating_add(1)),
                ]),
                Condition::Older if field.is_date() => {
                    Query::number(field, NumberCompare::Less, now.saturating_sub(self.num_value))
                }
                Condition::Newer if field.is_date() => {
                    Query::number(field, NumberCompare::Greater, now.saturating_sub(self.num_value))
                }
                _ => nothing,
            };
        }

        match self.condition {
            Condition::Equals => Query::equals(field, self.value.clone()),
            Condition::Contains => Query::contains(field, self.value.clone()),
            _ => nothing,
        }
    }

    fn write(&self, fragment: Fragment) -> Fragment {
        let fragment = fragment.with_text_child("field", self.field.playlist_name());
        let fragment = if self.field.is_numeric() {
            fragment
                .with_text_child("numValue", self.num_value)
                .with_text_child("numValue2", self.num_value2)
        } else {
            fragment.with_text_child("value", &self.value)
        };
        fragment.with_text_child("condition", self.condition.name())
    }

    fn read(fragment: &Fragment) -> Result<Self> {
        let number = |tag: &str| -> Result<i64> {
            fragment
                .child_text(tag)
                .map(|text| {
                    text.trim()
                        .parse()
                        .with_context(|| format!("Invalid {tag} `{text}'"))
                })
                .transpose()
                .map(Option::unwrap_or_default)
        };
        Ok(Self {
            field: Field::from_playlist_name(fragment.child_text("field").unwrap_or_default()),
            condition: Condition::from_name(fragment.child_text("condition").unwrap_or_default()),
            value: fragment.child_text("value").unwrap_or_default().to_string(),
            num_value: number("numValue")?,
            num_value2: number("numValue2")?,
        })
    }
}

impl fmt::Display for MetaFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = match self.field {
            Field::Any => "any tag",
            other => other.playlist_name(),
        };
        let condition = self.condition.name();
        match self.condition {
            Condition::Between => write!(
                f,
                "{field} between {} and {}",
                self.num_value, self.num_value2
            ),
            Condition::Older | Condition::Newer => {
                write!(f, "{field} {condition} than {} days", self.num_value / 86_400)
            }
            _ if self.field.is_numeric() => write!(f, "{field} {condition} {}", self.num_value),
            _ => write!(f, "{field} {condition} \"{}\"", self.value),
        }
    }
}

struct TagMatchConfig {
    filter: MetaFilter,
    invert: bool,
}

/// Leaf bias matching a [`MetaFilter`], optionally inverted.
pub struct TagMatchBias {
    core: Arc<LeafCore>,
    config: Mutex<TagMatchConfig>,
}

impl TagMatchBias {
    pub const NAME: &'static str = "tagMatchBias";

    #[must_use]
    pub fn new(backend: BackendPtr, filter: MetaFilter) -> Arc<Self> {
        Self::with_ttl(backend, DEFAULT_CACHE_TTL, filter)
    }

    #[must_use]
    pub fn with_ttl(backend: BackendPtr, ttl: Duration, filter: MetaFilter) -> Arc<Self> {
        Arc::new(Self {
            core: LeafCore::new(backend, ttl),
            config: Mutex::new(TagMatchConfig {
                filter,
                invert: false,
            }),
        })
    }

    pub fn from_fragment(backend: BackendPtr, ttl: Duration, fragment: &Fragment) -> Result<Arc<Self>> {
        let filter = MetaFilter::read(fragment)?;
        let bias = Self::with_ttl(backend, ttl, filter);
        lock(&bias.config).invert = fragment.attribute("invert").is_some_and(|v| v.trim() == "1");
        Ok(bias)
    }

    #[must_use]
    pub fn filter(&self) -> MetaFilter {
        lock(&self.config).filter.clone()
    }

    pub fn set_filter(&self, filter: MetaFilter) {
        {
            let mut config = lock(&self.config);
            if config.filter == filter {
                return;
            }
            config.filter = filter;
        }
        self.core.changed();
    }

    #[must_use]
    pub fn is_invert(&self) -> bool {
        lock(&self.config).invert
    }

    pub fn set_invert(&self, invert: bool) {
        {
            let mut config = lock(&self.config);
            if config.invert == invert {
                return;
            }
            config.invert = invert;
        }
        self.core.changed();
    }

    /// Cache key, query and invert flag of the current configuration.
    fn request(&self) -> (String, Query, bool) {
        let config = lock(&self.config);
        let filter_key = serde_json::to_string(&config.filter).unwrap_or_default();
        let key = format!("{}{filter_key}", if config.invert { "!" } else { "" });
        (key, config.filter.to_query(unix_now()), config.invert)
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

impl Bias for TagMatchBias {
    fn id(&self) -> BiasId {
        self.core.id
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn describe(&self) -> String {
        let config = lock(&self.config);
        if config.invert {
            format!("Not {}", config.filter)
        } else {
            config.filter.to_string()
        }
    }

    fn to_fragment(&self) -> Fragment {
        let config = lock(&self.config);
        let mut fragment = Fragment::new(Self::NAME);
        if config.invert {
            fragment = fragment.with_attribute("invert", 1);
        }
        config.filter.write(fragment)
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
        let (key, query, invert) = self.request();
        self.core.lookup(&key, query, universe, invert)
    }

    fn track_matches(&self, position: usize, playlist: &[TrackPtr], _context_count: usize) -> bool {
        let Some(track) = playlist.get(position) else {
            return false;
        };
        let (key, query, invert) = self.request();
        self.core
            .cached_match(&key, &track.uid)
            .unwrap_or_else(|| query.matches(track) != invert)
    }

    fn invalidate(&self) {
        self.core.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{tracks, uids, universe, Recorder};
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::track::Track;

    fn rock() -> MetaFilter {
        MetaFilter::text(Field::Genre, Condition::Equals, "Rock")
    }

    #[test]
    fn test_matching_tracks_uses_backend() {
        let backend = MemoryBackend::new(tracks());
        let bias = TagMatchBias::new(backend.clone(), rock());
        let set = bias.matching_tracks(&[], 0, 4, &universe());
        assert_eq!(uids(&set), vec!["T1", "T3"]);
        assert_eq!(bias.describe(), "genre equals \"Rock\"");
    }

    #[test]
    fn test_invert() {
        let backend = MemoryBackend::new(tracks());
        let bias = TagMatchBias::new(backend, rock());
        bias.set_invert(true);
        let set = bias.matching_tracks(&[], 0, 4, &universe());
        assert_eq!(uids(&set), vec!["T2", "T4"]);

        let playlist = tracks();
        assert!(!bias.track_matches(0, &playlist, 0));
        assert!(bias.track_matches(1, &playlist, 0));
    }

    #[test]
    fn test_outstanding_result_is_delivered_once() {
        let backend = MemoryBackend::deferred(tracks());
        let bias = TagMatchBias::new(backend.clone(), rock());
        let recorder = Recorder::attach(bias.as_ref());
        let universe = universe();

        assert!(bias.matching_tracks(&[], 0, 4, &universe).is_outstanding());
        backend.flush();
        let results = recorder.results();
        assert_eq!(results.len(), 1);
        assert_eq!(uids(&results[0]), vec!["T1", "T3"]);

        // now cached
        assert!(!bias.matching_tracks(&[], 0, 4, &universe).is_outstanding());
    }

    #[test]
    fn test_track_matches_without_cache_evaluates_locally() {
        let backend = MemoryBackend::deferred(Vec::new());
        let bias = TagMatchBias::new(backend, MetaFilter::between(Field::Year, 1995, 2015));
        let playlist = tracks();
        let matches: Vec<bool> = (0..4).map(|p| bias.track_matches(p, &playlist, 0)).collect();
        assert_eq!(matches, vec![false, true, true, false]);
        assert!(!bias.track_matches(9, &playlist, 0));
    }

    #[test]
    fn test_between_is_inclusive() {
        let query = MetaFilter::between(Field::Year, 2000, 1990).to_query(0);
        assert!(query.matches(&Track::new("a").with_year(1990)));
        assert!(query.matches(&Track::new("b").with_year(2000)));
        assert!(!query.matches(&Track::new("c").with_year(2001)));
    }

    #[test]
    fn test_length_is_given_in_seconds() {
        let mut track = Track::new("a");
        track.length_ms = 200_000;
        let filter = MetaFilter::number(Field::Length, Condition::Greater, 180);
        assert!(filter.to_query(0).matches(&track));
    }

    #[test]
    fn test_extreme_values_saturate() {
        let query = MetaFilter::number(Field::Length, Condition::Greater, i64::MAX).to_query(0);
        assert_eq!(query, Query::number(Field::Length, NumberCompare::Greater, i64::MAX));

        let query = MetaFilter::between(Field::Year, i64::MIN, i64::MAX).to_query(0);
        assert_eq!(
            query,
            Query::And(vec![
                Query::number(Field::Year, NumberCompare::Greater, i64::MIN),
                Query::number(Field::Year, NumberCompare::Less, i64::MAX),
            ])
        );
        assert!(query.matches(&Track::new("a").with_year(1990)));

        let query = MetaFilter::number(Field::LastPlayed, Condition::Older, i64::MIN).to_query(1_000);
        assert_eq!(query, Query::number(Field::LastPlayed, NumberCompare::Less, i64::MAX));
        let query = MetaFilter::number(Field::LastPlayed, Condition::Newer, i64::MAX).to_query(-1_000);
        assert_eq!(query, Query::number(Field::LastPlayed, NumberCompare::Greater, i64::MIN));
    }

    #[test]
    fn test_relative_dates() {
        let now = 1_000_000;
        let mut recent = Track::new("a");
        recent.last_played = now - 3_600;
        let day = 86_400;

        assert!(MetaFilter::number(Field::LastPlayed, Condition::Newer, day)
            .to_query(now)
            .matches(&recent));
        assert!(!MetaFilter::number(Field::LastPlayed, Condition::Older, day)
            .to_query(now)
            .matches(&recent));
        // relative conditions need a date field
        assert!(!MetaFilter::number(Field::Year, Condition::Older, 1)
            .to_query(now)
            .matches(&Track::new("b")));
    }

    #[test]
    fn test_any_field_contains_searches_everything() {
        let filter = MetaFilter::text(Field::Any, Condition::Contains, "cid");
        let playlist = tracks();
        assert!(filter.to_query(0).matches(&playlist[3]));
        assert!(!filter.to_query(0).matches(&playlist[0]));
    }

    #[test]
    fn test_fragment_round_trip() -> Result<()> {
        let backend = MemoryBackend::new(tracks());
        let bias = TagMatchBias::new(backend.clone(), MetaFilter::between(Field::Year, 1990, 1999));
        bias.set_invert(true);

        let fragment = bias.to_fragment();
        assert_eq!(fragment.attribute("invert"), Some("1"));
        assert_eq!(fragment.child_text("numValue2"), Some("1999"));
        assert_eq!(fragment.child_text("value"), None);

        let loaded = TagMatchBias::from_fragment(backend, DEFAULT_CACHE_TTL, &fragment)?;
        assert!(loaded.is_invert());
        assert_eq!(loaded.filter(), bias.filter());
        Ok(())
    }

    #[test]
    fn test_bad_number_fails_to_load() {
        let fragment = Fragment::new(TagMatchBias::NAME)
            .with_text_child("field", "year")
            .with_text_child("numValue", "nineteen")
            .with_text_child("condition", "equals");
        let backend = MemoryBackend::new(Vec::new());
        assert!(TagMatchBias::from_fragment(backend, DEFAULT_CACHE_TTL, &fragment).is_err());
    }

    #[test]
    fn test_set_filter_notifies_change() {
        let backend = MemoryBackend::new(tracks());
        let bias = TagMatchBias::new(backend, rock());
        let recorder = Recorder::attach(bias.as_ref());
        bias.set_filter(rock());
        bias.set_filter(MetaFilter::text(Field::Genre, Condition::Equals, "Jazz"));
        assert_eq!(recorder.names(), vec!["Changed"]);
    }
}
