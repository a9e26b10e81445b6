//! Track metadata shared by the universe, the biases and the query backends.
//!
//! A [`Track`] is an immutable record. Everything in the engine refers to it
//! through a [`TrackPtr`] so a universe, a playlist and a cached result can
//! all point at the same record.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared handle to a track record.
pub type TrackPtr = Arc<Track>;

/// How a track and its tags are known to the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Track {
    /// Unique identifier, the only thing a [`crate::track_set::TrackSet`] stores.
    pub uid: String,
    pub url: String,
    pub title: String,
    pub artist: String,
    pub album_artist: String,
    pub album: String,
    pub genre: String,
    pub composer: String,
    pub comment: String,
    pub labels: Vec<String>,
    pub year: i64,
    pub track_number: i64,
    pub disc_number: i64,
    /// Length in milliseconds.
    pub length_ms: i64,
    pub rating: i64,
    pub score: i64,
    pub play_count: i64,
    /// Seconds since the epoch, 0 if never played.
    pub first_played: i64,
    pub last_played: i64,
    /// Seconds since the epoch the track was added to the library.
    pub create_date: i64,
}

impl Track {
    #[must_use]
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    #[must_use]
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = artist.into();
        self
    }

    /// Places the track on `album` at the given track number (disc 1).
    #[must_use]
    pub fn with_album(mut self, album: impl Into<String>, track_number: i64) -> Self {
        self.album = album.into();
        self.track_number = track_number;
        if self.disc_number == 0 {
            self.disc_number = 1;
        }
        self
    }

    #[must_use]
    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = genre.into();
        self
    }

    #[must_use]
    pub fn with_year(mut self, year: i64) -> Self {
        self.year = year;
        self
    }

    /// Wraps the record into a shared handle.
    #[must_use]
    pub fn into_ptr(self) -> TrackPtr {
        Arc::new(self)
    }

    /// The album a track belongs to, or `None` for loose tracks.
    ///
    /// Albums are told apart by album artist so two "Greatest Hits" do not
    /// collapse into one.
    #[must_use]
    pub fn album_key(&self) -> Option<(&str, &str)> {
        if self.album.is_empty() {
            None
        } else {
            Some((self.album.as_str(), self.album_artist.as_str()))
        }
    }

    /// Reads the value of `field` from this track.
    #[must_use]
    pub fn value(&self, field: Field) -> FieldValue<'_> {
        match field {
            Field::Any => FieldValue::Text(""),
            Field::Url => FieldValue::Text(&self.url),
            Field::Title => FieldValue::Text(&self.title),
            Field::Artist => FieldValue::Text(&self.artist),
            Field::AlbumArtist => FieldValue::Text(&self.album_artist),
            Field::Album => FieldValue::Text(&self.album),
            Field::Genre => FieldValue::Text(&self.genre),
            Field::Composer => FieldValue::Text(&self.composer),
            Field::Comment => FieldValue::Text(&self.comment),
            Field::Label => FieldValue::Labels(&self.labels),
            Field::Year => FieldValue::Number(self.year),
            Field::TrackNumber => FieldValue::Number(self.track_number),
            Field::DiscNumber => FieldValue::Number(self.disc_number),
            Field::Length => FieldValue::Number(self.length_ms),
            Field::Rating => FieldValue::Number(self.rating),
            Field::Score => FieldValue::Number(self.score),
            Field::PlayCount => FieldValue::Number(self.play_count),
            Field::FirstPlayed => FieldValue::Number(self.first_played),
            Field::LastPlayed => FieldValue::Number(self.last_played),
            Field::CreateDate => FieldValue::Number(self.create_date),
        }
    }
}

/// A value read from a track by [`Track::value`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Labels(&'a [String]),
    Number(i64),
}

/// Track attributes a filter can look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    /// Simple search over all text fields.
    Any,
    Url,
    Title,
    Artist,
    AlbumArtist,
    Album,
    Genre,
    Composer,
    Comment,
    Label,
    Year,
    TrackNumber,
    DiscNumber,
    Length,
    Rating,
    Score,
    PlayCount,
    FirstPlayed,
    LastPlayed,
    CreateDate,
}

impl Field {
    /// Fields a simple search ([`Field::Any`]) looks at.
    pub const SEARCHABLE: [Field; 7] = [
        Field::Artist,
        Field::Title,
        Field::Album,
        Field::Genre,
        Field::Url,
        Field::Comment,
        Field::Label,
    ];

    const ALL: [Field; 20] = [
        Field::Any,
        Field::Url,
        Field::Title,
        Field::Artist,
        Field::AlbumArtist,
        Field::Album,
        Field::Genre,
        Field::Composer,
        Field::Comment,
        Field::Label,
        Field::Year,
        Field::TrackNumber,
        Field::DiscNumber,
        Field::Length,
        Field::Rating,
        Field::Score,
        Field::PlayCount,
        Field::FirstPlayed,
        Field::LastPlayed,
        Field::CreateDate,
    ];

    /// Name used in serialized biases and in search queries.
    #[must_use]
    pub const fn playlist_name(self) -> &'static str {
        match self {
            Field::Any => "",
            Field::Url => "url",
            Field::Title => "title",
            Field::Artist => "artist",
            Field::AlbumArtist => "albumartist",
            Field::Album => "album",
            Field::Genre => "genre",
            Field::Composer => "composer",
            Field::Comment => "comment",
            Field::Label => "label",
            Field::Year => "year",
            Field::TrackNumber => "tracknumber",
            Field::DiscNumber => "discnumber",
            Field::Length => "length",
            Field::Rating => "rating",
            Field::Score => "score",
            Field::PlayCount => "playcount",
            Field::FirstPlayed => "firstplayed",
            Field::LastPlayed => "lastplayed",
            Field::CreateDate => "added",
        }
    }

    /// Inverse of [`Field::playlist_name`]. Unknown names map to [`Field::Any`].
    #[must_use]
    pub fn from_playlist_name(name: &str) -> Self {
        let name = name.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|field| field.playlist_name() == name)
            .unwrap_or(Field::Any)
    }

    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            Field::Year
                | Field::TrackNumber
                | Field::DiscNumber
                | Field::Length
                | Field::Rating
                | Field::Score
                | Field::PlayCount
                | Field::FirstPlayed
                | Field::LastPlayed
                | Field::CreateDate
        )
    }

    #[must_use]
    pub const fn is_date(self) -> bool {
        matches!(self, Field::FirstPlayed | Field::LastPlayed | Field::CreateDate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_round_trip() {
        for field in Field::ALL {
            assert_eq!(Field::from_playlist_name(field.playlist_name()), field);
        }
        assert_eq!(Field::from_playlist_name("ARTIST"), Field::Artist);
        assert_eq!(Field::from_playlist_name("nonsense"), Field::Any);
    }

    #[test]
    fn test_numeric_and_date_fields() {
        assert!(Field::Year.is_numeric());
        assert!(!Field::Year.is_date());
        assert!(Field::LastPlayed.is_numeric());
        assert!(Field::LastPlayed.is_date());
        assert!(!Field::Genre.is_numeric());
    }

    #[test]
    fn test_album_key_requires_album() {
        let loose = Track::new("a");
        assert!(loose.album_key().is_none());

        let track = Track::new("b").with_album("Kind of Blue", 2);
        assert_eq!(track.album_key(), Some(("Kind of Blue", "")));
        assert_eq!(track.disc_number, 1);
    }

    #[test]
    fn test_value_lookup() {
        let track = Track::new("c").with_artist("Miles Davis").with_year(1959);
        assert_eq!(track.value(Field::Artist), FieldValue::Text("Miles Davis"));
        assert_eq!(track.value(Field::Year), FieldValue::Number(1959));
    }
}
