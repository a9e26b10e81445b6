//! # Library database
//!
//! The track library lives in a SQLite database with two tables:
//!
//! - `tracks`: one row per track, keyed by `uid`
//! - `labels`: `(uid, label)` pairs
//!
//! [`SqliteBackend`] implements [`QueryBackend`] on top of it by translating
//! a [`Query`] into a `WHERE` clause. It can answer on the calling thread or
//! hand the work to the rayon pool.

use crate::backend::{NumberCompare, Query, QueryBackend, QueryDone};
use crate::bias::lock;
use crate::track::{Field, Track};
use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

const TRACK_COLUMNS: &str = "uid, url, title, artist, album_artist, album, genre, composer, \
     comment, year, track_number, disc_number, length_ms, rating, score, play_count, \
     first_played, last_played, create_date";

/// Opens (and creates if needed) the library database at `path`.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open library database at {}", path.display()))?;
    init(&conn)?;
    Ok(conn)
}

/// Creates the tables if they do not exist yet.
pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tracks (
            uid           TEXT PRIMARY KEY,
            url           TEXT NOT NULL DEFAULT '',
            title         TEXT NOT NULL DEFAULT '',
            artist        TEXT NOT NULL DEFAULT '',
            album_artist  TEXT NOT NULL DEFAULT '',
            album         TEXT NOT NULL DEFAULT '',
            genre         TEXT NOT NULL DEFAULT '',
            composer      TEXT NOT NULL DEFAULT '',
            comment       TEXT NOT NULL DEFAULT '',
            year          INTEGER NOT NULL DEFAULT 0,
            track_number  INTEGER NOT NULL DEFAULT 0,
            disc_number   INTEGER NOT NULL DEFAULT 0,
            length_ms     INTEGER NOT NULL DEFAULT 0,
            rating        INTEGER NOT NULL DEFAULT 0,
            score         INTEGER NOT NULL DEFAULT 0,
            play_count    INTEGER NOT NULL DEFAULT 0,
            first_played  INTEGER NOT NULL DEFAULT 0,
            last_played   INTEGER NOT NULL DEFAULT 0,
            create_date   INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS labels (
            uid   TEXT NOT NULL,
            label TEXT NOT NULL,
            PRIMARY KEY (uid, label)
        );
        CREATE INDEX IF NOT EXISTS idx_tracks_artist ON tracks(artist);
        CREATE INDEX IF NOT EXISTS idx_labels_label ON labels(label);",
    )
    .context("Failed to create library tables")?;
    Ok(())
}

/// Inserts or updates `tracks` in one transaction. Returns the number of
/// tracks written.
pub fn import_tracks(conn: &mut Connection, tracks: &[Track]) -> Result<usize> {
    let tx = conn.transaction()?;

    {
        let mut insert = tx.prepare(&format!(
            "INSERT OR REPLACE INTO tracks ({TRACK_COLUMNS}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
        ))?;
        let mut clear_labels = tx.prepare("DELETE FROM labels WHERE uid = ?1")?;
        let mut insert_label = tx.prepare("INSERT OR IGNORE INTO labels (uid, label) VALUES (?1, ?2)")?;

        for track in tracks {
            insert
                .execute(params![
                    track.uid,
                    track.url,
                    track.title,
                    track.artist,
                    track.album_artist,
                    track.album,
                    track.genre,
                    track.composer,
                    track.comment,
                    track.year,
                    track.track_number,
                    track.disc_number,
                    track.length_ms,
                    track.rating,
                    track.score,
                    track.play_count,
                    track.first_played,
                    track.last_played,
                    track.create_date,
                ])
                .with_context(|| format!("Failed to insert track `{}'", track.uid))?;
            clear_labels.execute([&track.uid])?;
            for label in &track.labels {
                insert_label.execute([&track.uid, label])?;
            }
        }
    }

    tx.commit().context("Failed to commit track import")?;
    log::info!("Imported {} tracks.", tracks.len());
    Ok(tracks.len())
}

/// Reads the whole library, ordered by uid.
pub fn load_tracks(conn: &Connection) -> Result<Vec<Track>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {TRACK_COLUMNS} FROM tracks ORDER BY uid"))
        .context("Failed to prepare track query")?;
    let mut tracks = stmt
        .query_map([], |row| {
            Ok(Track {
                uid: row.get(0)?,
                url: row.get(1)?,
                title: row.get(2)?,
                artist: row.get(3)?,
                album_artist: row.get(4)?,
                album: row.get(5)?,
                genre: row.get(6)?,
                composer: row.get(7)?,
                comment: row.get(8)?,
                labels: Vec::new(),
                year: row.get(9)?,
                track_number: row.get(10)?,
                disc_number: row.get(11)?,
                length_ms: row.get(12)?,
                rating: row.get(13)?,
                score: row.get(14)?,
                play_count: row.get(15)?,
                first_played: row.get(16)?,
                last_played: row.get(17)?,
                create_date: row.get(18)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read tracks")?;

    let mut stmt = conn.prepare("SELECT uid, label FROM labels ORDER BY uid, label")?;
    let labels = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (uid, label) in labels {
        if let Ok(index) = tracks.binary_search_by(|track| track.uid.as_str().cmp(&uid)) {
            tracks[index].labels.push(label);
        }
    }

    log::debug!("Loaded {} tracks from the library.", tracks.len());
    Ok(tracks)
}

pub fn track_count(conn: &Connection) -> Result<usize> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))
        .context("Failed to count tracks")?;
    Ok(usize::try_from(count).unwrap_or(0))
}

/// Reads tracks from a JSON array of track records.
pub fn read_json(path: &Path) -> Result<Vec<Track>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("Invalid track list in {}", path.display()))
}

/// Translates a query into a `WHERE` clause plus its parameters.
fn to_sql(query: &Query, params: &mut Vec<Value>) -> String {
    match query {
        Query::Text {
            field: Field::Any,
            value,
            match_begin,
            match_end,
        } => {
            let parts: Vec<String> = Field::SEARCHABLE
                .iter()
                .map(|&field| text_sql(field, value, *match_begin, *match_end, params))
                .collect();
            format!("({})", parts.join(" OR "))
        }
        Query::Text {
            field,
            value,
            match_begin,
            match_end,
        } => text_sql(*field, value, *match_begin, *match_end, params),
        Query::Number {
            field,
            compare,
            value,
        } => match column(*field) {
            Some(column) if field.is_numeric() => {
                params.push(Value::Integer(*value));
                let op = match compare {
                    NumberCompare::Less => "<",
                    NumberCompare::Equal => "=",
                    NumberCompare::Greater => ">",
                };
                format!("{column} {op} ?")
            }
            _ => "0".to_string(),
        },
        Query::And(parts) if parts.is_empty() => "1".to_string(),
        Query::Or(parts) if parts.is_empty() => "0".to_string(),
        Query::And(parts) => join_sql(parts, " AND ", params),
        Query::Or(parts) => join_sql(parts, " OR ", params),
    }
}

fn join_sql(parts: &[Query], separator: &str, params: &mut Vec<Value>) -> String {
    let parts: Vec<String> = parts.iter().map(|part| to_sql(part, params)).collect();
    format!("({})", parts.join(separator))
}

fn text_sql(field: Field, value: &str, begin: bool, end: bool, params: &mut Vec<Value>) -> String {
    let value = value.to_lowercase();
    let condition = |target: &str, params: &mut Vec<Value>| {
        if begin && end {
            params.push(Value::Text(value.clone()));
            format!("lower({target}) = ?")
        } else {
            let escaped = value
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            let pattern = format!(
                "{}{escaped}{}",
                if begin { "" } else { "%" },
                if end { "" } else { "%" }
            );
            params.push(Value::Text(pattern));
            format!("lower({target}) LIKE ? ESCAPE '\\'")
        }
    };

    if field == Field::Label {
        let inner = condition("l.label", params);
        return format!("EXISTS (SELECT 1 FROM labels l WHERE l.uid = tracks.uid AND {inner})");
    }
    match column(field) {
        Some(column) => condition(column, params),
        None => "0".to_string(),
    }
}

fn column(field: Field) -> Option<&'static str> {
    Some(match field {
        Field::Any | Field::Label => return None,
        Field::Url => "url",
        Field::Title => "title",
        Field::Artist => "artist",
        Field::AlbumArtist => "album_artist",
        Field::Album => "album",
        Field::Genre => "genre",
        Field::Composer => "composer",
        Field::Comment => "comment",
        Field::Year => "year",
        Field::TrackNumber => "track_number",
        Field::DiscNumber => "disc_number",
        Field::Length => "length_ms",
        Field::Rating => "rating",
        Field::Score => "score",
        Field::PlayCount => "play_count",
        Field::FirstPlayed => "first_played",
        Field::LastPlayed => "last_played",
        Field::CreateDate => "create_date",
    })
}

/// Runs `query` against the library and returns the matching uids.
pub fn find_uids(conn: &Connection, query: &Query) -> Result<Vec<String>> {
    let mut params = Vec::new();
    let clause = to_sql(query, &mut params);
    let sql = format!("SELECT uid FROM tracks WHERE {clause} ORDER BY uid");
    log::trace!("Library query: {sql}");
    let mut stmt = conn
        .prepare(&sql)
        .with_context(|| format!("Invalid library query `{sql}'"))?;
    let uids = stmt
        .query_map(rusqlite::params_from_iter(params), |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(uids)
}

/// [`QueryBackend`] over the library database.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    background: bool,
}

impl SqliteBackend {
    /// Answers every query before `run` returns.
    #[must_use]
    pub fn new(conn: Connection) -> Arc<Self> {
        Arc::new(Self {
            conn: Arc::new(Mutex::new(conn)),
            background: false,
        })
    }

    /// Answers queries on the rayon pool.
    #[must_use]
    pub fn background(conn: Connection) -> Arc<Self> {
        Arc::new(Self {
            conn: Arc::new(Mutex::new(conn)),
            background: true,
        })
    }
}

impl QueryBackend for SqliteBackend {
    fn run(&self, query: Query, done: QueryDone) {
        if self.background {
            let conn = Arc::clone(&self.conn);
            rayon::spawn(move || {
                let result = find_uids(&lock(&conn), &query);
                done(result);
            });
        } else {
            let result = find_uids(&lock(&self.conn), &query);
            done(result);
        }
    }
}
