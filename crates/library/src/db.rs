//! Media-player database access.
//!
//! The schema follows the layout of common desktop players: tracks live in
//! `CoreTracks` and point at `CoreArtists` / `CoreAlbums`. Artist, album and
//! album artist are read through joins, so track views expose them read-only.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use common::{Field, Record, StoreKind, Value};
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::view::{Backend, KeyMap, MetadataView, NativeChanges};
use crate::LibraryError;

/// `CoreTracks` columns a track view reads and writes.
const TRACK_COLUMNS: &[(Field, &str)] = &[
    (Field::Title, "Title"),
    (Field::TitleSort, "TitleSort"),
    (Field::Genre, "Genre"),
    (Field::Year, "Year"),
    (Field::TrackNumber, "TrackNumber"),
    (Field::TrackCount, "TrackCount"),
    (Field::DiscNumber, "Disc"),
    (Field::DiscCount, "DiscCount"),
    (Field::DurationMs, "Duration"),
    (Field::Bitrate, "BitRate"),
    (Field::Rating, "Rating"),
    (Field::PlayCount, "PlayCount"),
    (Field::SkipCount, "SkipCount"),
    (Field::LastPlayed, "LastPlayedStamp"),
    (Field::LastSkipped, "LastSkippedStamp"),
    (Field::DateAdded, "DateAddedStamp"),
    (Field::Location, "Uri"),
];

/// Columns that come from joined tables.
const JOINED_COLUMNS: &[(Field, &str)] = &[
    (Field::Artist, "ArtistName"),
    (Field::Album, "AlbumTitle"),
    (Field::AlbumArtist, "AlbumArtistName"),
];

/// Numeric columns where 0 means "unknown".
const ZERO_IS_MISSING: &[Field] = &[
    Field::Year,
    Field::TrackNumber,
    Field::TrackCount,
    Field::DiscNumber,
    Field::DiscCount,
    Field::DurationMs,
    Field::Bitrate,
    Field::LastPlayed,
    Field::LastSkipped,
    Field::DateAdded,
];

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS CoreArtists (
    ArtistID INTEGER PRIMARY KEY,
    Name TEXT
);

CREATE TABLE IF NOT EXISTS CoreAlbums (
    AlbumID INTEGER PRIMARY KEY,
    ArtistID INTEGER,
    Title TEXT,
    ArtistName TEXT
);

CREATE TABLE IF NOT EXISTS CoreTracks (
    TrackID INTEGER PRIMARY KEY,
    ArtistID INTEGER,
    AlbumID INTEGER,
    Uri TEXT,
    Title TEXT,
    TitleSort TEXT,
    Genre TEXT,
    Year INTEGER DEFAULT 0,
    TrackNumber INTEGER DEFAULT 0,
    TrackCount INTEGER DEFAULT 0,
    Disc INTEGER DEFAULT 0,
    DiscCount INTEGER DEFAULT 0,
    Duration INTEGER DEFAULT 0,
    BitRate INTEGER DEFAULT 0,
    Rating INTEGER DEFAULT 0,
    PlayCount INTEGER DEFAULT 0,
    SkipCount INTEGER DEFAULT 0,
    LastPlayedStamp INTEGER,
    LastSkippedStamp INTEGER,
    DateAddedStamp INTEGER
);

CREATE INDEX IF NOT EXISTS CoreTracksUriIndex ON CoreTracks(Uri);
CREATE INDEX IF NOT EXISTS CoreTracksAlbumIndex ON CoreTracks(AlbumID);
"#;

const SELECT_TRACKS: &str = r#"
SELECT t.TrackID, t.Title, t.TitleSort, t.Genre, t.Year, t.TrackNumber, t.TrackCount,
       t.Disc, t.DiscCount, t.Duration, t.BitRate, t.Rating, t.PlayCount, t.SkipCount,
       t.LastPlayedStamp, t.LastSkippedStamp, t.DateAddedStamp, t.Uri,
       ar.Name AS ArtistName, al.Title AS AlbumTitle, al.ArtistName AS AlbumArtistName
FROM CoreTracks t
LEFT JOIN CoreArtists ar ON ar.ArtistID = t.ArtistID
LEFT JOIN CoreAlbums al ON al.AlbumID = t.AlbumID
"#;

/// Explicit handle on one player database; cheap to clone.
#[derive(Clone)]
pub struct PlayerDb {
    conn: Arc<Mutex<Connection>>,
}

impl PlayerDb {
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        let conn = Connection::open(path)?;
        info!("Opened player database {:?}", path);
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, LibraryError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn create_schema(&self) -> Result<(), LibraryError> {
        self.conn.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Exactly one track; anything else is an error rather than a guess.
    pub fn track_by_id(&self, track_id: i64) -> Result<MetadataView, LibraryError> {
        let mut views = self.query("WHERE t.TrackID = ?1", vec![SqlValue::Integer(track_id)])?;
        let label = format!("TrackID {}", track_id);
        match views.len() {
            0 => Err(LibraryError::NoRowsFound(label)),
            1 => Ok(views.remove(0)),
            _ => Err(LibraryError::MultipleRowsFound(label)),
        }
    }

    pub fn find_by_location(&self, location: &str) -> Result<Option<MetadataView>, LibraryError> {
        let views = self.query("WHERE t.Uri = ?1", vec![SqlValue::Text(location.to_string())])?;
        at_most_one(views, format!("Uri {}", location))
    }

    /// Case-insensitive lookup by artist, album and title.
    pub fn find_by_names(
        &self,
        artist: &str,
        album: &str,
        title: &str,
    ) -> Result<Option<MetadataView>, LibraryError> {
        let views = self.query(
            "WHERE lower(ar.Name) = lower(?1) AND lower(al.Title) = lower(?2) \
             AND lower(t.Title) = lower(?3)",
            vec![
                SqlValue::Text(artist.to_string()),
                SqlValue::Text(album.to_string()),
                SqlValue::Text(title.to_string()),
            ],
        )?;
        at_most_one(views, format!("{} / {} / {}", artist, album, title))
    }

    pub fn all_tracks(&self) -> Result<Vec<MetadataView>, LibraryError> {
        self.query("ORDER BY t.TrackID", Vec::new())
    }

    pub fn album_tracks(&self, album_id: i64) -> Result<Vec<MetadataView>, LibraryError> {
        self.query(
            "WHERE t.AlbumID = ?1 ORDER BY t.Disc, t.TrackNumber",
            vec![SqlValue::Integer(album_id)],
        )
    }

    pub fn album_id_of(&self, track_id: i64) -> Result<Option<i64>, LibraryError> {
        let conn = self.conn.lock();
        let album_id = conn
            .query_row(
                "SELECT AlbumID FROM CoreTracks WHERE TrackID = ?1",
                [track_id],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?;
        Ok(album_id.flatten())
    }

    /// Insert a track, creating its artist and album rows when needed.
    pub fn add_track(&self, record: &Record) -> Result<i64, LibraryError> {
        let conn = self.conn.lock();
        let text = |field: Field| record.get(&field).and_then(Value::to_text);

        let artist_id = match text(Field::Artist) {
            Some(name) => Some(ensure_artist(&conn, &name)?),
            None => None,
        };
        let album_id = match text(Field::Album) {
            Some(title) => {
                let album_artist = text(Field::AlbumArtist).or_else(|| text(Field::Artist));
                Some(ensure_album(&conn, &title, album_artist.as_deref(), artist_id)?)
            }
            None => None,
        };

        let mut columns = vec!["ArtistID", "AlbumID"];
        let mut values = vec![optional_id(artist_id), optional_id(album_id)];
        for (field, column) in TRACK_COLUMNS {
            if let Some(value) = record.get(field) {
                columns.push(column);
                values.push(to_sql(Some(value)));
            }
        }
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO CoreTracks ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );
        conn.execute(&sql, params_from_iter(values))?;
        Ok(conn.last_insert_rowid())
    }

    fn query(&self, clause: &str, params: Vec<SqlValue>) -> Result<Vec<MetadataView>, LibraryError> {
        let rows = {
            let conn = self.conn.lock();
            let sql = format!("{} {}", SELECT_TRACKS, clause);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params), read_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        debug!("Player database returned {} row(s)", rows.len());
        Ok(rows
            .into_iter()
            .map(|(track_id, entries)| self.view(track_id, entries))
            .collect())
    }

    fn view(&self, track_id: i64, entries: BTreeMap<String, Value>) -> MetadataView {
        let backend = RowBackend {
            conn: Arc::clone(&self.conn),
            track_id,
        };
        MetadataView::new(StoreKind::Database, row_key_map(), entries, Box::new(backend))
            .with_read_only(JOINED_COLUMNS.iter().map(|(field, _)| *field))
    }
}

fn at_most_one(
    mut views: Vec<MetadataView>,
    label: String,
) -> Result<Option<MetadataView>, LibraryError> {
    match views.len() {
        0 => Ok(None),
        1 => Ok(views.pop()),
        _ => Err(LibraryError::MultipleRowsFound(label)),
    }
}

pub fn row_key_map() -> KeyMap {
    KeyMap::from_pairs(TRACK_COLUMNS.iter().chain(JOINED_COLUMNS).copied())
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<(i64, BTreeMap<String, Value>)> {
    let track_id: i64 = row.get("TrackID")?;
    let mut entries = BTreeMap::new();
    for (field, column) in TRACK_COLUMNS.iter().chain(JOINED_COLUMNS) {
        let value = match row.get_ref(*column)? {
            ValueRef::Null => continue,
            ValueRef::Integer(0) if ZERO_IS_MISSING.contains(field) => continue,
            ValueRef::Integer(n) => Value::Integer(n),
            ValueRef::Real(x) => Value::Integer(x.round() as i64),
            ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).to_string()),
            ValueRef::Blob(_) => continue,
        };
        entries.insert(column.to_string(), value);
    }
    Ok((track_id, entries))
}

fn to_sql(value: Option<&Value>) -> SqlValue {
    match value {
        None => SqlValue::Null,
        Some(Value::Text(text)) => SqlValue::Text(text.clone()),
        Some(Value::Integer(n)) | Some(Value::Timestamp(n)) => SqlValue::Integer(*n),
        Some(Value::DurationMs(ms)) => SqlValue::Integer(i64::try_from(*ms).unwrap_or(i64::MAX)),
        Some(pair @ Value::Pair(..)) => match pair.to_text() {
            Some(text) => SqlValue::Text(text),
            None => SqlValue::Null,
        },
    }
}

fn optional_id(id: Option<i64>) -> SqlValue {
    id.map(SqlValue::Integer).unwrap_or(SqlValue::Null)
}

fn ensure_artist(conn: &Connection, name: &str) -> Result<i64, LibraryError> {
    let existing = conn
        .query_row(
            "SELECT ArtistID FROM CoreArtists WHERE Name = ?1",
            [name],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    conn.execute("INSERT INTO CoreArtists (Name) VALUES (?1)", [name])?;
    Ok(conn.last_insert_rowid())
}

fn ensure_album(
    conn: &Connection,
    title: &str,
    artist_name: Option<&str>,
    artist_id: Option<i64>,
) -> Result<i64, LibraryError> {
    let existing = conn
        .query_row(
            "SELECT AlbumID FROM CoreAlbums WHERE Title = ?1 AND ArtistName IS ?2",
            rusqlite::params![title, artist_name],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO CoreAlbums (Title, ArtistName, ArtistID) VALUES (?1, ?2, ?3)",
        rusqlite::params![title, artist_name, artist_id],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Writes changes to one `CoreTracks` row.
pub struct RowBackend {
    conn: Arc<Mutex<Connection>>,
    track_id: i64,
}

impl Backend for RowBackend {
    fn commit(&mut self, changes: &NativeChanges) -> Result<(), LibraryError> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut assignments = Vec::with_capacity(changes.len());
        let mut values = Vec::with_capacity(changes.len() + 1);
        for (idx, (column, value)) in changes.iter().enumerate() {
            if !TRACK_COLUMNS.iter().any(|(_, known)| known == column) {
                return Err(LibraryError::Backend(format!(
                    "column {} cannot be written",
                    column
                )));
            }
            assignments.push(format!("{} = ?{}", column, idx + 1));
            values.push(to_sql(value.as_ref()));
        }
        values.push(SqlValue::Integer(self.track_id));
        let sql = format!(
            "UPDATE CoreTracks SET {} WHERE TrackID = ?{}",
            assignments.join(", "),
            values.len()
        );

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let updated = tx.execute(&sql, params_from_iter(values))?;
        if updated != 1 {
            return Err(LibraryError::NoRowsFound(format!("TrackID {}", self.track_id)));
        }
        tx.commit()?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("CoreTracks row {}", self.track_id)
    }
}

#[cfg(test)]
mod tests {
    use common::{Field, Record, Value};

    use super::PlayerDb;
    use crate::LibraryError;

    fn record(title: &str, artist: &str, album: &str, number: i64) -> Record {
        let mut record = Record::new();
        record.insert(Field::Title, Value::text(title));
        record.insert(Field::Artist, Value::text(artist));
        record.insert(Field::Album, Value::text(album));
        record.insert(Field::TrackNumber, Value::Integer(number));
        record.insert(Field::DurationMs, Value::DurationMs(185_000));
        record.insert(
            Field::Location,
            Value::text(format!("file:///music/{}/{:02}.mp3", album, number)),
        );
        record
    }

    fn seeded() -> (PlayerDb, i64) {
        let db = PlayerDb::open_in_memory().unwrap();
        db.create_schema().unwrap();
        let id = db.add_track(&record("Song", "Band", "Record", 1)).unwrap();
        db.add_track(&record("Other", "Band", "Record", 2)).unwrap();
        (db, id)
    }

    #[test]
    fn reads_joined_rows() {
        let (db, id) = seeded();
        let view = db.track_by_id(id).unwrap();
        assert_eq!(view.get(Field::Title), Some(Value::text("Song")));
        assert_eq!(view.get(Field::Artist), Some(Value::text("Band")));
        assert_eq!(view.get(Field::AlbumArtist), Some(Value::text("Band")));
        assert_eq!(view.get(Field::DurationMs), Some(Value::DurationMs(185_000)));
        assert_eq!(view.get(Field::DiscNumber), None);
        assert_eq!(
            view.get(Field::TrackNumberAndCount),
            Some(Value::Pair(Some(1), None))
        );
    }

    #[test]
    fn identity_lookups_never_guess() {
        let (db, _) = seeded();
        assert!(matches!(db.track_by_id(999), Err(LibraryError::NoRowsFound(_))));

        db.add_track(&record("Song", "Band", "Record", 7)).unwrap();
        assert!(matches!(
            db.find_by_names("band", "record", "song"),
            Err(LibraryError::MultipleRowsFound(_))
        ));
        assert!(db.find_by_names("Band", "Record", "Missing").unwrap().is_none());
    }

    #[test]
    fn finds_tracks_by_location() {
        let (db, id) = seeded();
        let view = db
            .find_by_location("file:///music/Record/01.mp3")
            .unwrap()
            .unwrap();
        assert_eq!(view.get_text(Field::Title).as_deref(), Some("Song"));
        assert!(db.find_by_location("file:///elsewhere.mp3").unwrap().is_none());

        let album = db.album_id_of(id).unwrap().unwrap();
        let titles: Vec<String> = db
            .album_tracks(album)
            .unwrap()
            .iter()
            .filter_map(|v| v.get_text(Field::Title))
            .collect();
        assert_eq!(titles, vec!["Song", "Other"]);
        assert_eq!(db.all_tracks().unwrap().len(), 2);
    }

    #[test]
    fn joined_album_is_read_only() {
        let (db, id) = seeded();
        let mut view = db.track_by_id(id).unwrap();
        let err = view.set(Field::Album, "X").unwrap_err();
        assert!(matches!(err, LibraryError::ReadOnlyField(Field::Album)));
        assert_eq!(view.get(Field::Album), Some(Value::text("Record")));
        assert_eq!(view.staged().get(&Field::Album), Some(&Value::text("Record")));
        assert!(view.changes().is_empty());
    }

    #[test]
    fn saves_in_one_update() {
        let (db, id) = seeded();
        let mut view = db.track_by_id(id).unwrap();
        view.set(Field::Title, "Renamed").unwrap();
        view.set(Field::DiscNumberAndCount, Value::text("1/2")).unwrap();
        assert!(view.save().unwrap());
        assert!(view.changes().is_empty());

        let fresh = db.track_by_id(id).unwrap();
        assert_eq!(fresh.get_text(Field::Title).as_deref(), Some("Renamed"));
        assert_eq!(fresh.get_int(Field::DiscNumber), Some(1));
        assert_eq!(fresh.get_int(Field::DiscCount), Some(2));
    }

    #[test]
    fn failed_update_keeps_changes_staged() {
        let dir = tempfile::tempdir().unwrap();
        let db = PlayerDb::open(&dir.path().join("player.db")).unwrap();
        db.create_schema().unwrap();
        let id = db.add_track(&record("Song", "Band", "Record", 1)).unwrap();
        let mut view = db.track_by_id(id).unwrap();
        db.conn
            .lock()
            .execute("DELETE FROM CoreTracks WHERE TrackID = ?1", [id])
            .unwrap();

        view.set(Field::Genre, "Jazz").unwrap();
        assert!(matches!(view.save(), Err(LibraryError::NoRowsFound(_))));
        assert_eq!(
            view.changes().get(&Field::Genre),
            Some(&Some(Value::text("Jazz")))
        );
    }
}
