use std::collections::HashMap;
use std::fmt;

use common::{format_duration, parse_duration, Field, Record, Value};
use serde::{Deserialize, Serialize};

const SEPARATOR: char = '|';

/// Album-wide fields of a flat tracklist.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleHeader {
    pub artist: String,
    pub album: String,
    pub year: i64,
    #[serde(default)]
    pub genre: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleRow {
    pub title: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub disc: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleTracklist {
    pub header: SimpleHeader,
    pub rows: Vec<SimpleRow>,
}

/// One fully numbered track.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackRecord {
    pub title: String,
    pub artist: String,
    pub album: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disc_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disc_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl TrackRecord {
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        let mut text = |field: Field, value: &str| {
            if !value.trim().is_empty() {
                record.insert(field, Value::text(value));
            }
        };
        text(Field::Title, &self.title);
        text(Field::Artist, &self.artist);
        text(Field::Album, &self.album);
        if let Some(value) = &self.album_artist {
            text(Field::AlbumArtist, value);
        }
        if let Some(value) = &self.genre {
            text(Field::Genre, value);
        }
        if let Some(value) = &self.location {
            text(Field::Location, value);
        }
        let numbers = [
            (Field::Year, self.year),
            (Field::TrackNumber, self.track_number),
            (Field::TrackCount, self.track_count),
            (Field::DiscNumber, self.disc_number),
            (Field::DiscCount, self.disc_count),
        ];
        for (field, value) in numbers {
            if let Some(value) = value {
                record.insert(field, Value::Integer(value));
            }
        }
        if let Some(ms) = self.duration_ms {
            record.insert(Field::DurationMs, Value::DurationMs(ms));
        }
        record
    }

    pub fn from_record(record: &Record) -> Self {
        let text = |field: Field| record.get(&field).and_then(|value| value.to_text());
        let int = |field: Field| record.get(&field).and_then(|value| value.as_int());
        Self {
            title: text(Field::Title).unwrap_or_default(),
            artist: text(Field::Artist).unwrap_or_default(),
            album: text(Field::Album).unwrap_or_default(),
            album_artist: text(Field::AlbumArtist),
            genre: text(Field::Genre),
            year: int(Field::Year),
            track_number: int(Field::TrackNumber),
            track_count: int(Field::TrackCount),
            disc_number: int(Field::DiscNumber),
            disc_count: int(Field::DiscCount),
            duration_ms: int(Field::DurationMs).and_then(|ms| u64::try_from(ms).ok()),
            location: text(Field::Location),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracklistError {
    MissingHeader,
    MissingField { line: usize, field: &'static str },
    BadDuration { line: usize, value: String },
    BadNumber { line: usize, field: &'static str, value: String },
    MissingRecordField { index: usize, field: &'static str },
}

impl fmt::Display for TracklistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracklistError::MissingHeader => write!(f, "tracklist has no header line"),
            TracklistError::MissingField { line, field } => {
                write!(f, "line {}: missing {}", line, field)
            }
            TracklistError::BadDuration { line, value } => {
                write!(f, "line {}: invalid duration {:?}", line, value)
            }
            TracklistError::BadNumber { line, field, value } => {
                write!(f, "line {}: invalid {} {:?}", line, field, value)
            }
            TracklistError::MissingRecordField { index, field } => {
                write!(f, "record {}: missing {}", index, field)
            }
        }
    }
}

impl std::error::Error for TracklistError {}

/// Number the rows of a flat tracklist.
///
/// Track numbers restart at 1 whenever the disc changes from the previous row.
pub fn augment(list: &SimpleTracklist) -> Vec<TrackRecord> {
    let mut per_disc: HashMap<Option<i64>, i64> = HashMap::new();
    for row in &list.rows {
        *per_disc.entry(row.disc).or_default() += 1;
    }
    let disc_count = list.rows.iter().filter_map(|row| row.disc).max();

    let mut records = Vec::with_capacity(list.rows.len());
    let mut previous_disc = None;
    let mut track_number = 0;
    for (index, row) in list.rows.iter().enumerate() {
        if index == 0 || row.disc != previous_disc {
            track_number = 0;
        }
        track_number += 1;
        previous_disc = row.disc;
        records.push(TrackRecord {
            title: row.title.clone(),
            artist: list.header.artist.clone(),
            album: list.header.album.clone(),
            album_artist: None,
            genre: list.header.genre.clone(),
            year: Some(list.header.year),
            track_number: Some(track_number),
            track_count: per_disc.get(&row.disc).copied(),
            disc_number: row.disc,
            disc_count,
            duration_ms: Some(row.duration_ms),
            location: None,
        });
    }
    records
}

/// Project records back onto the flat format. Durations round to whole seconds.
pub fn simplify(records: &[TrackRecord]) -> Result<SimpleTracklist, TracklistError> {
    let first = records.first().ok_or(TracklistError::MissingHeader)?;
    let header_field = |value: &str, field: &'static str| {
        let value = value.trim();
        if value.is_empty() {
            Err(TracklistError::MissingRecordField { index: 1, field })
        } else {
            Ok(value.to_string())
        }
    };
    let header = SimpleHeader {
        artist: header_field(&first.artist, "artist")?,
        album: header_field(&first.album, "album")?,
        year: first.year.ok_or(TracklistError::MissingRecordField {
            index: 1,
            field: "year",
        })?,
        genre: first.genre.clone().filter(|genre| !genre.trim().is_empty()),
    };

    let mut rows = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let duration_ms = record
            .duration_ms
            .ok_or(TracklistError::MissingRecordField {
                index: index + 1,
                field: "duration",
            })?;
        rows.push(SimpleRow {
            title: record.title.clone(),
            duration_ms: duration_ms.saturating_add(500) / 1000 * 1000,
            disc: record.disc_number,
        });
    }
    Ok(SimpleTracklist { header, rows })
}

/// Parse the text form: a header line `artist | album | year [| genre]`
/// followed by `title | m:ss [| disc]` rows. Blank lines and `#` comments are skipped.
pub fn parse_simple(text: &str) -> Result<SimpleTracklist, TracklistError> {
    let mut header = None;
    let mut rows = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if header.is_none() {
            header = Some(parse_header(line, line_no)?);
        } else {
            rows.push(parse_row(line, line_no)?);
        }
    }
    let header = header.ok_or(TracklistError::MissingHeader)?;
    Ok(SimpleTracklist { header, rows })
}

fn parse_header(line: &str, line_no: usize) -> Result<SimpleHeader, TracklistError> {
    let parts: Vec<&str> = line.split(SEPARATOR).map(str::trim).collect();
    let required = |idx: usize, field: &'static str| {
        parts
            .get(idx)
            .copied()
            .filter(|value| !value.is_empty())
            .ok_or(TracklistError::MissingField {
                line: line_no,
                field,
            })
    };
    let artist = required(0, "artist")?.to_string();
    let album = required(1, "album")?.to_string();
    let year_text = required(2, "year")?;
    let year = year_text
        .parse::<i64>()
        .map_err(|_| TracklistError::BadNumber {
            line: line_no,
            field: "year",
            value: year_text.to_string(),
        })?;
    let genre = parts
        .get(3)
        .copied()
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    Ok(SimpleHeader {
        artist,
        album,
        year,
        genre,
    })
}

fn parse_row(line: &str, line_no: usize) -> Result<SimpleRow, TracklistError> {
    let parts: Vec<&str> = line.split(SEPARATOR).map(str::trim).collect();
    if parts.len() < 2 {
        return Err(TracklistError::MissingField {
            line: line_no,
            field: "duration",
        });
    }

    // A title may itself contain the separator; the numeric columns are at the end.
    let last = parts[parts.len() - 1];
    let (title_parts, duration_text, disc) = if parts.len() >= 3 && parse_duration(last).is_none()
    {
        let disc = last
            .parse::<i64>()
            .ok()
            .filter(|disc| *disc > 0)
            .ok_or_else(|| TracklistError::BadNumber {
                line: line_no,
                field: "disc",
                value: last.to_string(),
            })?;
        (&parts[..parts.len() - 2], parts[parts.len() - 2], Some(disc))
    } else if parts.len() >= 3 && parse_duration(parts[parts.len() - 2]).is_some() {
        let disc = last.parse::<i64>().ok().filter(|disc| *disc > 0);
        match disc {
            Some(disc) if !last.contains(':') => {
                (&parts[..parts.len() - 2], parts[parts.len() - 2], Some(disc))
            }
            _ => (&parts[..parts.len() - 1], last, None),
        }
    } else {
        (&parts[..parts.len() - 1], last, None)
    };

    let title = title_parts.join(" | ");
    if title.trim().is_empty() {
        return Err(TracklistError::MissingField {
            line: line_no,
            field: "title",
        });
    }
    let duration_ms = parse_duration(duration_text).ok_or_else(|| TracklistError::BadDuration {
        line: line_no,
        value: duration_text.to_string(),
    })?;
    Ok(SimpleRow {
        title,
        duration_ms,
        disc,
    })
}

pub fn format_simple(list: &SimpleTracklist) -> String {
    let mut out = format!(
        "{} | {} | {}",
        list.header.artist, list.header.album, list.header.year
    );
    if let Some(genre) = &list.header.genre {
        out.push_str(&format!(" | {}", genre));
    }
    out.push('\n');
    for row in &list.rows {
        out.push_str(&format!("{} | {}", row.title, format_duration(row.duration_ms)));
        if let Some(disc) = row.disc {
            out.push_str(&format!(" | {}", disc));
        }
        out.push('\n');
    }
    out
}

pub fn records_from_json(text: &str) -> Result<Vec<TrackRecord>, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn records_to_json(records: &[TrackRecord]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(records)
}
