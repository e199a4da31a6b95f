use std::collections::HashMap;

use common::{Field, Record, Value};
use serde::{Deserialize, Serialize};

/// Thresholds deciding whether a playlist track travels alone or with its album.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SingletonPolicy {
    /// An artist with this many tracks on the playlist is never a singleton.
    pub min_artist_tracks: usize,
    /// Discs at least this long count as complete with a few tracks missing.
    pub full_disc_min_tracks: i64,
    /// How many tracks such a disc may miss.
    pub full_disc_slack: i64,
}

impl Default for SingletonPolicy {
    fn default() -> Self {
        Self {
            min_artist_tracks: 5,
            full_disc_min_tracks: 8,
            full_disc_slack: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DiscKey {
    artist: String,
    album: String,
    disc: i64,
}

fn folded(record: &Record, field: Field) -> Option<String> {
    record
        .get(&field)
        .and_then(Value::to_text)
        .map(|text| text.trim().to_lowercase())
        .filter(|text| !text.is_empty())
}

fn number(record: &Record, field: Field) -> Option<i64> {
    record.get(&field).and_then(Value::as_int).filter(|n| *n > 0)
}

fn artist_of(record: &Record) -> Option<String> {
    folded(record, Field::Artist).or_else(|| folded(record, Field::AlbumArtist))
}

fn disc_of(record: &Record) -> Option<DiscKey> {
    let album = folded(record, Field::Album)?;
    let artist = folded(record, Field::AlbumArtist)
        .or_else(|| folded(record, Field::Artist))
        .unwrap_or_default();
    Some(DiscKey {
        artist,
        album,
        disc: number(record, Field::DiscNumber).unwrap_or(1),
    })
}

impl SingletonPolicy {
    fn disc_is_complete(&self, on_playlist: i64, track_count: Option<i64>) -> bool {
        match track_count {
            Some(total) if on_playlist >= total => true,
            Some(total) if total >= self.full_disc_min_tracks => {
                total - on_playlist <= self.full_disc_slack
            }
            _ => false,
        }
    }

    /// One flag per input record; `true` marks a singleton.
    pub fn flag(&self, records: &[Record]) -> Vec<bool> {
        let mut per_artist: HashMap<String, usize> = HashMap::new();
        let mut per_disc: HashMap<DiscKey, i64> = HashMap::new();
        for record in records {
            if let Some(artist) = artist_of(record) {
                *per_artist.entry(artist).or_insert(0) += 1;
            }
            if let Some(disc) = disc_of(record) {
                *per_disc.entry(disc).or_insert(0) += 1;
            }
        }

        records
            .iter()
            .map(|record| {
                let busy_artist = artist_of(record)
                    .and_then(|artist| per_artist.get(&artist))
                    .is_some_and(|count| *count >= self.min_artist_tracks);
                let complete_disc = disc_of(record).is_some_and(|disc| {
                    let on_playlist = per_disc.get(&disc).copied().unwrap_or(0);
                    self.disc_is_complete(on_playlist, number(record, Field::TrackCount))
                });
                !(busy_artist || complete_disc)
            })
            .collect()
    }
}

pub fn flag_singletons(records: &[Record], policy: &SingletonPolicy) -> Vec<bool> {
    policy.flag(records)
}
