use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical metadata fields understood by every source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Title,
    TitleSort,
    Artist,
    ArtistSort,
    Album,
    AlbumSort,
    AlbumArtist,
    AlbumArtistSort,
    Genre,
    Year,
    TrackNumber,
    TrackCount,
    TrackNumberAndCount,
    DiscNumber,
    DiscCount,
    DiscNumberAndCount,
    DurationMs,
    Bitrate,
    Rating,
    PlayCount,
    SkipCount,
    LastPlayed,
    LastSkipped,
    DateAdded,
    Location,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    /// `(number, count)`, either half may be missing.
    NumberPair,
    DurationMs,
    /// Seconds since the unix epoch.
    Timestamp,
}

/// The kind of backing store a view wraps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Tags,
    Database,
    Memory,
}

impl Field {
    pub const ALL: &'static [Field] = &[
        Field::Title,
        Field::TitleSort,
        Field::Artist,
        Field::ArtistSort,
        Field::Album,
        Field::AlbumSort,
        Field::AlbumArtist,
        Field::AlbumArtistSort,
        Field::Genre,
        Field::Year,
        Field::TrackNumber,
        Field::TrackCount,
        Field::TrackNumberAndCount,
        Field::DiscNumber,
        Field::DiscCount,
        Field::DiscNumberAndCount,
        Field::DurationMs,
        Field::Bitrate,
        Field::Rating,
        Field::PlayCount,
        Field::SkipCount,
        Field::LastPlayed,
        Field::LastSkipped,
        Field::DateAdded,
        Field::Location,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::TitleSort => "title_sort",
            Field::Artist => "artist",
            Field::ArtistSort => "artist_sort",
            Field::Album => "album",
            Field::AlbumSort => "album_sort",
            Field::AlbumArtist => "album_artist",
            Field::AlbumArtistSort => "album_artist_sort",
            Field::Genre => "genre",
            Field::Year => "year",
            Field::TrackNumber => "track_number",
            Field::TrackCount => "track_count",
            Field::TrackNumberAndCount => "track_number_and_count",
            Field::DiscNumber => "disc_number",
            Field::DiscCount => "disc_count",
            Field::DiscNumberAndCount => "disc_number_and_count",
            Field::DurationMs => "duration_ms",
            Field::Bitrate => "bitrate",
            Field::Rating => "rating",
            Field::PlayCount => "play_count",
            Field::SkipCount => "skip_count",
            Field::LastPlayed => "last_played",
            Field::LastSkipped => "last_skipped",
            Field::DateAdded => "date_added",
            Field::Location => "location",
        }
    }

    pub fn from_name(name: &str) -> Option<Field> {
        let name = name.trim();
        Field::ALL
            .iter()
            .copied()
            .find(|field| field.name().eq_ignore_ascii_case(name))
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Field::Year
            | Field::TrackNumber
            | Field::TrackCount
            | Field::DiscNumber
            | Field::DiscCount
            | Field::Bitrate
            | Field::Rating
            | Field::PlayCount
            | Field::SkipCount => FieldKind::Integer,
            Field::TrackNumberAndCount | Field::DiscNumberAndCount => FieldKind::NumberPair,
            Field::DurationMs => FieldKind::DurationMs,
            Field::LastPlayed | Field::LastSkipped | Field::DateAdded => FieldKind::Timestamp,
            _ => FieldKind::Text,
        }
    }

    /// Derived fields are composed from two other fields.
    pub fn is_derived(self) -> bool {
        self.pair_parts().is_some()
    }

    /// The `(number, count)` fields a pair field is composed from.
    pub fn pair_parts(self) -> Option<(Field, Field)> {
        match self {
            Field::TrackNumberAndCount => Some((Field::TrackNumber, Field::TrackCount)),
            Field::DiscNumberAndCount => Some((Field::DiscNumber, Field::DiscCount)),
            _ => None,
        }
    }

    /// The pair field this field is one half of, and whether it is the count half.
    pub fn pair_of(self) -> Option<(Field, bool)> {
        match self {
            Field::TrackNumber => Some((Field::TrackNumberAndCount, false)),
            Field::TrackCount => Some((Field::TrackNumberAndCount, true)),
            Field::DiscNumber => Some((Field::DiscNumberAndCount, false)),
            Field::DiscCount => Some((Field::DiscNumberAndCount, true)),
            _ => None,
        }
    }

    pub fn read_only_for(self, store: StoreKind) -> bool {
        match store {
            StoreKind::Memory => false,
            StoreKind::Tags => matches!(
                self,
                Field::DurationMs
                    | Field::Bitrate
                    | Field::Location
                    | Field::PlayCount
                    | Field::SkipCount
                    | Field::LastPlayed
                    | Field::LastSkipped
                    | Field::DateAdded
            ),
            StoreKind::Database => matches!(self, Field::DurationMs | Field::Bitrate),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::{Field, FieldKind, StoreKind};

    #[test]
    fn names_round_trip() {
        for field in Field::ALL {
            assert_eq!(Field::from_name(field.name()), Some(*field));
        }
        assert_eq!(Field::from_name("Album_Artist"), Some(Field::AlbumArtist));
        assert_eq!(Field::from_name("composer"), None);
    }

    #[test]
    fn pair_fields_are_derived() {
        assert!(Field::TrackNumberAndCount.is_derived());
        assert_eq!(Field::TrackNumberAndCount.kind(), FieldKind::NumberPair);
        assert_eq!(
            Field::DiscNumberAndCount.pair_parts(),
            Some((Field::DiscNumber, Field::DiscCount))
        );
        assert!(!Field::TrackNumber.is_derived());
        assert_eq!(
            Field::TrackCount.pair_of(),
            Some((Field::TrackNumberAndCount, true))
        );
    }

    #[test]
    fn audio_properties_are_read_only() {
        for store in [StoreKind::Tags, StoreKind::Database] {
            assert!(Field::Bitrate.read_only_for(store));
            assert!(Field::DurationMs.read_only_for(store));
            assert!(!Field::Title.read_only_for(store));
        }
        assert!(!Field::Bitrate.read_only_for(StoreKind::Memory));
        assert!(Field::PlayCount.read_only_for(StoreKind::Tags));
        assert!(!Field::PlayCount.read_only_for(StoreKind::Database));
    }
}
