use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use common::{Field, Value};
use lofty::config::WriteOptions;
use lofty::error::LoftyError;
use lofty::file::FileType;
use lofty::prelude::{AudioFile, ItemKey, TagExt, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Tag;

/// Native key for the stream duration, taken from audio properties.
pub const DURATION_KEY: &str = "Duration";
/// Native key for the audio bitrate in kbps.
pub const BITRATE_KEY: &str = "Bitrate";

/// Canonical field → native tag key, in the order fields are read.
pub const TAG_KEYS: &[(Field, &str)] = &[
    (Field::Title, "TrackTitle"),
    (Field::TitleSort, "TrackTitleSortOrder"),
    (Field::Artist, "TrackArtist"),
    (Field::ArtistSort, "TrackArtistSortOrder"),
    (Field::Album, "AlbumTitle"),
    (Field::AlbumSort, "AlbumTitleSortOrder"),
    (Field::AlbumArtist, "AlbumArtist"),
    (Field::AlbumArtistSort, "AlbumArtistSortOrder"),
    (Field::Genre, "Genre"),
    (Field::Year, "Year"),
    (Field::TrackNumber, "TrackNumber"),
    (Field::TrackCount, "TrackTotal"),
    (Field::DiscNumber, "DiscNumber"),
    (Field::DiscCount, "DiscTotal"),
    (Field::DurationMs, DURATION_KEY),
    (Field::Bitrate, BITRATE_KEY),
];

/// Raw tag contents of one audio file, keyed by native tag key.
#[derive(Debug, Default, Clone)]
pub struct NativeTags {
    pub path: PathBuf,
    pub entries: BTreeMap<String, Value>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    UnsupportedFormat(PathBuf),
    UnknownKey(String),
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
            MetadataError::UnsupportedFormat(path) => {
                write!(f, "unsupported audio format: {:?}", path)
            }
            MetadataError::UnknownKey(key) => write!(f, "unknown tag key: {}", key),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// Whether `path` has an extension some tag backend understands.
pub fn is_supported(path: &Path) -> bool {
    file_type(path).is_some()
}

fn file_type(path: &Path) -> Option<FileType> {
    let ext = path.extension()?;
    FileType::from_ext(ext)
}

pub fn read_native(path: &Path) -> Result<NativeTags, MetadataError> {
    if !is_supported(path) {
        return Err(MetadataError::UnsupportedFormat(path.to_path_buf()));
    }
    let tagged_file = Probe::open(path)?.read()?;
    let properties = tagged_file.properties();

    let mut native = NativeTags {
        path: path.to_path_buf(),
        entries: BTreeMap::new(),
    };

    let duration_ms = properties.duration().as_millis();
    if duration_ms > 0 {
        let clamped = duration_ms.min(u128::from(u64::MAX)) as u64;
        native
            .entries
            .insert(DURATION_KEY.to_string(), Value::DurationMs(clamped));
    }
    if let Some(bitrate) = properties.audio_bitrate().or(properties.overall_bitrate()) {
        native
            .entries
            .insert(BITRATE_KEY.to_string(), Value::Integer(i64::from(bitrate)));
    }

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        for (_, key) in TAG_KEYS {
            let Some(item_key) = item_key(key) else {
                continue;
            };
            let mut text = tag.get_string(&item_key);
            if text.is_none() && item_key == ItemKey::Year {
                text = tag.get_string(&ItemKey::RecordingDate);
            }
            if let Some(text) = text.map(str::trim).filter(|text| !text.is_empty()) {
                native
                    .entries
                    .insert(key.to_string(), Value::Text(text.to_string()));
            }
        }
    }

    Ok(native)
}

/// Apply one batch of native key changes and rewrite the tag once.
///
/// `None` removes the key. Every key is validated before the file is touched.
pub fn write_native(
    path: &Path,
    changes: &[(String, Option<Value>)],
) -> Result<(), MetadataError> {
    let Some(file_type) = file_type(path) else {
        return Err(MetadataError::UnsupportedFormat(path.to_path_buf()));
    };
    let mut planned = Vec::with_capacity(changes.len());
    for (key, value) in changes {
        let item_key = item_key(key).ok_or_else(|| MetadataError::UnknownKey(key.clone()))?;
        planned.push((item_key, value.as_ref().and_then(Value::to_text)));
    }
    if planned.is_empty() {
        return Ok(());
    }

    let mut tagged_file = Probe::open(path)?.read()?;
    if tagged_file.primary_tag().is_none() {
        tagged_file.insert_tag(Tag::new(file_type.primary_tag_type()));
    }
    let Some(tag) = tagged_file.primary_tag_mut() else {
        return Err(MetadataError::UnsupportedFormat(path.to_path_buf()));
    };

    for (item_key, text) in planned {
        match text {
            Some(text) if !text.trim().is_empty() => {
                tag.insert_text(item_key, text);
            }
            _ => tag.remove_key(&item_key),
        }
    }

    tag.save_to_path(path, WriteOptions::default())?;
    Ok(())
}

fn item_key(native: &str) -> Option<ItemKey> {
    let key = match native {
        "TrackTitle" => ItemKey::TrackTitle,
        "TrackTitleSortOrder" => ItemKey::TrackTitleSortOrder,
        "TrackArtist" => ItemKey::TrackArtist,
        "TrackArtistSortOrder" => ItemKey::TrackArtistSortOrder,
        "AlbumTitle" => ItemKey::AlbumTitle,
        "AlbumTitleSortOrder" => ItemKey::AlbumTitleSortOrder,
        "AlbumArtist" => ItemKey::AlbumArtist,
        "AlbumArtistSortOrder" => ItemKey::AlbumArtistSortOrder,
        "Genre" => ItemKey::Genre,
        "Year" => ItemKey::Year,
        "TrackNumber" => ItemKey::TrackNumber,
        "TrackTotal" => ItemKey::TrackTotal,
        "DiscNumber" => ItemKey::DiscNumber,
        "DiscTotal" => ItemKey::DiscTotal,
        _ => return None,
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use common::Value;

    use super::{is_supported, item_key, read_native, write_native, MetadataError, TAG_KEYS};

    #[test]
    fn rejects_unknown_extensions() {
        assert!(!is_supported(Path::new("/music/cover.jpg")));
        assert!(!is_supported(Path::new("/music/noext")));
        assert!(is_supported(Path::new("/music/song.mp3")));
        assert!(is_supported(Path::new("/music/song.FLAC")));
        let err = read_native(Path::new("/music/notes.txt")).unwrap_err();
        assert!(matches!(err, MetadataError::UnsupportedFormat(_)));
    }

    #[test]
    fn property_keys_are_not_writable() {
        let err = write_native(
            Path::new("/music/song.mp3"),
            &[("Duration".to_string(), Some(Value::DurationMs(1)))],
        )
        .unwrap_err();
        assert!(matches!(err, MetadataError::UnknownKey(_)));
    }

    #[test]
    fn every_tag_key_maps_to_an_item_key() {
        for (_, key) in TAG_KEYS {
            if *key == super::DURATION_KEY || *key == super::BITRATE_KEY {
                assert!(item_key(key).is_none());
            } else {
                assert!(item_key(key).is_some(), "{key}");
            }
        }
    }
}
