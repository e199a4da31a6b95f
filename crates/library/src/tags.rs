use std::path::{Path, PathBuf};

use common::{location_from_path, Field, StoreKind, Value};
use metadata::{read_native, write_native, NativeTags, TAG_KEYS};

use crate::view::{Backend, KeyMap, MetadataView, NativeChanges};
use crate::LibraryError;

/// Native key holding the file's location; derived from the path, never written.
pub const LOCATION_KEY: &str = "Location";

/// Writes tag changes back into one audio file.
pub struct TagBackend {
    path: PathBuf,
}

impl TagBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Backend for TagBackend {
    fn commit(&mut self, changes: &NativeChanges) -> Result<(), LibraryError> {
        let batch: Vec<(String, Option<Value>)> = changes
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        write_native(&self.path, &batch)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("tags of {:?}", self.path)
    }
}

pub fn tag_key_map() -> KeyMap {
    KeyMap::from_pairs(TAG_KEYS.iter().copied()).with(Field::Location, LOCATION_KEY)
}

/// View over tags already read from disk.
pub fn tag_view(native: NativeTags) -> MetadataView {
    let mut entries = native.entries;
    entries.insert(
        LOCATION_KEY.to_string(),
        Value::Text(location_from_path(&native.path)),
    );
    MetadataView::new(
        StoreKind::Tags,
        tag_key_map(),
        entries,
        Box::new(TagBackend::new(native.path)),
    )
}

/// Read the tags of `path` into a writable view.
pub fn open_tag_view(path: &Path) -> Result<MetadataView, LibraryError> {
    let native = read_native(path)?;
    Ok(tag_view(native))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};

    use common::{Field, Value};
    use metadata::NativeTags;

    use super::{open_tag_view, tag_view};
    use crate::LibraryError;

    fn native() -> NativeTags {
        let mut entries = BTreeMap::new();
        entries.insert("TrackTitle".to_string(), Value::text("Song"));
        entries.insert("TrackNumber".to_string(), Value::text("3"));
        entries.insert("TrackTotal".to_string(), Value::text("12"));
        entries.insert("Year".to_string(), Value::text("2001-05-01"));
        entries.insert("Duration".to_string(), Value::DurationMs(185_000));
        NativeTags {
            path: PathBuf::from("/music/Band/03 Song.mp3"),
            entries,
        }
    }

    #[test]
    fn exposes_tags_through_fields() {
        let view = tag_view(native());
        assert_eq!(view.get(Field::Title), Some(Value::text("Song")));
        assert_eq!(view.get(Field::Year), Some(Value::Integer(2001)));
        assert_eq!(
            view.get(Field::TrackNumberAndCount),
            Some(Value::Pair(Some(3), Some(12)))
        );
        assert_eq!(
            view.location().as_deref(),
            Some("file:///music/Band/03%20Song.mp3")
        );
    }

    #[test]
    fn file_properties_and_location_are_read_only() {
        let mut view = tag_view(native());
        for field in [Field::DurationMs, Field::Location, Field::Bitrate] {
            assert!(matches!(
                view.set(field, Value::text("1")),
                Err(LibraryError::ReadOnlyField(_))
            ));
        }
        assert!(!view.writable_fields().contains(&Field::Location));
    }

    #[test]
    fn pair_writes_split_into_number_and_total() {
        let mut view = tag_view(native());
        view.set(Field::TrackNumberAndCount, Value::text("4/10")).unwrap();
        let changes = view.changes();
        assert_eq!(changes.get(&Field::TrackNumber), Some(&Some(Value::Integer(4))));
        assert_eq!(changes.get(&Field::TrackCount), Some(&Some(Value::Integer(10))));
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        let err = open_tag_view(Path::new("/music/readme.txt")).unwrap_err();
        assert!(matches!(err, LibraryError::UnsupportedFormat(_)));
    }
}
