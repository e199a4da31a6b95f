use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use common::{location_extension, ChangeSet, Field, FieldError, Record, StoreKind, Value};
use tracing::debug;

use crate::changes::diff;
use crate::naming::{destination_path, NamingOptions};
use crate::LibraryError;

/// Native key → new native value, `None` for removal.
pub type NativeChanges = BTreeMap<String, Option<Value>>;

/// Persists a batch of native changes for one view.
///
/// `commit` must apply every change or none of them.
pub trait Backend: Send + Sync {
    fn commit(&mut self, changes: &NativeChanges) -> Result<(), LibraryError>;

    fn describe(&self) -> String;
}

/// Backend for views that only live in memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryBackend;

impl Backend for MemoryBackend {
    fn commit(&mut self, _changes: &NativeChanges) -> Result<(), LibraryError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Canonical field → native key of one store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyMap {
    keys: BTreeMap<Field, String>,
}

impl KeyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (Field, &'a str)>) -> Self {
        let mut map = Self::new();
        for (field, key) in pairs {
            map.insert(field, key);
        }
        map
    }

    pub fn with(mut self, field: Field, key: impl Into<String>) -> Self {
        self.insert(field, key);
        self
    }

    pub fn insert(&mut self, field: Field, key: impl Into<String>) {
        self.keys.insert(field, key.into());
    }

    pub fn native(&self, field: Field) -> Option<&str> {
        self.keys.get(&field).map(String::as_str)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.keys.contains_key(&field)
    }
}

/// Field-level accessor over one backing store.
pub struct MetadataView {
    kind: StoreKind,
    keys: KeyMap,
    entries: BTreeMap<String, Value>,
    read_only: BTreeSet<Field>,
    staged: Record,
    backend: Box<dyn Backend>,
}

impl std::fmt::Debug for MetadataView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataView")
            .field("kind", &self.kind)
            .field("backend", &self.backend.describe())
            .field("entries", &self.entries)
            .finish()
    }
}

impl MetadataView {
    pub fn new(
        kind: StoreKind,
        keys: KeyMap,
        entries: BTreeMap<String, Value>,
        backend: Box<dyn Backend>,
    ) -> Self {
        let mut view = Self {
            kind,
            keys,
            entries,
            read_only: BTreeSet::new(),
            staged: Record::new(),
            backend,
        };
        view.staged = view.to_record();
        view
    }

    /// In-memory view holding canonical values under their field names.
    pub fn memory(record: Record) -> Self {
        let mut keys = KeyMap::new();
        for field in Field::ALL {
            if !field.is_derived() {
                keys.insert(*field, field.name());
            }
        }
        let mut entries = BTreeMap::new();
        for (field, value) in record {
            match field.pair_parts() {
                Some((number, count)) => {
                    let (n, c) = value.as_pair();
                    if let Some(n) = n {
                        entries.insert(number.name().to_string(), Value::Integer(n));
                    }
                    if let Some(c) = c {
                        entries.insert(count.name().to_string(), Value::Integer(c));
                    }
                }
                None => {
                    entries.insert(field.name().to_string(), value);
                }
            }
        }
        Self::new(StoreKind::Memory, keys, entries, Box::new(MemoryBackend))
    }

    /// In-memory view from a raw `field name → value` dictionary, decoded eagerly.
    pub fn from_raw<'a>(
        raw: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<Self, LibraryError> {
        let mut record = Record::new();
        for (name, value) in raw {
            let field = Field::from_name(name)
                .ok_or_else(|| FieldError::UnknownField(name.to_string()))?;
            if let Some(value) = Value::coerce(field, &value)? {
                record.insert(field, value);
            }
        }
        Ok(Self::memory(record))
    }

    pub fn with_read_only(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.read_only.extend(fields);
        self
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn key_map(&self) -> &KeyMap {
        &self.keys
    }

    pub fn supports(&self, field: Field) -> bool {
        if self.keys.contains(field) {
            return true;
        }
        if let Some((number, count)) = field.pair_parts() {
            return self.keys.contains(number) || self.keys.contains(count);
        }
        if let Some((pair, _)) = field.pair_of() {
            return self.keys.contains(pair);
        }
        false
    }

    /// Supported fields in registry order.
    pub fn supported_fields(&self) -> Vec<Field> {
        Field::ALL
            .iter()
            .copied()
            .filter(|field| self.supports(*field))
            .collect()
    }

    pub fn is_read_only(&self, field: Field) -> bool {
        if field.read_only_for(self.kind) || self.read_only.contains(&field) {
            return true;
        }
        match field.pair_parts() {
            Some((number, count)) => self.is_read_only(number) || self.is_read_only(count),
            None => false,
        }
    }

    pub fn get(&self, field: Field) -> Option<Value> {
        if let Some(native) = self.keys.native(field) {
            let value = self
                .entries
                .get(native)
                .and_then(|raw| Value::decode(field.kind(), raw));
            if value.is_some() {
                return value;
            }
        }
        if let Some((number, count)) = field.pair_parts() {
            if self.keys.contains(field) {
                return None;
            }
            let number = self.get(number).and_then(|v| v.as_int());
            let count = self.get(count).and_then(|v| v.as_int());
            if number.is_none() && count.is_none() {
                return None;
            }
            return Some(Value::Pair(number, count));
        }
        if let Some((pair, is_count)) = field.pair_of() {
            if self.keys.contains(pair) && !self.keys.contains(field) {
                let (number, count) = self.get(pair)?.as_pair();
                let half = if is_count { count } else { number };
                return half.map(Value::Integer);
            }
        }
        None
    }

    pub fn get_text(&self, field: Field) -> Option<String> {
        self.get(field)
            .and_then(|value| value.to_text())
            .filter(|text| !text.trim().is_empty())
    }

    pub fn get_int(&self, field: Field) -> Option<i64> {
        self.get(field).and_then(|value| value.as_int())
    }

    pub fn set(&mut self, field: Field, value: impl Into<Value>) -> Result<(), LibraryError> {
        let value = value.into();
        self.check_writable(field)?;
        let value = Value::coerce(field, &value)?;
        self.write(field, value);
        Ok(())
    }

    pub fn delete(&mut self, field: Field) -> Result<(), LibraryError> {
        self.check_writable(field)?;
        self.write(field, None);
        Ok(())
    }

    fn check_writable(&self, field: Field) -> Result<(), LibraryError> {
        if !self.supports(field) {
            return Err(LibraryError::FieldNotSupported(field));
        }
        if self.is_read_only(field) {
            return Err(LibraryError::ReadOnlyField(field));
        }
        Ok(())
    }

    fn write(&mut self, field: Field, value: Option<Value>) {
        if let Some(native) = self.keys.native(field).map(str::to_string) {
            match value {
                Some(value) => {
                    let encoded = self.encode(value);
                    self.entries.insert(native, encoded);
                }
                None => {
                    self.entries.remove(&native);
                }
            }
            return;
        }
        if let Some((number, count)) = field.pair_parts() {
            let (n, c) = value.map(|v| v.as_pair()).unwrap_or((None, None));
            if self.supports(number) {
                self.write(number, n.map(Value::Integer));
            }
            if self.supports(count) {
                self.write(count, c.map(Value::Integer));
            }
            return;
        }
        if let Some((pair, is_count)) = field.pair_of() {
            let (mut number, mut count) =
                self.get(pair).map(|v| v.as_pair()).unwrap_or((None, None));
            let half = value.and_then(|v| v.as_int());
            if is_count {
                count = half;
            } else {
                number = half;
            }
            let combined = if number.is_none() && count.is_none() {
                None
            } else {
                Some(Value::Pair(number, count))
            };
            self.write(pair, combined);
        }
    }

    fn encode(&self, value: Value) -> Value {
        match self.kind {
            StoreKind::Tags => match value.to_text() {
                Some(text) => Value::Text(text),
                None => value,
            },
            StoreKind::Database | StoreKind::Memory => value,
        }
    }

    /// Every supported field with a value.
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        for field in self.supported_fields() {
            if let Some(value) = self.get(field) {
                record.insert(field, value);
            }
        }
        record
    }

    pub fn staged(&self) -> &Record {
        &self.staged
    }

    pub fn writable_fields(&self) -> Vec<Field> {
        self.supported_fields()
            .into_iter()
            .filter(|field| !self.is_read_only(*field))
            .collect()
    }

    /// Fields whose live value differs from the snapshot taken at load or last save.
    pub fn changes(&self) -> ChangeSet {
        diff(&self.staged, &self.to_record(), &self.writable_fields())
    }

    pub fn has_changes(&self) -> bool {
        !self.changes().is_empty()
    }

    fn native_changes(&self, changes: &ChangeSet) -> NativeChanges {
        let mut native = NativeChanges::new();
        for field in changes.keys() {
            if let Some(key) = self.keys.native(*field) {
                native.insert(key.to_string(), self.entries.get(key).cloned());
            }
        }
        native
    }

    /// Persist pending changes. Returns whether anything was written.
    ///
    /// On failure the snapshot is untouched, so the same changes are pending again.
    pub fn save(&mut self) -> Result<bool, LibraryError> {
        let changes = self.changes();
        if changes.is_empty() {
            return Ok(false);
        }
        let native = self.native_changes(&changes);
        self.backend.commit(&native)?;
        self.staged = self.to_record();
        debug!(
            "Saved {} field(s) to {}",
            changes.len(),
            self.backend.describe()
        );
        Ok(true)
    }

    pub fn location(&self) -> Option<String> {
        self.get_text(Field::Location)
    }

    pub fn destination_path(
        &self,
        base_dir: &Path,
        options: &NamingOptions,
        singleton: bool,
    ) -> PathBuf {
        let extension = self
            .location()
            .and_then(|location| location_extension(&location))
            .unwrap_or_default();
        destination_path(&self.to_record(), &extension, base_dir, options, singleton)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::Path;

    use common::{Field, FieldError, Record, StoreKind, Value};

    use super::{Backend, KeyMap, MetadataView, NativeChanges};
    use crate::naming::NamingOptions;
    use crate::LibraryError;

    struct FailingBackend;

    impl Backend for FailingBackend {
        fn commit(&mut self, _changes: &NativeChanges) -> Result<(), LibraryError> {
            Err(LibraryError::Backend("disk full".to_string()))
        }

        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    fn tag_like_view() -> MetadataView {
        let keys = KeyMap::new()
            .with(Field::Title, "TIT2")
            .with(Field::Artist, "TPE1")
            .with(Field::Album, "TALB")
            .with(Field::TrackNumberAndCount, "TRCK")
            .with(Field::DurationMs, "LEN");
        let mut entries = BTreeMap::new();
        entries.insert("TIT2".to_string(), Value::text("Song"));
        entries.insert("TPE1".to_string(), Value::text("Band"));
        entries.insert("TRCK".to_string(), Value::text("3/12"));
        entries.insert("LEN".to_string(), Value::DurationMs(185_000));
        MetadataView::new(StoreKind::Tags, keys, entries, Box::new(super::MemoryBackend))
    }

    #[test]
    fn decodes_combined_number_keys() {
        let view = tag_like_view();
        assert_eq!(
            view.get(Field::TrackNumberAndCount),
            Some(Value::Pair(Some(3), Some(12)))
        );
        assert_eq!(view.get(Field::TrackNumber), Some(Value::Integer(3)));
        assert_eq!(view.get(Field::TrackCount), Some(Value::Integer(12)));
        assert_eq!(view.get(Field::Album), None);
        assert_eq!(view.get(Field::DurationMs), Some(Value::DurationMs(185_000)));
    }

    #[test]
    fn setting_a_half_rewrites_the_combined_key() {
        let mut view = tag_like_view();
        view.set(Field::TrackNumber, 4).unwrap();
        assert_eq!(
            view.get(Field::TrackNumberAndCount),
            Some(Value::Pair(Some(4), Some(12)))
        );
        let changes = view.changes();
        assert_eq!(changes.get(&Field::TrackNumber), Some(&Some(Value::Integer(4))));
        assert!(changes.contains_key(&Field::TrackNumberAndCount));
        assert!(!changes.contains_key(&Field::TrackCount));
    }

    #[test]
    fn pair_fields_decompose_into_separate_keys() {
        let mut record = Record::new();
        record.insert(Field::Title, Value::text("Song"));
        let mut view = MetadataView::memory(record);
        view.set(Field::DiscNumberAndCount, Value::text("2/3")).unwrap();
        assert_eq!(view.get(Field::DiscNumber), Some(Value::Integer(2)));
        assert_eq!(view.get(Field::DiscCount), Some(Value::Integer(3)));
        view.delete(Field::DiscNumberAndCount).unwrap();
        assert_eq!(view.get(Field::DiscNumber), None);
        assert_eq!(view.get(Field::DiscNumberAndCount), None);
    }

    #[test]
    fn read_only_fields_are_rejected() {
        let mut view = tag_like_view();
        let err = view.set(Field::DurationMs, Value::DurationMs(1)).unwrap_err();
        assert!(matches!(err, LibraryError::ReadOnlyField(Field::DurationMs)));
        let err = view.set(Field::Genre, "Rock").unwrap_err();
        assert!(matches!(err, LibraryError::FieldNotSupported(Field::Genre)));
    }

    #[test]
    fn declared_read_only_field_keeps_staged_and_live_values() {
        let mut record = Record::new();
        record.insert(Field::Album, Value::text("Original"));
        let mut view = MetadataView::memory(record).with_read_only([Field::Album]);
        let err = view.set(Field::Album, "X").unwrap_err();
        assert!(matches!(err, LibraryError::ReadOnlyField(Field::Album)));
        assert_eq!(view.get(Field::Album), Some(Value::text("Original")));
        assert_eq!(view.staged().get(&Field::Album), Some(&Value::text("Original")));
        assert!(view.changes().is_empty());
    }

    #[test]
    fn tag_stores_keep_text_values() {
        let mut view = tag_like_view();
        view.set(Field::TrackNumberAndCount, Value::Pair(Some(5), Some(9))).unwrap();
        assert_eq!(view.entries.get("TRCK"), Some(&Value::text("5/9")));
    }

    #[test]
    fn save_clears_changes() {
        let mut view = tag_like_view();
        view.set(Field::Title, "New").unwrap();
        assert!(view.has_changes());
        assert!(view.save().unwrap());
        assert!(view.changes().is_empty());
        assert!(!view.save().unwrap());
    }

    #[test]
    fn failed_save_keeps_changes_pending() {
        let keys = KeyMap::new().with(Field::Title, "title");
        let mut view =
            MetadataView::new(StoreKind::Memory, keys, BTreeMap::new(), Box::new(FailingBackend));
        view.set(Field::Title, "Pending").unwrap();
        assert!(view.save().is_err());
        assert_eq!(
            view.changes().get(&Field::Title),
            Some(&Some(Value::text("Pending")))
        );
        assert!(view.staged().is_empty());
    }

    #[test]
    fn raw_dictionaries_are_decoded() {
        let view = MetadataView::from_raw([
            ("title", Value::text("Song")),
            ("track_number_and_count", Value::text("2/10")),
            ("duration_ms", Value::text("3:05")),
        ])
        .unwrap();
        assert_eq!(view.get(Field::TrackNumber), Some(Value::Integer(2)));
        assert_eq!(view.get(Field::TrackCount), Some(Value::Integer(10)));
        assert_eq!(view.get(Field::DurationMs), Some(Value::DurationMs(185_000)));

        let err = MetadataView::from_raw([("mood", Value::text("happy"))]).unwrap_err();
        assert!(matches!(
            err,
            LibraryError::Field(FieldError::UnknownField(_))
        ));
        let err = MetadataView::from_raw([("year", Value::text("someday"))]).unwrap_err();
        assert!(matches!(err, LibraryError::Field(_)));
    }

    #[test]
    fn destination_uses_location_extension() {
        let mut record = Record::new();
        record.insert(Field::Title, Value::text("Song"));
        record.insert(Field::Artist, Value::text("Band"));
        record.insert(Field::Album, Value::text("Record"));
        record.insert(Field::TrackNumber, Value::Integer(3));
        record.insert(Field::Location, Value::text("file:///in/x.FLAC"));
        let view = MetadataView::memory(record);
        let options = NamingOptions::default();
        let first = view.destination_path(Path::new("/out"), &options, false);
        let second = view.destination_path(Path::new("/out"), &options, false);
        assert_eq!(first, second);
        assert_eq!(first, Path::new("/out/Band/Record/03 Song.flac"));
    }
}
