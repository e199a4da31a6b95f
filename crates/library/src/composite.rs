use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{location_extension, ChangeSet, Field, Record, Value};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::db::PlayerDb;
use crate::matcher::Matchable;
use crate::naming::{destination_path, NamingOptions};
use crate::tags::open_tag_view;
use crate::view::MetadataView;
use crate::LibraryError;

/// Where a layer's metadata comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    File,
    Database,
    /// Caller-supplied values, such as a scraped tracklist.
    External,
}

/// Resolution order of layer sources. Sources left out rank last.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Priority(Vec<Source>);

impl Default for Priority {
    fn default() -> Self {
        Self(vec![Source::File, Source::Database, Source::External])
    }
}

impl Priority {
    pub fn new(order: impl IntoIterator<Item = Source>) -> Self {
        let mut sources = Vec::new();
        for source in order {
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        Self(sources)
    }

    pub fn order(&self) -> &[Source] {
        &self.0
    }

    fn rank(&self, source: Source) -> usize {
        self.0
            .iter()
            .position(|s| *s == source)
            .unwrap_or(self.0.len())
    }
}

pub type SharedView = Arc<RwLock<MetadataView>>;

#[derive(Clone)]
pub struct Layer {
    pub source: Source,
    pub view: SharedView,
}

impl Layer {
    pub fn new(source: Source, view: MetadataView) -> Self {
        Self {
            source,
            view: Arc::new(RwLock::new(view)),
        }
    }
}

/// Which stores a [`CompositeTrack::save`] actually wrote to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    pub file: bool,
    pub database: bool,
}

/// Several views of one track resolved field by field in priority order.
///
/// External durations come from scraped listings and are only used when no
/// other layer knows the duration.
pub struct CompositeTrack {
    layers: Vec<Layer>,
    priority: Priority,
}

impl CompositeTrack {
    pub fn new(mut layers: Vec<Layer>, priority: Priority) -> Self {
        layers.sort_by_key(|layer| priority.rank(layer.source));
        Self { layers, priority }
    }

    /// Open the tags of `path` and attach the matching database row, if any.
    pub fn open(
        path: &Path,
        db: Option<&PlayerDb>,
        extra: Option<MetadataView>,
        priority: Priority,
    ) -> Result<Self, LibraryError> {
        let file_view = open_tag_view(path)?;
        Self::with_file_view(file_view, db, extra, priority)
    }

    pub fn with_file_view(
        file_view: MetadataView,
        db: Option<&PlayerDb>,
        extra: Option<MetadataView>,
        priority: Priority,
    ) -> Result<Self, LibraryError> {
        let row = match db {
            Some(db) => find_row(db, &file_view)?,
            None => None,
        };
        let mut layers = vec![Layer::new(Source::File, file_view)];
        if let Some(row) = row {
            layers.push(Layer::new(Source::Database, row));
        }
        if let Some(extra) = extra {
            layers.push(Layer::new(Source::External, extra));
        }
        Ok(Self::new(layers, priority))
    }

    /// Single external layer decoded from a `field name → value` dictionary.
    pub fn from_raw<'a>(
        raw: impl IntoIterator<Item = (&'a str, Value)>,
        priority: Priority,
    ) -> Result<Self, LibraryError> {
        let view = MetadataView::from_raw(raw)?;
        Ok(Self::new(vec![Layer::new(Source::External, view)], priority))
    }

    pub fn priority(&self) -> &Priority {
        &self.priority
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, source: Source) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.source == source)
    }

    pub fn get(&self, field: Field) -> Option<Value> {
        if field == Field::DurationMs {
            let trusted = self
                .layers
                .iter()
                .filter(|layer| layer.source != Source::External)
                .find_map(|layer| layer.view.read().get(field));
            if trusted.is_some() {
                return trusted;
            }
        }
        self.layers
            .iter()
            .find_map(|layer| layer.view.read().get(field))
    }

    pub fn get_text(&self, field: Field) -> Option<String> {
        self.get(field)
            .and_then(|value| value.to_text())
            .filter(|text| !text.trim().is_empty())
    }

    pub fn get_int(&self, field: Field) -> Option<i64> {
        self.get(field).and_then(|value| value.as_int())
    }

    /// Supported fields of every layer, first-seen in priority order.
    pub fn all_keys(&self) -> Vec<Field> {
        let mut keys = Vec::new();
        for layer in &self.layers {
            for field in layer.view.read().supported_fields() {
                if !keys.contains(&field) {
                    keys.push(field);
                }
            }
        }
        keys
    }

    /// Write `value` into every layer that can store it.
    pub fn set(&self, field: Field, value: impl Into<Value>) -> Result<(), LibraryError> {
        let value = Value::coerce(field, &value.into())?;
        let targets = self.writable_layers(field)?;
        for layer in targets {
            let mut view = layer.view.write();
            match &value {
                Some(value) => view.set(field, value.clone())?,
                None => view.delete(field)?,
            }
        }
        Ok(())
    }

    pub fn delete(&self, field: Field) -> Result<(), LibraryError> {
        for layer in self.writable_layers(field)? {
            layer.view.write().delete(field)?;
        }
        Ok(())
    }

    fn writable_layers(&self, field: Field) -> Result<Vec<&Layer>, LibraryError> {
        let supporting: Vec<&Layer> = self
            .layers
            .iter()
            .filter(|layer| layer.view.read().supports(field))
            .collect();
        if supporting.is_empty() {
            return Err(LibraryError::FieldNotSupported(field));
        }
        let writable: Vec<&Layer> = supporting
            .into_iter()
            .filter(|layer| !layer.view.read().is_read_only(field))
            .collect();
        if writable.is_empty() {
            return Err(LibraryError::ReadOnlyField(field));
        }
        Ok(writable)
    }

    /// Pending changes of each layer that has any.
    pub fn changes(&self) -> BTreeMap<Source, ChangeSet> {
        let mut all = BTreeMap::new();
        for layer in &self.layers {
            let changes = layer.view.read().changes();
            if !changes.is_empty() {
                all.entry(layer.source)
                    .or_insert_with(ChangeSet::new)
                    .extend(changes);
            }
        }
        all
    }

    /// Save the file and database layers independently.
    ///
    /// Both are attempted even if the first fails; the first error is returned.
    pub fn save(&self) -> Result<SaveOutcome, LibraryError> {
        let mut outcome = SaveOutcome::default();
        let mut first_error = None;
        for layer in &self.layers {
            let saved = match layer.source {
                Source::File => &mut outcome.file,
                Source::Database => &mut outcome.database,
                Source::External => continue,
            };
            match layer.view.write().save() {
                Ok(wrote) => *saved |= wrote,
                Err(err) => {
                    warn!("Failed to save {:?} layer: {}", layer.source, err);
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(outcome),
        }
    }

    /// Location of the first layer, in priority order, that has one.
    pub fn location(&self) -> Option<String> {
        self.layers
            .iter()
            .find_map(|layer| layer.view.read().location())
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        for field in self.all_keys() {
            if let Some(value) = self.get(field) {
                record.insert(field, value);
            }
        }
        record
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

fn find_row(db: &PlayerDb, file_view: &MetadataView) -> Result<Option<MetadataView>, LibraryError> {
    let by_location = match file_view.location() {
        Some(location) => db.find_by_location(&location),
        None => Ok(None),
    };
    let found = match by_location {
        Ok(Some(view)) => Some(view),
        Ok(None) => {
            let names = (
                file_view.get_text(Field::Artist),
                file_view.get_text(Field::Album),
                file_view.get_text(Field::Title),
            );
            match names {
                (Some(artist), Some(album), Some(title)) => {
                    match db.find_by_names(&artist, &album, &title) {
                        Err(LibraryError::MultipleRowsFound(what)) => {
                            warn!("Ambiguous database rows for {}", what);
                            None
                        }
                        other => other?,
                    }
                }
                _ => None,
            }
        }
        Err(LibraryError::MultipleRowsFound(what)) => {
            warn!("Ambiguous database rows for {}", what);
            None
        }
        Err(err) => return Err(err),
    };
    if found.is_none() {
        debug!("No database row for {:?}", file_view.location());
    }
    Ok(found)
}

impl Matchable for CompositeTrack {
    fn title(&self) -> Option<String> {
        self.get_text(Field::Title)
    }
    fn artist(&self) -> Option<String> {
        self.get_text(Field::Artist)
    }
    fn album(&self) -> Option<String> {
        self.get_text(Field::Album)
    }
    fn album_artist(&self) -> Option<String> {
        self.get_text(Field::AlbumArtist)
    }
    fn track_number(&self) -> Option<i64> {
        self.get_int(Field::TrackNumber)
    }
    fn disc_number(&self) -> Option<i64> {
        self.get_int(Field::DiscNumber)
    }
    fn location(&self) -> Option<String> {
        CompositeTrack::location(self)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};

    use common::{Field, Record, Value};
    use metadata::NativeTags;

    use super::{CompositeTrack, Layer, Priority, SaveOutcome, Source};
    use crate::db::PlayerDb;
    use crate::naming::NamingOptions;
    use crate::tags::tag_view;
    use crate::view::MetadataView;
    use crate::LibraryError;

    fn memory(pairs: &[(Field, Value)]) -> MetadataView {
        MetadataView::memory(pairs.iter().cloned().collect::<Record>())
    }

    fn layered(priority: Priority) -> CompositeTrack {
        let file = memory(&[
            (Field::Title, Value::text("File Title")),
            (Field::Location, Value::text("file:///music/a.ogg")),
        ]);
        let db = memory(&[
            (Field::Title, Value::text("Db Title")),
            (Field::Genre, Value::text("Jazz")),
            (Field::DurationMs, Value::DurationMs(185_000)),
            (Field::Location, Value::text("file:///library/a.MP3")),
        ]);
        let scraped = memory(&[
            (Field::DurationMs, Value::DurationMs(190_000)),
            (Field::Year, Value::Integer(2001)),
        ]);
        CompositeTrack::new(
            vec![
                Layer::new(Source::External, scraped),
                Layer::new(Source::Database, db),
                Layer::new(Source::File, file),
            ],
            priority,
        )
    }

    #[test]
    fn first_non_null_layer_wins() {
        let track = layered(Priority::default());
        assert_eq!(track.get(Field::Title), Some(Value::text("File Title")));
        assert_eq!(track.get(Field::Genre), Some(Value::text("Jazz")));
        assert_eq!(track.get(Field::Year), Some(Value::Integer(2001)));
        assert_eq!(track.get(Field::Rating), None);

        let track = layered(Priority::new([Source::Database, Source::File]));
        assert_eq!(track.get(Field::Title), Some(Value::text("Db Title")));
        assert_eq!(track.layers()[2].source, Source::External);
    }

    #[test]
    fn scraped_durations_never_win() {
        let track = layered(Priority::new([Source::External, Source::File, Source::Database]));
        assert_eq!(track.get(Field::DurationMs), Some(Value::DurationMs(185_000)));

        let only_scraped = CompositeTrack::new(
            vec![Layer::new(
                Source::External,
                memory(&[(Field::DurationMs, Value::DurationMs(190_000))]),
            )],
            Priority::default(),
        );
        assert_eq!(
            only_scraped.get(Field::DurationMs),
            Some(Value::DurationMs(190_000))
        );
    }

    #[test]
    fn builds_from_raw_dictionaries() {
        let track = CompositeTrack::from_raw(
            [
                ("title", Value::text("Scraped")),
                ("disc_number_and_count", Value::text("1/2")),
            ],
            Priority::default(),
        )
        .unwrap();
        assert_eq!(track.get_int(Field::DiscCount), Some(2));
        assert_eq!(track.save().unwrap(), SaveOutcome::default());
        assert!(CompositeTrack::from_raw([("mood", Value::text("x"))], Priority::default()).is_err());
    }

    #[test]
    fn keys_are_unioned_in_priority_order() {
        let file = MetadataView::memory(Record::new());
        let narrow = CompositeTrack::new(
            vec![Layer::new(Source::File, file)],
            Priority::default(),
        );
        let keys = narrow.all_keys();
        assert_eq!(keys.first(), Some(&Field::Title));
        let mut deduped = keys.clone();
        deduped.dedup();
        assert_eq!(keys.len(), deduped.len());
        assert!(keys.contains(&Field::TrackNumberAndCount));
    }

    #[test]
    fn writes_go_to_every_writable_layer() {
        let file = memory(&[(Field::Album, Value::text("Old"))]);
        let db = memory(&[(Field::Album, Value::text("Old"))]).with_read_only([Field::Album]);
        let track = CompositeTrack::new(
            vec![Layer::new(Source::File, file), Layer::new(Source::Database, db)],
            Priority::default(),
        );
        track.set(Field::Album, "New").unwrap();
        let file = track.layer(Source::File).unwrap();
        let db = track.layer(Source::Database).unwrap();
        assert_eq!(file.view.read().get(Field::Album), Some(Value::text("New")));
        assert_eq!(db.view.read().get(Field::Album), Some(Value::text("Old")));

        let changes = track.changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(
            changes[&Source::File].get(&Field::Album),
            Some(&Some(Value::text("New")))
        );

        let db_only = CompositeTrack::new(
            vec![Layer::new(
                Source::Database,
                memory(&[]).with_read_only([Field::Album]),
            )],
            Priority::default(),
        );
        assert!(matches!(
            db_only.set(Field::Album, "X"),
            Err(LibraryError::ReadOnlyField(Field::Album))
        ));
    }

    #[test]
    fn save_reports_each_store() {
        let track = layered(Priority::default());
        assert_eq!(track.save().unwrap(), SaveOutcome::default());

        let file = track.layer(Source::File).unwrap();
        file.view.write().set(Field::Genre, "Rock").unwrap();
        assert_eq!(
            track.save().unwrap(),
            SaveOutcome {
                file: true,
                database: false
            }
        );
        assert!(track.changes().is_empty());
    }

    #[test]
    fn destination_follows_the_priority_location() {
        let options = NamingOptions::default();
        let track = layered(Priority::default());
        let path = track.destination_path(Path::new("/out"), &options, false);
        assert_eq!(path.extension().unwrap(), "ogg");

        let track = layered(Priority::new([Source::Database]));
        let path = track.destination_path(Path::new("/out"), &options, false);
        assert_eq!(path.extension().unwrap(), "mp3");
        assert!(path.ends_with("Db Title.mp3"));
    }

    #[test]
    fn attaches_the_database_row_by_location() {
        let db = PlayerDb::open_in_memory().unwrap();
        db.create_schema().unwrap();
        let mut row = Record::new();
        row.insert(Field::Title, Value::text("Song"));
        row.insert(Field::Artist, Value::text("Band"));
        row.insert(Field::Album, Value::text("Record"));
        row.insert(Field::PlayCount, Value::Integer(12));
        row.insert(
            Field::Location,
            Value::text("file:///music/Band/03%20Song.mp3"),
        );
        db.add_track(&row).unwrap();

        let mut entries = BTreeMap::new();
        entries.insert("TrackTitle".to_string(), Value::text("Song"));
        let file = tag_view(NativeTags {
            path: PathBuf::from("/music/Band/03 Song.mp3"),
            entries,
        });
        let track =
            CompositeTrack::with_file_view(file, Some(&db), None, Priority::default()).unwrap();
        assert!(track.layer(Source::Database).is_some());
        assert_eq!(track.get(Field::PlayCount), Some(Value::Integer(12)));
        assert_eq!(track.get(Field::Album), Some(Value::text("Record")));
    }

    #[test]
    fn falls_back_to_names_when_location_differs() {
        let db = PlayerDb::open_in_memory().unwrap();
        db.create_schema().unwrap();
        let mut row = Record::new();
        row.insert(Field::Title, Value::text("Song"));
        row.insert(Field::Artist, Value::text("Band"));
        row.insert(Field::Album, Value::text("Record"));
        row.insert(Field::Location, Value::text("file:///old/place.mp3"));
        db.add_track(&row).unwrap();

        let mut entries = BTreeMap::new();
        entries.insert("TrackTitle".to_string(), Value::text("song"));
        entries.insert("TrackArtist".to_string(), Value::text("BAND"));
        entries.insert("AlbumTitle".to_string(), Value::text("Record"));
        let file = tag_view(NativeTags {
            path: PathBuf::from("/new/place.mp3"),
            entries,
        });
        let track =
            CompositeTrack::with_file_view(file, Some(&db), None, Priority::default()).unwrap();
        assert!(track.layer(Source::Database).is_some());
        assert_eq!(
            track.location().as_deref(),
            Some("file:///new/place.mp3")
        );
    }
}
