pub mod changes;
pub mod composite;
pub mod db;
pub mod matcher;
pub mod naming;
pub mod singletons;
pub mod tags;
pub mod tracklist;
pub mod view;

use std::path::{Path, PathBuf};

use common::{Field, FieldError};
use metadata::MetadataError;
use walkdir::WalkDir;

pub use changes::diff;
pub use composite::{CompositeTrack, Layer, Priority, SaveOutcome, Source};
pub use db::PlayerDb;
pub use matcher::{match_tracks, KeyKind, Matchable, Matching, Pair, TrackKey};
pub use naming::{destination_path, NamingOptions};
pub use singletons::{flag_singletons, SingletonPolicy};
pub use tags::open_tag_view;
pub use tracklist::{SimpleTracklist, TrackRecord, TracklistError};
pub use view::{Backend, KeyMap, MetadataView, NativeChanges};

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Metadata(MetadataError),
    Database(rusqlite::Error),
    Json(serde_json::Error),
    Field(FieldError),
    Tracklist(TracklistError),
    ReadOnlyField(Field),
    FieldNotSupported(Field),
    UnsupportedFormat(PathBuf),
    NoRowsFound(String),
    MultipleRowsFound(String),
    Backend(String),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Metadata(err) => write!(f, "metadata error: {}", err),
            LibraryError::Database(err) => write!(f, "db error: {}", err),
            LibraryError::Json(err) => write!(f, "json error: {}", err),
            LibraryError::Field(err) => write!(f, "field error: {}", err),
            LibraryError::Tracklist(err) => write!(f, "tracklist error: {}", err),
            LibraryError::ReadOnlyField(field) => write!(f, "field is read-only: {}", field),
            LibraryError::FieldNotSupported(field) => {
                write!(f, "field not supported by this source: {}", field)
            }
            LibraryError::UnsupportedFormat(path) => {
                write!(f, "unsupported audio format: {:?}", path)
            }
            LibraryError::NoRowsFound(query) => write!(f, "no rows found for {}", query),
            LibraryError::MultipleRowsFound(query) => {
                write!(f, "multiple rows found for {}", query)
            }
            LibraryError::Backend(message) => write!(f, "backend error: {}", message),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<MetadataError> for LibraryError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::UnsupportedFormat(path) => LibraryError::UnsupportedFormat(path),
            other => LibraryError::Metadata(other),
        }
    }
}

impl From<rusqlite::Error> for LibraryError {
    fn from(err: rusqlite::Error) -> Self {
        LibraryError::Database(err)
    }
}

impl From<serde_json::Error> for LibraryError {
    fn from(err: serde_json::Error) -> Self {
        LibraryError::Json(err)
    }
}

impl From<FieldError> for LibraryError {
    fn from(err: FieldError) -> Self {
        LibraryError::Field(err)
    }
}

impl From<TracklistError> for LibraryError {
    fn from(err: TracklistError) -> Self {
        LibraryError::Tracklist(err)
    }
}

/// Audio files under `root` that a tag backend can open, sorted by path.
pub fn audio_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| metadata::is_supported(path))
        .collect();
    files.sort();
    files
}
