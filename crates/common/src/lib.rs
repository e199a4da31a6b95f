mod fields;
mod value;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use url::Url;

pub use fields::{Field, FieldKind, StoreKind};
pub use value::{
    format_duration, parse_duration, parse_leading_int, parse_pair, FieldError, Value,
};

/// A full field → value snapshot.
pub type Record = BTreeMap<Field, Value>;

/// Changed field → new value; `None` means the field was removed.
pub type ChangeSet = BTreeMap<Field, Option<Value>>;

/// Canonical location string for a file: a `file://` URI when the path is absolute.
pub fn location_from_path(path: &Path) -> String {
    match Url::from_file_path(path) {
        Ok(url) => url.to_string(),
        Err(()) => path_to_slash_string(path),
    }
}

/// Inverse of [`location_from_path`]; plain paths pass through.
pub fn path_from_location(location: &str) -> PathBuf {
    if location.starts_with("file:") {
        if let Ok(path) = Url::parse(location).and_then(|url| {
            url.to_file_path()
                .map_err(|()| url::ParseError::RelativeUrlWithoutBase)
        }) {
            return path;
        }
    }
    PathBuf::from(location)
}

/// Lower-cased extension of a location, including the leading dot.
pub fn location_extension(location: &str) -> Option<String> {
    let path = path_from_location(location);
    let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
    if ext.is_empty() {
        None
    } else {
        Some(format!(".{}", ext))
    }
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{location_extension, location_from_path, path_from_location};

    #[test]
    fn locations_round_trip_through_uris() {
        let path = Path::new("/music/Some Artist/01 Song.mp3");
        let location = location_from_path(path);
        assert_eq!(location, "file:///music/Some%20Artist/01%20Song.mp3");
        assert_eq!(path_from_location(&location), path);
        assert_eq!(path_from_location("relative/song.flac"), Path::new("relative/song.flac"));
    }

    #[test]
    fn extension_includes_dot() {
        assert_eq!(
            location_extension("file:///music/a/Song.FLAC"),
            Some(".flac".to_string())
        );
        assert_eq!(location_extension("/music/a/noext"), None);
    }
}
