use std::path::{Path, PathBuf};

use common::{Field, Record};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const UNKNOWN_TITLE: &str = "Unknown Song";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";
pub const SINGLETONS_DIR: &str = "Singletons";

const FORBIDDEN_CHARS: &[char] = &[':', ';', '\\', '!', '?', '*', '"', '<', '>', '|', '/'];
const TRUNCATE_START: usize = 64;
const TRUNCATE_STEP: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingOptions {
    /// Prefix file names with `disc-track` / `track`.
    pub track_numbers: bool,
    /// Place files under `artist/album`.
    pub nest: bool,
    /// Insert a leading directory named after the artist's first letter.
    pub group_by_letter: bool,
    /// Collect singleton tracks under one directory.
    pub group_singletons: bool,
    /// Leading words ignored when picking the grouping letter.
    pub stopwords: Vec<String>,
    /// Replace everything outside printable ASCII.
    pub ascii_only: bool,
    pub max_path_len: usize,
}

impl Default for NamingOptions {
    fn default() -> Self {
        Self {
            track_numbers: true,
            nest: true,
            group_by_letter: false,
            group_singletons: false,
            stopwords: vec!["The ".to_string()],
            ascii_only: false,
            max_path_len: 255,
        }
    }
}

/// Canonical location of a track under `base_dir`. Pure in its inputs.
///
/// Elements below `base_dir` are shortened until the whole path fits
/// `max_path_len`. A `base_dir` that leaves too little room cannot be helped;
/// the shortest attempt is returned and a warning logged.
pub fn destination_path(
    record: &Record,
    extension: &str,
    base_dir: &Path,
    options: &NamingOptions,
    singleton: bool,
) -> PathBuf {
    let text = |field: Field| {
        record
            .get(&field)
            .and_then(|value| value.to_text())
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
    };
    let number = |field: Field| {
        record
            .get(&field)
            .and_then(|value| value.as_int())
            .filter(|n| *n > 0)
    };

    let title = text(Field::Title).unwrap_or_else(|| UNKNOWN_TITLE.to_string());
    let artist = text(Field::AlbumArtist)
        .or_else(|| text(Field::Artist))
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    let album = text(Field::Album).unwrap_or_else(|| UNKNOWN_ALBUM.to_string());

    let prefix = match (options.track_numbers, number(Field::TrackNumber)) {
        (true, Some(track)) => match number(Field::DiscNumber) {
            Some(disc) => format!("{}-{:02} ", disc, track),
            None => format!("{:02} ", track),
        },
        _ => String::new(),
    };

    let mut fixed = Vec::new();
    let mut elements = Vec::new();
    if options.group_singletons && singleton {
        fixed.push(SINGLETONS_DIR.to_string());
    } else {
        if options.group_by_letter {
            fixed.push(grouping_letter(&artist, &options.stopwords));
        }
        if options.nest {
            elements.push(sanitize_element(&artist, options.ascii_only));
            elements.push(sanitize_element(&album, options.ascii_only));
        }
    }

    let extension = sanitize_extension(extension, options.ascii_only);
    let file_name = sanitize_element(
        &format!("{}{}{}", prefix, title, extension),
        options.ascii_only,
    );
    let stem = file_name
        .strip_suffix(extension.as_str())
        .unwrap_or(&file_name)
        .to_string();

    let mut path = assemble(base_dir, &fixed, &elements, &stem, &extension);
    let mut limit = TRUNCATE_START;
    while path_len(&path) > options.max_path_len && limit > 0 {
        let short: Vec<String> = elements
            .iter()
            .map(|element| truncate_element(element, limit))
            .collect();
        let stem_limit = limit.saturating_sub(extension.chars().count()).max(1);
        let short_stem = truncate_element(&stem, stem_limit);
        path = assemble(base_dir, &fixed, &short, &short_stem, &extension);
        limit = limit.saturating_sub(TRUNCATE_STEP);
    }
    if path_len(&path) > options.max_path_len {
        warn!(
            "Destination {:?} exceeds {} characters; base directory too long",
            path, options.max_path_len
        );
    }
    path
}

fn assemble(
    base_dir: &Path,
    fixed: &[String],
    elements: &[String],
    stem: &str,
    extension: &str,
) -> PathBuf {
    let mut path = base_dir.to_path_buf();
    for part in fixed.iter().chain(elements) {
        path.push(part);
    }
    path.push(format!("{}{}", stem, extension));
    path
}

fn path_len(path: &Path) -> usize {
    path.to_string_lossy().chars().count()
}

fn truncate_element(element: &str, limit: usize) -> String {
    if element.chars().count() <= limit {
        return element.to_string();
    }
    let cut: String = element.chars().take(limit).collect();
    let trimmed = cut.trim_end_matches(['.', ' ']);
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Make one logical path element safe for common filesystems.
pub fn sanitize_element(name: &str, ascii_only: bool) -> String {
    let mut out: String = name
        .chars()
        .map(|ch| {
            let printable = if ascii_only {
                (' '..='~').contains(&ch)
            } else {
                !ch.is_control()
            };
            if !printable || FORBIDDEN_CHARS.contains(&ch) {
                '_'
            } else {
                ch
            }
        })
        .collect();
    let trimmed_len = out.trim_end_matches(['.', ' ']).len();
    out.truncate(trimmed_len);
    if out.starts_with('.') {
        out.replace_range(..1, "_");
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

fn sanitize_extension(extension: &str, ascii_only: bool) -> String {
    let body = extension.trim().trim_start_matches('.');
    if body.is_empty() {
        return String::new();
    }
    format!(".{}", sanitize_element(body, ascii_only))
}

/// Upper-cased first letter of `artist` after leading stopwords, or `"0"`.
pub fn grouping_letter(artist: &str, stopwords: &[String]) -> String {
    let mut name = artist.trim_start();
    for stopword in stopwords {
        if stopword.is_empty() || name.len() <= stopword.len() {
            continue;
        }
        if let Some(head) = name.get(..stopword.len()) {
            if head.eq_ignore_ascii_case(stopword) {
                name = name[stopword.len()..].trim_start();
                break;
            }
        }
    }
    match name.chars().next() {
        Some(ch) if ch.is_alphabetic() => ch.to_uppercase().collect(),
        _ => "0".to_string(),
    }
}
