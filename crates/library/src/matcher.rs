//! Pairing of two track collections through layered lookup keys.
//!
//! Every track yields an ordered list of candidate keys, from the exact file
//! location down to a bare title/artist/album key. Any key shared by a track of
//! each side is a hit; all location hits are granted before numbered hits and
//! so on down the key kinds, each track pairing at most once. A key generated
//! by two different tracks of the same collection is dropped for good, so an
//! ambiguous key never produces a pair.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use common::{path_from_location, Field, Record, Value};
use tracing::{debug, info};

use crate::tracklist::TrackRecord;
use crate::view::MetadataView;

/// The fields the matcher looks at.
pub trait Matchable {
    fn title(&self) -> Option<String>;
    fn artist(&self) -> Option<String>;
    fn album(&self) -> Option<String>;
    fn album_artist(&self) -> Option<String>;
    fn track_number(&self) -> Option<i64>;
    fn disc_number(&self) -> Option<i64>;
    fn location(&self) -> Option<String>;
}

impl<T: Matchable + ?Sized> Matchable for &T {
    fn title(&self) -> Option<String> {
        (**self).title()
    }
    fn artist(&self) -> Option<String> {
        (**self).artist()
    }
    fn album(&self) -> Option<String> {
        (**self).album()
    }
    fn album_artist(&self) -> Option<String> {
        (**self).album_artist()
    }
    fn track_number(&self) -> Option<i64> {
        (**self).track_number()
    }
    fn disc_number(&self) -> Option<i64> {
        (**self).disc_number()
    }
    fn location(&self) -> Option<String> {
        (**self).location()
    }
}

impl Matchable for Record {
    fn title(&self) -> Option<String> {
        record_text(self, Field::Title)
    }
    fn artist(&self) -> Option<String> {
        record_text(self, Field::Artist)
    }
    fn album(&self) -> Option<String> {
        record_text(self, Field::Album)
    }
    fn album_artist(&self) -> Option<String> {
        record_text(self, Field::AlbumArtist)
    }
    fn track_number(&self) -> Option<i64> {
        self.get(&Field::TrackNumber).and_then(Value::as_int)
    }
    fn disc_number(&self) -> Option<i64> {
        self.get(&Field::DiscNumber).and_then(Value::as_int)
    }
    fn location(&self) -> Option<String> {
        record_text(self, Field::Location)
    }
}

fn record_text(record: &Record, field: Field) -> Option<String> {
    record.get(&field).and_then(Value::to_text)
}

impl Matchable for MetadataView {
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
        MetadataView::location(self)
    }
}

impl Matchable for TrackRecord {
    fn title(&self) -> Option<String> {
        Some(self.title.clone())
    }
    fn artist(&self) -> Option<String> {
        Some(self.artist.clone())
    }
    fn album(&self) -> Option<String> {
        Some(self.album.clone())
    }
    fn album_artist(&self) -> Option<String> {
        self.album_artist.clone()
    }
    fn track_number(&self) -> Option<i64> {
        self.track_number
    }
    fn disc_number(&self) -> Option<i64> {
        self.disc_number
    }
    fn location(&self) -> Option<String> {
        self.location.clone()
    }
}

/// Which rule produced a key, in descending order of trust.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyKind {
    Location,
    Numbered,
    AlbumArtist,
    DiscAgnostic,
    Continuous,
    ContinuousAlbumArtist,
    Untracked,
    Position,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TrackKey {
    Location(String),
    Numbered {
        title: String,
        artist: String,
        album: String,
        track: i64,
        disc: Option<i64>,
    },
    /// Track number counted across all discs of the album.
    Continuous {
        title: String,
        artist: String,
        album: String,
        track: i64,
    },
    Untracked {
        title: String,
        artist: String,
        album: String,
    },
    Position(usize),
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKey::Location(location) => write!(f, "{}", location),
            TrackKey::Numbered {
                title,
                artist,
                album,
                track,
                disc,
            } => match disc {
                Some(disc) => write!(f, "{}/{}/{}#{}-{}", artist, album, title, disc, track),
                None => write!(f, "{}/{}/{}#{}", artist, album, title, track),
            },
            TrackKey::Continuous {
                title,
                artist,
                album,
                track,
            } => write!(f, "{}/{}/{}#~{}", artist, album, title, track),
            TrackKey::Untracked {
                title,
                artist,
                album,
            } => write!(f, "{}/{}/{}", artist, album, title),
            TrackKey::Position(index) => write!(f, "Track#{}", index),
        }
    }
}

/// One matched pair, as indices into the caller's collections.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pair {
    pub a: usize,
    pub b: usize,
    pub via: KeyKind,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Matching {
    pub pairs: Vec<Pair>,
    pub unmatched_a: Vec<usize>,
    pub unmatched_b: Vec<usize>,
}

/// Disc number → tracks recorded on that disc within one collection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscLengths {
    lengths: BTreeMap<i64, i64>,
}

impl DiscLengths {
    /// `None` unless every track carries a disc number.
    pub fn of<T: Matchable>(tracks: &[T]) -> Option<Self> {
        let discs: Option<Vec<i64>> = tracks
            .iter()
            .map(|t| t.disc_number().filter(|n| *n > 0))
            .collect();
        Self::from_discs(discs?)
    }

    fn from_discs(discs: Vec<i64>) -> Option<Self> {
        if discs.is_empty() {
            return None;
        }
        let mut lengths = BTreeMap::new();
        for disc in discs {
            *lengths.entry(disc).or_insert(0) += 1;
        }
        Some(Self { lengths })
    }

    pub fn len_of(&self, disc: i64) -> Option<i64> {
        self.lengths.get(&disc).copied()
    }

    pub fn is_single_disc(&self) -> bool {
        self.lengths.len() == 1
    }

    /// Tracks on all discs numbered below `disc`.
    pub fn offset(&self, disc: i64) -> i64 {
        self.lengths.range(..disc).map(|(_, len)| len).sum()
    }
}

#[derive(Debug)]
struct Facts {
    position: usize,
    title: Option<String>,
    artist: String,
    album: String,
    album_artist: Option<String>,
    track: Option<i64>,
    disc: Option<i64>,
    location: Option<String>,
}

impl Facts {
    fn of<T: Matchable>(position: usize, track: &T) -> Self {
        let artist = normalize(track.artist());
        let album_artist = normalize(track.album_artist());
        Self {
            position,
            title: normalize(track.title()),
            artist: artist.unwrap_or_default(),
            album: normalize(track.album()).unwrap_or_default(),
            album_artist,
            track: track.track_number().filter(|n| *n > 0),
            disc: track.disc_number().filter(|n| *n > 0),
            location: track
                .location()
                .filter(|loc| !loc.trim().is_empty())
                .map(|loc| path_from_location(loc.trim()).to_string_lossy().to_string()),
        }
    }

    fn sort_key(&self) -> (&str, &str, i64, i64) {
        (
            self.album_artist.as_deref().unwrap_or(""),
            self.album.as_str(),
            self.disc.unwrap_or(0),
            self.track.unwrap_or(0),
        )
    }

    fn keys(&self, discs: Option<&DiscLengths>) -> Vec<(KeyKind, TrackKey)> {
        let mut keys = Vec::new();
        if let Some(location) = &self.location {
            push_key(&mut keys, KeyKind::Location, TrackKey::Location(location.clone()));
        }

        let Some(title) = &self.title else {
            push_key(&mut keys, KeyKind::Position, TrackKey::Position(self.position));
            return keys;
        };
        let alt_artist = self
            .album_artist
            .as_ref()
            .filter(|album_artist| **album_artist != self.artist);

        let numbered = |artist: &str, track: i64, disc: Option<i64>| TrackKey::Numbered {
            title: title.clone(),
            artist: artist.to_string(),
            album: self.album.clone(),
            track,
            disc,
        };
        let continuous = |artist: &str, track: i64| TrackKey::Continuous {
            title: title.clone(),
            artist: artist.to_string(),
            album: self.album.clone(),
            track,
        };

        if let Some(track) = self.track {
            push_key(&mut keys, KeyKind::Numbered, numbered(&self.artist, track, self.disc));
            if let Some(alt) = alt_artist {
                push_key(&mut keys, KeyKind::AlbumArtist, numbered(alt, track, self.disc));
            }
            if self.disc.is_some() && discs.is_some_and(DiscLengths::is_single_disc) {
                push_key(&mut keys, KeyKind::DiscAgnostic, numbered(&self.artist, track, None));
                if let Some(alt) = alt_artist {
                    push_key(&mut keys, KeyKind::DiscAgnostic, numbered(alt, track, None));
                }
            }
            let whole_album = match (discs, self.disc) {
                (Some(discs), Some(disc)) => Some(track + discs.offset(disc)),
                (_, None) | (_, Some(1)) => Some(track),
                _ => None,
            };
            if let Some(whole) = whole_album {
                push_key(&mut keys, KeyKind::Continuous, continuous(&self.artist, whole));
                if let Some(alt) = alt_artist {
                    push_key(&mut keys, KeyKind::ContinuousAlbumArtist, continuous(alt, whole));
                }
            }
        }

        push_key(
            &mut keys,
            KeyKind::Untracked,
            TrackKey::Untracked {
                title: title.clone(),
                artist: self.artist.clone(),
                album: self.album.clone(),
            },
        );
        keys
    }
}

fn push_key(keys: &mut Vec<(KeyKind, TrackKey)>, kind: KeyKind, key: TrackKey) {
    if !keys.iter().any(|(_, existing)| *existing == key) {
        keys.push((kind, key));
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    let value = value?;
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed.to_lowercase())
    }
}

fn facts_of<T: Matchable>(tracks: &[T]) -> (Vec<Facts>, Option<DiscLengths>) {
    let facts = tracks
        .iter()
        .enumerate()
        .map(|(position, track)| Facts::of(position, track))
        .collect();
    (facts, DiscLengths::of(tracks))
}

/// Keys generated by more than one track of the same collection.
fn ambiguous_keys(keys: &[Vec<(KeyKind, TrackKey)>]) -> HashSet<&TrackKey> {
    let mut owner: HashMap<&TrackKey, usize> = HashMap::new();
    let mut duplicates = HashSet::new();
    for (idx, track_keys) in keys.iter().enumerate() {
        for (_, key) in track_keys {
            match owner.get(key) {
                Some(other) if *other != idx => {
                    duplicates.insert(key);
                }
                Some(_) => {}
                None => {
                    owner.insert(key, idx);
                }
            }
        }
    }
    duplicates
}

/// Pair tracks of `a` with tracks of `b`.
///
/// With `order_by_source` the pairs follow the larger collection's order,
/// otherwise the smaller collection's album/disc/track order. On equal sizes
/// `a` counts as the larger one. The pairing itself does not depend on which
/// collection is passed first.
pub fn match_tracks<A: Matchable, B: Matchable>(
    a: &[A],
    b: &[B],
    order_by_source: bool,
) -> Matching {
    let (facts_a, discs_a) = facts_of(a);
    let (facts_b, discs_b) = facts_of(b);
    let mut pairs = pair_up(&facts_a, discs_a.as_ref(), &facts_b, discs_b.as_ref());

    let a_is_source = facts_a.len() >= facts_b.len();
    pairs.sort_by(|x, y| {
        let (facts, i, j) = if order_by_source == a_is_source {
            (&facts_a, x.a, y.a)
        } else {
            (&facts_b, x.b, y.b)
        };
        if order_by_source {
            i.cmp(&j)
        } else {
            facts[i]
                .sort_key()
                .cmp(&facts[j].sort_key())
                .then(i.cmp(&j))
        }
    });

    let mut seen_a = vec![false; a.len()];
    let mut seen_b = vec![false; b.len()];
    for pair in &pairs {
        seen_a[pair.a] = true;
        seen_b[pair.b] = true;
    }
    let matching = Matching {
        unmatched_a: unmatched(&seen_a),
        unmatched_b: unmatched(&seen_b),
        pairs,
    };
    info!(
        "Matched {} pair(s); {} unmatched on the left, {} on the right",
        matching.pairs.len(),
        matching.unmatched_a.len(),
        matching.unmatched_b.len()
    );
    matching
}

fn unmatched(seen: &[bool]) -> Vec<usize> {
    seen.iter()
        .enumerate()
        .filter(|(_, matched)| !**matched)
        .map(|(idx, _)| idx)
        .collect()
}

type SortKey<'f> = ((&'f str, &'f str, i64, i64), usize);

/// Both ends of a hit, lowest first, so the order is the same from either side.
fn tie_break<'f>(a: &'f [Facts], b: &'f [Facts], hit: &Pair) -> [SortKey<'f>; 2] {
    let mut ends = [
        (a[hit.a].sort_key(), hit.a),
        (b[hit.b].sort_key(), hit.b),
    ];
    ends.sort();
    ends
}

/// Every shared unambiguous key is a hit. Hits are granted by key kind, most
/// trusted first, and each track takes part in at most one pair.
fn pair_up(
    a: &[Facts],
    discs_a: Option<&DiscLengths>,
    b: &[Facts],
    discs_b: Option<&DiscLengths>,
) -> Vec<Pair> {
    let keys_a: Vec<_> = a.iter().map(|f| f.keys(discs_a)).collect();
    let keys_b: Vec<_> = b.iter().map(|f| f.keys(discs_b)).collect();

    let dups_a = ambiguous_keys(&keys_a);
    let dups_b = ambiguous_keys(&keys_b);
    for key in dups_a.iter().chain(dups_b.iter()) {
        debug!("Ignoring ambiguous key {}", key);
    }

    let mut lookup: HashMap<&TrackKey, (usize, KeyKind)> = HashMap::new();
    for (idx, keys) in keys_a.iter().enumerate() {
        for (kind, key) in keys {
            if !dups_a.contains(key) {
                lookup.insert(key, (idx, *kind));
            }
        }
    }

    let mut hits = Vec::new();
    for (j, keys) in keys_b.iter().enumerate() {
        for (kind, key) in keys {
            if dups_b.contains(key) {
                continue;
            }
            if let Some((i, kind_a)) = lookup.get(key).copied() {
                hits.push(Pair {
                    a: i,
                    b: j,
                    via: (*kind).max(kind_a),
                });
            }
        }
    }
    hits.sort_by(|x, y| {
        x.via
            .cmp(&y.via)
            .then_with(|| tie_break(a, b, x).cmp(&tie_break(a, b, y)))
    });

    let mut taken_a = vec![false; a.len()];
    let mut taken_b = vec![false; b.len()];
    let mut pairs = Vec::new();
    for hit in hits {
        if taken_a[hit.a] || taken_b[hit.b] {
            continue;
        }
        taken_a[hit.a] = true;
        taken_b[hit.b] = true;
        pairs.push(hit);
    }
    pairs
}
