mod config;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use config::{config_path_from_env, load_or_create_config, resolve_optional, ReconcileConfig};
use library::tracklist::{
    augment, format_simple, parse_simple, records_from_json, records_to_json, simplify,
};
use library::{
    audio_files, flag_singletons, match_tracks, CompositeTrack, PlayerDb, Priority,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: reconcile <match DIR TRACKLIST | paths DIR | augment TRACKLIST | simplify RECORDS_JSON>";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Wrote default config to {:?}", config_path);
    }

    let args: Vec<String> = env::args().skip(1).collect();
    let arg = |idx: usize| args.get(idx).map(String::as_str).ok_or(USAGE);
    match arg(0)? {
        "match" => run_match(&config_path, &config, Path::new(arg(1)?), Path::new(arg(2)?)),
        "paths" => run_paths(&config_path, &config, Path::new(arg(1)?)),
        "augment" => {
            let list = parse_simple(&fs::read_to_string(arg(1)?)?)?;
            println!("{}", records_to_json(&augment(&list))?);
            Ok(())
        }
        "simplify" => {
            let records = records_from_json(&fs::read_to_string(arg(1)?)?)?;
            print!("{}", format_simple(&simplify(&records)?));
            Ok(())
        }
        _ => Err(USAGE.into()),
    }
}

fn open_db(
    config_path: &Path,
    config: &ReconcileConfig,
) -> Result<Option<PlayerDb>, Box<dyn std::error::Error>> {
    match resolve_optional(config_path, &config.database_path) {
        Some(path) if path.exists() => Ok(Some(PlayerDb::open(&path)?)),
        Some(path) => {
            warn!("Player database {:?} not found; using file tags only", path);
            Ok(None)
        }
        None => Ok(None),
    }
}

fn open_tracks(
    dir: &Path,
    db: Option<&PlayerDb>,
    priority: &Priority,
) -> Vec<(PathBuf, CompositeTrack)> {
    let mut tracks = Vec::new();
    for path in audio_files(dir) {
        match CompositeTrack::open(&path, db, None, priority.clone()) {
            Ok(track) => tracks.push((path, track)),
            Err(err) => warn!("Skipping {:?}: {}", path, err),
        }
    }
    info!("Opened {} track(s) under {:?}", tracks.len(), dir);
    tracks
}

fn run_match(
    config_path: &Path,
    config: &ReconcileConfig,
    dir: &Path,
    tracklist: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_db(config_path, config)?;
    let priority = Priority::new(config.priority.iter().copied());
    let files = open_tracks(dir, db.as_ref(), &priority);
    let list = parse_simple(&fs::read_to_string(tracklist)?)?;
    let records = augment(&list);

    let tracks: Vec<&CompositeTrack> = files.iter().map(|(_, track)| track).collect();
    let matching = match_tracks(&tracks, &records, config.order_by_source);
    for pair in &matching.pairs {
        let record = &records[pair.b];
        println!(
            "{} <- {:?} [{:?}]",
            record.title, files[pair.a].0, pair.via
        );
    }
    for idx in &matching.unmatched_a {
        println!("unmatched file: {:?}", files[*idx].0);
    }
    for idx in &matching.unmatched_b {
        println!("unmatched entry: {}", records[*idx].title);
    }
    Ok(())
}

fn run_paths(
    config_path: &Path,
    config: &ReconcileConfig,
    dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_db(config_path, config)?;
    let priority = Priority::new(config.priority.iter().copied());
    let files = open_tracks(dir, db.as_ref(), &priority);
    let base = resolve_optional(config_path, &config.music_root).unwrap_or_else(|| dir.to_path_buf());

    let records: Vec<_> = files.iter().map(|(_, track)| track.to_record()).collect();
    let singletons = flag_singletons(&records, &config.singletons);
    for ((path, track), singleton) in files.iter().zip(singletons) {
        let destination = track.destination_path(&base, &config.naming, singleton);
        if destination != *path {
            println!("{:?} -> {:?}", path, destination);
        }
    }
    Ok(())
}
