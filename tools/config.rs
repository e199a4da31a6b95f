use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use library::{NamingOptions, SingletonPolicy, Source};
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub version: u32,
    /// Base directory for destination paths.
    pub music_root: String,
    /// Player database; empty disables the database layer.
    pub database_path: String,
    pub priority: Vec<Source>,
    pub order_by_source: bool,
    pub naming: NamingOptions,
    pub singletons: SingletonPolicy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            music_root: "".to_string(),
            database_path: "".to_string(),
            priority: vec![Source::File, Source::Database, Source::External],
            order_by_source: false,
            naming: NamingOptions::default(),
            singletons: SingletonPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("RECONCILE_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(ReconcileConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: ReconcileConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.priority.is_empty() {
            config.priority = ReconcileConfig::default().priority;
        }
        if config.naming.max_path_len == 0 {
            config.naming.max_path_len = NamingOptions::default().max_path_len;
        }
        return Ok((config, false));
    }

    let config = ReconcileConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &ReconcileConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

/// `None` for an empty setting.
pub fn resolve_optional(config_path: &Path, value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(resolve_path(config_path, trimmed))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use library::Source;

    use super::{load_or_create_config, resolve_optional, resolve_path};

    #[test]
    fn creates_defaults_then_reads_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/config.yaml");
        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        assert_eq!(config.singletons.min_artist_tracks, 5);
        assert!(path.exists());

        fs::write(
            &path,
            "music_root: /music\npriority: [database, file]\nnaming:\n  nest: false\n",
        )
        .unwrap();
        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(config.music_root, "/music");
        assert_eq!(config.priority, vec![Source::Database, Source::File]);
        assert!(!config.naming.nest);
        assert!(config.naming.track_numbers);
        assert_eq!(config.naming.max_path_len, 255);
    }

    #[test]
    fn relative_paths_follow_the_config_file() {
        let config = Path::new("/etc/reconcile/config.yaml");
        assert_eq!(
            resolve_path(config, "player.db"),
            Path::new("/etc/reconcile/player.db")
        );
        assert_eq!(resolve_path(config, "/var/db"), Path::new("/var/db"));
        assert_eq!(resolve_optional(config, "  "), None);
    }
}
