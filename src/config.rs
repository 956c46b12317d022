use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::scanner::hash::HashPolicy;

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults; the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Maximum number of open database connections.
    pub pool_size: usize,
    /// Which files get a content hash.
    pub hash_policy: HashPolicy,
    /// Root directory that reorganizing moves file into.
    pub target_root: Option<PathBuf>,
    /// Concurrent workers per operation.
    pub workers: WorkerConfig,
    /// Extra album names never treated as compilations.
    pub compilation_overrides: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            pool_size: 10,
            hash_policy: HashPolicy::default(),
            target_root: None,
            workers: WorkerConfig::default(),
            compilation_overrides: Vec::new(),
        }
    }
}

/// Maximum in-flight items for each batch operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Folder scan: reconcile + hash (+ tags) per file.
    pub scan: usize,
    /// Tag scan over stored music files.
    pub tags: usize,
    /// Existence check for soft deletion.
    pub check: usize,
    /// Actions from an execute list.
    pub execute: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan: 16,
            tags: 6,
            check: 3,
            execute: 50,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/filescanner/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("filescanner.db")
    } else {
        // Fallback: current directory
        PathBuf::from("filescanner.db")
    }
}
