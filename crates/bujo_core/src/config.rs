//! Journal configuration.
//!
//! # Responsibility
//! - Load `bujo.toml` settings for the database, logging and replication.
//! - Provide defaults so a missing file still yields a usable config.
//!
//! # Invariants
//! - Every field has a default; partial files are valid.

use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "bujo.toml";

const DEFAULT_DB_FILE: &str = "bujo.db";
const DEFAULT_REMOTE_URL: &str = "http://localhost:5984/";
const DEFAULT_REMOTE_DATABASE: &str = "default";
const DEFAULT_SYNC_BATCH_SIZE: usize = 100;

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: toml::de::Error },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse config `{}`: {source}", path.display())
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Replication is off unless a `[sync]` table is present.
    #[serde(default)]
    pub sync: Option<SyncConfig>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            logging: LoggingConfig::default(),
            sync: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    /// Absolute directory for rolling log files; logging stays off when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_remote_url")]
    pub remote_url: String,
    #[serde(default = "default_remote_database")]
    pub database: String,
    #[serde(default = "default_sync_batch_size")]
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_url: default_remote_url(),
            database: default_remote_database(),
            batch_size: default_sync_batch_size(),
        }
    }
}

impl SyncConfig {
    /// Full address of the remote database, e.g. `http://localhost:5984/default`.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.remote_url.trim_end_matches('/'),
            self.database.trim_start_matches('/')
        )
    }
}

/// Loads configuration from `path`; a missing file yields defaults.
pub fn load_config(path: &Path) -> Result<JournalConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(JournalConfig::default())
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse_config(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses configuration from TOML text.
pub fn parse_config(raw: &str) -> Result<JournalConfig, toml::de::Error> {
    toml::from_str(raw)
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_FILE)
}

fn default_level() -> String {
    default_log_level().to_string()
}

fn default_remote_url() -> String {
    DEFAULT_REMOTE_URL.to_string()
}

fn default_remote_database() -> String {
    DEFAULT_REMOTE_DATABASE.to_string()
}

fn default_sync_batch_size() -> usize {
    DEFAULT_SYNC_BATCH_SIZE
}
