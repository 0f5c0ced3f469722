//! Sync configuration.
//!
//! Loaded from a YAML file, then overridden by environment variables:
//! - `WIKI_SYNC_BASE_PATH`: root directory for all project folders (supports ~)
//! - `WIKI_SYNC_ENABLED`: `true`/`false`
//! - `WIKI_SYNC_CONFLICT_STRATEGY`: `fileWins`, `dbWins` or `manual`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const ENV_BASE_PATH: &str = "WIKI_SYNC_BASE_PATH";
pub const ENV_ENABLED: &str = "WIKI_SYNC_ENABLED";
pub const ENV_CONFLICT_STRATEGY: &str = "WIKI_SYNC_CONFLICT_STRATEGY";

/// Which side wins when a page differs between the store and its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictStrategy {
    /// Newer files overwrite records; folder renames on disk rename projects
    #[default]
    #[serde(alias = "file_wins")]
    FileWins,
    /// Records are authoritative; folders follow project renames
    #[serde(alias = "db_wins")]
    DbWins,
    /// Nothing is overwritten automatically; differences are reported
    Manual,
}

impl ConflictStrategy {
    /// Whether metadata found on disk (parent links, folder names) flows
    /// back into the store.
    pub fn accepts_disk_metadata(self) -> bool {
        !matches!(self, ConflictStrategy::DbWins)
    }
}

impl FromStr for ConflictStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fileWins" | "file_wins" => Ok(ConflictStrategy::FileWins),
            "dbWins" | "db_wins" => Ok(ConflictStrategy::DbWins),
            "manual" => Ok(ConflictStrategy::Manual),
            other => Err(ConfigError::InvalidStrategy(other.to_string())),
        }
    }
}

/// Committer identity written into every repository the backend creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitIdentity {
    #[serde(default = "default_git_name")]
    pub name: String,
    #[serde(default = "default_git_email")]
    pub email: String,
}

impl Default for GitIdentity {
    fn default() -> Self {
        Self {
            name: default_git_name(),
            email: default_git_email(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Root directory holding one folder per top-level project
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    /// Global on/off switch
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,

    #[serde(default)]
    pub git_identity: GitIdentity,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            enabled: false,
            conflict_strategy: ConflictStrategy::default(),
            git_identity: GitIdentity::default(),
        }
    }
}

impl SyncConfig {
    /// Enabled config rooted at `base_path`, everything else defaulted.
    pub fn for_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            enabled: true,
            ..Default::default()
        }
    }

    /// Load from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: SyncConfig = serde_yaml::from_str(&contents)?;
        config.base_path = expand_tilde(&config.base_path.to_string_lossy());
        Ok(config)
    }

    /// Defaults overridden by environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply environment overrides on top of the current values.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(base) = lookup(ENV_BASE_PATH) {
            self.base_path = expand_tilde(&base);
        }
        if let Some(enabled) = lookup(ENV_ENABLED) {
            self.enabled = parse_bool(&enabled)
                .ok_or_else(|| ConfigError::InvalidBool(ENV_ENABLED, enabled.clone()))?;
        }
        if let Some(strategy) = lookup(ENV_CONFLICT_STRATEGY) {
            self.conflict_strategy = strategy.parse()?;
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn default_base_path() -> PathBuf {
    PathBuf::from("/var/lib/wiki-sync/files")
}

fn default_git_name() -> String {
    "Wiki Sync".to_string()
}

fn default_git_email() -> String {
    "wiki-sync@localhost".to_string()
}

/// Expand ~ or ~/ prefix to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Unknown conflict strategy '{0}' (expected fileWins, dbWins or manual)")]
    InvalidStrategy(String),

    #[error("{0} must be true or false, got '{1}'")]
    InvalidBool(&'static str, String),
}
