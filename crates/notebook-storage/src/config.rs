//! Storage settings.
//!
//! Settings live in a JSON file in the user's config directory:
//! - macOS: ~/Library/Application Support/nbstore/settings.json
//! - Linux: ~/.config/nbstore/settings.json
//! - Windows: C:\Users\<User>\AppData\Roaming\nbstore\settings.json
//!
//! Backups and state stores default to the user's cache directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::backup::DEFAULT_BACKUP_DEBOUNCE;

/// Root of everything nbstore keeps on disk outside the config file.
pub fn base_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("nbstore")
}

/// Directory holding shadow files of uncommitted contents.
pub fn default_storage_dir() -> PathBuf {
    base_dir().join("notebook-storage")
}

pub fn default_global_state_path() -> PathBuf {
    base_dir().join("global-state.json")
}

pub fn default_workspace_state_path() -> PathBuf {
    base_dir().join("workspace-state.json")
}

fn default_backup_debounce_ms() -> u64 {
    DEFAULT_BACKUP_DEBOUNCE.as_millis() as u64
}

/// Default location of the settings file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nbstore")
        .join("settings.json")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where shadow files are written
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Quiet period before a backup snapshot is written
    #[serde(default = "default_backup_debounce_ms")]
    pub backup_debounce_ms: u64,

    /// When the host saves on every change, skip snapshot backups
    #[serde(default)]
    pub auto_save: bool,

    /// Durable key/value store (legacy recovery tier)
    #[serde(default = "default_global_state_path")]
    pub global_state_path: PathBuf,

    /// Per-workspace key/value store (legacy recovery tier)
    #[serde(default = "default_workspace_state_path")]
    pub workspace_state_path: PathBuf,

    /// Python used to pick the language version of new notebooks
    #[serde(default)]
    pub python: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            backup_debounce_ms: default_backup_debounce_ms(),
            auto_save: false,
            global_state_path: default_global_state_path(),
            workspace_state_path: default_workspace_state_path(),
            python: None,
        }
    }
}

impl StorageConfig {
    /// Everything rooted under `dir`, for tests and portable installs.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            storage_dir: dir.join("notebook-storage"),
            global_state_path: dir.join("global-state.json"),
            workspace_state_path: dir.join("workspace-state.json"),
            ..Self::default()
        }
    }

    pub fn backup_debounce(&self) -> Duration {
        Duration::from_millis(self.backup_debounce_ms)
    }
}

/// Load settings from `path` (or the default location).
///
/// A missing file yields defaults; a malformed one is logged and ignored.
pub fn load_config(path: Option<&Path>) -> StorageConfig {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    if !path.exists() {
        return StorageConfig::default();
    }
    match std::fs::read_to_string(&path)
        .map_err(anyhow::Error::from)
        .and_then(|s| serde_json::from_str(&s).map_err(anyhow::Error::from))
    {
        Ok(config) => config,
        Err(e) => {
            warn!("[settings] Ignoring unreadable settings {:?}: {}", path, e);
            StorageConfig::default()
        }
    }
}

/// Write settings to `path` (or the default location).
pub fn save_config(config: &StorageConfig, path: Option<&Path>) -> Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(config)?)?;
    Ok(())
}
