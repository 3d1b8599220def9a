//! Recovery of uncommitted notebook edits.
//!
//! Unsaved contents can live in three places, checked in order:
//!
//! ```text
//! 1. <storage_dir>/<sha256(key)>.ipynb    shadow file, written by BackupWriter
//! 2. global key/value store               legacy, migrated out on first hit
//! 3. workspace key/value store            legacy, single use
//! ```
//!
//! Tiers 1 and 2 carry `lastModifiedTimeMs`; when the notebook file on disk
//! was modified after that time the record is stale and ignored. Any failure
//! while reading a tier counts as a miss.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::memento::Memento;
use crate::resource::{NotebookResource, STORAGE_KEY_PREFIX};

/// Global-store flag recording that the one-time migration has run.
pub const NOTEBOOK_TRANSFER_KEY: &str = "notebook-transfered";

/// Snapshot of uncommitted contents.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_time_ms: Option<i64>,
}

impl StorageRecord {
    /// A record of `contents` stamped with the current time.
    pub fn now(contents: String) -> Self {
        Self {
            contents: Some(contents),
            last_modified_time_ms: Some(Utc::now().timestamp_millis()),
        }
    }
}

/// Shadow file name for a storage key.
///
/// Keys embed file URIs, so they are hashed into a safe, deterministic name.
pub fn shadow_file_name(key: &str) -> String {
    let hash = hex::encode(Sha256::digest(key.as_bytes()));
    format!("{}.ipynb", hash)
}

/// Write a record to `path`, via a temp file and rename.
pub async fn write_record(path: &Path, record: &StorageRecord) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "shadow path has no parent"))?;
    tokio::fs::create_dir_all(dir).await?;

    let json = serde_json::to_string(record).map_err(io::Error::other)?;
    let tmp = dir.join(format!(".tmp.{}", uuid::Uuid::new_v4()));
    if let Err(e) = async {
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await
    }
    .await
    {
        tokio::fs::remove_file(&tmp).await.ok();
        return Err(e);
    }
    Ok(())
}

/// Delete a shadow file. A file that is already gone is not an error.
pub async fn remove_record(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Looks up recoverable contents across the three tiers.
///
/// One instance is shared by every open notebook.
pub struct RecoveryStore {
    storage_dir: PathBuf,
    global: Arc<dyn Memento>,
    workspace: Arc<dyn Memento>,
    migration_lock: Mutex<()>,
    migrations_run: AtomicUsize,
}

impl RecoveryStore {
    pub fn new(
        storage_dir: PathBuf,
        global: Arc<dyn Memento>,
        workspace: Arc<dyn Memento>,
    ) -> Self {
        Self {
            storage_dir,
            global,
            workspace,
            migration_lock: Mutex::new(()),
            migrations_run: AtomicUsize::new(0),
        }
    }

    /// Shadow file path for a storage key.
    pub fn shadow_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(shadow_file_name(key))
    }

    /// Number of migration sweeps this process has performed.
    pub fn migrations_run(&self) -> usize {
        self.migrations_run.load(Ordering::Relaxed)
    }

    /// Find unsaved contents for `resource`, newest tier first.
    ///
    /// A global hit triggers the one-time migration and a workspace hit is
    /// consumed. Untitled notebooks never recover: they have no stable key.
    pub async fn recoverable_contents(&self, resource: &NotebookResource) -> Option<String> {
        self.lookup(resource, true).await
    }

    /// Like `recoverable_contents`, but leaves every tier as it found it.
    pub async fn peek_contents(&self, resource: &NotebookResource) -> Option<String> {
        self.lookup(resource, false).await
    }

    async fn lookup(&self, resource: &NotebookResource, consume: bool) -> Option<String> {
        if resource.is_untitled() {
            return None;
        }
        let key = resource.storage_key();

        if let Some(contents) = self.from_shadow_file(resource, &key).await {
            info!("[recovery] Found {} in shadow file", resource);
            return Some(contents);
        }
        if let Some(contents) = self.from_global(resource, &key, consume).await {
            info!("[recovery] Found {} in global state", resource);
            return Some(contents);
        }
        if let Some(contents) = self.from_workspace(&key, consume).await {
            info!("[recovery] Found {} in workspace state", resource);
            return Some(contents);
        }
        None
    }

    async fn from_shadow_file(&self, resource: &NotebookResource, key: &str) -> Option<String> {
        let path = self.shadow_path(key);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!("[recovery] Cannot read shadow file {:?}: {}", path, e);
                }
                return None;
            }
        };
        let record: StorageRecord = match serde_json::from_str(&text) {
            Ok(record) => record,
            Err(e) => {
                debug!("[recovery] Cannot parse shadow file {:?}: {}", path, e);
                return None;
            }
        };
        self.fresh_contents(resource, record).await
    }

    async fn from_global(
        &self,
        resource: &NotebookResource,
        key: &str,
        migrate: bool,
    ) -> Option<String> {
        let value = self.global.get(key)?;

        // Any hit here means legacy entries exist; move them all out
        if migrate {
            self.migrate_global().await;
        }

        let record: StorageRecord = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(e) => {
                debug!("[recovery] Cannot parse global entry {}: {}", key, e);
                return None;
            }
        };
        self.fresh_contents(resource, record).await
    }

    async fn from_workspace(&self, key: &str, consume: bool) -> Option<String> {
        let contents = self
            .workspace
            .get(key)?
            .as_str()
            .filter(|s| !s.is_empty())?
            .to_string();

        // Single use: never recover the same workspace entry twice
        if consume {
            if let Err(e) = self.workspace.update(key, None).await {
                warn!("[recovery] Failed to clear workspace entry {}: {}", key, e);
            }
        }
        Some(contents)
    }

    /// The record's contents, unless the file on disk is newer than it.
    async fn fresh_contents(
        &self,
        resource: &NotebookResource,
        record: StorageRecord,
    ) -> Option<String> {
        if let (Some(recorded_ms), Some(path)) = (record.last_modified_time_ms, resource.path()) {
            let modified_ms = match file_modified_ms(path).await {
                Ok(ms) => ms,
                Err(e) => {
                    debug!("[recovery] Cannot stat {:?}: {}", path, e);
                    return None;
                }
            };
            if modified_ms > recorded_ms {
                info!(
                    "[recovery] Ignoring stale contents for {} (file {} > record {})",
                    resource, modified_ms, recorded_ms
                );
                return None;
            }
        }
        record.contents.filter(|c| !c.is_empty())
    }

    /// Move every legacy global entry into its shadow file, once.
    ///
    /// The persisted flag makes this a one-time sweep per installation; the
    /// lock makes check-and-set atomic when two notebooks load at once.
    /// Returns whether a sweep ran.
    pub async fn migrate_global(&self) -> bool {
        let _guard = self.migration_lock.lock().await;

        let done = self
            .global
            .get(NOTEBOOK_TRANSFER_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if done {
            return false;
        }
        if let Err(e) = self
            .global
            .update(NOTEBOOK_TRANSFER_KEY, Some(serde_json::Value::Bool(true)))
            .await
        {
            warn!("[recovery] Failed to persist migration flag: {}", e);
        }
        self.migrations_run.fetch_add(1, Ordering::Relaxed);

        let mut moved = 0usize;
        for key in self.global.keys() {
            if !key.starts_with(STORAGE_KEY_PREFIX) {
                continue;
            }
            let record = self
                .global
                .get(&key)
                .and_then(|v| serde_json::from_value::<StorageRecord>(v).ok())
                .filter(|r| r.contents.is_some());
            if let Some(record) = record {
                let path = self.shadow_path(&key);
                let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
                if !exists {
                    match write_record(&path, &record).await {
                        Ok(()) => moved += 1,
                        Err(e) => warn!("[recovery] Failed to migrate {}: {}", key, e),
                    }
                }
            }
            if let Err(e) = self.global.update(&key, None).await {
                warn!("[recovery] Failed to remove global entry {}: {}", key, e);
            }
        }

        info!(
            "[recovery] Migrated {} global entr{} to {:?}",
            moved,
            if moved == 1 { "y" } else { "ies" },
            self.storage_dir
        );
        true
    }
}

/// Modification time of `path` in milliseconds since the Unix epoch.
pub async fn file_modified_ms(path: &Path) -> io::Result<i64> {
    let modified = tokio::fs::metadata(path).await?.modified()?;
    Ok(DateTime::<Utc>::from(modified).timestamp_millis())
}
