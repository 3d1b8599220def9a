//! Key/value state stores used as legacy recovery tiers.
//!
//! Editor hosts keep two such stores: a durable global one and a
//! per-workspace one. Both are enumerable here so the one-time migration can
//! find every notebook entry without reaching into store internals.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::FutureExt;
use log::warn;
use serde_json::{Map, Value};

/// An enumerable key/value store of JSON values.
///
/// Reads come from memory; `update` may touch disk and is async.
pub trait Memento: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    /// Set `key` to `value`, or remove it when `value` is `None`.
    fn update<'a>(&'a self, key: &'a str, value: Option<Value>) -> BoxFuture<'a, io::Result<()>>;

    fn keys(&self) -> Vec<String>;
}

fn lock(values: &Mutex<Map<String, Value>>) -> MutexGuard<'_, Map<String, Value>> {
    values.lock().unwrap_or_else(|e| e.into_inner())
}

/// Apply an update in memory. Returns whether the map changed.
fn apply(values: &mut Map<String, Value>, key: &str, value: Option<Value>) -> bool {
    match value {
        Some(v) => {
            values.insert(key.to_string(), v);
            true
        }
        None => values.remove(key).is_some(),
    }
}

/// In-memory store; contents are lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryMemento {
    values: Mutex<Map<String, Value>>,
}

impl MemoryMemento {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Memento for MemoryMemento {
    fn get(&self, key: &str) -> Option<Value> {
        lock(&self.values).get(key).cloned()
    }

    fn update<'a>(&'a self, key: &'a str, value: Option<Value>) -> BoxFuture<'a, io::Result<()>> {
        apply(&mut lock(&self.values), key, value);
        futures::future::ready(Ok(())).boxed()
    }

    fn keys(&self) -> Vec<String> {
        lock(&self.values).keys().cloned().collect()
    }
}

/// Store persisted as a single JSON object on disk.
///
/// The file is read once when opened and rewritten on every update.
#[derive(Debug)]
pub struct JsonFileMemento {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
    // Serializes file writes so the last update is the one on disk
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileMemento {
    /// Open the store at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Value>(&contents) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    warn!("[memento] Ignoring malformed state file {:?}", path);
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };
        Self {
            path,
            values: Mutex::new(values),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, json: String) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to temp file, then atomic rename
        let tmp = self
            .path
            .with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));
        if let Err(e) = async {
            tokio::fs::write(&tmp, json).await?;
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await
        {
            tokio::fs::remove_file(&tmp).await.ok();
            return Err(e);
        }
        Ok(())
    }
}

impl Memento for JsonFileMemento {
    fn get(&self, key: &str) -> Option<Value> {
        lock(&self.values).get(key).cloned()
    }

    fn update<'a>(&'a self, key: &'a str, value: Option<Value>) -> BoxFuture<'a, io::Result<()>> {
        async move {
            let _writing = self.write_lock.lock().await;
            let json = {
                let mut values = lock(&self.values);
                if !apply(&mut values, key, value) {
                    return Ok(());
                }
                serde_json::to_string_pretty(&*values).map_err(io::Error::other)?
            };
            self.persist(json).await
        }
        .boxed()
    }

    fn keys(&self) -> Vec<String> {
        lock(&self.values).keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_get_update_remove() {
        let store = MemoryMemento::new();
        assert!(store.get("a").is_none());

        store.update("a", Some(json!(1))).await.unwrap();
        assert_eq!(store.get("a"), Some(json!(1)));
        assert_eq!(store.keys(), vec!["a".to_string()]);

        store.update("a", None).await.unwrap();
        assert!(store.get("a").is_none());
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_json_file_persists_across_opens() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state").join("global.json");

        {
            let store = JsonFileMemento::open(&path);
            store
                .update("k", Some(json!({"contents": "x"})))
                .await
                .unwrap();
        }

        let reopened = JsonFileMemento::open(&path);
        assert_eq!(reopened.get("k"), Some(json!({"contents": "x"})));
    }

    #[tokio::test]
    async fn test_json_file_remove_persists() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("workspace.json");

        let store = JsonFileMemento::open(&path);
        store.update("k", Some(json!("v"))).await.unwrap();
        store.update("k", None).await.unwrap();

        let reopened = JsonFileMemento::open(&path);
        assert!(reopened.get("k").is_none());
    }

    #[tokio::test]
    async fn test_json_file_concurrent_updates_all_land() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("global.json");
        let store = JsonFileMemento::open(&path);

        let keys: Vec<String> = (0..8).map(|i| format!("k{}", i)).collect();
        let updates = keys.iter().map(|k| store.update(k, Some(json!(true))));
        for result in futures::future::join_all(updates).await {
            result.unwrap();
        }

        assert_eq!(JsonFileMemento::open(&path).keys().len(), 8);
    }

    #[test]
    fn test_json_file_malformed_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();

        let store = JsonFileMemento::open(&path);
        assert!(store.keys().is_empty());
        assert_eq!(store.path(), path.as_path());
    }
}
