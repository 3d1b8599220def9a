//! Registry of open notebooks, keyed by resource URI.
//!
//! There is exactly one entry per open notebook. Save-as moves the entry to
//! the new key so later edits addressed to the new resource find it and the
//! old key is gone.

use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::{broadcast, Mutex};

use crate::cell::Cell;
use crate::document::{StorageChange, StorageContext};
use crate::edits::NotebookEdit;
use crate::error::{Result, StorageError};
use crate::handle::StorageHandle;
use crate::resource::NotebookResource;

pub type OpenDocuments = Arc<Mutex<HashMap<String, StorageHandle>>>;

#[derive(Clone)]
pub struct DocumentRegistry {
    documents: OpenDocuments,
    context: Arc<StorageContext>,
}

impl DocumentRegistry {
    pub fn new(context: StorageContext) -> Self {
        Self {
            documents: Arc::new(Mutex::new(HashMap::new())),
            context: Arc::new(context),
        }
    }

    pub fn context(&self) -> &StorageContext {
        &self.context
    }

    /// Open `resource`, or return the already-open notebook.
    ///
    /// A new notebook is loaded before this returns. If the load fails the
    /// entry is dropped again.
    pub async fn open(
        &self,
        resource: NotebookResource,
        initial_contents: Option<String>,
    ) -> Result<StorageHandle> {
        let key = resource.to_uri_string();
        let (handle, pending) = {
            let mut documents = self.documents.lock().await;
            if let Some(handle) = documents.get(&key) {
                return Ok(handle.clone());
            }
            info!("[registry] Opening {}", resource);
            let handle = StorageHandle::spawn(resource.clone(), self.context.clone());
            // Queue the load while holding the lock so no request can race ahead of it
            let pending = handle.begin_load(resource, initial_contents).await?;
            documents.insert(key.clone(), handle.clone());
            (handle, pending)
        };

        let loaded: Result<Vec<Cell>> = pending.await.map_err(|_| StorageError::Closed)?;
        if let Err(e) = loaded {
            warn!("[registry] Failed to open {}: {}", key, e);
            self.documents.lock().await.remove(&key);
            return Err(e);
        }
        Ok(handle)
    }

    pub async fn get(&self, resource: &NotebookResource) -> Option<StorageHandle> {
        self.documents
            .lock()
            .await
            .get(&resource.to_uri_string())
            .cloned()
    }

    /// Forget `resource`. Returns whether it was open.
    pub async fn close(&self, resource: &NotebookResource) -> bool {
        let removed = self
            .documents
            .lock()
            .await
            .remove(&resource.to_uri_string())
            .is_some();
        if removed {
            info!("[registry] Closed {}", resource);
        }
        removed
    }

    /// Apply an edit to an open notebook.
    ///
    /// Edits for notebooks that are not open are ignored.
    pub async fn apply(&self, resource: &NotebookResource, edit: NotebookEdit) -> Result<bool> {
        match self.get(resource).await {
            Some(handle) => handle.apply(edit).await,
            None => Ok(false),
        }
    }

    /// Save an open notebook in place. Returns whether it was open.
    pub async fn save(&self, resource: &NotebookResource) -> Result<bool> {
        match self.get(resource).await {
            Some(handle) => handle.save().await.map(|()| true),
            None => Ok(false),
        }
    }

    /// Save an open notebook under `target` and re-key it.
    ///
    /// The registry stays locked until the entry has moved, so an `open` of
    /// `target` either runs first or finds the moved notebook.
    pub async fn save_as(
        &self,
        resource: &NotebookResource,
        target: NotebookResource,
    ) -> Result<bool> {
        let old_key = resource.to_uri_string();
        let new_key = target.to_uri_string();

        let mut documents = self.documents.lock().await;
        let Some(handle) = documents.get(&old_key).cloned() else {
            return Ok(false);
        };
        handle.save_as(target.clone()).await?;

        if old_key != new_key {
            documents.remove(&old_key);
            if documents.insert(new_key, handle).is_some() {
                warn!("[registry] {} replaced an open notebook", target);
            }
            info!("[registry] Re-keyed {} -> {}", resource, target);
        }
        Ok(true)
    }

    pub async fn subscribe(
        &self,
        resource: &NotebookResource,
    ) -> Option<broadcast::Receiver<StorageChange>> {
        self.get(resource).await.map(|h| h.subscribe())
    }

    /// URI keys of every open notebook.
    pub async fn open_documents(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.documents.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::interpreter::FixedInterpreter;
    use crate::memento::MemoryMemento;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> DocumentRegistry {
        DocumentRegistry::new(StorageContext::new(
            StorageConfig::in_dir(dir.path()),
            Arc::new(MemoryMemento::new()),
            Arc::new(MemoryMemento::new()),
            Arc::new(FixedInterpreter(Some(3))),
        ))
    }

    fn write_notebook(dir: &TempDir, name: &str) -> NotebookResource {
        let path = dir.path().join(name);
        std::fs::write(&path, r#"{"cells":[{"cell_type":"code","source":"x = 1"}]}"#).unwrap();
        NotebookResource::file(path)
    }

    #[tokio::test]
    async fn test_open_twice_returns_same_document() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let res = write_notebook(&tmp, "a.ipynb");

        let first = reg.open(res.clone(), None).await.unwrap();
        first.apply(NotebookEdit::DeleteAllCells).await.unwrap();
        let second = reg.open(res.clone(), None).await.unwrap();

        assert!(second.cells().await.unwrap().is_empty());
        assert_eq!(reg.open_documents().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_open_leaves_no_entry() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let path = tmp.path().join("bad.ipynb");
        std::fs::write(&path, "not json").unwrap();

        let err = reg.open(NotebookResource::file(path), None).await.err();

        assert!(matches!(err, Some(StorageError::InvalidDocumentFormat(_))));
        assert!(reg.open_documents().await.is_empty());
    }

    #[tokio::test]
    async fn test_apply_to_unknown_resource_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let res = NotebookResource::file(tmp.path().join("nope.ipynb"));

        assert!(!reg.apply(&res, NotebookEdit::DeleteAllCells).await.unwrap());
        assert!(!reg.save(&res).await.unwrap());
        assert!(reg.subscribe(&res).await.is_none());
    }

    #[tokio::test]
    async fn test_save_as_rekeys() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let res = write_notebook(&tmp, "a.ipynb");
        let target = NotebookResource::file(tmp.path().join("b.ipynb"));
        reg.open(res.clone(), None).await.unwrap();

        assert!(reg.save_as(&res, target.clone()).await.unwrap());

        assert!(reg.get(&res).await.is_none());
        assert!(reg.get(&target).await.is_some());
        assert!(reg
            .apply(&target, NotebookEdit::ClearAllOutputs)
            .await
            .is_ok());
        assert_eq!(reg.open_documents().await, vec![target.to_uri_string()]);
    }

    #[tokio::test]
    async fn test_open_during_save_as_finds_moved_notebook() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let res = write_notebook(&tmp, "a.ipynb");
        let target = NotebookResource::file(tmp.path().join("b.ipynb"));
        reg.open(res.clone(), None).await.unwrap();

        let (saved, opened) = tokio::join!(
            reg.save_as(&res, target.clone()),
            reg.open(target.clone(), None)
        );
        assert!(saved.unwrap());
        let opened = opened.unwrap();

        // The handle open returned is the one registered under the new key
        opened.apply(NotebookEdit::DeleteAllCells).await.unwrap();
        let registered = reg.get(&target).await.unwrap();
        assert!(registered.cells().await.unwrap().is_empty());
        assert_eq!(reg.open_documents().await, vec![target.to_uri_string()]);
    }

    #[tokio::test]
    async fn test_close_removes_entry() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let res = write_notebook(&tmp, "a.ipynb");
        reg.open(res.clone(), None).await.unwrap();

        assert!(reg.close(&res).await);
        assert!(!reg.close(&res).await);
        assert!(reg.get(&res).await.is_none());
    }
}
