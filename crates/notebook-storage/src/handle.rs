//! Command channel to a notebook's owning task.
//!
//! Each open notebook lives on its own tokio task. Callers hold a clonable
//! `StorageHandle` and talk to the task over an mpsc channel, one command
//! at a time, each with a oneshot reply. Commands run strictly in order, so
//! a `cells()` sent after `load()` sees the loaded cells even while the load
//! is still reading from disk.

use std::sync::Arc;

use log::{debug, info};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::cell::Cell;
use crate::document::{NotebookStorage, StorageChange, StorageContext};
use crate::edits::NotebookEdit;
use crate::error::{Result, StorageError};
use crate::resource::NotebookResource;

/// Pending commands per notebook before senders wait.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

enum StorageCommand {
    Load {
        resource: NotebookResource,
        initial_contents: Option<String>,
        reply: oneshot::Sender<Result<Vec<Cell>>>,
    },
    GetCells {
        reply: oneshot::Sender<Vec<Cell>>,
    },
    GetJson {
        reply: oneshot::Sender<Map<String, Value>>,
    },
    Render {
        reply: oneshot::Sender<Result<String>>,
    },
    Apply {
        edit: NotebookEdit,
        reply: oneshot::Sender<bool>,
    },
    Save {
        reply: oneshot::Sender<Result<()>>,
    },
    SaveAs {
        target: NotebookResource,
        reply: oneshot::Sender<Result<()>>,
    },
    IsDirty {
        reply: oneshot::Sender<bool>,
    },
    FlushBackup {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to one open notebook.
///
/// Clonable; the owning task ends once every handle is dropped.
#[derive(Clone)]
pub struct StorageHandle {
    tx: mpsc::Sender<StorageCommand>,
    changed_tx: broadcast::Sender<StorageChange>,
}

impl StorageHandle {
    /// Spawn the owning task for `resource`. The notebook starts unloaded.
    pub fn spawn(resource: NotebookResource, context: Arc<StorageContext>) -> Self {
        let storage = NotebookStorage::new(resource, context);
        let changed_tx = storage.change_sender();
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        tokio::spawn(run_storage_task(storage, rx));
        Self { tx, changed_tx }
    }

    /// Receive every future state change of this notebook.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changed_tx.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> StorageCommand,
    ) -> Result<T> {
        let reply_rx = self.enqueue(make).await?;
        reply_rx.await.map_err(|_| StorageError::Closed)
    }

    async fn enqueue<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> StorageCommand,
    ) -> Result<oneshot::Receiver<T>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| StorageError::Closed)?;
        Ok(reply_rx)
    }

    /// Queue a load without waiting for it to finish.
    pub(crate) async fn begin_load(
        &self,
        resource: NotebookResource,
        initial_contents: Option<String>,
    ) -> Result<oneshot::Receiver<Result<Vec<Cell>>>> {
        self.enqueue(|reply| StorageCommand::Load {
            resource,
            initial_contents,
            reply,
        })
        .await
    }

    /// Load (or reload) the notebook, recovering unsaved edits if any.
    pub async fn load(
        &self,
        resource: NotebookResource,
        initial_contents: Option<String>,
    ) -> Result<Vec<Cell>> {
        self.begin_load(resource, initial_contents)
            .await?
            .await
            .map_err(|_| StorageError::Closed)?
    }

    pub async fn cells(&self) -> Result<Vec<Cell>> {
        self.request(|reply| StorageCommand::GetCells { reply }).await
    }

    /// Top-level notebook JSON, metadata included.
    pub async fn json(&self) -> Result<Map<String, Value>> {
        self.request(|reply| StorageCommand::GetJson { reply }).await
    }

    /// The notebook as it would be written to disk.
    pub async fn render(&self) -> Result<String> {
        self.request(|reply| StorageCommand::Render { reply }).await?
    }

    /// Apply an edit. Returns whether the notebook changed.
    pub async fn apply(&self, edit: NotebookEdit) -> Result<bool> {
        self.request(|reply| StorageCommand::Apply { edit, reply })
            .await
    }

    pub async fn save(&self) -> Result<()> {
        self.request(|reply| StorageCommand::Save { reply }).await?
    }

    pub async fn save_as(&self, target: NotebookResource) -> Result<()> {
        self.request(|reply| StorageCommand::SaveAs { target, reply })
            .await?
    }

    pub async fn is_dirty(&self) -> Result<bool> {
        self.request(|reply| StorageCommand::IsDirty { reply }).await
    }

    /// Write any debounced backup now.
    pub async fn flush_backup(&self) -> Result<()> {
        self.request(|reply| StorageCommand::FlushBackup { reply })
            .await
    }
}

async fn run_storage_task(mut storage: NotebookStorage, mut rx: mpsc::Receiver<StorageCommand>) {
    debug!("[notebook-storage] Task started for {}", storage.file());

    while let Some(command) = rx.recv().await {
        match command {
            StorageCommand::Load {
                resource,
                initial_contents,
                reply,
            } => {
                let result = storage.load(resource, initial_contents).await;
                let _ = reply.send(result);
            }
            StorageCommand::GetCells { reply } => {
                let _ = reply.send(storage.cells().to_vec());
            }
            StorageCommand::GetJson { reply } => {
                let _ = reply.send(storage.json().await);
            }
            StorageCommand::Render { reply } => {
                let _ = reply.send(storage.render().await);
            }
            StorageCommand::Apply { edit, reply } => {
                let changed = storage.apply(&edit).await;
                let _ = reply.send(changed);
            }
            StorageCommand::Save { reply } => {
                let _ = reply.send(storage.save().await);
            }
            StorageCommand::SaveAs { target, reply } => {
                let _ = reply.send(storage.save_as(target).await);
            }
            StorageCommand::IsDirty { reply } => {
                let _ = reply.send(storage.is_dirty());
            }
            StorageCommand::FlushBackup { reply } => {
                storage.flush_backup().await;
                let _ = reply.send(());
            }
        }
    }

    info!(
        "[notebook-storage] All handles dropped, closing {}",
        storage.file()
    );
}
