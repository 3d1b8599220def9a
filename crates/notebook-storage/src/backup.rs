//! Debounced writes of uncommitted contents to shadow files.
//!
//! Each open notebook owns one `BackupWriter`. Requests are coalesced: only
//! the last snapshot in a burst is written, once no new request has arrived
//! for the debounce interval. Dropping the writer flushes anything pending.

use std::path::PathBuf;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};

use crate::recovery::{remove_record, write_record, StorageRecord};

/// Default quiet period before a backup is written.
pub const DEFAULT_BACKUP_DEBOUNCE: Duration = Duration::from_millis(250);

enum BackupRequest {
    /// Store `record` at `path`, or delete the shadow file when `None`.
    Store {
        path: PathBuf,
        record: Option<StorageRecord>,
    },
    Flush(oneshot::Sender<()>),
}

struct Pending {
    path: PathBuf,
    record: Option<StorageRecord>,
}

/// Handle to a background backup task.
pub struct BackupWriter {
    tx: mpsc::UnboundedSender<BackupRequest>,
}

impl BackupWriter {
    /// Start the backup task on the current tokio runtime.
    pub fn spawn(debounce: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_backup_task(rx, debounce));
        Self { tx }
    }

    /// Queue a snapshot of `contents` for `path`, stamped now.
    pub fn store(&self, path: PathBuf, contents: String) {
        self.send(BackupRequest::Store {
            path,
            record: Some(StorageRecord::now(contents)),
        });
    }

    /// Queue deletion of the shadow file at `path`.
    pub fn clear(&self, path: PathBuf) {
        self.send(BackupRequest::Store { path, record: None });
    }

    /// Write anything pending now and wait for it to land.
    pub async fn flush(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(BackupRequest::Flush(reply_tx));
        reply_rx.await.ok();
    }

    fn send(&self, request: BackupRequest) {
        if self.tx.send(request).is_err() {
            warn!("[backup] Backup task is gone; dropping request");
        }
    }
}

async fn run_backup_task(mut rx: mpsc::UnboundedReceiver<BackupRequest>, debounce: Duration) {
    let mut pending: Option<Pending> = None;

    loop {
        let request = if pending.is_some() {
            tokio::select! {
                request = rx.recv() => request,
                _ = tokio::time::sleep(debounce) => {
                    if let Some(p) = pending.take() {
                        write_pending(p).await;
                    }
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        match request {
            Some(BackupRequest::Store { path, record }) => {
                // A different target (after save-as) must not swallow the old one
                if let Some(p) = pending.take() {
                    if p.path != path {
                        write_pending(p).await;
                    }
                }
                pending = Some(Pending { path, record });
            }
            Some(BackupRequest::Flush(reply)) => {
                if let Some(p) = pending.take() {
                    write_pending(p).await;
                }
                reply.send(()).ok();
            }
            None => {
                if let Some(p) = pending.take() {
                    write_pending(p).await;
                }
                debug!("[backup] Channel closed, backup task exiting");
                break;
            }
        }
    }
}

async fn write_pending(pending: Pending) {
    let result = match &pending.record {
        Some(record) => write_record(&pending.path, record).await,
        None => remove_record(&pending.path).await,
    };
    match result {
        Ok(()) => debug!(
            "[backup] {} {:?}",
            if pending.record.is_some() { "Wrote" } else { "Cleared" },
            pending.path
        ),
        Err(e) => warn!("[backup] Failed to update {:?}: {}", pending.path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_record(path: &std::path::Path) -> StorageRecord {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_burst_coalesces_to_last_snapshot() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("shadow.ipynb");
        let writer = BackupWriter::spawn(Duration::from_secs(60));

        writer.store(path.clone(), "one".into());
        writer.store(path.clone(), "two".into());
        writer.store(path.clone(), "three".into());
        // Nothing lands before the quiet period
        tokio::task::yield_now().await;
        assert!(!path.exists());

        writer.flush().await;
        let record = read_record(&path);
        assert_eq!(record.contents.as_deref(), Some("three"));
        assert!(record.last_modified_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_debounce_elapses_and_writes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("shadow.ipynb");
        let writer = BackupWriter::spawn(Duration::from_millis(10));

        writer.store(path.clone(), "contents".into());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(read_record(&path).contents.as_deref(), Some("contents"));
    }

    #[tokio::test]
    async fn test_clear_deletes_shadow_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("shadow.ipynb");
        let writer = BackupWriter::spawn(Duration::from_secs(60));

        writer.store(path.clone(), "contents".into());
        writer.flush().await;
        assert!(path.exists());

        writer.clear(path.clone());
        writer.flush().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_clear_after_store_in_same_burst_wins() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("shadow.ipynb");
        let writer = BackupWriter::spawn(Duration::from_secs(60));

        writer.store(path.clone(), "contents".into());
        writer.clear(path.clone());
        writer.flush().await;

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_new_target_flushes_previous_target() {
        let tmp = TempDir::new().unwrap();
        let old = tmp.path().join("old.ipynb");
        let new = tmp.path().join("new.ipynb");
        let writer = BackupWriter::spawn(Duration::from_secs(60));

        writer.store(old.clone(), "old".into());
        writer.store(new.clone(), "new".into());
        writer.flush().await;

        assert_eq!(read_record(&old).contents.as_deref(), Some("old"));
        assert_eq!(read_record(&new).contents.as_deref(), Some("new"));
    }
}
