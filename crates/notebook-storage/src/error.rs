//! Error type shared by the storage, persistence, and export layers.

/// Errors surfaced to callers of the notebook storage.
///
/// Recovery-tier misses and backup write failures never surface here; they
/// are logged where they happen.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid notebook file: {0}")]
    InvalidDocumentFormat(String),

    #[error("Unsupported export format: {0}")]
    UnsupportedExportFormat(String),

    #[error("Cannot write notebook to {0}: not a file")]
    NotAFile(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Notebook storage task closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, StorageError>;
