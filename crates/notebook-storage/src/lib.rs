//! notebook-storage - Document state and crash recovery for Jupyter notebooks.
//!
//! An open notebook is an ordered list of cells plus the top-level JSON it was
//! read from. Edits arrive as `NotebookEdit` commands and are applied one at
//! a time by the notebook's owning task (`StorageHandle`). Unsaved edits are
//! snapshotted to shadow files under the storage directory, and a later load
//! of the same file prefers a fresh snapshot over the file on disk.
//!
//! `DocumentRegistry` is the entry point: it maps resource URIs to open
//! notebooks and routes edits, saves, and subscriptions.

pub mod backup;
pub mod cell;
pub mod config;
pub mod document;
pub mod edits;
pub mod error;
pub mod export;
pub mod handle;
pub mod interpreter;
pub mod memento;
pub mod persistence;
pub mod recovery;
pub mod registry;
pub mod resource;

pub use cell::{Cell, CellData, CellState};
pub use config::StorageConfig;
pub use document::{NotebookStorage, StorageChange, StorageContext};
pub use edits::{NotebookEdit, TextChange};
pub use error::{Result, StorageError};
pub use export::ExportFormat;
pub use handle::StorageHandle;
pub use registry::DocumentRegistry;
pub use resource::NotebookResource;
