//! In-memory state of one open notebook.
//!
//! `NotebookStorage` owns the cell list, the dirty flag, and the top-level
//! JSON the notebook was read from. Every state transition goes through
//! `set_state`, which publishes at most one `StorageChange` per call.
//! It is not shared directly: `handle::StorageHandle` serializes access.

use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::backup::BackupWriter;
use crate::cell::{Cell, CellData};
use crate::config::StorageConfig;
use crate::edits::{apply_to_cells, apply_version_info, CellsUpdate, NotebookEdit};
use crate::error::{Result, StorageError};
use crate::interpreter::{InterpreterInfo, FALLBACK_PYTHON_MAJOR};
use crate::memento::{JsonFileMemento, Memento};
use crate::persistence::{self, JsonLayout, SourceStyle};
use crate::recovery::RecoveryStore;
use crate::resource::NotebookResource;

/// Capacity of each document's change channel.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Collaborators shared by every open notebook.
pub struct StorageContext {
    pub recovery: RecoveryStore,
    pub interpreter: Arc<dyn InterpreterInfo>,
    pub config: StorageConfig,
}

impl StorageContext {
    pub fn new(
        config: StorageConfig,
        global: Arc<dyn Memento>,
        workspace: Arc<dyn Memento>,
        interpreter: Arc<dyn InterpreterInfo>,
    ) -> Self {
        Self {
            recovery: RecoveryStore::new(config.storage_dir.clone(), global, workspace),
            interpreter,
            config,
        }
    }

    /// Context whose key/value stores are the JSON files named in `config`.
    pub fn from_config(config: StorageConfig, interpreter: Arc<dyn InterpreterInfo>) -> Self {
        let global = Arc::new(JsonFileMemento::open(&config.global_state_path));
        let workspace = Arc::new(JsonFileMemento::open(&config.workspace_state_path));
        Self::new(config, global, workspace, interpreter)
    }
}

/// One state transition of a notebook.
///
/// Cell and file fields are `Some` only when that part changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageChange {
    pub old_cells: Option<Vec<Cell>>,
    pub new_cells: Option<Vec<Cell>>,
    pub old_file: Option<NotebookResource>,
    pub new_file: Option<NotebookResource>,
    pub is_dirty: bool,
}

/// Partial update passed to `NotebookStorage::set_state`.
#[derive(Debug, Default)]
struct StateUpdate {
    file: Option<NotebookResource>,
    cells: Option<Vec<Cell>>,
    is_dirty: Option<bool>,
}

pub struct NotebookStorage {
    file: NotebookResource,
    cells: Vec<Cell>,
    is_dirty: bool,
    loaded: bool,
    notebook_json: Map<String, Value>,
    layout: JsonLayout,
    source_style: SourceStyle,
    context: Arc<StorageContext>,
    backup: BackupWriter,
    changed_tx: broadcast::Sender<StorageChange>,
}

impl NotebookStorage {
    /// An empty, unloaded document. Must be called inside a tokio runtime.
    pub fn new(file: NotebookResource, context: Arc<StorageContext>) -> Self {
        let (changed_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let backup = BackupWriter::spawn(context.config.backup_debounce());
        Self {
            file,
            cells: Vec::new(),
            is_dirty: false,
            loaded: false,
            notebook_json: Map::new(),
            layout: JsonLayout::default(),
            source_style: SourceStyle::default(),
            context,
            backup,
            changed_tx,
        }
    }

    pub fn file(&self) -> &NotebookResource {
        &self.file
    }

    pub fn is_untitled(&self) -> bool {
        self.file.is_untitled()
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changed_tx.subscribe()
    }

    pub(crate) fn change_sender(&self) -> broadcast::Sender<StorageChange> {
        self.changed_tx.clone()
    }

    /// Load `resource`, preferring recoverable uncommitted contents.
    ///
    /// `initial_contents` is only used for untitled resources, which have no
    /// file to read.
    pub async fn load(
        &mut self,
        resource: NotebookResource,
        initial_contents: Option<String>,
    ) -> Result<Vec<Cell>> {
        self.loaded = false;
        self.set_state(StateUpdate {
            file: Some(resource.clone()),
            ..Default::default()
        });

        let contents = match resource.path() {
            Some(path) => match tokio::fs::read_to_string(path).await {
                Ok(text) => Some(text),
                Err(e) => {
                    debug!("[notebook-storage] Cannot read {:?}: {}", path, e);
                    None
                }
            },
            None => initial_contents,
        };

        let cells = match self.context.recovery.recoverable_contents(&resource).await {
            Some(recovered) => self.load_contents(Some(recovered), true)?,
            None => self.load_contents(contents, false)?,
        };
        info!(
            "[notebook-storage] Loaded {} ({} cells{})",
            resource,
            cells.len(),
            if self.is_dirty { ", dirty" } else { "" }
        );
        Ok(cells)
    }

    fn load_contents(
        &mut self,
        contents: Option<String>,
        mut force_dirty: bool,
    ) -> Result<Vec<Cell>> {
        let contents = contents.filter(|c| !c.is_empty());

        let mut cells = Vec::new();
        match contents {
            Some(text) => {
                let invalid = || StorageError::InvalidDocumentFormat(self.file.to_string());
                let json = match serde_json::from_str::<Value>(&text) {
                    Ok(Value::Object(map)) => map,
                    _ => return Err(invalid()),
                };
                let Some(Value::Array(raw_cells)) = json.get("cells") else {
                    return Err(invalid());
                };

                // Parse every cell before replacing any document state
                for (index, raw) in raw_cells.iter().enumerate() {
                    let data: CellData = serde_json::from_value(raw.clone()).map_err(|e| {
                        StorageError::InvalidDocumentFormat(format!(
                            "{} (cell {}: {})",
                            self.file, index, e
                        ))
                    })?;
                    cells.push(Cell::imported(index, data));
                }
                self.layout = JsonLayout::detect(&text);
                self.source_style = SourceStyle::detect(raw_cells);
                self.notebook_json = json;
            }
            None => {
                self.layout = JsonLayout::default();
                self.source_style = SourceStyle::default();
                self.notebook_json = Map::new();
            }
        }

        if cells.is_empty() {
            cells.push(Cell::empty_code());
            force_dirty = true;
        }

        self.set_state(StateUpdate {
            cells: Some(cells.clone()),
            is_dirty: Some(force_dirty),
            ..Default::default()
        });
        self.loaded = true;
        Ok(cells)
    }

    /// Apply one edit. Returns whether the document state changed.
    pub async fn apply(&mut self, edit: &NotebookEdit) -> bool {
        if let NotebookEdit::UpdateVersionInfo {
            interpreter_version,
            kernel_spec,
        } = edit
        {
            // Metadata only: no cell change, no dirty flag, no event
            apply_version_info(
                &mut self.notebook_json,
                interpreter_version.as_deref(),
                kernel_spec.as_ref(),
            );
            return false;
        }

        let (cells, force_dirty) = match apply_to_cells(&self.cells, edit) {
            CellsUpdate::Unchanged => {
                debug!("[notebook-storage] {} left {} unchanged", edit.name(), self.file);
                return false;
            }
            CellsUpdate::Replace { cells, force_dirty } => (cells, force_dirty),
        };

        let cells_changed = cells != self.cells;
        let changed = self.set_state(StateUpdate {
            cells: Some(cells),
            is_dirty: force_dirty.then_some(true),
            ..Default::default()
        });
        if cells_changed {
            self.schedule_backup().await;
        }
        changed
    }

    /// Queue a snapshot of the current contents for crash recovery.
    async fn schedule_backup(&mut self) {
        if self.file.is_untitled() || self.context.config.auto_save {
            return;
        }
        match self.render().await {
            Ok(contents) => {
                let path = self.context.recovery.shadow_path(&self.file.storage_key());
                self.backup.store(path, contents);
            }
            Err(e) => debug!("[notebook-storage] Skipping backup of {}: {}", self.file, e),
        }
    }

    /// Write any pending backup now.
    pub async fn flush_backup(&self) {
        self.backup.flush().await;
    }

    /// Top-level notebook JSON, with metadata synthesized if missing.
    pub async fn json(&mut self) -> Map<String, Value> {
        self.ensure_metadata().await;
        self.notebook_json.clone()
    }

    async fn ensure_metadata(&mut self) {
        if !persistence::needs_metadata(&self.notebook_json) {
            return;
        }
        let major = match persistence::codemirror_version(&self.notebook_json) {
            Some(v) => v,
            None => self
                .context
                .interpreter
                .major_version()
                .await
                .unwrap_or(FALLBACK_PYTHON_MAJOR),
        };
        persistence::ensure_metadata(&mut self.notebook_json, major);
    }

    /// Serialize the document as notebook JSON text.
    pub async fn render(&mut self) -> Result<String> {
        self.ensure_metadata().await;
        persistence::render_notebook(
            &self.notebook_json,
            &self.cells,
            self.source_style,
            &self.layout,
        )
    }

    pub async fn save(&mut self) -> Result<()> {
        let target = self.file.clone();
        self.save_as(target).await
    }

    /// Write the document to `target` and make it the document's identity.
    pub async fn save_as(&mut self, target: NotebookResource) -> Result<()> {
        let path = target
            .path()
            .ok_or_else(|| StorageError::NotAFile(target.to_string()))?
            .to_path_buf();
        let contents = self.render().await?;
        tokio::fs::write(&path, contents).await?;

        // The file now holds these contents; old snapshots only mislead
        if !self.file.is_untitled() {
            let old = self.context.recovery.shadow_path(&self.file.storage_key());
            self.backup.clear(old);
        }
        if target != self.file {
            let new = self.context.recovery.shadow_path(&target.storage_key());
            self.backup.clear(new);
        }

        info!("[notebook-storage] Saved {} to {:?}", self.file, path);
        self.set_state(StateUpdate {
            file: Some(target),
            is_dirty: Some(false),
            ..Default::default()
        });
        Ok(())
    }

    /// Apply a partial update, emitting one change event if anything moved.
    fn set_state(&mut self, update: StateUpdate) -> bool {
        let mut change = StorageChange {
            old_cells: None,
            new_cells: None,
            old_file: None,
            new_file: None,
            is_dirty: self.is_dirty,
        };
        let mut changed = false;

        if let Some(file) = update.file {
            if file != self.file {
                change.old_file = Some(std::mem::replace(&mut self.file, file.clone()));
                change.new_file = Some(file);
                changed = true;
            }
        }

        if let Some(cells) = update.cells {
            if cells != self.cells {
                change.old_cells = Some(std::mem::replace(&mut self.cells, cells.clone()));
                change.new_cells = Some(cells);
                // Any cell change dirties, unless the caller says otherwise below
                self.is_dirty = true;
                changed = true;
            }
        }

        if let Some(is_dirty) = update.is_dirty {
            if is_dirty != self.is_dirty {
                self.is_dirty = is_dirty;
                changed = true;
            }
        }

        if changed {
            change.is_dirty = self.is_dirty;
            // No subscribers is fine
            let _ = self.changed_tx.send(change);
        }
        changed
    }
}
