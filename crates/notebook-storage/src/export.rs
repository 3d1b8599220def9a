//! Export of an open notebook to other formats.

use std::fmt;
use std::str::FromStr;

use crate::cell::{Cell, CellData};
use crate::error::{Result, StorageError};
use crate::handle::StorageHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Ipynb,
    /// A percent-format script: `# %%` before each cell.
    Python,
}

impl FromStr for ExportFormat {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ipynb" | "notebook" => Ok(ExportFormat::Ipynb),
            "python" | "py" => Ok(ExportFormat::Python),
            _ => Err(StorageError::UnsupportedExportFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Ipynb => write!(f, "ipynb"),
            ExportFormat::Python => write!(f, "python"),
        }
    }
}

/// Export an open notebook's current state, unsaved edits included.
pub async fn export_notebook(handle: &StorageHandle, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Ipynb => handle.render().await,
        ExportFormat::Python => Ok(to_python_script(&handle.cells().await?)),
    }
}

/// Render cells as a Python script.
///
/// Code cells are copied verbatim. Markdown and raw cells become `#` comment
/// blocks so the script still runs.
pub fn to_python_script(cells: &[Cell]) -> String {
    let mut blocks = Vec::with_capacity(cells.len());
    for cell in cells {
        let block = match &cell.data {
            CellData::Code { source, .. } => format!("# %%\n{}", source.trim_end_matches('\n')),
            CellData::Markdown { source, .. } => format!("# %% [markdown]\n{}", comment(source)),
            CellData::Raw { source, .. } => format!("# %% [raw]\n{}", comment(source)),
        };
        blocks.push(block);
    }
    let mut script = blocks.join("\n\n");
    if !script.is_empty() {
        script.push('\n');
    }
    script
}

fn comment(source: &str) -> String {
    source
        .trim_end_matches('\n')
        .lines()
        .map(|line| {
            if line.is_empty() {
                "#".to_string()
            } else {
                format!("# {}", line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
