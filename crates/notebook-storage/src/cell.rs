//! Cell model: one addressable unit of a notebook document.
//!
//! `CellData` mirrors an nbformat v4 cell. The `source` field is normalized to
//! a single string on load, whether the file stored it as a string or as a list
//! of line fragments; `persistence` restores the on-disk shape when rendering.
//! Fields this model does not know about are kept in `extra` so a save never
//! drops them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Placeholder `file` for cells that did not come from a source file.
pub const EMPTY_FILE_NAME: &str = "<empty>";

/// Execution lifecycle of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CellState {
    Pending,
    Executing,
    #[default]
    Finished,
}

/// A cell as held by an open notebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Process-unique id. Imported cells use `Import#<index>`.
    pub id: String,
    pub file: String,
    pub line: u32,
    #[serde(default)]
    pub state: CellState,
    pub data: CellData,
}

impl Cell {
    /// A blank code cell with a fresh id.
    pub fn empty_code() -> Self {
        Cell {
            id: Uuid::new_v4().to_string(),
            file: EMPTY_FILE_NAME.to_string(),
            line: 0,
            state: CellState::Finished,
            data: CellData::code(""),
        }
    }

    /// Wrap a cell parsed from a notebook file at position `index`.
    pub fn imported(index: usize, data: CellData) -> Self {
        Cell {
            id: format!("Import#{}", index),
            file: EMPTY_FILE_NAME.to_string(),
            line: 0,
            state: CellState::Finished,
            data,
        }
    }
}

/// nbformat cell contents, tagged by `cell_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cell_type")]
pub enum CellData {
    #[serde(rename = "code")]
    Code {
        #[serde(default)]
        execution_count: Option<i64>,
        #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
        cell_id: Option<String>,
        #[serde(default = "empty_object")]
        metadata: Value,
        #[serde(default)]
        outputs: Vec<Value>,
        #[serde(default, deserialize_with = "deserialize_source")]
        source: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    #[serde(rename = "markdown")]
    Markdown {
        #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
        cell_id: Option<String>,
        #[serde(default = "empty_object")]
        metadata: Value,
        #[serde(default, deserialize_with = "deserialize_source")]
        source: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    #[serde(rename = "raw")]
    Raw {
        #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
        cell_id: Option<String>,
        #[serde(default = "empty_object")]
        metadata: Value,
        #[serde(default, deserialize_with = "deserialize_source")]
        source: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
}

impl CellData {
    pub fn code(source: &str) -> Self {
        CellData::Code {
            execution_count: None,
            cell_id: None,
            metadata: empty_object(),
            outputs: Vec::new(),
            source: source.to_string(),
            extra: Map::new(),
        }
    }

    pub fn markdown(source: &str) -> Self {
        CellData::Markdown {
            cell_id: None,
            metadata: empty_object(),
            source: source.to_string(),
            extra: Map::new(),
        }
    }

    pub fn raw(source: &str) -> Self {
        CellData::Raw {
            cell_id: None,
            metadata: empty_object(),
            source: source.to_string(),
            extra: Map::new(),
        }
    }

    pub fn cell_type(&self) -> &'static str {
        match self {
            CellData::Code { .. } => "code",
            CellData::Markdown { .. } => "markdown",
            CellData::Raw { .. } => "raw",
        }
    }

    pub fn source(&self) -> &str {
        match self {
            CellData::Code { source, .. }
            | CellData::Markdown { source, .. }
            | CellData::Raw { source, .. } => source,
        }
    }

    pub fn set_source(&mut self, new_source: String) {
        match self {
            CellData::Code { source, .. }
            | CellData::Markdown { source, .. }
            | CellData::Raw { source, .. } => *source = new_source,
        }
    }

    /// Outputs of a code cell; empty for other cell types.
    pub fn outputs(&self) -> &[Value] {
        match self {
            CellData::Code { outputs, .. } => outputs,
            _ => &[],
        }
    }

    pub fn execution_count(&self) -> Option<i64> {
        match self {
            CellData::Code {
                execution_count, ..
            } => *execution_count,
            _ => None,
        }
    }

    /// Reset a code cell's outputs and execution count. Other cells are untouched.
    pub fn clear_outputs(&mut self) {
        if let CellData::Code {
            outputs,
            execution_count,
            ..
        } = self
        {
            outputs.clear();
            *execution_count = None;
        }
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// nbformat allows `source` as one string or as a list of line fragments.
#[derive(Deserialize)]
#[serde(untagged)]
enum MultilineString {
    Single(String),
    Lines(Vec<String>),
}

fn deserialize_source<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<MultilineString>::deserialize(deserializer)? {
        Some(MultilineString::Single(s)) => s,
        Some(MultilineString::Lines(lines)) => concat_multiline(&lines),
        None => String::new(),
    })
}

/// Join line fragments back into one string.
pub fn concat_multiline(lines: &[String]) -> String {
    lines.concat()
}

/// Split text into nbformat line fragments.
///
/// Every fragment but the last keeps its trailing `\n`; empty text yields no
/// fragments.
pub fn split_multiline(source: &str) -> Vec<String> {
    if source.is_empty() {
        return Vec::new();
    }
    source.split_inclusive('\n').map(|s| s.to_string()).collect()
}
