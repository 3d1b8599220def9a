//! Rendering a notebook back to nbformat JSON text.
//!
//! The top-level JSON object read at load time is kept as-is (field order
//! included) and only `cells` is replaced on save. Indentation and the
//! string-vs-array shape of `source` are detected at load time so an
//! unedited notebook renders to the text it was read from.

use serde_json::{json, Map, Value};

use crate::cell::{split_multiline, Cell};
use crate::error::Result;

/// Indentation used when a notebook has no source text to detect from.
pub const DEFAULT_INDENT: &str = " ";

/// How cell `source` fields are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceStyle {
    /// A list of line fragments (`["a\n", "b"]`), what Jupyter writes.
    #[default]
    Lines,
    /// One string per cell.
    Single,
}

impl SourceStyle {
    /// Pick the style of a parsed `cells` array.
    ///
    /// A notebook is `Single` only when some cell stores a string source and
    /// none stores a list; mixed or empty notebooks fall back to `Lines`.
    pub fn detect(raw_cells: &[Value]) -> Self {
        let mut saw_string = false;
        for cell in raw_cells {
            match cell.get("source") {
                Some(Value::Array(_)) => return SourceStyle::Lines,
                Some(Value::String(_)) => saw_string = true,
                _ => {}
            }
        }
        if saw_string {
            SourceStyle::Single
        } else {
            SourceStyle::Lines
        }
    }

    fn render(self, source: &str) -> Value {
        match self {
            SourceStyle::Lines => Value::Array(
                split_multiline(source)
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            ),
            SourceStyle::Single => Value::String(source.to_string()),
        }
    }
}

/// Whitespace layout of the serialized document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonLayout {
    /// One indentation step. Empty means compact, single-line JSON.
    pub indent: String,
    pub trailing_newline: bool,
}

impl Default for JsonLayout {
    fn default() -> Self {
        Self {
            indent: DEFAULT_INDENT.to_string(),
            trailing_newline: false,
        }
    }
}

impl JsonLayout {
    pub fn detect(text: &str) -> Self {
        Self {
            indent: detect_indent(text),
            trailing_newline: text.ends_with('\n'),
        }
    }
}

/// Find the indentation step of a text document.
///
/// Counts the change in leading whitespace between consecutive non-blank
/// lines and returns the most common step, or an empty string when no line
/// is indented.
pub fn detect_indent(text: &str) -> String {
    // (uses tabs, width) -> occurrences
    let mut steps: Vec<((bool, usize), usize)> = Vec::new();
    let mut previous = (false, 0usize);

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let tabs = line.chars().take_while(|c| *c == '\t').count();
        let current = if tabs > 0 {
            (true, tabs)
        } else {
            (false, line.chars().take_while(|c| *c == ' ').count())
        };

        if current.0 == previous.0 || current.1 == 0 || previous.1 == 0 {
            let step = current.1.abs_diff(previous.1);
            if step > 0 {
                let key = (current.0 || previous.0, step);
                match steps.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, count)) => *count += 1,
                    None => steps.push((key, 1)),
                }
            }
        }
        previous = current;
    }

    // Ties go to the step seen first
    let mut best: Option<((bool, usize), usize)> = None;
    for (key, count) in steps {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((key, count));
        }
    }

    match best {
        Some(((true, width), _)) => "\t".repeat(width),
        Some(((false, width), _)) => " ".repeat(width),
        None => String::new(),
    }
}

/// Serialize cells into the notebook's original top-level JSON.
pub fn render_notebook(
    notebook_json: &Map<String, Value>,
    cells: &[Cell],
    style: SourceStyle,
    layout: &JsonLayout,
) -> Result<String> {
    let mut doc = notebook_json.clone();
    let rendered = cells
        .iter()
        .map(|cell| render_cell(cell, style))
        .collect::<Result<Vec<_>>>()?;
    doc.insert("cells".to_string(), Value::Array(rendered));

    let mut text = to_string_with_indent(&Value::Object(doc), &layout.indent)?;
    if layout.trailing_newline {
        text.push('\n');
    }
    Ok(text)
}

fn render_cell(cell: &Cell, style: SourceStyle) -> Result<Value> {
    let mut value = serde_json::to_value(&cell.data)?;
    if let Value::Object(map) = &mut value {
        map.insert("source".to_string(), style.render(cell.data.source()));
    }
    Ok(value)
}

fn to_string_with_indent(value: &Value, indent: &str) -> Result<String> {
    if indent.is_empty() {
        return Ok(serde_json::to_string(value)?);
    }
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    serde::Serialize::serialize(value, &mut serializer)?;
    // serde_json only ever writes valid UTF-8
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Whether the notebook still needs its metadata shell synthesized.
pub fn needs_metadata(notebook_json: &Map<String, Value>) -> bool {
    !matches!(notebook_json.get("metadata"), Some(Value::Object(_)))
}

/// Python major version recorded in `language_info.codemirror_mode`, if any.
pub fn codemirror_version(notebook_json: &Map<String, Value>) -> Option<i64> {
    notebook_json
        .get("metadata")?
        .get("language_info")?
        .get("codemirror_mode")?
        .get("version")?
        .as_i64()
}

/// Default nbformat v4 metadata for a Python notebook.
pub fn default_metadata(python_major: i64) -> Value {
    json!({
        "language_info": {
            "name": "python",
            "codemirror_mode": {
                "name": "ipython",
                "version": python_major,
            },
        },
        "orig_nbformat": 2,
        "file_extension": ".py",
        "mimetype": "text/x-python",
        "name": "python",
        "npconvert_exporter": "python",
        "pygments_lexer": format!("ipython{}", python_major),
        "version": python_major,
    })
}

/// Fill in the v4 document shell around a notebook that has no metadata.
///
/// Existing top-level fields are left untouched.
pub fn ensure_metadata(notebook_json: &mut Map<String, Value>, python_major: i64) {
    if !needs_metadata(notebook_json) {
        return;
    }
    notebook_json
        .entry("nbformat".to_string())
        .or_insert(json!(4));
    notebook_json
        .entry("nbformat_minor".to_string())
        .or_insert(json!(2));
    notebook_json.insert("metadata".to_string(), default_metadata(python_major));
}
