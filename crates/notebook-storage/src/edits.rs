//! Structural edit commands applied to an open notebook.
//!
//! Every edit is computed against a copy of the cell list; the document swaps
//! the result in atomically. Edits that name a cell id the document does not
//! have are ignored rather than reported, since edits can arrive after a
//! structural change from elsewhere has already removed their target.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::cell::Cell;

/// A text splice inside one cell, as reported by the host editor.
///
/// Offsets count UTF-16 code units, the unit editor hosts report in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextChange {
    pub range_offset: usize,
    pub range_length: usize,
    pub text: String,
}

/// Kernel identity recorded in `metadata.kernelspec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KernelSpecRef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// The edit vocabulary accepted by an open notebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotebookEdit {
    /// Splice text into a cell's source. Only the first change is applied.
    EditCell {
        id: String,
        changes: Vec<TextChange>,
    },
    /// Insert a cell; an index past the end appends. A cell whose id is
    /// already present is ignored.
    InsertCell { index: usize, cell: Cell },
    RemoveCell { id: String },
    SwapCells {
        first_cell_id: String,
        second_cell_id: String,
    },
    /// Replace cells in place by id, e.g. after re-execution updated outputs.
    ModifyCells { cells: Vec<Cell> },
    DeleteAllCells,
    ClearAllOutputs,
    /// Record the interpreter version and kernel in notebook metadata.
    UpdateVersionInfo {
        #[serde(default)]
        interpreter_version: Option<String>,
        #[serde(default)]
        kernel_spec: Option<KernelSpecRef>,
    },
}

impl NotebookEdit {
    pub fn name(&self) -> &'static str {
        match self {
            NotebookEdit::EditCell { .. } => "edit_cell",
            NotebookEdit::InsertCell { .. } => "insert_cell",
            NotebookEdit::RemoveCell { .. } => "remove_cell",
            NotebookEdit::SwapCells { .. } => "swap_cells",
            NotebookEdit::ModifyCells { .. } => "modify_cells",
            NotebookEdit::DeleteAllCells => "delete_all_cells",
            NotebookEdit::ClearAllOutputs => "clear_all_outputs",
            NotebookEdit::UpdateVersionInfo { .. } => "update_version_info",
        }
    }
}

/// Result of applying an edit to a cell list.
#[derive(Debug, Clone, PartialEq)]
pub enum CellsUpdate {
    /// Nothing to do: unknown id, no-op text edit, or a metadata-only edit.
    Unchanged,
    /// New cell list. `force_dirty` marks the document dirty even if the
    /// list compares equal to the current one.
    Replace { cells: Vec<Cell>, force_dirty: bool },
}

fn replace(cells: Vec<Cell>) -> CellsUpdate {
    CellsUpdate::Replace {
        cells,
        force_dirty: false,
    }
}

fn find(cells: &[Cell], id: &str) -> Option<usize> {
    cells.iter().position(|c| c.id == id)
}

/// Compute the cell list that results from `edit`.
pub fn apply_to_cells(cells: &[Cell], edit: &NotebookEdit) -> CellsUpdate {
    match edit {
        NotebookEdit::EditCell { id, changes } => {
            let (Some(change), Some(index)) = (changes.first(), find(cells, id)) else {
                return CellsUpdate::Unchanged;
            };
            let contents = cells[index].data.source();
            let updated = splice_utf16(contents, change);
            if updated == contents {
                return CellsUpdate::Unchanged;
            }
            let mut new_cells = cells.to_vec();
            new_cells[index].data.set_source(updated);
            replace(new_cells)
        }
        NotebookEdit::InsertCell { index, cell } => {
            // Ids are unique within a notebook
            if find(cells, &cell.id).is_some() {
                return CellsUpdate::Unchanged;
            }
            let mut new_cells = cells.to_vec();
            new_cells.insert((*index).min(cells.len()), cell.clone());
            replace(new_cells)
        }
        NotebookEdit::RemoveCell { id } => {
            if find(cells, id).is_none() {
                return CellsUpdate::Unchanged;
            }
            replace(cells.iter().filter(|c| &c.id != id).cloned().collect())
        }
        NotebookEdit::SwapCells {
            first_cell_id,
            second_cell_id,
        } => match (find(cells, first_cell_id), find(cells, second_cell_id)) {
            (Some(first), Some(second)) => {
                let mut new_cells = cells.to_vec();
                new_cells.swap(first, second);
                replace(new_cells)
            }
            _ => CellsUpdate::Unchanged,
        },
        NotebookEdit::ModifyCells { cells: modified } => {
            let mut new_cells = cells.to_vec();
            let mut matched = false;
            for cell in modified {
                if let Some(index) = find(&new_cells, &cell.id) {
                    new_cells[index] = cell.clone();
                    matched = true;
                }
            }
            if !matched {
                return CellsUpdate::Unchanged;
            }
            CellsUpdate::Replace {
                cells: new_cells,
                force_dirty: true,
            }
        }
        NotebookEdit::DeleteAllCells => replace(Vec::new()),
        NotebookEdit::ClearAllOutputs => {
            let mut new_cells = cells.to_vec();
            for cell in &mut new_cells {
                cell.data.clear_outputs();
            }
            replace(new_cells)
        }
        NotebookEdit::UpdateVersionInfo { .. } => CellsUpdate::Unchanged,
    }
}

/// Apply a text change to `contents`. CRs in the inserted text are dropped.
pub fn splice_utf16(contents: &str, change: &TextChange) -> String {
    let normalized = change.text.replace('\r', "");
    let start = utf16_to_byte(contents, change.range_offset);
    let end = utf16_to_byte(
        contents,
        change.range_offset.saturating_add(change.range_length),
    );
    format!("{}{}{}", &contents[..start], normalized, &contents[end..])
}

/// Byte index of a UTF-16 offset, clamped to the end of the string.
fn utf16_to_byte(s: &str, offset: usize) -> usize {
    let mut units = 0;
    for (idx, ch) in s.char_indices() {
        if units >= offset {
            return idx;
        }
        units += ch.len_utf16();
    }
    s.len()
}

/// Write interpreter and kernel details into notebook metadata.
///
/// The interpreter version only lands when `language_info` already exists.
/// Returns whether anything was written.
pub fn apply_version_info(
    notebook_json: &mut Map<String, Value>,
    interpreter_version: Option<&str>,
    kernel_spec: Option<&KernelSpecRef>,
) -> bool {
    let Some(Value::Object(metadata)) = notebook_json.get_mut("metadata") else {
        return false;
    };
    let mut changed = false;

    if let Some(version) = interpreter_version {
        if let Some(Value::Object(language_info)) = metadata.get_mut("language_info") {
            language_info.insert("version".to_string(), json!(version));
            changed = true;
        }
    }

    if let Some(spec) = kernel_spec {
        let name = spec
            .name
            .clone()
            .or_else(|| spec.display_name.clone())
            .unwrap_or_default();
        let display_name = spec
            .display_name
            .clone()
            .or_else(|| spec.name.clone())
            .unwrap_or_default();
        match metadata.get_mut("kernelspec") {
            Some(Value::Object(existing)) => {
                existing.insert("name".to_string(), json!(name));
                existing.insert("display_name".to_string(), json!(display_name));
            }
            _ => {
                metadata.insert(
                    "kernelspec".to_string(),
                    json!({ "name": name, "display_name": display_name }),
                );
            }
        }
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellData;

    fn sample_cells() -> Vec<Cell> {
        vec![
            Cell::imported(0, CellData::code("a = 1")),
            Cell::imported(1, CellData::markdown("# Title")),
            Cell::imported(2, CellData::code("print(a)")),
        ]
    }

    fn ids(cells: &[Cell]) -> Vec<&str> {
        cells.iter().map(|c| c.id.as_str()).collect()
    }

    fn unwrap_cells(update: CellsUpdate) -> Vec<Cell> {
        match update {
            CellsUpdate::Replace { cells, .. } => cells,
            CellsUpdate::Unchanged => panic!("expected a new cell list"),
        }
    }

    fn change(offset: usize, length: usize, text: &str) -> TextChange {
        TextChange {
            range_offset: offset,
            range_length: length,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_splice_insert_and_replace() {
        assert_eq!(splice_utf16("a = 1", &change(4, 1, "42")), "a = 42");
        assert_eq!(splice_utf16("", &change(0, 0, "x")), "x");
        assert_eq!(splice_utf16("abc", &change(3, 0, "d")), "abcd");
    }

    #[test]
    fn test_splice_strips_carriage_returns() {
        assert_eq!(splice_utf16("a", &change(1, 0, "\r\nb")), "a\nb");
    }

    #[test]
    fn test_splice_clamps_past_end() {
        assert_eq!(splice_utf16("abc", &change(10, 5, "!")), "abc!");
    }

    #[test]
    fn test_splice_counts_utf16_units() {
        // '😀' is two UTF-16 code units
        assert_eq!(splice_utf16("😀x", &change(2, 1, "y")), "😀y");
    }

    #[test]
    fn test_edit_cell_changes_source() {
        let cells = sample_cells();
        let edit = NotebookEdit::EditCell {
            id: "Import#0".into(),
            changes: vec![change(4, 1, "2")],
        };

        let new_cells = unwrap_cells(apply_to_cells(&cells, &edit));

        assert_eq!(new_cells[0].data.source(), "a = 2");
        assert_eq!(cells[0].data.source(), "a = 1");
    }

    #[test]
    fn test_edit_cell_noop_when_content_unchanged() {
        let edit = NotebookEdit::EditCell {
            id: "Import#0".into(),
            changes: vec![change(4, 1, "1")],
        };
        assert_eq!(apply_to_cells(&sample_cells(), &edit), CellsUpdate::Unchanged);
    }

    #[test]
    fn test_edit_cell_unknown_id() {
        let edit = NotebookEdit::EditCell {
            id: "missing".into(),
            changes: vec![change(0, 0, "x")],
        };
        assert_eq!(apply_to_cells(&sample_cells(), &edit), CellsUpdate::Unchanged);
    }

    #[test]
    fn test_insert_at_front_and_past_end() {
        let cells = sample_cells();
        let front = unwrap_cells(apply_to_cells(
            &cells,
            &NotebookEdit::InsertCell {
                index: 0,
                cell: Cell::imported(9, CellData::raw("")),
            },
        ));
        assert_eq!(ids(&front), vec!["Import#9", "Import#0", "Import#1", "Import#2"]);

        let end = unwrap_cells(apply_to_cells(
            &cells,
            &NotebookEdit::InsertCell {
                index: 99,
                cell: Cell::imported(9, CellData::raw("")),
            },
        ));
        assert_eq!(ids(&end), vec!["Import#0", "Import#1", "Import#2", "Import#9"]);
    }

    #[test]
    fn test_insert_duplicate_id_is_ignored() {
        let cells = sample_cells();
        let duplicate = apply_to_cells(
            &cells,
            &NotebookEdit::InsertCell {
                index: 0,
                cell: Cell::imported(1, CellData::code("other")),
            },
        );
        assert_eq!(duplicate, CellsUpdate::Unchanged);

        // Removing that id still drops exactly one cell
        let removed = unwrap_cells(apply_to_cells(
            &cells,
            &NotebookEdit::RemoveCell {
                id: "Import#1".into(),
            },
        ));
        assert_eq!(ids(&removed), vec!["Import#0", "Import#2"]);
    }

    #[test]
    fn test_remove_cell() {
        let removed = unwrap_cells(apply_to_cells(
            &sample_cells(),
            &NotebookEdit::RemoveCell {
                id: "Import#1".into(),
            },
        ));
        assert_eq!(ids(&removed), vec!["Import#0", "Import#2"]);

        let missing = apply_to_cells(
            &sample_cells(),
            &NotebookEdit::RemoveCell { id: "nope".into() },
        );
        assert_eq!(missing, CellsUpdate::Unchanged);
    }

    #[test]
    fn test_swap_cells() {
        let swapped = unwrap_cells(apply_to_cells(
            &sample_cells(),
            &NotebookEdit::SwapCells {
                first_cell_id: "Import#0".into(),
                second_cell_id: "Import#2".into(),
            },
        ));
        assert_eq!(ids(&swapped), vec!["Import#2", "Import#1", "Import#0"]);

        let missing = apply_to_cells(
            &sample_cells(),
            &NotebookEdit::SwapCells {
                first_cell_id: "Import#0".into(),
                second_cell_id: "gone".into(),
            },
        );
        assert_eq!(missing, CellsUpdate::Unchanged);
    }

    #[test]
    fn test_modify_cells_forces_dirty_even_when_identical() {
        let cells = sample_cells();
        let update = apply_to_cells(
            &cells,
            &NotebookEdit::ModifyCells {
                cells: vec![cells[1].clone(), Cell::imported(42, CellData::raw(""))],
            },
        );
        assert_eq!(
            update,
            CellsUpdate::Replace {
                cells: cells.clone(),
                force_dirty: true
            }
        );
    }

    #[test]
    fn test_modify_cells_all_unknown_is_noop() {
        let update = apply_to_cells(
            &sample_cells(),
            &NotebookEdit::ModifyCells {
                cells: vec![Cell::imported(42, CellData::raw(""))],
            },
        );
        assert_eq!(update, CellsUpdate::Unchanged);
    }

    #[test]
    fn test_delete_all_leaves_empty_list() {
        let cleared = unwrap_cells(apply_to_cells(&sample_cells(), &NotebookEdit::DeleteAllCells));
        assert!(cleared.is_empty());
    }

    #[test]
    fn test_clear_all_outputs() {
        let executed: CellData = serde_json::from_value(json!({
            "cell_type": "code",
            "execution_count": 5,
            "outputs": [{"output_type": "execute_result", "data": {"text/plain": "1"}}],
            "source": "1"
        }))
        .unwrap();
        let cells = vec![Cell::imported(0, executed), Cell::imported(1, CellData::markdown("m"))];

        let cleared = unwrap_cells(apply_to_cells(&cells, &NotebookEdit::ClearAllOutputs));

        assert!(cleared[0].data.outputs().is_empty());
        assert_eq!(cleared[0].data.execution_count(), None);
        assert_eq!(cleared[1], cells[1]);
    }

    #[test]
    fn test_edit_serde_shape() {
        let edit: NotebookEdit = serde_json::from_value(json!({
            "type": "edit_cell",
            "id": "Import#0",
            "changes": [{"rangeOffset": 0, "rangeLength": 0, "text": "x"}]
        }))
        .unwrap();
        assert_eq!(edit.name(), "edit_cell");

        let clear: NotebookEdit =
            serde_json::from_value(json!({"type": "clear_all_outputs"})).unwrap();
        assert_eq!(clear, NotebookEdit::ClearAllOutputs);
    }

    #[test]
    fn test_version_info_creates_kernelspec() {
        let mut json = Map::new();
        json.insert(
            "metadata".into(),
            json!({"language_info": {"name": "python"}}),
        );

        let changed = apply_version_info(
            &mut json,
            Some("3.11.4"),
            Some(&KernelSpecRef {
                name: None,
                display_name: Some("Python 3".into()),
            }),
        );

        assert!(changed);
        assert_eq!(json["metadata"]["language_info"]["version"], "3.11.4");
        assert_eq!(json["metadata"]["kernelspec"]["name"], "Python 3");
        assert_eq!(json["metadata"]["kernelspec"]["display_name"], "Python 3");
    }

    #[test]
    fn test_version_info_updates_existing_kernelspec() {
        let mut json = Map::new();
        json.insert(
            "metadata".into(),
            json!({"kernelspec": {"name": "old", "display_name": "Old", "language": "python"}}),
        );

        apply_version_info(
            &mut json,
            Some("3.12.0"),
            Some(&KernelSpecRef {
                name: Some("py312".into()),
                display_name: None,
            }),
        );

        let spec = &json["metadata"]["kernelspec"];
        assert_eq!(spec["name"], "py312");
        assert_eq!(spec["display_name"], "py312");
        assert_eq!(spec["language"], "python");
        // No language_info, so no version was written
        assert!(json["metadata"].get("language_info").is_none());
    }

    #[test]
    fn test_version_info_without_metadata() {
        let mut json = Map::new();
        assert!(!apply_version_info(&mut json, Some("3.10"), None));
    }
}
