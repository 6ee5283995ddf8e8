//! Per-table fallback behavior for rows the target rejects.

use serde::{Deserialize, Serialize};

use crate::core::schema::Column;
use crate::core::value::{Cell, Row};

/// What to change in a rejected row before its single retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideAction {
    /// Null out structured and binary cells in nullable columns.
    Minimize,
    /// Null out one named column.
    ForceNull,
}

/// A fallback rule keyed by table and, optionally, column.
///
/// Tables with at least one rule are inserted row by row so each rejected
/// row can be retried with its fallback applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverridePolicy {
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub action: OverrideAction,
}

impl OverridePolicy {
    fn covers(&self, column: &Column) -> bool {
        self.column.as_deref().map_or(true, |c| c == column.name)
    }
}

/// Rules that apply to `table`.
pub fn policies_for<'a>(policies: &'a [OverridePolicy], table: &str) -> Vec<&'a OverridePolicy> {
    policies.iter().filter(|p| p.table == table).collect()
}

/// Build the single retry row for a rejected row.
///
/// `row` is already coerced to `columns`; `source_columns` lines up with it
/// and says what each cell was before coercion. A cell counts as structured
/// when either side declares a structured or binary type, so JSON that
/// coerced to text (or text that failed to parse as JSON) is still minimized.
///
/// Returns `None` when the rules change nothing, so the caller does not
/// resend an identical row.
pub fn fallback_row(
    row: &Row,
    columns: &[Column],
    source_columns: &[Column],
    policies: &[&OverridePolicy],
) -> Option<Row> {
    let mut changed = false;
    let fallback: Row = row
        .iter()
        .zip(columns)
        .enumerate()
        .map(|(idx, (cell, col))| {
            if cell.is_null() || !col.is_nullable {
                return cell.clone();
            }
            let structured = !cell.is_primitive()
                || !col.kind.is_primitive()
                || source_columns.get(idx).is_some_and(|src| !src.kind.is_primitive());
            let null_it = policies.iter().any(|p| {
                p.covers(col)
                    && match p.action {
                        OverrideAction::Minimize => structured,
                        OverrideAction::ForceNull => p.column.is_some(),
                    }
            });
            if null_it {
                changed = true;
                Cell::Null
            } else {
                cell.clone()
            }
        })
        .collect();

    changed.then_some(fallback)
}
