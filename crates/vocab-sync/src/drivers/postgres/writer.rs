//! Insert statement construction and parameter rendering for PostgreSQL.
//!
//! Every parameter is sent as text and cast server-side to the column's
//! declared type (`$n::text::"udt"`), so one statement shape covers every
//! column type the catalog can report.

use crate::core::identifier::{quote_ident, quote_list};
use crate::core::schema::Column;
use crate::core::value::Cell;
use crate::error::Result;
use crate::typemap::ColumnType;

/// Bind parameter ceiling for one statement (protocol limit is 65535).
pub(super) const MAX_PARAMS: usize = 60_000;

/// Build a multi-row `INSERT ... VALUES` for `row_count` rows.
pub(super) fn build_insert_sql(
    qualified_table: &str,
    columns: &[Column],
    row_count: usize,
) -> Result<String> {
    let col_names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    let casts = columns
        .iter()
        .map(|c| quote_ident(&c.data_type))
        .collect::<Result<Vec<_>>>()?;

    let mut values = Vec::with_capacity(row_count);
    let mut param = 1;
    for _ in 0..row_count {
        let mut tuple = Vec::with_capacity(columns.len());
        for cast in &casts {
            tuple.push(format!("${}::text::{}", param, cast));
            param += 1;
        }
        values.push(format!("({})", tuple.join(", ")));
    }

    Ok(format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualified_table,
        quote_list(&col_names)?,
        values.join(", ")
    ))
}

/// Render a cell as the text form PostgreSQL's input functions accept.
pub(super) fn render_param(cell: &Cell, col: &Column) -> Option<String> {
    let text = match cell {
        Cell::Null => return None,
        Cell::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        Cell::Int(i) => i.to_string(),
        Cell::Float(f) => f.to_string(),
        Cell::Decimal(d) => d.to_string(),
        Cell::Text(s) => s.clone(),
        Cell::Json(v) if col.kind == ColumnType::Array => array_literal(v),
        Cell::Json(v) => v.to_string(),
        Cell::Bytes(b) => format!("\\x{}", hex::encode(b)),
        Cell::Uuid(u) => u.hyphenated().to_string(),
        Cell::Date(d) => d.format("%Y-%m-%d").to_string(),
        Cell::Time(t) => t.format("%H:%M:%S%.f").to_string(),
        Cell::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        Cell::TimestampTz(ts) => ts.to_rfc3339(),
    };
    Some(text)
}

/// Render a JSON value as a PostgreSQL array literal (`{"a","b"}`).
///
/// Scalars become one-element arrays; nested arrays become nested literals.
fn array_literal(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(array_element).collect();
            format!("{{{}}}", parts.join(","))
        }
        other => format!("{{{}}}", array_element(other)),
    }
}

fn array_element(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::Array(_) => array_literal(value),
        serde_json::Value::String(s) => quote_element(s),
        other => quote_element(&other.to_string()),
    }
}

fn quote_element(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
