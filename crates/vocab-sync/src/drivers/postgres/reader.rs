//! Catalog queries and row decoding for PostgreSQL.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::FromSql;
use tracing::warn;
use uuid::Uuid;

use crate::core::identifier::quote_ident;
use crate::core::schema::Column;
use crate::core::value::Cell;
use crate::error::Result;
use crate::typemap::ColumnType;

pub(super) const LIST_TABLES: &str = r#"
    SELECT table_name::text
    FROM information_schema.tables
    WHERE table_schema = $1 AND table_type = 'BASE TABLE'
    ORDER BY table_name
"#;

pub(super) const LIST_COLUMNS: &str = r#"
    SELECT
        column_name::text,
        udt_name::text,
        CASE WHEN is_nullable = 'YES' THEN true ELSE false END
    FROM information_schema.columns
    WHERE table_schema = $1 AND table_name = $2
    ORDER BY ordinal_position
"#;

/// Cursor that sorts before every live tuple (offsets start at 1).
pub(super) const START_CTID: &str = "(0,0)";

/// Keyset page over the tuple address: `$1` is the last `ctid` seen (as
/// text), `$2` the page size.
pub(super) fn page_sql(qualified_table: &str, columns: &[Column]) -> Result<String> {
    let select_list = columns
        .iter()
        .map(select_expr)
        .collect::<Result<Vec<_>>>()?;
    Ok(format!(
        "SELECT ctid::text, {} FROM {} WHERE ctid > $1::text::tid ORDER BY ctid LIMIT $2",
        select_list.join(", "),
        qualified_table
    ))
}

/// Select-list expression for one column.
///
/// Every column is normalized server-side to a type with a single decoder:
/// arrays arrive as JSONB, unknown types as text, widths are widened.
pub(super) fn select_expr(col: &Column) -> Result<String> {
    let ident = quote_ident(&col.name)?;
    let expr = match col.kind {
        ColumnType::Integer => format!("{}::int8", ident),
        ColumnType::Float => format!("{}::float8", ident),
        ColumnType::Decimal => format!("{}::numeric", ident),
        ColumnType::Text | ColumnType::Other => format!("{}::text", ident),
        ColumnType::Json => format!("{}::jsonb", ident),
        ColumnType::Array => format!("to_jsonb({})", ident),
        ColumnType::Time => format!("{}::time", ident),
        ColumnType::Bool
        | ColumnType::Bytes
        | ColumnType::Uuid
        | ColumnType::Date
        | ColumnType::Timestamp
        | ColumnType::TimestampTz => ident.clone(),
    };
    Ok(format!("{} AS {}", expr, ident))
}

/// Decode one cell according to the column's normalized select type.
pub(super) fn decode_cell(row: &tokio_postgres::Row, idx: usize, col: &Column) -> Cell {
    match col.kind {
        ColumnType::Bool => get::<bool>(row, idx, col).map_or(Cell::Null, Cell::Bool),
        ColumnType::Integer => get::<i64>(row, idx, col).map_or(Cell::Null, Cell::Int),
        ColumnType::Float => get::<f64>(row, idx, col).map_or(Cell::Null, Cell::Float),
        ColumnType::Decimal => get::<Decimal>(row, idx, col).map_or(Cell::Null, Cell::Decimal),
        ColumnType::Text | ColumnType::Other => {
            get::<String>(row, idx, col).map_or(Cell::Null, Cell::Text)
        }
        ColumnType::Json | ColumnType::Array => {
            get::<serde_json::Value>(row, idx, col).map_or(Cell::Null, Cell::Json)
        }
        ColumnType::Bytes => get::<Vec<u8>>(row, idx, col).map_or(Cell::Null, Cell::Bytes),
        ColumnType::Uuid => get::<Uuid>(row, idx, col).map_or(Cell::Null, Cell::Uuid),
        ColumnType::Date => get::<NaiveDate>(row, idx, col).map_or(Cell::Null, Cell::Date),
        ColumnType::Time => get::<NaiveTime>(row, idx, col).map_or(Cell::Null, Cell::Time),
        ColumnType::Timestamp => {
            get::<NaiveDateTime>(row, idx, col).map_or(Cell::Null, Cell::Timestamp)
        }
        ColumnType::TimestampTz => {
            get::<DateTime<Utc>>(row, idx, col).map_or(Cell::Null, Cell::TimestampTz)
        }
    }
}

/// Read a nullable cell. Decode failures (NaN numerics, out-of-range
/// timestamps) degrade to NULL with a warning.
fn get<'a, T>(row: &'a tokio_postgres::Row, idx: usize, col: &Column) -> Option<T>
where
    T: FromSql<'a>,
{
    match row.try_get::<_, Option<T>>(idx) {
        Ok(v) => v,
        Err(e) => {
            warn!(
                "Could not decode column {} ({}): {}; reading as NULL",
                col.name, col.data_type, e
            );
            None
        }
    }
}
