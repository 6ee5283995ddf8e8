//! Cell values moved between backends.
//!
//! Every cell read from a source store is lifted into a [`Cell`] before it is
//! coerced toward the target column's type and written out again. The enum is
//! the single vocabulary shared by the PostgreSQL and SQLite drivers.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A single untyped cell value.
///
/// Drivers produce the most specific variant they can decode; the coercer
/// rewrites it into the shape the target column expects.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// SQL NULL.
    Null,

    /// Boolean value.
    Bool(bool),

    /// Any integer width, widened to 64 bits.
    Int(i64),

    /// Any floating point width, widened to 64 bits.
    Float(f64),

    /// Arbitrary precision numeric.
    Decimal(Decimal),

    /// Text/string data.
    Text(String),

    /// Structured value (JSON object, array or scalar).
    Json(serde_json::Value),

    /// Binary data.
    Bytes(Vec<u8>),

    /// UUID value.
    Uuid(Uuid),

    /// Date without time component.
    Date(NaiveDate),

    /// Time without date component.
    Time(NaiveTime),

    /// Timestamp without timezone.
    Timestamp(NaiveDateTime),

    /// Timestamp pinned to UTC.
    TimestampTz(DateTime<Utc>),
}

impl Cell {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Primitive cells are scalars every backend stores natively.
    ///
    /// Structured and binary values are the ones a row minimization nulls out.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Cell::Json(_) | Cell::Bytes(_))
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Bool(v)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Cell {
    fn from(v: Vec<u8>) -> Self {
        Cell::Bytes(v)
    }
}

impl From<serde_json::Value> for Cell {
    fn from(v: serde_json::Value) -> Self {
        Cell::Json(v)
    }
}

impl From<Uuid> for Cell {
    fn from(v: Uuid) -> Self {
        Cell::Uuid(v)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Cell::Null)
    }
}

/// A row is positional: cell `i` belongs to column `i` of the column list it
/// was fetched with.
pub type Row = Vec<Cell>;
