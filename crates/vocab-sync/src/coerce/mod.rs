//! Per-cell conversion between backend type systems.
//!
//! [`coerce`] rewrites a cell read from the source store into the shape the
//! target column declares. It is total: every branch either produces a cell
//! of the target kind or hands the original value through untouched, leaving
//! the target's own input functions to accept or reject it. Coercion never
//! fails a row by itself.

mod temporal;

use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use crate::core::schema::Column;
use crate::core::value::{Cell, Row};
use crate::typemap::ColumnType;

pub use temporal::{parse_timestamp, ParsedTimestamp};

/// Convert one cell toward `target`'s declared type.
pub fn coerce(cell: Cell, target: &Column) -> Cell {
    if cell.is_null() {
        return Cell::Null;
    }

    match target.kind {
        ColumnType::Bool => to_bool(cell),
        ColumnType::Integer => to_integer(cell),
        ColumnType::Float => to_float(cell),
        ColumnType::Decimal => to_decimal(cell),
        ColumnType::Text => to_text(cell),
        ColumnType::Json => to_json(cell),
        ColumnType::Array => to_array(cell),
        ColumnType::Bytes => to_bytes(cell),
        ColumnType::Uuid => to_uuid(cell),
        ColumnType::Date => temporal::to_date(cell),
        ColumnType::Time => temporal::to_time(cell),
        ColumnType::Timestamp => temporal::to_timestamp(cell),
        ColumnType::TimestampTz => temporal::to_timestamptz(cell),
        ColumnType::Other => cell,
    }
}

/// Coerce a whole row; cell `i` goes to `targets[i]`.
pub fn coerce_row(row: Row, targets: &[Column]) -> Row {
    row.into_iter()
        .zip(targets)
        .map(|(cell, col)| coerce(cell, col))
        .collect()
}

fn to_bool(cell: Cell) -> Cell {
    match cell {
        Cell::Int(i) => Cell::Bool(i != 0),
        Cell::Float(f) => Cell::Bool(f != 0.0),
        Cell::Decimal(d) => Cell::Bool(!d.is_zero()),
        Cell::Text(s) => match parse_bool(&s) {
            Some(b) => Cell::Bool(b),
            None => Cell::Text(s),
        },
        Cell::Json(Value::Bool(b)) => Cell::Bool(b),
        Cell::Json(Value::Number(n)) => Cell::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
        other => other,
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Some(false),
        other => other.parse::<f64>().ok().map(|f| f != 0.0),
    }
}

fn to_integer(cell: Cell) -> Cell {
    match cell {
        Cell::Bool(b) => Cell::Int(i64::from(b)),
        Cell::Float(f) if f.fract() == 0.0 && f.is_finite() => match f.to_i64() {
            Some(i) => Cell::Int(i),
            None => Cell::Float(f),
        },
        Cell::Decimal(d) if d.fract().is_zero() => match d.to_i64() {
            Some(i) => Cell::Int(i),
            None => Cell::Decimal(d),
        },
        Cell::Text(s) => match s.trim().parse::<i64>() {
            Ok(i) => Cell::Int(i),
            Err(_) => Cell::Text(s),
        },
        Cell::Json(Value::Number(n)) if n.is_i64() => n.as_i64().map_or(Cell::Null, Cell::Int),
        other => other,
    }
}

fn to_float(cell: Cell) -> Cell {
    match cell {
        Cell::Bool(b) => Cell::Float(if b { 1.0 } else { 0.0 }),
        Cell::Int(i) => Cell::Float(i as f64),
        Cell::Decimal(d) => match d.to_f64() {
            Some(f) => Cell::Float(f),
            None => Cell::Decimal(d),
        },
        Cell::Text(s) => match s.trim().parse::<f64>() {
            Ok(f) => Cell::Float(f),
            Err(_) => Cell::Text(s),
        },
        Cell::Json(Value::Number(n)) => n.as_f64().map_or(Cell::Null, Cell::Float),
        other => other,
    }
}

fn to_decimal(cell: Cell) -> Cell {
    match cell {
        Cell::Bool(b) => Cell::Decimal(Decimal::from(i64::from(b))),
        Cell::Int(i) => Cell::Decimal(Decimal::from(i)),
        Cell::Float(f) => match Decimal::from_f64(f) {
            Some(d) => Cell::Decimal(d),
            None => Cell::Float(f),
        },
        Cell::Text(s) => {
            let trimmed = s.trim();
            match Decimal::from_str(trimmed).or_else(|_| Decimal::from_scientific(trimmed)) {
                Ok(d) => Cell::Decimal(d),
                Err(_) => Cell::Text(s),
            }
        }
        other => other,
    }
}

fn to_text(cell: Cell) -> Cell {
    match cell {
        Cell::Text(s) => Cell::Text(s),
        Cell::Bool(b) => Cell::Text(b.to_string()),
        Cell::Int(i) => Cell::Text(i.to_string()),
        Cell::Float(f) => Cell::Text(f.to_string()),
        Cell::Decimal(d) => Cell::Text(d.to_string()),
        Cell::Json(v) => Cell::Text(v.to_string()),
        Cell::Bytes(b) => Cell::Text(bytes_to_text(b)),
        Cell::Uuid(u) => Cell::Text(u.hyphenated().to_string()),
        Cell::Date(d) => Cell::Text(d.format("%Y-%m-%d").to_string()),
        Cell::Time(t) => Cell::Text(t.format("%H:%M:%S%.f").to_string()),
        Cell::Timestamp(ts) => Cell::Text(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Cell::TimestampTz(ts) => Cell::Text(ts.to_rfc3339()),
        Cell::Null => Cell::Null,
    }
}

/// UTF-8 when the bytes are valid UTF-8, standard base64 otherwise.
pub fn bytes_to_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => BASE64.encode(e.into_bytes()),
    }
}

fn to_json(cell: Cell) -> Cell {
    match cell {
        Cell::Json(v) => Cell::Json(v),
        Cell::Text(s) => match serde_json::from_str::<Value>(&s) {
            Ok(v) => Cell::Json(v),
            Err(_) => Cell::Text(s),
        },
        Cell::Bytes(b) => match serde_json::from_slice::<Value>(&b) {
            Ok(v) => Cell::Json(v),
            Err(_) => Cell::Bytes(b),
        },
        Cell::Bool(b) => Cell::Json(Value::Bool(b)),
        Cell::Int(i) => Cell::Json(Value::from(i)),
        Cell::Float(f) => match serde_json::Number::from_f64(f) {
            Some(n) => Cell::Json(Value::Number(n)),
            None => Cell::Float(f),
        },
        other => other,
    }
}

fn to_array(cell: Cell) -> Cell {
    match cell {
        Cell::Json(Value::Array(items)) => Cell::Json(Value::Array(items)),
        Cell::Json(other) => Cell::Json(Value::Array(vec![other])),
        Cell::Text(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Array(items)) => Cell::Json(Value::Array(items)),
            Ok(other) => Cell::Json(Value::Array(vec![other])),
            // `{a,b}` is already an array literal the server understands.
            Err(_) if s.trim_start().starts_with('{') => Cell::Text(s),
            Err(_) => Cell::Json(Value::Array(vec![Value::String(s)])),
        },
        Cell::Bool(b) => Cell::Json(Value::Array(vec![Value::Bool(b)])),
        Cell::Int(i) => Cell::Json(Value::Array(vec![Value::from(i)])),
        other => other,
    }
}

fn to_bytes(cell: Cell) -> Cell {
    match cell {
        Cell::Bytes(b) => Cell::Bytes(b),
        Cell::Text(s) => Cell::Bytes(s.into_bytes()),
        Cell::Uuid(u) => Cell::Bytes(u.as_bytes().to_vec()),
        other => other,
    }
}

fn to_uuid(cell: Cell) -> Cell {
    match cell {
        Cell::Uuid(u) => Cell::Uuid(u),
        Cell::Text(s) => match Uuid::parse_str(s.trim()) {
            Ok(u) => Cell::Uuid(u),
            Err(_) => Cell::Text(s),
        },
        Cell::Bytes(b) => match Uuid::from_slice(&b) {
            Ok(u) => Cell::Uuid(u),
            Err(_) => Cell::Bytes(b),
        },
        other => other,
    }
}
