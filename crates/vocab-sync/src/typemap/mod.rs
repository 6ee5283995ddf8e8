//! Declared column types mapped onto coercion directives.

use serde::{Deserialize, Serialize};

/// What a target column expects a cell to look like.
///
/// Both backends' type names collapse onto this one vocabulary; the coercer
/// only ever looks at the target column's `ColumnType`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Bool,
    Integer,
    Float,
    Decimal,
    Text,
    Json,
    Array,
    Bytes,
    Uuid,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    /// Anything else; values pass through untouched.
    Other,
}

impl ColumnType {
    /// Map a PostgreSQL `udt_name` (e.g. `int4`, `jsonb`, `_text`).
    pub fn from_postgres(udt_name: &str) -> Self {
        let t = udt_name.to_lowercase();
        if t.starts_with('_') {
            return ColumnType::Array;
        }
        match t.as_str() {
            "bool" | "boolean" => ColumnType::Bool,
            "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint" | "oid" => {
                ColumnType::Integer
            }
            "float4" | "float8" | "real" | "double precision" => ColumnType::Float,
            "numeric" | "decimal" | "money" => ColumnType::Decimal,
            "text" | "varchar" | "bpchar" | "char" | "name" | "character varying" | "citext" => {
                ColumnType::Text
            }
            "json" | "jsonb" => ColumnType::Json,
            "bytea" => ColumnType::Bytes,
            "uuid" => ColumnType::Uuid,
            "date" => ColumnType::Date,
            "time" | "timetz" => ColumnType::Time,
            "timestamp" => ColumnType::Timestamp,
            "timestamptz" => ColumnType::TimestampTz,
            _ => ColumnType::Other,
        }
    }

    /// Map a SQLite declared type (e.g. `integer`, `varchar(150)`, `bool`).
    ///
    /// Follows the column declarations Django emits for SQLite, where a UUID
    /// is stored as `char(32)` and JSON as `text`.
    pub fn from_sqlite(decl_type: &str) -> Self {
        let t = decl_type.trim().to_lowercase();
        if t.is_empty() {
            return ColumnType::Other;
        }
        if t == "char(32)" || t == "uuid" {
            return ColumnType::Uuid;
        }
        if t.starts_with("bool") {
            return ColumnType::Bool;
        }
        if t.contains("datetime") || t.starts_with("timestamp") {
            return ColumnType::Timestamp;
        }
        if t == "date" {
            return ColumnType::Date;
        }
        if t == "time" {
            return ColumnType::Time;
        }
        if t.starts_with("json") {
            return ColumnType::Json;
        }
        if t.contains("int") {
            return ColumnType::Integer;
        }
        if t.starts_with("decimal") || t.starts_with("numeric") {
            return ColumnType::Decimal;
        }
        if t.starts_with("real") || t.starts_with("floa") || t.starts_with("doub") {
            return ColumnType::Float;
        }
        if t.contains("char") || t.contains("clob") || t.contains("text") {
            return ColumnType::Text;
        }
        if t.starts_with("blob") {
            return ColumnType::Bytes;
        }
        ColumnType::Other
    }

    /// Scalar column types. Structured and binary columns are the ones a
    /// minimized row leaves empty.
    pub fn is_primitive(&self) -> bool {
        !matches!(self, ColumnType::Json | ColumnType::Array | ColumnType::Bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_scalar_types() {
        assert_eq!(ColumnType::from_postgres("bool"), ColumnType::Bool);
        assert_eq!(ColumnType::from_postgres("int4"), ColumnType::Integer);
        assert_eq!(ColumnType::from_postgres("int8"), ColumnType::Integer);
        assert_eq!(ColumnType::from_postgres("float8"), ColumnType::Float);
        assert_eq!(ColumnType::from_postgres("numeric"), ColumnType::Decimal);
        assert_eq!(ColumnType::from_postgres("varchar"), ColumnType::Text);
        assert_eq!(ColumnType::from_postgres("uuid"), ColumnType::Uuid);
        assert_eq!(ColumnType::from_postgres("bytea"), ColumnType::Bytes);
    }

    #[test]
    fn test_postgres_structured_and_temporal_types() {
        assert_eq!(ColumnType::from_postgres("jsonb"), ColumnType::Json);
        assert_eq!(ColumnType::from_postgres("_text"), ColumnType::Array);
        assert_eq!(ColumnType::from_postgres("_int4"), ColumnType::Array);
        assert_eq!(ColumnType::from_postgres("timestamptz"), ColumnType::TimestampTz);
        assert_eq!(ColumnType::from_postgres("timestamp"), ColumnType::Timestamp);
        assert_eq!(ColumnType::from_postgres("inet"), ColumnType::Other);
    }

    #[test]
    fn test_sqlite_django_declarations() {
        assert_eq!(ColumnType::from_sqlite("integer"), ColumnType::Integer);
        assert_eq!(ColumnType::from_sqlite("bigint"), ColumnType::Integer);
        assert_eq!(ColumnType::from_sqlite("bool"), ColumnType::Bool);
        assert_eq!(ColumnType::from_sqlite("varchar(150)"), ColumnType::Text);
        assert_eq!(ColumnType::from_sqlite("char(32)"), ColumnType::Uuid);
        assert_eq!(ColumnType::from_sqlite("datetime"), ColumnType::Timestamp);
        assert_eq!(ColumnType::from_sqlite("date"), ColumnType::Date);
        assert_eq!(ColumnType::from_sqlite("decimal"), ColumnType::Decimal);
        assert_eq!(ColumnType::from_sqlite("real"), ColumnType::Float);
        assert_eq!(ColumnType::from_sqlite("BLOB"), ColumnType::Bytes);
        assert_eq!(ColumnType::from_sqlite("json"), ColumnType::Json);
        assert_eq!(ColumnType::from_sqlite(""), ColumnType::Other);
    }

    #[test]
    fn test_primitive_kinds() {
        assert!(ColumnType::Text.is_primitive());
        assert!(ColumnType::TimestampTz.is_primitive());
        assert!(ColumnType::Other.is_primitive());
        assert!(!ColumnType::Json.is_primitive());
        assert!(!ColumnType::Array.is_primitive());
        assert!(!ColumnType::Bytes.is_primitive());
    }
}
