//! Table and column metadata discovered per job.

use serde::{Deserialize, Serialize};

use crate::typemap::ColumnType;

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Type name exactly as the backend declares it (`udt_name` for
    /// PostgreSQL, the declared type for SQLite).
    pub data_type: String,

    /// Coercion directive inferred from `data_type`.
    pub kind: ColumnType,

    /// Whether the column accepts NULL.
    pub is_nullable: bool,
}

impl Column {
    /// Build a column, inferring its kind from a PostgreSQL `udt_name`.
    pub fn postgres(name: impl Into<String>, udt_name: impl Into<String>, is_nullable: bool) -> Self {
        let data_type = udt_name.into();
        Self {
            name: name.into(),
            kind: ColumnType::from_postgres(&data_type),
            data_type,
            is_nullable,
        }
    }

    /// Build a column, inferring its kind from a SQLite declared type.
    pub fn sqlite(name: impl Into<String>, decl_type: impl Into<String>, is_nullable: bool) -> Self {
        let data_type = decl_type.into();
        Self {
            name: name.into(),
            kind: ColumnType::from_sqlite(&data_type),
            data_type,
            is_nullable,
        }
    }
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,

    /// Column definitions in ordinal order.
    pub columns: Vec<Column>,
}

impl Table {
    /// Create a table description.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Source and target view of the same column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPair {
    pub source: Column,
    pub target: Column,
}

/// Pair up the columns two tables share, in target ordinal order.
///
/// Columns only one side has are left out: source-only columns have nowhere
/// to go and target-only columns fall back to their defaults.
pub fn shared_columns(source: &Table, target: &Table) -> Vec<ColumnPair> {
    target
        .columns
        .iter()
        .filter_map(|t| {
            source.column(&t.name).map(|s| ColumnPair {
                source: s.clone(),
                target: t.clone(),
            })
        })
        .collect()
}
