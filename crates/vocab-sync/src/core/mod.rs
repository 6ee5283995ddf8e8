//! Core abstractions shared by the drivers and the sync engine.

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use identifier::{qualify_pg, quote_ident, quote_list, validate_identifier};
pub use schema::{shared_columns, Column, ColumnPair, Table};
pub use traits::{RowPage, SyncStore};
pub use value::{Cell, Row};
