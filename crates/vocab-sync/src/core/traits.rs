//! The store seam every backend implements.
//!
//! A [`SyncStore`] owns exactly one live connection to one backend role. The
//! orchestrator, the introspector and the batch loader only ever talk to
//! `Arc<dyn SyncStore>`, so PostgreSQL and SQLite are interchangeable in
//! every role.

use async_trait::async_trait;

use crate::error::Result;

use super::schema::Column;
use super::value::Row;

/// One slice of a table scan, in the store's physical row order.
#[derive(Debug, Default)]
pub struct RowPage {
    pub rows: Vec<Row>,
    /// Resume point after the last row; `None` once the scan is exhausted.
    pub next: Option<String>,
}

/// One backend connection, seen through the operations a sync needs.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Engine name for logs (`postgres`, `sqlite`).
    fn kind(&self) -> &'static str;

    /// Cheap liveness check (`SELECT 1`).
    async fn ping(&self) -> Result<()>;

    /// User tables, sorted by name.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Columns of `table` in ordinal order.
    async fn list_columns(&self, table: &str) -> Result<Vec<Column>>;

    /// `SELECT COUNT(*)` on `table`.
    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Up to `limit` rows of `table` following the `after` cursor (from the
    /// start when `None`), projected onto `columns` in that order.
    ///
    /// Pages are keyed on the row's physical address, so a full scan holds
    /// one page in memory at a time.
    async fn fetch_page(
        &self,
        table: &str,
        columns: &[Column],
        after: Option<&str>,
        limit: usize,
    ) -> Result<RowPage>;

    /// Delete every row of `table`. Returns the number of rows removed.
    async fn clear_table(&self, table: &str) -> Result<u64>;

    /// Insert `rows` into `table` inside one transaction.
    ///
    /// Either every row lands or none does. `columns` describes the target
    /// columns the row cells line up with.
    async fn insert_rows(&self, table: &str, columns: &[Column], rows: &[Row]) -> Result<u64>;

    /// Roll back whatever transaction the connection is stuck in.
    async fn rollback(&self) -> Result<()>;

    /// Close the underlying connection. Calling it twice is harmless.
    async fn close(&self);
}
