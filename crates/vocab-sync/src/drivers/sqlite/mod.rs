//! SQLite store for the local embedded database.
//!
//! Uses SQLx with a pool of one connection. SQLite has no column types at
//! runtime, so cells are decoded by the storage class of each value and
//! written back in the textual forms Django's SQLite backend produces.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Timelike};
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row as _, TypeInfo, ValueRef};
use tracing::{debug, info, warn};

use crate::config::SqliteConfig;
use crate::core::identifier::{quote_ident, quote_list};
use crate::core::schema::Column;
use crate::core::traits::{RowPage, SyncStore};
use crate::core::value::{Cell, Row};
use crate::error::{Result, SyncError};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

const LIST_TABLES: &str = r#"
    SELECT name FROM sqlite_master
    WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
    ORDER BY name
"#;

const LIST_COLUMNS: &str = r#"SELECT name, type, "notnull" FROM pragma_table_info(?1) ORDER BY cid"#;

/// A SQLite file store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open an existing database file.
    pub async fn connect(config: &SqliteConfig) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| {
                SyncError::pool(e, format!("opening SQLite database {}", config.path.display()))
            })?;

        let store = Self { pool };
        store.ping().await?;

        info!("Opened SQLite database: {}", config.path.display());
        Ok(store)
    }
}

#[async_trait]
impl SyncStore for SqliteStore {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(LIST_TABLES).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>(0).map_err(SyncError::from))
            .collect()
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<Column>> {
        let rows = sqlx::query(LIST_COLUMNS)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get(0)?;
            let decl_type: String = row.try_get(1)?;
            let not_null: i64 = row.try_get(2)?;
            columns.push(Column::sqlite(name, decl_type, not_null == 0));
        }
        debug!("Loaded {} columns for {}", columns.len(), table);
        Ok(columns)
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn fetch_page(
        &self,
        table: &str,
        columns: &[Column],
        after: Option<&str>,
        limit: usize,
    ) -> Result<RowPage> {
        if columns.is_empty() || limit == 0 {
            return Ok(RowPage::default());
        }

        let after = match after {
            Some(cursor) => cursor.parse::<i64>().map_err(|_| {
                SyncError::Schema(format!("invalid rowid cursor '{}' for {}", cursor, table))
            })?,
            None => i64::MIN,
        };

        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let sql = format!(
            "SELECT rowid, {} FROM {} WHERE rowid > ?1 ORDER BY rowid LIMIT ?2",
            quote_list(&names)?,
            quote_ident(table)?
        );
        let rows = sqlx::query(&sql)
            .bind(after)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut page = Vec::with_capacity(rows.len());
        let mut last_rowid = None;
        for row in &rows {
            last_rowid = Some(row.try_get::<i64, _>(0)?);
            page.push(
                columns
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| decode_cell(row, idx + 1, col))
                    .collect(),
            );
        }

        let next = if page.len() == limit {
            last_rowid.map(|id| id.to_string())
        } else {
            None
        };
        Ok(RowPage { rows: page, next })
    }

    async fn clear_table(&self, table: &str) -> Result<u64> {
        let sql = format!("DELETE FROM {}", quote_ident(table)?);
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn insert_rows(&self, table: &str, columns: &[Column], rows: &[Row]) -> Result<u64> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }

        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table)?,
            quote_list(&names)?,
            placeholders.join(", ")
        );

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for row in rows {
            let mut query = sqlx::query(&sql);
            for (col, cell) in columns.iter().zip(row.iter()) {
                query = bind_cell(query, cell, col);
            }
            inserted += query.execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        Ok(inserted)
    }

    async fn rollback(&self) -> Result<()> {
        // sqlx rolls back a transaction when it is dropped uncommitted.
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Decode one cell by the storage class of the stored value.
fn decode_cell(row: &SqliteRow, idx: usize, col: &Column) -> Cell {
    let storage = match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Cell::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(e) => {
            warn!("Could not read column {}: {}; reading as NULL", col.name, e);
            return Cell::Null;
        }
    };

    let cell = match storage.as_str() {
        "INTEGER" => row.try_get::<i64, _>(idx).map(Cell::Int),
        "REAL" => row.try_get::<f64, _>(idx).map(Cell::Float),
        "BLOB" => row.try_get::<Vec<u8>, _>(idx).map(Cell::Bytes),
        _ => row.try_get::<String, _>(idx).map(Cell::Text),
    };

    match cell {
        Ok(cell) => cell,
        // TEXT holding invalid UTF-8 is still readable as raw bytes.
        Err(_) => match row.try_get_unchecked::<Vec<u8>, _>(idx) {
            Ok(bytes) => Cell::Bytes(bytes),
            Err(e) => {
                warn!("Could not decode column {}: {}; reading as NULL", col.name, e);
                Cell::Null
            }
        },
    }
}

/// Bind a cell in the representation Django's SQLite backend reads back.
fn bind_cell<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    cell: &Cell,
    col: &Column,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match cell {
        Cell::Null => query.bind(None::<String>),
        Cell::Bool(b) => query.bind(*b),
        Cell::Int(i) => query.bind(*i),
        Cell::Float(f) => query.bind(*f),
        Cell::Decimal(d) => query.bind(d.to_string()),
        Cell::Text(s) => query.bind(s.clone()),
        Cell::Json(v) => query.bind(v.to_string()),
        Cell::Bytes(b) => query.bind(b.clone()),
        Cell::Uuid(u) if col.data_type.eq_ignore_ascii_case("char(32)") => {
            query.bind(u.simple().to_string())
        }
        Cell::Uuid(u) => query.bind(u.hyphenated().to_string()),
        Cell::Date(d) => query.bind(d.format("%Y-%m-%d").to_string()),
        Cell::Time(t) => query.bind(t.format("%H:%M:%S%.f").to_string()),
        Cell::Timestamp(ts) => query.bind(format_timestamp(ts)),
        Cell::TimestampTz(ts) => query.bind(format_timestamp(&ts.naive_utc())),
    }
}

/// `YYYY-MM-DD HH:MM:SS[.ffffff]`, the layout Django stores in SQLite.
pub(crate) fn format_timestamp(ts: &NaiveDateTime) -> String {
    if ts.nanosecond() == 0 {
        ts.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typemap::ColumnType;
    use chrono::NaiveDate;

    #[test]
    fn test_format_timestamp_matches_django_layout() {
        let whole = NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_opt(8, 15, 0)
            .unwrap();
        assert_eq!(format_timestamp(&whole), "2024-05-17 08:15:00");

        let micros = NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_micro_opt(8, 15, 0, 250)
            .unwrap();
        assert_eq!(format_timestamp(&micros), "2024-05-17 08:15:00.000250");
    }

    async fn scratch_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.sqlite3");
        std::fs::File::create(&path).unwrap();
        let store = SqliteStore::connect(&SqliteConfig { path }).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_introspection_and_round_trip() {
        let (_dir, store) = scratch_store().await;
        sqlx::query(
            "CREATE TABLE words (id integer NOT NULL PRIMARY KEY, term varchar(100) NOT NULL, \
             extra text NULL, learned bool NOT NULL, token char(32) NULL)",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        assert_eq!(store.list_tables().await.unwrap(), vec!["words".to_string()]);

        let cols = store.list_columns("words").await.unwrap();
        let kinds: Vec<_> = cols.iter().map(|c| c.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                ColumnType::Integer,
                ColumnType::Text,
                ColumnType::Text,
                ColumnType::Bool,
                ColumnType::Uuid
            ]
        );
        assert!(!cols[1].is_nullable);
        assert!(cols[2].is_nullable);

        let id = uuid::Uuid::new_v4();
        let rows = vec![
            vec![
                Cell::Int(1),
                Cell::Text("hola".into()),
                Cell::Null,
                Cell::Bool(true),
                Cell::Uuid(id),
            ],
            vec![
                Cell::Int(2),
                Cell::Text("adiós".into()),
                Cell::Text("x".into()),
                Cell::Bool(false),
                Cell::Null,
            ],
        ];
        assert_eq!(store.insert_rows("words", &cols, &rows).await.unwrap(), 2);
        assert_eq!(store.row_count("words").await.unwrap(), 2);

        let fetched = store.fetch_page("words", &cols, None, 100).await.unwrap().rows;
        assert_eq!(fetched[0][1], Cell::Text("hola".into()));
        assert_eq!(fetched[0][2], Cell::Null);
        assert_eq!(fetched[0][3], Cell::Int(1));
        assert_eq!(fetched[0][4], Cell::Text(id.simple().to_string()));
        assert_eq!(fetched[1][3], Cell::Int(0));

        assert_eq!(store.clear_table("words").await.unwrap(), 2);
        assert_eq!(store.row_count("words").await.unwrap(), 0);
        store.close().await;
        store.close().await;
    }

    #[tokio::test]
    async fn test_insert_is_all_or_nothing() {
        let (_dir, store) = scratch_store().await;
        sqlx::query("CREATE TABLE t (id integer PRIMARY KEY, name text NOT NULL)")
            .execute(&store.pool)
            .await
            .unwrap();
        let cols = store.list_columns("t").await.unwrap();

        let rows = vec![
            vec![Cell::Int(1), Cell::Text("a".into())],
            vec![Cell::Int(2), Cell::Null],
        ];
        assert!(store.insert_rows("t", &cols, &rows).await.is_err());
        assert_eq!(store.row_count("t").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_utf8_text_reads_as_bytes() {
        let (_dir, store) = scratch_store().await;
        sqlx::query("CREATE TABLE t (body text)")
            .execute(&store.pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO t (body) VALUES (CAST(X'FFFE' AS TEXT))")
            .execute(&store.pool)
            .await
            .unwrap();

        let cols = store.list_columns("t").await.unwrap();
        let rows = store.fetch_page("t", &cols, None, 100).await.unwrap().rows;
        assert!(matches!(rows[0][0], Cell::Bytes(_)));
    }

    #[tokio::test]
    async fn test_fetch_page_walks_rowid_order() {
        let (_dir, store) = scratch_store().await;
        sqlx::query("CREATE TABLE t (id integer PRIMARY KEY, name text)")
            .execute(&store.pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO t VALUES (3, 'c'), (1, 'a'), (7, 'g'), (5, 'e'), (9, 'i')")
            .execute(&store.pool)
            .await
            .unwrap();
        let cols = store.list_columns("t").await.unwrap();

        let mut ids = Vec::new();
        let mut pages = 0;
        let mut cursor: Option<String> = None;
        loop {
            let page = store
                .fetch_page("t", &cols, cursor.as_deref(), 2)
                .await
                .unwrap();
            pages += 1;
            ids.extend(page.rows.iter().map(|r| r[0].clone()));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let expected: Vec<Cell> = [1, 3, 5, 7, 9].into_iter().map(Cell::Int).collect();
        assert_eq!(ids, expected);
        assert_eq!(pages, 3);
        assert!(matches!(
            store.fetch_page("t", &cols, Some("not-a-rowid"), 2).await,
            Err(SyncError::Schema(_))
        ));
    }
}
