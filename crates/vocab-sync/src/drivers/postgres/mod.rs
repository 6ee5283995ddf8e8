//! PostgreSQL store.
//!
//! Backed by a deadpool-postgres pool capped at one connection, so each
//! role holds exactly one live server session.

mod reader;
mod writer;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use crate::config::PostgresConfig;
use crate::core::identifier::qualify_pg;
use crate::core::schema::Column;
use crate::core::traits::{RowPage, SyncStore};
use crate::core::value::Row;
use crate::drivers::common::TlsBuilder;
use crate::error::{Result, SyncError};

/// A PostgreSQL server store.
pub struct PgStore {
    pool: Pool,
    schema: String,
}

impl PgStore {
    /// Open the pool and verify the connection with `SELECT 1`.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("vocab-sync");

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let ssl_mode = config.effective_ssl_mode();
        let pool = match TlsBuilder::new(ssl_mode).build()? {
            None => {
                warn!(
                    "PostgreSQL TLS is disabled for {}. Credentials will be transmitted in plaintext.",
                    config.host
                );
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(1)
                    .build()
                    .map_err(|e| SyncError::pool(e, "creating PostgreSQL pool"))?
            }
            Some(tls_connector) => {
                let mgr = Manager::from_config(pg_config, tls_connector, mgr_config);
                Pool::builder(mgr)
                    .max_size(1)
                    .build()
                    .map_err(|e| SyncError::pool(e, "creating PostgreSQL pool"))?
            }
        };

        let store = Self {
            pool,
            schema: config.schema.clone(),
        };
        store.ping().await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            config.host, config.port, config.database
        );
        Ok(store)
    }

    async fn client(&self, context: &str) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, context.to_string()))
    }
}

#[async_trait]
impl SyncStore for PgStore {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<()> {
        let client = self.client("testing PostgreSQL connection").await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let client = self.client("getting connection for list_tables").await?;
        let rows = client.query(reader::LIST_TABLES, &[&self.schema]).await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<Column>> {
        let client = self.client("getting connection for list_columns").await?;
        let rows = client
            .query(reader::LIST_COLUMNS, &[&self.schema, &table])
            .await?;

        let columns: Vec<Column> = rows
            .iter()
            .map(|r| Column::postgres(r.get::<_, String>(0), r.get::<_, String>(1), r.get(2)))
            .collect();
        debug!("Loaded {} columns for {}", columns.len(), table);
        Ok(columns)
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let client = self.client("getting connection for row_count").await?;
        let sql = format!("SELECT COUNT(*) FROM {}", qualify_pg(&self.schema, table)?);
        let row = client.query_one(&sql, &[]).await?;
        Ok(row.get::<_, i64>(0))
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

        let sql = reader::page_sql(&qualify_pg(&self.schema, table)?, columns)?;
        let after = after.unwrap_or(reader::START_CTID);
        let limit_param = limit as i64;

        let client = self.client("getting connection for fetch_page").await?;
        let rows = client.query(&sql, &[&after, &limit_param]).await?;

        let mut page = Vec::with_capacity(rows.len());
        let mut last_ctid = None;
        for row in &rows {
            last_ctid = Some(row.try_get::<_, String>(0)?);
            page.push(
                columns
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| reader::decode_cell(row, idx + 1, col))
                    .collect(),
            );
        }

        let next = if page.len() == limit { last_ctid } else { None };
        Ok(RowPage { rows: page, next })
    }

    async fn clear_table(&self, table: &str) -> Result<u64> {
        let client = self.client("getting connection for clear_table").await?;
        let sql = format!("DELETE FROM {}", qualify_pg(&self.schema, table)?);
        Ok(client.execute(&sql, &[]).await?)
    }

    async fn insert_rows(&self, table: &str, columns: &[Column], rows: &[Row]) -> Result<u64> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }

        let qualified = qualify_pg(&self.schema, table)?;
        let rows_per_statement = (writer::MAX_PARAMS / columns.len()).max(1);

        let mut client = self.client("getting connection for insert_rows").await?;
        let tx = client.transaction().await?;

        let mut inserted = 0u64;
        for group in rows.chunks(rows_per_statement) {
            let sql = writer::build_insert_sql(&qualified, columns, group.len())?;
            let params: Vec<Option<String>> = group
                .iter()
                .flat_map(|row| {
                    columns
                        .iter()
                        .zip(row.iter())
                        .map(|(col, cell)| writer::render_param(cell, col))
                })
                .collect();
            let param_refs: Vec<&(dyn ToSql + Sync)> =
                params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

            inserted += tx.execute(&sql, &param_refs).await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn rollback(&self) -> Result<()> {
        let client = self.client("getting connection for rollback").await?;
        client.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close();
    }
}
