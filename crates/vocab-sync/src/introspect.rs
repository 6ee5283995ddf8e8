//! Table and column discovery per backend role.

use std::collections::BTreeSet;

use tracing::debug;

use crate::core::schema::{Column, Table};
use crate::error::Result;
use crate::orchestrator::{ConnectionManager, Role};

/// Read-only catalog queries against a [`ConnectionManager`]'s stores.
pub struct SchemaIntrospector<'a> {
    connections: &'a ConnectionManager,
}

impl<'a> SchemaIntrospector<'a> {
    pub fn new(connections: &'a ConnectionManager) -> Self {
        Self { connections }
    }

    /// Table names for a role, sorted.
    ///
    /// Server roles hide the configured bookkeeping tables
    /// (`django_migrations` by default).
    pub async fn list_tables(&self, role: Role) -> Result<Vec<String>> {
        let tables = self
            .connections
            .read_with_retry(role, |store| async move { store.list_tables().await })
            .await?;

        if role == Role::Local {
            return Ok(tables);
        }

        let excluded = &self.connections.config().sync.excluded_tables;
        Ok(tables
            .into_iter()
            .filter(|t| !excluded.iter().any(|x| x == t))
            .collect())
    }

    /// Columns of one table for a role, in ordinal order.
    pub async fn list_columns(&self, table: &str, role: Role) -> Result<Vec<Column>> {
        self.connections
            .read_with_retry(role, |store| async move { store.list_columns(table).await })
            .await
    }

    /// Column names of one table for a role.
    pub async fn list_column_names(&self, table: &str, role: Role) -> Result<Vec<String>> {
        Ok(self
            .list_columns(table, role)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    /// Full table description for a role.
    pub async fn describe(&self, table: &str, role: Role) -> Result<Table> {
        Ok(Table::new(table, self.list_columns(table, role).await?))
    }

    /// Tables present on both roles.
    pub async fn common_tables(&self, source: Role, target: Role) -> Result<BTreeSet<String>> {
        let source_tables: BTreeSet<String> = self.list_tables(source).await?.into_iter().collect();
        let target_tables: BTreeSet<String> = self.list_tables(target).await?.into_iter().collect();

        let common: BTreeSet<String> = source_tables
            .intersection(&target_tables)
            .cloned()
            .collect();
        debug!(
            "{} tables on {}, {} on {}, {} in common",
            source_tables.len(),
            source,
            target_tables.len(),
            target,
            common.len()
        );
        Ok(common)
    }
}
