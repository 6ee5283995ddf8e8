//! Per-role connection ownership.
//!
//! [`ConnectionManager`] is the explicit context every job runs against: it
//! holds at most one live store per backend role, opens it on first use and
//! nulls the slot before closing so a failed close never leaves a stale
//! handle behind. One manager belongs to one job; the caller and the worker
//! process each build their own.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::core::traits::SyncStore;
use crate::drivers::open_store;
use crate::error::{Result, SyncError};

/// A backend role in a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Primary server store.
    Primary,
    /// Local embedded store.
    Local,
    /// Optional second server store.
    Secondary,
}

impl Role {
    /// Every role, in slot order.
    pub const ALL: [Role; 3] = [Role::Primary, Role::Local, Role::Secondary];

    fn slot(self) -> usize {
        match self {
            Role::Primary => 0,
            Role::Local => 1,
            Role::Secondary => 2,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Primary => "primary",
            Role::Local => "local",
            Role::Secondary => "secondary",
        };
        f.write_str(name)
    }
}

type Slot = Mutex<Option<Arc<dyn SyncStore>>>;

/// Lazily opened stores, one per role.
pub struct ConnectionManager {
    config: SyncConfig,
    slots: [Slot; 3],
}

impl ConnectionManager {
    /// Create a manager; nothing is opened until first use.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            slots: [Mutex::new(None), Mutex::new(None), Mutex::new(None)],
        }
    }

    /// The configuration the manager was built from.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Whether a role has connection settings at all.
    pub fn is_configured(&self, role: Role) -> bool {
        self.config.backend(role).is_some()
    }

    /// Ensure the role has a live store. Returns false (and leaves the slot
    /// empty) when the connection cannot be opened.
    pub async fn connect(&self, role: Role) -> bool {
        match self.store(role).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Could not connect to {}: {}", role, e);
                false
            }
        }
    }

    /// The role's live store, opening it if needed.
    pub async fn store(&self, role: Role) -> Result<Arc<dyn SyncStore>> {
        let mut slot = self.slots[role.slot()].lock().await;
        if let Some(store) = slot.as_ref() {
            return Ok(Arc::clone(store));
        }

        let backend = self
            .config
            .backend(role)
            .ok_or(SyncError::NotConfigured(role))?;

        debug!("Opening {} store ({})", role, backend.endpoint());
        let store = open_store(backend).await?;
        *slot = Some(Arc::clone(&store));
        info!("{} connected ({}, {})", role, store.kind(), backend.endpoint());
        Ok(store)
    }

    /// Close a role's store. Safe to call on a closed or never-opened role.
    pub async fn close(&self, role: Role) {
        let store = self.slots[role.slot()].lock().await.take();
        if let Some(store) = store {
            store.close().await;
            debug!("{} connection closed", role);
        }
    }

    /// Close every role.
    pub async fn close_all(&self) {
        for role in Role::ALL {
            self.close(role).await;
        }
    }

    /// Probe every configured role.
    pub async fn test_all(&self) -> BTreeMap<Role, bool> {
        let mut results = BTreeMap::new();
        for role in Role::ALL {
            if !self.is_configured(role) {
                continue;
            }
            let ok = match self.store(role).await {
                Ok(store) => match store.ping().await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("{} failed health check: {}", role, e);
                        self.close(role).await;
                        false
                    }
                },
                Err(e) => {
                    warn!("Could not connect to {}: {}", role, e);
                    false
                }
            };
            results.insert(role, ok);
        }
        results
    }

    /// Run a read against a role. If the server reports the session's
    /// transaction as aborted, roll back and run the read once more.
    ///
    /// Only for reads: writes are never retried.
    pub async fn read_with_retry<T, F, Fut>(&self, role: Role, read: F) -> Result<T>
    where
        F: Fn(Arc<dyn SyncStore>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let store = self.store(role).await?;
        match read(Arc::clone(&store)).await {
            Err(e) if e.is_transaction_aborted() => {
                warn!("{} transaction aborted, rolling back and retrying read", role);
                store.rollback().await?;
                read(store).await
            }
            other => other,
        }
    }

    /// Put an already open store into a role's slot.
    #[cfg(test)]
    pub(crate) async fn install(&self, role: Role, store: Arc<dyn SyncStore>) {
        *self.slots[role.slot()].lock().await = Some(store);
    }

    /// Row count for a table, with the read retry rule.
    pub async fn row_count(&self, role: Role, table: &str) -> Result<i64> {
        self.read_with_retry(role, |store| async move { store.row_count(table).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, SqliteConfig, SyncSettings};
    use crate::core::schema::Column;
    use crate::core::traits::RowPage;
    use crate::core::value::Row;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store whose session stays aborted for the first `aborted_reads`
    /// counts, clearing only through `rollback`.
    #[derive(Default)]
    struct AbortedSession {
        aborted_reads: usize,
        reads: AtomicUsize,
        rollbacks: AtomicUsize,
    }

    impl AbortedSession {
        fn failing(aborted_reads: usize) -> Arc<Self> {
            Arc::new(Self {
                aborted_reads,
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl SyncStore for AbortedSession {
        fn kind(&self) -> &'static str {
            "postgres"
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn list_tables(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn list_columns(&self, _table: &str) -> Result<Vec<Column>> {
            Ok(Vec::new())
        }

        async fn row_count(&self, _table: &str) -> Result<i64> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            if n < self.aborted_reads {
                return Err(SyncError::TransactionAborted(
                    "current transaction is aborted, commands ignored until end of transaction block"
                        .into(),
                ));
            }
            Ok(42)
        }

        async fn fetch_page(
            &self,
            _table: &str,
            _columns: &[Column],
            _after: Option<&str>,
            _limit: usize,
        ) -> Result<RowPage> {
            Ok(RowPage::default())
        }

        async fn clear_table(&self, _table: &str) -> Result<u64> {
            Ok(0)
        }

        async fn insert_rows(&self, _table: &str, _columns: &[Column], rows: &[Row]) -> Result<u64> {
            Ok(rows.len() as u64)
        }

        async fn rollback(&self) -> Result<()> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) {}
    }

    fn sqlite(path: PathBuf) -> BackendConfig {
        BackendConfig::Sqlite(SqliteConfig { path })
    }

    fn manager(dir: &tempfile::TempDir, secondary: bool) -> ConnectionManager {
        let primary = dir.path().join("primary.sqlite3");
        let local = dir.path().join("local.sqlite3");
        std::fs::File::create(&primary).unwrap();
        std::fs::File::create(&local).unwrap();
        ConnectionManager::new(SyncConfig {
            primary: sqlite(primary),
            local: sqlite(local),
            secondary: secondary.then(|| sqlite(dir.path().join("missing.sqlite3"))),
            sync: SyncSettings::default(),
        })
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Primary.to_string(), "primary");
        assert_eq!(Role::Secondary.to_string(), "secondary");
    }

    #[tokio::test]
    async fn test_connect_reuses_one_store_per_role() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir, false);

        assert!(mgr.connect(Role::Local).await);
        let a = mgr.store(Role::Local).await.unwrap();
        let b = mgr.store(Role::Local).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_slot_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir, true);

        assert!(!mgr.connect(Role::Secondary).await);
        assert!(mgr.slots[Role::Secondary.slot()].lock().await.is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_role() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir, false);

        let err = mgr.store(Role::Secondary).await.err().unwrap();
        assert!(matches!(err, SyncError::NotConfigured(Role::Secondary)));
        assert!(!mgr.connect(Role::Secondary).await);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir, false);

        mgr.close(Role::Primary).await;
        assert!(mgr.connect(Role::Primary).await);
        mgr.close(Role::Primary).await;
        mgr.close(Role::Primary).await;
        assert!(mgr.slots[Role::Primary.slot()].lock().await.is_none());

        // reopens on demand after a close
        assert!(mgr.connect(Role::Primary).await);
        mgr.close_all().await;
    }

    #[tokio::test]
    async fn test_test_all_reports_configured_roles() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir, true);

        let results = mgr.test_all().await;
        assert_eq!(results.get(&Role::Primary), Some(&true));
        assert_eq!(results.get(&Role::Local), Some(&true));
        assert_eq!(results.get(&Role::Secondary), Some(&false));
    }

    #[tokio::test]
    async fn test_ordinary_read_errors_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir, false);
        let calls = AtomicUsize::new(0);

        let result = mgr
            .read_with_retry(Role::Local, |store| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { store.row_count("no_such_table").await }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_aborted_read_rolls_back_and_retries_once() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir, false);
        let store = AbortedSession::failing(1);
        mgr.install(Role::Primary, store.clone()).await;

        assert_eq!(mgr.row_count(Role::Primary, "words").await.unwrap(), 42);
        assert_eq!(store.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_aborted_read_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir, false);
        let store = AbortedSession::failing(5);
        mgr.install(Role::Primary, store.clone()).await;

        let err = mgr.row_count(Role::Primary, "words").await.unwrap_err();
        assert!(err.is_transaction_aborted());
        assert_eq!(store.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
    }
}
