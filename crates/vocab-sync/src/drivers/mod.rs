//! Database driver implementations.
//!
//! - [`postgres`]: server stores (primary and secondary roles)
//! - [`sqlite`]: the local embedded store
//! - [`common`]: shared TLS setup
//!
//! Both drivers implement [`SyncStore`]; [`open_store`] picks one from a
//! role's [`BackendConfig`].

pub mod common;
pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

pub use common::{is_managed_host, SslMode, TlsBuilder};
pub use postgres::PgStore;
pub use sqlite::SqliteStore;

use crate::config::BackendConfig;
use crate::core::traits::SyncStore;
use crate::error::Result;

/// Open a live store for a backend configuration.
pub async fn open_store(config: &BackendConfig) -> Result<Arc<dyn SyncStore>> {
    let store: Arc<dyn SyncStore> = match config {
        BackendConfig::Postgres(pg) => Arc::new(PgStore::connect(pg).await?),
        BackendConfig::Sqlite(sqlite) => Arc::new(SqliteStore::connect(sqlite).await?),
    };
    Ok(store)
}
