//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::drivers::SslMode;
use crate::orchestrator::Role;
use crate::transfer::OverridePolicy;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Primary server store.
    pub primary: BackendConfig,

    /// Local embedded store.
    pub local: BackendConfig,

    /// Optional second server store used by dual-server jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<BackendConfig>,

    /// Sync behavior.
    #[serde(default)]
    pub sync: SyncSettings,
}

impl SyncConfig {
    /// Connection settings for a role, if that role is configured.
    pub fn backend(&self, role: Role) -> Option<&BackendConfig> {
        match role {
            Role::Primary => Some(&self.primary),
            Role::Local => Some(&self.local),
            Role::Secondary => self.secondary.as_ref(),
        }
    }
}

/// Connection settings for one backend role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Postgres(PostgresConfig),
    Sqlite(SqliteConfig),
}

impl BackendConfig {
    /// Engine name (`postgres`, `sqlite`).
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Postgres(_) => "postgres",
            BackendConfig::Sqlite(_) => "sqlite",
        }
    }

    /// Human-readable location for logs. Never includes credentials.
    pub fn endpoint(&self) -> String {
        match self {
            BackendConfig::Postgres(pg) => format!("{}:{}/{}", pg.host, pg.port, pg.database),
            BackendConfig::Sqlite(sqlite) => sqlite.path.display().to_string(),
        }
    }
}

/// PostgreSQL server configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema holding the synced tables (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// TLS mode. Unset means `require` for managed hosts, else `disable`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_mode: Option<SslMode>,
}

impl PostgresConfig {
    /// The TLS mode actually used when connecting.
    pub fn effective_ssl_mode(&self) -> SslMode {
        SslMode::resolve(self.ssl_mode, &self.host)
    }
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// SQLite file configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Path to the database file.
    pub path: PathBuf,
}

/// Sync behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Rows per committed insert batch (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Rows per outer chunk before pausing (default: 100).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Pause between outer chunks in milliseconds (default: 100).
    #[serde(default = "default_chunk_pause_ms")]
    pub chunk_pause_ms: u64,

    /// Server-side bookkeeping tables never listed for sync.
    #[serde(default = "default_excluded_tables")]
    pub excluded_tables: Vec<String>,

    /// Replacement for the built-in dependency precedence list (leaf first).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precedence: Option<Vec<String>>,

    /// Per-table fallback behavior for rows that fail to insert.
    #[serde(default)]
    pub overrides: Vec<OverridePolicy>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            chunk_size: default_chunk_size(),
            chunk_pause_ms: default_chunk_pause_ms(),
            excluded_tables: default_excluded_tables(),
            precedence: None,
            overrides: Vec::new(),
        }
    }
}

fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_chunk_size() -> usize {
    100
}

fn default_chunk_pause_ms() -> u64 {
    100
}

fn default_excluded_tables() -> Vec<String> {
    vec!["django_migrations".to_string()]
}
