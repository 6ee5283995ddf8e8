//! Configuration validation.

use std::collections::HashSet;

use tracing::warn;

use super::{BackendConfig, SyncConfig};
use crate::error::{Result, SyncError};
use crate::transfer::OverrideAction;

/// Validate the configuration.
pub fn validate(config: &SyncConfig) -> Result<()> {
    validate_backend("primary", &config.primary)?;
    validate_backend("local", &config.local)?;
    if let Some(secondary) = &config.secondary {
        validate_backend("secondary", secondary)?;

        if same_endpoint(&config.primary, secondary) {
            return Err(SyncError::Config(
                "primary and secondary cannot be the same database".into(),
            ));
        }
    }

    if !matches!(config.local, BackendConfig::Sqlite(_)) {
        warn!("local is configured as {}, expected sqlite", config.local.kind());
    }
    if !matches!(config.primary, BackendConfig::Postgres(_)) {
        warn!(
            "primary is configured as {}, expected postgres",
            config.primary.kind()
        );
    }

    let sync = &config.sync;
    if sync.batch_size == 0 {
        return Err(SyncError::Config("sync.batch_size must be at least 1".into()));
    }
    if sync.chunk_size == 0 {
        return Err(SyncError::Config("sync.chunk_size must be at least 1".into()));
    }

    if let Some(precedence) = &sync.precedence {
        let mut seen = HashSet::new();
        for table in precedence {
            if !seen.insert(table.as_str()) {
                return Err(SyncError::Config(format!(
                    "sync.precedence lists '{}' more than once",
                    table
                )));
            }
        }
    }

    for policy in &sync.overrides {
        if policy.table.is_empty() {
            return Err(SyncError::Config("sync.overrides[].table is required".into()));
        }
        if policy.action == OverrideAction::ForceNull && policy.column.is_none() {
            return Err(SyncError::Config(format!(
                "sync.overrides: force_null on '{}' needs a column",
                policy.table
            )));
        }
    }

    Ok(())
}

fn validate_backend(role: &str, backend: &BackendConfig) -> Result<()> {
    match backend {
        BackendConfig::Postgres(pg) => {
            if pg.host.is_empty() {
                return Err(SyncError::Config(format!("{}.host is required", role)));
            }
            if pg.database.is_empty() {
                return Err(SyncError::Config(format!("{}.database is required", role)));
            }
            if pg.user.is_empty() {
                return Err(SyncError::Config(format!("{}.user is required", role)));
            }
        }
        BackendConfig::Sqlite(sqlite) => {
            if sqlite.path.as_os_str().is_empty() {
                return Err(SyncError::Config(format!("{}.path is required", role)));
            }
        }
    }
    Ok(())
}

fn same_endpoint(a: &BackendConfig, b: &BackendConfig) -> bool {
    match (a, b) {
        (BackendConfig::Postgres(a), BackendConfig::Postgres(b)) => {
            a.host == b.host && a.port == b.port && a.database == b.database
        }
        (BackendConfig::Sqlite(a), BackendConfig::Sqlite(b)) => a.path == b.path,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PostgresConfig, SqliteConfig, SyncSettings};

    fn pg(host: &str, database: &str) -> BackendConfig {
        BackendConfig::Postgres(PostgresConfig {
            host: host.to_string(),
            port: 5432,
            database: database.to_string(),
            user: "postgres".to_string(),
            password: "password".to_string(),
            schema: "public".to_string(),
            ssl_mode: None,
        })
    }

    fn valid_config() -> SyncConfig {
        SyncConfig {
            primary: pg("localhost", "vocab"),
            local: BackendConfig::Sqlite(SqliteConfig {
                path: "db.sqlite3".into(),
            }),
            secondary: None,
            sync: SyncSettings::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_host() {
        let mut config = valid_config();
        config.primary = pg("", "vocab");
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("primary.host"));
    }

    #[test]
    fn test_empty_sqlite_path() {
        let mut config = valid_config();
        config.local = BackendConfig::Sqlite(SqliteConfig { path: "".into() });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_same_primary_and_secondary() {
        let mut config = valid_config();
        config.secondary = Some(pg("localhost", "vocab"));
        assert!(validate(&config).is_err());

        config.secondary = Some(pg("localhost", "vocab_replica"));
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.sync.batch_size = 0;
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.sync.chunk_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_duplicate_precedence_entry() {
        let mut config = valid_config();
        config.sync.precedence = Some(vec!["a".into(), "b".into(), "a".into()]);
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("'a'"));
    }

    #[test]
    fn test_force_null_requires_column() {
        use crate::transfer::OverridePolicy;

        let mut config = valid_config();
        config.sync.overrides = vec![OverridePolicy {
            table: "flashcards_deck".into(),
            column: None,
            action: OverrideAction::ForceNull,
        }];
        assert!(validate(&config).is_err());

        config.sync.overrides[0].column = Some("color".into());
        assert!(validate(&config).is_ok());
    }
}
