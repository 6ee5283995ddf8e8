//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl SyncConfig {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SyncConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::SslMode;
    use crate::transfer::OverrideAction;

    const YAML: &str = r#"
primary:
  type: postgres
  host: db.abcd.supabase.co
  database: postgres
  user: postgres
  password: secret
local:
  type: sqlite
  path: ./db.sqlite3
sync:
  batch_size: 50
  overrides:
    - table: flashcards_flashcard
      action: minimize
    - table: flashcards_userprofile
      column: settings
      action: force_null
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = SyncConfig::from_yaml(YAML).unwrap();

        let BackendConfig::Postgres(pg) = &config.primary else {
            panic!("primary should be postgres");
        };
        assert_eq!(pg.port, 5432);
        assert_eq!(pg.schema, "public");
        assert_eq!(pg.ssl_mode, None);
        assert_eq!(pg.effective_ssl_mode(), SslMode::Require);

        assert!(matches!(config.local, BackendConfig::Sqlite(_)));
        assert!(config.secondary.is_none());
        assert_eq!(config.sync.batch_size, 50);
        assert_eq!(config.sync.chunk_size, 100);
        assert_eq!(config.sync.overrides.len(), 2);
        assert_eq!(config.sync.overrides[1].action, OverrideAction::ForceNull);
        assert_eq!(config.sync.overrides[1].column.as_deref(), Some("settings"));
    }

    #[test]
    fn test_explicit_ssl_mode() {
        let yaml = YAML.replace("password: secret", "password: secret\n  ssl_mode: disable");
        let config = SyncConfig::from_yaml(&yaml).unwrap();
        let BackendConfig::Postgres(pg) = &config.primary else {
            panic!("primary should be postgres");
        };
        assert_eq!(pg.effective_ssl_mode(), SslMode::Disable);
    }

    #[test]
    fn test_unknown_backend_type_rejected() {
        let yaml = YAML.replace("type: sqlite", "type: oracle");
        assert!(SyncConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = SyncConfig::load("/nonexistent/vocab-sync.yaml").unwrap_err();
        assert!(matches!(err, crate::error::SyncError::Io(_)));
    }

    #[test]
    fn test_config_survives_json_round_trip() {
        let config = SyncConfig::from_yaml(YAML).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: SyncConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.primary, config.primary);
        assert_eq!(back.sync.batch_size, 50);
    }
}
