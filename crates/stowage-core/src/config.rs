//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::error::{OrmError, OrmResult};

/// Database name used when none is configured.
pub const DEFAULT_DATABASE_NAME: &str = "stowage";

/// Configuration for an [`Engine`](crate::Engine).
///
/// ```rust
/// use stowage_core::EngineConfig;
///
/// let config = EngineConfig::from_json(r#"{"database_name": "todo", "version": 3}"#).unwrap();
/// assert_eq!(config.database_name, "todo");
/// assert_eq!(config.version, Some(3));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Name of the underlying database
    #[serde(default = "default_database_name")]
    pub database_name: String,
    /// Schema version to open. `None` lets the engine bump the stored version
    /// whenever the registered schema needs a migration.
    #[serde(default)]
    pub version: Option<u32>,
}

fn default_database_name() -> String {
    DEFAULT_DATABASE_NAME.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_name: default_database_name(),
            version: None,
        }
    }
}

impl EngineConfig {
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Parse a JSON document, filling absent fields with defaults.
    pub fn from_json(json: &str) -> OrmResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| OrmError::Schema(format!("invalid engine config: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> OrmResult<()> {
        if self.database_name.is_empty() {
            return Err(OrmError::Schema("database name cannot be empty".to_string()));
        }
        if self.version == Some(0) {
            return Err(OrmError::Schema("version must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.database_name, "stowage");
    }

    #[test]
    fn test_rejects_version_zero() {
        assert!(EngineConfig::from_json(r#"{"version": 0}"#).is_err());
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = EngineConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, OrmError::Schema(_)));
    }
}
