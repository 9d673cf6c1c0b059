//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::core::catalog::DriverCatalog;
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string, validated against the
    /// built-in engines.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration against the built-in engines.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self, &DriverCatalog::with_builtins())
    }

    /// Validate the configuration against a given catalog.
    pub fn validate_with(&self, catalog: &DriverCatalog) -> Result<()> {
        validation::validate(self, catalog)
    }

    /// SHA-256 fingerprint of the effective configuration.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
source:
  engine: sqlserver
  host: db1
  database: shop
  user: sa
  password: secret
target:
  engine: pg
  host: db2
  database: shop
conversion:
  batch_size: 250
  use_transaction: true
  schema_mapping:
    - source: dbo
      target: public
"#;

    #[test]
    fn test_from_yaml_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.conversion.batch_size, 250);
        assert!(config.conversion.use_transaction);
        assert!(config.conversion.execute_on_target);
        assert_eq!(config.conversion.scope, Scope::Both);
        assert_eq!(config.source.charset, "utf8mb4");
        assert_eq!(config.source.timeout_secs, 600);
        assert!(config.logging.enabled);
        assert_eq!(
            config.conversion.owner_mapping(),
            vec![("dbo".to_string(), "public".to_string())]
        );
    }

    #[test]
    fn test_invalid_yaml() {
        let err = Config::from_yaml("source: [").unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, YAML).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.target.engine, "pg");
    }

    #[test]
    fn test_hash_is_stable() {
        let a = Config::from_yaml(YAML).unwrap();
        let b = Config::from_yaml(YAML).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);

        let mut c = a.clone();
        c.conversion.batch_size = 1;
        assert_ne!(a.hash(), c.hash());
    }
}
