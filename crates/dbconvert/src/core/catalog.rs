//! Driver catalog for explicit dependency injection.
//!
//! The [`DriverCatalog`] is a registry of [`EngineDriver`]s keyed by engine
//! identifier. It is explicitly constructed and handed to the orchestrator
//! rather than living in a global, so tests can register in-memory drivers
//! and production code registers the built-in engines.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ConnectionConfig;
use crate::error::{ConvertError, Result};

use super::traits::{DatabaseInterpreter, Dialect, EngineDriver};

/// Registry of engine drivers.
///
/// # Example
///
/// ```rust,ignore
/// let catalog = DriverCatalog::with_builtins();
/// let driver = catalog.require("sqlserver")?; // alias of "mssql"
/// let interpreter = driver.connect(&config.source, 4).await?;
/// ```
#[derive(Default)]
pub struct DriverCatalog {
    /// Registered drivers by engine id.
    drivers: HashMap<String, Arc<dyn EngineDriver>>,

    /// Alias (lowercase) to engine id.
    aliases: HashMap<String, String>,
}

impl DriverCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog with the built-in engines registered:
    /// SQL Server, PostgreSQL, MySQL/MariaDB and SQLite.
    pub fn with_builtins() -> Self {
        use crate::drivers::{MssqlDriver, MysqlDriver, PostgresDriver, SqliteDriver};

        let mut catalog = Self::new();
        catalog.register(Arc::new(MssqlDriver));
        catalog.register(Arc::new(PostgresDriver));
        catalog.register(Arc::new(MysqlDriver));
        catalog.register(Arc::new(SqliteDriver));
        catalog
    }

    /// Register a driver under its engine id and aliases.
    ///
    /// Registering the same engine twice replaces the earlier driver.
    pub fn register(&mut self, driver: Arc<dyn EngineDriver>) {
        let engine = driver.engine().to_lowercase();
        self.aliases.insert(engine.clone(), engine.clone());
        for alias in driver.aliases() {
            self.aliases.insert(alias.to_lowercase(), engine.clone());
        }
        self.drivers.insert(engine, driver);
    }

    /// Resolve an engine name or alias to its engine id.
    pub fn normalize(&self, engine: &str) -> Option<&str> {
        self.aliases
            .get(&engine.trim().to_lowercase())
            .map(String::as_str)
    }

    /// Get a driver by engine name or alias.
    pub fn get(&self, engine: &str) -> Option<Arc<dyn EngineDriver>> {
        self.normalize(engine)
            .and_then(|id| self.drivers.get(id))
            .cloned()
    }

    /// Get a driver, returning an error naming the supported engines.
    pub fn require(&self, engine: &str) -> Result<Arc<dyn EngineDriver>> {
        self.get(engine).ok_or_else(|| {
            ConvertError::Config(format!(
                "Unknown database engine: '{}'. Supported engines: {}",
                engine,
                self.engines().join(", ")
            ))
        })
    }

    /// Check if an engine (or alias) is registered.
    pub fn has_engine(&self, engine: &str) -> bool {
        self.get(engine).is_some()
    }

    /// Registered engine ids, sorted.
    pub fn engines(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Aliases registered for an engine id, sorted, excluding the id itself.
    pub fn aliases_of(&self, engine: &str) -> Vec<&str> {
        let mut aliases: Vec<&str> = self
            .aliases
            .iter()
            .filter(|(alias, id)| id.as_str() == engine && alias.as_str() != engine)
            .map(|(alias, _)| alias.as_str())
            .collect();
        aliases.sort_unstable();
        aliases
    }

    /// Dialect for a connection without connecting.
    pub fn dialect_for(&self, config: &ConnectionConfig) -> Result<Arc<dyn Dialect>> {
        Ok(self.require(&config.engine)?.dialect(config))
    }

    /// Open an interpreter for a connection.
    pub async fn connect(
        &self,
        config: &ConnectionConfig,
        max_connections: usize,
    ) -> Result<Arc<dyn DatabaseInterpreter>> {
        self.require(&config.engine)?
            .connect(config, max_connections)
            .await
    }
}

impl std::fmt::Debug for DriverCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverCatalog")
            .field("engines", &self.engines())
            .field("aliases", &self.aliases.keys().collect::<Vec<_>>())
            .finish()
    }
}
