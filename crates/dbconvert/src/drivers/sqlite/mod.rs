//! SQLite driver.
//!
//! - [`SqliteDialect`]: SQL syntax strategy for SQLite
//! - [`SqliteInterpreter`]: pragma-based introspection and sessions over SQLx
//!
//! The connection descriptor names a database file with `path`; the file is
//! created when missing.

mod dialect;
mod interpreter;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::core::traits::{DatabaseInterpreter, Dialect, EngineDriver};
use crate::error::Result;

pub use dialect::SqliteDialect;
pub use interpreter::SqliteInterpreter;

/// Registers SQLite in the driver catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

#[async_trait]
impl EngineDriver for SqliteDriver {
    fn engine(&self) -> &str {
        interpreter::ENGINE
    }

    fn aliases(&self) -> &[&str] {
        &["sqlite3"]
    }

    fn dialect(&self, _config: &ConnectionConfig) -> Arc<dyn Dialect> {
        Arc::new(SqliteDialect)
    }

    async fn connect(&self, config: &ConnectionConfig, max_connections: usize) -> Result<Arc<dyn DatabaseInterpreter>> {
        Ok(Arc::new(SqliteInterpreter::connect(config, max_connections).await?))
    }
}
