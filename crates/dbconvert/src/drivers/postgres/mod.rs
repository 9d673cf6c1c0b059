//! PostgreSQL driver.
//!
//! - [`PostgresDialect`]: SQL syntax strategy for PostgreSQL
//! - [`PostgresInterpreter`]: catalog introspection and sessions over deadpool-postgres

mod dialect;
mod interpreter;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::core::traits::{DatabaseInterpreter, Dialect, EngineDriver};
use crate::error::Result;

pub use dialect::PostgresDialect;
pub use interpreter::PostgresInterpreter;

/// Registers PostgreSQL in the driver catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver;

#[async_trait]
impl EngineDriver for PostgresDriver {
    fn engine(&self) -> &str {
        interpreter::ENGINE
    }

    fn aliases(&self) -> &[&str] {
        &["pg", "postgresql"]
    }

    fn default_port(&self) -> Option<u16> {
        Some(interpreter::DEFAULT_PORT)
    }

    fn dialect(&self, _config: &ConnectionConfig) -> Arc<dyn Dialect> {
        Arc::new(PostgresDialect)
    }

    async fn connect(&self, config: &ConnectionConfig, max_connections: usize) -> Result<Arc<dyn DatabaseInterpreter>> {
        Ok(Arc::new(PostgresInterpreter::connect(config, max_connections).await?))
    }
}
