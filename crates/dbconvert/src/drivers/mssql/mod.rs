//! Microsoft SQL Server driver.
//!
//! - [`MssqlDialect`]: SQL syntax strategy for SQL Server
//! - [`MssqlInterpreter`]: catalog introspection and sessions over Tiberius

mod bulk;
mod dialect;
mod interpreter;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::core::traits::{DatabaseInterpreter, Dialect, EngineDriver};
use crate::error::Result;

pub use dialect::MssqlDialect;
pub use interpreter::MssqlInterpreter;

/// Registers SQL Server in the driver catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDriver;

#[async_trait]
impl EngineDriver for MssqlDriver {
    fn engine(&self) -> &str {
        interpreter::ENGINE
    }

    fn aliases(&self) -> &[&str] {
        &["sqlserver", "sql_server"]
    }

    fn default_port(&self) -> Option<u16> {
        Some(interpreter::DEFAULT_PORT)
    }

    fn dialect(&self, _config: &ConnectionConfig) -> Arc<dyn Dialect> {
        Arc::new(MssqlDialect)
    }

    async fn connect(&self, config: &ConnectionConfig, max_connections: usize) -> Result<Arc<dyn DatabaseInterpreter>> {
        Ok(Arc::new(MssqlInterpreter::connect(config, max_connections).await?))
    }
}
