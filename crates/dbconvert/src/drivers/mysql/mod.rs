//! MySQL/MariaDB database driver.
//!
//! - [`MysqlDialect`]: SQL syntax strategy
//! - [`MysqlInterpreter`]: catalog introspection and sessions over SQLx
//!
//! # Supported Versions
//!
//! - MySQL 5.7+, 8.0+
//! - MariaDB 10.2+

mod dialect;
mod interpreter;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::core::traits::{DatabaseInterpreter, Dialect, EngineDriver};
use crate::error::Result;

pub use dialect::MysqlDialect;
pub use interpreter::MysqlInterpreter;

/// Registers MySQL and MariaDB in the driver catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDriver;

#[async_trait]
impl EngineDriver for MysqlDriver {
    fn engine(&self) -> &str {
        interpreter::ENGINE
    }

    fn aliases(&self) -> &[&str] {
        &["mariadb"]
    }

    fn default_port(&self) -> Option<u16> {
        Some(interpreter::DEFAULT_PORT)
    }

    fn dialect(&self, config: &ConnectionConfig) -> Arc<dyn Dialect> {
        Arc::new(MysqlDialect::with_charset(&config.charset))
    }

    async fn connect(&self, config: &ConnectionConfig, max_connections: usize) -> Result<Arc<dyn DatabaseInterpreter>> {
        Ok(Arc::new(MysqlInterpreter::connect(config, max_connections).await?))
    }
}
