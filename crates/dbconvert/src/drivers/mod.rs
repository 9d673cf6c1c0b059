//! Database driver implementations.
//!
//! - [`mssql`]: Microsoft SQL Server (Tiberius + bb8)
//! - [`postgres`]: PostgreSQL (tokio-postgres + deadpool)
//! - [`mysql`]: MySQL and MariaDB (SQLx)
//! - [`sqlite`]: SQLite files (SQLx)
//! - [`common`]: literal rendering, paging and TLS shared by the drivers
//!
//! # Architecture
//!
//! Each driver module provides:
//! - a `Dialect`: SQL syntax strategy for the engine
//! - an interpreter: catalog introspection and pooled sessions
//! - an `EngineDriver` that the [`DriverCatalog`](crate::core::DriverCatalog)
//!   registers under the engine id and its aliases
//!
//! # Adding New Databases
//!
//! 1. Create a module under `drivers/` with a dialect and an interpreter
//! 2. Add the engine's type vocabulary to `dialect::typemap`
//! 3. Register the driver in `DriverCatalog::with_builtins()`

pub mod common;
pub mod mssql;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use common::{SslMode, TlsBuilder};

pub use mssql::{MssqlDialect, MssqlDriver, MssqlInterpreter};
pub use mysql::{MysqlDialect, MysqlDriver, MysqlInterpreter};
pub use postgres::{PostgresDialect, PostgresDriver, PostgresInterpreter};
pub use sqlite::{SqliteDialect, SqliteDriver, SqliteInterpreter};
