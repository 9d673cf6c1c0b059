//! # dbconvert
//!
//! Cross-dialect relational database conversion library.
//!
//! Reads the schema (and optionally the data) of one database and recreates
//! it in another engine:
//!
//! - **Introspection** of tables, keys, indexes, views, routines, triggers,
//!   sequences and user-defined types through per-engine interpreters
//! - **Type mapping** hub-and-spoke through canonical types
//! - **Dependency-ordered scripts** with foreign-key cycles broken by
//!   deferred constraints
//! - **Batched data transfer** with value translation, optional
//!   per-table transactions and parallel workers
//! - **Progress feedback** to any number of subscribers, with cancellation
//!
//! SQL Server, PostgreSQL, MySQL/MariaDB and SQLite are built in.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dbconvert::{Config, ConversionSession, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), dbconvert::ConvertError> {
//!     let config = Config::load("config.yaml")?;
//!     let handle = Orchestrator::start(ConversionSession::from_config(&config));
//!     handle.subscribe_fn(|event| println!("{}", event.message));
//!     let result = handle.await_result().await?;
//!     println!("Transferred {} rows", result.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod dialect;
pub mod drivers;
pub mod error;
pub mod feedback;
pub mod mapping;
pub mod orchestrator;
pub mod script;
pub mod transfer;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use config::{Config, ConnectionConfig, ConversionOption, SchemaSelection, Scope};
pub use core::{DatabaseInterpreter, Dialect, DriverCatalog, EngineDriver, SqlValue};
pub use error::{ConvertError, Result};
pub use feedback::{FeedbackEvent, Severity};
pub use orchestrator::{
    ConversionHandle, ConversionResult, ConversionSession, ConversionState, HealthCheckResult,
    Orchestrator, OutcomeKind,
};
