//! Core abstractions for engine-agnostic conversion.
//!
//! - [`schema`]: the schema model (tables, columns, keys, views, routines, ...)
//! - [`value`]: SQL value representation for row transfer
//! - [`traits`]: dialect, interpreter, session and driver traits
//! - [`catalog`]: driver registry for dependency injection
//! - [`identifier`]: identifier and expression screening
//!
//! # Architecture
//!
//! The core defines engine-agnostic abstractions that are implemented by the
//! driver modules (`drivers/mssql`, `drivers/postgres`, ...). Nothing in the
//! core knows about a specific engine.

pub mod catalog;
pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use catalog::DriverCatalog;
pub use schema::{
    CheckConstraint, Column, DatabaseSchema, ForeignKey, Index, ObjectKind, ObjectName, ObjectRef,
    PrimaryKey, Routine, Sequence, Table, Trigger, UserDefinedType, View,
};
pub use traits::{
    DatabaseInterpreter, Dialect, EngineDriver, IdentifierCase, Introspection, ReadOptions,
    Session,
};
pub use value::{Batch, Row, SqlValue};
