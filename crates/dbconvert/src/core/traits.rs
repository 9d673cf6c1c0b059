//! Core traits for engine-agnostic conversion.
//!
//! This module defines the primary abstractions used by the conversion engine:
//!
//! - [`Dialect`]: syntax and type-system rules of one engine (pure, no I/O)
//! - [`DatabaseInterpreter`]: a connected engine that can introspect its
//!   schema and hand out [`Session`]s
//! - [`Session`]: one connection, used to execute scripts and read or write
//!   row batches, optionally inside a transaction
//! - [`EngineDriver`]: factory that opens interpreters, registered in the
//!   [`DriverCatalog`](super::catalog::DriverCatalog) by engine id
//!
//! # Design Patterns
//!
//! - **Abstract Factory**: drivers create families of related objects (dialect, interpreter)
//! - **Strategy**: dialects provide interchangeable syntax rules
//! - **Template Method**: default trait methods define algorithm skeletons
//!   (`write_rows`, `quote_ident`, `render_object_script`)

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ConnectionConfig, SchemaSelection};
use crate::dialect::canonical::{CanonicalTypeInfo, NativeTypes};
use crate::error::{ConvertError, Result};
use crate::script::render::{self, ScriptOptions, SchemaObject};

use super::schema::{Column, DatabaseSchema, Table, UserDefinedType};
use super::value::{Row, SqlValue};

/// How an engine folds unquoted identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierCase {
    Preserve,
    Lower,
    Upper,
}

/// SQL syntax strategy for one database engine.
///
/// Implementations are stateless apart from engine settings (such as a
/// MySQL character set) and can be shared freely.
pub trait Dialect: Send + Sync {
    /// Get the dialect identifier (e.g., "mssql", "postgres").
    fn name(&self) -> &str;

    /// The engine's type vocabulary.
    fn types(&self) -> &dyn NativeTypes;

    /// Opening and closing identifier quote characters.
    fn quote_chars(&self) -> (char, char) {
        ('"', '"')
    }

    /// Quote an identifier. Already-quoted input is returned unchanged.
    fn quote_ident(&self, name: &str) -> String {
        let (open, close) = self.quote_chars();
        if is_quoted(name, open, close) {
            return name.to_string();
        }
        let doubled: String = close.to_string().repeat(2);
        format!("{}{}{}", open, name.replace(close, &doubled), close)
    }

    /// Remove identifier quotes. Unquoted input is returned unchanged.
    fn unquote_ident(&self, name: &str) -> String {
        let (open, close) = self.quote_chars();
        if !is_quoted(name, open, close) {
            return name.to_string();
        }
        let doubled: String = close.to_string().repeat(2);
        name[open.len_utf8()..name.len() - close.len_utf8()].replace(&doubled, &close.to_string())
    }

    /// Escape the body of a string literal (without the surrounding quotes).
    fn escape_literal_body(&self, value: &str) -> String {
        value.replace('\'', "''")
    }

    /// Inverse of [`escape_literal_body`](Self::escape_literal_body).
    fn unescape_literal_body(&self, body: &str) -> String {
        body.replace("''", "'")
    }

    /// Render a string as a literal, always escaping. Used for row values,
    /// where text that looks quoted is still data.
    fn string_literal(&self, value: &str) -> String {
        format!("{}'{}'", self.literal_prefix(), self.escape_literal_body(value))
    }

    /// Prefix placed before a string literal (`N` for SQL Server).
    fn literal_prefix(&self) -> &str {
        ""
    }

    /// Render a string as a quoted literal. Input that is already a
    /// correctly escaped literal is returned unchanged.
    fn escape_literal(&self, value: &str) -> String {
        let prefix = self.literal_prefix();
        let body = value.strip_prefix(prefix).unwrap_or(value);
        if body.len() >= 2 && body.starts_with('\'') && body.ends_with('\'') {
            let inner = &body[1..body.len() - 1];
            if !has_unescaped_quote(inner)
                && self.escape_literal_body(&self.unescape_literal_body(inner)) == inner
            {
                return format!("{}{}", prefix, body);
            }
        }
        self.string_literal(value)
    }

    /// Maximum identifier length in characters.
    fn max_identifier_length(&self) -> usize;

    /// How the engine folds identifiers that are not quoted.
    fn unquoted_case(&self) -> IdentifierCase {
        IdentifierCase::Preserve
    }

    /// Default owner (schema) name; empty for engines without owner namespaces.
    fn default_owner(&self) -> &str {
        ""
    }

    fn supports_owners(&self) -> bool {
        !self.default_owner().is_empty()
    }

    fn supports_sequences(&self) -> bool {
        false
    }

    fn supports_user_types(&self) -> bool {
        false
    }

    /// Whether foreign keys can be added after table creation.
    fn supports_add_foreign_key(&self) -> bool {
        true
    }

    /// Separator emitted between statements in script text.
    fn batch_separator(&self) -> &str {
        ";"
    }

    /// Map a column's native type to its canonical token.
    fn map_native_type(&self, col: &Column) -> CanonicalTypeInfo {
        self.types()
            .to_canonical(&col.data_type, col.max_length, col.precision, col.scale)
    }

    /// Render a value as a literal of this dialect.
    fn render_literal(&self, value: &SqlValue) -> String;

    /// Whether the target encoding can store this character.
    fn is_supported_char(&self, _c: char) -> bool {
        true
    }

    /// Query reading `limit` rows of `table` starting at `offset`, in a
    /// stable order.
    fn select_page(&self, table: &Table, offset: u64, limit: usize) -> String;

    fn begin_transaction_sql(&self) -> &str {
        "BEGIN"
    }

    fn commit_sql(&self) -> &str {
        "COMMIT"
    }

    fn rollback_sql(&self) -> &str {
        "ROLLBACK"
    }

    /// Maximum rows in a single multi-row INSERT.
    fn max_rows_per_insert(&self) -> usize {
        500
    }

    /// Column clause for an identity column (after the type).
    fn identity_clause(&self, _col: &Column) -> String;

    /// Column definition for a computed column.
    fn computed_column(&self, col: &Column, expression: &str, quote: bool) -> String {
        format!(
            "{} {} GENERATED ALWAYS AS ({}) STORED",
            render::ident(self, &col.name, quote),
            col.data_type,
            expression
        )
    }

    /// Full column definition when an identity column must also carry the
    /// primary key inline (SQLite's `INTEGER PRIMARY KEY AUTOINCREMENT`).
    fn identity_primary_key_column(&self, _col: &Column, _quote: bool) -> Option<String> {
        None
    }

    /// Clause appended to a column definition to document it inline.
    fn inline_column_comment(&self, _comment: &str) -> Option<String> {
        None
    }

    /// Whether indexes accept `INCLUDE (...)` columns.
    fn supports_include_columns(&self) -> bool {
        false
    }

    /// Statement creating an alias/domain type over `base_type`.
    fn create_user_type_sql(
        &self,
        _udt: &UserDefinedType,
        _base_type: &str,
        _quote: bool,
    ) -> Option<String> {
        None
    }

    /// Statement creating an owner namespace if it does not exist.
    fn create_owner_sql(&self, _owner: &str, _quote: bool) -> Option<String> {
        None
    }

    /// Statements documenting a table and its columns.
    fn comment_statements(&self, _table: &Table, _quote: bool) -> Vec<String> {
        Vec::new()
    }

    /// Statements run on the loading session before a table's first batch.
    fn pre_load_statements(&self, _table: &Table, _quote: bool) -> Vec<String> {
        Vec::new()
    }

    /// Statements run on the loading session after a table's last batch.
    fn post_load_statements(&self, _table: &Table, _quote: bool) -> Vec<String> {
        Vec::new()
    }
}

fn is_quoted(name: &str, open: char, close: char) -> bool {
    if name.chars().count() < 2 || !name.starts_with(open) || !name.ends_with(close) {
        return false;
    }
    let inner = &name[open.len_utf8()..name.len() - close.len_utf8()];
    // Every closing quote inside must be doubled.
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == close && chars.next() != Some(close) {
            return false;
        }
    }
    true
}

fn has_unescaped_quote(inner: &str) -> bool {
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
            } else {
                return true;
            }
        }
    }
    false
}

/// Options for reading rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Decode binary values that cannot be read as NULL instead of failing.
    pub treat_unreadable_bytes_as_null: bool,
}

/// Result of introspecting one database.
#[derive(Debug, Default)]
pub struct Introspection {
    pub schema: DatabaseSchema,
    /// Objects that were skipped, as `PartialIntrospection` errors.
    pub issues: Vec<ConvertError>,
}

/// A connected database engine.
///
/// One interpreter exists per side of a conversion. It owns the connection
/// pool for the run; [`close`](Self::close) releases it.
#[async_trait]
pub trait DatabaseInterpreter: Send + Sync {
    /// Engine identifier, as registered in the catalog.
    fn engine(&self) -> &str;

    fn dialect(&self) -> Arc<dyn Dialect>;

    /// Read catalog metadata for the selected objects.
    ///
    /// Fails with `Connection` or `Permission` errors; objects whose metadata
    /// cannot be used are reported in [`Introspection::issues`].
    async fn introspect(&self, selection: &SchemaSelection) -> Result<Introspection>;

    /// Render the statements that create one object.
    fn render_object_script(&self, object: SchemaObject<'_>, options: &ScriptOptions) -> Vec<String> {
        render::render_object(self.dialect().as_ref(), object, options)
    }

    /// Acquire one connection. It is released when the session is dropped.
    async fn session(&self) -> Result<Box<dyn Session>>;

    /// Check connectivity with a trivial query.
    async fn ping(&self) -> Result<()> {
        let mut session = self.session().await?;
        session.execute("SELECT 1").await?;
        Ok(())
    }

    /// Close the connection pool.
    async fn close(&self);
}

/// One connection to an engine.
#[async_trait]
pub trait Session: Send {
    fn dialect(&self) -> Arc<dyn Dialect>;

    /// Execute one statement, returning the affected row count.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Read up to `limit` rows starting at `offset`, in `table.columns` order.
    async fn read_rows(
        &mut self,
        table: &Table,
        offset: u64,
        limit: usize,
        options: ReadOptions,
    ) -> Result<Vec<Row>>;

    /// Whether a transaction is open on this session.
    fn in_transaction(&self) -> bool;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Write rows (in `table.columns` order).
    ///
    /// The default renders literal multi-row INSERT statements; engine
    /// sessions override it with bulk or bound-parameter loading.
    ///
    /// When a statement fails outside a transaction, its rows are retried one
    /// by one to locate the offending row; rows before it stay written. Inside
    /// a transaction the first row of the failing statement is reported.
    async fn write_rows(&mut self, table: &Table, rows: &[Row]) -> Result<u64> {
        let dialect = self.dialect();
        let chunk_size = dialect.max_rows_per_insert().max(1);
        let mut written = 0u64;

        for (chunk_idx, chunk) in rows.chunks(chunk_size).enumerate() {
            let base = chunk_idx * chunk_size;
            let sql = render::insert_statement(dialect.as_ref(), table, chunk, true);
            let err = match self.execute(&sql).await {
                Ok(_) => {
                    written += chunk.len() as u64;
                    continue;
                }
                Err(e) => e,
            };

            if chunk.len() == 1 || self.in_transaction() {
                return Err(ConvertError::write(table.full_name(), base, err.to_string()));
            }
            for (i, row) in chunk.iter().enumerate() {
                let sql = render::insert_statement(dialect.as_ref(), table, std::slice::from_ref(row), true);
                if let Err(e) = self.execute(&sql).await {
                    return Err(ConvertError::write(table.full_name(), base + i, e.to_string()));
                }
                written += 1;
            }
        }

        Ok(written)
    }
}

/// Factory for one engine's interpreters.
#[async_trait]
pub trait EngineDriver: Send + Sync {
    /// Engine identifier (e.g., "mssql").
    fn engine(&self) -> &str;

    /// Alternative names accepted in configuration.
    fn aliases(&self) -> &[&str] {
        &[]
    }

    fn default_port(&self) -> Option<u16> {
        None
    }

    /// Dialect for a connection, without connecting.
    fn dialect(&self, config: &ConnectionConfig) -> Arc<dyn Dialect>;

    /// Open an interpreter whose pool holds at most `max_connections`.
    async fn connect(
        &self,
        config: &ConnectionConfig,
        max_connections: usize,
    ) -> Result<Arc<dyn DatabaseInterpreter>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::mssql::MssqlDialect;
    use crate::drivers::mysql::MysqlDialect;
    use crate::drivers::postgres::PostgresDialect;

    #[test]
    fn test_quote_ident_idempotent() {
        let pg = PostgresDialect;
        let once = pg.quote_ident("Order Items");
        assert_eq!(once, "\"Order Items\"");
        assert_eq!(pg.quote_ident(&once), once);
        assert_eq!(pg.quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(pg.quote_ident(&pg.quote_ident("a\"b")), "\"a\"\"b\"");

        let ms = MssqlDialect;
        assert_eq!(ms.quote_ident("x]y"), "[x]]y]");
        assert_eq!(ms.quote_ident("[x]]y]"), "[x]]y]");
        assert_eq!(ms.unquote_ident("[x]]y]"), "x]y");
        assert_eq!(ms.unquote_ident("plain"), "plain");
    }

    #[test]
    fn test_escape_literal_idempotent() {
        let pg = PostgresDialect;
        let once = pg.escape_literal("O'Brien");
        assert_eq!(once, "'O''Brien'");
        assert_eq!(pg.escape_literal(&once), once);

        let ms = MssqlDialect;
        let once = ms.escape_literal("O'Brien");
        assert_eq!(once, "N'O''Brien'");
        assert_eq!(ms.escape_literal(&once), once);

        let my = MysqlDialect::default();
        let once = my.escape_literal("C:\\temp 'x'");
        assert_eq!(once, "'C:\\\\temp ''x'''");
        assert_eq!(my.escape_literal(&once), once);
    }
}
