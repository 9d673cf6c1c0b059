//! MySQL/MariaDB interpreter.
//!
//! Uses SQLx for connection pooling and async query execution. The database
//! is the only namespace, so objects carry an empty owner.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use sqlx::mysql::{
    MySql, MySqlArguments, MySqlConnectOptions, MySqlDatabaseError, MySqlPool, MySqlPoolOptions, MySqlRow,
    MySqlSslMode,
};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::Row;
use tracing::{debug, info};

use crate::config::{ConnectionConfig, SchemaSelection};
use crate::core::schema::{
    CheckConstraint, Column, DatabaseSchema, ForeignKey, Index, ObjectKind, ObjectName, PrimaryKey,
    Routine, Table, Trigger, View,
};
use crate::core::traits::{DatabaseInterpreter, Dialect, Introspection, ReadOptions, Session};
use crate::core::value::{Row as ValueRow, SqlValue};
use crate::dialect::canonical::{CanonicalType, NativeType, TypeArgs};
use crate::drivers::common;
use crate::error::{ConvertError, Result};

use super::MysqlDialect;

pub(super) const ENGINE: &str = "mysql";
pub(super) const DEFAULT_PORT: u16 = 3306;

/// Bind parameters per INSERT; the protocol allows 65535.
const MAX_INSERT_PARAMS: usize = 65_535;

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Access denied for database, user, table and column.
const PERMISSION_CODES: [u16; 5] = [1044, 1045, 1142, 1143, 1227];

/// Unknown database, too many connections and lost connections.
const CONNECTION_CODES: [u16; 5] = [1040, 1049, 2002, 2006, 2013];

pub(super) fn classify(err: sqlx::Error) -> ConvertError {
    match &err {
        sqlx::Error::Database(db) => {
            let number = db
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(|e| e.number())
                .unwrap_or(0);
            if PERMISSION_CODES.contains(&number) {
                ConvertError::permission(ENGINE, db.message())
            } else if CONNECTION_CODES.contains(&number) {
                ConvertError::connection(ENGINE, db.message())
            } else {
                ConvertError::query(ENGINE, db.message())
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Configuration(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ConvertError::connection(ENGINE, err.to_string()),
        _ => ConvertError::query(ENGINE, err.to_string()),
    }
}

/// Drop the `DEFINER=user@host` clause so objects are recreated under the
/// loading account.
fn strip_definer(statement: &str) -> String {
    let Some(start) = statement.find("DEFINER=") else {
        return statement.to_string();
    };
    let rest = &statement[start + "DEFINER=".len()..];
    let mut in_quote = false;
    let mut end = rest.len();
    for (idx, c) in rest.char_indices() {
        match c {
            '`' | '\'' => in_quote = !in_quote,
            c if c.is_whitespace() && !in_quote => {
                end = idx;
                break;
            }
            _ => {}
        }
    }
    format!("{}{}", &statement[..start], rest[end..].trim_start())
}

/// Turn `COLUMN_DEFAULT` into an expression. MySQL reports literals
/// unquoted; MariaDB quotes them already.
fn default_expression(dialect: &MysqlDialect, raw: Option<String>, extra: &str, kind: &CanonicalType) -> Option<String> {
    let raw = raw?;
    if raw.eq_ignore_ascii_case("NULL") {
        return None;
    }
    let is_expression = extra.to_uppercase().contains("DEFAULT_GENERATED")
        || raw.starts_with('\'')
        || raw.to_uppercase().starts_with("CURRENT_TIMESTAMP")
        || raw.starts_with('(');
    let is_number = matches!(
        kind,
        CanonicalType::Boolean
            | CanonicalType::UInt8
            | CanonicalType::Int16
            | CanonicalType::Int32
            | CanonicalType::Int64
            | CanonicalType::Float32
            | CanonicalType::Float64
            | CanonicalType::Decimal { .. }
            | CanonicalType::Year
    ) && raw.parse::<f64>().is_ok();
    if is_expression || is_number {
        Some(raw)
    } else {
        Some(dialect.string_literal(&raw))
    }
}

/// A connected MySQL or MariaDB database.
pub struct MysqlInterpreter {
    pool: MySqlPool,
    dialect: Arc<MysqlDialect>,
    database: String,
}

impl MysqlInterpreter {
    pub async fn connect(config: &ConnectionConfig, max_conns: usize) -> Result<Self> {
        // No TLS backend is compiled in; Preferred falls back to plaintext.
        let ssl_mode = if config.encrypt {
            MySqlSslMode::Preferred
        } else {
            MySqlSslMode::Disabled
        };

        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port.unwrap_or(DEFAULT_PORT))
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .charset(&config.charset)
            .ssl_mode(ssl_mode);
        if config.collation.starts_with(&config.charset) {
            options = options.collation(&config.collation);
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(max_conns.max(1) as u32)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| match classify(e) {
                ConvertError::Query { message, .. } => ConvertError::connection(ENGINE, message),
                other => other,
            })?;

        sqlx::query("SELECT 1").fetch_one(&pool).await.map_err(classify)?;

        info!("Connected to MySQL: {} (pool_size={})", config.describe(), max_conns);

        Ok(Self {
            pool,
            dialect: Arc::new(MysqlDialect::with_charset(&config.charset)),
            database: config.database.clone(),
        })
    }

    async fn fetch(&self, sql: &str, binds: &[&str]) -> Result<Vec<MySqlRow>> {
        let mut query = sqlx::query(sql);
        for bind in binds {
            query = query.bind(*bind);
        }
        query.fetch_all(&self.pool).await.map_err(classify)
    }

    /// Owner recorded for objects of `schema`: empty for this database.
    fn owner_of(&self, schema: &str) -> String {
        if schema == self.database {
            String::new()
        } else {
            schema.to_string()
        }
    }

    async fn load_table(&self, name: &str) -> Result<Table> {
        let mut table = Table {
            name: name.to_string(),
            ..Default::default()
        };
        self.load_columns(&mut table).await?;
        self.load_primary_key(&mut table).await?;
        self.load_indexes(&mut table).await?;
        self.load_foreign_keys(&mut table).await?;
        self.load_check_constraints(&mut table).await?;
        Ok(table)
    }

    async fn load_columns(&self, table: &mut Table) -> Result<()> {
        let query = r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR(255)),
                CAST(COLUMN_TYPE AS CHAR(255)),
                CAST(CASE
                    WHEN CHARACTER_MAXIMUM_LENGTH IS NULL THEN 0
                    WHEN CHARACTER_MAXIMUM_LENGTH > 2147483647 THEN -1
                    ELSE CHARACTER_MAXIMUM_LENGTH
                END AS SIGNED),
                CAST(COALESCE(NUMERIC_PRECISION, 0) AS SIGNED),
                CAST(COALESCE(NUMERIC_SCALE, 0) AS SIGNED),
                CAST(IF(IS_NULLABLE = 'YES', 1, 0) AS SIGNED),
                CAST(IF(EXTRA LIKE '%auto_increment%', 1, 0) AS SIGNED),
                CAST(COLUMN_DEFAULT AS CHAR(4000)),
                CAST(EXTRA AS CHAR(255)),
                CAST(IF(EXTRA LIKE '%GENERATED%' AND EXTRA NOT LIKE '%DEFAULT_GENERATED%',
                        GENERATION_EXPRESSION, NULL) AS CHAR(4000)),
                CAST(NULLIF(COLUMN_COMMENT, '') AS CHAR(1024)),
                CAST(ORDINAL_POSITION AS SIGNED)
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
        "#;
        let rows = self.fetch(query, &[&self.database, &table.name]).await?;

        for row in rows {
            let native = NativeType::parse(&get::<String>(&row, 1)?);
            let char_length = get::<i64>(&row, 2)?;
            // Only tinyint(1) and bit(n) keep their display width.
            let max_length = match native.args {
                _ if char_length != 0 => char_length as i32,
                TypeArgs::Length(n) if native.name == "tinyint" || native.name == "bit" => n,
                _ => 0,
            };
            let mut col = Column {
                name: get(&row, 0)?,
                data_type: native.name,
                max_length,
                precision: get::<i64>(&row, 3)? as i32,
                scale: get::<i64>(&row, 4)? as i32,
                is_nullable: get::<i64>(&row, 5)? == 1,
                is_identity: get::<i64>(&row, 6)? == 1,
                default_expression: None,
                computed_expression: get(&row, 9)?,
                comment: get(&row, 10)?,
                ordinal_pos: get::<i64>(&row, 11)? as i32,
            };
            let extra: Option<String> = get(&row, 8)?;
            let kind = common::canonical_of(self.dialect.as_ref(), &col);
            col.default_expression =
                default_expression(&self.dialect, get(&row, 7)?, extra.as_deref().unwrap_or(""), &kind);
            table.columns.push(col);
        }

        debug!("Loaded {} columns for {}", table.columns.len(), table.name);
        Ok(())
    }

    async fn load_primary_key(&self, table: &mut Table) -> Result<()> {
        let query = r#"
            SELECT CAST(COLUMN_NAME AS CHAR(255))
            FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY'
            ORDER BY ORDINAL_POSITION
        "#;
        let rows = self.fetch(query, &[&self.database, &table.name]).await?;

        if !rows.is_empty() {
            let mut columns = Vec::with_capacity(rows.len());
            for row in rows {
                columns.push(get(&row, 0)?);
            }
            // MySQL names every primary key PRIMARY.
            table.primary_key = Some(PrimaryKey {
                name: String::new(),
                columns,
            });
        }
        Ok(())
    }

    /// Column indexes; functional key parts have no column and are skipped.
    async fn load_indexes(&self, table: &mut Table) -> Result<()> {
        let query = r#"
            SELECT
                CAST(INDEX_NAME AS CHAR(255)),
                CAST(COLUMN_NAME AS CHAR(255)),
                CAST(IF(NON_UNIQUE = 0, 1, 0) AS SIGNED)
            FROM INFORMATION_SCHEMA.STATISTICS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
              AND INDEX_NAME <> 'PRIMARY'
            ORDER BY INDEX_NAME, SEQ_IN_INDEX
        "#;
        let rows = self.fetch(query, &[&self.database, &table.name]).await?;

        let mut skipped: Vec<String> = Vec::new();
        for row in rows {
            let name: String = get(&row, 0)?;
            let Some(column) = get::<Option<String>>(&row, 1)? else {
                skipped.push(name);
                continue;
            };
            if table.indexes.last().map(|i| i.name != name).unwrap_or(true) {
                table.indexes.push(Index {
                    name,
                    columns: Vec::new(),
                    is_unique: get::<i64>(&row, 2)? == 1,
                    is_clustered: false,
                    include_cols: Vec::new(),
                });
            }
            if let Some(index) = table.indexes.last_mut() {
                index.columns.push(column);
            }
        }
        if !skipped.is_empty() {
            table.indexes.retain(|i| !skipped.contains(&i.name));
            debug!("Skipped functional indexes on {}: {:?}", table.name, skipped);
        }

        debug!("Loaded {} indexes for {}", table.indexes.len(), table.name);
        Ok(())
    }

    async fn load_foreign_keys(&self, table: &mut Table) -> Result<()> {
        let query = r#"
            SELECT
                CAST(rc.CONSTRAINT_NAME AS CHAR(255)),
                CAST(kcu.COLUMN_NAME AS CHAR(255)),
                CAST(kcu.REFERENCED_TABLE_SCHEMA AS CHAR(255)),
                CAST(kcu.REFERENCED_TABLE_NAME AS CHAR(255)),
                CAST(kcu.REFERENCED_COLUMN_NAME AS CHAR(255)),
                CAST(rc.DELETE_RULE AS CHAR(64)),
                CAST(rc.UPDATE_RULE AS CHAR(64))
            FROM INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
                ON rc.CONSTRAINT_SCHEMA = kcu.CONSTRAINT_SCHEMA
                AND rc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
                AND rc.TABLE_NAME = kcu.TABLE_NAME
            WHERE rc.CONSTRAINT_SCHEMA = ? AND rc.TABLE_NAME = ?
            ORDER BY rc.CONSTRAINT_NAME, kcu.ORDINAL_POSITION
        "#;
        let rows = self.fetch(query, &[&self.database, &table.name]).await?;

        for row in rows {
            let name: String = get(&row, 0)?;
            if table.foreign_keys.last().map(|fk| fk.name != name).unwrap_or(true) {
                table.foreign_keys.push(ForeignKey {
                    name,
                    columns: Vec::new(),
                    ref_owner: self.owner_of(&get::<String>(&row, 2)?),
                    ref_table: get(&row, 3)?,
                    ref_columns: Vec::new(),
                    on_delete: get(&row, 5)?,
                    on_update: get(&row, 6)?,
                });
            }
            if let Some(fk) = table.foreign_keys.last_mut() {
                fk.columns.push(get(&row, 1)?);
                fk.ref_columns.push(get(&row, 4)?);
            }
        }

        debug!("Loaded {} foreign keys for {}", table.foreign_keys.len(), table.name);
        Ok(())
    }

    async fn load_check_constraints(&self, table: &mut Table) -> Result<()> {
        let query = r#"
            SELECT
                CAST(cc.CONSTRAINT_NAME AS CHAR(255)),
                CAST(cc.CHECK_CLAUSE AS CHAR(4000))
            FROM INFORMATION_SCHEMA.CHECK_CONSTRAINTS cc
            JOIN INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
                ON cc.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA
                AND cc.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
            WHERE tc.TABLE_SCHEMA = ? AND tc.TABLE_NAME = ?
              AND tc.CONSTRAINT_TYPE = 'CHECK'
            ORDER BY cc.CONSTRAINT_NAME
        "#;

        // CHECK_CONSTRAINTS does not exist before MySQL 8.0.16.
        let rows = match self.fetch(query, &[&self.database, &table.name]).await {
            Ok(rows) => rows,
            Err(e) if common::is_fatal(&e) => return Err(e),
            Err(e) => {
                debug!("Check constraints unavailable for {}: {}", table.name, e);
                return Ok(());
            }
        };
        for row in rows {
            table.check_constraints.push(CheckConstraint {
                name: get(&row, 0)?,
                definition: get(&row, 1)?,
            });
        }
        Ok(())
    }

    /// `SHOW CREATE` output for a routine or trigger; column 2 holds the
    /// statement and is NULL without sufficient privileges.
    async fn show_create(&self, kind: &str, name: &str) -> Result<Option<String>> {
        let sql = format!("SHOW CREATE {} {}", kind, self.dialect.quote_ident(name));
        let row = sqlx::raw_sql(&sql).fetch_one(&self.pool).await.map_err(classify)?;
        Ok(get::<Option<String>>(&row, 2)?.map(|s| strip_definer(&s)))
    }
}

fn get<'r, T>(row: &'r MySqlRow, idx: usize) -> Result<T>
where
    T: sqlx::Decode<'r, MySql> + sqlx::Type<MySql>,
{
    row.try_get(idx).map_err(classify)
}

#[async_trait]
impl DatabaseInterpreter for MysqlInterpreter {
    fn engine(&self) -> &str {
        ENGINE
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.clone()
    }

    async fn introspect(&self, selection: &SchemaSelection) -> Result<Introspection> {
        let mut schema = DatabaseSchema::new(&self.database);
        let mut issues = Vec::new();
        // Owner filters name the database.
        let db = self.database.as_str();

        if selection.includes_kind(ObjectKind::Table) {
            let query = r#"
                SELECT CAST(TABLE_NAME AS CHAR(255)),
                       CAST(NULLIF(TABLE_COMMENT, '') AS CHAR(2048)),
                       CAST(COALESCE(TABLE_ROWS, 0) AS SIGNED)
                FROM INFORMATION_SCHEMA.TABLES
                WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
                ORDER BY TABLE_NAME
            "#;
            for row in self.fetch(query, &[db]).await? {
                let name: String = get(&row, 0)?;
                if !selection.includes_table(db, &name) {
                    continue;
                }
                match self.load_table(&name).await {
                    Ok(mut table) => match table.validate_ordinals() {
                        Ok(()) => {
                            table.comment = get(&row, 1)?;
                            table.row_count = get(&row, 2)?;
                            schema.tables.push(table);
                        }
                        Err(message) => issues.push(ConvertError::partial(name, message)),
                    },
                    Err(e) if common::is_fatal(&e) => return Err(e),
                    Err(e) => issues.push(ConvertError::partial(name, e.to_string())),
                }
            }
        }

        if selection.includes_kind(ObjectKind::View) && selection.includes_owner(db) {
            let query = r#"
                SELECT CAST(TABLE_NAME AS CHAR(255)), VIEW_DEFINITION
                FROM INFORMATION_SCHEMA.VIEWS
                WHERE TABLE_SCHEMA = ?
                ORDER BY TABLE_NAME
            "#;
            for row in self.fetch(query, &[db]).await? {
                let name: String = get(&row, 0)?;
                match get::<Option<String>>(&row, 1)?.filter(|d| !d.is_empty()) {
                    Some(definition) => schema.views.push(View {
                        owner: String::new(),
                        name,
                        definition,
                        references: Vec::new(),
                        comment: None,
                    }),
                    None => issues.push(ConvertError::partial(name, "view definition is not visible")),
                }
            }
        }

        for (kind, keyword) in [(ObjectKind::Function, "FUNCTION"), (ObjectKind::Procedure, "PROCEDURE")] {
            if !selection.includes_kind(kind) || !selection.includes_owner(db) {
                continue;
            }
            let query = r#"
                SELECT CAST(ROUTINE_NAME AS CHAR(255))
                FROM INFORMATION_SCHEMA.ROUTINES
                WHERE ROUTINE_SCHEMA = ? AND ROUTINE_TYPE = ?
                ORDER BY ROUTINE_NAME
            "#;
            for row in self.fetch(query, &[db, keyword]).await? {
                let name: String = get(&row, 0)?;
                let definition = match self.show_create(keyword, &name).await {
                    Ok(Some(definition)) => definition,
                    Ok(None) => {
                        issues.push(ConvertError::partial(&name, format!("{} definition is not visible", kind)));
                        continue;
                    }
                    Err(e) if common::is_fatal(&e) => return Err(e),
                    Err(e) => {
                        issues.push(ConvertError::partial(&name, e.to_string()));
                        continue;
                    }
                };
                let routine = Routine {
                    owner: String::new(),
                    name,
                    definition,
                    references: Vec::new(),
                };
                match kind {
                    ObjectKind::Procedure => schema.procedures.push(routine),
                    _ => schema.functions.push(routine),
                }
            }
        }

        if selection.includes_kind(ObjectKind::Trigger) {
            let query = r#"
                SELECT CAST(TRIGGER_NAME AS CHAR(255)), CAST(EVENT_OBJECT_TABLE AS CHAR(255))
                FROM INFORMATION_SCHEMA.TRIGGERS
                WHERE TRIGGER_SCHEMA = ?
                ORDER BY TRIGGER_NAME
            "#;
            for row in self.fetch(query, &[db]).await? {
                let name: String = get(&row, 0)?;
                let table: String = get(&row, 1)?;
                if !selection.includes_table(db, &table) {
                    continue;
                }
                match self.show_create("TRIGGER", &name).await {
                    Ok(Some(definition)) => schema.triggers.push(Trigger {
                        owner: String::new(),
                        name,
                        table: ObjectName::new("", table),
                        definition,
                    }),
                    Ok(None) => issues.push(ConvertError::partial(name, "trigger definition is not visible")),
                    Err(e) if common::is_fatal(&e) => return Err(e),
                    Err(e) => issues.push(ConvertError::partial(name, e.to_string())),
                }
            }
        }

        // information_schema does not record view or routine dependencies.
        schema.infer_references();

        info!(
            "Introspected MySQL database {}: {} tables, {} views, {} routines, {} skipped",
            self.database,
            schema.tables.len(),
            schema.views.len(),
            schema.functions.len() + schema.procedures.len(),
            issues.len()
        );
        Ok(Introspection { schema, issues })
    }

    async fn session(&self) -> Result<Box<dyn Session>> {
        let conn = self.pool.acquire().await.map_err(classify)?;
        Ok(Box::new(MysqlSession {
            conn,
            dialect: self.dialect.clone(),
            in_transaction: false,
        }))
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("MySQL pool closed");
    }
}

/// One pooled MySQL connection.
struct MysqlSession {
    conn: PoolConnection<MySql>,
    dialect: Arc<MysqlDialect>,
    in_transaction: bool,
}

impl Drop for MysqlSession {
    fn drop(&mut self) {
        // The pool cannot see transactions opened with plain SQL.
        if self.in_transaction {
            self.conn.close_on_drop();
        }
    }
}

impl MysqlSession {
    async fn insert_chunk(&mut self, table: &Table, rows: &[ValueRow]) -> Result<u64> {
        let sql = common::parameterized_insert(self.dialect.as_ref(), table, rows.len(), |_| "?".to_string());
        let mut query = sqlx::query(&sql);
        for row in rows {
            for value in row {
                query = bind_value(query, value);
            }
        }
        let result = query.execute(&mut *self.conn).await.map_err(classify)?;
        Ok(result.rows_affected())
    }
}

/// Bind one value. UUIDs travel as text for `char(36)` columns.
fn bind_value<'q>(query: Query<'q, MySql, MySqlArguments>, value: &SqlValue) -> Query<'q, MySql, MySqlArguments> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::I16(v) => query.bind(*v),
        SqlValue::I32(v) => query.bind(*v),
        SqlValue::I64(v) => query.bind(*v),
        SqlValue::F32(v) => query.bind(*v),
        SqlValue::F64(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.clone()),
        SqlValue::Bytes(v) => query.bind(v.clone()),
        SqlValue::Uuid(v) => query.bind(v.hyphenated().to_string()),
        SqlValue::Decimal(v) => query.bind(*v),
        SqlValue::DateTime(v) => query.bind(*v),
        // DATETIME and TIMESTAMP carry no offset.
        SqlValue::DateTimeOffset(v) => query.bind(v.naive_utc()),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
    }
}

#[async_trait]
impl Session for MysqlSession {
    fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.clone()
    }

    /// Runs over the text protocol; DDL cannot be prepared.
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let result = sqlx::Executor::execute(&mut *self.conn, sqlx::raw_sql(sql))
            .await
            .map_err(classify)?;
        Ok(result.rows_affected())
    }

    async fn read_rows(&mut self, table: &Table, offset: u64, limit: usize, options: ReadOptions) -> Result<Vec<ValueRow>> {
        let sql = self.dialect.select_page(table, offset, limit);
        let kinds: Vec<CanonicalType> = table
            .columns
            .iter()
            .map(|c| common::canonical_of(self.dialect.as_ref(), c))
            .collect();

        let rows = sqlx::query(&sql)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|e| match classify(e) {
                ConvertError::Query { message, .. } => ConvertError::read(table.full_name(), message),
                other => other,
            })?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(kinds.len());
            for (idx, (col, kind)) in table.columns.iter().zip(&kinds).enumerate() {
                let value = match decode(&row, idx, &col.data_type, kind) {
                    Ok(v) => v,
                    Err(_) if options.treat_unreadable_bytes_as_null && (kind.is_binary() || kind.is_character()) => {
                        SqlValue::Null
                    }
                    Err(e) => {
                        return Err(ConvertError::read(
                            table.full_name(),
                            format!("column {}: {}", col.name, e),
                        ))
                    }
                };
                values.push(value);
            }
            out.push(values);
        }
        Ok(out)
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn begin(&mut self) -> Result<()> {
        let dialect = self.dialect.clone();
        self.execute(dialect.begin_transaction_sql()).await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let dialect = self.dialect.clone();
        self.execute(dialect.commit_sql()).await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.in_transaction = false;
        let dialect = self.dialect.clone();
        self.execute(dialect.rollback_sql()).await?;
        Ok(())
    }

    /// Multi-row INSERTs with bound parameters, so values never depend on
    /// the server's string escaping mode. Outside a transaction a failing
    /// statement is retried row by row to locate the offending row.
    async fn write_rows(&mut self, table: &Table, rows: &[ValueRow]) -> Result<u64> {
        let per_statement = common::rows_per_statement(
            table.columns.len(),
            MAX_INSERT_PARAMS,
            self.dialect.max_rows_per_insert(),
        );
        let mut written = 0u64;
        for (chunk_idx, chunk) in rows.chunks(per_statement).enumerate() {
            let base = chunk_idx * per_statement;
            let err = match self.insert_chunk(table, chunk).await {
                Ok(_) => {
                    written += chunk.len() as u64;
                    continue;
                }
                Err(e) => e,
            };
            if chunk.len() == 1 || self.in_transaction {
                return Err(ConvertError::write(table.full_name(), base, err.to_string()));
            }
            for (i, row) in chunk.iter().enumerate() {
                if let Err(e) = self.insert_chunk(table, std::slice::from_ref(row)).await {
                    return Err(ConvertError::write(table.full_name(), base + i, e.to_string()));
                }
                written += 1;
            }
        }
        Ok(written)
    }
}

/// Decode one column. Unsigned integers decode at their own width and widen.
fn decode(row: &MySqlRow, idx: usize, data_type: &str, kind: &CanonicalType) -> std::result::Result<SqlValue, sqlx::Error> {
    let value = match (data_type, kind) {
        (_, CanonicalType::Boolean) => row.try_get::<Option<bool>, _>(idx)?.map(SqlValue::Bool),
        ("tinyint", _) => row.try_get::<Option<i8>, _>(idx)?.map(|v| SqlValue::I16(i16::from(v))),
        ("tinyint unsigned", _) => row.try_get::<Option<u8>, _>(idx)?.map(|v| SqlValue::I16(i16::from(v))),
        ("smallint unsigned", _) => row.try_get::<Option<u16>, _>(idx)?.map(|v| SqlValue::I32(i32::from(v))),
        ("mediumint unsigned", _) => row.try_get::<Option<u32>, _>(idx)?.map(|v| SqlValue::I32(v as i32)),
        ("int unsigned" | "integer unsigned", _) => {
            row.try_get::<Option<u32>, _>(idx)?.map(|v| SqlValue::I64(i64::from(v)))
        }
        ("bigint unsigned", _) => row
            .try_get::<Option<u64>, _>(idx)?
            .map(|v| SqlValue::Decimal(Decimal::from(v))),
        (_, CanonicalType::Int16) => row.try_get::<Option<i16>, _>(idx)?.map(SqlValue::I16),
        (_, CanonicalType::Int32) => row.try_get::<Option<i32>, _>(idx)?.map(SqlValue::I32),
        (_, CanonicalType::Int64) => row.try_get::<Option<i64>, _>(idx)?.map(SqlValue::I64),
        // Selected as SIGNED.
        (_, CanonicalType::Year) => row
            .try_get::<Option<i64>, _>(idx)?
            .map(|v| SqlValue::I16(v as i16)),
        (_, CanonicalType::Float32) => row.try_get::<Option<f32>, _>(idx)?.map(SqlValue::F32),
        (_, CanonicalType::Float64) => row.try_get::<Option<f64>, _>(idx)?.map(SqlValue::F64),
        (_, CanonicalType::Decimal { .. }) => row.try_get::<Option<Decimal>, _>(idx)?.map(SqlValue::Decimal),
        (_, CanonicalType::Binary(_) | CanonicalType::Varbinary(_) | CanonicalType::Blob) => {
            row.try_get::<Option<Vec<u8>>, _>(idx)?.map(SqlValue::Bytes)
        }
        (_, CanonicalType::Date) => row.try_get::<Option<NaiveDate>, _>(idx)?.map(SqlValue::Date),
        (_, CanonicalType::Time) => row.try_get::<Option<NaiveTime>, _>(idx)?.map(SqlValue::Time),
        (_, CanonicalType::DateTime) => row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(SqlValue::DateTime),
        _ => row.try_get::<Option<String>, _>(idx)?.map(SqlValue::Text),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_definer() {
        assert_eq!(
            strip_definer("CREATE DEFINER=`root`@`%` PROCEDURE `p`() SELECT 1"),
            "CREATE PROCEDURE `p`() SELECT 1"
        );
        assert_eq!(
            strip_definer("CREATE DEFINER=`my user`@`localhost` TRIGGER t BEFORE INSERT ON a FOR EACH ROW SET @x = 1"),
            "CREATE TRIGGER t BEFORE INSERT ON a FOR EACH ROW SET @x = 1"
        );
        assert_eq!(strip_definer("CREATE FUNCTION f() RETURNS int RETURN 1"), "CREATE FUNCTION f() RETURNS int RETURN 1");
    }

    #[test]
    fn test_default_expression_quotes_mysql_literals() {
        let d = MysqlDialect::default();
        let text = CanonicalType::Varchar(20);
        assert_eq!(default_expression(&d, Some("abc".into()), "", &text).unwrap(), "'abc'");
        assert_eq!(default_expression(&d, Some("'abc'".into()), "", &text).unwrap(), "'abc'");
        assert_eq!(default_expression(&d, Some("0".into()), "", &CanonicalType::Int32).unwrap(), "0");
        assert_eq!(
            default_expression(&d, Some("CURRENT_TIMESTAMP".into()), "DEFAULT_GENERATED", &CanonicalType::DateTime)
                .unwrap(),
            "CURRENT_TIMESTAMP"
        );
        assert!(default_expression(&d, Some("NULL".into()), "", &text).is_none());
        assert!(default_expression(&d, None, "", &text).is_none());
    }

    #[test]
    fn test_pool_failures_are_connection_errors() {
        assert!(matches!(classify(sqlx::Error::PoolTimedOut), ConvertError::Connection { .. }));
        assert!(matches!(classify(sqlx::Error::RowNotFound), ConvertError::Query { .. }));
    }
}
