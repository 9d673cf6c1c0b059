//! SQLite interpreter.
//!
//! Reads the schema from `sqlite_master` and the table pragmas. Values are
//! stored by affinity, so decoding falls back to the stored class when the
//! declared type does not match.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::config::{ConnectionConfig, SchemaSelection};
use crate::core::schema::{
    Column, DatabaseSchema, ForeignKey, Index, ObjectKind, ObjectName, PrimaryKey, Table, Trigger, View,
};
use crate::core::traits::{DatabaseInterpreter, Dialect, Introspection, ReadOptions, Session};
use crate::core::value::{Row as ValueRow, SqlValue};
use crate::dialect::canonical::{CanonicalType, NativeType};
use crate::drivers::common;
use crate::error::{ConvertError, Result};

use super::SqliteDialect;

pub(super) const ENGINE: &str = "sqlite";

/// Name owner filters use for the database file.
const MAIN: &str = "main";

const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Host parameter limit of SQLite 3.32 and later.
const MAX_INSERT_PARAMS: usize = 32_766;

pub(super) fn classify(err: sqlx::Error) -> ConvertError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .map(|c| c & 0xff)
                .unwrap_or(0);
            match code {
                // SQLITE_PERM, SQLITE_READONLY, SQLITE_AUTH
                3 | 8 | 23 => ConvertError::permission(ENGINE, db.message()),
                // SQLITE_CANTOPEN, SQLITE_NOTADB
                14 | 26 => ConvertError::connection(ENGINE, db.message()),
                _ => ConvertError::query(ENGINE, db.message()),
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Configuration(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ConvertError::connection(ENGINE, err.to_string()),
        _ => ConvertError::query(ENGINE, err.to_string()),
    }
}

/// Foreign keys are unnamed unless declared with CONSTRAINT.
fn foreign_key_name(table: &str, id: i64) -> String {
    format!("fk_{}_{}", table, id)
}

/// A SQLite database file.
pub struct SqliteInterpreter {
    pool: SqlitePool,
    dialect: Arc<SqliteDialect>,
    database: String,
}

impl SqliteInterpreter {
    pub async fn connect(config: &ConnectionConfig, max_conns: usize) -> Result<Self> {
        let path = config
            .path
            .as_ref()
            .ok_or_else(|| ConvertError::Config("sqlite connection requires a path".into()))?;

        // Inline foreign keys exist before their rows are loaded.
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(false)
            .busy_timeout(Duration::from_secs(config.timeout_secs));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_conns.max(1) as u32)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| match classify(e) {
                ConvertError::Query { message, .. } => ConvertError::connection(ENGINE, message),
                other => other,
            })?;

        sqlx::query("SELECT 1").fetch_one(&pool).await.map_err(classify)?;

        info!("Opened SQLite database: {} (pool_size={})", config.describe(), max_conns);

        Ok(Self {
            pool,
            dialect: Arc::new(SqliteDialect),
            database: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| MAIN.to_string()),
        })
    }

    async fn fetch(&self, sql: &str, binds: &[&str]) -> Result<Vec<SqliteRow>> {
        let mut query = sqlx::query(sql);
        for bind in binds {
            query = query.bind(*bind);
        }
        query.fetch_all(&self.pool).await.map_err(classify)
    }

    async fn load_table(&self, name: &str) -> Result<Table> {
        let mut table = Table {
            name: name.to_string(),
            ..Default::default()
        };
        self.load_columns(&mut table).await?;
        self.load_indexes(&mut table).await?;
        self.load_foreign_keys(&mut table).await?;

        let count_sql = format!("SELECT COUNT(*) FROM {}", self.dialect.quote_ident(name));
        let row = sqlx::query(&count_sql).fetch_one(&self.pool).await.map_err(classify)?;
        table.row_count = get(&row, 0)?;
        Ok(table)
    }

    /// Columns and primary key from `table_info`. A single INTEGER primary
    /// key aliases the rowid and is treated as identity.
    async fn load_columns(&self, table: &mut Table) -> Result<()> {
        let rows = self
            .fetch(
                "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid",
                &[&table.name],
            )
            .await?;

        let mut pk: Vec<(i64, String)> = Vec::new();
        for (idx, row) in rows.iter().enumerate() {
            let name: String = get(row, 0)?;
            let native = NativeType::parse(&get::<String>(row, 1)?);
            let (max_length, precision, scale) = native.dimensions();
            let pk_pos: i64 = get(row, 4)?;
            if pk_pos > 0 {
                pk.push((pk_pos, name.clone()));
            }
            table.columns.push(Column {
                name,
                data_type: native.name.to_uppercase(),
                max_length,
                precision,
                scale,
                is_nullable: get::<i64>(row, 2)? == 0 && pk_pos == 0,
                is_identity: false,
                default_expression: get(row, 3)?,
                computed_expression: None,
                comment: None,
                ordinal_pos: idx as i32 + 1,
            });
        }

        pk.sort();
        if let [(_, only)] = pk.as_slice() {
            if let Some(col) = table.columns.iter_mut().find(|c| &c.name == only) {
                col.is_identity = col.data_type == "INTEGER";
            }
        }
        if !pk.is_empty() {
            table.primary_key = Some(PrimaryKey {
                name: String::new(),
                columns: pk.into_iter().map(|(_, name)| name).collect(),
            });
        }

        debug!("Loaded {} columns for {}", table.columns.len(), table.name);
        Ok(())
    }

    /// Declared indexes; primary key, partial and expression indexes are skipped.
    async fn load_indexes(&self, table: &mut Table) -> Result<()> {
        let list = self
            .fetch(
                "SELECT name, \"unique\", origin, partial FROM pragma_index_list(?) ORDER BY name",
                &[&table.name],
            )
            .await?;

        for entry in list {
            let name: String = get(&entry, 0)?;
            let origin: String = get(&entry, 2)?;
            if origin == "pk" || get::<i64>(&entry, 3)? == 1 {
                continue;
            }
            let parts = self
                .fetch("SELECT name FROM pragma_index_info(?) ORDER BY seqno", &[&name])
                .await?;
            let mut columns = Vec::with_capacity(parts.len());
            for part in &parts {
                match get::<Option<String>>(part, 0)? {
                    Some(column) => columns.push(column),
                    None => break,
                }
            }
            if columns.len() != parts.len() {
                debug!("Skipped expression index {} on {}", name, table.name);
                continue;
            }
            table.indexes.push(Index {
                name,
                columns,
                is_unique: get::<i64>(&entry, 1)? == 1,
                is_clustered: false,
                include_cols: Vec::new(),
            });
        }
        Ok(())
    }

    async fn load_foreign_keys(&self, table: &mut Table) -> Result<()> {
        let rows = self
            .fetch(
                "SELECT id, \"table\", \"from\", \"to\", on_update, on_delete \
                 FROM pragma_foreign_key_list(?) ORDER BY id, seq",
                &[&table.name],
            )
            .await?;

        let mut current: Option<i64> = None;
        for row in rows {
            let id: i64 = get(&row, 0)?;
            if current != Some(id) {
                current = Some(id);
                table.foreign_keys.push(ForeignKey {
                    name: foreign_key_name(&table.name, id),
                    columns: Vec::new(),
                    ref_owner: String::new(),
                    ref_table: get(&row, 1)?,
                    ref_columns: Vec::new(),
                    on_delete: get(&row, 5)?,
                    on_update: get(&row, 4)?,
                });
            }
            let from: String = get(&row, 2)?;
            let to: Option<String> = get(&row, 3)?;
            if let Some(fk) = table.foreign_keys.last_mut() {
                fk.columns.push(from);
                if let Some(to) = to {
                    fk.ref_columns.push(to);
                }
            }
        }

        // `REFERENCES parent` without columns targets the parent's primary key.
        for fk in table.foreign_keys.iter_mut().filter(|fk| fk.ref_columns.is_empty()) {
            let rows = self
                .fetch(
                    "SELECT name FROM pragma_table_info(?) WHERE pk > 0 ORDER BY pk",
                    &[&fk.ref_table],
                )
                .await?;
            for row in rows {
                fk.ref_columns.push(get(&row, 0)?);
            }
        }

        debug!("Loaded {} foreign keys for {}", table.foreign_keys.len(), table.name);
        Ok(())
    }
}

fn get<'r, T>(row: &'r SqliteRow, idx: usize) -> Result<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(idx).map_err(classify)
}

#[async_trait]
impl DatabaseInterpreter for SqliteInterpreter {
    fn engine(&self) -> &str {
        ENGINE
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.clone()
    }

    async fn introspect(&self, selection: &SchemaSelection) -> Result<Introspection> {
        let mut schema = DatabaseSchema::new(&self.database);
        let mut issues = Vec::new();

        let objects = self
            .fetch(
                "SELECT type, name, tbl_name, sql FROM sqlite_master \
                 WHERE type IN ('table', 'view', 'trigger') AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
                 ORDER BY type, name",
                &[],
            )
            .await?;

        for row in objects {
            let kind: String = get(&row, 0)?;
            let name: String = get(&row, 1)?;
            let sql: Option<String> = get(&row, 3)?;
            match kind.as_str() {
                "table" if selection.includes_kind(ObjectKind::Table) => {
                    if !selection.includes_table(MAIN, &name) {
                        continue;
                    }
                    match self.load_table(&name).await {
                        Ok(table) => schema.tables.push(table),
                        Err(e) if common::is_fatal(&e) => return Err(e),
                        Err(e) => issues.push(ConvertError::partial(name, e.to_string())),
                    }
                }
                "view" if selection.includes_kind(ObjectKind::View) && selection.includes_owner(MAIN) => {
                    match sql {
                        Some(definition) => schema.views.push(View {
                            owner: String::new(),
                            name,
                            definition,
                            references: Vec::new(),
                            comment: None,
                        }),
                        None => issues.push(ConvertError::partial(name, "view has no definition")),
                    }
                }
                "trigger" if selection.includes_kind(ObjectKind::Trigger) => {
                    let table: String = get(&row, 2)?;
                    if !selection.includes_table(MAIN, &table) {
                        continue;
                    }
                    if let Some(definition) = sql {
                        schema.triggers.push(Trigger {
                            owner: String::new(),
                            name,
                            table: ObjectName::new("", table),
                            definition,
                        });
                    }
                }
                _ => {}
            }
        }

        schema.infer_references();

        info!(
            "Introspected SQLite database {}: {} tables, {} views, {} triggers, {} skipped",
            self.database,
            schema.tables.len(),
            schema.views.len(),
            schema.triggers.len(),
            issues.len()
        );
        Ok(Introspection { schema, issues })
    }

    async fn session(&self) -> Result<Box<dyn Session>> {
        let conn = self.pool.acquire().await.map_err(classify)?;
        Ok(Box::new(SqliteSession {
            conn,
            dialect: self.dialect.clone(),
            in_transaction: false,
        }))
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("SQLite pool closed");
    }
}

struct SqliteSession {
    conn: PoolConnection<Sqlite>,
    dialect: Arc<SqliteDialect>,
    in_transaction: bool,
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        if self.in_transaction {
            self.conn.close_on_drop();
        }
    }
}

impl SqliteSession {
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

/// Bind one value. UUIDs and decimals are stored as text.
fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
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
        SqlValue::Decimal(v) => query.bind(v.to_string()),
        SqlValue::DateTime(v) => query.bind(*v),
        SqlValue::DateTimeOffset(v) => query.bind(*v),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
    }
}

#[async_trait]
impl Session for SqliteSession {
    fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.clone()
    }

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
            for (idx, kind) in kinds.iter().enumerate() {
                let value = match decode(&row, idx, kind) {
                    Some(v) => v,
                    None if options.treat_unreadable_bytes_as_null => SqlValue::Null,
                    None => {
                        return Err(ConvertError::read(
                            table.full_name(),
                            format!("column {}: value cannot be read as {:?}", table.columns[idx].name, kind),
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

    /// Multi-row INSERTs with bound parameters. Outside a transaction a
    /// failing statement is retried row by row to locate the offending row.
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

/// The value in its storage class: INTEGER, REAL, TEXT or BLOB.
fn stored(row: &SqliteRow, idx: usize) -> Option<SqlValue> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return Some(v.map(SqlValue::I64).unwrap_or(SqlValue::Null));
    }
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
        return Some(SqlValue::F64(v));
    }
    if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
        return Some(SqlValue::Text(v));
    }
    row.try_get::<Option<Vec<u8>>, _>(idx)
        .ok()
        .map(|v| v.map(SqlValue::Bytes).unwrap_or(SqlValue::Null))
}

/// Decode one column by its declared type, coercing the stored class where
/// affinity left it different. `None` when no coercion applies.
fn decode(row: &SqliteRow, idx: usize, kind: &CanonicalType) -> Option<SqlValue> {
    let value = stored(row, idx)?;
    if value.is_null() {
        return Some(SqlValue::Null);
    }
    Some(match kind {
        CanonicalType::Boolean => SqlValue::Bool(value.as_i64()? != 0),
        CanonicalType::Int16 => SqlValue::I16(i16::try_from(value.as_i64()?).ok()?),
        CanonicalType::Int32 => SqlValue::I32(i32::try_from(value.as_i64()?).ok()?),
        CanonicalType::Int64 => match value {
            SqlValue::Text(s) => SqlValue::I64(s.trim().parse().ok()?),
            other => SqlValue::I64(other.as_i64()?),
        },
        CanonicalType::Float32 | CanonicalType::Float64 => match value {
            SqlValue::F64(v) => SqlValue::F64(v),
            SqlValue::I64(v) => SqlValue::F64(v as f64),
            SqlValue::Text(s) => SqlValue::F64(s.trim().parse().ok()?),
            _ => return None,
        },
        CanonicalType::Decimal { .. } => match value {
            SqlValue::I64(v) => SqlValue::Decimal(Decimal::from(v)),
            SqlValue::F64(v) => SqlValue::Decimal(Decimal::try_from(v).ok()?),
            SqlValue::Text(s) => SqlValue::Decimal(Decimal::from_str(s.trim()).ok()?),
            _ => return None,
        },
        CanonicalType::Binary(_) | CanonicalType::Varbinary(_) | CanonicalType::Blob => match value {
            SqlValue::Bytes(b) => SqlValue::Bytes(b),
            SqlValue::Text(s) => SqlValue::Bytes(s.into_bytes()),
            _ => return None,
        },
        CanonicalType::Date => SqlValue::Date(NaiveDate::parse_from_str(&value.to_text()?, "%Y-%m-%d").ok()?),
        CanonicalType::Time => SqlValue::Time(NaiveTime::from_str(&value.to_text()?).ok()?),
        CanonicalType::DateTime => {
            let text = value.to_text()?;
            let parsed = NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f"))
                .ok()?;
            SqlValue::DateTime(parsed)
        }
        _ => SqlValue::Text(value.to_text()?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::DatabaseInterpreter;
    use std::path::PathBuf;

    fn config(path: PathBuf) -> ConnectionConfig {
        let mut config = ConnectionConfig::new("sqlite");
        config.path = Some(path);
        config
    }

    #[tokio::test]
    async fn test_introspect_and_read_rows() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = SqliteInterpreter::connect(&config(dir.path().join("shop.db")), 2)
            .await
            .unwrap();

        let mut session = interpreter.session().await.unwrap();
        session
            .execute(
                "CREATE TABLE customers (id INTEGER PRIMARY KEY AUTOINCREMENT, name VARCHAR(40) NOT NULL);
                 CREATE TABLE orders (
                     id INTEGER PRIMARY KEY,
                     customer_id INTEGER REFERENCES customers ON DELETE CASCADE,
                     total NUMERIC(10,2),
                     placed DATETIME
                 );
                 CREATE INDEX ix_orders_customer ON orders (customer_id);
                 CREATE VIEW big_orders AS SELECT * FROM orders WHERE total > 100;
                 INSERT INTO customers (name) VALUES ('Ada'), ('Grace');
                 INSERT INTO orders VALUES (1, 1, 150.5, '2024-01-02 03:04:05');",
            )
            .await
            .unwrap();

        let result = interpreter.introspect(&SchemaSelection::default()).await.unwrap();
        assert!(result.issues.is_empty());
        let schema = result.schema;
        assert_eq!(schema.tables.len(), 2);

        let customers = &schema.tables[0];
        assert_eq!(customers.name, "customers");
        assert_eq!(customers.pk_columns(), ["id".to_string()]);
        assert!(customers.columns[0].is_identity);
        assert_eq!(customers.columns[1].max_length, 40);
        assert!(!customers.columns[1].is_nullable);
        assert_eq!(customers.row_count, 2);

        let orders = &schema.tables[1];
        assert_eq!(orders.indexes.len(), 1);
        assert_eq!(orders.foreign_keys.len(), 1);
        assert_eq!(orders.foreign_keys[0].ref_table, "customers");
        assert_eq!(orders.foreign_keys[0].ref_columns, vec!["id".to_string()]);
        assert_eq!(orders.foreign_keys[0].on_delete, "CASCADE");

        assert_eq!(schema.views.len(), 1);
        assert_eq!(schema.views[0].references, vec![ObjectName::new("", "orders")]);

        let rows = session
            .read_rows(orders, 0, 10, ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], SqlValue::I64(1));
        assert_eq!(rows[0][2], SqlValue::Decimal(Decimal::from_str("150.5").unwrap()));
        assert_eq!(
            rows[0][3],
            SqlValue::DateTime(
                NaiveDateTime::parse_from_str("2024-01-02 03:04:05", "%Y-%m-%d %H:%M:%S").unwrap()
            )
        );

        drop(session);
        interpreter.close().await;
    }

    #[tokio::test]
    async fn test_uncommitted_transaction_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = SqliteInterpreter::connect(&config(dir.path().join("t.db")), 1)
            .await
            .unwrap();
        {
            let mut session = interpreter.session().await.unwrap();
            session.execute("CREATE TABLE t (v INTEGER)").await.unwrap();
            session.begin().await.unwrap();
            session.execute("INSERT INTO t VALUES (1)").await.unwrap();
        }
        let mut session = interpreter.session().await.unwrap();
        let table = Table {
            name: "t".into(),
            columns: vec![Column {
                name: "v".into(),
                data_type: "INTEGER".into(),
                is_nullable: true,
                ordinal_pos: 1,
                ..Default::default()
            }],
            ..Default::default()
        };
        let rows = session.read_rows(&table, 0, 10, ReadOptions::default()).await.unwrap();
        assert!(rows.is_empty());
    }

    fn notes_table() -> Table {
        crate::testing::make_test_table(
            "",
            "notes",
            vec![
                crate::testing::make_test_column("id", "INTEGER"),
                crate::testing::make_test_column("body", "TEXT"),
                crate::testing::make_test_column("data", "BLOB"),
            ],
        )
    }

    #[tokio::test]
    async fn test_write_rows_binds_values_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = SqliteInterpreter::connect(&config(dir.path().join("w.db")), 1)
            .await
            .unwrap();
        let mut session = interpreter.session().await.unwrap();
        session
            .execute("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT, data BLOB)")
            .await
            .unwrap();

        let table = notes_table();
        let rows = vec![
            vec![
                SqlValue::I32(1),
                SqlValue::Text("C:\\temp\\new 'quoted' -- not a comment".into()),
                SqlValue::Bytes(vec![0, 0x5c, 0x27]),
            ],
            vec![SqlValue::I32(2), SqlValue::Null, SqlValue::Null],
        ];
        assert_eq!(session.write_rows(&table, &rows).await.unwrap(), 2);

        let read = session.read_rows(&table, 0, 10, ReadOptions::default()).await.unwrap();
        assert_eq!(read[0][1], rows[0][1]);
        assert_eq!(read[0][2], rows[0][2]);
        assert_eq!(read[1][1], SqlValue::Null);
    }

    #[tokio::test]
    async fn test_write_rows_reports_offending_row() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = SqliteInterpreter::connect(&config(dir.path().join("f.db")), 1)
            .await
            .unwrap();
        let mut session = interpreter.session().await.unwrap();
        session
            .execute("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL, data BLOB)")
            .await
            .unwrap();

        let table = notes_table();
        let rows: Vec<ValueRow> = (1..=4)
            .map(|i| {
                let body = if i == 3 { SqlValue::Null } else { SqlValue::Text(format!("row {}", i)) };
                vec![SqlValue::I32(i), body, SqlValue::Null]
            })
            .collect();

        let err = session.write_rows(&table, &rows).await.unwrap_err();
        assert!(matches!(err, ConvertError::Write { row_index: 2, .. }), "{}", err);
        let stored = session.read_rows(&table, 0, 10, ReadOptions::default()).await.unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn test_missing_path_is_config_error() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let err = rt
            .block_on(SqliteInterpreter::connect(&ConnectionConfig::new("sqlite"), 1))
            .err()
            .unwrap();
        assert!(matches!(err, ConvertError::Config(_)));
    }
}
