//! PostgreSQL interpreter.
//!
//! Uses deadpool-postgres for connection pooling with optional rustls TLS.
//! Catalog metadata comes from `pg_catalog` and `information_schema`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, PoolError, RecyclingMethod};
use futures::SinkExt;
use rust_decimal::Decimal;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config as PgConfig, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConnectionConfig, SchemaSelection};
use crate::core::schema::{
    CheckConstraint, Column, DatabaseSchema, ForeignKey, Index, ObjectKind, ObjectName, PrimaryKey,
    Routine, Sequence, Table, Trigger, UserDefinedType, View,
};
use crate::core::traits::{DatabaseInterpreter, Dialect, Introspection, ReadOptions, Session};
use crate::core::value::{Row as ValueRow, SqlValue};
use crate::dialect::canonical::CanonicalType;
use crate::drivers::common::{self, SslMode, TlsBuilder};
use crate::error::{ConvertError, Result};
use crate::script::render::{column_list, qualify};

use super::PostgresDialect;

pub(super) const ENGINE: &str = "postgres";
pub(super) const DEFAULT_PORT: u16 = 5432;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Schemas that belong to the server, not the user.
const USER_SCHEMAS: &str = "n.nspname NOT IN ('pg_catalog', 'information_schema') AND n.nspname NOT LIKE 'pg\\_%'";

/// Classify a driver error by SQLSTATE: class 28 and 42501 are permission
/// failures, class 08 and I/O failures are connection failures.
pub(super) fn classify(err: tokio_postgres::Error) -> ConvertError {
    let message = match err.as_db_error() {
        Some(db) => db.message().to_string(),
        None => err.to_string(),
    };
    match err.code() {
        Some(code) if code.code().starts_with("28") || *code == SqlState::INSUFFICIENT_PRIVILEGE => {
            ConvertError::permission(ENGINE, message)
        }
        Some(code) if code.code().starts_with("08") => ConvertError::connection(ENGINE, message),
        Some(_) => ConvertError::query(ENGINE, message),
        None if err.is_closed() || is_io(&err) => ConvertError::connection(ENGINE, message),
        None => ConvertError::query(ENGINE, message),
    }
}

fn is_io(err: &tokio_postgres::Error) -> bool {
    std::error::Error::source(err)
        .map(|s| s.is::<std::io::Error>())
        .unwrap_or(false)
}

fn pool_error(err: PoolError) -> ConvertError {
    match err {
        PoolError::Backend(e) => match classify(e) {
            ConvertError::Query { message, .. } => ConvertError::connection(ENGINE, message),
            other => other,
        },
        other => ConvertError::connection(ENGINE, other.to_string()),
    }
}

/// A connected PostgreSQL database.
pub struct PostgresInterpreter {
    pool: Pool,
    dialect: Arc<dyn Dialect>,
    database: String,
}

impl PostgresInterpreter {
    /// Open a pool of at most `max_size` connections and test it.
    pub async fn connect(config: &ConnectionConfig, max_size: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port.unwrap_or(DEFAULT_PORT));
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("dbconvert");
        pg_config.connect_timeout(CONNECT_TIMEOUT);

        // Rolls back transactions left open by dropped sessions.
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Custom("ROLLBACK".to_string()),
        };

        let ssl_mode = SslMode::for_connection(config);
        let manager = match TlsBuilder::new(ssl_mode).build()? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
        };
        let pool = Pool::builder(manager)
            .max_size(max_size.max(1))
            .build()
            .map_err(|e| ConvertError::connection(ENGINE, format!("creating pool: {}", e)))?;

        {
            let client = pool.get().await.map_err(pool_error)?;
            client.simple_query("SELECT 1").await.map_err(classify)?;
        }

        info!("Connected to PostgreSQL: {} (pool_size={})", config.describe(), max_size);

        Ok(Self {
            pool,
            dialect: Arc::new(PostgresDialect),
            database: config.database.clone(),
        })
    }

    async fn connection(&self) -> Result<Object> {
        self.pool.get().await.map_err(pool_error)
    }

    async fn load_table(&self, client: &Object, owner: &str, name: &str) -> Result<Table> {
        let mut table = Table {
            owner: owner.to_string(),
            name: name.to_string(),
            ..Default::default()
        };
        load_columns(client, &mut table).await?;
        load_primary_key(client, &mut table).await?;
        load_indexes(client, &mut table).await?;
        load_foreign_keys(client, &mut table).await?;
        load_check_constraints(client, &mut table).await?;
        Ok(table)
    }
}

async fn catalog_query(client: &Object, sql: &str, owner: &str, name: &str) -> Result<Vec<Row>> {
    client.query(sql, &[&owner, &name]).await.map_err(classify)
}

async fn list_query(client: &Object, sql: &str) -> Result<Vec<Row>> {
    client.query(sql, &[]).await.map_err(classify)
}

fn get<'a, T: tokio_postgres::types::FromSql<'a>>(row: &'a Row, idx: usize) -> Result<T> {
    row.try_get(idx).map_err(classify)
}

/// Strip the `CHECK` keyword from `pg_get_constraintdef` output.
fn check_expression(definition: &str) -> String {
    let body = definition.trim();
    let body = body.strip_prefix("CHECK ").unwrap_or(body);
    body.strip_suffix(" NOT VALID").unwrap_or(body).to_string()
}

async fn load_columns(client: &Object, table: &mut Table) -> Result<()> {
    let query = r#"
        SELECT
            c.column_name::text,
            COALESCE(c.domain_name, c.udt_name)::text,
            COALESCE(c.character_maximum_length, 0)::int4,
            COALESCE(c.numeric_precision, 0)::int4,
            COALESCE(c.numeric_scale, 0)::int4,
            c.is_nullable = 'YES',
            c.is_identity = 'YES' OR COALESCE(c.column_default, '') LIKE 'nextval(%',
            CASE WHEN c.is_identity = 'YES' OR c.column_default LIKE 'nextval(%'
                 THEN NULL ELSE c.column_default::text END,
            CASE WHEN c.is_generated = 'ALWAYS' THEN c.generation_expression::text END,
            col_description(format('%I.%I', c.table_schema, c.table_name)::regclass, c.ordinal_position::int4),
            (ROW_NUMBER() OVER (ORDER BY c.ordinal_position))::int4
        FROM information_schema.columns c
        WHERE c.table_schema = $1 AND c.table_name = $2
        ORDER BY c.ordinal_position
    "#;
    let rows = catalog_query(client, query, &table.owner, &table.name).await?;

    for row in rows {
        table.columns.push(Column {
            name: get(&row, 0)?,
            data_type: get(&row, 1)?,
            max_length: get(&row, 2)?,
            precision: get(&row, 3)?,
            scale: get(&row, 4)?,
            is_nullable: get(&row, 5)?,
            is_identity: get(&row, 6)?,
            default_expression: get(&row, 7)?,
            computed_expression: get(&row, 8)?,
            comment: get(&row, 9)?,
            ordinal_pos: get(&row, 10)?,
        });
    }

    debug!("Loaded {} columns for {}", table.columns.len(), table.full_name());
    Ok(())
}

async fn load_primary_key(client: &Object, table: &mut Table) -> Result<()> {
    let query = r#"
        SELECT c.conname::text, a.attname::text
        FROM pg_catalog.pg_constraint c
        JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
        CROSS JOIN LATERAL unnest(c.conkey) WITH ORDINALITY AS k(attnum, ord)
        JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
        WHERE n.nspname = $1 AND t.relname = $2 AND c.contype = 'p'
        ORDER BY k.ord
    "#;
    let rows = catalog_query(client, query, &table.owner, &table.name).await?;

    for row in rows {
        let pk = table.primary_key.get_or_insert_with(|| PrimaryKey {
            name: String::new(),
            columns: Vec::new(),
        });
        pk.name = get(&row, 0)?;
        pk.columns.push(get(&row, 1)?);
    }

    debug!("Primary key for {}: {:?}", table.full_name(), table.pk_columns());
    Ok(())
}

/// Plain column indexes; expression and partial indexes are not modeled.
async fn load_indexes(client: &Object, table: &mut Table) -> Result<()> {
    let query = r#"
        SELECT
            i.relname::text,
            ix.indisunique,
            ix.indisclustered,
            a.attname::text,
            k.ord > ix.indnkeyatts
        FROM pg_catalog.pg_index ix
        JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
        JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
        CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
        JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
        WHERE n.nspname = $1
          AND t.relname = $2
          AND NOT ix.indisprimary
          AND ix.indexprs IS NULL
          AND ix.indpred IS NULL
        ORDER BY i.relname, k.ord
    "#;
    let rows = catalog_query(client, query, &table.owner, &table.name).await?;

    for row in rows {
        let name: String = get(&row, 0)?;
        let column: String = get(&row, 3)?;
        let included: bool = get(&row, 4)?;
        if table.indexes.last().map(|i| i.name != name).unwrap_or(true) {
            table.indexes.push(Index {
                name,
                columns: Vec::new(),
                is_unique: get(&row, 1)?,
                is_clustered: get(&row, 2)?,
                include_cols: Vec::new(),
            });
        }
        if let Some(index) = table.indexes.last_mut() {
            if included {
                index.include_cols.push(column);
            } else {
                index.columns.push(column);
            }
        }
    }

    debug!("Loaded {} indexes for {}", table.indexes.len(), table.full_name());
    Ok(())
}

async fn load_foreign_keys(client: &Object, table: &mut Table) -> Result<()> {
    let query = r#"
        SELECT
            c.conname::text,
            a.attname::text,
            rn.nspname::text,
            rt.relname::text,
            ra.attname::text,
            CASE c.confdeltype
                WHEN 'r' THEN 'RESTRICT'
                WHEN 'c' THEN 'CASCADE'
                WHEN 'n' THEN 'SET NULL'
                WHEN 'd' THEN 'SET DEFAULT'
                ELSE 'NO ACTION'
            END,
            CASE c.confupdtype
                WHEN 'r' THEN 'RESTRICT'
                WHEN 'c' THEN 'CASCADE'
                WHEN 'n' THEN 'SET NULL'
                WHEN 'd' THEN 'SET DEFAULT'
                ELSE 'NO ACTION'
            END
        FROM pg_catalog.pg_constraint c
        JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_catalog.pg_class rt ON rt.oid = c.confrelid
        JOIN pg_catalog.pg_namespace rn ON rn.oid = rt.relnamespace
        CROSS JOIN LATERAL unnest(c.conkey, c.confkey) WITH ORDINALITY AS k(attnum, refnum, ord)
        JOIN pg_catalog.pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum
        JOIN pg_catalog.pg_attribute ra ON ra.attrelid = c.confrelid AND ra.attnum = k.refnum
        WHERE n.nspname = $1 AND t.relname = $2 AND c.contype = 'f'
        ORDER BY c.conname, k.ord
    "#;
    let rows = catalog_query(client, query, &table.owner, &table.name).await?;

    for row in rows {
        let name: String = get(&row, 0)?;
        if table.foreign_keys.last().map(|fk| fk.name != name).unwrap_or(true) {
            table.foreign_keys.push(ForeignKey {
                name,
                columns: Vec::new(),
                ref_owner: get(&row, 2)?,
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

    debug!("Loaded {} foreign keys for {}", table.foreign_keys.len(), table.full_name());
    Ok(())
}

async fn load_check_constraints(client: &Object, table: &mut Table) -> Result<()> {
    let query = r#"
        SELECT c.conname::text, pg_get_constraintdef(c.oid)
        FROM pg_catalog.pg_constraint c
        JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
        WHERE n.nspname = $1 AND t.relname = $2 AND c.contype = 'c'
        ORDER BY c.conname
    "#;
    let rows = catalog_query(client, query, &table.owner, &table.name).await?;

    for row in rows {
        let definition: String = get(&row, 1)?;
        table.check_constraints.push(CheckConstraint {
            name: get(&row, 0)?,
            definition: check_expression(&definition),
        });
    }

    debug!(
        "Loaded {} check constraints for {}",
        table.check_constraints.len(),
        table.full_name()
    );
    Ok(())
}

/// Relations each view reads, from the rewrite rule dependencies.
async fn load_view_references(client: &Object) -> Result<HashMap<(String, String), Vec<ObjectName>>> {
    let query = r#"
        SELECT DISTINCT vn.nspname::text, v.relname::text, rn.nspname::text, r.relname::text
        FROM pg_catalog.pg_depend d
        JOIN pg_catalog.pg_rewrite w ON w.oid = d.objid
        JOIN pg_catalog.pg_class v ON v.oid = w.ev_class
        JOIN pg_catalog.pg_namespace vn ON vn.oid = v.relnamespace
        JOIN pg_catalog.pg_class r ON r.oid = d.refobjid
        JOIN pg_catalog.pg_namespace rn ON rn.oid = r.relnamespace
        WHERE d.classid = 'pg_catalog.pg_rewrite'::regclass
          AND d.refclassid = 'pg_catalog.pg_class'::regclass
          AND r.oid <> v.oid
    "#;
    let mut references: HashMap<(String, String), Vec<ObjectName>> = HashMap::new();
    for row in list_query(client, query).await? {
        references
            .entry((get(&row, 0)?, get(&row, 1)?))
            .or_default()
            .push(ObjectName::new(get::<String>(&row, 2)?, get::<String>(&row, 3)?));
    }
    Ok(references)
}

#[async_trait]
impl DatabaseInterpreter for PostgresInterpreter {
    fn engine(&self) -> &str {
        ENGINE
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.clone()
    }

    async fn introspect(&self, selection: &SchemaSelection) -> Result<Introspection> {
        let client = self.connection().await?;
        let mut schema = DatabaseSchema::new(&self.database);
        let mut issues = Vec::new();

        if selection.includes_kind(ObjectKind::Table) {
            let query = format!(
                r#"
                SELECT n.nspname::text, c.relname::text, obj_description(c.oid, 'pg_class'),
                       GREATEST(c.reltuples, 0)::int8
                FROM pg_catalog.pg_class c
                JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
                WHERE c.relkind IN ('r', 'p') AND NOT c.relispartition AND {}
                ORDER BY 1, 2
                "#,
                USER_SCHEMAS
            );
            for row in list_query(&client, &query).await? {
                let owner: String = get(&row, 0)?;
                let name: String = get(&row, 1)?;
                if !selection.includes_table(&owner, &name) {
                    continue;
                }
                match self.load_table(&client, &owner, &name).await {
                    Ok(mut table) => match table.validate_ordinals() {
                        Ok(()) => {
                            table.comment = get(&row, 2)?;
                            table.row_count = get(&row, 3)?;
                            schema.tables.push(table);
                        }
                        Err(message) => issues.push(ConvertError::partial(table.full_name(), message)),
                    },
                    Err(e) if common::is_fatal(&e) => return Err(e),
                    Err(e) => issues.push(ConvertError::partial(format!("{}.{}", owner, name), e.to_string())),
                }
            }
        }

        if selection.includes_kind(ObjectKind::View) {
            let references = load_view_references(&client).await?;
            let query = format!(
                r#"
                SELECT n.nspname::text, c.relname::text, pg_get_viewdef(c.oid, true),
                       obj_description(c.oid, 'pg_class')
                FROM pg_catalog.pg_class c
                JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
                WHERE c.relkind = 'v' AND {}
                ORDER BY 1, 2
                "#,
                USER_SCHEMAS
            );
            for row in list_query(&client, &query).await? {
                let owner: String = get(&row, 0)?;
                let name: String = get(&row, 1)?;
                if !selection.includes_owner(&owner) {
                    continue;
                }
                match get::<Option<String>>(&row, 2)? {
                    Some(body) => schema.views.push(View {
                        references: references
                            .get(&(owner.clone(), name.clone()))
                            .cloned()
                            .unwrap_or_default(),
                        definition: body.trim_end().trim_end_matches(';').to_string(),
                        owner,
                        name,
                        comment: get(&row, 3)?,
                    }),
                    None => issues.push(ConvertError::partial(
                        format!("{}.{}", owner, name),
                        "view definition is not visible",
                    )),
                }
            }
        }

        if selection.includes_kind(ObjectKind::Function) || selection.includes_kind(ObjectKind::Procedure) {
            let query = format!(
                r#"
                SELECT n.nspname::text, p.proname::text, p.prokind::text, pg_get_functiondef(p.oid)
                FROM pg_catalog.pg_proc p
                JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
                WHERE p.prokind IN ('f', 'p') AND {}
                  AND NOT EXISTS (
                      SELECT 1 FROM pg_catalog.pg_depend d
                      WHERE d.objid = p.oid AND d.deptype = 'e'
                  )
                ORDER BY 1, 2, p.oid
                "#,
                USER_SCHEMAS
            );
            let mut seen = HashSet::new();
            for row in list_query(&client, &query).await? {
                let owner: String = get(&row, 0)?;
                let name: String = get(&row, 1)?;
                let kind = if get::<String>(&row, 2)? == "p" {
                    ObjectKind::Procedure
                } else {
                    ObjectKind::Function
                };
                if !selection.includes_owner(&owner) || !selection.includes_kind(kind) {
                    continue;
                }
                if !seen.insert((owner.clone(), name.clone())) {
                    issues.push(ConvertError::partial(
                        format!("{}.{}", owner, name),
                        format!("overloaded {} is not supported; only the first definition is kept", kind),
                    ));
                    continue;
                }
                let routine = Routine {
                    owner,
                    name,
                    definition: get(&row, 3)?,
                    references: Vec::new(),
                };
                match kind {
                    ObjectKind::Procedure => schema.procedures.push(routine),
                    _ => schema.functions.push(routine),
                }
            }
        }

        if selection.includes_kind(ObjectKind::Trigger) {
            let query = format!(
                r#"
                SELECT n.nspname::text, tg.tgname::text, c.relname::text, pg_get_triggerdef(tg.oid, true)
                FROM pg_catalog.pg_trigger tg
                JOIN pg_catalog.pg_class c ON c.oid = tg.tgrelid
                JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
                WHERE NOT tg.tgisinternal AND {}
                ORDER BY 1, 2
                "#,
                USER_SCHEMAS
            );
            for row in list_query(&client, &query).await? {
                let owner: String = get(&row, 0)?;
                let table: String = get(&row, 2)?;
                if !selection.includes_table(&owner, &table) {
                    continue;
                }
                schema.triggers.push(Trigger {
                    name: get(&row, 1)?,
                    table: ObjectName::new(&owner, table),
                    owner,
                    definition: get(&row, 3)?,
                });
            }
        }

        if selection.includes_kind(ObjectKind::Sequence) {
            // Sequences owned by serial and identity columns travel with their tables.
            let query = format!(
                r#"
                SELECT n.nspname::text, c.relname::text, s.data_type::text, s.start_value,
                       s.increment_by, s.min_value, s.max_value, s.cycle
                FROM pg_catalog.pg_sequences s
                JOIN pg_catalog.pg_namespace n ON n.nspname = s.schemaname
                JOIN pg_catalog.pg_class c ON c.relnamespace = n.oid AND c.relname = s.sequencename
                WHERE {}
                  AND NOT EXISTS (
                      SELECT 1 FROM pg_catalog.pg_depend d
                      WHERE d.objid = c.oid AND d.deptype IN ('a', 'i')
                  )
                ORDER BY 1, 2
                "#,
                USER_SCHEMAS
            );
            for row in list_query(&client, &query).await? {
                let owner: String = get(&row, 0)?;
                if !selection.includes_owner(&owner) {
                    continue;
                }
                schema.sequences.push(Sequence {
                    owner,
                    name: get(&row, 1)?,
                    data_type: get(&row, 2)?,
                    start_value: get(&row, 3)?,
                    increment: get(&row, 4)?,
                    min_value: get(&row, 5)?,
                    max_value: get(&row, 6)?,
                    cycle: get(&row, 7)?,
                });
            }
        }

        if selection.includes_kind(ObjectKind::UserType) {
            let query = format!(
                r#"
                SELECT n.nspname::text, t.typname::text, d.data_type::text,
                       COALESCE(d.character_maximum_length, 0)::int4,
                       COALESCE(d.numeric_precision, 0)::int4,
                       COALESCE(d.numeric_scale, 0)::int4,
                       NOT t.typnotnull
                FROM pg_catalog.pg_type t
                JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
                JOIN information_schema.domains d
                    ON d.domain_schema = n.nspname AND d.domain_name = t.typname
                WHERE t.typtype = 'd' AND {}
                ORDER BY 1, 2
                "#,
                USER_SCHEMAS
            );
            for row in list_query(&client, &query).await? {
                let owner: String = get(&row, 0)?;
                if !selection.includes_owner(&owner) {
                    continue;
                }
                schema.user_types.push(UserDefinedType {
                    owner,
                    name: get(&row, 1)?,
                    base_type: get(&row, 2)?,
                    max_length: get(&row, 3)?,
                    precision: get(&row, 4)?,
                    scale: get(&row, 5)?,
                    is_nullable: get(&row, 6)?,
                });
            }
        }

        // The catalog does not record what routine bodies reference.
        schema.infer_references();

        info!(
            "Introspected PostgreSQL database {}: {} tables, {} views, {} routines, {} skipped",
            self.database,
            schema.tables.len(),
            schema.views.len(),
            schema.functions.len() + schema.procedures.len(),
            issues.len()
        );
        Ok(Introspection { schema, issues })
    }

    async fn session(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(PostgresSession {
            client: self.connection().await?,
            dialect: self.dialect.clone(),
            in_transaction: false,
        }))
    }

    async fn close(&self) {
        self.pool.close();
        debug!("PostgreSQL pool closed");
    }
}

/// Flush the COPY buffer once it holds this many bytes.
const COPY_FLUSH_BYTES: usize = 1024 * 1024;

/// One pooled PostgreSQL connection.
struct PostgresSession {
    client: Object,
    dialect: Arc<dyn Dialect>,
    in_transaction: bool,
}

impl PostgresSession {
    /// Load rows with one `COPY ... FROM STDIN`. The statement is atomic:
    /// on failure no row is stored.
    async fn copy_rows(&mut self, table: &Table, rows: &[ValueRow]) -> Result<u64> {
        let sink = self
            .client
            .copy_in(&copy_statement(self.dialect.as_ref(), table))
            .await
            .map_err(classify)?;
        futures::pin_mut!(sink);

        let mut buf = BytesMut::with_capacity(COPY_FLUSH_BYTES);
        for row in rows {
            encode_copy_row(row, &mut buf);
            if buf.len() >= COPY_FLUSH_BYTES {
                sink.send(buf.split().freeze()).await.map_err(classify)?;
            }
        }
        if !buf.is_empty() {
            sink.send(buf.split().freeze()).await.map_err(classify)?;
        }
        sink.finish().await.map_err(classify)
    }
}

fn copy_statement(dialect: &dyn Dialect, table: &Table) -> String {
    let columns: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT text)",
        qualify(dialect, &table.owner, &table.name, true),
        column_list(dialect, &columns, true)
    )
}

/// Append one row in COPY text format: tab separated, newline terminated.
fn encode_copy_row(row: &[SqlValue], buf: &mut BytesMut) {
    for (i, value) in row.iter().enumerate() {
        if i > 0 {
            buf.put_u8(b'\t');
        }
        buf.extend_from_slice(copy_text(value).as_bytes());
    }
    buf.put_u8(b'\n');
}

fn copy_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "\\N".to_string(),
        SqlValue::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        SqlValue::I16(n) => n.to_string(),
        SqlValue::I32(n) => n.to_string(),
        SqlValue::I64(n) => n.to_string(),
        SqlValue::F32(n) => float_text(n.is_nan(), n.is_infinite(), n.is_sign_negative(), || n.to_string()),
        SqlValue::F64(n) => float_text(n.is_nan(), n.is_infinite(), n.is_sign_negative(), || n.to_string()),
        SqlValue::Text(s) => escape_copy_text(s),
        // bytea hex input; the backslash itself is escaped for COPY.
        SqlValue::Bytes(b) => format!("\\\\x{}", hex::encode(b)),
        SqlValue::Uuid(u) => u.to_string(),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        SqlValue::DateTimeOffset(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string(),
        SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        SqlValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
    }
}

fn float_text(nan: bool, infinite: bool, negative: bool, finite: impl FnOnce() -> String) -> String {
    match (nan, infinite, negative) {
        (true, _, _) => "NaN".to_string(),
        (false, true, false) => "Infinity".to_string(),
        (false, true, true) => "-Infinity".to_string(),
        _ => finite(),
    }
}

/// Escape the characters COPY text format treats specially.
fn escape_copy_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

#[async_trait]
impl Session for PostgresSession {
    fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.clone()
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.client.execute(sql, &[]).await.map_err(classify)
    }

    async fn read_rows(&mut self, table: &Table, offset: u64, limit: usize, options: ReadOptions) -> Result<Vec<ValueRow>> {
        let sql = self.dialect.select_page(table, offset, limit);
        let kinds: Vec<CanonicalType> = table
            .columns
            .iter()
            .map(|c| common::canonical_of(self.dialect.as_ref(), c))
            .collect();

        let rows = self.client.query(&sql, &[]).await.map_err(|e| match classify(e) {
            ConvertError::Query { message, .. } => ConvertError::read(table.full_name(), message),
            other => other,
        })?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(kinds.len());
            for (idx, kind) in kinds.iter().enumerate() {
                let value = match decode(&row, idx, kind) {
                    Ok(v) => v,
                    Err(_) if options.treat_unreadable_bytes_as_null && (kind.is_binary() || kind.is_character()) => {
                        SqlValue::Null
                    }
                    Err(e) => {
                        return Err(ConvertError::read(
                            table.full_name(),
                            format!("column {}: {}", table.columns[idx].name, e),
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
        self.client
            .batch_execute(self.dialect.begin_transaction_sql())
            .await
            .map_err(classify)?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.in_transaction = false;
        self.client
            .batch_execute(self.dialect.commit_sql())
            .await
            .map_err(classify)
    }

    async fn rollback(&mut self) -> Result<()> {
        self.in_transaction = false;
        self.client
            .batch_execute(self.dialect.rollback_sql())
            .await
            .map_err(classify)
    }

    /// Rows travel through COPY. When the batch fails outside a transaction
    /// the rows are copied one at a time to locate the offending row; rows
    /// before it stay written.
    async fn write_rows(&mut self, table: &Table, rows: &[ValueRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let err = match self.copy_rows(table, rows).await {
            Ok(copied) => return Ok(copied),
            Err(e) => e,
        };
        if rows.len() == 1 || self.in_transaction {
            return Err(ConvertError::write(table.full_name(), 0, err.to_string()));
        }

        debug!("{}: COPY failed, locating the offending row", table.full_name());
        let mut written = 0u64;
        for (i, row) in rows.iter().enumerate() {
            if let Err(e) = self.copy_rows(table, std::slice::from_ref(row)).await {
                return Err(ConvertError::write(table.full_name(), i, e.to_string()));
            }
            written += 1;
        }
        Ok(written)
    }
}

/// Decode one column by its canonical type.
fn decode(row: &Row, idx: usize, kind: &CanonicalType) -> std::result::Result<SqlValue, tokio_postgres::Error> {
    let value = match kind {
        CanonicalType::Boolean => row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool),
        CanonicalType::Int16 => row.try_get::<_, Option<i16>>(idx)?.map(SqlValue::I16),
        CanonicalType::Int32 => row.try_get::<_, Option<i32>>(idx)?.map(SqlValue::I32),
        CanonicalType::Int64 => row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::I64),
        CanonicalType::Float32 => row.try_get::<_, Option<f32>>(idx)?.map(SqlValue::F32),
        CanonicalType::Float64 => row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::F64),
        CanonicalType::Decimal { .. } | CanonicalType::Money => {
            row.try_get::<_, Option<Decimal>>(idx)?.map(SqlValue::Decimal)
        }
        CanonicalType::Binary(_) | CanonicalType::Varbinary(_) | CanonicalType::Blob => {
            row.try_get::<_, Option<Vec<u8>>>(idx)?.map(SqlValue::Bytes)
        }
        CanonicalType::Date => row.try_get::<_, Option<NaiveDate>>(idx)?.map(SqlValue::Date),
        CanonicalType::Time => row.try_get::<_, Option<NaiveTime>>(idx)?.map(SqlValue::Time),
        CanonicalType::DateTime => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(SqlValue::DateTime),
        CanonicalType::DateTimeTz => row
            .try_get::<_, Option<DateTime<FixedOffset>>>(idx)?
            .map(SqlValue::DateTimeOffset),
        CanonicalType::Uuid => row.try_get::<_, Option<Uuid>>(idx)?.map(SqlValue::Uuid),
        _ => row.try_get::<_, Option<String>>(idx)?.map(SqlValue::Text),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_expression_strips_keyword() {
        assert_eq!(check_expression("CHECK ((price > 0))"), "((price > 0))");
        assert_eq!(check_expression("CHECK ((qty >= 0)) NOT VALID"), "((qty >= 0))");
        assert_eq!(check_expression("(a <> b)"), "(a <> b)");
    }

    #[test]
    fn test_copy_text_escapes_specials() {
        assert_eq!(copy_text(&SqlValue::Null), "\\N");
        assert_eq!(copy_text(&SqlValue::Text("a\\b\tc\nd\re".into())), "a\\\\b\\tc\\nd\\re");
        assert_eq!(copy_text(&SqlValue::Text("\\N".into())), "\\\\N");
        assert_eq!(copy_text(&SqlValue::Bool(true)), "t");
        assert_eq!(copy_text(&SqlValue::Bytes(vec![0xde, 0xad])), "\\\\xdead");
        assert_eq!(copy_text(&SqlValue::F64(f64::NEG_INFINITY)), "-Infinity");
        assert_eq!(copy_text(&SqlValue::F32(f32::NAN)), "NaN");
        assert_eq!(copy_text(&SqlValue::F32(0.1)), "0.1");
    }

    #[test]
    fn test_copy_temporal_formats() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_micro_opt(8, 5, 1, 250_000)
            .unwrap();
        assert_eq!(copy_text(&SqlValue::DateTime(ts)), "2024-03-09 08:05:01.250");
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(
            copy_text(&SqlValue::DateTimeOffset(ts.and_local_timezone(offset).unwrap())),
            "2024-03-09 08:05:01.250+02:00"
        );
        assert_eq!(copy_text(&SqlValue::Date(ts.date())), "2024-03-09");
    }

    #[test]
    fn test_copy_row_layout() {
        let mut buf = BytesMut::new();
        encode_copy_row(&[SqlValue::I32(1), SqlValue::Null, SqlValue::Text("x".into())], &mut buf);
        encode_copy_row(&[SqlValue::I32(2), SqlValue::Bool(false), SqlValue::Text(String::new())], &mut buf);
        assert_eq!(&buf[..], b"1\t\\N\tx\n2\tf\t\n");
    }

    #[test]
    fn test_copy_statement_quotes_names() {
        let table = crate::testing::make_test_table(
            "public",
            "Order Items",
            vec![crate::testing::make_test_column("id", "integer")],
        );
        assert_eq!(
            copy_statement(&PostgresDialect, &table),
            "COPY \"public\".\"Order Items\" (\"id\") FROM STDIN WITH (FORMAT text)"
        );
    }

    #[test]
    fn test_user_schema_filter_excludes_system_schemas() {
        assert!(USER_SCHEMAS.contains("'pg_catalog'"));
        assert!(USER_SCHEMAS.contains("'information_schema'"));
    }
}
