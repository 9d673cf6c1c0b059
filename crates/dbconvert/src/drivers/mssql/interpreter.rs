//! SQL Server interpreter.
//!
//! Uses Tiberius with a bb8 connection pool. Catalog metadata comes from the
//! `sys` views; rows are read with `OFFSET .. FETCH` pages.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection, RunError};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query, Row, TokenRow};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
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
use crate::drivers::common;
use crate::error::{ConvertError, Result};
use crate::script::render::qualify;

use super::bulk::{self, bind_value};
use super::MssqlDialect;

pub(super) const ENGINE: &str = "mssql";
pub(super) const DEFAULT_PORT: u16 = 1433;

/// Maximum TDS packet size (32767 bytes, ~32KB).
const TDS_MAX_PACKET_SIZE: u32 = 32767;

/// Connection acquisition timeout from pool (30 seconds).
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connection timeout (5 minutes).
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Bind parameters per INSERT; SQL Server accepts at most 2100.
const MAX_INSERT_PARAMS: usize = 2000;

/// Login failures and denied object access.
const PERMISSION_CODES: [u32; 3] = [18456, 229, 230];

type TdsClient = Client<Compat<TcpStream>>;

/// Classify a Tiberius error by its server error number.
pub(super) fn classify(err: tiberius::error::Error) -> ConvertError {
    match &err {
        tiberius::error::Error::Server(token) if PERMISSION_CODES.contains(&token.code()) => {
            ConvertError::permission(ENGINE, token.message())
        }
        tiberius::error::Error::Io { .. }
        | tiberius::error::Error::Tls(_)
        | tiberius::error::Error::Routing { .. } => ConvertError::connection(ENGINE, err.to_string()),
        _ => ConvertError::query(ENGINE, err.to_string()),
    }
}

fn pool_error(err: RunError<tiberius::error::Error>) -> ConvertError {
    match err {
        RunError::User(e) => match classify(e) {
            ConvertError::Query { message, .. } => ConvertError::connection(ENGINE, message),
            other => other,
        },
        RunError::TimedOut => ConvertError::connection(ENGINE, "timed out waiting for a pooled connection"),
    }
}

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: ConnectionConfig,
}

impl TiberiusConnectionManager {
    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port.unwrap_or(DEFAULT_PORT));
        if !self.config.database.is_empty() {
            config.database(&self.config.database);
        }

        match self.config.integrated_auth {
            #[cfg(feature = "kerberos")]
            true => {
                info!("Using integrated authentication for SQL Server");
                config.authentication(AuthMethod::Integrated);
            }
            _ => {
                config.authentication(AuthMethod::sql_server(&self.config.user, &self.config.password));
            }
        }

        if self.config.encrypt {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config.packet_size(TDS_MAX_PACKET_SIZE);
        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = TdsClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;
        tcp.set_nodelay(true).ok();
        Client::connect(config, tcp.compat_write()).await
    }

    /// Also rolls back a transaction left open by a dropped session.
    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION; SELECT 1")
            .await?
            .into_row()
            .await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// A connected SQL Server database.
pub struct MssqlInterpreter {
    pool: Pool<TiberiusConnectionManager>,
    dialect: Arc<dyn Dialect>,
    database: String,
}

impl MssqlInterpreter {
    /// Open a pool of at most `max_size` connections and test it.
    pub async fn connect(config: &ConnectionConfig, max_size: usize) -> Result<Self> {
        if config.integrated_auth && !cfg!(feature = "kerberos") {
            return Err(ConvertError::Config(
                "Integrated authentication requires the 'kerberos' feature".into(),
            ));
        }
        if !config.encrypt {
            warn!("SQL Server encryption is disabled. Credentials will be transmitted in plaintext.");
        }

        let manager = TiberiusConnectionManager {
            config: config.clone(),
        };
        let pool = Pool::builder()
            .max_size(max_size.max(1) as u32)
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| match classify(e) {
                ConvertError::Query { message, .. } => ConvertError::connection(ENGINE, message),
                other => other,
            })?;

        {
            let mut conn = pool.get().await.map_err(pool_error)?;
            conn.simple_query("SELECT 1")
                .await
                .map_err(classify)?
                .into_row()
                .await
                .map_err(classify)?;
        }

        info!("Connected to SQL Server: {} (pool_size={})", config.describe(), max_size);

        Ok(Self {
            pool,
            dialect: Arc::new(MssqlDialect),
            database: config.database.clone(),
        })
    }

    async fn connection(&self) -> Result<PooledConnection<'static, TiberiusConnectionManager>> {
        self.pool.get_owned().await.map_err(pool_error)
    }

    async fn load_table(&self, conn: &mut TdsClient, owner: &str, name: &str) -> Result<Table> {
        let mut table = Table {
            owner: owner.to_string(),
            name: name.to_string(),
            ..Default::default()
        };
        load_columns(conn, &mut table).await?;
        load_primary_key(conn, &mut table).await?;
        load_indexes(conn, &mut table).await?;
        load_foreign_keys(conn, &mut table).await?;
        load_check_constraints(conn, &mut table).await?;
        load_row_count(conn, &mut table).await?;
        Ok(table)
    }
}

async fn catalog_query(conn: &mut TdsClient, sql: &str, params: &[&str]) -> Result<Vec<Row>> {
    let mut query = Query::new(sql);
    for param in params {
        query.bind(*param);
    }
    let stream = query.query(conn).await.map_err(classify)?;
    stream.into_first_result().await.map_err(classify)
}

fn text(row: &Row, idx: usize) -> Result<String> {
    Ok(opt_text(row, idx)?.unwrap_or_default())
}

fn opt_text(row: &Row, idx: usize) -> Result<Option<String>> {
    Ok(row
        .try_get::<&str, _>(idx)
        .map_err(classify)?
        .map(str::to_string))
}

fn int(row: &Row, idx: usize) -> Result<i32> {
    Ok(row.try_get::<i32, _>(idx).map_err(classify)?.unwrap_or(0))
}

fn big(row: &Row, idx: usize) -> Result<Option<i64>> {
    row.try_get::<i64, _>(idx).map_err(classify)
}

fn flag(row: &Row, idx: usize) -> Result<bool> {
    Ok(row.try_get::<bool, _>(idx).map_err(classify)?.unwrap_or(false))
}

/// `sys.columns.max_length` is in bytes; Unicode types store two per character.
fn char_length(data_type: &str, max_length: i32) -> i32 {
    match data_type.to_lowercase().as_str() {
        "nchar" | "nvarchar" if max_length > 0 => max_length / 2,
        _ => max_length,
    }
}

/// `NO_ACTION` -> `NO ACTION`
fn referential_action(desc: &str) -> String {
    desc.replace('_', " ")
}

const OBJECT_FILTER: &str = "OBJECT_ID(QUOTENAME(@P1) + '.' + QUOTENAME(@P2))";

async fn load_columns(conn: &mut TdsClient, table: &mut Table) -> Result<()> {
    let query = format!(
        r#"
        SELECT
            c.name,
            TYPE_NAME(c.user_type_id),
            CAST(c.max_length AS int),
            CAST(c.precision AS int),
            CAST(c.scale AS int),
            c.is_nullable,
            c.is_identity,
            dc.definition,
            cc.definition,
            CAST(ep.value AS nvarchar(max)),
            CAST(ROW_NUMBER() OVER (ORDER BY c.column_id) AS int)
        FROM sys.columns c
        LEFT JOIN sys.default_constraints dc ON dc.object_id = c.default_object_id
        LEFT JOIN sys.computed_columns cc ON cc.object_id = c.object_id AND cc.column_id = c.column_id
        LEFT JOIN sys.extended_properties ep
            ON ep.class = 1 AND ep.major_id = c.object_id AND ep.minor_id = c.column_id
            AND ep.name = 'MS_Description'
        WHERE c.object_id = {}
        ORDER BY c.column_id
        "#,
        OBJECT_FILTER
    );
    let rows = catalog_query(conn, &query, &[&table.owner, &table.name]).await?;

    for row in rows {
        let data_type = text(&row, 1)?;
        let max_length = char_length(&data_type, int(&row, 2)?);
        table.columns.push(Column {
            name: text(&row, 0)?,
            data_type,
            max_length,
            precision: int(&row, 3)?,
            scale: int(&row, 4)?,
            is_nullable: flag(&row, 5)?,
            is_identity: flag(&row, 6)?,
            default_expression: opt_text(&row, 7)?,
            computed_expression: opt_text(&row, 8)?,
            comment: opt_text(&row, 9)?,
            ordinal_pos: int(&row, 10)?,
        });
    }

    debug!("Loaded {} columns for {}", table.columns.len(), table.full_name());
    Ok(())
}

async fn load_primary_key(conn: &mut TdsClient, table: &mut Table) -> Result<()> {
    let query = format!(
        r#"
        SELECT kc.name, col.name
        FROM sys.key_constraints kc
        JOIN sys.index_columns ic
            ON ic.object_id = kc.parent_object_id AND ic.index_id = kc.unique_index_id
        JOIN sys.columns col ON col.object_id = ic.object_id AND col.column_id = ic.column_id
        WHERE kc.type = 'PK' AND kc.parent_object_id = {}
        ORDER BY ic.key_ordinal
        "#,
        OBJECT_FILTER
    );
    let rows = catalog_query(conn, &query, &[&table.owner, &table.name]).await?;

    for row in rows {
        let pk = table.primary_key.get_or_insert_with(|| PrimaryKey {
            name: String::new(),
            columns: Vec::new(),
        });
        pk.name = text(&row, 0)?;
        pk.columns.push(text(&row, 1)?);
    }

    debug!("Primary key for {}: {:?}", table.full_name(), table.pk_columns());
    Ok(())
}

async fn load_indexes(conn: &mut TdsClient, table: &mut Table) -> Result<()> {
    let query = format!(
        r#"
        SELECT
            i.name,
            i.is_unique,
            CAST(CASE WHEN i.type = 1 THEN 1 ELSE 0 END AS bit),
            col.name,
            ic.is_included_column
        FROM sys.indexes i
        JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
        JOIN sys.columns col ON col.object_id = ic.object_id AND col.column_id = ic.column_id
        WHERE i.object_id = {}
          AND i.is_primary_key = 0
          AND i.is_hypothetical = 0
          AND i.type IN (1, 2)
        ORDER BY i.name, ic.is_included_column, ic.key_ordinal, ic.index_column_id
        "#,
        OBJECT_FILTER
    );
    let rows = catalog_query(conn, &query, &[&table.owner, &table.name]).await?;

    for row in rows {
        let name = text(&row, 0)?;
        let column = text(&row, 3)?;
        let included = flag(&row, 4)?;
        if table.indexes.last().map(|i| i.name != name).unwrap_or(true) {
            table.indexes.push(Index {
                name,
                columns: Vec::new(),
                is_unique: flag(&row, 1)?,
                is_clustered: flag(&row, 2)?,
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

async fn load_foreign_keys(conn: &mut TdsClient, table: &mut Table) -> Result<()> {
    let query = format!(
        r#"
        SELECT
            fk.name,
            pc.name,
            rs.name,
            rt.name,
            rc.name,
            fk.delete_referential_action_desc,
            fk.update_referential_action_desc
        FROM sys.foreign_keys fk
        JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id
        JOIN sys.columns pc ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id
        JOIN sys.tables rt ON rt.object_id = fkc.referenced_object_id
        JOIN sys.schemas rs ON rs.schema_id = rt.schema_id
        JOIN sys.columns rc
            ON rc.object_id = fkc.referenced_object_id AND rc.column_id = fkc.referenced_column_id
        WHERE fk.parent_object_id = {}
        ORDER BY fk.name, fkc.constraint_column_id
        "#,
        OBJECT_FILTER
    );
    let rows = catalog_query(conn, &query, &[&table.owner, &table.name]).await?;

    for row in rows {
        let name = text(&row, 0)?;
        if table.foreign_keys.last().map(|fk| fk.name != name).unwrap_or(true) {
            table.foreign_keys.push(ForeignKey {
                name,
                columns: Vec::new(),
                ref_owner: text(&row, 2)?,
                ref_table: text(&row, 3)?,
                ref_columns: Vec::new(),
                on_delete: referential_action(&text(&row, 5)?),
                on_update: referential_action(&text(&row, 6)?),
            });
        }
        if let Some(fk) = table.foreign_keys.last_mut() {
            fk.columns.push(text(&row, 1)?);
            fk.ref_columns.push(text(&row, 4)?);
        }
    }

    debug!("Loaded {} foreign keys for {}", table.foreign_keys.len(), table.full_name());
    Ok(())
}

async fn load_check_constraints(conn: &mut TdsClient, table: &mut Table) -> Result<()> {
    let query = format!(
        "SELECT name, definition FROM sys.check_constraints WHERE parent_object_id = {} ORDER BY name",
        OBJECT_FILTER
    );
    let rows = catalog_query(conn, &query, &[&table.owner, &table.name]).await?;
    for row in rows {
        table.check_constraints.push(CheckConstraint {
            name: text(&row, 0)?,
            definition: text(&row, 1)?,
        });
    }
    Ok(())
}

/// Approximate row count from sys.partitions.
async fn load_row_count(conn: &mut TdsClient, table: &mut Table) -> Result<()> {
    let query = format!(
        r#"
        SELECT CAST(SUM(p.rows) AS bigint)
        FROM sys.partitions p
        WHERE p.object_id = {} AND p.index_id IN (0, 1)
        "#,
        OBJECT_FILTER
    );
    let rows = catalog_query(conn, &query, &[&table.owner, &table.name]).await?;
    if let Some(row) = rows.first() {
        table.row_count = big(row, 0)?.unwrap_or(0);
    }
    debug!("Row count for {}: {}", table.full_name(), table.row_count);
    Ok(())
}

/// Referenced objects per referencing object, from sys.sql_expression_dependencies.
async fn load_references(conn: &mut TdsClient) -> Result<HashMap<(String, String), Vec<ObjectName>>> {
    let query = r#"
        SELECT
            OBJECT_SCHEMA_NAME(d.referencing_id),
            OBJECT_NAME(d.referencing_id),
            COALESCE(d.referenced_schema_name, OBJECT_SCHEMA_NAME(d.referencing_id)),
            d.referenced_entity_name
        FROM sys.sql_expression_dependencies d
        WHERE d.referenced_database_name IS NULL
          AND d.referenced_server_name IS NULL
          AND d.referenced_entity_name IS NOT NULL
    "#;
    let rows = catalog_query(conn, query, &[]).await?;
    let mut references: HashMap<(String, String), Vec<ObjectName>> = HashMap::new();
    for row in rows {
        let target = ObjectName::new(text(&row, 2)?, text(&row, 3)?);
        let entry = references.entry((text(&row, 0)?, text(&row, 1)?)).or_default();
        if !entry.contains(&target) {
            entry.push(target);
        }
    }
    Ok(references)
}

#[async_trait]
impl DatabaseInterpreter for MssqlInterpreter {
    fn engine(&self) -> &str {
        ENGINE
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.clone()
    }

    async fn introspect(&self, selection: &SchemaSelection) -> Result<Introspection> {
        let mut pooled = self.connection().await?;
        let conn: &mut TdsClient = &mut pooled;
        let mut schema = DatabaseSchema::new(&self.database);
        let mut issues = Vec::new();

        if selection.includes_kind(ObjectKind::Table) {
            let query = r#"
                SELECT s.name, t.name, CAST(ep.value AS nvarchar(max))
                FROM sys.tables t
                JOIN sys.schemas s ON s.schema_id = t.schema_id
                LEFT JOIN sys.extended_properties ep
                    ON ep.class = 1 AND ep.major_id = t.object_id AND ep.minor_id = 0
                    AND ep.name = 'MS_Description'
                WHERE t.is_ms_shipped = 0
                ORDER BY s.name, t.name
            "#;
            for row in catalog_query(conn, query, &[]).await? {
                let (owner, name) = (text(&row, 0)?, text(&row, 1)?);
                if !selection.includes_table(&owner, &name) {
                    continue;
                }
                match self.load_table(conn, &owner, &name).await {
                    Ok(mut table) => match table.validate_ordinals() {
                        Ok(()) => {
                            table.comment = opt_text(&row, 2)?;
                            schema.tables.push(table);
                        }
                        Err(message) => issues.push(ConvertError::partial(table.full_name(), message)),
                    },
                    Err(e) if common::is_fatal(&e) => return Err(e),
                    Err(e) => issues.push(ConvertError::partial(format!("{}.{}", owner, name), e.to_string())),
                }
            }
        }

        let wants_code = [ObjectKind::View, ObjectKind::Function, ObjectKind::Procedure]
            .iter()
            .any(|k| selection.includes_kind(*k));
        let references = if wants_code {
            load_references(conn).await?
        } else {
            HashMap::new()
        };
        let references_of = |owner: &str, name: &str| {
            references
                .get(&(owner.to_string(), name.to_string()))
                .cloned()
                .unwrap_or_default()
        };

        if selection.includes_kind(ObjectKind::View) {
            let query = r#"
                SELECT s.name, v.name, OBJECT_DEFINITION(v.object_id), CAST(ep.value AS nvarchar(max))
                FROM sys.views v
                JOIN sys.schemas s ON s.schema_id = v.schema_id
                LEFT JOIN sys.extended_properties ep
                    ON ep.class = 1 AND ep.major_id = v.object_id AND ep.minor_id = 0
                    AND ep.name = 'MS_Description'
                WHERE v.is_ms_shipped = 0
                ORDER BY s.name, v.name
            "#;
            for row in catalog_query(conn, query, &[]).await? {
                let (owner, name) = (text(&row, 0)?, text(&row, 1)?);
                if !selection.includes_owner(&owner) {
                    continue;
                }
                match opt_text(&row, 2)? {
                    Some(definition) => schema.views.push(View {
                        references: references_of(&owner, &name),
                        owner,
                        name,
                        definition,
                        comment: opt_text(&row, 3)?,
                    }),
                    None => issues.push(ConvertError::partial(
                        format!("{}.{}", owner, name),
                        "view definition is encrypted or not visible",
                    )),
                }
            }
        }

        if selection.includes_kind(ObjectKind::Function) || selection.includes_kind(ObjectKind::Procedure) {
            let query = r#"
                SELECT s.name, o.name, RTRIM(o.type), OBJECT_DEFINITION(o.object_id)
                FROM sys.objects o
                JOIN sys.schemas s ON s.schema_id = o.schema_id
                WHERE o.type IN ('FN', 'IF', 'TF', 'P') AND o.is_ms_shipped = 0
                ORDER BY s.name, o.name
            "#;
            for row in catalog_query(conn, query, &[]).await? {
                let (owner, name) = (text(&row, 0)?, text(&row, 1)?);
                let kind = if text(&row, 2)? == "P" {
                    ObjectKind::Procedure
                } else {
                    ObjectKind::Function
                };
                if !selection.includes_owner(&owner) || !selection.includes_kind(kind) {
                    continue;
                }
                let Some(definition) = opt_text(&row, 3)? else {
                    issues.push(ConvertError::partial(
                        format!("{}.{}", owner, name),
                        format!("{} definition is encrypted or not visible", kind),
                    ));
                    continue;
                };
                let routine = Routine {
                    references: references_of(&owner, &name),
                    owner,
                    name,
                    definition,
                };
                match kind {
                    ObjectKind::Procedure => schema.procedures.push(routine),
                    _ => schema.functions.push(routine),
                }
            }
        }

        if selection.includes_kind(ObjectKind::Trigger) {
            let query = r#"
                SELECT s.name, tr.name, t.name, OBJECT_DEFINITION(tr.object_id)
                FROM sys.triggers tr
                JOIN sys.tables t ON t.object_id = tr.parent_id
                JOIN sys.schemas s ON s.schema_id = t.schema_id
                WHERE tr.parent_class = 1 AND tr.is_ms_shipped = 0
                ORDER BY s.name, tr.name
            "#;
            for row in catalog_query(conn, query, &[]).await? {
                let (owner, name, table) = (text(&row, 0)?, text(&row, 1)?, text(&row, 2)?);
                if !selection.includes_table(&owner, &table) {
                    continue;
                }
                match opt_text(&row, 3)? {
                    Some(definition) => schema.triggers.push(Trigger {
                        table: ObjectName::new(&owner, table),
                        owner,
                        name,
                        definition,
                    }),
                    None => issues.push(ConvertError::partial(
                        format!("{}.{}", owner, name),
                        "trigger definition is encrypted or not visible",
                    )),
                }
            }
        }

        if selection.includes_kind(ObjectKind::Sequence) {
            let query = r#"
                SELECT
                    s.name,
                    seq.name,
                    TYPE_NAME(seq.user_type_id),
                    CAST(seq.start_value AS bigint),
                    CAST(seq.increment AS bigint),
                    CAST(seq.minimum_value AS bigint),
                    CAST(seq.maximum_value AS bigint),
                    seq.is_cycling
                FROM sys.sequences seq
                JOIN sys.schemas s ON s.schema_id = seq.schema_id
                ORDER BY s.name, seq.name
            "#;
            for row in catalog_query(conn, query, &[]).await? {
                let owner = text(&row, 0)?;
                if !selection.includes_owner(&owner) {
                    continue;
                }
                schema.sequences.push(Sequence {
                    owner,
                    name: text(&row, 1)?,
                    data_type: text(&row, 2)?,
                    start_value: big(&row, 3)?.unwrap_or(1),
                    increment: big(&row, 4)?.unwrap_or(1),
                    min_value: big(&row, 5)?,
                    max_value: big(&row, 6)?,
                    cycle: flag(&row, 7)?,
                });
            }
        }

        if selection.includes_kind(ObjectKind::UserType) {
            let query = r#"
                SELECT
                    s.name,
                    t.name,
                    TYPE_NAME(t.system_type_id),
                    CAST(t.max_length AS int),
                    CAST(t.precision AS int),
                    CAST(t.scale AS int),
                    t.is_nullable
                FROM sys.types t
                JOIN sys.schemas s ON s.schema_id = t.schema_id
                WHERE t.is_user_defined = 1 AND t.is_table_type = 0 AND t.is_assembly_type = 0
                ORDER BY s.name, t.name
            "#;
            for row in catalog_query(conn, query, &[]).await? {
                let owner = text(&row, 0)?;
                if !selection.includes_owner(&owner) {
                    continue;
                }
                let base_type = text(&row, 2)?;
                schema.user_types.push(UserDefinedType {
                    owner,
                    name: text(&row, 1)?,
                    max_length: char_length(&base_type, int(&row, 3)?),
                    base_type,
                    precision: int(&row, 4)?,
                    scale: int(&row, 5)?,
                    is_nullable: flag(&row, 6)?,
                });
            }
        }

        info!(
            "Introspected SQL Server database {}: {} tables, {} views, {} routines, {} skipped",
            self.database,
            schema.tables.len(),
            schema.views.len(),
            schema.functions.len() + schema.procedures.len(),
            issues.len()
        );
        Ok(Introspection { schema, issues })
    }

    async fn session(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(MssqlSession {
            conn: self.connection().await?,
            dialect: self.dialect.clone(),
            in_transaction: false,
        }))
    }

    async fn close(&self) {
        debug!("Releasing SQL Server pool ({} connections)", self.pool.state().connections);
    }
}

/// One pooled SQL Server connection.
///
/// A transaction left open when the session is dropped is rolled back by
/// the pool's checkout test before the connection is reused.
struct MssqlSession {
    conn: PooledConnection<'static, TiberiusConnectionManager>,
    dialect: Arc<dyn Dialect>,
    in_transaction: bool,
}

impl MssqlSession {
    async fn batch(&mut self, sql: &str) -> Result<()> {
        self.conn
            .simple_query(sql)
            .await
            .map_err(classify)?
            .into_results()
            .await
            .map_err(classify)?;
        Ok(())
    }

    /// Stream rows through a TDS bulk load.
    async fn bulk_load(&mut self, table: &Table, rows: Vec<TokenRow<'static>>) -> Result<u64> {
        let target = qualify(self.dialect.as_ref(), &table.owner, &table.name, true);
        let mut load = self.conn.bulk_insert(&target).await.map_err(classify)?;
        let mut sent = 0u64;
        for row in rows {
            load.send(row).await.map_err(classify)?;
            sent += 1;
        }
        load.finalize().await.map_err(classify)?;
        Ok(sent)
    }

    /// Parameterized multi-row INSERTs. Outside a transaction a failing
    /// statement is retried row by row to locate the offending row.
    async fn insert_rows(&mut self, table: &Table, rows: &[ValueRow]) -> Result<u64> {
        let binary: Vec<bool> = table
            .columns
            .iter()
            .map(|c| common::canonical_of(self.dialect.as_ref(), c).is_binary())
            .collect();
        let per_statement = common::rows_per_statement(
            table.columns.len(),
            MAX_INSERT_PARAMS,
            self.dialect.max_rows_per_insert(),
        );

        let mut written = 0u64;
        for (chunk_idx, chunk) in rows.chunks(per_statement).enumerate() {
            let base = chunk_idx * per_statement;
            let err = match self.insert_chunk(table, &binary, chunk).await {
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
                if let Err(e) = self.insert_chunk(table, &binary, std::slice::from_ref(row)).await {
                    return Err(ConvertError::write(table.full_name(), base + i, e.to_string()));
                }
                written += 1;
            }
        }
        Ok(written)
    }

    async fn insert_chunk(&mut self, table: &Table, binary: &[bool], rows: &[ValueRow]) -> Result<u64> {
        let sql = common::parameterized_insert(self.dialect.as_ref(), table, rows.len(), |n| format!("@P{}", n));
        let mut query = Query::new(sql);
        for row in rows {
            for (value, is_binary) in row.iter().zip(binary) {
                bind_value(&mut query, value, *is_binary);
            }
        }
        let result = query.execute(&mut *self.conn).await.map_err(classify)?;
        Ok(result.total())
    }
}

#[async_trait]
impl Session for MssqlSession {
    fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.clone()
    }

    /// Runs the statement as a plain batch so session settings such as
    /// `SET IDENTITY_INSERT` persist. Batches do not report row counts, so
    /// this always returns 0.
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.batch(sql).await?;
        Ok(0)
    }

    async fn read_rows(&mut self, table: &Table, offset: u64, limit: usize, options: ReadOptions) -> Result<Vec<ValueRow>> {
        let sql = self.dialect.select_page(table, offset, limit);
        let kinds: Vec<CanonicalType> = table
            .columns
            .iter()
            .map(|c| common::canonical_of(self.dialect.as_ref(), c))
            .collect();

        let read_error = |e: tiberius::error::Error| match classify(e) {
            ConvertError::Query { message, .. } => ConvertError::read(table.full_name(), message),
            other => other,
        };
        let mut stream = self
            .conn
            .simple_query(&sql)
            .await
            .map_err(classify)?
            .into_row_stream();

        let mut out = Vec::with_capacity(limit);
        while let Some(row) = stream.try_next().await.map_err(read_error)? {
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
        let sql = self.dialect.begin_transaction_sql().to_string();
        self.batch(&sql).await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let sql = self.dialect.commit_sql().to_string();
        self.in_transaction = false;
        self.batch(&sql).await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.in_transaction = false;
        self.batch("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await
    }

    /// Bulk load when every column and value has a bulk encoding, otherwise
    /// parameterized INSERTs. A failed bulk load stores nothing, so outside
    /// a transaction the batch is retried through INSERT to locate the
    /// offending row.
    async fn write_rows(&mut self, table: &Table, rows: &[ValueRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let encoded = bulk::bulk_kinds(table).and_then(|kinds| bulk::token_rows(&kinds, rows));
        if let Some(token_rows) = encoded {
            match self.bulk_load(table, token_rows).await {
                Ok(sent) => return Ok(sent),
                Err(e) if self.in_transaction => {
                    return Err(ConvertError::write(table.full_name(), 0, e.to_string()))
                }
                Err(e) => debug!("{}: bulk load failed ({}); retrying with INSERT", table.full_name(), e),
            }
        }
        self.insert_rows(table, rows).await
    }
}

/// Decode one column by its canonical type.
fn decode(row: &Row, idx: usize, kind: &CanonicalType) -> std::result::Result<SqlValue, tiberius::error::Error> {
    let value = match kind {
        CanonicalType::Boolean => row.try_get::<bool, _>(idx)?.map(SqlValue::Bool),
        CanonicalType::UInt8 => row.try_get::<u8, _>(idx)?.map(|v| SqlValue::I16(i16::from(v))),
        CanonicalType::Int16 => row.try_get::<i16, _>(idx)?.map(SqlValue::I16),
        CanonicalType::Int32 => row.try_get::<i32, _>(idx)?.map(SqlValue::I32),
        CanonicalType::Int64 => row.try_get::<i64, _>(idx)?.map(SqlValue::I64),
        CanonicalType::Float32 => row.try_get::<f32, _>(idx)?.map(SqlValue::F32),
        CanonicalType::Float64 => row.try_get::<f64, _>(idx)?.map(SqlValue::F64),
        CanonicalType::Decimal { .. } | CanonicalType::Money | CanonicalType::SmallMoney => {
            row.try_get::<Decimal, _>(idx)?.map(SqlValue::Decimal)
        }
        CanonicalType::Binary(_) | CanonicalType::Varbinary(_) | CanonicalType::Blob => {
            row.try_get::<&[u8], _>(idx)?.map(|v| SqlValue::Bytes(v.to_vec()))
        }
        CanonicalType::Date => row.try_get::<NaiveDate, _>(idx)?.map(SqlValue::Date),
        CanonicalType::Time => row.try_get::<NaiveTime, _>(idx)?.map(SqlValue::Time),
        CanonicalType::DateTime => row.try_get::<NaiveDateTime, _>(idx)?.map(SqlValue::DateTime),
        CanonicalType::DateTimeTz => row
            .try_get::<DateTime<FixedOffset>, _>(idx)?
            .map(SqlValue::DateTimeOffset),
        CanonicalType::Uuid => row.try_get::<Uuid, _>(idx)?.map(SqlValue::Uuid),
        _ => row
            .try_get::<&str, _>(idx)?
            .map(|s| SqlValue::Text(s.to_string())),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}
