//! Test helpers: schema builders and an in-memory engine.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectionConfig, SchemaSelection};
use crate::core::schema::{Column, DatabaseSchema, ForeignKey, Table};
use crate::core::traits::{DatabaseInterpreter, Dialect, EngineDriver, Introspection, ReadOptions, Session};
use crate::core::value::{Row, SqlValue};
use crate::drivers::postgres::PostgresDialect;
use crate::error::{ConvertError, Result};

pub fn make_test_column(name: &str, data_type: &str) -> Column {
    Column {
        name: name.to_string(),
        data_type: data_type.to_string(),
        is_nullable: true,
        ..Default::default()
    }
}

/// A table whose column ordinals are numbered from 1.
pub fn make_test_table(owner: &str, name: &str, columns: Vec<Column>) -> Table {
    let columns = columns
        .into_iter()
        .enumerate()
        .map(|(i, mut c)| {
            c.ordinal_pos = i as i32 + 1;
            c
        })
        .collect();
    Table {
        owner: owner.to_string(),
        name: name.to_string(),
        columns,
        primary_key: None,
        foreign_keys: Vec::new(),
        indexes: Vec::new(),
        check_constraints: Vec::new(),
        comment: None,
        row_count: 0,
    }
}

/// Single-column foreign key referencing `ref_owner.ref_table(id)`.
pub fn make_fk(name: &str, column: &str, ref_owner: &str, ref_table: &str) -> ForeignKey {
    ForeignKey {
        name: name.to_string(),
        columns: vec![column.to_string()],
        ref_owner: ref_owner.to_string(),
        ref_table: ref_table.to_string(),
        ref_columns: vec!["id".to_string()],
        on_delete: "NO ACTION".to_string(),
        on_update: "NO ACTION".to_string(),
    }
}

#[derive(Default)]
struct MemoryState {
    schema: DatabaseSchema,
    /// Committed rows by table full name.
    rows: HashMap<String, Vec<Row>>,
    /// Sizes of attempted write batches by table.
    batches: HashMap<String, Vec<usize>>,
    write_order: Vec<String>,
    executed: Vec<String>,
    issues: Vec<(String, String)>,
    deny_introspection: Option<String>,
    refuse_connections: bool,
    fail_batches: HashMap<String, usize>,
    fail_statements: Vec<String>,
    /// Fire a token when the n-th batch of a table is read.
    cancel_on_read: HashMap<String, (usize, CancellationToken)>,
    reads: HashMap<String, usize>,
    /// Columns whose stored bytes cannot be decoded, by table.
    unreadable: HashMap<String, Vec<String>>,
    closed: bool,
}

/// An engine that keeps tables and rows in memory, with failure injection.
pub struct MemoryInterpreter {
    engine: String,
    dialect: Arc<dyn Dialect>,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryInterpreter {
    /// A memory engine speaking the PostgreSQL dialect.
    pub fn new() -> Self {
        Self::with_dialect("memory", Arc::new(PostgresDialect))
    }

    pub fn with_dialect(engine: &str, dialect: Arc<dyn Dialect>) -> Self {
        Self {
            engine: engine.to_string(),
            dialect,
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Add (or replace) a table together with its rows.
    pub fn seed(&self, mut table: Table, rows: Vec<Row>) {
        let mut state = self.state.lock();
        table.row_count = rows.len() as i64;
        let name = table.full_name();
        state.schema.tables.retain(|t| t.full_name() != name);
        state.schema.tables.push(table);
        state.rows.insert(name, rows);
    }

    /// Edit the catalog returned by introspection.
    pub fn update_schema(&self, f: impl FnOnce(&mut DatabaseSchema)) {
        f(&mut self.state.lock().schema);
    }

    /// Report `object` as unreadable during introspection.
    pub fn inject_malformed(&self, object: &str, message: &str) {
        self.state
            .lock()
            .issues
            .push((object.to_string(), message.to_string()));
    }

    /// Make introspection fail with a permission error.
    pub fn deny_introspection(&self, message: &str) {
        self.state.lock().deny_introspection = Some(message.to_string());
    }

    /// Fail the n-th (1-based) write batch of a table.
    pub fn fail_on_write_batch(&self, table: &str, batch: usize) {
        self.state.lock().fail_batches.insert(table.to_string(), batch);
    }

    /// Fail every statement containing `pattern`.
    pub fn fail_statements_containing(&self, pattern: &str) {
        self.state.lock().fail_statements.push(pattern.to_string());
    }

    /// Cancel `token` when the n-th (1-based) batch of a table is read.
    pub fn cancel_on_read(&self, table: &str, batch: usize, token: CancellationToken) {
        self.state
            .lock()
            .cancel_on_read
            .insert(table.to_string(), (batch, token));
    }

    /// Make every non-NULL value of a column undecodable on read.
    pub fn unreadable_column(&self, table: &str, column: &str) {
        self.state
            .lock()
            .unreadable
            .entry(table.to_string())
            .or_default()
            .push(column.to_string());
    }

    pub fn write_batches(&self, table: &str) -> Vec<usize> {
        self.state.lock().batches.get(table).cloned().unwrap_or_default()
    }

    /// Committed rows of a table.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state.lock().rows.get(table).cloned().unwrap_or_default()
    }

    pub fn committed_rows(&self, table: &str) -> usize {
        self.state.lock().rows.get(table).map_or(0, Vec::len)
    }

    /// Tables in the order their first batch was written.
    pub fn write_order(&self) -> Vec<String> {
        self.state.lock().write_order.clone()
    }

    /// Statements run through [`Session::execute`].
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Default for MemoryInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseInterpreter for MemoryInterpreter {
    fn engine(&self) -> &str {
        &self.engine
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.clone()
    }

    async fn introspect(&self, selection: &SchemaSelection) -> Result<Introspection> {
        let state = self.state.lock();
        if let Some(message) = &state.deny_introspection {
            return Err(ConvertError::permission(&self.engine, message.clone()));
        }
        let mut schema = state.schema.clone();
        schema
            .tables
            .retain(|t| selection.includes_owner(&t.owner) && selection.includes_table(&t.owner, &t.name));
        let issues = state
            .issues
            .iter()
            .map(|(object, message)| ConvertError::partial(object.clone(), message.clone()))
            .collect();
        Ok(Introspection { schema, issues })
    }

    async fn session(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(MemorySession {
            dialect: self.dialect.clone(),
            state: self.state.clone(),
            pending: None,
        }))
    }

    async fn close(&self) {
        self.state.lock().closed = true;
    }
}

struct MemorySession {
    dialect: Arc<dyn Dialect>,
    state: Arc<Mutex<MemoryState>>,
    /// Rows written inside the open transaction.
    pending: Option<Vec<(String, Vec<Row>)>>,
}

#[async_trait]
impl Session for MemorySession {
    fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.clone()
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let mut state = self.state.lock();
        if state.fail_statements.iter().any(|p| sql.contains(p.as_str())) {
            return Err(ConvertError::query("memory", format!("rejected statement: {}", sql)));
        }
        state.executed.push(sql.to_string());
        Ok(0)
    }

    async fn read_rows(&mut self, table: &Table, offset: u64, limit: usize, options: ReadOptions) -> Result<Vec<Row>> {
        let name = table.full_name();
        let mut state = self.state.lock();
        let reads = {
            let n = state.reads.entry(name.clone()).or_insert(0);
            *n += 1;
            *n
        };
        if let Some((batch, token)) = state.cancel_on_read.get(&name) {
            if *batch == reads {
                token.cancel();
            }
        }
        let rows = state
            .rows
            .get(&name)
            .ok_or_else(|| ConvertError::read(name.clone(), "table does not exist"))?;
        let unreadable: Vec<usize> = state
            .unreadable
            .get(&name)
            .map(|columns| {
                table
                    .columns
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| columns.iter().any(|u| u.eq_ignore_ascii_case(&c.name)))
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default();

        let mut page = Vec::with_capacity(limit);
        for (n, row) in rows.iter().skip(offset as usize).take(limit).enumerate() {
            let mut row = row.clone();
            for &i in &unreadable {
                let Some(value) = row.get_mut(i) else { continue };
                if value.is_null() {
                    continue;
                }
                if !options.treat_unreadable_bytes_as_null {
                    return Err(ConvertError::read(
                        name.clone(),
                        format!(
                            "cannot decode column {} at row {}",
                            table.columns[i].name,
                            offset + n as u64
                        ),
                    ));
                }
                *value = SqlValue::Null;
            }
            page.push(row);
        }
        Ok(page)
    }

    fn in_transaction(&self) -> bool {
        self.pending.is_some()
    }

    async fn begin(&mut self) -> Result<()> {
        self.pending = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            let mut state = self.state.lock();
            for (table, rows) in pending {
                state.rows.entry(table).or_default().extend(rows);
            }
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.pending = None;
        Ok(())
    }

    async fn write_rows(&mut self, table: &Table, rows: &[Row]) -> Result<u64> {
        let name = table.full_name();
        let mut state = self.state.lock();
        if !state.write_order.contains(&name) {
            state.write_order.push(name.clone());
        }
        let attempted = {
            let batches = state.batches.entry(name.clone()).or_default();
            batches.push(rows.len());
            batches.len()
        };
        if state.fail_batches.get(&name) == Some(&attempted) {
            return Err(ConvertError::write(name, 0, "injected write failure"));
        }
        match self.pending.as_mut() {
            Some(pending) => pending.push((name, rows.to_vec())),
            None => state.rows.entry(name).or_default().extend(rows.iter().cloned()),
        }
        Ok(rows.len() as u64)
    }
}

/// Driver handing out [`MemoryInterpreter`]s, one per database name.
pub struct MemoryDriver {
    engine: String,
    aliases: Vec<&'static str>,
    dialect: Arc<dyn Dialect>,
    databases: Mutex<HashMap<String, Arc<MemoryInterpreter>>>,
    refuse: Mutex<Option<String>>,
}

impl MemoryDriver {
    pub fn new(engine: &str, dialect: Arc<dyn Dialect>) -> Self {
        Self {
            engine: engine.to_string(),
            aliases: Vec::new(),
            dialect,
            databases: Mutex::new(HashMap::new()),
            refuse: Mutex::new(None),
        }
    }

    /// The interpreter serving `name`, created on first use.
    pub fn database(&self, name: &str) -> Arc<MemoryInterpreter> {
        self.databases
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryInterpreter::with_dialect(&self.engine, self.dialect.clone())))
            .clone()
    }

    /// Make every connection attempt fail.
    pub fn refuse_connections(&self, message: &str) {
        *self.refuse.lock() = Some(message.to_string());
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        let mut driver = Self::new("memory", Arc::new(PostgresDialect));
        driver.aliases = vec!["mem"];
        driver
    }
}

#[async_trait]
impl EngineDriver for MemoryDriver {
    fn engine(&self) -> &str {
        &self.engine
    }

    fn aliases(&self) -> &[&str] {
        &self.aliases
    }

    fn dialect(&self, _config: &ConnectionConfig) -> Arc<dyn Dialect> {
        self.dialect.clone()
    }

    async fn connect(&self, config: &ConnectionConfig, _max_connections: usize) -> Result<Arc<dyn DatabaseInterpreter>> {
        if let Some(message) = self.refuse.lock().clone() {
            return Err(ConvertError::connection(&self.engine, message));
        }
        Ok(self.database(&config.database))
    }
}

/// Connection settings accepted by the memory driver.
pub fn memory_connection(engine: &str, database: &str) -> ConnectionConfig {
    let mut config = ConnectionConfig::new(engine);
    config.host = "localhost".to_string();
    config.database = database.to_string();
    config.user = "tester".to_string();
    config
}
