//! Configuration type definitions with auto-tuning based on system resources.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

use crate::core::schema::ObjectKind;
use crate::script::render::ScriptOptions;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let total_memory_gb = sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        let cpu_cores = sys.cpus().len();

        Self {
            total_memory_gb,
            cpu_cores,
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database to convert from.
    pub source: ConnectionConfig,

    /// Database to convert into.
    pub target: ConnectionConfig,

    /// Which source objects take part in the run.
    #[serde(default)]
    pub selection: SchemaSelection,

    /// Conversion behavior.
    #[serde(default)]
    pub conversion: ConversionOption,

    /// Mirroring of feedback events into the log.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.conversion = self.conversion.with_auto_tuning(&resources);
        self
    }
}

/// Connection descriptor for one database.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Engine id or alias ("mssql", "postgres", "mysql", "sqlite", ...).
    pub engine: String,

    /// Server host.
    #[serde(default)]
    pub host: String,

    /// Server port; the engine default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Database name.
    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Use the operating system identity instead of user/password.
    #[serde(default)]
    pub integrated_auth: bool,

    /// Encrypt the connection (SQL Server).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// Trust the server certificate (SQL Server).
    #[serde(default)]
    pub trust_server_cert: bool,

    /// Database file (SQLite).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Connection character set (MySQL).
    #[serde(default = "default_charset")]
    pub charset: String,

    /// Connection collation (MySQL).
    #[serde(default = "default_collation")]
    pub collation: String,

    /// Command timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ConnectionConfig {
    /// A descriptor for `engine` with every other field defaulted.
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            host: String::new(),
            port: None,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            integrated_auth: false,
            encrypt: true,
            trust_server_cert: false,
            path: None,
            charset: default_charset(),
            collation: default_collation(),
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Short description used in log lines ("mssql://host:port/db").
    pub fn describe(&self) -> String {
        match &self.path {
            Some(path) => format!("{}://{}", self.engine, path.display()),
            None => match self.port {
                Some(port) => format!("{}://{}:{}/{}", self.engine, self.host, port, self.database),
                None => format!("{}://{}/{}", self.engine, self.host, self.database),
            },
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("integrated_auth", &self.integrated_auth)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("path", &self.path)
            .field("charset", &self.charset)
            .field("collation", &self.collation)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Which source objects are introspected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSelection {
    /// Owners (schemas) to read; empty means all.
    #[serde(default)]
    pub owners: Vec<String>,

    /// Tables to include (glob patterns, `*` and `?`).
    #[serde(default)]
    pub include_tables: Vec<String>,

    /// Tables to exclude (glob patterns).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Object kinds to read.
    #[serde(default = "default_object_kinds")]
    pub object_kinds: Vec<ObjectKind>,
}

impl Default for SchemaSelection {
    fn default() -> Self {
        Self {
            owners: Vec::new(),
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
            object_kinds: default_object_kinds(),
        }
    }
}

impl SchemaSelection {
    /// Whether objects of `owner` are selected.
    pub fn includes_owner(&self, owner: &str) -> bool {
        self.owners.is_empty() || self.owners.iter().any(|o| o.eq_ignore_ascii_case(owner))
    }

    /// Whether a table is selected. Patterns match either the bare name or
    /// `owner.name`, case-insensitively.
    pub fn includes_table(&self, owner: &str, name: &str) -> bool {
        if !self.includes_owner(owner) {
            return false;
        }
        let qualified = format!("{}.{}", owner, name);
        let hit = |p: &String| glob_match(p, name) || glob_match(p, &qualified);
        (self.include_tables.is_empty() || self.include_tables.iter().any(hit))
            && !self.exclude_tables.iter().any(hit)
    }

    pub fn includes_kind(&self, kind: ObjectKind) -> bool {
        self.object_kinds.contains(&kind)
    }
}

/// Case-insensitive `*`/`?` glob match.
fn glob_match(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let value: Vec<char> = value.to_lowercase().chars().collect();
    glob_match_inner(&pattern, &value)
}

fn glob_match_inner(pattern: &[char], value: &[char]) -> bool {
    match (pattern.first(), value.first()) {
        (None, None) => true,
        (Some('*'), _) => {
            glob_match_inner(&pattern[1..], value)
                || (!value.is_empty() && glob_match_inner(pattern, &value[1..]))
        }
        (Some('?'), Some(_)) => glob_match_inner(&pattern[1..], &value[1..]),
        (Some(a), Some(b)) if a == b => glob_match_inner(&pattern[1..], &value[1..]),
        _ => false,
    }
}

/// What a run converts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// DDL only.
    Schema,
    /// Row data only; target tables must already exist.
    Data,
    #[default]
    Both,
}

impl Scope {
    pub fn includes_schema(&self) -> bool {
        matches!(self, Scope::Schema | Scope::Both)
    }

    pub fn includes_data(&self) -> bool {
        matches!(self, Scope::Data | Scope::Both)
    }
}

/// One operator-supplied owner rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMappingEntry {
    /// Source owner.
    pub source: String,
    /// Target owner.
    pub target: String,
}

/// Where generated scripts go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    #[default]
    None,
    /// Collected into the conversion result.
    InMemory,
    /// Written under `OutputConfig::path`.
    File,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub mode: OutputMode,

    /// Output file (per run) or directory (per object).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// One file per object instead of one per run.
    #[serde(default)]
    pub per_object: bool,
}

impl OutputConfig {
    pub fn is_enabled(&self) -> bool {
        self.mode != OutputMode::None
    }
}

/// Conversion behavior, read-only for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOption {
    #[serde(default)]
    pub scope: Scope,

    /// Rows per read/write cycle (default: 500).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Wrap each table's transfer in one transaction.
    #[serde(default)]
    pub use_transaction: bool,

    /// Record failures and keep going instead of aborting.
    #[serde(default)]
    pub continue_on_error: bool,

    /// Execute DDL and load rows on the target (default: true).
    #[serde(default = "default_true")]
    pub execute_on_target: bool,

    /// Owner renames applied before target rules.
    #[serde(default)]
    pub schema_mapping: Vec<SchemaMappingEntry>,

    #[serde(default)]
    pub output: OutputConfig,

    /// Read binary values that cannot be decoded as NULL.
    #[serde(default)]
    pub treat_unreadable_bytes_as_null: bool,

    /// Remove characters the target encoding cannot store.
    #[serde(default)]
    pub strip_unsupported_characters: bool,

    /// Tables transferred concurrently. Auto-tuned from CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Quote identifiers in generated scripts (default: true).
    #[serde(default = "default_true")]
    pub quote_identifiers: bool,

    /// Render identity/auto-increment columns (default: true).
    #[serde(default = "default_true")]
    pub generate_identity: bool,

    /// Render table and column comments (default: true).
    #[serde(default = "default_true")]
    pub generate_comment: bool,

    /// Translate computed-column expressions across engines (default: true).
    #[serde(default = "default_true")]
    pub convert_computed_columns: bool,

    /// Emit computed columns as plain columns with the expression in a comment.
    #[serde(default)]
    pub only_comment_computed_expression: bool,

    /// Do not create tables or views that already exist on the target.
    #[serde(default)]
    pub skip_existing_objects: bool,
}

impl Default for ConversionOption {
    fn default() -> Self {
        Self {
            scope: Scope::default(),
            batch_size: default_batch_size(),
            use_transaction: false,
            continue_on_error: false,
            execute_on_target: true,
            schema_mapping: Vec::new(),
            output: OutputConfig::default(),
            treat_unreadable_bytes_as_null: false,
            strip_unsupported_characters: false,
            workers: None,
            quote_identifiers: true,
            generate_identity: true,
            generate_comment: true,
            convert_computed_columns: true,
            only_comment_computed_expression: false,
            skip_existing_objects: false,
        }
    }
}

impl ConversionOption {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        if self.workers.is_none() {
            // One connection per worker on each side; more rarely helps.
            let workers = resources.cpu_cores.clamp(1, 8);
            self.workers = Some(workers);
            info!("Auto-tuned config: workers={}", workers);
        }
        self
    }

    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or(4).max(1)
    }

    /// Rendering switches for the script generator.
    pub fn script_options(&self) -> ScriptOptions {
        ScriptOptions {
            quote_identifiers: self.quote_identifiers,
            generate_identity: self.generate_identity,
            generate_comment: self.generate_comment,
        }
    }

    /// Owner mapping as (source, target) pairs.
    pub fn owner_mapping(&self) -> Vec<(String, String)> {
        self.schema_mapping
            .iter()
            .map(|m| (m.source.clone(), m.target.clone()))
            .collect()
    }
}

/// Threshold for mirroring feedback events into the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    #[default]
    Info,
    /// Only warnings and errors.
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: LogLevel::Info,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    500
}

fn default_charset() -> String {
    "utf8mb4".to_string()
}

fn default_collation() -> String {
    "utf8mb4_bin".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_object_kinds() -> Vec<ObjectKind> {
    ObjectKind::SELECTABLE.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("Order*", "orders"));
        assert!(glob_match("dbo.?rders", "dbo.Orders"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("Order?", "Order"));
        assert!(!glob_match("cust*", "orders"));
    }

    #[test]
    fn test_selection_filters() {
        let selection = SchemaSelection {
            owners: vec!["dbo".into()],
            include_tables: vec!["Order*".into(), "sales.*".into()],
            exclude_tables: vec!["*_archive".into()],
            ..Default::default()
        };
        assert!(selection.includes_table("dbo", "Orders"));
        assert!(selection.includes_table("DBO", "OrderLines"));
        assert!(!selection.includes_table("dbo", "Orders_archive"));
        assert!(!selection.includes_table("dbo", "Customers"));
        // Owner filter applies before patterns.
        assert!(!selection.includes_table("sales", "Anything"));
        assert!(selection.includes_kind(ObjectKind::Trigger));
    }

    #[test]
    fn test_auto_tuning_caps_workers() {
        let resources = SystemResources {
            total_memory_gb: 64.0,
            cpu_cores: 32,
        };
        let opts = ConversionOption::default().with_auto_tuning(&resources);
        assert_eq!(opts.workers, Some(8));

        let explicit = ConversionOption {
            workers: Some(2),
            ..Default::default()
        }
        .with_auto_tuning(&resources);
        assert_eq!(explicit.get_workers(), 2);
    }

    #[test]
    fn test_scope() {
        assert!(Scope::Both.includes_schema() && Scope::Both.includes_data());
        assert!(!Scope::Data.includes_schema());
        assert!(!Scope::Schema.includes_data());
    }

    #[test]
    fn test_connection_debug_redacts_password() {
        let mut conn = ConnectionConfig::new("postgres");
        conn.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", conn);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password_123"));
    }
}
