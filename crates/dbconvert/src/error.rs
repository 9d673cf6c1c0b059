//! Error types for the conversion library.

use thiserror::Error;

/// Main error type for conversion operations.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server unreachable or the connection was refused
    #[error("Connection error ({engine}): {message}")]
    Connection { engine: String, message: String },

    /// Login succeeded but catalog or data access was denied
    #[error("Permission denied ({engine}): {message}")]
    Permission { engine: String, message: String },

    /// A single object's catalog metadata could not be used
    #[error("Skipped {object}: {message}")]
    PartialIntrospection { object: String, message: String },

    /// Objects that depend on each other and cannot be ordered
    #[error("Dependency cycle between {}", objects.join(", "))]
    DependencyCycle { objects: Vec<String> },

    /// A type had to be substituted by a wider one
    #[error("Type mapping for {column}: {message}")]
    TypeMapping { column: String, message: String },

    /// A batch could not be written to the target
    #[error("Write failed for {table} at batch offset {batch_offset}, row {row_index}: {message}")]
    Write {
        table: String,
        batch_offset: u64,
        row_index: usize,
        message: String,
    },

    /// The table's transaction was rolled back
    #[error("Transaction rolled back for {table}: {message}")]
    TransactionRollback { table: String, message: String },

    /// Any other statement failure reported by an engine
    #[error("Query failed ({engine}): {message}")]
    Query { engine: String, message: String },

    /// A value could not be read or translated
    #[error("Read failed for {table}: {message}")]
    Read { table: String, message: String },

    /// IO error (script files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Conversion was canceled by the caller
    #[error("Conversion canceled")]
    Canceled,
}

impl ConvertError {
    /// Create a Connection error
    pub fn connection(engine: impl Into<String>, message: impl Into<String>) -> Self {
        ConvertError::Connection {
            engine: engine.into(),
            message: message.into(),
        }
    }

    /// Create a Permission error
    pub fn permission(engine: impl Into<String>, message: impl Into<String>) -> Self {
        ConvertError::Permission {
            engine: engine.into(),
            message: message.into(),
        }
    }

    /// Create a Query error
    pub fn query(engine: impl Into<String>, message: impl Into<String>) -> Self {
        ConvertError::Query {
            engine: engine.into(),
            message: message.into(),
        }
    }

    /// Create a PartialIntrospection error for one skipped object
    pub fn partial(object: impl Into<String>, message: impl Into<String>) -> Self {
        ConvertError::PartialIntrospection {
            object: object.into(),
            message: message.into(),
        }
    }

    /// Create a Read error
    pub fn read(table: impl Into<String>, message: impl Into<String>) -> Self {
        ConvertError::Read {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Write error; the batch offset is filled in by the pipeline
    pub fn write(table: impl Into<String>, row_index: usize, message: impl Into<String>) -> Self {
        ConvertError::Write {
            table: table.into(),
            batch_offset: 0,
            row_index,
            message: message.into(),
        }
    }

    /// Attach the batch offset to a Write error.
    pub fn at_offset(self, offset: u64) -> Self {
        match self {
            ConvertError::Write {
                table,
                row_index,
                message,
                ..
            } => ConvertError::Write {
                table,
                batch_offset: offset,
                row_index,
                message,
            },
            other => other,
        }
    }

    /// Whether the run may continue after this error when
    /// `continue_on_error` is enabled.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConvertError::PartialIntrospection { .. }
                | ConvertError::DependencyCycle { .. }
                | ConvertError::TypeMapping { .. }
                | ConvertError::Write { .. }
                | ConvertError::Read { .. }
                | ConvertError::Query { .. }
        )
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            ConvertError::Config(_) | ConvertError::Yaml(_) => 2,
            ConvertError::Connection { .. } | ConvertError::Permission { .. } => 3,
            ConvertError::Canceled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for conversion operations.
pub type Result<T> = std::result::Result<T, ConvertError>;
