//! Common utilities shared across database drivers.
//!
//! - [`tls`]: TLS configuration for PostgreSQL connections
//! - literal rendering and paged-select helpers used by every dialect

pub mod tls;

pub use tls::{SslMode, TlsBuilder};

use crate::core::schema::{Column, Table};
use crate::core::traits::Dialect;
use crate::core::value::SqlValue;
use crate::dialect::canonical::CanonicalType;
use crate::error::ConvertError;
use crate::script::render::{column_list, ident, qualify};

/// Engine-specific pieces of literal syntax.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LiteralStyle {
    pub true_literal: &'static str,
    pub false_literal: &'static str,
    pub bytes: BytesLiteral,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum BytesLiteral {
    /// `0xDEADBEEF`
    HexPrefix,
    /// `'\xDEADBEEF'::bytea`
    PostgresEscape,
    /// `X'DEADBEEF'`
    XQuoted,
}

/// Render a value as a literal using the dialect's string escaping.
pub(crate) fn render_value<D: Dialect + ?Sized>(dialect: &D, value: &SqlValue, style: LiteralStyle) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(true) => style.true_literal.to_string(),
        SqlValue::Bool(false) => style.false_literal.to_string(),
        SqlValue::I16(v) => v.to_string(),
        SqlValue::I32(v) => v.to_string(),
        SqlValue::I64(v) => v.to_string(),
        SqlValue::F32(v) if v.is_finite() => v.to_string(),
        SqlValue::F64(v) if v.is_finite() => v.to_string(),
        SqlValue::F32(v) => dialect.string_literal(&v.to_string()),
        SqlValue::F64(v) => dialect.string_literal(&v.to_string()),
        SqlValue::Decimal(v) => v.to_string(),
        SqlValue::Bytes(b) => match style.bytes {
            BytesLiteral::HexPrefix if b.is_empty() => "0x".to_string(),
            BytesLiteral::HexPrefix => format!("0x{}", hex::encode_upper(b)),
            BytesLiteral::PostgresEscape => format!("'\\x{}'::bytea", hex::encode(b)),
            BytesLiteral::XQuoted => format!("X'{}'", hex::encode_upper(b)),
        },
        // Everything else travels as text the engine parses on insert.
        other => match other.to_text() {
            Some(text) => dialect.string_literal(&text),
            None => "NULL".to_string(),
        },
    }
}

/// Canonical type of a column in its own dialect.
pub(crate) fn canonical_of<D: Dialect + ?Sized>(dialect: &D, col: &Column) -> CanonicalType {
    dialect.map_native_type(col).canonical_type
}

/// Columns a paged read can be ordered by: the primary key, or else every
/// column of a comparable type.
pub(crate) fn order_columns<D: Dialect + ?Sized>(dialect: &D, table: &Table) -> Vec<String> {
    if !table.pk_columns().is_empty() {
        return table.pk_columns().to_vec();
    }
    table
        .columns
        .iter()
        .filter(|c| {
            !matches!(
                canonical_of(dialect, c),
                CanonicalType::Text
                    | CanonicalType::Blob
                    | CanonicalType::Xml
                    | CanonicalType::Json
                    | CanonicalType::Unknown(_)
            )
        })
        .map(|c| c.name.clone())
        .collect()
}

/// `SELECT <list> FROM <table> ORDER BY <keys>` without the paging clause.
///
/// `project` renders one select-list item from the column and its quoted
/// name, so dialects can cast types their driver cannot decode.
pub(crate) fn paged_select<D, F>(dialect: &D, table: &Table, fallback_order: &str, project: F) -> String
where
    D: Dialect + ?Sized,
    F: Fn(&Column, &str) -> String,
{
    let select_list = table
        .columns
        .iter()
        .map(|c| project(c, &ident(dialect, &c.name, true)))
        .collect::<Vec<_>>()
        .join(", ");
    let order = order_columns(dialect, table);
    let order = if order.is_empty() {
        fallback_order.to_string()
    } else {
        order
            .iter()
            .map(|c| ident(dialect, c, true))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let from = if table.owner.is_empty() || !dialect.supports_owners() {
        dialect.quote_ident(&table.name)
    } else {
        format!("{}.{}", dialect.quote_ident(&table.owner), dialect.quote_ident(&table.name))
    };
    format!("SELECT {} FROM {} ORDER BY {}", select_list, from, order)
}

/// Rows per parameterized INSERT under an engine's bind-parameter limit.
pub(crate) fn rows_per_statement(columns: usize, max_params: usize, max_rows: usize) -> usize {
    (max_params / columns.max(1)).min(max_rows).max(1)
}

/// `INSERT INTO <table> (<columns>) VALUES (..), (..)` with `rows` tuples of
/// placeholders. `placeholder` receives the 1-based parameter number.
pub(crate) fn parameterized_insert<D, F>(dialect: &D, table: &Table, rows: usize, placeholder: F) -> String
where
    D: Dialect + ?Sized,
    F: Fn(usize) -> String,
{
    let width = table.columns.len();
    let columns: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
    let tuples = (0..rows)
        .map(|r| {
            let params: Vec<String> = (1..=width).map(|c| placeholder(r * width + c)).collect();
            format!("({})", params.join(", "))
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualify(dialect, &table.owner, &table.name, true),
        column_list(dialect, &columns, true),
        tuples
    )
}

/// Errors that end introspection instead of skipping one object.
pub(crate) fn is_fatal(err: &ConvertError) -> bool {
    matches!(
        err,
        ConvertError::Connection { .. } | ConvertError::Permission { .. } | ConvertError::Canceled
    )
}

/// Whether an engine error message reports denied access.
pub(crate) fn mentions_permission(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("permission denied") || lower.contains("access denied")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::mssql::MssqlDialect;
    use crate::drivers::postgres::PostgresDialect;
    use crate::testing::{make_test_column, make_test_table};

    #[test]
    fn test_order_prefers_primary_key() {
        let mut table = make_test_table(
            "dbo",
            "t",
            vec![make_test_column("id", "int"), make_test_column("notes", "text")],
        );
        assert_eq!(order_columns(&MssqlDialect, &table), vec!["id"]);
        table.primary_key = Some(crate::core::schema::PrimaryKey {
            name: "pk".into(),
            columns: vec!["notes".into()],
        });
        assert_eq!(order_columns(&MssqlDialect, &table), vec!["notes"]);
    }

    #[test]
    fn test_rows_per_statement_respects_parameter_limit() {
        assert_eq!(rows_per_statement(2, 2000, 1000), 1000);
        assert_eq!(rows_per_statement(30, 2000, 1000), 66);
        assert_eq!(rows_per_statement(5000, 2000, 1000), 1);
        assert_eq!(rows_per_statement(0, 2000, 1000), 1000);
    }

    #[test]
    fn test_parameterized_insert() {
        let table = make_test_table(
            "dbo",
            "t",
            vec![make_test_column("id", "int"), make_test_column("name", "nvarchar")],
        );
        assert_eq!(
            parameterized_insert(&MssqlDialect, &table, 2, |n| format!("@P{}", n)),
            "INSERT INTO [dbo].[t] ([id], [name]) VALUES (@P1, @P2), (@P3, @P4)"
        );
    }

    #[test]
    fn test_bytes_literals() {
        let pg = PostgresDialect;
        let style = LiteralStyle {
            true_literal: "true",
            false_literal: "false",
            bytes: BytesLiteral::PostgresEscape,
        };
        assert_eq!(
            render_value(&pg, &SqlValue::Bytes(vec![0xde, 0xad]), style),
            "'\\xdead'::bytea"
        );
        assert_eq!(render_value(&pg, &SqlValue::F64(f64::NAN), style), "'NaN'");
    }
}
