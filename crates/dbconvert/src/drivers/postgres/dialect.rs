//! PostgreSQL dialect.

use crate::core::schema::{Column, Table, UserDefinedType};
use crate::core::traits::{Dialect, IdentifierCase};
use crate::core::value::SqlValue;
use crate::dialect::canonical::{CanonicalType, NativeTypes};
use crate::dialect::PostgresTypes;
use crate::drivers::common::{self, BytesLiteral, LiteralStyle};
use crate::script::render::{ident, qualify};

const LITERALS: LiteralStyle = LiteralStyle {
    true_literal: "true",
    false_literal: "false",
    bytes: BytesLiteral::PostgresEscape,
};

/// PostgreSQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn types(&self) -> &dyn NativeTypes {
        &PostgresTypes
    }

    fn max_identifier_length(&self) -> usize {
        63
    }

    fn unquoted_case(&self) -> IdentifierCase {
        IdentifierCase::Lower
    }

    fn default_owner(&self) -> &str {
        "public"
    }

    fn supports_sequences(&self) -> bool {
        true
    }

    fn supports_user_types(&self) -> bool {
        true
    }

    fn render_literal(&self, value: &SqlValue) -> String {
        common::render_value(self, value, LITERALS)
    }

    // Text columns cannot hold NUL.
    fn is_supported_char(&self, c: char) -> bool {
        c != '\0'
    }

    fn select_page(&self, table: &Table, offset: u64, limit: usize) -> String {
        let base = common::paged_select(self, table, "ctid", |col, quoted| {
            match common::canonical_of(self, col) {
                CanonicalType::Interval
                | CanonicalType::Xml
                | CanonicalType::Json
                | CanonicalType::Unknown(_) => format!("{}::text AS {}", quoted, quoted),
                CanonicalType::Money => format!("{}::numeric AS {}", quoted, quoted),
                _ => quoted.to_string(),
            }
        });
        format!("{} LIMIT {} OFFSET {}", base, limit, offset)
    }

    fn identity_clause(&self, _col: &Column) -> String {
        " GENERATED BY DEFAULT AS IDENTITY".to_string()
    }

    fn supports_include_columns(&self) -> bool {
        true
    }

    fn create_user_type_sql(&self, udt: &UserDefinedType, base_type: &str, quote: bool) -> Option<String> {
        Some(format!(
            "CREATE DOMAIN {} AS {}{}",
            qualify(self, &udt.owner, &udt.name, quote),
            base_type,
            if udt.is_nullable { "" } else { " NOT NULL" }
        ))
    }

    fn create_owner_sql(&self, owner: &str, quote: bool) -> Option<String> {
        Some(format!("CREATE SCHEMA IF NOT EXISTS {}", ident(self, owner, quote)))
    }

    fn comment_statements(&self, table: &Table, quote: bool) -> Vec<String> {
        let qualified = qualify(self, &table.owner, &table.name, quote);
        let mut statements = Vec::new();
        if let Some(comment) = &table.comment {
            statements.push(format!(
                "COMMENT ON TABLE {} IS {}",
                qualified,
                self.string_literal(comment)
            ));
        }
        for col in &table.columns {
            if let Some(comment) = &col.comment {
                statements.push(format!(
                    "COMMENT ON COLUMN {}.{} IS {}",
                    qualified,
                    ident(self, &col.name, quote),
                    self.string_literal(comment)
                ));
            }
        }
        statements
    }

    /// Move identity sequences past the loaded keys.
    fn post_load_statements(&self, table: &Table, quote: bool) -> Vec<String> {
        let qualified = qualify(self, &table.owner, &table.name, quote);
        table
            .columns
            .iter()
            .filter(|c| c.is_identity)
            .map(|c| {
                let column = ident(self, &c.name, quote);
                format!(
                    "SELECT setval(pg_get_serial_sequence({}, {}), COALESCE(MAX({}), 1), MAX({}) IS NOT NULL) FROM {}",
                    self.string_literal(&qualified),
                    self.string_literal(&c.name),
                    column,
                    column,
                    qualified
                )
            })
            .collect()
    }
}
