//! SQLite dialect.

use crate::core::schema::{Column, Table};
use crate::core::traits::Dialect;
use crate::core::value::SqlValue;
use crate::dialect::canonical::{CanonicalType, NativeTypes};
use crate::dialect::SqliteTypes;
use crate::drivers::common::{self, BytesLiteral, LiteralStyle};
use crate::script::render::ident;

const LITERALS: LiteralStyle = LiteralStyle {
    true_literal: "1",
    false_literal: "0",
    bytes: BytesLiteral::XQuoted,
};

/// SQLite dialect. The database file is the only namespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn types(&self) -> &dyn NativeTypes {
        &SqliteTypes
    }

    fn max_identifier_length(&self) -> usize {
        128
    }

    // Foreign keys can only be declared in CREATE TABLE.
    fn supports_add_foreign_key(&self) -> bool {
        false
    }

    fn render_literal(&self, value: &SqlValue) -> String {
        common::render_value(self, value, LITERALS)
    }

    fn select_page(&self, table: &Table, offset: u64, limit: usize) -> String {
        let base = common::paged_select(self, table, "rowid", |col, quoted| {
            match common::canonical_of(self, col) {
                CanonicalType::Unknown(_) => format!("CAST({} AS TEXT) AS {}", quoted, quoted),
                _ => quoted.to_string(),
            }
        });
        format!("{} LIMIT {} OFFSET {}", base, limit, offset)
    }

    fn identity_clause(&self, _col: &Column) -> String {
        String::new()
    }

    fn identity_primary_key_column(&self, col: &Column, quote: bool) -> Option<String> {
        Some(format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT",
            ident(self, &col.name, quote)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_test_column, make_test_table};

    #[test]
    fn test_select_page_falls_back_to_rowid() {
        let table = make_test_table("", "notes", vec![make_test_column("body", "TEXT")]);
        assert_eq!(
            SqliteDialect.select_page(&table, 0, 50),
            "SELECT \"body\" FROM \"notes\" ORDER BY rowid LIMIT 50 OFFSET 0"
        );
    }

    #[test]
    fn test_identity_is_inline_primary_key() {
        let col = make_test_column("id", "INTEGER");
        assert_eq!(
            SqliteDialect.identity_primary_key_column(&col, true).unwrap(),
            "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"
        );
        assert!(!SqliteDialect.supports_owners());
        assert!(!SqliteDialect.supports_add_foreign_key());
    }
}
