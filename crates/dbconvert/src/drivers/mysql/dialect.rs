//! MySQL/MariaDB dialect.

use crate::core::schema::{Column, Table};
use crate::core::traits::Dialect;
use crate::core::value::SqlValue;
use crate::dialect::canonical::{CanonicalType, NativeTypes};
use crate::dialect::MysqlTypes;
use crate::drivers::common::{self, BytesLiteral, LiteralStyle};
use crate::script::render::qualify;

const LITERALS: LiteralStyle = LiteralStyle {
    true_literal: "1",
    false_literal: "0",
    bytes: BytesLiteral::XQuoted,
};

/// MySQL/MariaDB dialect.
///
/// Carries the connection character set, which decides what text the
/// target can store. Compatible with MySQL 5.7+, 8.0+ and MariaDB 10.2+.
#[derive(Debug, Clone)]
pub struct MysqlDialect {
    charset: String,
}

impl MysqlDialect {
    pub fn with_charset(charset: impl Into<String>) -> Self {
        Self {
            charset: charset.into().to_lowercase(),
        }
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }
}

impl Default for MysqlDialect {
    fn default() -> Self {
        Self::with_charset("utf8mb4")
    }
}

impl Dialect for MysqlDialect {
    fn name(&self) -> &str {
        "mysql"
    }

    fn types(&self) -> &dyn NativeTypes {
        &MysqlTypes
    }

    fn quote_chars(&self) -> (char, char) {
        ('`', '`')
    }

    // Backslash is an escape character unless NO_BACKSLASH_ESCAPES is set.
    fn escape_literal_body(&self, value: &str) -> String {
        value.replace('\\', "\\\\").replace('\'', "''")
    }

    fn unescape_literal_body(&self, body: &str) -> String {
        let mut out = String::with_capacity(body.len());
        let mut chars = body.chars().peekable();
        while let Some(c) = chars.next() {
            match (c, chars.peek()) {
                ('\\', Some(&'\\')) | ('\'', Some(&'\'')) => {
                    out.push(c);
                    chars.next();
                }
                _ => out.push(c),
            }
        }
        out
    }

    fn max_identifier_length(&self) -> usize {
        64
    }

    fn render_literal(&self, value: &SqlValue) -> String {
        common::render_value(self, value, LITERALS)
    }

    fn is_supported_char(&self, c: char) -> bool {
        match self.charset.as_str() {
            "utf8" | "utf8mb3" => (c as u32) <= 0xFFFF,
            "latin1" => (c as u32) <= 0xFF,
            "ascii" => c.is_ascii(),
            _ => true,
        }
    }

    fn select_page(&self, table: &Table, offset: u64, limit: usize) -> String {
        let base = common::paged_select(self, table, "1", |col, quoted| {
            match common::canonical_of(self, col) {
                CanonicalType::Json | CanonicalType::Unknown(_) => {
                    format!("CAST({} AS CHAR) AS {}", quoted, quoted)
                }
                CanonicalType::Year => format!("CAST({} AS SIGNED) AS {}", quoted, quoted),
                _ => quoted.to_string(),
            }
        });
        format!("{} LIMIT {} OFFSET {}", base, limit, offset)
    }

    fn begin_transaction_sql(&self) -> &str {
        "START TRANSACTION"
    }

    fn identity_clause(&self, _col: &Column) -> String {
        " AUTO_INCREMENT".to_string()
    }

    fn inline_column_comment(&self, comment: &str) -> Option<String> {
        Some(format!(" COMMENT {}", self.string_literal(comment)))
    }

    fn comment_statements(&self, table: &Table, quote: bool) -> Vec<String> {
        match &table.comment {
            Some(comment) => vec![format!(
                "ALTER TABLE {} COMMENT = {}",
                qualify(self, &table.owner, &table.name, quote),
                self.string_literal(comment)
            )],
            None => Vec::new(),
        }
    }
}
