//! SQL Server dialect.

use crate::core::schema::{Column, Table, UserDefinedType};
use crate::core::traits::Dialect;
use crate::core::value::SqlValue;
use crate::dialect::canonical::{CanonicalType, NativeTypes};
use crate::dialect::MssqlTypes;
use crate::drivers::common::{self, BytesLiteral, LiteralStyle};
use crate::script::render::{ident, qualify};

const LITERALS: LiteralStyle = LiteralStyle {
    true_literal: "1",
    false_literal: "0",
    bytes: BytesLiteral::HexPrefix,
};

/// Microsoft SQL Server dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    fn extended_property(&self, comment: &str, owner: &str, table: &str, column: Option<&str>) -> String {
        let mut sql = format!(
            "EXEC sp_addextendedproperty @name = N'MS_Description', @value = {}, \
             @level0type = N'SCHEMA', @level0name = {}, @level1type = N'TABLE', @level1name = {}",
            self.string_literal(comment),
            self.string_literal(owner),
            self.string_literal(table)
        );
        if let Some(column) = column {
            sql.push_str(&format!(
                ", @level2type = N'COLUMN', @level2name = {}",
                self.string_literal(column)
            ));
        }
        sql
    }
}

impl Dialect for MssqlDialect {
    fn name(&self) -> &str {
        "mssql"
    }

    fn types(&self) -> &dyn NativeTypes {
        &MssqlTypes
    }

    fn quote_chars(&self) -> (char, char) {
        ('[', ']')
    }

    fn literal_prefix(&self) -> &str {
        "N"
    }

    fn max_identifier_length(&self) -> usize {
        128
    }

    fn default_owner(&self) -> &str {
        "dbo"
    }

    fn supports_sequences(&self) -> bool {
        true
    }

    fn supports_user_types(&self) -> bool {
        true
    }

    fn batch_separator(&self) -> &str {
        "\nGO"
    }

    fn render_literal(&self, value: &SqlValue) -> String {
        common::render_value(self, value, LITERALS)
    }

    fn select_page(&self, table: &Table, offset: u64, limit: usize) -> String {
        let base = common::paged_select(self, table, "(SELECT NULL)", |col, quoted| {
            match common::canonical_of(self, col) {
                // Types the driver cannot decode natively travel as text.
                CanonicalType::Xml | CanonicalType::Unknown(_) => {
                    format!("CONVERT(nvarchar(max), {}) AS {}", quoted, quoted)
                }
                CanonicalType::Money => format!("CAST({} AS decimal(19,4)) AS {}", quoted, quoted),
                CanonicalType::SmallMoney => format!("CAST({} AS decimal(10,4)) AS {}", quoted, quoted),
                _ => quoted.to_string(),
            }
        });
        format!("{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", base, offset, limit)
    }

    fn begin_transaction_sql(&self) -> &str {
        "BEGIN TRANSACTION"
    }

    fn commit_sql(&self) -> &str {
        "COMMIT TRANSACTION"
    }

    fn rollback_sql(&self) -> &str {
        "ROLLBACK TRANSACTION"
    }

    // A table value constructor holds at most 1000 rows.
    fn max_rows_per_insert(&self) -> usize {
        1000
    }

    fn identity_clause(&self, _col: &Column) -> String {
        " IDENTITY(1,1)".to_string()
    }

    fn computed_column(&self, col: &Column, expression: &str, quote: bool) -> String {
        format!("{} AS ({})", ident(self, &col.name, quote), expression)
    }

    fn supports_include_columns(&self) -> bool {
        true
    }

    fn create_user_type_sql(&self, udt: &UserDefinedType, base_type: &str, quote: bool) -> Option<String> {
        Some(format!(
            "CREATE TYPE {} FROM {}{}",
            qualify(self, &udt.owner, &udt.name, quote),
            base_type,
            if udt.is_nullable { " NULL" } else { " NOT NULL" }
        ))
    }

    fn create_owner_sql(&self, owner: &str, quote: bool) -> Option<String> {
        let create = format!("CREATE SCHEMA {}", ident(self, owner, quote));
        Some(format!(
            "IF SCHEMA_ID({}) IS NULL EXEC({})",
            self.string_literal(owner),
            self.string_literal(&create)
        ))
    }

    fn comment_statements(&self, table: &Table, _quote: bool) -> Vec<String> {
        let mut statements = Vec::new();
        if let Some(comment) = &table.comment {
            statements.push(self.extended_property(comment, &table.owner, &table.name, None));
        }
        for col in &table.columns {
            if let Some(comment) = &col.comment {
                statements.push(self.extended_property(comment, &table.owner, &table.name, Some(&col.name)));
            }
        }
        statements
    }

    fn pre_load_statements(&self, table: &Table, quote: bool) -> Vec<String> {
        if table.has_identity() {
            vec![format!(
                "SET IDENTITY_INSERT {} ON",
                qualify(self, &table.owner, &table.name, quote)
            )]
        } else {
            Vec::new()
        }
    }

    fn post_load_statements(&self, table: &Table, quote: bool) -> Vec<String> {
        if table.has_identity() {
            vec![format!(
                "SET IDENTITY_INSERT {} OFF",
                qualify(self, &table.owner, &table.name, quote)
            )]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_test_column, make_test_table};

    #[test]
    fn test_literals() {
        let d = MssqlDialect;
        assert_eq!(d.render_literal(&SqlValue::Bool(true)), "1");
        assert_eq!(d.render_literal(&SqlValue::Bytes(vec![0xAB, 0x01])), "0xAB01");
        assert_eq!(d.render_literal(&SqlValue::Text("a'b".into())), "N'a''b'");
        assert_eq!(d.render_literal(&SqlValue::Null), "NULL");
    }

    #[test]
    fn test_select_page_uses_offset_fetch() {
        let mut table = make_test_table(
            "dbo",
            "Orders",
            vec![make_test_column("id", "int"), make_test_column("meta", "sql_variant")],
        );
        table.primary_key = Some(crate::core::schema::PrimaryKey {
            name: "PK_Orders".into(),
            columns: vec!["id".into()],
        });
        assert_eq!(
            MssqlDialect.select_page(&table, 500, 250),
            "SELECT [id], CONVERT(nvarchar(max), [meta]) AS [meta] FROM [dbo].[Orders] \
             ORDER BY [id] OFFSET 500 ROWS FETCH NEXT 250 ROWS ONLY"
        );
    }

    #[test]
    fn test_identity_insert_wraps_load() {
        let mut id = make_test_column("id", "int");
        id.is_identity = true;
        let table = make_test_table("dbo", "T", vec![id]);
        assert_eq!(
            MssqlDialect.pre_load_statements(&table, true),
            vec!["SET IDENTITY_INSERT [dbo].[T] ON"]
        );
        assert_eq!(
            MssqlDialect.post_load_statements(&table, true),
            vec!["SET IDENTITY_INSERT [dbo].[T] OFF"]
        );
        let plain = make_test_table("dbo", "U", vec![make_test_column("a", "int")]);
        assert!(MssqlDialect.pre_load_statements(&plain, true).is_empty());
    }

    #[test]
    fn test_create_owner_is_guarded() {
        assert_eq!(
            MssqlDialect.create_owner_sql("sales", true).unwrap(),
            "IF SCHEMA_ID(N'sales') IS NULL EXEC(N'CREATE SCHEMA [sales]')"
        );
    }
}
