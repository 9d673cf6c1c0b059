//! Row value translation between engines.

use std::sync::Arc;

use uuid::Uuid;

use crate::core::schema::Column;
use crate::core::traits::Dialect;
use crate::core::value::{Row, SqlValue};
use crate::dialect::canonical::{CanonicalType, NativeType};

/// Coerces source values to what the target column expects.
///
/// Drivers already decode into [`SqlValue`]; what remains is the gap between
/// type systems (booleans stored as integers, UUIDs stored as text) and the
/// characters the target encoding cannot hold.
pub struct ValueTranslator {
    dialect: Arc<dyn Dialect>,
    /// Canonical type of each target column, in load order.
    targets: Vec<CanonicalType>,
    strip_unsupported: bool,
}

impl ValueTranslator {
    pub fn new(dialect: Arc<dyn Dialect>, columns: &[Column], strip_unsupported: bool) -> Self {
        let targets = columns
            .iter()
            .map(|c| {
                let native = NativeType::parse(&c.data_type);
                dialect
                    .types()
                    .to_canonical(&native.name, c.max_length, c.precision, c.scale)
                    .canonical_type
            })
            .collect();
        Self {
            dialect,
            targets,
            strip_unsupported,
        }
    }

    pub fn translate_row(&self, row: Row) -> Row {
        row.into_iter()
            .enumerate()
            .map(|(i, value)| match self.targets.get(i) {
                Some(target) => self.translate(value, target),
                None => value,
            })
            .collect()
    }

    fn translate(&self, value: SqlValue, target: &CanonicalType) -> SqlValue {
        let value = coerce(value, target);
        match value {
            SqlValue::Text(s) if self.strip_unsupported => SqlValue::Text(self.strip(s)),
            other => other,
        }
    }

    /// Remove characters the target encoding cannot store.
    fn strip(&self, text: String) -> String {
        if text.chars().all(|c| self.dialect.is_supported_char(c)) {
            return text;
        }
        text.chars().filter(|c| self.dialect.is_supported_char(*c)).collect()
    }
}

fn coerce(value: SqlValue, target: &CanonicalType) -> SqlValue {
    use CanonicalType as C;
    match (value, target) {
        (SqlValue::I16(v), C::Boolean) => SqlValue::Bool(v != 0),
        (SqlValue::I32(v), C::Boolean) => SqlValue::Bool(v != 0),
        (SqlValue::I64(v), C::Boolean) => SqlValue::Bool(v != 0),
        (SqlValue::Bool(v), t) if t.is_integer() => SqlValue::I16(v as i16),
        (SqlValue::Text(s), C::Uuid) => match Uuid::parse_str(s.trim()) {
            Ok(u) => SqlValue::Uuid(u),
            Err(_) => SqlValue::Text(s),
        },
        (SqlValue::Bytes(b), C::Uuid) if b.len() == 16 => match Uuid::from_slice(&b) {
            Ok(u) => SqlValue::Uuid(u),
            Err(_) => SqlValue::Bytes(b),
        },
        (SqlValue::Text(s), C::Boolean) => match s.trim().to_lowercase().as_str() {
            "1" | "true" | "t" | "y" | "yes" => SqlValue::Bool(true),
            "0" | "false" | "f" | "n" | "no" => SqlValue::Bool(false),
            _ => SqlValue::Text(s),
        },
        (v @ (SqlValue::Text(_) | SqlValue::Null | SqlValue::Bytes(_)), _) => v,
        (v, t) if t.is_character() => match v.to_text() {
            Some(text) => SqlValue::Text(text),
            None => v,
        },
        (v, _) => v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::mysql::MysqlDialect;
    use crate::drivers::postgres::PostgresDialect;
    use crate::testing::make_test_column;

    #[test]
    fn test_boolean_and_uuid_coercion() {
        let cols = vec![
            make_test_column("flag", "boolean"),
            make_test_column("id", "uuid"),
            make_test_column("n", "smallint"),
            make_test_column("label", "text"),
        ];
        let t = ValueTranslator::new(Arc::new(PostgresDialect), &cols, false);
        let uuid = Uuid::new_v4();
        let row = t.translate_row(vec![
            SqlValue::I16(1),
            SqlValue::Text(uuid.to_string()),
            SqlValue::Bool(true),
            SqlValue::I32(42),
        ]);
        assert_eq!(
            row,
            vec![
                SqlValue::Bool(true),
                SqlValue::Uuid(uuid),
                SqlValue::I16(1),
                SqlValue::Text("42".into()),
            ]
        );
    }

    #[test]
    fn test_strip_unsupported_characters() {
        let cols = vec![make_test_column("c", "text")];
        let pg = ValueTranslator::new(Arc::new(PostgresDialect), &cols, true);
        assert_eq!(
            pg.translate_row(vec![SqlValue::Text("a\0b".into())]),
            vec![SqlValue::Text("ab".into())]
        );

        let pg_keep = ValueTranslator::new(Arc::new(PostgresDialect), &cols, false);
        assert_eq!(
            pg_keep.translate_row(vec![SqlValue::Text("a\0b".into())]),
            vec![SqlValue::Text("a\0b".into())]
        );

        let utf8 = MysqlDialect::with_charset("utf8");
        let my = ValueTranslator::new(Arc::new(utf8), &cols, true);
        assert_eq!(
            my.translate_row(vec![SqlValue::Text("ok 😀".into())]),
            vec![SqlValue::Text("ok ".into())]
        );
    }

    #[test]
    fn test_nulls_pass_through() {
        let cols = vec![make_test_column("flag", "boolean")];
        let t = ValueTranslator::new(Arc::new(PostgresDialect), &cols, true);
        assert_eq!(t.translate_row(vec![SqlValue::Null]), vec![SqlValue::Null]);
    }
}
