//! Value encoding for SQL Server writes: TDS bulk load rows and bound
//! parameters for the INSERT path.

use std::borrow::Cow;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;
use tiberius::numeric::Numeric;
use tiberius::time::{Date, DateTime2, DateTimeOffset, Time};
use tiberius::{ColumnData, Query, TokenRow};

use crate::core::schema::{Column, Table};
use crate::core::value::{Row, SqlValue};

/// Strings and binaries above this many bytes go through INSERT instead.
const BULK_VALUE_LIMIT: usize = 8000;

/// Column types the bulk path encodes directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BulkKind {
    Bit,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Real,
    Float,
    Numeric(u8),
    String,
    Binary,
    Date,
    Time,
    DateTime2,
    DateTimeOffset,
    Guid,
}

impl BulkKind {
    fn of(col: &Column) -> Option<Self> {
        let bounded = col.max_length >= 0;
        let kind = match col.data_type.to_lowercase().as_str() {
            "bit" => Self::Bit,
            "tinyint" => Self::TinyInt,
            "smallint" => Self::SmallInt,
            "int" => Self::Int,
            "bigint" => Self::BigInt,
            "real" => Self::Real,
            "float" => Self::Float,
            "decimal" | "numeric" => Self::Numeric(u8::try_from(col.scale).ok()?),
            "char" | "varchar" | "nchar" | "nvarchar" if bounded => Self::String,
            "binary" | "varbinary" if bounded => Self::Binary,
            "date" => Self::Date,
            "time" => Self::Time,
            "datetime2" => Self::DateTime2,
            "datetimeoffset" => Self::DateTimeOffset,
            "uniqueidentifier" => Self::Guid,
            _ => return None,
        };
        Some(kind)
    }

    fn null(self) -> ColumnData<'static> {
        match self {
            Self::Bit => ColumnData::Bit(None),
            Self::TinyInt => ColumnData::U8(None),
            Self::SmallInt => ColumnData::I16(None),
            Self::Int => ColumnData::I32(None),
            Self::BigInt => ColumnData::I64(None),
            Self::Real => ColumnData::F32(None),
            Self::Float => ColumnData::F64(None),
            Self::Numeric(_) => ColumnData::Numeric(None),
            Self::String => ColumnData::String(None),
            Self::Binary => ColumnData::Binary(None),
            Self::Date => ColumnData::Date(None),
            Self::Time => ColumnData::Time(None),
            Self::DateTime2 => ColumnData::DateTime2(None),
            Self::DateTimeOffset => ColumnData::DateTimeOffset(None),
            Self::Guid => ColumnData::Guid(None),
        }
    }
}

/// Per-column kinds when every column can be bulk loaded.
///
/// Bulk load skips identity columns, so tables with one use INSERT.
pub(super) fn bulk_kinds(table: &Table) -> Option<Vec<BulkKind>> {
    if table.has_identity() {
        return None;
    }
    table.columns.iter().map(BulkKind::of).collect()
}

/// Encode a batch for bulk load, or `None` when any value does not fit
/// its column's bulk encoding.
pub(super) fn token_rows(kinds: &[BulkKind], rows: &[Row]) -> Option<Vec<TokenRow<'static>>> {
    rows.iter()
        .map(|row| {
            let mut token_row = TokenRow::new();
            for (value, kind) in row.iter().zip(kinds) {
                token_row.push(column_data(value, *kind)?);
            }
            Some(token_row)
        })
        .collect()
}

fn column_data(value: &SqlValue, kind: BulkKind) -> Option<ColumnData<'static>> {
    use BulkKind as K;
    let data = match (value, kind) {
        (SqlValue::Null, k) => k.null(),
        (SqlValue::Bool(b), K::Bit) => ColumnData::Bit(Some(*b)),
        (v, K::TinyInt) => ColumnData::U8(Some(u8::try_from(v.as_i64()?).ok()?)),
        (v, K::SmallInt) => ColumnData::I16(Some(i16::try_from(v.as_i64()?).ok()?)),
        (v, K::Int) => ColumnData::I32(Some(i32::try_from(v.as_i64()?).ok()?)),
        (v, K::BigInt) => ColumnData::I64(Some(v.as_i64()?)),
        (SqlValue::F32(f), K::Real) if f.is_finite() => ColumnData::F32(Some(*f)),
        (SqlValue::F32(f), K::Float) if f.is_finite() => ColumnData::F64(Some(f64::from(*f))),
        (SqlValue::F64(f), K::Float) if f.is_finite() => ColumnData::F64(Some(*f)),
        (SqlValue::Decimal(d), K::Numeric(scale)) => ColumnData::Numeric(Some(numeric(*d, scale)?)),
        (SqlValue::Text(s), K::String) if utf16_bytes(s) <= BULK_VALUE_LIMIT => {
            ColumnData::String(Some(Cow::Owned(s.clone())))
        }
        (SqlValue::Bytes(b), K::Binary) if b.len() <= BULK_VALUE_LIMIT => {
            ColumnData::Binary(Some(Cow::Owned(b.clone())))
        }
        (SqlValue::Uuid(u), K::Guid) => ColumnData::Guid(Some(*u)),
        (SqlValue::Date(d), K::Date) => ColumnData::Date(Some(tds_date(*d)?)),
        (SqlValue::Date(d), K::DateTime2) => ColumnData::DateTime2(Some(DateTime2::new(tds_date(*d)?, Time::new(0, 7)))),
        (SqlValue::Time(t), K::Time) => ColumnData::Time(Some(tds_time(*t))),
        (SqlValue::DateTime(dt), K::DateTime2) => ColumnData::DateTime2(Some(datetime2(*dt)?)),
        (SqlValue::DateTime(dt), K::DateTimeOffset) => {
            ColumnData::DateTimeOffset(Some(DateTimeOffset::new(datetime2(*dt)?, 0)))
        }
        (SqlValue::DateTimeOffset(dto), K::DateTimeOffset) => {
            let offset_minutes = i16::try_from(dto.offset().local_minus_utc() / 60).ok()?;
            ColumnData::DateTimeOffset(Some(DateTimeOffset::new(datetime2(dto.naive_utc())?, offset_minutes)))
        }
        _ => return None,
    };
    Some(data)
}

fn utf16_bytes(s: &str) -> usize {
    s.chars().map(|c| c.len_utf16() * 2).sum()
}

fn numeric(value: Decimal, scale: u8) -> Option<Numeric> {
    let mut scaled = value;
    scaled.rescale(u32::from(scale));
    if scaled.scale() != u32::from(scale) {
        return None;
    }
    Some(Numeric::new_with_scale(scaled.mantissa(), scale))
}

/// Days since 0001-01-01.
fn tds_date(date: NaiveDate) -> Option<Date> {
    let epoch = NaiveDate::from_ymd_opt(1, 1, 1)?;
    let days = u32::try_from((date - epoch).num_days()).ok()?;
    Some(Date::new(days))
}

/// Time of day in 100ns increments.
fn tds_time(time: NaiveTime) -> Time {
    let nanos = u64::from(time.num_seconds_from_midnight()) * 1_000_000_000 + u64::from(time.nanosecond());
    Time::new(nanos / 100, 7)
}

fn datetime2(dt: NaiveDateTime) -> Option<DateTime2> {
    Some(DateTime2::new(tds_date(dt.date())?, tds_time(dt.time())))
}

/// Bind one value. NULLs are typed as `varbinary` for binary columns and
/// `nvarchar` otherwise, which SQL Server converts implicitly.
pub(super) fn bind_value(query: &mut Query<'_>, value: &SqlValue, binary_column: bool) {
    match value {
        SqlValue::Null if binary_column => query.bind(Option::<Vec<u8>>::None),
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::I16(v) => query.bind(*v),
        SqlValue::I32(v) => query.bind(*v),
        SqlValue::I64(v) => query.bind(*v),
        SqlValue::F32(v) => query.bind(*v),
        SqlValue::F64(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.clone()),
        SqlValue::Bytes(v) => query.bind(v.clone()),
        SqlValue::Uuid(v) => query.bind(*v),
        SqlValue::Decimal(v) => query.bind(*v),
        SqlValue::DateTime(v) => query.bind(*v),
        SqlValue::DateTimeOffset(v) => query.bind(*v),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_test_column, make_test_table};
    use uuid::Uuid;

    fn column(name: &str, data_type: &str, max_length: i32) -> Column {
        let mut c = make_test_column(name, data_type);
        c.max_length = max_length;
        c
    }

    #[test]
    fn test_identity_and_max_columns_use_insert() {
        let mut table = make_test_table(
            "dbo",
            "t",
            vec![column("id", "int", 4), column("name", "nvarchar", 100)],
        );
        assert_eq!(bulk_kinds(&table), Some(vec![BulkKind::Int, BulkKind::String]));

        table.columns[0].is_identity = true;
        assert_eq!(bulk_kinds(&table), None);

        table.columns[0].is_identity = false;
        table.columns[1].max_length = -1;
        assert_eq!(bulk_kinds(&table), None);

        let money = make_test_table("dbo", "m", vec![column("amount", "money", 8)]);
        assert_eq!(bulk_kinds(&money), None);
    }

    #[test]
    fn test_values_encode_for_their_column() {
        let kinds = [BulkKind::TinyInt, BulkKind::Numeric(2), BulkKind::Guid, BulkKind::Bit];
        let id = Uuid::new_v4();
        let rows = token_rows(
            &kinds,
            &[vec![
                SqlValue::I64(200),
                SqlValue::Decimal(Decimal::new(15, 1)),
                SqlValue::Uuid(id),
                SqlValue::Null,
            ]],
        )
        .unwrap();
        assert_eq!(rows.len(), 1);

        assert!(matches!(column_data(&SqlValue::I64(200), BulkKind::TinyInt), Some(ColumnData::U8(Some(200)))));
        match column_data(&SqlValue::Decimal(Decimal::new(15, 1)), BulkKind::Numeric(2)) {
            Some(ColumnData::Numeric(Some(n))) => {
                assert_eq!(n.value(), 150);
                assert_eq!(n.scale(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(column_data(&SqlValue::Null, BulkKind::Guid), Some(ColumnData::Guid(None))));
    }

    #[test]
    fn test_values_that_do_not_fit_fall_back() {
        assert!(column_data(&SqlValue::I64(300), BulkKind::TinyInt).is_none());
        assert!(column_data(&SqlValue::Text("x".into()), BulkKind::Int).is_none());
        assert!(column_data(&SqlValue::F64(f64::NAN), BulkKind::Float).is_none());
        assert!(column_data(&SqlValue::Text("é".repeat(4001)), BulkKind::String).is_none());
        assert!(token_rows(&[BulkKind::Int], &[vec![SqlValue::I32(1)], vec![SqlValue::I64(1 << 40)]]).is_none());
    }

    #[test]
    fn test_temporal_encoding() {
        let date = NaiveDate::from_ymd_opt(1, 1, 2).unwrap();
        assert_eq!(tds_date(date).map(|d| d.days()), Some(1));

        let time = NaiveTime::from_hms_nano_opt(0, 0, 1, 500).unwrap();
        let encoded = tds_time(time);
        assert_eq!(encoded.increments(), 10_000_005);
        assert_eq!(encoded.scale(), 7);
    }
}
