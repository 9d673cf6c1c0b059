//! Per-engine type vocabularies.
//!
//! Each engine implements [`ToCanonical`] and [`FromCanonical`]. `from_canonical`
//! only returns exact equivalents; widening is the mapper's job.

use super::canonical::{CanonicalType, CanonicalTypeInfo, FromCanonical, NativeType, ToCanonical};

fn length_or(max_length: i32, default: u32) -> u32 {
    if max_length > 0 {
        max_length as u32
    } else {
        default
    }
}

fn decimal(precision: i32, scale: i32, default_precision: u16) -> CanonicalType {
    CanonicalType::Decimal {
        precision: if precision > 0 {
            precision as u16
        } else {
            default_precision
        },
        scale: scale.max(0) as u16,
    }
}

fn unknown(dialect: &str, data_type: &str) -> CanonicalTypeInfo {
    CanonicalTypeInfo::lossy(
        CanonicalType::Unknown(data_type.to_string()),
        format!("Unknown {} type '{}'.", dialect, data_type),
    )
}

// =============================================================================
// SQL Server
// =============================================================================

/// SQL Server type vocabulary.
#[derive(Debug, Default, Clone, Copy)]
pub struct MssqlTypes;

impl ToCanonical for MssqlTypes {
    fn dialect_name(&self) -> &str {
        "mssql"
    }

    fn to_canonical(
        &self,
        data_type: &str,
        max_length: i32,
        precision: i32,
        scale: i32,
    ) -> CanonicalTypeInfo {
        let dt_lower = data_type.to_lowercase();

        let canonical = match dt_lower.as_str() {
            "bit" => CanonicalType::Boolean,
            "tinyint" => CanonicalType::UInt8,
            "smallint" => CanonicalType::Int16,
            "int" => CanonicalType::Int32,
            "bigint" => CanonicalType::Int64,
            "decimal" | "numeric" => decimal(precision, scale, 18),
            "money" => CanonicalType::Money,
            "smallmoney" => CanonicalType::SmallMoney,
            "real" => CanonicalType::Float32,
            "float" if precision > 0 && precision <= 24 => CanonicalType::Float32,
            "float" => CanonicalType::Float64,
            "char" | "nchar" => CanonicalType::Char(length_or(max_length, 1)),
            "varchar" | "nvarchar" if max_length == -1 => CanonicalType::Text,
            "varchar" | "nvarchar" => CanonicalType::Varchar(length_or(max_length, 1)),
            "sysname" => CanonicalType::Varchar(128),
            "text" | "ntext" => CanonicalType::Text,
            "binary" => CanonicalType::Binary(length_or(max_length, 1)),
            "varbinary" if max_length == -1 => CanonicalType::Blob,
            "varbinary" => CanonicalType::Varbinary(length_or(max_length, 1)),
            "image" => CanonicalType::Blob,
            "rowversion" | "timestamp" => CanonicalType::Binary(8),
            "date" => CanonicalType::Date,
            "time" => CanonicalType::Time,
            "datetime" | "datetime2" | "smalldatetime" => CanonicalType::DateTime,
            "datetimeoffset" => CanonicalType::DateTimeTz,
            "uniqueidentifier" => CanonicalType::Uuid,
            "xml" => CanonicalType::Xml,
            _ => return unknown("mssql", data_type),
        };
        CanonicalTypeInfo::lossless(canonical)
    }
}

impl FromCanonical for MssqlTypes {
    fn dialect_name(&self) -> &str {
        "mssql"
    }

    fn from_canonical(&self, canonical: &CanonicalType) -> Option<NativeType> {
        Some(match canonical {
            CanonicalType::Boolean => NativeType::plain("bit"),
            CanonicalType::UInt8 => NativeType::plain("tinyint"),
            CanonicalType::Int16 => NativeType::plain("smallint"),
            CanonicalType::Int32 => NativeType::plain("int"),
            CanonicalType::Int64 => NativeType::plain("bigint"),
            CanonicalType::Float32 => NativeType::plain("real"),
            CanonicalType::Float64 => NativeType::plain("float"),
            CanonicalType::Decimal { precision, scale } if *precision <= 38 => {
                NativeType::numeric("decimal", i32::from(*precision), i32::from(*scale))
            }
            CanonicalType::Money => NativeType::plain("money"),
            CanonicalType::SmallMoney => NativeType::plain("smallmoney"),
            CanonicalType::Char(n) if *n <= 4000 => NativeType::sized("nchar", *n as i32),
            CanonicalType::Varchar(n) if *n <= 4000 => NativeType::sized("nvarchar", *n as i32),
            CanonicalType::Text => NativeType::sized("nvarchar", -1),
            CanonicalType::Binary(n) if *n <= 8000 => NativeType::sized("binary", *n as i32),
            CanonicalType::Varbinary(n) if *n <= 8000 => NativeType::sized("varbinary", *n as i32),
            CanonicalType::Blob => NativeType::sized("varbinary", -1),
            CanonicalType::Date => NativeType::plain("date"),
            CanonicalType::Time => NativeType::plain("time"),
            CanonicalType::DateTime => NativeType::plain("datetime2"),
            CanonicalType::DateTimeTz => NativeType::plain("datetimeoffset"),
            CanonicalType::Uuid => NativeType::plain("uniqueidentifier"),
            CanonicalType::Xml => NativeType::plain("xml"),
            _ => return None,
        })
    }
}

// =============================================================================
// PostgreSQL
// =============================================================================

/// PostgreSQL type vocabulary.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresTypes;

impl ToCanonical for PostgresTypes {
    fn dialect_name(&self) -> &str {
        "postgres"
    }

    fn to_canonical(
        &self,
        data_type: &str,
        max_length: i32,
        precision: i32,
        scale: i32,
    ) -> CanonicalTypeInfo {
        let dt_lower = data_type.to_lowercase();

        let canonical = match dt_lower.as_str() {
            "boolean" | "bool" => CanonicalType::Boolean,
            "smallint" | "int2" | "smallserial" => CanonicalType::Int16,
            "integer" | "int" | "int4" | "serial" => CanonicalType::Int32,
            "bigint" | "int8" | "bigserial" => CanonicalType::Int64,
            "real" | "float4" => CanonicalType::Float32,
            "double precision" | "float8" => CanonicalType::Float64,
            "numeric" | "decimal" if precision <= 0 => {
                return CanonicalTypeInfo::lossy(
                    decimal(38, 10, 38),
                    "Unconstrained numeric mapped to DECIMAL(38,10).",
                );
            }
            "numeric" | "decimal" => decimal(precision, scale, 38),
            "money" => CanonicalType::Money,
            "character" | "char" | "bpchar" => CanonicalType::Char(length_or(max_length, 1)),
            "character varying" | "varchar" if max_length <= 0 => CanonicalType::Text,
            "character varying" | "varchar" => CanonicalType::Varchar(max_length as u32),
            "text" | "citext" | "name" => CanonicalType::Text,
            "bytea" => CanonicalType::Blob,
            "date" => CanonicalType::Date,
            "time" | "time without time zone" => CanonicalType::Time,
            "timestamp" | "timestamp without time zone" => CanonicalType::DateTime,
            "timestamptz" | "timestamp with time zone" => CanonicalType::DateTimeTz,
            "interval" => CanonicalType::Interval,
            "uuid" => CanonicalType::Uuid,
            "json" | "jsonb" => CanonicalType::Json,
            "xml" => CanonicalType::Xml,
            _ => return unknown("postgres", data_type),
        };
        CanonicalTypeInfo::lossless(canonical)
    }
}

impl FromCanonical for PostgresTypes {
    fn dialect_name(&self) -> &str {
        "postgres"
    }

    fn from_canonical(&self, canonical: &CanonicalType) -> Option<NativeType> {
        Some(match canonical {
            CanonicalType::Boolean => NativeType::plain("boolean"),
            CanonicalType::Int16 => NativeType::plain("smallint"),
            CanonicalType::Int32 => NativeType::plain("integer"),
            CanonicalType::Int64 => NativeType::plain("bigint"),
            CanonicalType::Float32 => NativeType::plain("real"),
            CanonicalType::Float64 => NativeType::plain("double precision"),
            CanonicalType::Decimal { precision, scale } if *precision <= 1000 => {
                NativeType::numeric("numeric", i32::from(*precision), i32::from(*scale))
            }
            CanonicalType::Char(n) => NativeType::sized("char", *n as i32),
            CanonicalType::Varchar(n) if *n <= 10_485_760 => {
                NativeType::sized("varchar", *n as i32)
            }
            CanonicalType::Text => NativeType::plain("text"),
            CanonicalType::Blob => NativeType::plain("bytea"),
            CanonicalType::Date => NativeType::plain("date"),
            CanonicalType::Time => NativeType::plain("time"),
            CanonicalType::DateTime => NativeType::plain("timestamp"),
            CanonicalType::DateTimeTz => NativeType::plain("timestamptz"),
            CanonicalType::Interval => NativeType::plain("interval"),
            CanonicalType::Uuid => NativeType::plain("uuid"),
            CanonicalType::Json => NativeType::plain("jsonb"),
            CanonicalType::Xml => NativeType::plain("xml"),
            _ => return None,
        })
    }
}

// =============================================================================
// MySQL
// =============================================================================

/// MySQL/MariaDB type vocabulary.
///
/// Column types are expected as `COLUMN_TYPE` renders them, parsed with
/// [`NativeType::parse`], so `tinyint(1)` arrives as `tinyint` with length 1.
#[derive(Debug, Default, Clone, Copy)]
pub struct MysqlTypes;

impl ToCanonical for MysqlTypes {
    fn dialect_name(&self) -> &str {
        "mysql"
    }

    fn to_canonical(
        &self,
        data_type: &str,
        max_length: i32,
        precision: i32,
        scale: i32,
    ) -> CanonicalTypeInfo {
        let dt_lower = data_type.to_lowercase();

        let canonical = match dt_lower.as_str() {
            "tinyint" | "bool" | "boolean" if max_length == 1 || !dt_lower.starts_with('t') => {
                CanonicalType::Boolean
            }
            "bit" if max_length <= 1 => CanonicalType::Boolean,
            "tinyint" => CanonicalType::Int16,
            "tinyint unsigned" => CanonicalType::UInt8,
            "smallint" => CanonicalType::Int16,
            "smallint unsigned" | "mediumint" | "mediumint unsigned" | "int" | "integer" => {
                CanonicalType::Int32
            }
            "int unsigned" | "integer unsigned" | "bigint" => CanonicalType::Int64,
            "bigint unsigned" => decimal(20, 0, 20),
            "float" => CanonicalType::Float32,
            "double" | "real" | "double precision" => CanonicalType::Float64,
            "decimal" | "numeric" | "dec" => decimal(precision, scale, 10),
            "char" => CanonicalType::Char(length_or(max_length, 1)),
            "varchar" => CanonicalType::Varchar(length_or(max_length, 255)),
            "tinytext" | "text" | "mediumtext" | "longtext" => CanonicalType::Text,
            "binary" => CanonicalType::Binary(length_or(max_length, 1)),
            "varbinary" => CanonicalType::Varbinary(length_or(max_length, 255)),
            "tinyblob" | "blob" | "mediumblob" | "longblob" => CanonicalType::Blob,
            "date" => CanonicalType::Date,
            "time" => CanonicalType::Time,
            "datetime" | "timestamp" => CanonicalType::DateTime,
            "year" => CanonicalType::Year,
            "json" => CanonicalType::Json,
            "enum" | "set" => {
                return CanonicalTypeInfo::lossy(
                    CanonicalType::Varchar(255),
                    format!("MySQL {} values stored as VARCHAR(255).", dt_lower),
                );
            }
            _ => return unknown("mysql", data_type),
        };
        CanonicalTypeInfo::lossless(canonical)
    }
}

impl FromCanonical for MysqlTypes {
    fn dialect_name(&self) -> &str {
        "mysql"
    }

    fn from_canonical(&self, canonical: &CanonicalType) -> Option<NativeType> {
        Some(match canonical {
            CanonicalType::Boolean => NativeType::sized("tinyint", 1),
            CanonicalType::UInt8 => NativeType::plain("tinyint unsigned"),
            CanonicalType::Int16 => NativeType::plain("smallint"),
            CanonicalType::Int32 => NativeType::plain("int"),
            CanonicalType::Int64 => NativeType::plain("bigint"),
            CanonicalType::Float32 => NativeType::plain("float"),
            CanonicalType::Float64 => NativeType::plain("double"),
            CanonicalType::Decimal { precision, scale } if *precision <= 65 && *scale <= 30 => {
                NativeType::numeric("decimal", i32::from(*precision), i32::from(*scale))
            }
            CanonicalType::Char(n) if *n <= 255 => NativeType::sized("char", *n as i32),
            // utf8mb4 rows are limited to 65,535 bytes.
            CanonicalType::Varchar(n) if *n <= 16_383 => NativeType::sized("varchar", *n as i32),
            CanonicalType::Text => NativeType::plain("longtext"),
            CanonicalType::Binary(n) if *n <= 255 => NativeType::sized("binary", *n as i32),
            CanonicalType::Varbinary(n) if *n <= 65_535 => {
                NativeType::sized("varbinary", *n as i32)
            }
            CanonicalType::Blob => NativeType::plain("longblob"),
            CanonicalType::Date => NativeType::plain("date"),
            CanonicalType::Time => NativeType::plain("time"),
            CanonicalType::DateTime => NativeType::plain("datetime"),
            CanonicalType::Year => NativeType::plain("year"),
            CanonicalType::Json => NativeType::plain("json"),
            _ => return None,
        })
    }
}

// =============================================================================
// SQLite
// =============================================================================

/// SQLite type vocabulary.
///
/// SQLite accepts any declared type name and stores values by affinity, so
/// declared names are chosen to round-trip. Decimals beyond 15 digits have no
/// exact storage and widen to text.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteTypes;

impl ToCanonical for SqliteTypes {
    fn dialect_name(&self) -> &str {
        "sqlite"
    }

    fn to_canonical(
        &self,
        data_type: &str,
        max_length: i32,
        precision: i32,
        scale: i32,
    ) -> CanonicalTypeInfo {
        let dt_upper = data_type.to_uppercase();

        let canonical = match dt_upper.as_str() {
            "BOOLEAN" | "BOOL" => CanonicalType::Boolean,
            "SMALLINT" => CanonicalType::Int16,
            "INT" | "MEDIUMINT" => CanonicalType::Int32,
            "INTEGER" | "BIGINT" => CanonicalType::Int64,
            "REAL" | "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" => CanonicalType::Float64,
            "NUMERIC" | "DECIMAL" if precision > 0 => decimal(precision, scale, 15),
            "CHAR" | "CHARACTER" | "NCHAR" => CanonicalType::Char(length_or(max_length, 1)),
            "VARCHAR" | "NVARCHAR" if max_length > 0 => CanonicalType::Varchar(max_length as u32),
            "TEXT" | "CLOB" | "VARCHAR" | "NVARCHAR" => CanonicalType::Text,
            "BLOB" | "" => CanonicalType::Blob,
            "DATE" => CanonicalType::Date,
            "TIME" => CanonicalType::Time,
            "DATETIME" | "TIMESTAMP" => CanonicalType::DateTime,
            // Declared type affinity rules, in SQLite's own precedence order.
            other if other.contains("INT") => CanonicalType::Int64,
            other if other.contains("CHAR") || other.contains("CLOB") || other.contains("TEXT") => {
                CanonicalType::Text
            }
            other if other.contains("BLOB") => CanonicalType::Blob,
            other if other.contains("REAL") || other.contains("FLOA") || other.contains("DOUB") => {
                CanonicalType::Float64
            }
            _ => return unknown("sqlite", data_type),
        };
        CanonicalTypeInfo::lossless(canonical)
    }
}

impl FromCanonical for SqliteTypes {
    fn dialect_name(&self) -> &str {
        "sqlite"
    }

    fn from_canonical(&self, canonical: &CanonicalType) -> Option<NativeType> {
        Some(match canonical {
            CanonicalType::Boolean => NativeType::plain("BOOLEAN"),
            CanonicalType::Int16 => NativeType::plain("SMALLINT"),
            CanonicalType::Int32 => NativeType::plain("INT"),
            CanonicalType::Int64 => NativeType::plain("INTEGER"),
            CanonicalType::Float64 => NativeType::plain("REAL"),
            CanonicalType::Decimal { precision, scale } if *precision <= 15 => {
                NativeType::numeric("NUMERIC", i32::from(*precision), i32::from(*scale))
            }
            CanonicalType::Char(n) => NativeType::sized("CHAR", *n as i32),
            CanonicalType::Varchar(n) => NativeType::sized("VARCHAR", *n as i32),
            CanonicalType::Text => NativeType::plain("TEXT"),
            CanonicalType::Blob => NativeType::plain("BLOB"),
            CanonicalType::Date => NativeType::plain("DATE"),
            CanonicalType::Time => NativeType::plain("TIME"),
            CanonicalType::DateTime => NativeType::plain("DATETIME"),
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::canonical::{NativeTypes, TypeArgs};

    fn all_tokens() -> Vec<CanonicalType> {
        vec![
            CanonicalType::Boolean,
            CanonicalType::UInt8,
            CanonicalType::Int16,
            CanonicalType::Int32,
            CanonicalType::Int64,
            CanonicalType::Float32,
            CanonicalType::Float64,
            CanonicalType::Decimal {
                precision: 10,
                scale: 2,
            },
            CanonicalType::Money,
            CanonicalType::SmallMoney,
            CanonicalType::Char(10),
            CanonicalType::Varchar(50),
            CanonicalType::Text,
            CanonicalType::Binary(16),
            CanonicalType::Varbinary(200),
            CanonicalType::Blob,
            CanonicalType::Date,
            CanonicalType::Time,
            CanonicalType::DateTime,
            CanonicalType::DateTimeTz,
            CanonicalType::Interval,
            CanonicalType::Year,
            CanonicalType::Uuid,
            CanonicalType::Json,
            CanonicalType::Xml,
        ]
    }

    /// Native → canonical → native reproduces the native type for every
    /// token the engine supports.
    fn assert_round_trip(types: &dyn NativeTypes) {
        let mut supported = 0;
        for token in all_tokens() {
            let Some(native) = types.from_canonical(&token) else {
                continue;
            };
            supported += 1;
            let rendered = native.to_string();
            let parsed = NativeType::parse(&rendered);
            let (len, p, s) = parsed.dimensions();
            let info = types.to_canonical(&parsed.name, len, p, s);
            assert_eq!(
                info.canonical_type, token,
                "{}: {} did not map back",
                types.dialect_name(),
                rendered
            );
            let again = types
                .from_canonical(&info.canonical_type)
                .map(|n| n.to_string());
            assert_eq!(again.as_deref(), Some(rendered.as_str()));
        }
        assert!(supported > 10);
    }

    #[test]
    fn test_mssql_round_trip() {
        assert_round_trip(&MssqlTypes);
    }

    #[test]
    fn test_postgres_round_trip() {
        assert_round_trip(&PostgresTypes);
    }

    #[test]
    fn test_mysql_round_trip() {
        assert_round_trip(&MysqlTypes);
    }

    #[test]
    fn test_sqlite_round_trip() {
        assert_round_trip(&SqliteTypes);
    }

    #[test]
    fn test_mssql_to_canonical() {
        let t = MssqlTypes;
        assert_eq!(t.to_canonical("nvarchar", -1, 0, 0).canonical_type, CanonicalType::Text);
        assert_eq!(
            t.to_canonical("decimal", 0, 10, 2).canonical_type,
            CanonicalType::Decimal {
                precision: 10,
                scale: 2
            }
        );
        assert_eq!(t.to_canonical("float", 0, 24, 0).canonical_type, CanonicalType::Float32);
        let geo = t.to_canonical("geography", 0, 0, 0);
        assert!(geo.is_lossy);
        assert_eq!(geo.canonical_type, CanonicalType::Unknown("geography".into()));
    }

    #[test]
    fn test_mssql_limits() {
        let t = MssqlTypes;
        assert!(t.from_canonical(&CanonicalType::Varchar(5000)).is_none());
        assert!(t
            .from_canonical(&CanonicalType::Decimal {
                precision: 50,
                scale: 2
            })
            .is_none());
        assert_eq!(
            t.from_canonical(&CanonicalType::Blob).map(|n| n.args),
            Some(TypeArgs::Length(-1))
        );
    }

    #[test]
    fn test_postgres_has_no_fixed_binary() {
        let t = PostgresTypes;
        assert!(t.from_canonical(&CanonicalType::Binary(16)).is_none());
        assert!(t.from_canonical(&CanonicalType::Varbinary(16)).is_none());
        assert_eq!(
            t.from_canonical(&CanonicalType::Blob).map(|n| n.to_string()),
            Some("bytea".to_string())
        );
    }

    #[test]
    fn test_mysql_tinyint() {
        let t = MysqlTypes;
        assert_eq!(t.to_canonical("tinyint", 1, 0, 0).canonical_type, CanonicalType::Boolean);
        assert_eq!(t.to_canonical("tinyint", 4, 0, 0).canonical_type, CanonicalType::Int16);
        assert_eq!(
            t.to_canonical("tinyint unsigned", 3, 0, 0).canonical_type,
            CanonicalType::UInt8
        );
        assert_eq!(t.to_canonical("boolean", 0, 0, 0).canonical_type, CanonicalType::Boolean);
    }

    #[test]
    fn test_sqlite_affinity() {
        let t = SqliteTypes;
        assert_eq!(
            t.to_canonical("UNSIGNED BIG INT", 0, 0, 0).canonical_type,
            CanonicalType::Int64
        );
        assert_eq!(
            t.to_canonical("varying character", 0, 0, 0).canonical_type,
            CanonicalType::Text
        );
        assert!(t
            .from_canonical(&CanonicalType::Decimal {
                precision: 19,
                scale: 4
            })
            .is_none());
    }
}
