//! Hub-and-spoke canonical type system for database type mapping.
//!
//! Every engine converts its native types to a [`CanonicalType`] and back.
//! Instead of n*(n-1) direct mappers for n engines, this approach only needs
//! 2n implementations:
//! - [`ToCanonical`]: native type → canonical type
//! - [`FromCanonical`]: canonical type → native type (exact matches only)
//!
//! ```text
//! Source DB  →  CanonicalType  →  Target DB
//!   mssql    →     Int32       →   sqlite
//!   postgres →     Int32       →   mysql
//! ```
//!
//! When a target has no exact equivalent, [`CanonicalType::widen`] yields the
//! next wider canonical type. The mapper walks that chain until the target
//! accepts a type; the chain never loses range or precision.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical type representation for cross-database type mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanonicalType {
    /// Boolean/bit type.
    Boolean,

    /// 8-bit unsigned integer (0-255).
    UInt8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,

    /// 32-bit floating point.
    Float32,
    /// 64-bit floating point.
    Float64,

    /// Exact decimal with precision and scale.
    Decimal { precision: u16, scale: u16 },
    /// Money type with fixed precision (19,4).
    Money,
    /// Small money type with fixed precision (10,4).
    SmallMoney,

    /// Fixed-length character string.
    Char(u32),
    /// Variable-length character string with max length.
    Varchar(u32),
    /// Unlimited text.
    Text,

    /// Fixed-length binary data.
    Binary(u32),
    /// Variable-length binary data with max length.
    Varbinary(u32),
    /// Unlimited binary data.
    Blob,

    Date,
    Time,
    /// Date and time without timezone.
    DateTime,
    /// Date and time with timezone.
    DateTimeTz,
    /// Time interval/duration.
    Interval,
    /// Year, stored as a small integer.
    Year,

    /// UUID/GUID (128-bit identifier).
    Uuid,
    Json,
    Xml,

    /// Type with no canonical equivalent; holds the native name.
    Unknown(String),
}

impl CanonicalType {
    /// The next wider canonical type, or `None` when this type is already
    /// the widest of its family.
    ///
    /// Every step can hold every value of the previous one. `Text` and
    /// `Blob` terminate the chains and must be supported by every engine.
    pub fn widen(&self) -> Option<CanonicalType> {
        use CanonicalType::*;
        Some(match self {
            Boolean => UInt8,
            UInt8 => Int16,
            Int16 => Int32,
            Int32 => Int64,
            Int64 => Decimal {
                precision: 20,
                scale: 0,
            },
            Float32 => Float64,
            Float64 => Text,
            Decimal { .. } => Text,
            SmallMoney => Decimal {
                precision: 10,
                scale: 4,
            },
            Money => Decimal {
                precision: 19,
                scale: 4,
            },
            Char(n) => Varchar(*n),
            Varchar(_) => Text,
            Text => return None,
            Binary(n) => Varbinary(*n),
            Varbinary(_) => Blob,
            Blob => return None,
            Date => DateTime,
            Time | DateTimeTz | Interval | Json | Xml | Unknown(_) => Text,
            DateTime => DateTimeTz,
            Year => Int16,
            Uuid => Char(36),
        })
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            CanonicalType::UInt8 | CanonicalType::Int16 | CanonicalType::Int32 | CanonicalType::Int64
        )
    }

    pub fn is_character(&self) -> bool {
        matches!(
            self,
            CanonicalType::Char(_)
                | CanonicalType::Varchar(_)
                | CanonicalType::Text
                | CanonicalType::Json
                | CanonicalType::Xml
        )
    }

    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            CanonicalType::Binary(_) | CanonicalType::Varbinary(_) | CanonicalType::Blob
        )
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalType::Boolean => write!(f, "BOOLEAN"),
            CanonicalType::UInt8 => write!(f, "UINT8"),
            CanonicalType::Int16 => write!(f, "SMALLINT"),
            CanonicalType::Int32 => write!(f, "INTEGER"),
            CanonicalType::Int64 => write!(f, "BIGINT"),
            CanonicalType::Float32 => write!(f, "FLOAT32"),
            CanonicalType::Float64 => write!(f, "FLOAT64"),
            CanonicalType::Decimal { precision, scale } => {
                write!(f, "DECIMAL({},{})", precision, scale)
            }
            CanonicalType::Money => write!(f, "MONEY"),
            CanonicalType::SmallMoney => write!(f, "SMALLMONEY"),
            CanonicalType::Char(n) => write!(f, "CHAR({})", n),
            CanonicalType::Varchar(n) => write!(f, "VARCHAR({})", n),
            CanonicalType::Text => write!(f, "TEXT"),
            CanonicalType::Binary(n) => write!(f, "BINARY({})", n),
            CanonicalType::Varbinary(n) => write!(f, "VARBINARY({})", n),
            CanonicalType::Blob => write!(f, "BLOB"),
            CanonicalType::Date => write!(f, "DATE"),
            CanonicalType::Time => write!(f, "TIME"),
            CanonicalType::DateTime => write!(f, "DATETIME"),
            CanonicalType::DateTimeTz => write!(f, "DATETIMETZ"),
            CanonicalType::Interval => write!(f, "INTERVAL"),
            CanonicalType::Year => write!(f, "YEAR"),
            CanonicalType::Uuid => write!(f, "UUID"),
            CanonicalType::Json => write!(f, "JSON"),
            CanonicalType::Xml => write!(f, "XML"),
            CanonicalType::Unknown(name) => write!(f, "UNKNOWN({})", name),
        }
    }
}

/// Result of converting a native type to canonical form.
#[derive(Debug, Clone)]
pub struct CanonicalTypeInfo {
    /// The canonical type representation.
    pub canonical_type: CanonicalType,
    /// Whether information was lost in the conversion to canonical.
    pub is_lossy: bool,
    /// Warning message if the conversion is lossy.
    pub warning: Option<String>,
}

impl CanonicalTypeInfo {
    /// Create a lossless canonical type conversion.
    pub fn lossless(canonical_type: CanonicalType) -> Self {
        Self {
            canonical_type,
            is_lossy: false,
            warning: None,
        }
    }

    /// Create a lossy canonical type conversion with a warning.
    pub fn lossy(canonical_type: CanonicalType, warning: impl Into<String>) -> Self {
        Self {
            canonical_type,
            is_lossy: true,
            warning: Some(warning.into()),
        }
    }
}

/// Arguments attached to a native type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeArgs {
    None,
    /// Length in characters or bytes; -1 means `max`.
    Length(i32),
    Precision(i32, i32),
}

/// A native type descriptor in one engine's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeType {
    pub name: String,
    pub args: TypeArgs,
}

impl NativeType {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: TypeArgs::None,
        }
    }

    pub fn sized(name: impl Into<String>, length: i32) -> Self {
        Self {
            name: name.into(),
            args: TypeArgs::Length(length),
        }
    }

    pub fn numeric(name: impl Into<String>, precision: i32, scale: i32) -> Self {
        Self {
            name: name.into(),
            args: TypeArgs::Precision(precision, scale),
        }
    }

    /// `(max_length, precision, scale)` in the column model's convention.
    pub fn dimensions(&self) -> (i32, i32, i32) {
        match self.args {
            TypeArgs::None => (0, 0, 0),
            TypeArgs::Length(n) => (n, 0, 0),
            TypeArgs::Precision(p, s) => (0, p, s),
        }
    }

    /// Parse a rendered type such as `nvarchar(max)`, `decimal(10, 2)` or
    /// `tinyint(3) unsigned`.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let Some(open) = text.find('(') else {
            return Self::plain(text.to_lowercase());
        };
        let close = text[open..].find(')').map(|i| open + i).unwrap_or(text.len());
        let inner = &text[open + 1..close.min(text.len())];
        let suffix = text.get(close + 1..).unwrap_or("").trim();
        let mut name = text[..open].trim().to_lowercase();
        if !suffix.is_empty() {
            name.push(' ');
            name.push_str(&suffix.to_lowercase());
        }

        let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
        let args = match parts.as_slice() {
            [len] if len.eq_ignore_ascii_case("max") => TypeArgs::Length(-1),
            [len] => len.parse().map(TypeArgs::Length).unwrap_or(TypeArgs::None),
            [p, s] => match (p.parse(), s.parse()) {
                (Ok(p), Ok(s)) => TypeArgs::Precision(p, s),
                _ => TypeArgs::None,
            },
            _ => TypeArgs::None,
        };
        Self { name, args }
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Modifiers such as "unsigned" follow the argument list.
        let (base, modifier) = match self.name.split_once(' ') {
            Some((b, m)) if m == "unsigned" => (b, Some(m)),
            _ => (self.name.as_str(), None),
        };
        match self.args {
            TypeArgs::None => write!(f, "{}", self.name)?,
            TypeArgs::Length(-1) => write!(f, "{}(max)", base)?,
            TypeArgs::Length(n) => write!(f, "{}({})", base, n)?,
            TypeArgs::Precision(p, s) => write!(f, "{}({},{})", base, p, s)?,
        }
        if let (Some(m), false) = (modifier, self.args == TypeArgs::None) {
            write!(f, " {}", m)?;
        }
        Ok(())
    }
}

/// Convert native database types to canonical types.
pub trait ToCanonical: Send + Sync {
    /// Get the dialect name (e.g., "mssql", "postgres", "mysql").
    fn dialect_name(&self) -> &str;

    /// Convert a native type to canonical form.
    ///
    /// # Arguments
    ///
    /// * `data_type` - The native type name (e.g., "varchar", "int4")
    /// * `max_length` - Maximum length for string/binary types (-1 for MAX)
    /// * `precision` - Precision for decimal types
    /// * `scale` - Scale for decimal types
    fn to_canonical(
        &self,
        data_type: &str,
        max_length: i32,
        precision: i32,
        scale: i32,
    ) -> CanonicalTypeInfo;
}

/// Convert canonical types to native database types.
#[allow(clippy::wrong_self_convention)]
pub trait FromCanonical: Send + Sync {
    /// Get the dialect name.
    fn dialect_name(&self) -> &str;

    /// The exact native equivalent, or `None` when the engine has none.
    fn from_canonical(&self, canonical: &CanonicalType) -> Option<NativeType>;
}

/// Both directions of one engine's type vocabulary.
pub trait NativeTypes: ToCanonical + FromCanonical {}

impl<T: ToCanonical + FromCanonical> NativeTypes for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_type_display() {
        assert_eq!(CanonicalType::Int32.to_string(), "INTEGER");
        assert_eq!(
            CanonicalType::Decimal {
                precision: 10,
                scale: 2
            }
            .to_string(),
            "DECIMAL(10,2)"
        );
        assert_eq!(CanonicalType::Varchar(50).to_string(), "VARCHAR(50)");
    }

    #[test]
    fn test_widen_never_narrows_integers() {
        let mut current = CanonicalType::UInt8;
        let mut chain = vec![current.clone()];
        while let Some(next) = current.widen() {
            chain.push(next.clone());
            current = next;
        }
        assert_eq!(
            chain,
            vec![
                CanonicalType::UInt8,
                CanonicalType::Int16,
                CanonicalType::Int32,
                CanonicalType::Int64,
                CanonicalType::Decimal {
                    precision: 20,
                    scale: 0
                },
                CanonicalType::Text,
            ]
        );
    }

    #[test]
    fn test_widen_binary_to_varbinary() {
        assert_eq!(
            CanonicalType::Binary(16).widen(),
            Some(CanonicalType::Varbinary(16))
        );
        assert_eq!(CanonicalType::Blob.widen(), None);
        assert_eq!(CanonicalType::Text.widen(), None);
    }

    #[test]
    fn test_native_type_parse() {
        assert_eq!(NativeType::parse("nvarchar(max)"), NativeType::sized("nvarchar", -1));
        assert_eq!(
            NativeType::parse("DECIMAL(10, 2)"),
            NativeType::numeric("decimal", 10, 2)
        );
        assert_eq!(NativeType::parse("text"), NativeType::plain("text"));
        assert_eq!(
            NativeType::parse("tinyint(3) unsigned"),
            NativeType::sized("tinyint unsigned", 3)
        );
    }

    #[test]
    fn test_native_type_display() {
        assert_eq!(NativeType::sized("varbinary", -1).to_string(), "varbinary(max)");
        assert_eq!(NativeType::numeric("numeric", 19, 4).to_string(), "numeric(19,4)");
        assert_eq!(NativeType::sized("tinyint unsigned", 3).to_string(), "tinyint(3) unsigned");
        assert_eq!(NativeType::plain("tinyint unsigned").to_string(), "tinyint unsigned");
        assert_eq!(
            NativeType::plain("double precision").to_string(),
            "double precision"
        );
    }
}
