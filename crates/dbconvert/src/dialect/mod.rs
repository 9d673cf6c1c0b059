//! Type vocabularies and expression translation.
//!
//! Types are converted hub-and-spoke: each engine maps its native types to a
//! [`CanonicalType`] and back, so any source can be combined with any target
//! with only two implementations per engine.
//!
//! - [`canonical`]: canonical type tokens, widening chains and conversion traits
//! - [`typemap`]: the per-engine vocabularies
//! - [`expr`]: lexical translation of defaults, checks and view bodies
//!
//! ```rust,ignore
//! let info = MssqlTypes.to_canonical("nvarchar", 50, 0, 0);
//! let native = PostgresTypes.from_canonical(&info.canonical_type); // varchar(50)
//! ```

pub mod canonical;
pub mod expr;
mod typemap;

pub use canonical::{
    CanonicalType, CanonicalTypeInfo, FromCanonical, NativeType, NativeTypes, ToCanonical,
    TypeArgs,
};
pub use typemap::{MssqlTypes, MysqlTypes, PostgresTypes, SqliteTypes};
