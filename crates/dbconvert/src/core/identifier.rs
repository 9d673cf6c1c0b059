//! Identifier and expression screening for generated SQL.
//!
//! Identifiers cannot be bound as parameters, so every name that reaches a
//! generated statement is quoted by the dialect. Before that, names read from
//! a catalog are screened for values no engine accepts, and expressions
//! copied from one catalog into another engine's DDL (defaults, check
//! constraints, computed columns) are screened for statement injection.

use crate::error::{ConvertError, Result};

/// Upper bound for any identifier, across engines.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier read from a catalog.
///
/// Rejects empty names, names containing NUL and names longer than
/// [`MAX_IDENTIFIER_LENGTH`] characters.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ConvertError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(ConvertError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    let len = name.chars().count();
    if len > MAX_IDENTIFIER_LENGTH {
        return Err(ConvertError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} characters (got {}): {:?}",
            MAX_IDENTIFIER_LENGTH, len, name
        )));
    }

    Ok(())
}

/// Procedures that must never appear in a copied expression.
const DANGEROUS_PROCEDURES: &[&str] = &[
    "xp_cmdshell",
    "xp_regread",
    "xp_regwrite",
    "xp_dirtree",
    "xp_fileexist",
    "sp_executesql",
    "sp_execute",
    "sp_oacreate",
    "sp_oamethod",
    "sp_configure",
];

/// Validate an expression copied into DDL (default, check or computed).
///
/// Rejects statement separators and comment markers outside string
/// literals, `EXEC`/`EXECUTE` keywords and known dangerous procedures.
pub fn validate_expression(definition: &str) -> Result<()> {
    let code = strip_string_literals(definition);
    let lower = code.to_lowercase();

    if code.contains(';') {
        return Err(ConvertError::Config(format!(
            "SECURITY: Expression contains semicolon (possible injection): {:?}",
            definition
        )));
    }

    if code.contains("--") || code.contains("/*") || code.contains("*/") {
        return Err(ConvertError::Config(format!(
            "SECURITY: Expression contains SQL comment markers (possible injection): {:?}",
            definition
        )));
    }

    if words(&lower).any(|w| w == "exec" || w == "execute") {
        return Err(ConvertError::Config(format!(
            "SECURITY: Expression contains EXEC/EXECUTE keyword (possible injection): {:?}",
            definition
        )));
    }

    if let Some(proc) = words(&lower).find(|w| DANGEROUS_PROCEDURES.contains(w)) {
        return Err(ConvertError::Config(format!(
            "SECURITY: Expression contains dangerous stored procedure '{}' (possible injection): {:?}",
            proc, definition
        )));
    }

    Ok(())
}

fn words(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
}

/// Replace the contents of `'...'` literals with spaces so that only code is
/// inspected. Doubled quotes inside a literal stay part of it.
fn strip_string_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if in_literal && chars.peek() == Some(&'\'') {
                chars.next();
                out.push_str("  ");
                continue;
            }
            in_literal = !in_literal;
            out.push(c);
        } else if in_literal {
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("column with spaces").is_ok());
        assert!(validate_identifier("日本語").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_empty() {
        let result = validate_identifier("");
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_validate_identifier_rejects_null_byte() {
        let result = validate_identifier("table\0name");
        assert!(result.unwrap_err().to_string().contains("null byte"));
    }

    #[test]
    fn test_validate_identifier_length() {
        assert!(validate_identifier(&"a".repeat(MAX_IDENTIFIER_LENGTH)).is_ok());
        let result = validate_identifier(&"a".repeat(MAX_IDENTIFIER_LENGTH + 1));
        assert!(result.unwrap_err().to_string().contains("maximum length"));
    }

    #[test]
    fn test_validate_expression_accepts_constraints() {
        assert!(validate_expression("[value] > 0").is_ok());
        assert!(validate_expression("status IN ('active', 'inactive')").is_ok());
        assert!(validate_expression("getdate()").is_ok());
        // Separators inside literals are data.
        assert!(validate_expression("note <> 'a;b -- c'").is_ok());
        assert!(validate_expression("name <> 'it''s; fine'").is_ok());
        assert!(validate_expression("sp_rate > 1").is_ok());
    }

    #[test]
    fn test_validate_expression_rejects_injection() {
        assert!(validate_expression("1=1; DROP TABLE users").is_err());
        assert!(validate_expression("1=1 -- comment").is_err());
        assert!(validate_expression("1=1 /* x */").is_err());
        assert!(validate_expression("EXEC('x')").is_err());
        assert!(validate_expression("xp_cmdshell('dir')").is_err());
    }
}
