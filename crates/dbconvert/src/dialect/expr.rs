//! Expression translation between dialects.
//!
//! This is a lexical rewrite, not a SQL parser. It handles the expressions
//! found in catalogs (column defaults, check constraints, computed columns)
//! and the identifier quoting of view bodies:
//!
//! - redundant outer parentheses are removed (`((0))` becomes `0`)
//! - quoted identifiers are re-quoted for the target
//! - string literals are re-escaped (`N'..'`, MySQL backslashes)
//! - PostgreSQL `::type` casts are dropped
//! - common functions are mapped through a synonym table
//!
//! Functions known to have no portable equivalent make the translation fail
//! with `None`, so callers can report the object instead of emitting broken
//! DDL.

use crate::core::traits::Dialect;
use crate::core::value::SqlValue;
use crate::script::render;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Full,
    QuotesOnly,
}

/// Translate a default, check or computed expression from `source` to
/// `target` syntax. Returns `None` when the expression uses a function with
/// no equivalent on the target.
pub fn translate_expression(
    source: &dyn Dialect,
    target: &dyn Dialect,
    expr: &str,
    quote: bool,
) -> Option<String> {
    let stripped = strip_redundant_parens(expr);
    if source.name() == target.name() {
        return Some(stripped.to_string());
    }
    rewrite(source, target, stripped, quote, Mode::Full)
}

/// Re-quote identifiers and re-escape literals, leaving everything else as
/// written. Used for view bodies, which are not otherwise translated.
pub fn translate_identifiers(source: &dyn Dialect, target: &dyn Dialect, sql: &str, quote: bool) -> String {
    if source.name() == target.name() {
        return sql.to_string();
    }
    rewrite(source, target, sql, quote, Mode::QuotesOnly).unwrap_or_else(|| sql.to_string())
}

/// Remove parentheses that wrap the whole expression.
pub fn strip_redundant_parens(expr: &str) -> &str {
    let mut current = expr.trim();
    while current.starts_with('(') && current.ends_with(')') && wraps_whole(current) {
        current = current[1..current.len() - 1].trim();
    }
    current
}

/// Whether the opening parenthesis at position 0 closes at the last position.
fn wraps_whole(expr: &str) -> bool {
    let mut depth = 0i32;
    let mut in_literal = false;
    let last = expr.len() - 1;
    for (idx, c) in expr.char_indices() {
        match c {
            '\'' => in_literal = !in_literal,
            '(' if !in_literal => depth += 1,
            ')' if !in_literal => {
                depth -= 1;
                if depth == 0 && idx != last {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// The select body of a view definition.
///
/// Catalogs return either the full `CREATE VIEW name [(cols)] [WITH ...] AS
/// body` statement or only the body; both yield the body.
pub fn extract_view_body(definition: &str) -> &str {
    let trimmed = definition.trim();
    if !trimmed
        .get(..6)
        .map(|p| p.eq_ignore_ascii_case("create"))
        .unwrap_or(false)
    {
        return trimmed.trim_end_matches(';').trim();
    }

    let mut seen_view = false;
    let mut quote: Option<char> = None;
    let mut word_start: Option<usize> = None;
    for (idx, c) in trimmed.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        let is_word = c.is_alphanumeric() || c == '_';
        match (word_start, is_word) {
            (None, true) => word_start = Some(idx),
            (Some(start), false) => {
                let word = &trimmed[start..idx];
                if word.eq_ignore_ascii_case("view") {
                    seen_view = true;
                } else if seen_view && word.eq_ignore_ascii_case("as") {
                    return trimmed[idx..].trim().trim_end_matches(';').trim();
                }
                word_start = None;
            }
            _ => {}
        }
        match c {
            '[' => quote = Some(']'),
            '"' | '`' | '\'' => quote = Some(c),
            _ => {}
        }
    }
    trimmed
}

fn rewrite(source: &dyn Dialect, target: &dyn Dialect, sql: &str, quote: bool, mode: Mode) -> Option<String> {
    let (open, close) = source.quote_chars();
    let backslash_escapes = source.escape_literal_body("\\") != "\\";
    let chars: Vec<char> = sql.chars().collect();
    let len = chars.len();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut i = 0;

    while i < len {
        let c = chars[i];

        // National literal prefix; the target decides its own prefix.
        if (c == 'N' || c == 'n') && chars.get(i + 1) == Some(&'\'') && !prev_is_word(&chars, i) {
            i += 1;
            continue;
        }

        if c == '\'' {
            let (raw, next) = scan_literal(&chars, i, backslash_escapes);
            out.push_str(&target.string_literal(&source.unescape_literal_body(&raw)));
            i = next;
            continue;
        }

        if c == open || (c == '"' && open != '`') {
            let closing = if c == open { close } else { '"' };
            let (name, next) = scan_quoted(&chars, i, closing);
            out.push_str(&render::ident(target, &name, quote));
            i = next;
            continue;
        }

        if mode == Mode::Full && c == ':' && chars.get(i + 1) == Some(&':') {
            i = skip_cast(&chars, i + 2);
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < len && is_word_char(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            if mode == Mode::QuotesOnly {
                out.push_str(&word);
                continue;
            }

            let mut j = i;
            while j < len && chars[j].is_whitespace() {
                j += 1;
            }
            let is_call = chars.get(j) == Some(&'(');

            match translate_word(&word.to_lowercase(), is_call, source.name(), target) {
                Word::Keep => out.push_str(&word),
                Word::Rename(name) => out.push_str(name),
                Word::Literal(text) => out.push_str(&text),
                Word::Niladic(text) => {
                    out.push_str(text);
                    if is_call {
                        i = skip_empty_args(&chars, j)?;
                    }
                }
                Word::Untranslatable => return None,
            }
            continue;
        }

        out.push(c);
        i += 1;
    }

    Some(out)
}

enum Word {
    Keep,
    /// Function renamed; its arguments follow unchanged.
    Rename(&'static str),
    /// Keyword replaced by a literal.
    Literal(String),
    /// Zero-argument function or keyword replaced as a whole.
    Niladic(&'static str),
    Untranslatable,
}

/// Engine-specific functions with no portable counterpart.
fn is_engine_specific(source_engine: &str, word: &str) -> bool {
    let list: &[&str] = match source_engine {
        "mssql" => &[
            "convert", "dateadd", "datediff", "datepart", "datename", "charindex", "iif", "format",
            "newsequentialid", "object_id", "suser_sname",
        ],
        "postgres" => &["nextval", "currval", "to_char", "date_trunc", "age", "string_agg"],
        "mysql" => &["date_format", "str_to_date", "curdate", "group_concat"],
        "sqlite" => &["strftime", "julianday", "randomblob"],
        _ => &[],
    };
    list.contains(&word)
}

fn translate_word(word: &str, is_call: bool, source_engine: &str, target: &dyn Dialect) -> Word {
    let target_engine = target.name();
    match word {
        "getdate" | "now" | "sysdatetime" | "current_timestamp" if is_call || word == "current_timestamp" => {
            Word::Niladic(if target_engine == "mssql" {
                "getdate()"
            } else {
                "CURRENT_TIMESTAMP"
            })
        }
        "newid" | "gen_random_uuid" | "uuid" if is_call => match target_engine {
            "mssql" => Word::Niladic("newid()"),
            "postgres" => Word::Niladic("gen_random_uuid()"),
            "mysql" => Word::Niladic("uuid()"),
            _ => Word::Untranslatable,
        },
        "len" | "length" | "char_length" if is_call => {
            Word::Rename(if target_engine == "mssql" { "len" } else { "length" })
        }
        "isnull" | "ifnull" | "nvl" | "coalesce" if is_call => Word::Rename("coalesce"),
        "true" | "false" if !is_call => Word::Literal(target.render_literal(&SqlValue::Bool(word == "true"))),
        _ if is_call && is_engine_specific(source_engine, word) => Word::Untranslatable,
        _ => Word::Keep,
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn prev_is_word(chars: &[char], i: usize) -> bool {
    i > 0 && is_word_char(chars[i - 1])
}

/// Scan a `'...'` literal starting at `start`; returns the raw body (still
/// escaped) and the index after the closing quote.
fn scan_literal(chars: &[char], start: usize, backslash_escapes: bool) -> (String, usize) {
    let mut raw = String::new();
    let mut j = start + 1;
    while j < chars.len() {
        let c = chars[j];
        if backslash_escapes && c == '\\' && j + 1 < chars.len() {
            raw.push(c);
            raw.push(chars[j + 1]);
            j += 2;
        } else if c == '\'' {
            if chars.get(j + 1) == Some(&'\'') {
                raw.push_str("''");
                j += 2;
            } else {
                return (raw, j + 1);
            }
        } else {
            raw.push(c);
            j += 1;
        }
    }
    (raw, j)
}

/// Scan a quoted identifier; returns the unescaped name and the index after
/// the closing quote.
fn scan_quoted(chars: &[char], start: usize, close: char) -> (String, usize) {
    let mut name = String::new();
    let mut j = start + 1;
    while j < chars.len() {
        let c = chars[j];
        if c == close {
            if chars.get(j + 1) == Some(&close) {
                name.push(close);
                j += 2;
            } else {
                return (name, j + 1);
            }
        } else {
            name.push(c);
            j += 1;
        }
    }
    (name, j)
}

/// Skip a `::type` cast body, including multi-word types, a length
/// specifier and an array suffix.
fn skip_cast(chars: &[char], mut i: usize) -> usize {
    const CONTINUATIONS: [&str; 6] = ["varying", "without", "with", "time", "zone", "precision"];
    let len = chars.len();
    let word_at = |i: usize| -> (String, usize) {
        let mut j = i;
        while j < len && is_word_char(chars[j]) {
            j += 1;
        }
        (chars[i..j].iter().collect::<String>().to_lowercase(), j)
    };

    let (_, mut end) = word_at(i);
    i = end;
    loop {
        let mut j = i;
        while j < len && chars[j] == ' ' {
            j += 1;
        }
        let (word, next) = word_at(j);
        if CONTINUATIONS.contains(&word.as_str()) {
            end = next;
            i = next;
        } else {
            break;
        }
    }
    i = end;
    if chars.get(i) == Some(&'(') {
        while i < len && chars[i] != ')' {
            i += 1;
        }
        i = (i + 1).min(len);
    }
    if chars.get(i) == Some(&'[') && chars.get(i + 1) == Some(&']') {
        i += 2;
    }
    i
}

/// Skip `( )` after a zero-argument function. Fails if arguments are present.
fn skip_empty_args(chars: &[char], open: usize) -> Option<usize> {
    let mut j = open + 1;
    while j < chars.len() && chars[j].is_whitespace() {
        j += 1;
    }
    (chars.get(j) == Some(&')')).then_some(j + 1)
}
