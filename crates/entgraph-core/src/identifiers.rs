//! SQL identifier quoting and the dialect seam.
//!
//! The compiler emits table and column names through a [`Dialect`], whose
//! only runtime duty in this engine is keyword-aware quoting. Type mapping
//! and other DDL concerns stay with the schema tooling.

/// Reserved words that must be quoted when used as identifiers.
///
/// The intersection of the ANSI keyword list with names that actually show
/// up as table or column names in mapped schemas.
const KEYWORDS: &[&str] = &[
    "all", "and", "any", "as", "asc", "between", "by", "case", "check", "column", "constraint",
    "create", "cross", "current", "default", "delete", "desc", "distinct", "drop", "else", "end",
    "exists", "from", "full", "group", "having", "in", "index", "inner", "insert", "into", "is",
    "join", "key", "left", "like", "limit", "not", "null", "on", "or", "order", "outer",
    "primary", "references", "right", "select", "set", "table", "then", "to", "union", "unique",
    "update", "user", "using", "values", "when", "where",
];

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`), which
/// makes the result safe for any input string.
#[inline]
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Whether an identifier can appear bare: a plain name that is not a
/// reserved word.
#[must_use]
pub fn is_plain_ident(name: &str) -> bool {
    let mut chars = name.chars();
    let leading_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    leading_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !KEYWORDS.contains(&name.to_ascii_lowercase().as_str())
}

/// Quote an identifier only when it needs it (keyword or non-plain name).
#[must_use]
pub fn quote_if_keyword(name: &str) -> String {
    if is_plain_ident(name) {
        name.to_string()
    } else {
        quote_ident(name)
    }
}

/// Per-database identifier handling.
///
/// The engine consumes this narrow interface at compile time; everything
/// else dialect-specific (type names, DDL) lives outside this core.
pub trait Dialect: Send + Sync {
    /// Render an identifier, quoting only when required.
    fn quote_ident(&self, name: &str) -> String {
        quote_if_keyword(name)
    }
}

/// ANSI-quoting dialect, sufficient for PostgreSQL and SQLite naming.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiDialect;

impl Dialect for AnsiDialect {}
