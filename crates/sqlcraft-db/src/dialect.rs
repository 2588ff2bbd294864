//! Backend-specific SQL syntax.
//!
//! The compiler never branches on a backend itself. Everything that differs
//! between databases (identifier quoting, placeholders, LIMIT/OFFSET syntax,
//! DISTINCT ON, set-operation keywords, LIKE/regex operators) is asked of a
//! [`Dialect`]. Adding a backend means implementing this trait and nothing
//! else.
//!
//! Four dialects are built in: [`PostgresDialect`], [`SqliteDialect`],
//! [`MySqlDialect`] and [`OracleDialect`]. [`dialect_for`] selects one by
//! name, which is how [`Settings::dialect`](sqlcraft_core::Settings) is
//! interpreted.

use std::fmt;

use sqlcraft_core::{QueryError, QueryResult};

/// A set operation combining the rows of two or more queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Combinator {
    /// `UNION` (duplicates removed).
    Union,
    /// `UNION ALL` (duplicates kept).
    UnionAll,
    /// `INTERSECT`.
    Intersect,
    /// `EXCEPT` / `MINUS`.
    Except,
}

impl Combinator {
    /// The ANSI keyword for this combinator.
    pub const fn standard_keyword(self) -> &'static str {
        match self {
            Self::Union => "UNION",
            Self::UnionAll => "UNION ALL",
            Self::Intersect => "INTERSECT",
            Self::Except => "EXCEPT",
        }
    }

    /// Returns `true` for the two union flavours.
    pub const fn is_union(self) -> bool {
        matches!(self, Self::Union | Self::UnionAll)
    }
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.standard_keyword())
    }
}

/// Backend-specific syntax hooks consumed by the compiler.
///
/// Only [`name`](Self::name) and [`placeholder`](Self::placeholder) are
/// required; every other hook defaults to ANSI behaviour.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Returns the vendor name (e.g. "postgresql", "sqlite").
    fn name(&self) -> &'static str;

    /// Returns the placeholder for the parameter at 1-based `index`.
    fn placeholder(&self, index: usize) -> String;

    /// Quotes an identifier, doubling any embedded quote character.
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Renders the row-window clause, or an empty string when there is none.
    ///
    /// Dialects that cannot express an offset without a limit substitute
    /// their "no limit" sentinel.
    fn limit_offset_clause(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(l), None) => format!("LIMIT {l}"),
            (Some(l), Some(o)) => format!("LIMIT {l} OFFSET {o}"),
            (None, Some(o)) => format!("OFFSET {o}"),
        }
    }

    /// Renders the DISTINCT keyword, optionally restricted to `columns`.
    ///
    /// DISTINCT ON is not ANSI; dialects without it fail with `NotSupported`.
    fn distinct_clause(&self, columns: Option<&[String]>) -> QueryResult<String> {
        match columns {
            None => Ok("DISTINCT".to_string()),
            Some(_) => Err(QueryError::NotSupported(format!(
                "DISTINCT ON fields is not supported by {}",
                self.name()
            ))),
        }
    }

    /// Returns the keyword joining the members of a compound query.
    fn combinator_keyword(&self, kind: Combinator) -> &'static str {
        kind.standard_keyword()
    }

    /// Renders a case-insensitive LIKE comparison of already rendered operands.
    fn case_insensitive_like(&self, lhs: &str, rhs: &str) -> String {
        format!("LOWER({lhs}) LIKE LOWER({rhs})")
    }

    /// Suffix appended to every LIKE pattern comparison (e.g. `ESCAPE '\'`).
    fn like_escape_suffix(&self) -> &'static str {
        ""
    }

    /// Renders a regular-expression match of already rendered operands.
    fn regex_match(&self, lhs: &str, rhs: &str, case_insensitive: bool) -> QueryResult<String> {
        let _ = (lhs, rhs, case_insensitive);
        Err(QueryError::NotSupported(format!(
            "Regular expression lookups are not supported by {}",
            self.name()
        )))
    }

    /// Maximum number of values one `IN (...)` list may hold.
    fn max_in_list_size(&self) -> Option<usize> {
        None
    }

    /// Whether members of a compound query may be wrapped in parentheses.
    fn supports_parentheses_in_compound(&self) -> bool {
        true
    }

    /// Whether `NULLS FIRST` / `NULLS LAST` is understood in ORDER BY.
    fn supports_nulls_ordering(&self) -> bool {
        true
    }
}

/// PostgreSQL: `$n` placeholders, `DISTINCT ON`, `ILIKE`, `~` regexes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn distinct_clause(&self, columns: Option<&[String]>) -> QueryResult<String> {
        Ok(match columns {
            None => "DISTINCT".to_string(),
            Some(cols) => format!("DISTINCT ON ({})", cols.join(", ")),
        })
    }

    fn case_insensitive_like(&self, lhs: &str, rhs: &str) -> String {
        format!("{lhs} ILIKE {rhs}")
    }

    fn regex_match(&self, lhs: &str, rhs: &str, case_insensitive: bool) -> QueryResult<String> {
        let op = if case_insensitive { "~*" } else { "~" };
        Ok(format!("{lhs} {op} {rhs}"))
    }
}

/// SQLite: `?` placeholders, `LIMIT -1` as the no-limit sentinel.
///
/// SQLite has no default LIKE escape character, and it rejects parenthesized
/// members in compound selects.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn limit_offset_clause(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(l), None) => format!("LIMIT {l}"),
            (Some(l), Some(o)) => format!("LIMIT {l} OFFSET {o}"),
            (None, Some(o)) => format!("LIMIT -1 OFFSET {o}"),
        }
    }

    fn like_escape_suffix(&self) -> &'static str {
        " ESCAPE '\\'"
    }

    fn regex_match(&self, lhs: &str, rhs: &str, case_insensitive: bool) -> QueryResult<String> {
        Ok(if case_insensitive {
            format!("{lhs} REGEXP '(?i)' || {rhs}")
        } else {
            format!("{lhs} REGEXP {rhs}")
        })
    }

    fn max_in_list_size(&self) -> Option<usize> {
        Some(999)
    }

    fn supports_parentheses_in_compound(&self) -> bool {
        false
    }
}

/// MySQL: backtick quoting, `?` placeholders, `REGEXP`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl MySqlDialect {
    /// The largest row count MySQL accepts, used when only an offset is set.
    pub const NO_LIMIT: u64 = 18_446_744_073_709_551_615;
}

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn limit_offset_clause(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(l), None) => format!("LIMIT {l}"),
            (Some(l), Some(o)) => format!("LIMIT {l} OFFSET {o}"),
            (None, Some(o)) => format!("LIMIT {} OFFSET {o}", Self::NO_LIMIT),
        }
    }

    fn regex_match(&self, lhs: &str, rhs: &str, case_insensitive: bool) -> QueryResult<String> {
        Ok(if case_insensitive {
            format!("{lhs} REGEXP {rhs}")
        } else {
            format!("{lhs} REGEXP BINARY {rhs}")
        })
    }

    fn supports_nulls_ordering(&self) -> bool {
        false
    }
}

/// Oracle: `:n` placeholders, `OFFSET ... FETCH FIRST`, `MINUS`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleDialect;

impl Dialect for OracleDialect {
    fn name(&self) -> &'static str {
        "oracle"
    }

    fn placeholder(&self, index: usize) -> String {
        format!(":{index}")
    }

    fn limit_offset_clause(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut parts = Vec::new();
        if let Some(o) = offset {
            parts.push(format!("OFFSET {o} ROWS"));
        }
        if let Some(l) = limit {
            parts.push(format!("FETCH FIRST {l} ROWS ONLY"));
        }
        parts.join(" ")
    }

    fn combinator_keyword(&self, kind: Combinator) -> &'static str {
        match kind {
            Combinator::Except => "MINUS",
            other => other.standard_keyword(),
        }
    }

    fn like_escape_suffix(&self) -> &'static str {
        " ESCAPE '\\'"
    }

    fn regex_match(&self, lhs: &str, rhs: &str, case_insensitive: bool) -> QueryResult<String> {
        Ok(if case_insensitive {
            format!("REGEXP_LIKE({lhs}, {rhs}, 'i')")
        } else {
            format!("REGEXP_LIKE({lhs}, {rhs}, 'c')")
        })
    }

    fn max_in_list_size(&self) -> Option<usize> {
        Some(1000)
    }
}

/// The built-in database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    /// PostgreSQL (uses `$1, $2, ...` placeholders).
    PostgreSQL,
    /// SQLite (uses `?` placeholders).
    SQLite,
    /// MySQL (uses `?` placeholders).
    MySQL,
    /// Oracle (uses `:1, :2, ...` placeholders).
    Oracle,
}

static POSTGRES: PostgresDialect = PostgresDialect;
static SQLITE: SqliteDialect = SqliteDialect;
static MYSQL: MySqlDialect = MySqlDialect;
static ORACLE: OracleDialect = OracleDialect;

impl DatabaseBackendType {
    /// Parses a backend name. Accepts the common aliases (`postgres`, `pg`, `sqlite3`).
    pub fn from_name(name: &str) -> QueryResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Ok(Self::PostgreSQL),
            "sqlite" | "sqlite3" => Ok(Self::SQLite),
            "mysql" | "mariadb" => Ok(Self::MySQL),
            "oracle" => Ok(Self::Oracle),
            other => Err(QueryError::ConfigurationError(format!(
                "Unknown database dialect '{other}'"
            ))),
        }
    }

    /// Returns the dialect implementation for this backend.
    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            Self::PostgreSQL => &POSTGRES,
            Self::SQLite => &SQLITE,
            Self::MySQL => &MYSQL,
            Self::Oracle => &ORACLE,
        }
    }
}

/// Looks up a built-in dialect by name.
///
/// # Examples
///
/// ```
/// use sqlcraft_db::dialect::dialect_for;
///
/// let d = dialect_for("sqlite").unwrap();
/// assert_eq!(d.placeholder(3), "?");
/// assert_eq!(d.limit_offset_clause(None, Some(5)), "LIMIT -1 OFFSET 5");
/// ```
pub fn dialect_for(name: &str) -> QueryResult<&'static dyn Dialect> {
    DatabaseBackendType::from_name(name).map(DatabaseBackendType::dialect)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(PostgresDialect.placeholder(2), "$2");
        assert_eq!(SqliteDialect.placeholder(2), "?");
        assert_eq!(MySqlDialect.placeholder(2), "?");
        assert_eq!(OracleDialect.placeholder(2), ":2");
    }

    #[test]
    fn test_quote_identifier_escapes() {
        assert_eq!(PostgresDialect.quote_identifier("order"), "\"order\"");
        assert_eq!(PostgresDialect.quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(MySqlDialect.quote_identifier("order"), "`order`");
        assert_eq!(MySqlDialect.quote_identifier("a`b"), "`a``b`");
    }

    #[test]
    fn test_limit_offset_postgres() {
        let d = PostgresDialect;
        assert_eq!(d.limit_offset_clause(None, None), "");
        assert_eq!(d.limit_offset_clause(Some(10), None), "LIMIT 10");
        assert_eq!(d.limit_offset_clause(Some(10), Some(20)), "LIMIT 10 OFFSET 20");
        assert_eq!(d.limit_offset_clause(None, Some(20)), "OFFSET 20");
    }

    #[test]
    fn test_offset_only_sentinels() {
        assert_eq!(
            SqliteDialect.limit_offset_clause(None, Some(3)),
            "LIMIT -1 OFFSET 3"
        );
        assert_eq!(
            MySqlDialect.limit_offset_clause(None, Some(3)),
            "LIMIT 18446744073709551615 OFFSET 3"
        );
    }

    #[test]
    fn test_limit_offset_oracle() {
        let d = OracleDialect;
        assert_eq!(d.limit_offset_clause(Some(10), None), "FETCH FIRST 10 ROWS ONLY");
        assert_eq!(
            d.limit_offset_clause(Some(10), Some(5)),
            "OFFSET 5 ROWS FETCH FIRST 10 ROWS ONLY"
        );
        assert_eq!(d.limit_offset_clause(None, Some(5)), "OFFSET 5 ROWS");
        assert_eq!(d.limit_offset_clause(None, None), "");
    }

    #[test]
    fn test_distinct_on() {
        let cols = vec!["\"order\".\"status\"".to_string()];
        assert_eq!(
            PostgresDialect.distinct_clause(Some(&cols)).unwrap(),
            "DISTINCT ON (\"order\".\"status\")"
        );
        assert_eq!(SqliteDialect.distinct_clause(None).unwrap(), "DISTINCT");
        let err = SqliteDialect.distinct_clause(Some(&cols)).unwrap_err();
        assert!(matches!(err, QueryError::NotSupported(_)));
    }

    #[test]
    fn test_combinator_keywords() {
        assert_eq!(PostgresDialect.combinator_keyword(Combinator::UnionAll), "UNION ALL");
        assert_eq!(PostgresDialect.combinator_keyword(Combinator::Except), "EXCEPT");
        assert_eq!(OracleDialect.combinator_keyword(Combinator::Except), "MINUS");
        assert_eq!(OracleDialect.combinator_keyword(Combinator::Intersect), "INTERSECT");
    }

    #[test]
    fn test_case_insensitive_like() {
        assert_eq!(PostgresDialect.case_insensitive_like("x", "$1"), "x ILIKE $1");
        assert_eq!(
            SqliteDialect.case_insensitive_like("x", "?"),
            "LOWER(x) LIKE LOWER(?)"
        );
    }

    #[test]
    fn test_regex_operators() {
        assert_eq!(PostgresDialect.regex_match("x", "$1", true).unwrap(), "x ~* $1");
        assert_eq!(MySqlDialect.regex_match("x", "?", false).unwrap(), "x REGEXP BINARY ?");
        assert_eq!(
            OracleDialect.regex_match("x", ":1", true).unwrap(),
            "REGEXP_LIKE(x, :1, 'i')"
        );
    }

    #[test]
    fn test_default_regex_not_supported() {
        #[derive(Debug)]
        struct Ansi;
        impl Dialect for Ansi {
            fn name(&self) -> &'static str {
                "ansi"
            }
            fn placeholder(&self, _index: usize) -> String {
                "?".into()
            }
        }
        let err = Ansi.regex_match("x", "?", false).unwrap_err();
        assert!(matches!(err, QueryError::NotSupported(_)));
        assert_eq!(Ansi.combinator_keyword(Combinator::Union), "UNION");
        assert!(Ansi.max_in_list_size().is_none());
    }

    #[test]
    fn test_dialect_for() {
        assert_eq!(dialect_for("postgres").unwrap().name(), "postgresql");
        assert_eq!(dialect_for("SQLite3").unwrap().name(), "sqlite");
        assert_eq!(dialect_for("oracle").unwrap().name(), "oracle");
        let err = dialect_for("db2").unwrap_err();
        assert!(matches!(err, QueryError::ConfigurationError(_)));
    }

    #[test]
    fn test_backend_type_roundtrip() {
        assert_eq!(
            DatabaseBackendType::from_name("mysql").unwrap(),
            DatabaseBackendType::MySQL
        );
        assert_eq!(DatabaseBackendType::MySQL.dialect().name(), "mysql");
    }
}
