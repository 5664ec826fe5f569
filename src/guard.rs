//! Statement guard: static read-only validation and row-limit enforcement.
//!
//! `validate` is a deliberately conservative textual scan. `cap_rows` parses
//! the statement when it can and falls back to a textual append when it
//! cannot, so malformed-but-safe input never aborts the pipeline.
use regex::Regex;
use sqlparser::ast::{Expr, SetExpr, Statement, Value};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::sync::LazyLock;
use thiserror::Error;

static READ_ONLY_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(select|with|explain)\b").unwrap());

static FORBIDDEN_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(insert|update|delete|drop|alter|truncate|create|grant|revoke|replace)\b",
    )
    .unwrap()
});

static LIMIT_KEYWORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\blimit\b").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("statement is empty")]
    Empty,
    #[error("only a single statement is allowed")]
    MultiStatement,
    #[error("unsafe statement: {0}")]
    Unsafe(String),
}

/// Reject anything that is not a single read-only statement.
pub fn validate(sql: &str) -> Result<(), GuardError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(GuardError::Empty);
    }

    let terminators = trimmed.matches(';').count();
    if terminators > 1 || (terminators == 1 && !trimmed.ends_with(';')) {
        return Err(GuardError::MultiStatement);
    }

    if !READ_ONLY_PREFIX.is_match(trimmed) {
        return Err(GuardError::Unsafe(
            "only SELECT / WITH / EXPLAIN statements are allowed".to_string(),
        ));
    }

    if let Some(m) = FORBIDDEN_KEYWORD.find(trimmed) {
        return Err(GuardError::Unsafe(format!(
            "forbidden keyword `{}`",
            m.as_str().to_uppercase()
        )));
    }

    Ok(())
}

/// Enforce a row cap of `max_rows` on the statement.
///
/// A single plain SELECT gets a LIMIT injected, or an existing LIMIT above
/// the cap lowered. Set operations and unparsable text fall back to a
/// textual `LIMIT` append, only when no limit keyword is present at all.
/// A cap of zero leaves the statement unchanged.
pub fn cap_rows(sql: &str, max_rows: u64) -> String {
    let trimmed = strip_terminator(sql);
    if max_rows == 0 || trimmed.is_empty() {
        return trimmed.to_string();
    }

    let mut statements = match Parser::parse_sql(&GenericDialect {}, trimmed) {
        Ok(statements) if statements.len() == 1 => statements,
        _ => return append_limit(trimmed, max_rows),
    };

    let Statement::Query(query) = &mut statements[0] else {
        return append_limit(trimmed, max_rows);
    };
    if !matches!(query.body.as_ref(), SetExpr::Select(_)) {
        return append_limit(trimmed, max_rows);
    }

    if let Some(fetch) = query.fetch.as_mut() {
        // FETCH FIRST n ROWS already bounds the result; only tighten it.
        if fetch.percent || exceeds_cap(fetch.quantity.as_ref(), max_rows) {
            fetch.percent = false;
            fetch.quantity = Some(number(max_rows));
        }
    } else if query.limit.is_none() || exceeds_cap(query.limit.as_ref(), max_rows) {
        query.limit = Some(number(max_rows));
    }

    statements[0].to_string()
}

fn exceeds_cap(expr: Option<&Expr>, max_rows: u64) -> bool {
    match expr {
        None => true,
        Some(Expr::Value(Value::Number(n, _))) => match n.parse::<u64>() {
            Ok(existing) => existing > max_rows,
            Err(_) => true,
        },
        Some(_) => true,
    }
}

fn number(n: u64) -> Expr {
    Expr::Value(Value::Number(n.to_string(), false))
}

fn append_limit(trimmed: &str, max_rows: u64) -> String {
    if LIMIT_KEYWORD.is_match(trimmed) {
        trimmed.to_string()
    } else {
        format!("{} LIMIT {}", trimmed, max_rows)
    }
}

fn strip_terminator(sql: &str) -> &str {
    let trimmed = sql.trim();
    trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_read_only() {
        assert!(validate("SELECT * FROM clients").is_ok());
        assert!(validate("  select 1;  ").is_ok());
        assert!(validate("WITH t AS (SELECT 1) SELECT * FROM t").is_ok());
        assert!(validate("EXPLAIN SELECT * FROM clients").is_ok());
        // Column names that merely contain a keyword are fine.
        assert!(validate("SELECT created_time, update_flag FROM clients").is_ok());
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert_eq!(validate(""), Err(GuardError::Empty));
        assert_eq!(validate("   \n\t"), Err(GuardError::Empty));
    }

    #[test]
    fn test_validate_rejects_stacked_statements() {
        let sql = "SELECT client_id FROM clients WHERE risk_level='Growth'; DROP TABLE clients;";
        assert_eq!(validate(sql), Err(GuardError::MultiStatement));
        assert_eq!(
            validate("SELECT 1; SELECT 2"),
            Err(GuardError::MultiStatement)
        );
        assert_eq!(validate("SELECT 1;;"), Err(GuardError::MultiStatement));
    }

    #[test]
    fn test_validate_rejects_modifying_keywords_any_casing() {
        for sql in [
            "SELECT * FROM t WHERE 1=1 /* dRoP table t */",
            "select * from t where x in (select 1) -- DELETE",
            "SELECT\n  *\nFROM t WHERE a = 1 AND\tTRUNCATE",
            "SELECT replace(name, 'a', 'b') FROM t",
            "WITH x AS (INSERT INTO t VALUES (1) RETURNING *) SELECT * FROM x",
        ] {
            assert!(
                matches!(validate(sql), Err(GuardError::Unsafe(_))),
                "should reject: {sql}"
            );
        }
    }

    #[test]
    fn test_validate_rejects_non_read_only_prefix() {
        assert!(matches!(
            validate("SHOW TABLES"),
            Err(GuardError::Unsafe(_))
        ));
        assert!(matches!(
            validate("UPDATE clients SET x = 1"),
            Err(GuardError::Unsafe(_))
        ));
    }

    #[test]
    fn test_cap_rows_injects_limit() {
        assert_eq!(
            cap_rows("SELECT * FROM clients", 5),
            "SELECT * FROM clients LIMIT 5"
        );
        assert_eq!(
            cap_rows("SELECT * FROM clients;", 5),
            "SELECT * FROM clients LIMIT 5"
        );
    }

    #[test]
    fn test_cap_rows_lowers_but_never_raises() {
        assert_eq!(
            cap_rows("SELECT * FROM clients LIMIT 500", 50),
            "SELECT * FROM clients LIMIT 50"
        );
        assert_eq!(
            cap_rows("SELECT * FROM clients LIMIT 3", 50),
            "SELECT * FROM clients LIMIT 3"
        );
    }

    #[test]
    fn test_cap_rows_is_idempotent() {
        for sql in [
            "SELECT * FROM clients",
            "SELECT a FROM t WHERE b = 'x' ORDER BY a DESC LIMIT 999",
            "SELECT a FROM t UNION SELECT a FROM u",
            "SELECT a FROM t WHERE (",
            "WITH c AS (SELECT 1 AS n) SELECT n FROM c",
        ] {
            let once = cap_rows(sql, 10);
            assert_eq!(cap_rows(&once, 10), once, "not idempotent for {sql}");
        }
    }

    #[test]
    fn test_cap_rows_set_operation_appends_textually() {
        assert_eq!(
            cap_rows("SELECT a FROM t UNION SELECT a FROM u", 7),
            "SELECT a FROM t UNION SELECT a FROM u LIMIT 7"
        );
        assert_eq!(
            cap_rows("SELECT a FROM t UNION SELECT a FROM u LIMIT 2", 7),
            "SELECT a FROM t UNION SELECT a FROM u LIMIT 2"
        );
    }

    #[test]
    fn test_cap_rows_unparsable_falls_back() {
        assert_eq!(
            cap_rows("SELECT a FROM t WHERE (", 3),
            "SELECT a FROM t WHERE ( LIMIT 3"
        );
        assert_eq!(
            cap_rows("SELECT a FROM t WHERE ( limit", 3),
            "SELECT a FROM t WHERE ( limit"
        );
    }

    #[test]
    fn test_cap_rows_zero_is_noop() {
        assert_eq!(cap_rows("SELECT * FROM t", 0), "SELECT * FROM t");
    }
}
