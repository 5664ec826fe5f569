//! Error-keyed SQL repair. Every rule is a pure function of
//! `(sql, error text)`, so a retry is reproducible.
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use crate::rewrite::first_from_table;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairKind {
    QualifyAmbiguousColumn,
    RenameUnknownTable,
    CloseQuote,
    DoubledEquals,
    QuoteDates,
    UnquoteNumbers,
    QualifyClause,
}

impl fmt::Display for RepairKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepairKind::QualifyAmbiguousColumn => "qualify_ambiguous_column",
            RepairKind::RenameUnknownTable => "rename_unknown_table",
            RepairKind::CloseQuote => "close_quote",
            RepairKind::DoubledEquals => "doubled_equals",
            RepairKind::QuoteDates => "quote_dates",
            RepairKind::UnquoteNumbers => "unquote_numbers",
            RepairKind::QualifyClause => "qualify_clause",
        };
        write!(f, "{}", name)
    }
}

/// A changed statement and the rules that changed it.
#[derive(Debug, Clone, PartialEq)]
pub struct Repair {
    pub sql: String,
    pub kinds: Vec<RepairKind>,
}

static AMBIGUOUS_COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)column (?:reference )?["'`]?([A-Za-z_][A-Za-z0-9_]*)["'`]?.*ambiguous"#)
        .unwrap()
});
static TABLE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(from|join)(\s+)((?:[A-Za-z_][A-Za-z0-9_]*\.)?([A-Za-z_][A-Za-z0-9_]*))")
        .unwrap()
});
static DOUBLED_EQUALS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"=\s*=").unwrap());
static BARE_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^'\w-])(\d{4}-\d{2}-\d{2})($|[^'\w-])").unwrap());
static QUOTED_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'(\d+(?:\.\d+)?)'").unwrap());
static QUALIFY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bqualify\b").unwrap());
static QUALIFY_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s(order\s+by|limit)\b").unwrap());

fn is_syntax_error(error: &str) -> bool {
    error.contains("syntax error") || error.contains("error in your sql syntax")
}

fn is_unknown_table(error: &str) -> bool {
    error.contains("doesn't exist")
        || (error.contains("relation") && error.contains("does not exist"))
        || error.contains("no such table")
        || (error.contains("table") && error.contains("not found"))
}

/// Apply every rule the error text triggers. `None` when nothing changed.
pub fn repair(sql: &str, error: &str, table_aliases: &BTreeMap<String, String>) -> Option<Repair> {
    let lower = error.to_lowercase();
    let mut current = sql.to_string();
    let mut kinds = Vec::new();
    let mut step = |kind: RepairKind, next: Option<String>, current: &mut String| {
        if let Some(next) = next.filter(|n| n != current) {
            *current = next;
            kinds.push(kind);
        }
    };

    if lower.contains("ambiguous") {
        let next = AMBIGUOUS_COLUMN
            .captures(error)
            .and_then(|c| qualify_column(&current, &c[1]));
        step(RepairKind::QualifyAmbiguousColumn, next, &mut current);
    }
    if is_unknown_table(&lower) {
        let next = rename_tables(&current, table_aliases);
        step(RepairKind::RenameUnknownTable, Some(next), &mut current);
    }
    if lower.contains("qualify") && QUALIFY.is_match(&current) {
        let next = unwrap_qualify(&current);
        step(RepairKind::QualifyClause, next, &mut current);
    }
    if is_syntax_error(&lower) {
        let next = DOUBLED_EQUALS.replace_all(&current, "=").into_owned();
        step(RepairKind::DoubledEquals, Some(next), &mut current);
        let next = quote_bare_dates(&current);
        step(RepairKind::QuoteDates, Some(next), &mut current);
        let next = QUOTED_NUMBER.replace_all(&current, "$1").into_owned();
        step(RepairKind::UnquoteNumbers, Some(next), &mut current);
    }
    if lower.contains("unterminated") || lower.contains("unclosed") || is_syntax_error(&lower) {
        let next = (current.matches('\'').count() % 2 == 1).then(|| format!("{}'", current));
        step(RepairKind::CloseQuote, next, &mut current);
    }

    (!kinds.is_empty()).then_some(Repair { sql: current, kinds })
}

/// Prefix bare occurrences of `column` (outside string literals) with the
/// first FROM alias, or the table name when there is none.
fn qualify_column(sql: &str, column: &str) -> Option<String> {
    let (table, alias) = first_from_table(sql)?;
    let qualifier = alias.unwrap_or(table);
    let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(column))).ok()?;

    let mut out = String::with_capacity(sql.len() + 16);
    let mut last = 0;
    for m in pattern.find_iter(sql) {
        let before = &sql[..m.start()];
        let after = sql[m.end()..].trim_start();
        let qualified = before.ends_with('.');
        let in_literal = before.matches('\'').count() % 2 == 1;
        let is_qualifier = after.starts_with('.');
        let is_alias_target = before.trim_end().to_lowercase().ends_with(" as");
        out.push_str(&sql[last..m.start()]);
        if !(qualified || in_literal || is_qualifier || is_alias_target) {
            out.push_str(&qualifier);
            out.push('.');
        }
        out.push_str(m.as_str());
        last = m.end();
    }
    out.push_str(&sql[last..]);
    Some(out)
}

/// Replace legacy table names after FROM/JOIN with their canonical names.
/// Schema prefixes are dropped along the way.
fn rename_tables(sql: &str, table_aliases: &BTreeMap<String, String>) -> String {
    TABLE_REF
        .replace_all(sql, |caps: &Captures| {
            let name = &caps[4];
            match table_aliases.get(&name.to_lowercase()) {
                Some(canonical) => format!("{}{}{}", &caps[1], &caps[2], canonical),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn quote_bare_dates(sql: &str) -> String {
    BARE_DATE
        .replace_all(sql, |caps: &Captures| {
            format!("{}'{}'{}", &caps[1], &caps[2], &caps[3])
        })
        .into_owned()
}

/// `SELECT .. QUALIFY cond [ORDER BY ..] [LIMIT ..]` into
/// `SELECT * FROM (SELECT ..) x WHERE cond [ORDER BY ..] [LIMIT ..]`.
fn unwrap_qualify(sql: &str) -> Option<String> {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    let m = QUALIFY.find(trimmed)?;
    let inner = trimmed[..m.start()].trim_end();
    let rest = trimmed[m.end()..].trim();
    let (condition, tail) = match QUALIFY_TAIL.find(rest) {
        Some(t) => (rest[..t.start()].trim(), rest[t.start()..].trim()),
        None => (rest, ""),
    };
    if inner.is_empty() || condition.is_empty() {
        return None;
    }
    let mut out = format!("SELECT * FROM ({}) x WHERE {}", inner, condition);
    if !tail.is_empty() {
        out.push(' ');
        out.push_str(tail);
    }
    Some(out)
}
