use regex::Regex;
use sqlparser::ast as sp;
use sqlparser::parser::Parser as SqlParser;
use sqlparser::tokenizer::Token;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::{alias_to_table, RewriteContext, RewriteError, RewritePass};
use crate::domain::{Dialect, Domain};
use crate::intent::contains_word;

/// Conjoin `predicate` into the WHERE clause of a single plain SELECT.
///
/// Anything else (set operations, several statements, unparsable text) is an
/// error and the caller keeps the statement as it was.
pub fn inject_predicate(sql: &str, predicate: &str, dialect: Dialect) -> Result<String, RewriteError> {
    let sql_dialect = dialect.sql_dialect();
    let trimmed = sql.trim().trim_end_matches(';');
    let mut statements = SqlParser::parse_sql(&*sql_dialect, trimmed)
        .map_err(|e| RewriteError::Parse(e.to_string()))?;
    if statements.len() != 1 {
        return Err(RewriteError::NotPlainSelect);
    }

    let new_expr = parse_predicate(predicate, &*sql_dialect)?;
    let select = plain_select_mut(&mut statements[0]).ok_or(RewriteError::NotPlainSelect)?;
    select.selection = Some(match select.selection.take() {
        Some(existing) => sp::Expr::BinaryOp {
            left: Box::new(nest_or(existing)),
            op: sp::BinaryOperator::And,
            right: Box::new(nest_or(new_expr)),
        },
        None => new_expr,
    });

    Ok(render(&statements[0]))
}

/// Print a statement, keeping `= TRUE/FALSE` in the form the literal pass
/// produces so re-running the pipeline is a no-op.
pub(crate) fn render(statement: &sp::Statement) -> String {
    super::literal::normalize_boolean_literals(&statement.to_string())
}

pub(crate) fn plain_select_mut(stmt: &mut sp::Statement) -> Option<&mut sp::Select> {
    match stmt {
        sp::Statement::Query(query) => match query.body.as_mut() {
            sp::SetExpr::Select(select) => Some(select.as_mut()),
            _ => None,
        },
        _ => None,
    }
}

fn parse_predicate(
    predicate: &str,
    dialect: &dyn sqlparser::dialect::Dialect,
) -> Result<sp::Expr, RewriteError> {
    let mut parser = SqlParser::new(dialect)
        .try_with_sql(predicate)
        .map_err(|e| RewriteError::Parse(e.to_string()))?;
    let expr = parser
        .parse_expr()
        .map_err(|e| RewriteError::Parse(e.to_string()))?;
    if parser.peek_token().token != Token::EOF {
        return Err(RewriteError::Parse(format!(
            "trailing input after predicate `{}`",
            predicate
        )));
    }
    Ok(expr)
}

// `a OR b` must keep its own parentheses once it sits under an AND.
fn nest_or(expr: sp::Expr) -> sp::Expr {
    match expr {
        sp::Expr::BinaryOp {
            op: sp::BinaryOperator::Or,
            ..
        } => sp::Expr::Nested(Box::new(expr)),
        other => other,
    }
}

/// Lower-cased WHERE clause of a single plain SELECT, if it has one.
fn where_clause(sql: &str, dialect: Dialect) -> Result<Option<String>, RewriteError> {
    let sql_dialect = dialect.sql_dialect();
    let mut statements = SqlParser::parse_sql(&*sql_dialect, sql.trim().trim_end_matches(';'))
        .map_err(|e| RewriteError::Parse(e.to_string()))?;
    if statements.len() != 1 {
        return Err(RewriteError::NotPlainSelect);
    }
    let select = plain_select_mut(&mut statements[0]).ok_or(RewriteError::NotPlainSelect)?;
    Ok(select
        .selection
        .as_ref()
        .map(|e| e.to_string().to_lowercase()))
}

const CONSTRAINT_CUES: &[&str] = &[
    "为", "等于", "是", "包含", "姓", "大于", "小于", "介于", "之前", "之后",
];

static RISK_LEVEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"风险等级\s*(?:为|是|等于)\s*["'“”]?([\p{Han}]+?)(?:型|的|客户|["'“”]|[^\p{Han}]|$)"#,
    )
    .unwrap()
});

// 姓名 and a bare 姓氏 are nouns, not a surname filter.
static SURNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"姓(?:氏\s*(?:为|是)\s*)?([\p{Han}&&[^名氏为是的]])").unwrap()
});

static AGE_BOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"年龄.*?(大于|小于)\s*(\d+)").unwrap());

const FILLER_WORDS: &[&str] = &["为", "的", "和", "或", "且"];

/// Risk level stated as `风险等级为X`, without the trailing 型/的/客户.
pub(crate) fn stated_risk_level(question: &str) -> Option<String> {
    let level = RISK_LEVEL.captures(question)?[1].to_string();
    (!FILLER_WORDS.contains(&level.as_str()) && level.chars().count() <= 6).then_some(level)
}

/// Surname stated as `姓X`.
pub(crate) fn stated_surname(question: &str) -> Option<String> {
    SURNAME.captures(question).map(|c| c[1].to_string())
}

/// A filter the question states explicitly.
#[derive(Debug, Clone, PartialEq)]
struct Constraint {
    tables: &'static [&'static str],
    column: &'static str,
    op: &'static str,
    value: ConstraintValue,
}

#[derive(Debug, Clone, PartialEq)]
enum ConstraintValue {
    /// Quoted literal, mapped through the vocabulary before rendering.
    Text(String),
    /// Emitted as-is.
    Raw(String),
}

const CLIENT_TABLES: &[&str] = &["clients"];
const PATIENT_TABLES: &[&str] = &["patients", "patient_master_index"];

fn extract_constraints(domain: Domain, question: &str) -> Vec<Constraint> {
    let mut out = Vec::new();
    match domain {
        Domain::Finance => {
            if let Some(level) = stated_risk_level(question) {
                out.push(Constraint {
                    tables: CLIENT_TABLES,
                    column: "risk_level",
                    op: "=",
                    value: ConstraintValue::Text(level),
                });
            }
            if let Some(surname) = stated_surname(question) {
                out.push(Constraint {
                    tables: CLIENT_TABLES,
                    column: "client_name",
                    op: "LIKE",
                    value: ConstraintValue::Raw(format!("'{}%'", surname)),
                });
            }
            if question.contains("活跃") || question.contains("有效") {
                out.push(Constraint {
                    tables: CLIENT_TABLES,
                    column: "is_active",
                    op: "=",
                    value: ConstraintValue::Raw("TRUE".to_string()),
                });
            }
        }
        Domain::Healthcare => {
            let gender = match (question.contains("男性"), question.contains("女性")) {
                (true, false) => Some("男"),
                (false, true) => Some("女"),
                _ => None,
            };
            if let Some(g) = gender {
                out.push(Constraint {
                    tables: PATIENT_TABLES,
                    column: "gender",
                    op: "=",
                    value: ConstraintValue::Text(g.to_string()),
                });
            }
            if let Some(caps) = AGE_BOUND.captures(question) {
                let op = if &caps[1] == "大于" { ">" } else { "<" };
                out.push(Constraint {
                    tables: PATIENT_TABLES,
                    column: "age",
                    op,
                    value: ConstraintValue::Raw(caps[2].to_string()),
                });
            }
        }
    }
    out
}

/// Which qualifier to use for `tables`, or `None` when none is in FROM/JOIN.
/// `Some(None)` means the bare column is unambiguous.
fn owning_qualifier(
    aliases: &BTreeMap<String, String>,
    tables: &[&str],
) -> Option<Option<String>> {
    let table = aliases
        .values()
        .find(|t| tables.iter().any(|c| t.eq_ignore_ascii_case(c)))?;
    let alias = aliases
        .iter()
        .find(|(k, v)| *v == table && !k.eq_ignore_ascii_case(table))
        .map(|(k, _)| k.clone());
    let distinct_tables = aliases
        .values()
        .map(|v| v.to_lowercase())
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    Some(match alias {
        Some(a) => Some(a),
        None if distinct_tables > 1 => Some(table.clone()),
        None => None,
    })
}

/// Injects the filters a question states explicitly (risk level, surname,
/// activity, gender, age bounds) when the SQL forgot them.
pub struct ConstraintInjection;

impl RewritePass for ConstraintInjection {
    fn name(&self) -> &str {
        "constraint_injection"
    }

    fn description(&self) -> &str {
        "Conjoins question-stated filters missing from the WHERE clause"
    }

    fn apply(&self, sql: &str, ctx: &RewriteContext<'_>) -> Result<String, RewriteError> {
        if !ctx.dialect.is_relational() || !CONSTRAINT_CUES.iter().any(|c| ctx.question.contains(c))
        {
            return Ok(sql.to_string());
        }

        let mut current = sql.to_string();
        for constraint in extract_constraints(ctx.domain, ctx.question) {
            let aliases = alias_to_table(&current);
            let Some(qualifier) = owning_qualifier(&aliases, constraint.tables) else {
                continue;
            };
            let existing = where_clause(&current, ctx.dialect)?;
            if existing
                .as_deref()
                .is_some_and(|w| contains_word(w, constraint.column))
            {
                continue;
            }

            let column = match &qualifier {
                Some(q) => format!("{}.{}", q, constraint.column),
                None => constraint.column.to_string(),
            };
            let value = match &constraint.value {
                ConstraintValue::Raw(v) => v.clone(),
                ConstraintValue::Text(v) => {
                    let table = constraint.tables[0];
                    let key = format!("{}.{}", table, constraint.column);
                    let code = ctx
                        .vocabulary
                        .lookup_enum(ctx.domain, &key, v)
                        .unwrap_or_else(|| v.clone());
                    format!("'{}'", code.replace('\'', "''"))
                }
            };
            let predicate = format!("{} {} {}", column, constraint.op, value);
            current = inject_predicate(&current, &predicate, ctx.dialect)?;
        }
        Ok(current)
    }
}
