//! SQL subset to document-store find translation.
//!
//! Accepted: `SELECT <cols|*> FROM <collection> [WHERE col = lit (AND col = lit)*] [LIMIT n]`.
//! Everything else is refused with the construct that caused it.
use serde_json::{Number, Value};
use sqlparser::ast as sp;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::db::{DocumentQuery, DOCUMENT_ID_FIELD};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranslateError {
    #[error("cannot parse statement for the document store: {0}")]
    Parse(String),
    #[error("the document store accepts exactly one SELECT statement")]
    NotSingleSelect,
    #[error("{0} is not supported on the document store")]
    Unsupported(String),
    #[error("conflicting conditions on `{0}`")]
    Conflict(String),
}

/// A statement reduced to what a find needs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedMiniQuery {
    pub collection: String,
    pub equals_conditions: BTreeMap<String, Value>,
    /// Empty for `*`.
    pub projection: Vec<String>,
    pub limit: Option<u64>,
}

impl ParsedMiniQuery {
    /// Find request with the limit capped at `max_rows`. A cap of zero
    /// leaves the statement's own limit, if any, in place.
    pub fn to_document_query(&self, max_rows: u64) -> DocumentQuery {
        let cap = (max_rows > 0).then_some(max_rows);
        let limit = match (self.limit, cap) {
            (Some(n), Some(cap)) => Some(n.min(cap)),
            (own, cap) => own.or(cap),
        };
        DocumentQuery {
            collection: self.collection.clone(),
            filter: self
                .equals_conditions
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            projection: self
                .projection
                .iter()
                .filter(|f| f.as_str() != DOCUMENT_ID_FIELD)
                .cloned()
                .collect(),
            limit,
        }
    }
}

pub fn translate(sql: &str, max_rows: u64) -> Result<DocumentQuery, TranslateError> {
    parse_mini_query(sql).map(|q| q.to_document_query(max_rows))
}

pub fn parse_mini_query(sql: &str) -> Result<ParsedMiniQuery, TranslateError> {
    let trimmed = sql.trim().trim_end_matches(';');
    let statements = SqlParser::parse_sql(&GenericDialect {}, trimmed)
        .map_err(|e| TranslateError::Parse(e.to_string()))?;
    let [sp::Statement::Query(query)] = statements.as_slice() else {
        return Err(TranslateError::NotSingleSelect);
    };

    if query.with.is_some() {
        return unsupported("WITH");
    }
    if query.order_by.is_some() {
        return unsupported("ORDER BY");
    }
    if query.offset.is_some() || query.fetch.is_some() {
        return unsupported("OFFSET/FETCH");
    }
    let select = match query.body.as_ref() {
        sp::SetExpr::Select(select) => select.as_ref(),
        sp::SetExpr::SetOperation { op, .. } => return unsupported(&op.to_string().to_uppercase()),
        _ => return Err(TranslateError::NotSingleSelect),
    };

    if select.distinct.is_some() {
        return unsupported("DISTINCT");
    }
    if select.having.is_some()
        || !matches!(&select.group_by, sp::GroupByExpr::Expressions(e, _) if e.is_empty())
    {
        return unsupported("GROUP BY");
    }
    if select.top.is_some() || select.into.is_some() || select.qualify.is_some() {
        return unsupported("TOP/INTO/QUALIFY");
    }

    let (collection, alias) = collection_of(select)?;
    let projection = projection_of(&select.projection, &collection, alias.as_deref())?;

    let mut equals_conditions = BTreeMap::new();
    if let Some(selection) = &select.selection {
        collect_equalities(selection, &collection, alias.as_deref(), &mut equals_conditions)?;
    }

    let limit = match &query.limit {
        None => None,
        Some(sp::Expr::Value(sp::Value::Number(n, _))) => Some(
            n.parse::<u64>()
                .map_err(|_| TranslateError::Unsupported(format!("LIMIT {}", n)))?,
        ),
        Some(other) => return Err(TranslateError::Unsupported(format!("LIMIT {}", other))),
    };

    Ok(ParsedMiniQuery {
        collection,
        equals_conditions,
        projection,
        limit,
    })
}

fn unsupported<T>(what: &str) -> Result<T, TranslateError> {
    Err(TranslateError::Unsupported(what.to_string()))
}

fn collection_of(select: &sp::Select) -> Result<(String, Option<String>), TranslateError> {
    let [from] = select.from.as_slice() else {
        return if select.from.is_empty() {
            unsupported("SELECT without FROM")
        } else {
            unsupported("more than one collection")
        };
    };
    if !from.joins.is_empty() {
        return unsupported("JOIN");
    }
    match &from.relation {
        sp::TableFactor::Table {
            name,
            alias,
            args: None,
            ..
        } => {
            let full = name.to_string();
            let collection = full.rsplit('.').next().unwrap_or(&full).trim_matches('"');
            Ok((
                collection.to_string(),
                alias.as_ref().map(|a| a.name.value.clone()),
            ))
        }
        sp::TableFactor::Derived { .. } => unsupported("subquery"),
        other => Err(TranslateError::Unsupported(format!("FROM {}", other))),
    }
}

fn projection_of(
    items: &[sp::SelectItem],
    collection: &str,
    alias: Option<&str>,
) -> Result<Vec<String>, TranslateError> {
    let mut fields = Vec::new();
    for item in items {
        match item {
            sp::SelectItem::Wildcard(..) | sp::SelectItem::QualifiedWildcard(..) => {
                return Ok(Vec::new());
            }
            sp::SelectItem::UnnamedExpr(expr) => fields.push(field_name(expr, collection, alias)?),
            sp::SelectItem::ExprWithAlias { .. } => return unsupported("column alias"),
        }
    }
    Ok(fields)
}

/// Column name from a bare or collection-qualified identifier.
fn field_name(expr: &sp::Expr, collection: &str, alias: Option<&str>) -> Result<String, TranslateError> {
    match expr {
        sp::Expr::Identifier(ident) => Ok(ident.value.clone()),
        sp::Expr::CompoundIdentifier(parts) if parts.len() == 2 => {
            let qualifier = parts[0].value.as_str();
            let owned = qualifier.eq_ignore_ascii_case(collection)
                || alias.is_some_and(|a| qualifier.eq_ignore_ascii_case(a));
            if owned {
                Ok(parts[1].value.clone())
            } else {
                Err(TranslateError::Unsupported(format!(
                    "reference to `{}` outside collection `{}`",
                    qualifier, collection
                )))
            }
        }
        sp::Expr::Function(_) => unsupported("function call"),
        sp::Expr::Subquery(_) => unsupported("subquery"),
        other => Err(TranslateError::Unsupported(format!("expression `{}`", other))),
    }
}

fn collect_equalities(
    expr: &sp::Expr,
    collection: &str,
    alias: Option<&str>,
    out: &mut BTreeMap<String, Value>,
) -> Result<(), TranslateError> {
    match expr {
        sp::Expr::Nested(inner) => collect_equalities(inner, collection, alias, out),
        sp::Expr::BinaryOp {
            left,
            op: sp::BinaryOperator::And,
            right,
        } => {
            collect_equalities(left, collection, alias, out)?;
            collect_equalities(right, collection, alias, out)
        }
        sp::Expr::BinaryOp {
            left,
            op: sp::BinaryOperator::Eq,
            right,
        } => {
            let field = field_name(left, collection, alias)?;
            let value = literal_value(right)?;
            match out.get(&field) {
                Some(existing) if existing != &value => Err(TranslateError::Conflict(field)),
                _ => {
                    out.insert(field, value);
                    Ok(())
                }
            }
        }
        sp::Expr::BinaryOp {
            op: sp::BinaryOperator::Or,
            ..
        } => unsupported("OR"),
        sp::Expr::BinaryOp { op, .. } => Err(TranslateError::Unsupported(format!("operator {}", op))),
        sp::Expr::Like { .. } | sp::Expr::ILike { .. } => unsupported("LIKE"),
        sp::Expr::InList { .. } => unsupported("IN"),
        sp::Expr::InSubquery { .. } | sp::Expr::Subquery(_) | sp::Expr::Exists { .. } => {
            unsupported("subquery")
        }
        sp::Expr::Between { .. } => unsupported("BETWEEN"),
        sp::Expr::IsNull(_) | sp::Expr::IsNotNull(_) => unsupported("IS [NOT] NULL"),
        other => Err(TranslateError::Unsupported(format!("predicate `{}`", other))),
    }
}

/// Quoted text is a string, `NULL` is null, numerals are numbers, anything
/// else bare is taken as a string.
fn literal_value(expr: &sp::Expr) -> Result<Value, TranslateError> {
    match expr {
        sp::Expr::Value(value) => Ok(match value {
            sp::Value::Null => Value::Null,
            sp::Value::Boolean(b) => Value::Bool(*b),
            sp::Value::Number(n, _) => number_value(n),
            sp::Value::SingleQuotedString(s) | sp::Value::DoubleQuotedString(s) => {
                Value::String(s.clone())
            }
            other => Value::String(other.to_string()),
        }),
        sp::Expr::UnaryOp {
            op: sp::UnaryOperator::Minus,
            expr,
        } => match expr.as_ref() {
            sp::Expr::Value(sp::Value::Number(n, _)) => Ok(number_value(&format!("-{}", n))),
            other => Err(TranslateError::Unsupported(format!("expression `-{}`", other))),
        },
        sp::Expr::Nested(inner) => literal_value(inner),
        // `status = PAID` or `status = "PAID"`
        sp::Expr::Identifier(ident) => Ok(Value::String(ident.value.clone())),
        other => Err(TranslateError::Unsupported(format!(
            "comparison with `{}`",
            other
        ))),
    }
}

fn number_value(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        return Value::Number(i.into());
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(text.to_string()))
}
