use serde::{Deserialize, Serialize};
use sqlparser::ast as sp;
use sqlparser::parser::Parser as SqlParser;
use std::collections::BTreeMap;

use super::inject::{plain_select_mut, render};
use super::{RewriteContext, RewriteError, RewritePass};
use crate::domain::Domain;

/// Default listing columns per table, and the entity nouns that make a
/// question a listing question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProjectionDefaults {
    pub columns: BTreeMap<String, Vec<String>>,
    pub finance_nouns: Vec<String>,
    pub healthcare_nouns: Vec<String>,
}

impl ProjectionDefaults {
    pub fn nouns(&self, domain: Domain) -> &[String] {
        match domain {
            Domain::Finance => &self.finance_nouns,
            Domain::Healthcare => &self.healthcare_nouns,
        }
    }

    pub fn columns_for(&self, table: &str) -> Option<&[String]> {
        self.columns.get(&table.to_lowercase()).map(Vec::as_slice)
    }
}

impl Default for ProjectionDefaults {
    fn default() -> Self {
        let table = |name: &str, cols: &[&str]| {
            (
                name.to_string(),
                cols.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
            )
        };
        let patient_cols = ["patient_id", "name", "gender", "age"];
        Self {
            columns: BTreeMap::from([
                table("clients", &["client_id", "client_name", "risk_level", "total_assets"]),
                table("products", &["product_id", "product_name", "product_type", "risk_level"]),
                table("portfolios", &["portfolio_id", "client_id", "portfolio_name", "total_value"]),
                table(
                    "transactions",
                    &["transaction_id", "client_id", "product_id", "transaction_type", "amount", "trade_date"],
                ),
                table("patients", &patient_cols),
                table("patient_master_index", &patient_cols),
                table(
                    "medical_encounters",
                    &["encounter_id", "patient_id", "department_id", "encounter_date"],
                ),
                table("departments_wards", &["department_id", "department_name"]),
                table(
                    "medical_orders",
                    &["order_id", "patient_id", "order_type", "start_datetime"],
                ),
                table("billing", &["bill_id", "patient_id", "total_amount", "bill_date"]),
            ]),
            finance_nouns: ["客户", "产品", "组合", "投资组合", "交易"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            healthcare_nouns: ["患者", "就诊", "科室", "医嘱", "账单"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// For listing questions, widens `SELECT *` or a single bare column over one
/// table to that table's default columns. A multi-column projection is left
/// alone.
pub struct DefaultProjection {
    defaults: ProjectionDefaults,
}

impl DefaultProjection {
    pub fn new(defaults: ProjectionDefaults) -> Self {
        Self { defaults }
    }
}

impl RewritePass for DefaultProjection {
    fn name(&self) -> &str {
        "default_projection"
    }

    fn description(&self) -> &str {
        "Replaces */single-column projections of listing questions with default columns"
    }

    fn apply(&self, sql: &str, ctx: &RewriteContext<'_>) -> Result<String, RewriteError> {
        let is_listing = ctx.intent.has_listing_verb(ctx.question)
            && self
                .defaults
                .nouns(ctx.domain)
                .iter()
                .any(|n| ctx.question.contains(n.as_str()));
        if !ctx.dialect.is_relational() || !is_listing || ctx.intent.is_aggregate_sql(sql) {
            return Ok(sql.to_string());
        }

        let dialect = ctx.dialect.sql_dialect();
        let mut statements = SqlParser::parse_sql(&*dialect, sql.trim().trim_end_matches(';'))
            .map_err(|e| RewriteError::Parse(e.to_string()))?;
        if statements.len() != 1 {
            return Err(RewriteError::NotPlainSelect);
        }
        let select = plain_select_mut(&mut statements[0]).ok_or(RewriteError::NotPlainSelect)?;

        if select.from.len() != 1
            || !select.from[0].joins.is_empty()
            || select.distinct.is_some()
            || select.having.is_some()
            || !matches!(&select.group_by, sp::GroupByExpr::Expressions(e, _) if e.is_empty())
            || !is_star_or_single_column(&select.projection)
        {
            return Ok(sql.to_string());
        }

        let (table, alias) = match &select.from[0].relation {
            sp::TableFactor::Table { name, alias, .. } => {
                let full = name.to_string();
                let table = full.rsplit('.').next().unwrap_or(&full).to_string();
                (table, alias.as_ref().map(|a| a.name.clone()))
            }
            _ => return Ok(sql.to_string()),
        };
        let Some(columns) = self.defaults.columns_for(&table) else {
            return Ok(sql.to_string());
        };

        select.projection = columns
            .iter()
            .map(|c| {
                let column = sp::Ident::new(c.clone());
                sp::SelectItem::UnnamedExpr(match &alias {
                    Some(a) => sp::Expr::CompoundIdentifier(vec![a.clone(), column]),
                    None => sp::Expr::Identifier(column),
                })
            })
            .collect();

        Ok(render(&statements[0]))
    }
}

fn is_star_or_single_column(projection: &[sp::SelectItem]) -> bool {
    match projection {
        [sp::SelectItem::Wildcard(..)] | [sp::SelectItem::QualifiedWildcard(..)] => true,
        [sp::SelectItem::UnnamedExpr(expr)] => {
            matches!(expr, sp::Expr::Identifier(_) | sp::Expr::CompoundIdentifier(_))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::domain::Dialect;
    use crate::intent::IntentChecker;

    fn run(domain: Domain, question: &str, sql: &str) -> String {
        let vocab = vocabulary();
        let intent = IntentChecker::default();
        let ctx = ctx(domain, Dialect::Postgres, question, &vocab, &intent);
        DefaultProjection::new(ProjectionDefaults::default())
            .apply(sql, &ctx)
            .unwrap()
    }

    #[test]
    fn test_star_is_widened() {
        assert_eq!(
            run(
                Domain::Finance,
                "列出所有客户",
                "SELECT * FROM clients WHERE is_active = TRUE"
            ),
            "SELECT client_id, client_name, risk_level, total_assets FROM clients WHERE is_active = TRUE"
        );
    }

    #[test]
    fn test_single_column_with_alias() {
        assert_eq!(
            run(Domain::Healthcare, "查看男性患者", "SELECT p.name FROM patients p LIMIT 20"),
            "SELECT p.patient_id, p.name, p.gender, p.age FROM patients AS p LIMIT 20"
        );
    }

    #[test]
    fn test_multi_column_projection_kept() {
        let sql = "SELECT client_id, client_name FROM clients";
        assert_eq!(run(Domain::Finance, "列出所有客户", sql), sql);
    }

    #[test]
    fn test_non_listing_questions_kept() {
        let sql = "SELECT * FROM clients";
        assert_eq!(run(Domain::Finance, "客户的风险分布", sql), sql);
        assert_eq!(run(Domain::Finance, "列出所有门店", sql), sql);
    }

    #[test]
    fn test_aggregate_join_distinct_kept() {
        for sql in [
            "SELECT COUNT(*) FROM clients",
            "SELECT DISTINCT risk_level FROM clients",
            "SELECT c.client_name FROM clients c JOIN portfolios p ON p.client_id = c.client_id",
            "SELECT * FROM unknown_table",
        ] {
            assert_eq!(run(Domain::Finance, "查询客户", sql), sql);
        }
    }

    #[test]
    fn test_idempotent() {
        let once = run(Domain::Finance, "显示交易", "SELECT amount FROM transactions");
        assert_eq!(run(Domain::Finance, "显示交易", &once), once);
    }
}
