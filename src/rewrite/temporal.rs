use regex::Regex;
use std::sync::LazyLock;

use super::{alias_to_table, first_from_table, inject_predicate, RewriteContext, RewriteError, RewritePass};
use crate::domain::{Dialect, Domain};

static YEAR_MONTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(20\d{2})\s*年\s*(1[0-2]|0?[1-9])\s*月").unwrap());
static YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(20\d{2})\s*年").unwrap());

// Any of these means the SQL already filters on a date.
static DATE_FILTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:extract|year|month|date_trunc|date_format|to_char|strftime)\s*\(|\bbetween\b|'(?:19|20)\d{2}",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Period {
    year: u16,
    month: Option<u8>,
}

fn period_in(question: &str) -> Option<Period> {
    if let Some(caps) = YEAR_MONTH.captures(question) {
        return Some(Period {
            year: caps[1].parse().ok()?,
            month: caps[2].parse().ok(),
        });
    }
    YEAR.captures(question).and_then(|caps| {
        Some(Period {
            year: caps[1].parse().ok()?,
            month: None,
        })
    })
}

fn date_column(domain: Domain, question: &str) -> &'static str {
    let has = |words: &[&str]| words.iter().any(|w| question.contains(w));
    match domain {
        Domain::Finance if has(&["成立", "创建"]) => "inception_date",
        Domain::Finance if has(&["交易", "成交"]) => "trade_date",
        Domain::Healthcare if has(&["就诊", "门诊", "住院"]) => "encounter_date",
        Domain::Healthcare if has(&["医嘱", "开立", "下单"]) => "start_datetime",
        _ => "create_time",
    }
}

fn period_predicate(dialect: Dialect, column: &str, period: Period) -> String {
    let part = |unit: &str, value: String| match dialect {
        Dialect::MySql => format!("{}({}) = {}", unit, column, value),
        _ => format!("EXTRACT({} FROM {}) = {}", unit, column, value),
    };
    let year = part("YEAR", period.year.to_string());
    match period.month {
        Some(m) => format!("{} AND {}", year, part("MONTH", m.to_string())),
        None => year,
    }
}

/// Injects a year (or year+month) filter stated in the question when the SQL
/// has no date filter of its own.
pub struct TemporalInjection;

impl RewritePass for TemporalInjection {
    fn name(&self) -> &str {
        "temporal_injection"
    }

    fn description(&self) -> &str {
        "Adds the question's year/month as a dialect-correct date predicate"
    }

    fn apply(&self, sql: &str, ctx: &RewriteContext<'_>) -> Result<String, RewriteError> {
        if !ctx.dialect.is_relational() || DATE_FILTER.is_match(sql) {
            return Ok(sql.to_string());
        }
        let Some(period) = period_in(ctx.question) else {
            return Ok(sql.to_string());
        };
        let Some((table, alias)) = first_from_table(sql) else {
            return Ok(sql.to_string());
        };

        let column = date_column(ctx.domain, ctx.question);
        let distinct_tables = alias_to_table(sql)
            .into_values()
            .map(|t| t.to_lowercase())
            .collect::<std::collections::BTreeSet<_>>()
            .len();
        let column = match alias {
            Some(a) => format!("{}.{}", a, column),
            None if distinct_tables > 1 => format!("{}.{}", table, column),
            None => column.to_string(),
        };

        inject_predicate(sql, &period_predicate(ctx.dialect, &column, period), ctx.dialect)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::intent::IntentChecker;

    fn run(domain: Domain, dialect: Dialect, question: &str, sql: &str) -> String {
        let vocab = vocabulary();
        let intent = IntentChecker::default();
        let ctx = ctx(domain, dialect, question, &vocab, &intent);
        TemporalInjection.apply(sql, &ctx).unwrap()
    }

    #[test]
    fn test_period_detection() {
        assert_eq!(
            period_in("2024年3月的交易"),
            Some(Period {
                year: 2024,
                month: Some(3)
            })
        );
        assert_eq!(
            period_in("2024 年 12 月"),
            Some(Period {
                year: 2024,
                month: Some(12)
            })
        );
        assert_eq!(
            period_in("2023年新增客户"),
            Some(Period {
                year: 2023,
                month: None
            })
        );
        assert_eq!(period_in("最近的客户"), None);
    }

    #[test]
    fn test_postgres_year_injection() {
        assert_eq!(
            run(
                Domain::Finance,
                Dialect::Postgres,
                "查看2023年的客户",
                "SELECT * FROM clients"
            ),
            "SELECT * FROM clients WHERE EXTRACT(YEAR FROM create_time) = 2023"
        );
    }

    #[test]
    fn test_mysql_year_month_with_alias() {
        assert_eq!(
            run(
                Domain::Finance,
                Dialect::MySql,
                "2024年3月的交易",
                "SELECT t.* FROM transactions t WHERE t.amount > 100"
            ),
            "SELECT t.* FROM transactions AS t WHERE t.amount > 100 AND YEAR(t.trade_date) = 2024 AND MONTH(t.trade_date) = 3"
        );
    }

    #[test]
    fn test_healthcare_date_column() {
        assert_eq!(date_column(Domain::Healthcare, "2023年的就诊记录"), "encounter_date");
        assert_eq!(date_column(Domain::Healthcare, "2023年开立的医嘱"), "start_datetime");
        assert_eq!(date_column(Domain::Finance, "2020年成立的产品"), "inception_date");
        assert_eq!(date_column(Domain::Healthcare, "2023年的患者"), "create_time");
    }

    #[test]
    fn test_existing_date_filter_is_kept() {
        for sql in [
            "SELECT * FROM clients WHERE create_time BETWEEN '2023-01-01' AND '2023-12-31'",
            "SELECT * FROM clients WHERE create_time >= '2023-01-01'",
            "SELECT * FROM clients WHERE EXTRACT(YEAR FROM create_time) = 2022",
        ] {
            assert_eq!(run(Domain::Finance, Dialect::Postgres, "2023年的客户", sql), sql);
        }
    }

    #[test]
    fn test_document_dialect_untouched() {
        let sql = "SELECT * FROM orders";
        assert_eq!(run(Domain::Finance, Dialect::Document, "2023年的订单", sql), sql);
    }

    #[test]
    fn test_idempotent() {
        let once = run(
            Domain::Healthcare,
            Dialect::Postgres,
            "2023年5月的就诊",
            "SELECT encounter_id FROM medical_encounters",
        );
        assert_eq!(
            once,
            "SELECT encounter_id FROM medical_encounters WHERE EXTRACT(YEAR FROM encounter_date) = 2023 AND EXTRACT(MONTH FROM encounter_date) = 5"
        );
        assert_eq!(
            run(Domain::Healthcare, Dialect::Postgres, "2023年5月的就诊", &once),
            once
        );
    }
}
