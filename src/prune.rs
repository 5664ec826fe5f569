//! Drop result columns the question did not ask for.
use crate::db::QueryResult;
use crate::domain::Domain;

const AGGREGATE_CUES: &[&str] = &[
    "数量", "多少", "统计", "总数", "总和", "平均", "最大", "最小", "how many", "count", "total",
    "average",
];
const SINGLE_FIELD_CUES: &[&str] = &["姓名", "名称", "编号", "金额", "资产"];

const AGGREGATE_NAMES: &[&str] = &[
    "cnt", "count", "total", "sum", "avg", "min", "max", "num", "number", "amount", "value",
];
const AGGREGATE_PREFIXES: &[&str] = &["count", "sum", "avg", "min", "max"];

/// Question keywords to the column names they ask for.
const FIELD_CUES: &[(&[&str], &[&str])] = &[
    (&["姓名"], &["client_name"]),
    (&["名称", "名字"], &["product_name", "name", "client_name"]),
    (
        &["编号", "id"],
        &["client_id", "patient_id", "product_id", "portfolio_id", "transaction_id", "encounter_id"],
    ),
    (&["日期", "时间"], &["trade_date", "encounter_date", "order_date", "billing_date"]),
    (&["金额", "交易额", "费用"], &["transaction_amount", "amount"]),
    (&["资产"], &["total_assets"]),
    (&["风险等级"], &["risk_level"]),
    (&["性别"], &["gender"]),
    (&["年龄"], &["age"]),
];

/// New result narrowed to what the question asks for. Aggregate questions
/// keep aggregate-looking columns (or the first column); single-field
/// questions keep the named fields. Never prunes to zero columns.
pub fn prune_by_intent(domain: Domain, question: &str, result: &QueryResult) -> QueryResult {
    if result.columns.len() <= 1 {
        return result.clone();
    }
    let q = question.to_lowercase();

    if AGGREGATE_CUES.iter().any(|c| q.contains(c)) {
        let keep: Vec<usize> = result
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| is_aggregate_column(c))
            .map(|(i, _)| i)
            .collect();
        let keep = if keep.is_empty() { vec![0] } else { keep };
        return result.project(&keep);
    }

    if SINGLE_FIELD_CUES.iter().any(|c| q.contains(c)) {
        let wanted = wanted_fields(domain, &q);
        let keep: Vec<usize> = result
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| wanted.contains(&c.to_lowercase().as_str()))
            .map(|(i, _)| i)
            .collect();
        if !keep.is_empty() {
            return result.project(&keep);
        }
    }

    result.clone()
}

fn is_aggregate_column(name: &str) -> bool {
    let lower = name.to_lowercase();
    AGGREGATE_NAMES.contains(&lower.as_str())
        || AGGREGATE_PREFIXES.iter().any(|p| lower.starts_with(p))
}

fn wanted_fields(domain: Domain, question: &str) -> Vec<&'static str> {
    let mut wanted: Vec<&'static str> = FIELD_CUES
        .iter()
        .filter(|(cues, _)| cues.iter().any(|c| question.contains(c)))
        .flat_map(|(_, fields)| fields.iter().copied())
        .collect();
    match domain {
        Domain::Healthcare if question.contains("患者") => wanted.extend(["patient_id", "name"]),
        Domain::Finance if question.contains("客户") => wanted.extend(["client_id", "client_name"]),
        _ => {}
    }
    wanted
}
