//! Pass-based SQL rewriting.
//!
//! Each pass is a total, idempotent `sql -> sql'` function. The pipeline runs
//! them in a fixed order; a pass that fails is skipped and its input flows on
//! unchanged.
mod inject;
mod literal;
mod projection;
mod temporal;
mod vocabulary;

pub use inject::{inject_predicate, ConstraintInjection};
pub(crate) use inject::{stated_risk_level, stated_surname};
pub use literal::LiteralNormalization;
pub use projection::{DefaultProjection, ProjectionDefaults};
pub use temporal::TemporalInjection;
pub use vocabulary::VocabularyNormalization;

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

use crate::domain::{Dialect, Domain};
use crate::intent::IntentChecker;
use crate::vocab::Vocabulary;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RewriteError {
    #[error("SQL parse error: {0}")]
    Parse(String),
    #[error("not a single plain SELECT")]
    NotPlainSelect,
}

/// Everything a pass may consult besides the SQL itself.
pub struct RewriteContext<'a> {
    pub domain: Domain,
    pub dialect: Dialect,
    pub question: &'a str,
    pub vocabulary: &'a dyn Vocabulary,
    pub intent: &'a IntentChecker,
}

/// A single rewrite step over SQL text.
pub trait RewritePass: Send + Sync {
    /// Unique name identifying this pass.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Rewrite `sql`, returning it unchanged when nothing applies.
    fn apply(&self, sql: &str, ctx: &RewriteContext<'_>) -> Result<String, RewriteError>;
}

/// Ordered sequence of rewrite passes.
#[derive(Default)]
pub struct RewritePipeline {
    passes: Vec<Box<dyn RewritePass>>,
}

impl RewritePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Literal, vocabulary, temporal, constraint and projection passes.
    pub fn with_defaults() -> Self {
        Self::with_projection_defaults(ProjectionDefaults::default())
    }

    /// The default passes with configured listing projections.
    pub fn with_projection_defaults(defaults: ProjectionDefaults) -> Self {
        let mut pipeline = Self::new();
        pipeline.add_pass(Box::new(LiteralNormalization));
        pipeline.add_pass(Box::new(VocabularyNormalization));
        pipeline.add_pass(Box::new(TemporalInjection));
        pipeline.add_pass(Box::new(ConstraintInjection));
        pipeline.add_pass(Box::new(DefaultProjection::new(defaults)));
        pipeline
    }

    pub fn add_pass(&mut self, pass: Box<dyn RewritePass>) {
        self.passes.push(pass);
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn run(&self, sql: &str, ctx: &RewriteContext<'_>) -> String {
        let mut current = sql.to_string();
        for pass in &self.passes {
            match pass.apply(&current, ctx) {
                Ok(next) => {
                    if next != current {
                        tracing::debug!(pass = pass.name(), before = %current, after = %next, "rewrite applied");
                        current = next;
                    }
                }
                Err(e) => {
                    tracing::debug!(pass = pass.name(), error = %e, "rewrite skipped");
                }
            }
        }
        current
    }
}

static FROM_JOIN_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:from|join)\s+((?:[A-Za-z_][A-Za-z0-9_]*\.)?[A-Za-z_][A-Za-z0-9_]*)(?:\s+(?:as\s+)?([A-Za-z_][A-Za-z0-9_]*))?",
    )
    .unwrap()
});

const NOT_ALIASES: &[&str] = &[
    "where", "join", "inner", "left", "right", "full", "cross", "outer", "on", "group", "order",
    "limit", "having", "union", "intersect", "except", "using", "natural", "offset", "fetch",
    "window", "qualify",
];

// `EXTRACT(YEAR FROM c)`, `SUBSTRING(s FROM 2)`: a FROM inside a call.
static CALL_ARGUMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\s*[A-Za-z_][A-Za-z0-9_.]*\s*$").unwrap());

fn table_clauses(sql: &str) -> impl Iterator<Item = regex::Captures<'_>> {
    FROM_JOIN_TABLE.captures_iter(sql).filter(move |c| {
        let start = c.get(0).map_or(0, |m| m.start());
        !CALL_ARGUMENT.is_match(&sql[..start])
    })
}

/// Map of alias (and bare table name) to table, from FROM/JOIN clauses.
/// Keys are lower-cased; schema prefixes are dropped from table names.
pub(crate) fn alias_to_table(sql: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for caps in table_clauses(sql) {
        let full = &caps[1];
        let table = full.rsplit('.').next().unwrap_or(full).to_string();
        map.insert(table.to_lowercase(), table.clone());
        if let Some(alias) = caps.get(2) {
            let alias = alias.as_str();
            if !NOT_ALIASES.contains(&alias.to_lowercase().as_str()) {
                map.insert(alias.to_lowercase(), table.clone());
            }
        }
    }
    map
}

/// First table named after FROM, if any.
pub(crate) fn first_from_table(sql: &str) -> Option<(String, Option<String>)> {
    table_clauses(sql)
        .find(|c| c[0].to_lowercase().starts_with("from"))
        .map(|c| {
            let full = &c[1];
            let table = full.rsplit('.').next().unwrap_or(full).to_string();
            let alias = c
                .get(2)
                .map(|a| a.as_str().to_string())
                .filter(|a| !NOT_ALIASES.contains(&a.to_lowercase().as_str()));
            (table, alias)
        })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::vocab::VocabularyTable;

    pub fn vocabulary() -> VocabularyTable {
        let mut t = VocabularyTable::builtin();
        t.insert(Domain::Finance, "clients.risk_level", "Growth", "成长");
        t.insert(Domain::Finance, "clients.risk_level", "conservative", "保守");
        t.insert(Domain::Finance, "clients.risk_level", "稳健", "BALANCED");
        t.insert(Domain::Finance, "transactions.transaction_type", "purchase", "买入");
        t.insert(Domain::Healthcare, "patients.gender", "male", "男");
        t.insert(Domain::Healthcare, "patients.gender", "female", "女");
        t
    }

    pub fn ctx<'a>(
        domain: Domain,
        dialect: Dialect,
        question: &'a str,
        vocabulary: &'a VocabularyTable,
        intent: &'a IntentChecker,
    ) -> RewriteContext<'a> {
        RewriteContext {
            domain,
            dialect,
            question,
            vocabulary,
            intent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    struct Failing;

    impl RewritePass for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn apply(&self, _sql: &str, _ctx: &RewriteContext<'_>) -> Result<String, RewriteError> {
            Err(RewriteError::NotPlainSelect)
        }
    }

    #[test]
    fn test_default_pass_order() {
        let pipeline = RewritePipeline::with_defaults();
        assert_eq!(
            pipeline.pass_names(),
            vec![
                "literal_normalization",
                "vocabulary_normalization",
                "temporal_injection",
                "constraint_injection",
                "default_projection",
            ]
        );
    }

    #[test]
    fn test_failing_pass_is_skipped() {
        let vocab = vocabulary();
        let intent = IntentChecker::default();
        let ctx = ctx(Domain::Finance, Dialect::Postgres, "", &vocab, &intent);
        let mut pipeline = RewritePipeline::new();
        pipeline.add_pass(Box::new(Failing));
        pipeline.add_pass(Box::new(LiteralNormalization));
        assert_eq!(
            pipeline.run("SELECT * FROM t WHERE a = 'Y'", &ctx),
            "SELECT * FROM t WHERE a = TRUE"
        );
    }

    #[test]
    fn test_pipeline_name_question_adds_no_filter() {
        let vocab = vocabulary();
        let intent = IntentChecker::default();
        let ctx = ctx(Domain::Finance, Dialect::Postgres, "查询客户的姓名和总资产", &vocab, &intent);
        let out = RewritePipeline::with_defaults()
            .run("SELECT client_name, total_assets FROM clients", &ctx);
        assert!(!out.to_uppercase().contains("WHERE"), "{}", out);
        assert!(!out.contains("LIKE"), "{}", out);
    }

    #[test]
    fn test_pipeline_is_idempotent() {
        let vocab = vocabulary();
        let intent = IntentChecker::default();
        let pipeline = RewritePipeline::with_defaults();
        for (domain, dialect, question, sql) in [
            (
                Domain::Finance,
                Dialect::Postgres,
                "查看2023年风险等级为成长的客户",
                "SELECT * FROM clients WHERE risk_level = 'Growth'",
            ),
            (
                Domain::Finance,
                Dialect::MySql,
                "列出2024年3月的交易",
                "SELECT t.* FROM transactions t WHERE t.transaction_type = 'purchase'",
            ),
            (
                Domain::Healthcare,
                Dialect::Postgres,
                "查看男性患者",
                "SELECT name FROM patients",
            ),
            (
                Domain::Finance,
                Dialect::Postgres,
                "姓王的客户",
                "SELECT a FROM t UNION SELECT a FROM u",
            ),
        ] {
            let ctx = ctx(domain, dialect, question, &vocab, &intent);
            let once = pipeline.run(sql, &ctx);
            assert_eq!(pipeline.run(&once, &ctx), once, "not idempotent: {sql}");
        }
    }

    #[test]
    fn test_pipeline_noop_on_canonical_sql() {
        let vocab = vocabulary();
        let intent = IntentChecker::default();
        let ctx = ctx(Domain::Finance, Dialect::Postgres, "风险等级", &vocab, &intent);
        let sql = "SELECT client_id, client_name FROM clients WHERE risk_level = '成长'";
        assert_eq!(RewritePipeline::with_defaults().run(sql, &ctx), sql);
    }

    #[test]
    fn test_alias_to_table() {
        let map = alias_to_table(
            "SELECT c.x FROM public.clients c JOIN portfolios AS p ON p.client_id = c.client_id WHERE 1=1",
        );
        assert_eq!(map["c"], "clients");
        assert_eq!(map["p"], "portfolios");
        assert_eq!(map["clients"], "clients");
        assert!(!map.contains_key("where"));
        assert!(!map.contains_key("on"));
    }

    #[test]
    fn test_function_from_is_not_a_table() {
        let map = alias_to_table(
            "SELECT * FROM clients WHERE EXTRACT(YEAR FROM create_time) = 2023",
        );
        assert_eq!(map.len(), 1);
        assert_eq!(map["clients"], "clients");
    }

    #[test]
    fn test_first_from_table() {
        assert_eq!(
            first_from_table("SELECT * FROM clients c WHERE x = 1"),
            Some(("clients".to_string(), Some("c".to_string())))
        );
        assert_eq!(
            first_from_table("SELECT * FROM clients WHERE x = 1"),
            Some(("clients".to_string(), None))
        );
    }
}
