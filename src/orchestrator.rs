//! Question answering as a bounded state machine.
//!
//! One attempt walks `Start → Generated → Checked → Repaired → Validated →
//! Executed → Done`. Only execution failures and structural mismatches earn
//! another attempt; everything else ends the run. When the budget runs out
//! the last validated candidate is returned with a generic failure status.
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::canonical;
use crate::db::{QueryResult, QueryStatus};
use crate::domain::{Dialect, Domain, ExecutionTarget, SqlCandidate};
use crate::engine::{translate, ExecutionEngine};
use crate::error::PipelineError;
use crate::generator::{normalize_sql_text, GenerationError, RuleBasedGenerator, SqlGenerator};
use crate::guard;
use crate::intent::IntentChecker;
use crate::prune::prune_by_intent;
use crate::rewrite::{RewriteContext, RewritePipeline};
use crate::router::DomainClassifier;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_MAX_ROWS: u64 = 200;
pub const EXHAUSTED_MESSAGE: &str = "the question could not be answered";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    Generated,
    Checked,
    Repaired,
    Validated,
    Executed,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::Generated => "generated",
            Stage::Checked => "checked",
            Stage::Repaired => "repaired",
            Stage::Validated => "validated",
            Stage::Executed => "executed",
            Stage::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of [`Orchestrator::answer`].
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub target: ExecutionTarget,
    pub sql: String,
    pub result: QueryResult,
    pub rendered: String,
    pub attempts: usize,
    /// Furthest stage the final attempt reached.
    pub stage: Stage,
}

/// Last candidate that passed validation, with what executing it produced.
struct Best {
    sql: String,
    result: Option<QueryResult>,
}

struct AttemptFailure {
    error: PipelineError,
    stage: Stage,
}

impl AttemptFailure {
    fn at(stage: Stage, error: impl Into<PipelineError>) -> Self {
        Self {
            error: error.into(),
            stage,
        }
    }
}

pub struct Orchestrator {
    generator: Arc<dyn SqlGenerator>,
    fallback: RuleBasedGenerator,
    intent: IntentChecker,
    pipeline: RewritePipeline,
    engine: ExecutionEngine,
    classifier: DomainClassifier,
    dialect_hint: String,
    max_rows: u64,
    max_attempts: usize,
}

impl Orchestrator {
    pub fn new(generator: Arc<dyn SqlGenerator>, engine: ExecutionEngine, intent: IntentChecker) -> Self {
        Self {
            generator,
            fallback: RuleBasedGenerator,
            intent,
            pipeline: RewritePipeline::with_defaults(),
            engine,
            classifier: DomainClassifier::default(),
            dialect_hint: Dialect::Postgres.token().to_string(),
            max_rows: DEFAULT_MAX_ROWS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_pipeline(mut self, pipeline: RewritePipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_classifier(mut self, classifier: DomainClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Dialect used by [`Orchestrator::answer`]; any synonym `Dialect::parse` accepts.
    pub fn with_dialect_hint(mut self, hint: impl Into<String>) -> Self {
        self.dialect_hint = hint.into();
        self
    }

    pub fn with_max_rows(mut self, max_rows: u64) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub fn generator_name(&self) -> &'static str {
        self.generator.name()
    }

    /// Run caller-supplied SQL. Routing failures come back as a rejected result.
    pub async fn execute_read_only(
        &self,
        domain: Domain,
        dialect_hint: &str,
        sql: &str,
        max_rows: u64,
    ) -> QueryResult {
        match self.engine.registry().resolve(domain, dialect_hint) {
            Ok(target) => self.engine.execute(sql, target, max_rows).await,
            Err(e) => QueryResult::failure(QueryStatus::Rejected, e.to_string(), Default::default()),
        }
    }

    /// [`Orchestrator::answer`] with the domain classified from the question.
    pub async fn answer_auto(&self, question: &str) -> Result<Answer, PipelineError> {
        let domain = self.classifier.classify(question);
        tracing::debug!(domain = %domain, "question classified");
        self.answer(domain, question).await
    }

    pub async fn answer(&self, domain: Domain, question: &str) -> Result<Answer, PipelineError> {
        let target = self.engine.registry().resolve(domain, &self.dialect_hint)?;
        let mut best: Option<Best> = None;
        let mut last = AttemptFailure::at(Stage::Start, GenerationError::Blank);
        let mut attempts = 0;

        for attempt in 1..=self.max_attempts {
            attempts = attempt;
            tracing::info!(target_id = %target, attempt, generator = self.generator.name(), "attempt started");
            match self.run_attempt(target, question, &mut best).await {
                Ok((sql, result)) => {
                    let pruned = prune_by_intent(domain, question, &result);
                    let rendered = canonical::render(&pruned);
                    tracing::info!(target_id = %target, attempt, rows = pruned.row_count(), "answer produced");
                    return Ok(Answer {
                        target,
                        sql,
                        result: pruned,
                        rendered,
                        attempts: attempt,
                        stage: Stage::Done,
                    });
                }
                Err(failure) => {
                    tracing::warn!(
                        target_id = %target,
                        attempt,
                        stage = %failure.stage,
                        error = %failure.error,
                        "attempt failed"
                    );
                    let retry = failure.error.is_retryable();
                    last = failure;
                    if !retry {
                        break;
                    }
                }
            }
        }

        match best {
            Some(best) => {
                let mut result = best.result.unwrap_or_else(|| {
                    QueryResult::failure(QueryStatus::Failed, EXHAUSTED_MESSAGE, Default::default())
                });
                if !result.success {
                    result.error_message = Some(EXHAUSTED_MESSAGE.to_string());
                }
                Ok(Answer {
                    target,
                    sql: best.sql,
                    rendered: EXHAUSTED_MESSAGE.to_string(),
                    result,
                    attempts,
                    stage: last.stage,
                })
            }
            None => Err(last.error),
        }
    }

    async fn run_attempt(
        &self,
        target: ExecutionTarget,
        question: &str,
        best: &mut Option<Best>,
    ) -> Result<(String, QueryResult), AttemptFailure> {
        let domain = target.domain;

        // Start → Generated
        let candidate = self.generate(domain, question).await?;
        let mut sql = normalize_sql_text(&candidate.sql);

        // Generated → Checked
        let outcome = self.intent.check(question, &sql);
        if !outcome.ok {
            tracing::warn!(hint = %outcome.hint, sql = %sql, "candidate does not match the question");
            match self
                .generator
                .regenerate_with_hint(domain, question, &sql, &outcome.hint)
                .await
            {
                Ok(c) if !c.is_blank() => {
                    sql = normalize_sql_text(&c.sql);
                    let recheck = self.intent.check(question, &sql);
                    if !recheck.ok {
                        tracing::warn!(hint = %recheck.hint, "regenerated candidate still mismatched");
                    }
                }
                Ok(_) => tracing::warn!("regeneration returned nothing"),
                Err(e) => tracing::warn!(error = %e, "regeneration failed"),
            }
        }

        // Checked → Repaired
        let ctx = RewriteContext {
            domain,
            dialect: target.dialect,
            question,
            vocabulary: self.engine.vocabulary(),
            intent: &self.intent,
        };
        let sql = self.pipeline.run(&sql, &ctx);

        // Repaired → Validated
        guard::validate(&sql).map_err(|e| AttemptFailure::at(Stage::Repaired, e))?;
        if !target.dialect.is_relational() {
            translate(&sql, self.max_rows).map_err(|e| AttemptFailure::at(Stage::Validated, e))?;
        }
        *best = Some(Best {
            sql: sql.clone(),
            result: None,
        });

        // Validated → Executed
        let result = self.engine.execute(&sql, target, self.max_rows).await;
        if !result.success {
            let message = result.error_message.clone().unwrap_or_default();
            *best = Some(Best {
                sql,
                result: Some(result),
            });
            return Err(AttemptFailure::at(
                Stage::Executed,
                PipelineError::ExecutionFailure(message),
            ));
        }
        let executed = result.executed_sql.clone().unwrap_or(sql);
        Ok((executed, result))
    }

    async fn generate(&self, domain: Domain, question: &str) -> Result<SqlCandidate, AttemptFailure> {
        match self.generator.generate(domain, question).await {
            Ok(c) if !c.is_blank() => return Ok(c),
            Ok(_) => tracing::warn!(generator = self.generator.name(), "generator returned blank SQL"),
            Err(e) => tracing::warn!(generator = self.generator.name(), error = %e, "generator failed"),
        }
        let fallback = self
            .fallback
            .generate(domain, question)
            .await
            .map_err(|e| AttemptFailure::at(Stage::Start, e))?;
        tracing::info!(sql = %fallback.sql, "using template fallback");
        Ok(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::scripted::{rowset, ScriptedBackend};
    use crate::db::{CellValue, InMemoryDocumentStore, StructuredError};
    use crate::intent::IntentPolicy;
    use crate::router::BackendRegistry;
    use crate::vocab::VocabularyTable;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedGenerator {
        first: Option<&'static str>,
        regenerated: Option<&'static str>,
        calls: AtomicUsize,
        hints: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(first: Option<&'static str>, regenerated: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                first,
                regenerated,
                calls: AtomicUsize::new(0),
                hints: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SqlGenerator for ScriptedGenerator {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn generate(&self, domain: Domain, _question: &str) -> Result<SqlCandidate, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.first {
                Some(sql) => Ok(SqlCandidate::new(domain, sql)),
                None => Ok(SqlCandidate::new(domain, "  ")),
            }
        }

        async fn regenerate_with_hint(
            &self,
            domain: Domain,
            _question: &str,
            _bad_sql: &str,
            hint: &str,
        ) -> Result<SqlCandidate, GenerationError> {
            self.hints.lock().unwrap().push(hint.to_string());
            self.regenerated
                .map(|sql| SqlCandidate::new(domain, sql))
                .ok_or_else(|| GenerationError::Failed("no rewrite".into()))
        }
    }

    fn orchestrator(generator: Arc<dyn SqlGenerator>, backend: Arc<ScriptedBackend>) -> Orchestrator {
        let mut registry = BackendRegistry::new();
        registry.register_relational(ExecutionTarget::new(Domain::Finance, Dialect::Postgres), backend.clone());
        registry.register_relational(ExecutionTarget::new(Domain::Healthcare, Dialect::Postgres), backend);
        registry.register_document(
            ExecutionTarget::new(Domain::Finance, Dialect::Document),
            Arc::new(InMemoryDocumentStore::new().with_collection(
                "orders",
                vec![json!({"_id": 1, "status": "PAID", "region": "US"})],
            )),
        );
        let engine = ExecutionEngine::new(registry, Arc::new(VocabularyTable::builtin()));
        let intent = IntentChecker::new(IntentPolicy::default()).unwrap();
        Orchestrator::new(generator, engine, intent).with_dialect_hint("pg")
    }

    fn clients_backend() -> Arc<ScriptedBackend> {
        Arc::new(ScriptedBackend::returning(rowset(
            &["client_id", "client_name", "risk_level", "total_assets"],
            vec![vec![
                CellValue::Int32(7),
                CellValue::Text("王芳".into()),
                CellValue::Text("稳健".into()),
                CellValue::Int64(1000),
            ]],
        )))
    }

    #[tokio::test]
    async fn test_blank_generation_falls_back_to_template() {
        let backend = clients_backend();
        let generator = ScriptedGenerator::new(None, None);
        let o = orchestrator(generator.clone(), backend.clone());

        let answer = o.answer(Domain::Finance, "姓王的客户").await.unwrap();
        assert_eq!(answer.stage, Stage::Done);
        assert_eq!(answer.attempts, 1);
        assert!(answer.sql.contains("WHERE client_name LIKE '王%'"));
        assert!(answer.sql.ends_with("LIMIT 200"));
        assert_eq!(answer.rendered, "client_id=7; client_name=王芳; risk_level=稳健; total_assets=1000");

        let seen = backend.seen();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with(
            "SELECT client_id, client_name, risk_level, total_assets FROM clients"
        ));
    }

    #[tokio::test]
    async fn test_nothing_generated_is_an_error() {
        let backend = clients_backend();
        let generator = ScriptedGenerator::new(None, None);
        let o = orchestrator(generator.clone(), backend.clone());

        let err = o.answer(Domain::Finance, "基金净值走势").await.unwrap_err();
        assert!(matches!(err, PipelineError::GenerationUnavailable(GenerationError::Blank)));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert!(backend.seen().is_empty());
    }

    #[tokio::test]
    async fn test_mismatch_triggers_one_regeneration() {
        let backend = Arc::new(ScriptedBackend::returning(rowset(
            &["department_id", "cnt"],
            vec![vec![CellValue::Int32(1), CellValue::Int64(4)]],
        )));
        let generator = ScriptedGenerator::new(
            Some("SELECT department_id FROM medical_staff"),
            Some("SELECT department_id, COUNT(*) AS cnt FROM medical_staff GROUP BY department_id"),
        );
        let o = orchestrator(generator.clone(), backend.clone());

        let answer = o.answer(Domain::Healthcare, "每个部门的员工数量").await.unwrap();
        let hints = generator.hints.lock().unwrap().clone();
        assert_eq!(hints.len(), 1);
        assert!(hints[0].contains("COUNT"));
        assert!(backend.seen()[0].contains("GROUP BY department_id"));
        assert_eq!(answer.result.columns, vec!["cnt"]);
        assert_eq!(answer.rendered, "4");
    }

    #[tokio::test]
    async fn test_unsafe_candidate_is_discarded() {
        let backend = clients_backend();
        let generator = ScriptedGenerator::new(Some("SELECT 1; DROP TABLE clients"), None);
        let o = orchestrator(generator.clone(), backend.clone());

        let err = o.answer(Domain::Finance, "客户").await.unwrap_err();
        assert!(matches!(err, PipelineError::UnsafeStatement(_)));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert!(backend.seen().is_empty());
    }

    #[tokio::test]
    async fn test_exhaustion_returns_best_candidate() {
        let backend = Arc::new(ScriptedBackend::new(|_| {
            Err(StructuredError::from_string("permission denied for table clients"))
        }));
        let o = orchestrator(Arc::new(RuleBasedGenerator), backend.clone());

        let answer = o.answer(Domain::Finance, "列出所有客户").await.unwrap();
        assert_eq!(answer.attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(answer.stage, Stage::Executed);
        assert!(answer.sql.starts_with("SELECT client_id, client_name"));
        assert!(!answer.result.success);
        assert_eq!(answer.result.error_message.as_deref(), Some(EXHAUSTED_MESSAGE));
        assert_eq!(answer.rendered, EXHAUSTED_MESSAGE);
        assert_eq!(backend.seen().len(), DEFAULT_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_unknown_dialect_is_route_error() {
        let o = orchestrator(Arc::new(RuleBasedGenerator), clients_backend()).with_dialect_hint("mysql");
        let err = o.answer(Domain::Finance, "列出所有客户").await.unwrap_err();
        assert!(matches!(err, PipelineError::Route(_)));
        assert_eq!(err.to_string(), "no backend registered for `FINANCE_MYSQL`");
    }

    #[tokio::test]
    async fn test_document_subset_is_checked_before_execution() {
        let generator = ScriptedGenerator::new(
            Some("SELECT * FROM orders WHERE status = 'PAID' OR region = 'US'"),
            None,
        );
        let o = orchestrator(generator, clients_backend()).with_dialect_hint("mongodb");
        let err = o.answer(Domain::Finance, "orders").await.unwrap_err();
        assert!(matches!(err, PipelineError::TranslationUnsupported(_)));
    }

    #[tokio::test]
    async fn test_execute_read_only() {
        let backend = clients_backend();
        let o = orchestrator(Arc::new(RuleBasedGenerator), backend.clone());

        let result = o
            .execute_read_only(Domain::Finance, "postgresql", "SELECT * FROM clients", 5)
            .await;
        assert!(result.success);
        assert_eq!(backend.seen(), vec!["SELECT * FROM clients LIMIT 5"]);

        let result = o
            .execute_read_only(Domain::Finance, "oracle", "SELECT * FROM clients", 5)
            .await;
        assert_eq!(result.status, QueryStatus::Rejected);
        assert_eq!(result.error_message.as_deref(), Some("unknown dialect `oracle`"));
    }

    #[tokio::test]
    async fn test_answer_auto_classifies_domain() {
        let backend = Arc::new(ScriptedBackend::returning(rowset(
            &["patient_id", "name", "gender", "age"],
            vec![],
        )));
        let o = orchestrator(Arc::new(RuleBasedGenerator), backend.clone());
        let answer = o.answer_auto("查看所有患者").await.unwrap();
        assert_eq!(answer.target.domain, Domain::Healthcare);
        assert_eq!(answer.rendered, canonical::NO_ROWS);
        assert!(backend.seen()[0].contains("FROM patients"));
    }
}
