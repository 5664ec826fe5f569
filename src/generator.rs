//! SQL generation capability.
//!
//! Two variants are chosen once at startup: [`RuleBasedGenerator`] (fixed
//! question templates) and [`LlmGenerator`] (a chat model behind the
//! [`ChatClient`] seam, with per-call timeout and exponential backoff).
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;

use crate::domain::{Dialect, Domain, SqlCandidate};
use crate::rewrite::{stated_risk_level, stated_surname};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("generation timed out")]
    Timeout,
    #[error("generation failed: {0}")]
    Failed(String),
    #[error("generator returned no SQL")]
    Blank,
}

#[async_trait]
pub trait SqlGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, domain: Domain, question: &str) -> Result<SqlCandidate, GenerationError>;

    /// Produce a new candidate for `question` given why `bad_sql` was refused.
    async fn regenerate_with_hint(
        &self,
        domain: Domain,
        question: &str,
        bad_sql: &str,
        hint: &str,
    ) -> Result<SqlCandidate, GenerationError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorMode {
    #[default]
    Rules,
    Llm,
}

// ---------------------------------------------------------------------------
// Rule-based templates
// ---------------------------------------------------------------------------

const CLIENT_COLUMNS: &str = "client_id, client_name, risk_level, total_assets";
const PATIENT_COLUMNS: &str = "patient_id, name, gender, age";
const LISTING_WORDS: &[&str] = &["列出", "查看", "查询", "显示", "所有", "list", "show"];
const COUNT_WORDS: &[&str] = &["数量", "多少", "统计", "how many", "count"];
const DEFAULT_TOP_N: u32 = 10;
const MAX_TOP_N: u32 = 1000;

static TOP_N: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:前|top)\s*(\d+)").unwrap());

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

/// Deterministic template SQL for a few common question shapes, tried in a
/// fixed order. `None` when no template fits.
pub fn fallback_sql(domain: Domain, question: &str) -> Option<String> {
    let q = question.trim().to_lowercase();
    if q.is_empty() {
        return None;
    }

    match domain {
        Domain::Finance => {
            let about_clients = q.contains("客户") || q.contains("client");
            if !about_clients {
                return None;
            }
            if let Some(surname) = stated_surname(&q) {
                return Some(format!(
                    "SELECT {} FROM clients WHERE client_name LIKE '{}%'",
                    CLIENT_COLUMNS, surname
                ));
            }
            if let Some(level) = stated_risk_level(&q) {
                return Some(format!(
                    "SELECT {} FROM clients WHERE risk_level = '{}'",
                    CLIENT_COLUMNS, level
                ));
            }
            if contains_any(&q, COUNT_WORDS) {
                return Some("SELECT COUNT(*) AS cnt FROM clients".to_string());
            }
            if let Some(caps) = TOP_N.captures(&q) {
                let n = caps[1]
                    .parse::<u32>()
                    .ok()
                    .filter(|n| (1..=MAX_TOP_N).contains(n))
                    .unwrap_or(DEFAULT_TOP_N);
                return Some(format!(
                    "SELECT {} FROM clients ORDER BY total_assets DESC LIMIT {}",
                    CLIENT_COLUMNS, n
                ));
            }
            if contains_any(&q, LISTING_WORDS) {
                return Some(format!("SELECT {} FROM clients", CLIENT_COLUMNS));
            }
            None
        }
        Domain::Healthcare => {
            let about_patients = q.contains("患者") || q.contains("patient");
            (about_patients && contains_any(&q, LISTING_WORDS))
                .then(|| format!("SELECT {} FROM patients", PATIENT_COLUMNS))
        }
    }
}

/// Generator over the fixed templates. The hint is irrelevant to templates,
/// so regeneration answers the same as generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedGenerator;

#[async_trait]
impl SqlGenerator for RuleBasedGenerator {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn generate(&self, domain: Domain, question: &str) -> Result<SqlCandidate, GenerationError> {
        fallback_sql(domain, question)
            .map(|sql| SqlCandidate::new(domain, sql))
            .ok_or(GenerationError::Blank)
    }

    async fn regenerate_with_hint(
        &self,
        domain: Domain,
        question: &str,
        _bad_sql: &str,
        _hint: &str,
    ) -> Result<SqlCandidate, GenerationError> {
        self.generate(domain, question).await
    }
}

// ---------------------------------------------------------------------------
// LLM-backed generation
// ---------------------------------------------------------------------------

/// Chat completion endpoint. Implemented outside this crate.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, system: &str, user: &str) -> anyhow::Result<String>;
}

/// Compact schema description handed to the model as context. Opaque here.
pub trait SchemaText: Send + Sync {
    fn schema_text(&self, domain: Domain) -> String;
}

/// Fixed schema text, e.g. read from a file at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaText {
    pub finance: String,
    pub healthcare: String,
}

impl SchemaText for StaticSchemaText {
    fn schema_text(&self, domain: Domain) -> String {
        match domain {
            Domain::Finance => self.finance.clone(),
            Domain::Healthcare => self.healthcare.clone(),
        }
    }
}

pub struct LlmGenerator {
    client: Arc<dyn ChatClient>,
    schema: Arc<dyn SchemaText>,
    dialect: Dialect,
    timeout: Duration,
    max_retries: u32,
    backoff_base: Duration,
}

impl LlmGenerator {
    pub fn new(client: Arc<dyn ChatClient>, schema: Arc<dyn SchemaText>, dialect: Dialect) -> Self {
        Self {
            client,
            schema,
            dialect,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff_base: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.backoff_base = backoff_base;
        self
    }

    fn system_prompt(&self) -> String {
        let dialect = match self.dialect {
            Dialect::MySql => "MySQL",
            _ => "PostgreSQL",
        };
        format!(
            "You translate business questions into SQL for {dialect}.\n\
             Rules:\n\
             - Output exactly one read-only SELECT statement inside ```sql ... ```.\n\
             - Use only tables and columns from the schema.\n\
             - Quote strings and dates ('YYYY-MM-DD'); never quote numbers.\n\
             - Use IS NULL / IS NOT NULL, never = NULL.\n\
             - Do not use QUALIFY; filter window results in an outer query.\n\
             - No comments, no explanations, no data or schema modification."
        )
    }

    fn user_prompt(&self, domain: Domain, question: &str) -> String {
        format!(
            "Domain: {}\n\nSchema:\n{}\n\nQuestion:\n{}",
            domain,
            self.schema.schema_text(domain),
            question
        )
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, GenerationError> {
        let mut last = GenerationError::Blank;
        for attempt in 0..self.max_retries {
            last = match tokio::time::timeout(self.timeout, self.client.chat(system, user)).await {
                Ok(Ok(text)) => {
                    let sql = normalize_sql_text(&text);
                    if !sql.is_empty() {
                        return Ok(sql);
                    }
                    GenerationError::Blank
                }
                Ok(Err(e)) => GenerationError::Failed(e.to_string()),
                Err(_) => GenerationError::Timeout,
            };
            tracing::warn!(attempt = attempt + 1, error = %last, "generation attempt failed");
            if attempt + 1 < self.max_retries {
                tokio::time::sleep(self.backoff_base * 2u32.saturating_pow(attempt)).await;
            }
        }
        Err(last)
    }
}

#[async_trait]
impl SqlGenerator for LlmGenerator {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn generate(&self, domain: Domain, question: &str) -> Result<SqlCandidate, GenerationError> {
        let sql = self
            .complete(&self.system_prompt(), &self.user_prompt(domain, question))
            .await?;
        Ok(SqlCandidate::new(domain, sql))
    }

    async fn regenerate_with_hint(
        &self,
        domain: Domain,
        question: &str,
        bad_sql: &str,
        hint: &str,
    ) -> Result<SqlCandidate, GenerationError> {
        let user = format!(
            "{}\n\nA previous answer was rejected.\nSQL:\n{}\nProblem: {}\n\
             Write a corrected statement that fixes the problem and still answers the question.",
            self.user_prompt(domain, question),
            bad_sql,
            hint
        );
        let sql = self.complete(&self.system_prompt(), &user).await?;
        Ok(SqlCandidate::new(domain, sql))
    }
}

static FENCED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```(?:sql)?\s*(.*?)```").unwrap());
static OPEN_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^```(?:sql)?").unwrap());

/// Clean model output into bare SQL: take the fenced block if any, undo
/// escaped newlines/tabs, drop wrapping quotes.
pub fn normalize_sql_text(raw: &str) -> String {
    let body = match FENCED.captures(raw) {
        Some(caps) => caps[1].to_string(),
        None => OPEN_FENCE.replace(raw.trim(), "").into_owned(),
    };
    let unescaped = body
        .replace("\\r\\n", "\n")
        .replace("\\n", "\n")
        .replace("\\t", " ")
        .replace("\\r", "");
    let mut sql = unescaped.trim();
    for quote in ['"', '\'', '`'] {
        if sql.len() >= 2 && sql.starts_with(quote) && sql.ends_with(quote) {
            sql = sql[1..sql.len() - 1].trim();
            break;
        }
    }
    sql.to_string()
}
