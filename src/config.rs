use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::db::BackendConfig;
use crate::domain::Dialect;
use crate::engine::ExecutionEngine;
use crate::generator::{
    ChatClient, GeneratorMode, LlmGenerator, RuleBasedGenerator, SqlGenerator, StaticSchemaText,
};
use crate::intent::{IntentChecker, IntentPolicy};
use crate::orchestrator::Orchestrator;
use crate::rewrite::{ProjectionDefaults, RewritePipeline};
use crate::router::BackendRegistry;
use crate::vocab::VocabularyTable;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuerySettings {
    /// Row cap per statement; zero disables it.
    pub max_rows: u64,
    pub max_attempts: usize,
    pub max_repair_rounds: usize,
    pub default_dialect: String,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            max_rows: 200,
            max_attempts: 3,
            max_repair_rounds: 1,
            default_dialect: String::from("pg"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorSettings {
    pub mode: GeneratorMode,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// Files with the schema description handed to the model.
    pub finance_schema: Option<PathBuf>,
    pub healthcare_schema: Option<PathBuf>,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            mode: GeneratorMode::Rules,
            timeout_secs: 30,
            max_retries: 3,
            backoff_base_ms: 500,
            finance_schema: None,
            healthcare_schema: None,
        }
    }
}

impl GeneratorSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    fn schema_text(&self) -> Result<StaticSchemaText> {
        let read = |path: &Option<PathBuf>| -> Result<String> {
            match path {
                Some(p) => std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read schema file {}", p.display())),
                None => Ok(String::new()),
            }
        };
        Ok(StaticSchemaText {
            finance: read(&self.finance_schema)?,
            healthcare: read(&self.healthcare_schema)?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub query: QuerySettings,
    pub generator: GeneratorSettings,
    pub backends: Vec<BackendConfig>,
    pub vocabulary: VocabularyTable,
    pub intent: Option<IntentPolicy>,
    pub projection: Option<ProjectionDefaults>,
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sqlwarden")
            .join("config.toml")
    }

    /// Load `path`, or the default location when `None`. A missing default
    /// file yields the default configuration; a missing explicit file is an
    /// error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path(), false),
        };
        if !path.exists() {
            if explicit {
                bail!("Config file {} does not exist", path.display());
            }
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        Dialect::parse(&config.query.default_dialect)?;
        Ok(config)
    }

    /// Configured vocabulary plus the built-in table aliases.
    pub fn vocabulary_table(&self) -> VocabularyTable {
        self.vocabulary.clone().with_builtin_aliases()
    }

    pub fn intent_checker(&self) -> Result<IntentChecker> {
        let policy = self.intent.clone().unwrap_or_default();
        IntentChecker::new(policy).context("Invalid intent pattern")
    }

    /// Generator variant selected by `generator.mode`. The LLM variant needs
    /// a chat client supplied by the embedding application.
    pub fn generator(&self, chat: Option<Arc<dyn ChatClient>>) -> Result<Arc<dyn SqlGenerator>> {
        match self.generator.mode {
            GeneratorMode::Rules => Ok(Arc::new(RuleBasedGenerator)),
            GeneratorMode::Llm => {
                let Some(client) = chat else {
                    bail!("generator mode `llm` requires a chat client");
                };
                let dialect = Dialect::parse(&self.query.default_dialect)?;
                let generator = LlmGenerator::new(client, Arc::new(self.generator.schema_text()?), dialect)
                    .with_timeout(self.generator.timeout())
                    .with_retries(self.generator.max_retries, self.generator.backoff_base());
                Ok(Arc::new(generator))
            }
        }
    }

    /// Wire backends, vocabulary, policy and generator into an orchestrator.
    pub fn build(&self, chat: Option<Arc<dyn ChatClient>>) -> Result<Orchestrator> {
        let registry = BackendRegistry::from_configs(&self.backends)?;
        let engine = ExecutionEngine::new(registry, Arc::new(self.vocabulary_table()))
            .with_max_repair_rounds(self.query.max_repair_rounds);
        let pipeline =
            RewritePipeline::with_projection_defaults(self.projection.clone().unwrap_or_default());

        Ok(Orchestrator::new(self.generator(chat)?, engine, self.intent_checker()?)
            .with_pipeline(pipeline)
            .with_dialect_hint(self.query.default_dialect.clone())
            .with_max_rows(self.query.max_rows)
            .with_max_attempts(self.query.max_attempts))
    }
}
