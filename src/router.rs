//! Question-to-domain classification and backend resolution.
//!
//! There is no ambient "active backend": [`BackendRegistry::resolve`] returns
//! an [`ExecutionTarget`] which the caller passes explicitly to the engine.
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

use crate::db::{
    BackendConfig, DocumentStore, InMemoryDocumentStore, MySqlBackend, PostgresBackend,
    RelationalBackend,
};
use crate::domain::{Dialect, Domain, ExecutionTarget};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("unknown domain `{0}`")]
    UnknownDomain(String),
    #[error("unknown dialect `{0}`")]
    UnknownDialect(String),
    #[error("no backend registered for `{0}`")]
    UnknownTarget(String),
}

static PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[\s，。！？,.!?；;:：()（）\[\]{}【】"“”'’]"#).unwrap()
});

// A Han character followed by a dosage form: 阿莫西林胶囊, 维C片.
static DOSAGE_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\p{Han}(?:缓释片|控释片|胶囊|注射液|针剂|颗粒|滴丸|口服液|混悬液|乳膏|喷雾|片|栓)")
        .unwrap()
});

// Everyday words ending in a dosage-form character.
const NOT_DOSAGE_FORMS: &[&str] = &[
    "图片", "照片", "芯片", "名片", "卡片", "影片", "唱片", "碎片", "切片", "瓦片", "刀片",
];

fn has_dosage_form(text: &str) -> bool {
    DOSAGE_FORM
        .find_iter(text)
        .any(|m| !NOT_DOSAGE_FORMS.contains(&m.as_str()))
}

const DRUG_NAMES: &[&str] = &[
    "阿莫西林", "阿司匹林", "布洛芬", "头孢", "奥美拉唑", "二甲双胍", "甲硝唑", "左氧氟沙星",
    "诺氟沙星", "青霉素", "红霉素", "胰岛素", "葡萄糖", "维生素",
];

const HEALTHCARE_TERMS: &[&str] = &[
    "患者", "病人", "就诊", "挂号", "门诊", "住院", "出院", "科室", "医生", "医师", "护士",
    "处方", "用药", "剂量", "给药", "药品", "药房", "检验", "检查", "病历", "医嘱", "医保",
    "床位", "病房", "手术", "诊断", "医院", "patient", "doctor", "hospital", "diagnosis",
];

const FINANCE_TERMS: &[&str] = &[
    "客户", "资产", "净值", "余额", "账户", "交易", "流水", "基金", "股票", "债券", "理财",
    "投资", "收益", "风险", "评级", "贷款", "利率", "持仓", "对手方", "申购", "赎回", "组合",
    "client", "portfolio", "trade", "fund",
];

/// Keyword classifier. Rules are tried in priority order and the first one
/// that matches decides; scan position within the question is irrelevant.
#[derive(Debug, Clone)]
pub struct DomainClassifier {
    drug_names: Vec<String>,
    healthcare_terms: Vec<String>,
    finance_terms: Vec<String>,
    fallback: Domain,
}

impl Default for DomainClassifier {
    fn default() -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self {
            drug_names: owned(DRUG_NAMES),
            healthcare_terms: owned(HEALTHCARE_TERMS),
            finance_terms: owned(FINANCE_TERMS),
            fallback: Domain::Finance,
        }
    }
}

impl DomainClassifier {
    /// Extra medication names, e.g. from a formulary.
    pub fn with_drug_names(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.drug_names.extend(names);
        self
    }

    pub fn classify(&self, question: &str) -> Domain {
        let norm = PUNCTUATION.replace_all(question, "").to_lowercase();
        let has_any = |words: &[String]| words.iter().any(|w| norm.contains(w.as_str()));

        if has_any(&self.drug_names) || has_dosage_form(&norm) {
            Domain::Healthcare
        } else if has_any(&self.healthcare_terms) {
            Domain::Healthcare
        } else if has_any(&self.finance_terms) {
            Domain::Finance
        } else {
            self.fallback
        }
    }
}

#[derive(Clone)]
pub enum BackendHandle {
    Relational(Arc<dyn RelationalBackend>),
    Document(Arc<dyn DocumentStore>),
}

/// Registered backends keyed by `(domain, dialect)`.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<ExecutionTarget, BackendHandle>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build clients for every configured backend. Connections are made
    /// lazily on first use.
    pub fn from_configs(configs: &[BackendConfig]) -> Result<Self> {
        let mut registry = Self::new();
        for config in configs {
            let mut config = config.clone();
            config.resolve_password();
            let target = config.target()?;
            match target.dialect {
                Dialect::Postgres => {
                    registry.register_relational(target, Arc::new(PostgresBackend::new(config)));
                }
                Dialect::MySql => {
                    let backend = MySqlBackend::connect_lazy(&config)
                        .with_context(|| format!("Failed to configure {}", target))?;
                    registry.register_relational(target, Arc::new(backend));
                }
                Dialect::Document => {
                    let store = match &config.fixtures {
                        Some(path) => InMemoryDocumentStore::from_json_file(path)?,
                        None => InMemoryDocumentStore::new(),
                    };
                    registry.register_document(target, Arc::new(store));
                }
            }
            tracing::debug!(target_id = %target, "backend registered");
        }
        Ok(registry)
    }

    pub fn register_relational(&mut self, target: ExecutionTarget, backend: Arc<dyn RelationalBackend>) {
        self.backends.insert(target, BackendHandle::Relational(backend));
    }

    pub fn register_document(&mut self, target: ExecutionTarget, store: Arc<dyn DocumentStore>) {
        self.backends.insert(target, BackendHandle::Document(store));
    }

    /// Fold the dialect hint to its canonical token and check that a backend
    /// exists for the pair. Unknown pairs fail with the attempted identity.
    pub fn resolve(&self, domain: Domain, dialect_hint: &str) -> Result<ExecutionTarget, RouteError> {
        let dialect = Dialect::parse(dialect_hint)?;
        let target = ExecutionTarget::new(domain, dialect);
        if self.backends.contains_key(&target) {
            Ok(target)
        } else {
            Err(RouteError::UnknownTarget(target.identity()))
        }
    }

    pub fn handle(&self, target: &ExecutionTarget) -> Result<BackendHandle, RouteError> {
        self.backends
            .get(target)
            .cloned()
            .ok_or_else(|| RouteError::UnknownTarget(target.identity()))
    }

    pub fn targets(&self) -> Vec<ExecutionTarget> {
        let mut targets: Vec<_> = self.backends.keys().copied().collect();
        targets.sort_by_key(|t| t.identity());
        targets
    }
}
