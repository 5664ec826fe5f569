//! Domain vocabulary: natural-language enum words to stored codes, and
//! legacy table names to canonical ones.
//!
//! The table is built once (from config plus built-in aliases) and handed to
//! the components that need it. Nothing here is global.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::Domain;

/// Lookup contract consumed by the rewrite pipeline and the engine.
pub trait Vocabulary: Send + Sync {
    /// Canonical stored code for `literal` in `table.column`, if mapped.
    fn lookup_enum(&self, domain: Domain, column: &str, literal: &str) -> Option<String>;

    /// True when `literal` already is one of the stored codes of `column`.
    fn is_canonical_code(&self, domain: Domain, column: &str, literal: &str) -> bool;

    /// Old/alternate table name to canonical table name.
    fn table_alias_map(&self, domain: Domain) -> BTreeMap<String, String>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DomainVocabulary {
    /// `"table.column"` -> { word -> code }
    #[serde(default)]
    pub value_mapping: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub table_alias: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VocabularyTable {
    #[serde(default)]
    pub finance: DomainVocabulary,
    #[serde(default)]
    pub healthcare: DomainVocabulary,
}

const FINANCE_ALIASES: &[(&str, &str)] = &[
    ("trades", "transactions"),
    ("trade", "transactions"),
    ("portfolio", "portfolios"),
    ("counterparty", "counterparties"),
    ("client", "clients"),
    ("product", "products"),
];

const HEALTHCARE_ALIASES: &[(&str, &str)] = &[
    ("patients", "patient_master_index"),
    ("patient", "patient_master_index"),
    ("visits", "medical_encounters"),
    ("encounters", "medical_encounters"),
    ("departments", "departments_wards"),
    ("wards", "departments_wards"),
    ("orders", "medical_orders"),
    ("equipment_usage", "medical_equipment_usage"),
    ("staff", "medical_staff"),
    ("pharmacy", "pharmacy_inventory"),
];

impl VocabularyTable {
    /// Default table with the built-in table aliases.
    pub fn builtin() -> Self {
        Self::default().with_builtin_aliases()
    }

    /// Add built-in aliases without overriding configured ones.
    pub fn with_builtin_aliases(mut self) -> Self {
        for (from, to) in FINANCE_ALIASES {
            self.finance
                .table_alias
                .entry(from.to_string())
                .or_insert_with(|| to.to_string());
        }
        for (from, to) in HEALTHCARE_ALIASES {
            self.healthcare
                .table_alias
                .entry(from.to_string())
                .or_insert_with(|| to.to_string());
        }
        self
    }

    /// Register one mapping; used by tests and programmatic setup.
    pub fn insert(&mut self, domain: Domain, column: &str, word: &str, code: &str) {
        self.domain_mut(domain)
            .value_mapping
            .entry(column.to_string())
            .or_default()
            .insert(word.to_string(), code.to_string());
    }

    fn domain(&self, domain: Domain) -> &DomainVocabulary {
        match domain {
            Domain::Finance => &self.finance,
            Domain::Healthcare => &self.healthcare,
        }
    }

    fn domain_mut(&mut self, domain: Domain) -> &mut DomainVocabulary {
        match domain {
            Domain::Finance => &mut self.finance,
            Domain::Healthcare => &mut self.healthcare,
        }
    }

    /// Mappings applying to `column`: exact key first, then the key with a
    /// schema prefix stripped, then (for a bare column) every table's column.
    fn mappings_for<'a>(
        &'a self,
        domain: Domain,
        column: &str,
    ) -> Vec<&'a BTreeMap<String, String>> {
        let vocab = self.domain(domain);
        let key = strip_schema(column).to_lowercase();

        let direct: Vec<_> = vocab
            .value_mapping
            .iter()
            .filter(|(k, _)| strip_schema(k).to_lowercase() == key)
            .map(|(_, v)| v)
            .collect();
        if !direct.is_empty() || key.contains('.') {
            return direct;
        }

        vocab
            .value_mapping
            .iter()
            .filter(|(k, _)| {
                k.rsplit('.')
                    .next()
                    .is_some_and(|c| c.eq_ignore_ascii_case(&key))
            })
            .map(|(_, v)| v)
            .collect()
    }
}

/// `public.clients.risk_level` -> `clients.risk_level`
fn strip_schema(column: &str) -> &str {
    let parts: Vec<&str> = column.splitn(3, '.').collect();
    if parts.len() == 3 {
        let offset = parts[0].len() + 1;
        &column[offset..]
    } else {
        column
    }
}

impl Vocabulary for VocabularyTable {
    fn lookup_enum(&self, domain: Domain, column: &str, literal: &str) -> Option<String> {
        let trimmed = literal.trim();
        let candidates = [
            trimmed.to_string(),
            trimmed.to_lowercase(),
            trimmed.to_uppercase(),
        ];
        self.mappings_for(domain, column).into_iter().find_map(|m| {
            candidates.iter().find_map(|c| m.get(c).cloned())
        })
    }

    fn is_canonical_code(&self, domain: Domain, column: &str, literal: &str) -> bool {
        let trimmed = literal.trim();
        self.mappings_for(domain, column)
            .into_iter()
            .any(|m| m.values().any(|code| code == trimmed))
    }

    fn table_alias_map(&self, domain: Domain) -> BTreeMap<String, String> {
        self.domain(domain).table_alias.clone()
    }
}
