//! Heuristic alignment check between question wording and SQL shape.
//!
//! The keyword sets are policy, not contract: [`IntentPolicy`] deserializes
//! from the `[intent]` config section and every list can be replaced per
//! deployment. Defaults cover Chinese and English phrasing.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static SPACE_BEFORE_PAREN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+\(").unwrap());

/// Result of one check. `hint` is empty when `ok`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    pub ok: bool,
    pub hint: String,
}

impl CheckOutcome {
    pub fn pass() -> Self {
        Self {
            ok: true,
            hint: String::new(),
        }
    }

    pub fn fail(hint: impl Into<String>) -> Self {
        Self {
            ok: false,
            hint: hint.into(),
        }
    }
}

/// Question keywords implying a structural SQL marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentRule {
    /// ASCII words match whole words; anything else matches as a substring.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Regexes over the question, for cues a keyword cannot express.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Any one of these must appear in the normalized, lower-cased SQL.
    pub markers: Vec<String>,
    pub hint: String,
}

/// "show/list/find" + entity noun over the entity's primary table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingRule {
    pub nouns: Vec<String>,
    pub tables: Vec<String>,
    pub required_columns: Vec<String>,
    pub hint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IntentPolicy {
    pub aggregation: IntentRule,
    pub grouping: IntentRule,
    pub ranking: IntentRule,
    pub listing_verbs: Vec<String>,
    pub listing: Vec<ListingRule>,
    /// SQL markers that make a statement an aggregation, exempting it from
    /// listing rules.
    pub aggregate_markers: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for IntentPolicy {
    fn default() -> Self {
        Self {
            aggregation: IntentRule {
                keywords: strings(&[
                    "多少", "数量", "总数", "统计", "次数", "总额", "how many", "count", "total",
                    "number of",
                ]),
                patterns: vec![],
                markers: strings(&["count(", "sum(", "avg(", "min(", "max("]),
                hint: "the question asks for a count or total, but the SQL has no aggregate \
                       function (COUNT/SUM/AVG)"
                    .to_string(),
            },
            grouping: IntentRule {
                keywords: strings(&["每个", "各", "按", "分别", "分组", "each", "per", "grouped"]),
                patterns: vec![],
                markers: strings(&["group by"]),
                hint: "the question asks for a per-group breakdown, but the SQL has no GROUP BY"
                    .to_string(),
            },
            ranking: IntentRule {
                keywords: strings(&[
                    "最高", "最大", "最小", "最多", "最少", "最低", "top", "highest", "lowest",
                    "most", "least",
                ]),
                patterns: strings(&[r"前\s*\d+"]),
                markers: strings(&["order by"]),
                hint: "the question asks for a ranking or extremum, but the SQL has no ORDER BY"
                    .to_string(),
            },
            listing_verbs: strings(&[
                "查看", "查询", "列出", "显示", "获取", "找出", "show", "list", "find",
            ]),
            listing: vec![
                ListingRule {
                    nouns: strings(&["客户", "clients"]),
                    tables: strings(&["clients"]),
                    required_columns: strings(&["client_id", "client_name", "risk_level"]),
                    hint: "a client listing must return client_id, client_name, risk_level, \
                           total_assets rather than a single column"
                        .to_string(),
                },
                ListingRule {
                    nouns: strings(&["患者", "patients"]),
                    tables: strings(&["patients", "patient_master_index"]),
                    required_columns: strings(&["patient_id", "name"]),
                    hint: "a patient listing must return patient_id, name, gender, age"
                        .to_string(),
                },
            ],
            aggregate_markers: strings(&["count(", "sum(", "avg(", "min(", "max(", "group by"]),
        }
    }
}

struct CompiledRule {
    rule: IntentRule,
    patterns: Vec<Regex>,
}

impl CompiledRule {
    fn new(rule: IntentRule) -> Result<Self, regex::Error> {
        let patterns = rule
            .patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<_, _>>()?;
        Ok(Self { rule, patterns })
    }

    fn fires(&self, question: &str) -> bool {
        contains_any(question, &self.rule.keywords)
            || self.patterns.iter().any(|re| re.is_match(question))
    }

    fn satisfied_by(&self, sql: &str) -> bool {
        self.rule.markers.iter().any(|m| sql.contains(m.as_str()))
    }
}

/// State-free intent checker over a compiled [`IntentPolicy`].
pub struct IntentChecker {
    policy: IntentPolicy,
    rules: Vec<CompiledRule>,
}

impl IntentChecker {
    pub fn new(policy: IntentPolicy) -> Result<Self, regex::Error> {
        let rules = vec![
            CompiledRule::new(policy.aggregation.clone())?,
            CompiledRule::new(policy.grouping.clone())?,
            CompiledRule::new(policy.ranking.clone())?,
        ];
        Ok(Self { policy, rules })
    }

    pub fn policy(&self) -> &IntentPolicy {
        &self.policy
    }

    pub fn check(&self, question: &str, sql: &str) -> CheckOutcome {
        let q = question.to_lowercase();
        let s = normalize_sql(sql);

        for rule in &self.rules {
            if rule.fires(&q) && !rule.satisfied_by(&s) {
                return CheckOutcome::fail(rule.rule.hint.clone());
            }
        }

        if let Some(rule) = self.listing_rule_for(&q, &s) {
            let missing = rule
                .required_columns
                .iter()
                .any(|c| !contains_word(&s, &c.to_lowercase()));
            if missing {
                return CheckOutcome::fail(rule.hint.clone());
            }
        }

        CheckOutcome::pass()
    }

    /// True when the question reads as "show/list/find ...".
    pub fn has_listing_verb(&self, question: &str) -> bool {
        contains_any(&question.to_lowercase(), &self.policy.listing_verbs)
    }

    /// True when the normalized SQL aggregates or groups.
    pub fn is_aggregate_sql(&self, sql: &str) -> bool {
        let s = normalize_sql(sql);
        self.policy
            .aggregate_markers
            .iter()
            .any(|m| s.contains(m.as_str()))
    }

    fn listing_rule_for(&self, question: &str, sql: &str) -> Option<&ListingRule> {
        if !contains_any(question, &self.policy.listing_verbs) {
            return None;
        }
        if self.policy.aggregate_markers.iter().any(|m| sql.contains(m.as_str())) {
            return None;
        }
        self.policy.listing.iter().find(|rule| {
            contains_any(question, &rule.nouns)
                && rule
                    .tables
                    .iter()
                    .any(|t| contains_word(sql, &format!("from {}", t.to_lowercase())))
        })
    }
}

impl Default for IntentChecker {
    fn default() -> Self {
        Self::new(IntentPolicy::default()).expect("built-in intent patterns compile")
    }
}

/// Lower-case, collapse whitespace, and glue function names to their `(`.
fn normalize_sql(sql: &str) -> String {
    let lower = sql.to_lowercase();
    let collapsed = WHITESPACE.replace_all(&lower, " ");
    SPACE_BEFORE_PAREN.replace_all(&collapsed, "(").into_owned()
}

fn contains_any(text: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| {
        let k = k.to_lowercase();
        if k.chars().all(|c| c.is_ascii_alphabetic() || c == ' ') {
            contains_word(text, &k)
        } else {
            text.contains(&k)
        }
    })
}

/// Whole-word containment; word characters are ASCII alphanumerics and `_`.
pub(crate) fn contains_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    text.match_indices(word).any(|(i, _)| {
        let before = text[..i].chars().next_back();
        let after = text[i + word.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}
