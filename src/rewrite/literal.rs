use regex::{Captures, Regex};
use std::sync::LazyLock;

use super::{RewriteContext, RewriteError, RewritePass};

// The leading character is captured so `>=`, `<=`, `!=` and `==` are left alone.
static BOOLEAN_RHS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^|[^<>!=])(=\s*)(?:'(y|n|1|0|true|false)'|\b(true|false)\b)").unwrap()
});

/// Quoted `'Y'/'N'/'1'/'0'/'true'/'false'` and bare `true/false` on the right
/// of `=` become `TRUE`/`FALSE`. Bare `1`/`0` are left alone since they are
/// as likely to be ids as flags.
pub struct LiteralNormalization;

impl RewritePass for LiteralNormalization {
    fn name(&self) -> &str {
        "literal_normalization"
    }

    fn description(&self) -> &str {
        "Canonicalizes boolean-like equality literals"
    }

    fn apply(&self, sql: &str, _ctx: &RewriteContext<'_>) -> Result<String, RewriteError> {
        Ok(normalize_boolean_literals(sql))
    }
}

pub(crate) fn normalize_boolean_literals(sql: &str) -> String {
    BOOLEAN_RHS
        .replace_all(sql, |caps: &Captures| {
            let value = caps
                .get(3)
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_lowercase())
                .unwrap_or_default();
            let canonical = match value.as_str() {
                "y" | "1" | "true" => "TRUE",
                _ => "FALSE",
            };
            format!("{}{}{}", &caps[1], &caps[2], canonical)
        })
        .into_owned()
}
