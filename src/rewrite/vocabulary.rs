use regex::{Captures, Regex};
use std::sync::LazyLock;

use super::{alias_to_table, first_from_table, RewriteContext, RewriteError, RewritePass};
use crate::domain::Dialect;

// group 1: qualifier (optional), 2: column, 3: single-quoted value, 4: double-quoted value
static EQ_STRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:\b([A-Za-z_][A-Za-z0-9_]*)\.)?\b([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?:'([^']*)'|"([^"]*)")"#,
    )
    .unwrap()
});

/// Maps `column = 'word'` literals to the stored enum code of that column.
///
/// Resolution order: configured vocabulary, boolean words, then a small
/// English category dictionary. A literal that is already a stored code, or
/// that nothing maps, is kept verbatim.
pub struct VocabularyNormalization;

impl RewritePass for VocabularyNormalization {
    fn name(&self) -> &str {
        "vocabulary_normalization"
    }

    fn description(&self) -> &str {
        "Replaces natural-language enum words with stored codes"
    }

    fn apply(&self, sql: &str, ctx: &RewriteContext<'_>) -> Result<String, RewriteError> {
        let aliases = alias_to_table(sql);
        let default_table = first_from_table(sql).map(|(t, _)| t);

        let rewritten = EQ_STRING.replace_all(sql, |caps: &Captures| {
            let whole = &caps[0];
            // Double quotes delimit identifiers outside MySQL.
            let (value, quote) = match (caps.get(3), caps.get(4)) {
                (Some(v), _) => (v, '\''),
                (None, Some(v)) if ctx.dialect == Dialect::MySql => (v, '"'),
                _ => return whole.to_string(),
            };

            let column = &caps[2];
            let table = match caps.get(1) {
                Some(q) => aliases.get(&q.as_str().to_lowercase()).cloned(),
                None => default_table.clone(),
            };
            let key = match &table {
                Some(t) => format!("{}.{}", t, column),
                None => column.to_string(),
            };

            match map_literal(ctx, &key, column, value.as_str()) {
                Some(mapped) => {
                    // everything up to the opening quote
                    let open_quote = value.start() - 1;
                    let start = caps.get(0).map_or(0, |m| m.start());
                    let prefix = &whole[..open_quote - start];
                    format!("{}{}", prefix, render_literal(&mapped, quote))
                }
                None => whole.to_string(),
            }
        });

        Ok(rewritten.into_owned())
    }
}

fn map_literal(ctx: &RewriteContext<'_>, key: &str, column: &str, literal: &str) -> Option<String> {
    let trimmed = literal.trim();
    if trimmed.is_empty() || ctx.vocabulary.is_canonical_code(ctx.domain, key, trimmed) {
        return None;
    }
    ctx.vocabulary
        .lookup_enum(ctx.domain, key, trimmed)
        .or_else(|| boolean_word(column, trimmed).map(str::to_string))
        .or_else(|| english_category(column, trimmed).map(str::to_string))
        .filter(|mapped| mapped != literal)
}

fn is_flag_column(column: &str) -> bool {
    let column = column.to_lowercase();
    column.starts_with("is_") || column.starts_with("has_") || column.ends_with("_flag")
}

fn boolean_word(column: &str, value: &str) -> Option<&'static str> {
    if !is_flag_column(column) {
        return None;
    }
    match value.to_lowercase().as_str() {
        "y" | "yes" | "true" | "ture" => Some("TRUE"),
        "n" | "no" | "false" => Some("FALSE"),
        _ => None,
    }
}

/// English words for a few known enum columns.
fn english_category(column: &str, value: &str) -> Option<&'static str> {
    let column = column.to_lowercase();
    let value = value.to_lowercase();
    match (column.as_str(), value.as_str()) {
        ("institution_type", "bank") => Some("银行"),
        ("institution_type", "broker" | "securities") => Some("券商"),
        ("institution_type", "insurance") => Some("保险"),
        ("transaction_type" | "trade_type", "sell") => Some("卖出"),
        ("transaction_type" | "trade_type", "buy") => Some("买入"),
        (c, "confirmed") if c == "status" || c.ends_with("_status") => Some("已成"),
        _ => None,
    }
}

fn render_literal(value: &str, quote: char) -> String {
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
        return value.to_uppercase();
    }
    let escaped = value.replace(quote, &format!("{quote}{quote}"));
    format!("{quote}{escaped}{quote}")
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::domain::Domain;
    use crate::intent::IntentChecker;

    fn run(domain: Domain, dialect: Dialect, sql: &str) -> String {
        let vocab = vocabulary();
        let intent = IntentChecker::default();
        let ctx = ctx(domain, dialect, "", &vocab, &intent);
        VocabularyNormalization.apply(sql, &ctx).unwrap()
    }

    #[test]
    fn test_maps_configured_word() {
        assert_eq!(
            run(
                Domain::Finance,
                Dialect::Postgres,
                "SELECT * FROM clients WHERE risk_level = 'Growth'"
            ),
            "SELECT * FROM clients WHERE risk_level = '成长'"
        );
    }

    #[test]
    fn test_resolves_alias_and_keeps_qualifier() {
        assert_eq!(
            run(
                Domain::Finance,
                Dialect::Postgres,
                "SELECT c.client_id FROM clients AS c JOIN portfolios p ON p.client_id = c.client_id \
                 WHERE c.risk_level='conservative'"
            ),
            "SELECT c.client_id FROM clients AS c JOIN portfolios p ON p.client_id = c.client_id \
             WHERE c.risk_level='保守'"
        );
    }

    #[test]
    fn test_canonical_code_is_noop() {
        let sql = "SELECT * FROM clients WHERE risk_level = '成长'";
        assert_eq!(run(Domain::Finance, Dialect::Postgres, sql), sql);
    }

    #[test]
    fn test_boolean_words_and_heuristics() {
        assert_eq!(
            run(
                Domain::Finance,
                Dialect::Postgres,
                "SELECT * FROM institutions WHERE is_active = 'yes' AND institution_type = 'Bank'"
            ),
            "SELECT * FROM institutions WHERE is_active = TRUE AND institution_type = '银行'"
        );
        assert_eq!(
            run(
                Domain::Finance,
                Dialect::Postgres,
                "SELECT * FROM clients WHERE is_active = 'ture'"
            ),
            "SELECT * FROM clients WHERE is_active = TRUE"
        );
    }

    #[test]
    fn test_unmapped_literal_is_verbatim() {
        let sql = "SELECT * FROM clients WHERE client_name = 'Wang Fang'";
        assert_eq!(run(Domain::Finance, Dialect::Postgres, sql), sql);
    }

    #[test]
    fn test_heuristics_only_on_enum_columns() {
        for sql in [
            "SELECT * FROM institutions WHERE institution_name = 'Bank'",
            "SELECT * FROM clients WHERE client_name = 'Yes'",
            "SELECT * FROM transactions WHERE memo = 'buy'",
            "SELECT * FROM orders WHERE note = 'confirmed'",
        ] {
            assert_eq!(run(Domain::Finance, Dialect::Postgres, sql), sql);
        }
        assert_eq!(
            run(
                Domain::Finance,
                Dialect::Postgres,
                "SELECT * FROM trades WHERE trade_status = 'Confirmed' AND vip_flag = 'N'"
            ),
            "SELECT * FROM trades WHERE trade_status = '已成' AND vip_flag = FALSE"
        );
    }

    #[test]
    fn test_domain_scoped() {
        let sql = "SELECT * FROM clients WHERE risk_level = 'Growth'";
        assert_eq!(run(Domain::Healthcare, Dialect::Postgres, sql), sql);
    }

    #[test]
    fn test_double_quotes_only_for_mysql() {
        let sql = r#"SELECT * FROM patients WHERE gender = "male""#;
        assert_eq!(
            run(Domain::Healthcare, Dialect::MySql, sql),
            r#"SELECT * FROM patients WHERE gender = "男""#
        );
        assert_eq!(run(Domain::Healthcare, Dialect::Postgres, sql), sql);
    }

    #[test]
    fn test_comparisons_untouched() {
        let sql = "SELECT * FROM clients WHERE risk_level >= 'Growth' OR risk_level != 'Growth'";
        assert_eq!(run(Domain::Finance, Dialect::Postgres, sql), sql);
    }

    #[test]
    fn test_idempotent() {
        let once = run(
            Domain::Finance,
            Dialect::Postgres,
            "SELECT * FROM clients WHERE risk_level = 'Growth' AND is_active = 'no' AND transaction_type = 'sell'",
        );
        assert_eq!(run(Domain::Finance, Dialect::Postgres, &once), once);
    }

    #[test]
    fn test_render_literal_escapes() {
        assert_eq!(render_literal("O'Neil", '\''), "'O''Neil'");
        assert_eq!(render_literal("false", '\''), "FALSE");
    }
}
