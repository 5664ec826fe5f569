//! Order-independent, type-normalized result representation, and a short
//! human-readable rendering.
//!
//! Canonical forms are used to compare results for equality (scoring);
//! rendering is for display only.
use chrono::{NaiveDateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::db::{CellValue, QueryResult};

pub const NULL_SENTINEL: &str = "NULL";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static NUMERIC_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?\d+(?:\.\d+)?$").unwrap());

/// Sorted column names plus sorted per-row strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CanonicalForm {
    pub columns: Vec<String>,
    pub rows: Vec<String>,
}

impl fmt::Display for CanonicalForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.rows.join(", "))
    }
}

pub fn canonicalize(result: &QueryResult) -> CanonicalForm {
    let mut order: Vec<usize> = (0..result.columns.len()).collect();
    order.sort_by_key(|&i| result.columns[i].to_lowercase());

    let columns = order
        .iter()
        .map(|&i| result.columns[i].to_lowercase())
        .collect::<Vec<_>>();

    let mut rows: Vec<String> = result
        .rows
        .iter()
        .map(|row| {
            let mut line = String::new();
            for (&i, name) in order.iter().zip(&columns) {
                let value = row.get(i).map(normalize_value).unwrap_or_else(|| NULL_SENTINEL.to_string());
                line.push_str(name);
                line.push('=');
                line.push_str(&value);
                line.push('|');
            }
            line
        })
        .collect();
    rows.sort();

    CanonicalForm { columns, rows }
}

/// True when both results hold the same logical data.
pub fn equivalent(a: &QueryResult, b: &QueryResult) -> bool {
    canonicalize(a) == canonicalize(b)
}

/// Fixed textual form of one value.
pub fn normalize_value(value: &CellValue) -> String {
    match value {
        CellValue::Null => NULL_SENTINEL.to_string(),
        CellValue::Bool(b) => b.to_string(),
        CellValue::Int16(i) => i.to_string(),
        CellValue::Int32(i) => i.to_string(),
        CellValue::Int64(i) => i.to_string(),
        CellValue::Float32(f) => normalize_float(f.to_string().parse().unwrap_or(*f as f64)),
        CellValue::Float64(f) => normalize_float(*f),
        CellValue::Decimal(d) => d.normalize().to_string(),
        CellValue::Text(s) | CellValue::Unknown(s) => normalize_text(s),
        CellValue::Bytes(b) => b.iter().map(|byte| format!("{:02x}", byte)).collect(),
        CellValue::Date(d) => d.format(DATE_FORMAT).to_string(),
        CellValue::Time(t) => t.format(TIME_FORMAT).to_string(),
        CellValue::DateTime(dt) => dt.format(DATETIME_FORMAT).to_string(),
        CellValue::TimestampTz(dt) => dt.with_timezone(&Utc).format(DATETIME_FORMAT).to_string(),
        CellValue::Json(j) => j.to_string(),
        CellValue::Array(items) => {
            let inner: Vec<String> = items.iter().map(normalize_value).collect();
            format!("[{}]", inner.join(","))
        }
    }
}

fn normalize_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        return format!("{}", f as i64);
    }
    match Decimal::from_str(&f.to_string()) {
        Ok(d) => d.normalize().to_string(),
        Err(_) => f.to_string(),
    }
}

// Numbers and timestamps that arrive as text normalize like typed values.
fn normalize_text(s: &str) -> String {
    let trimmed = s.trim();
    if NUMERIC_TEXT.is_match(trimmed) {
        if let Ok(d) = Decimal::from_str(trimmed.trim_start_matches('+')) {
            return d.normalize().to_string();
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return dt.format(DATETIME_FORMAT).to_string();
        }
    }
    trimmed.to_string()
}

/// Bounds for [`render`].
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub max_rows: usize,
    pub max_columns: usize,
    /// Per-line character budget.
    pub max_chars: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            max_rows: 12,
            max_columns: 4,
            max_chars: 180,
        }
    }
}

pub const NO_ROWS: &str = "no rows";

pub fn render(result: &QueryResult) -> String {
    render_with(result, RenderOptions::default())
}

/// Scalar for 1x1, `col=value; ...` for one row, a numbered listing otherwise.
pub fn render_with(result: &QueryResult, opts: RenderOptions) -> String {
    if result.is_empty() || result.columns.is_empty() {
        return NO_ROWS.to_string();
    }
    let cell = |row: &[CellValue], i: usize| row.get(i).map(normalize_value).unwrap_or_default();

    if result.rows.len() == 1 {
        let row = &result.rows[0];
        if result.columns.len() == 1 {
            return truncate(&cell(row, 0), opts.max_chars);
        }
        let pairs: Vec<String> = result
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}={}", c, cell(row, i)))
            .collect();
        return truncate(&pairs.join("; "), opts.max_chars);
    }

    let shown = result.rows.len().min(opts.max_rows);
    let mut lines = Vec::with_capacity(shown + 1);
    for (n, row) in result.rows.iter().take(shown).enumerate() {
        let pairs: Vec<String> = result
            .columns
            .iter()
            .take(opts.max_columns)
            .enumerate()
            .map(|(i, c)| format!("{}={}", c, cell(row, i)))
            .collect();
        lines.push(truncate(&format!("{}. {}", n + 1, pairs.join("; ")), opts.max_chars));
    }
    if result.rows.len() > shown {
        lines.push(format!("... ({} more rows)", result.rows.len() - shown));
    }
    lines.join("\n")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
