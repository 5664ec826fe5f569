//! Benchmarks for the per-statement stages of the sqlwarden pipeline.
//!
//! Benchmarks cover:
//! - Statement guard (validation and row capping)
//! - Rewrite pipeline over finance and healthcare questions
//! - Document-store translation
//! - Result canonicalization and rendering
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use sqlwarden::canonical::{canonicalize, render};
use sqlwarden::db::{CellValue, QueryResult};
use sqlwarden::domain::{Dialect, Domain};
use sqlwarden::engine::translate;
use sqlwarden::guard::{cap_rows, validate};
use sqlwarden::intent::{IntentChecker, IntentPolicy};
use sqlwarden::rewrite::{RewriteContext, RewritePipeline};
use sqlwarden::vocab::VocabularyTable;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

const SIMPLE_SELECT: &str = "SELECT * FROM clients";

const FILTERED: &str =
    "SELECT client_id, client_name FROM clients WHERE risk_level = 'Growth' AND is_active = 'yes'";

const JOINED: &str = "SELECT c.client_name, SUM(t.amount) AS total \
    FROM clients c \
    JOIN transactions t ON t.client_id = c.client_id \
    WHERE t.transaction_type = 'purchase' \
    GROUP BY c.client_name \
    ORDER BY total DESC \
    LIMIT 500";

const WINDOWED: &str = "SELECT * FROM (\
        SELECT client_id, ROW_NUMBER() OVER (ORDER BY total_assets DESC) AS rn FROM clients\
    ) x WHERE rn <= 10";

const STACKED: &str = "SELECT client_id FROM clients WHERE risk_level='Growth'; DROP TABLE clients;";

const DOCUMENT_QUERY: &str =
    "SELECT status, total FROM orders WHERE status = 'PAID' AND region = 'US' AND priority = 2 LIMIT 50";

fn vocabulary() -> VocabularyTable {
    let mut vocab = VocabularyTable::builtin();
    vocab.insert(Domain::Finance, "clients.risk_level", "Growth", "成长");
    vocab.insert(Domain::Finance, "transactions.transaction_type", "purchase", "买入");
    vocab.insert(Domain::Healthcare, "patients.gender", "male", "男");
    vocab
}

fn sample_result(rows: usize) -> QueryResult {
    let columns = vec![
        "client_id".to_string(),
        "client_name".to_string(),
        "total_assets".to_string(),
        "opened".to_string(),
    ];
    let data = (0..rows)
        .map(|i| {
            vec![
                CellValue::Int64(i as i64),
                CellValue::Text(format!("client {}", rows - i)),
                CellValue::Float64(i as f64 * 1.5),
                CellValue::Text(format!("2024-01-{:02}T09:30:00", i % 28 + 1)),
            ]
        })
        .collect();
    QueryResult::from_rows(columns, data, Duration::ZERO)
}

// ---------------------------------------------------------------------------
// Benchmark groups
// ---------------------------------------------------------------------------

fn bench_guard(c: &mut Criterion) {
    let mut group = c.benchmark_group("guard");

    let cases = [
        ("simple_select", SIMPLE_SELECT),
        ("filtered", FILTERED),
        ("joined", JOINED),
        ("windowed", WINDOWED),
        ("stacked", STACKED),
    ];

    for (name, sql) in &cases {
        group.bench_with_input(BenchmarkId::new("validate", name), sql, |b, sql| {
            b.iter(|| validate(black_box(sql)).is_ok());
        });
        group.bench_with_input(BenchmarkId::new("cap_rows", name), sql, |b, sql| {
            b.iter(|| cap_rows(black_box(sql), 200));
        });
    }

    group.finish();
}

fn bench_rewrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("rewrite");

    let pipeline = RewritePipeline::with_defaults();
    let vocab = vocabulary();
    let intent = IntentChecker::new(IntentPolicy::default()).unwrap();

    let cases = [
        ("listing", Domain::Finance, "列出所有客户", SIMPLE_SELECT),
        ("vocabulary", Domain::Finance, "风险等级为成长的活跃客户", FILTERED),
        ("temporal", Domain::Finance, "2024年3月每个客户的买入总额", JOINED),
        (
            "constraints",
            Domain::Healthcare,
            "年龄大于60的男性患者",
            "SELECT patient_id, name FROM patients p",
        ),
    ];

    for (name, domain, question, sql) in &cases {
        let ctx = RewriteContext {
            domain: *domain,
            dialect: Dialect::Postgres,
            question,
            vocabulary: &vocab,
            intent: &intent,
        };
        group.bench_with_input(BenchmarkId::new("pipeline", name), sql, |b, sql| {
            b.iter(|| pipeline.run(black_box(sql), &ctx));
        });
    }

    group.finish();
}

fn bench_translate(c: &mut Criterion) {
    let mut group = c.benchmark_group("translate");

    group.bench_function("equality_filter", |b| {
        b.iter(|| translate(black_box(DOCUMENT_QUERY), 10).unwrap());
    });
    group.bench_function("rejected_or", |b| {
        b.iter(|| translate(black_box("SELECT * FROM orders WHERE a = 1 OR b = 2"), 10).is_err());
    });

    group.finish();
}

fn bench_canonical(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonical");

    for rows in [10usize, 100, 1000] {
        let result = sample_result(rows);
        group.bench_with_input(BenchmarkId::new("canonicalize", rows), &result, |b, r| {
            b.iter(|| canonicalize(black_box(r)));
        });
        group.bench_with_input(BenchmarkId::new("render", rows), &result, |b, r| {
            b.iter(|| render(black_box(r)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_guard, bench_rewrite, bench_translate, bench_canonical);
criterion_main!(benches);
