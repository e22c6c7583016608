//! Benchmarks for tool name extraction over collection queries.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use triage_packager::catalog::{enrich, extract_tool_names, CollectionDefinition, Source};

const QUERIES: &[(&str, &str)] = &[
    ("plain", "SELECT Name, Pid FROM pslist() WHERE Name =~ 'svchost'"),
    ("execve", r#"SELECT * FROM execve(argv=["C:\\Tools\\autorunsc64.exe", "-a", "*", "-c"])"#),
    ("parameter", "LET binary = 'yara64.exe'\nSELECT * FROM execve(argv=[binary, rules, target])"),
    (
        "mixed",
        r#"LET tool_name = "winpmem_mini_x64.exe"
SELECT * FROM execve(argv=["/usr/bin/lsof", "-n"])
SELECT * FROM execve(argv=["sigcheck.exe", "-accepteula"])"#,
    ),
];

/// Benchmark extraction on individual queries
fn bench_extract_tool_names(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_tool_names");

    for (name, query) in QUERIES {
        group.bench_with_input(BenchmarkId::new("query", name), query, |b, query| {
            b.iter(|| extract_tool_names(black_box(query)));
        });
    }

    group.finish();
}

/// Benchmark enrichment of a definition with many sources
fn bench_enrich(c: &mut Criterion) {
    let mut group = c.benchmark_group("enrich");

    for count in [1usize, 10, 100] {
        let definition = CollectionDefinition {
            name: "Bench.Collection".to_string(),
            sources: (0..count)
                .map(|i| Source {
                    query: QUERIES[i % QUERIES.len()].1.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        group.bench_with_input(BenchmarkId::new("sources", count), &definition, |b, definition| {
            b.iter(|| {
                let mut def = definition.clone();
                enrich(black_box(&mut def))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_extract_tool_names, bench_enrich);
criterion_main!(benches);
