use std::hint::black_box;

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use plant_hierarchy::builder::build_tree;
use plant_hierarchy::invariants::hierarchy_violations;
use plant_hierarchy::parser::parse_paths;

fn lcg_next(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
    *state
}

fn synthetic_paths(path_count: usize, max_depth: usize, label_pool: usize) -> Vec<String> {
    let mut state = 0x1234_5678_9abc_def0u64;
    (0..path_count)
        .map(|_| {
            let depth = 1 + (lcg_next(&mut state) as usize) % max_depth;
            let segments = (0..depth)
                .map(|_| format!("Area{}", (lcg_next(&mut state) as usize) % label_pool))
                .collect::<Vec<_>>();
            segments.join(":")
        })
        .collect()
}

fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebuild");
    for (paths, depth, pool) in [(1_000usize, 4usize, 500usize), (5_000usize, 6usize, 2_000usize)] {
        let raw = synthetic_paths(paths, depth, pool);
        let now = Utc::now().naive_utc();

        group.throughput(Throughput::Elements(paths as u64));
        group.bench_with_input(
            BenchmarkId::new("parse_and_build", format!("{paths}p_d{depth}")),
            &raw,
            |b, raw| {
                b.iter(|| {
                    let parsed = parse_paths(raw.iter().map(String::as_str));
                    black_box(build_tree(parsed.records, now));
                });
            },
        );
    }
    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate");
    for (paths, depth, pool) in [(1_000usize, 4usize, 500usize), (5_000usize, 6usize, 2_000usize)] {
        let raw = synthetic_paths(paths, depth, pool);
        let now = Utc::now().naive_utc();
        let parsed = parse_paths(raw.iter().map(String::as_str));
        let outcome = build_tree(parsed.records, now);
        let snapshot = outcome.snapshot;

        group.throughput(Throughput::Elements(snapshot.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("hierarchy_violations", format!("{}n", snapshot.len())),
            &snapshot,
            |b, snapshot| {
                b.iter(|| {
                    black_box(hierarchy_violations(snapshot));
                });
            },
        );
    }
    group.finish();
}

criterion_group!(rebuild_checks, bench_rebuild, bench_validate);
criterion_main!(rebuild_checks);
