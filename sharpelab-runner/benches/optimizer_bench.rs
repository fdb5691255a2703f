//! Criterion benchmarks for the search hot loops.
//!
//! Run with: `cargo bench -p sharpelab-runner`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sharpelab_runner::{Combinations, ObjectiveParams, SharpeOptimizer};

/// Deterministic price path with a drift and a periodic shock.
fn price_path(drift: f64, freq: f64, rows: usize) -> Vec<f64> {
    let mut p = 100.0;
    (0..rows)
        .map(|t| {
            if t > 0 {
                p *= (drift + 0.02 * (t as f64 * freq).sin()).exp();
            }
            p
        })
        .collect()
}

fn bench_optimize(c: &mut Criterion) {
    let mut group = c.benchmark_group("sharpe_optimize");
    let optimizer = SharpeOptimizer::new(ObjectiveParams {
        risk_free_rate: 0.05,
        trading_days: 252.0,
        max_portion: 0.7,
    });

    for k in [2usize, 3, 5, 8] {
        let paths: Vec<Vec<f64>> = (0..k)
            .map(|i| price_path(0.0005 + i as f64 * 1e-4, 0.7 + i as f64 * 0.41, 252))
            .collect();
        let columns: Vec<&[f64]> = paths.iter().map(Vec::as_slice).collect();
        let tickers: Vec<String> = (0..k).map(|i| format!("T{i}")).collect();

        group.bench_with_input(BenchmarkId::from_parameter(k), &k, |b, _| {
            b.iter(|| {
                let _ = optimizer.optimize(black_box(&tickers), black_box(&columns));
            });
        });
    }
    group.finish();
}

fn bench_combinations(c: &mut Criterion) {
    c.bench_function("combinations_20_choose_4", |b| {
        b.iter(|| Combinations::new(black_box(20), black_box(4)).count());
    });
}

criterion_group!(benches, bench_optimize, bench_combinations);
criterion_main!(benches);
