use std::path::Path;

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use prematch_lab::features::{CutoffPolicy, FeatureEngine, FeatureSetSpec};
use prematch_lab::pipeline;
use prematch_lab::splitter::{CvStrategy, SplitConfig, split};

#[path = "../tests/common/mod.rs"]
mod common;

fn bench_feature_compute_all(c: &mut Criterion) {
    let snapshot = common::store_of(&common::league(10, 1)).snapshot().unwrap();
    c.bench_function("feature_compute_all", |b| {
        b.iter(|| {
            let engine = FeatureEngine::new(&snapshot, FeatureSetSpec::default()).unwrap();
            let vectors = engine.compute_all(black_box(CutoffPolicy::default())).unwrap();
            black_box(vectors.len());
        })
    });
}

fn bench_split(c: &mut Criterion) {
    let kickoffs: Vec<_> = common::league(20, 2).iter().map(|r| r.kickoff).collect();
    let cfg = SplitConfig {
        strategy: CvStrategy::Rolling,
        min_train_size: 200,
        horizon: 28,
        step: 14,
        gap: 4,
    };
    c.bench_function("temporal_split", |b| {
        b.iter(|| {
            let folds = split(black_box(&kickoffs), &cfg).unwrap();
            black_box(folds.len());
        })
    });
}

fn bench_evaluate_1x2(c: &mut Criterion) {
    let snapshot = common::store_of(&common::league(4, 3)).snapshot().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = common::run_config(Path::new("unused.csv"), dir.path(), "kind = \"1x2\"");
    cfg.evaluation.predictors = vec!["poisson_dc".to_string()];
    let mut group = c.benchmark_group("evaluate");
    group.sample_size(10);
    group.bench_function("evaluate_1x2", |b| {
        b.iter(|| {
            let artifact = pipeline::evaluate_snapshot(&cfg, black_box(&snapshot)).unwrap();
            black_box(artifact.report.predictions.len());
        })
    });
    group.finish();
}

criterion_group!(perf, bench_feature_compute_all, bench_split, bench_evaluate_1x2);
criterion_main!(perf);
