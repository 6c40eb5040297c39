//! Detector Fusion Benchmarks
//!
//! Measures the cost of `DetectorFusionService::fuse` as the number of
//! contributing detectors grows, and the constant-cost high-level fusion path.

use aegis_core::{CorrelationMatrix, DetectorFusionService, Evidence};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::HashMap;
use std::time::Duration;

fn detector_names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("detector_{i}")).collect()
}

fn uniform_weights(names: &[String]) -> HashMap<String, f64> {
    let w = 1.0 / names.len() as f64;
    names.iter().map(|n| (n.clone(), w)).collect()
}

fn synthetic_evidence(names: &[String]) -> Vec<Evidence> {
    names
        .iter()
        .enumerate()
        .map(|(i, n)| Evidence::new(n, 0.5 + 0.4 * ((i as f64 * 0.37).sin())))
        .collect()
}

fn synthetic_correlation(n: usize) -> CorrelationMatrix {
    let pairs = n * n.saturating_sub(1) / 2;
    let off_diagonal: Vec<f64> = (0..pairs).map(|i| 0.2 * ((i as f64 * 0.11).sin())).collect();
    CorrelationMatrix::from_upper_triangle(n, &off_diagonal)
}

fn bench_fuse_by_detector_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("fusion_fuse");
    group.measurement_time(Duration::from_secs(3));

    for n in [3, 6, 12, 24].iter() {
        let names = detector_names(*n);
        let weights = uniform_weights(&names);
        let evidence = synthetic_evidence(&names);
        let correlation = synthetic_correlation(*n);

        group.bench_with_input(BenchmarkId::new("detectors", n), n, |b, _| {
            b.iter(|| {
                DetectorFusionService::fuse(
                    black_box(&evidence),
                    black_box(0.5),
                    black_box(&weights),
                    black_box(&correlation),
                    1e-4,
                    0.1,
                )
            });
        });
    }

    group.finish();
}

fn bench_fuse_high_level(c: &mut Criterion) {
    let mut group = c.benchmark_group("fusion_high_level");

    group.bench_function("segmentation_vlm_scene_graph", |b| {
        b.iter(|| {
            DetectorFusionService::fuse_high_level(
                black_box(Some(0.82)),
                black_box(Some(0.77)),
                black_box(Some(0.64)),
                1e-4,
            )
        });
    });

    group.finish();
}

criterion_group!(benches, bench_fuse_by_detector_count, bench_fuse_high_level);
criterion_main!(benches);
