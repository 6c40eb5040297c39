//! Mondrian Conformal Prediction Benchmarks
//!
//! Measures `MondrianConformalPredictor::predict`'s cost as calibration set
//! size grows (nonconformity quantile search) and across the stratum
//! back-off chain (exact stratum hit vs. falling all the way back to global).

use aegis_core::{CalibrationPoint, CalibrationStore, MondrianConformalPredictor, StratumKey};
use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

fn calibration_points(n: usize, stratum: &str) -> Vec<CalibrationPoint> {
    (0..n)
        .map(|i| {
            let score = ((i as f64 * 0.017).sin().abs()) * 0.4;
            CalibrationPoint {
                true_class: "water_damage".to_string(),
                true_probability: 1.0 - score,
                nonconformity_score: score,
                importance_weight: 1.0,
                stratum_key: stratum.to_string(),
                created_at: Utc::now(),
            }
        })
        .collect()
}

fn bench_predict_by_calibration_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("conformal_predict");
    group.measurement_time(Duration::from_secs(3));

    let predictor = MondrianConformalPredictor::new(0.1, 30, 200);
    let key = StratumKey::full("residential", "20-50", "uk", "water_damage");

    for n in [30, 200, 1_000, 5_000].iter() {
        let mut store = CalibrationStore::new();
        store.insert(
            "residential_20-50_uk_water_damage".to_string(),
            calibration_points(*n, "residential_20-50_uk_water_damage"),
        );

        group.bench_with_input(BenchmarkId::new("calibration_size", n), n, |b, _| {
            b.iter(|| predictor.predict(black_box(0.75), "water_damage", &key, black_box(&store)));
        });
    }

    group.finish();
}

fn bench_predict_backoff_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("conformal_backoff");

    let predictor = MondrianConformalPredictor::new(0.1, 30, 200);
    let key = StratumKey::full("residential", "20-50", "uk", "water_damage");

    let mut exact_store = CalibrationStore::new();
    exact_store.insert(
        "residential_20-50_uk_water_damage".to_string(),
        calibration_points(500, "residential_20-50_uk_water_damage"),
    );
    group.bench_function("exact_stratum_hit", |b| {
        b.iter(|| predictor.predict(black_box(0.75), "water_damage", &key, &exact_store));
    });

    let mut global_only_store = CalibrationStore::new();
    global_only_store.insert("global".to_string(), calibration_points(500, "global"));
    group.bench_function("full_backoff_to_global", |b| {
        b.iter(|| predictor.predict(black_box(0.75), "water_damage", &key, &global_only_store));
    });

    group.finish();
}

criterion_group!(benches, bench_predict_by_calibration_size, bench_predict_backoff_depth);
criterion_main!(benches);
