//! Safe-LUCB Critic Benchmarks
//!
//! Measures `select_arm`'s cost (two Cholesky solves plus two quadratic-form
//! evaluations per call) and `update`'s cost (one rank-1 symmetric matrix
//! update per arm) as the per-stratum observation count grows.

use aegis_core::{ContextFeatureService, Decision, RawFeatures, SafeLucbCritic};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

fn context(i: usize) -> aegis_core::ContextVector {
    ContextFeatureService::construct(&RawFeatures {
        fusion_confidence: 0.6 + 0.3 * ((i as f64 * 0.1).sin()),
        fusion_variance: 0.05,
        cp_set_size: 1,
        safety_critical_candidate: false,
        lighting_quality: 0.8,
        image_clarity: 0.85,
        property_age_years: 35.0,
        num_damage_sites: 1,
        detector_disagreement: 0.1,
        ood_score: 0.05,
        region: "uk".to_string(),
        property_age_years_for_bin: 35.0,
    })
}

fn bench_select_arm_by_history_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("critic_select_arm");
    group.measurement_time(Duration::from_secs(3));

    for trained in [0usize, 50, 500, 5_000].iter() {
        let mut critic = SafeLucbCritic::new(1.0, 0.5, 1000, 0.005, 0.95);
        let stratum = "residential_20-50_uk_water_damage";
        for i in 0..*trained {
            let ctx = context(i);
            critic.update(Decision::Automate, stratum, &ctx, 0.8, 0.0);
        }
        let ctx = context(0);

        group.bench_with_input(BenchmarkId::new("trained_observations", trained), trained, |b, _| {
            b.iter(|| critic.select_arm(black_box(&ctx), 1e-3, stratum, 1500, 0, false));
        });
    }

    group.finish();
}

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("critic_update");

    group.bench_function("rank_one_update", |b| {
        let mut critic = SafeLucbCritic::new(1.0, 0.5, 1000, 0.005, 0.95);
        let ctx = context(0);
        b.iter(|| critic.update(Decision::Automate, "residential_20-50_uk_water_damage", black_box(&ctx), 0.8, 0.0));
    });

    group.finish();
}

criterion_group!(benches, bench_select_arm_by_history_size, bench_update);
criterion_main!(benches);
