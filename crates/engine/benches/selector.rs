//! Selection and filtering benchmarks.
//!
//! Measures the per-request decision path without dispatch: policy filtering
//! and weighted selection over candidate sets of increasing size.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::Arc;

use switchyard_common::{CircuitState, CostRate, ProviderInstance, RoutingMode, RoutingPolicy};
use switchyard_engine::{Candidate, PolicyEvaluator, ProviderHealth, WeightedSelector};

fn candidates(count: usize) -> Vec<Candidate> {
    (0..count)
        .map(|i| {
            let cost = 0.001 + (i % 7) as f64 * 0.0005;
            let instance = ProviderInstance::new(
                format!("p{i}"),
                "chat",
                format!("https://p{i}.example"),
                CostRate::per_request(cost),
            )
            .with_weight((i % 10 + 1) as u8 * 10)
            .with_regions([if i % 3 == 0 { "eu-west" } else { "us-east" }]);
            Candidate {
                instance: Arc::new(instance),
                cost,
                health: ProviderHealth {
                    avg_latency_ms: 100.0 + (i % 5) as f64 * 50.0,
                    error_rate: 0.01,
                    sample_count: 50,
                    last_updated: None,
                },
                circuit: CircuitState::Closed,
                admitted: true,
                rate_limited: false,
            }
        })
        .collect()
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("selector/select");
    let selector = WeightedSelector::seeded(42);

    for mode in [
        RoutingMode::Balanced,
        RoutingMode::LowestCost,
        RoutingMode::LowestLatency,
    ] {
        let policy = RoutingPolicy::default().with_mode(mode);
        for count in [4usize, 16, 64] {
            let set = candidates(count);
            group.bench_with_input(
                BenchmarkId::new(mode.as_str(), count),
                &set,
                |b, set| {
                    b.iter(|| selector.select(black_box(set), &policy));
                },
            );
        }
    }

    group.finish();
}

fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("selector/filter");
    let evaluator = PolicyEvaluator::new(10);
    let policy = RoutingPolicy {
        cost_ceiling: Some(0.003),
        max_latency_ms: Some(250),
        allowed_regions: vec!["us-east".into()],
        ..RoutingPolicy::default()
    };

    for count in [4usize, 16, 64] {
        let set = candidates(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &set, |b, set| {
            b.iter(|| evaluator.filter(black_box(set.clone()), &policy, None));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_select, bench_filter);
criterion_main!(benches);
