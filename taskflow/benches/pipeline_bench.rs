//! Benchmarks for the hot paths of step execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::time::Duration;
use taskflow::context::SharedState;
use taskflow::providers::resolve_template;
use taskflow::resilience::{Admission, CallOutcome, CircuitBreaker, CircuitBreakerConfig};
use tokio::time::Instant;

fn template_benchmark(c: &mut Criterion) {
    let state = SharedState::from_input(&json!({
        "user": "alice",
        "order": {"id": 42, "items": ["a", "b"]},
    }));
    let template = json!({
        "greeting": "hello {{user}}",
        "order_id": "{{order.id}}",
        "nested": {"note": "{{ order.items }} for {{user}}", "missing": "{{absent}}"},
    });

    c.bench_function("resolve_template", |b| {
        b.iter(|| black_box(resolve_template(black_box(&template), &state)));
    });
}

fn breaker_benchmark(c: &mut Criterion) {
    c.bench_function("breaker_acquire_record", |b| {
        let mut breaker = CircuitBreaker::new(CircuitBreakerConfig::new(5, Duration::from_secs(30)));
        b.iter(|| {
            let now = Instant::now();
            if let (Admission::Allowed(permit), _) = breaker.try_acquire(now) {
                black_box(breaker.record(permit, CallOutcome::Success, now));
            }
        });
    });

    c.bench_function("breaker_trip_and_reset", |b| {
        b.iter(|| {
            let mut breaker = CircuitBreaker::new(CircuitBreakerConfig::new(3, Duration::from_secs(30)));
            let now = Instant::now();
            for _ in 0..3 {
                if let (Admission::Allowed(permit), _) = breaker.try_acquire(now) {
                    breaker.record(permit, CallOutcome::Failure, now);
                }
            }
            black_box(breaker.try_acquire(now));
            black_box(breaker.reset());
        });
    });
}

criterion_group!(benches, template_benchmark, breaker_benchmark);
criterion_main!(benches);
