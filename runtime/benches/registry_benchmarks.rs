//! Reply registry and bridge benchmarks
//!
//! - Register/resolve cycle on the registry
//! - Registry operations under a large in-flight population
//! - Full bridge call over the in-memory gateway
//!
//! Run with: `cargo bench -p reqbridge-runtime`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used, clippy::unwrap_used)] // Benchmarks can use expect for setup

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use reqbridge_core::{BridgeRequest, CorrelationId};
use reqbridge_runtime::{ReplyRegistry, RequestBridge};
use reqbridge_testing::{InMemoryGateway, ScriptedReply, helpers::reply_for};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn registry_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");
    group.throughput(Throughput::Elements(1));

    for population in [0_usize, 1_000, 10_000] {
        let registry = ReplyRegistry::new();
        let deadline = Instant::now() + Duration::from_secs(3600);
        let mut held = Vec::with_capacity(population);
        for i in 0..population {
            held.push(
                registry
                    .register(CorrelationId::new(format!("resident-{i}")), deadline)
                    .expect("unique ids"),
            );
        }

        let id = CorrelationId::new("bench-call");
        group.bench_with_input(
            BenchmarkId::new("register_resolve", population),
            &population,
            |b, _| {
                b.iter(|| {
                    let mut pending = registry.register(id.clone(), deadline).expect("free id");
                    black_box(registry.resolve(&id, b"reply".to_vec()));
                    black_box(pending.try_outcome());
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("register_expire", population),
            &population,
            |b, _| {
                b.iter(|| {
                    let _pending = registry.register(id.clone(), deadline).expect("free id");
                    black_box(registry.expire(&id));
                });
            },
        );
        drop(held);
    }

    group.finish();
}

fn bridge_round_trip(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");

    let gateway = InMemoryGateway::new();
    gateway.respond_with(|m| Some(ScriptedReply::immediate(reply_for(m, "ok"))));
    let bridge = RequestBridge::builder(Arc::new(gateway))
        .timeout(Duration::from_secs(1))
        .build()
        .expect("bridge");

    let mut group = c.benchmark_group("bridge");
    group.throughput(Throughput::Elements(1));
    group.bench_function("call_immediate_reply", |b| {
        b.to_async(&runtime).iter(|| async {
            let request = BridgeRequest::new("POST", "/bench", b"{\"n\":1}".to_vec());
            black_box(bridge.call(request).await.unwrap());
        });
    });
    group.finish();
}

criterion_group!(benches, registry_cycle, bridge_round_trip);
criterion_main!(benches);
