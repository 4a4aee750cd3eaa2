//! Pool throughput benchmarks against a zero-latency simulated server.

#![allow(missing_docs, clippy::unwrap_used, clippy::expect_used)]

use std::hint::black_box;

use asql_pool::{Error, Pool, PoolConfig, Promise};
use asql_testing::SimulatedConnector;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tokio::runtime::Runtime;

const BATCH: usize = 64;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

fn query_batch(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("pool_query_batch");
    group.throughput(Throughput::Elements(BATCH as u64));

    for size in [1u32, 4, 16] {
        let pool = rt
            .block_on(Pool::new(
                PoolConfig::new().pool_size(size),
                SimulatedConnector::new(),
            ))
            .unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(size), &pool, |b, pool| {
            b.to_async(&rt).iter(|| async move {
                let promises: Vec<_> = (0..BATCH).map(|_| pool.query("SELECT 1")).collect();
                black_box(pool.all(promises).await.unwrap())
            });
        });

        rt.block_on(pool.close());
    }

    group.finish();
}

fn checkout(c: &mut Criterion) {
    let rt = runtime();
    let pool = rt
        .block_on(Pool::new(
            PoolConfig::new().pool_size(4),
            SimulatedConnector::new(),
        ))
        .unwrap();

    c.bench_function("pool_acquire_release", |b| {
        let pool = &pool;
        b.to_async(&rt).iter(|| async move {
            let mut conn = pool.acquire().await.unwrap();
            black_box(conn.execute("SELECT 1").await.unwrap());
        });
    });

    rt.block_on(pool.close());
}

fn then_chain(c: &mut Criterion) {
    let rt = runtime();
    let pool = rt
        .block_on(Pool::new(
            PoolConfig::new().pool_size(1).lazy_connect(true),
            SimulatedConnector::new(),
        ))
        .unwrap();

    c.bench_function("promise_then_chain_100", |b| {
        let pool = &pool;
        b.to_async(&rt).iter(|| async move {
            let mut promise = Promise::<u64, Error>::resolved(pool.executor(), 0);
            for _ in 0..100 {
                promise = promise.map(|n| n + 1);
            }
            black_box(promise.await.unwrap())
        });
    });
}

criterion_group!(benches, query_batch, checkout, then_chain);
criterion_main!(benches);
