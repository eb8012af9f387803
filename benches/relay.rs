//! # Relay Benchmarks
//!
//! End-to-end costs of the store and limiters.
//!
//! Run with: `cargo bench --bench relay`

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use portal_core::{
    EntryStore, ManualClock, RelayBuilder, RelayConfig, SlidingWindowLimiter, SystemClock,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Benchmark create followed by take_once for growing payloads
fn bench_create_take(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_take");
    let store = EntryStore::new(&RelayConfig::default(), Arc::new(SystemClock));

    for size in [16usize, 1_024, 50_000] {
        let payload = vec![b'x'; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                let receipt = store.create(payload).unwrap();
                std::hint::black_box(store.take_once(receipt.code.as_str()).unwrap())
            });
        });
    }

    group.finish();
}

/// Benchmark creation cost as the code space fills up
fn bench_create_under_occupancy(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_under_occupancy");

    for live in [0usize, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(live), &live, |b, &live| {
            let store = EntryStore::new(&RelayConfig::default(), Arc::new(SystemClock));
            for _ in 0..live {
                store.create(b"filler").unwrap();
            }

            b.iter(|| {
                let receipt = store.create(b"probe").unwrap();
                store.take_once(receipt.code.as_str()).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark lookups for codes that do not exist
fn bench_take_missing(c: &mut Criterion) {
    let store = EntryStore::new(&RelayConfig::default(), Arc::new(SystemClock));
    for _ in 0..10_000 {
        store.create(b"filler").unwrap();
    }

    c.bench_function("take_missing", |b| {
        b.iter(|| std::hint::black_box(store.take_once("not-a-code").is_err()));
    });
}

/// Benchmark limiter checks for one client and for many distinct prefixes
fn bench_limiter_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("limiter_check");

    group.bench_function("single_bucket", |b| {
        let limiter = SlidingWindowLimiter::new(
            "bench",
            u32::MAX,
            Duration::from_secs(60),
            100_000,
            Arc::new(ManualClock::new(0)),
        );
        b.iter(|| std::hint::black_box(limiter.check("10.0.0.5")));
    });

    group.bench_function("rolling_window", |b| {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = SlidingWindowLimiter::new(
            "bench",
            100,
            Duration::from_millis(100),
            100_000,
            clock.clone(),
        );
        b.iter(|| {
            clock.advance(Duration::from_millis(1));
            std::hint::black_box(limiter.check("10.0.0.5"))
        });
    });

    group.bench_function("distinct_prefixes", |b| {
        let limiter = SlidingWindowLimiter::new(
            "bench",
            10,
            Duration::from_secs(60),
            1_000_000,
            Arc::new(ManualClock::new(0)),
        );
        let mut n = 0u32;
        b.iter(|| {
            n = n.wrapping_add(1);
            let client = format!("{}.{}.{}.1", n >> 16 & 0xff, n >> 8 & 0xff, n & 0xff);
            std::hint::black_box(limiter.check(&client))
        });
    });

    group.finish();
}

/// Benchmark limiter sweeps over many idle buckets
fn bench_limiter_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("limiter_sweep");

    for buckets in [1_000u32, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(buckets), &buckets, |b, &buckets| {
            b.iter_batched(
                || {
                    let clock = Arc::new(ManualClock::new(0));
                    let limiter = SlidingWindowLimiter::new(
                        "bench",
                        10,
                        Duration::from_secs(1),
                        1_000_000,
                        clock.clone(),
                    );
                    for n in 0..buckets {
                        limiter.check(&format!("10.{}.{}.1", n >> 8 & 0xff, n & 0xff));
                    }
                    clock.advance(Duration::from_secs(2));
                    limiter
                },
                |limiter| std::hint::black_box(limiter.sweep()),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

/// Benchmark full submit/retrieve round trips from several threads
fn bench_concurrent_relay(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_relay");

    for num_threads in [2, 4, 8] {
        group.throughput(Throughput::Elements(num_threads as u64 * 100));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_threads", num_threads)),
            &num_threads,
            |b, &num_threads| {
                let relay = RelayBuilder::new()
                    .limits(u32::MAX, u32::MAX)
                    .build()
                    .unwrap();

                b.iter_custom(|iters| {
                    let mut total_duration = Duration::ZERO;

                    for _ in 0..iters {
                        relay.limiter().create_limiter().clear();
                        relay.limiter().retrieve_limiter().clear();
                        let start = std::time::Instant::now();

                        let handles: Vec<_> = (0..num_threads)
                            .map(|t| {
                                let relay = relay.clone();
                                thread::spawn(move || {
                                    let client = format!("10.0.{}.1", t);
                                    for _ in 0..100 {
                                        let receipt = relay.submit(&client, "payload").unwrap();
                                        relay.retrieve(&client, receipt.code.as_str()).unwrap();
                                    }
                                })
                            })
                            .collect();

                        for handle in handles {
                            handle.join().unwrap();
                        }

                        total_duration += start.elapsed();
                    }

                    total_duration
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_create_take,
    bench_create_under_occupancy,
    bench_take_missing,
    bench_limiter_check,
    bench_limiter_sweep,
    bench_concurrent_relay,
);

criterion_main!(benches);
