//! Locker contention benchmark
//!
//! Measures lock → unlock round trips on one hot key and on spread keys,
//! with several threads competing.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use scaling_queue::Locker;

/// Uncontended baseline: one thread, one key
fn bench_uncontended(c: &mut Criterion) {
    let locker = Locker::new();

    let mut group = c.benchmark_group("locker/uncontended");
    group.throughput(Throughput::Elements(1));
    group.bench_function("lock_unlock", |b| {
        b.iter(|| {
            locker.lock(&1u64);
            locker.unlock(&1u64);
        })
    });
    group.bench_function("try_lock_reentrant", |b| {
        locker.lock(&2u64);
        b.iter(|| {
            locker.try_lock(&2u64);
            locker.unlock(&2u64);
        });
        locker.unlock(&2u64);
    });
    group.finish();
}

/// Run `iters` lock round trips spread over `threads` threads
fn run_contended(threads: usize, keys: u64, iters: u64) -> Duration {
    let locker = Arc::new(Locker::new());
    let barrier = Arc::new(Barrier::new(threads + 1));
    let per_thread = (iters / threads as u64).max(1);

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let locker = Arc::clone(&locker);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    let key = (i + t as u64) % keys;
                    locker.execute_with_lock(&key, || std::hint::black_box(key));
                }
            })
        })
        .collect();

    barrier.wait();
    let start = Instant::now();
    for handle in handles {
        handle.join().unwrap();
    }
    start.elapsed()
}

/// Contended lock/unlock on a single hot key vs many keys
fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("locker/contended");
    group.throughput(Throughput::Elements(1));
    group.sample_size(20);

    for threads in [2, 4, 8] {
        group.bench_with_input(BenchmarkId::new("hot_key", threads), &threads, |b, &threads| {
            b.iter_custom(|iters| run_contended(threads, 1, iters));
        });
        group.bench_with_input(
            BenchmarkId::new("spread_keys", threads),
            &threads,
            |b, &threads| {
                b.iter_custom(|iters| run_contended(threads, 64, iters));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_uncontended, bench_contended);
criterion_main!(benches);
