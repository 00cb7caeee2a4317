//! Benchmarks for the livealloc hot path.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn bench_hot_path(c: &mut Criterion) {
    livealloc::suppress_diagnostics(true);
    livealloc::init();

    let mut group = c.benchmark_group("hot_path");

    group.bench_function("alloc_free_64", |b| {
        b.iter(|| unsafe {
            let ptr = livealloc::alloc(black_box(64));
            livealloc::dealloc(ptr);
        })
    });

    group.bench_function("alloc_free_4096", |b| {
        b.iter(|| unsafe {
            let ptr = livealloc::alloc(black_box(4096));
            livealloc::dealloc(ptr);
        })
    });

    group.bench_function("alloc_free_aligned_64", |b| {
        b.iter(|| unsafe {
            let ptr = livealloc::alloc_aligned(black_box(256), 64);
            livealloc::dealloc_aligned(ptr);
        })
    });

    group.finish();

    let mut group = c.benchmark_group("coalescing");
    group.throughput(Throughput::Elements(16));

    // Sixteen same-site allocations collapse into a single chunk event.
    group.bench_function("burst_16x32", |b| {
        b.iter(|| {
            let mut ptrs = [std::ptr::null_mut::<u8>(); 16];
            for ptr in ptrs.iter_mut() {
                *ptr = livealloc::alloc(black_box(32));
            }
            for ptr in ptrs {
                unsafe { livealloc::dealloc(ptr) };
            }
        })
    });

    group.finish();
    livealloc::flush();
}

fn bench_realloc(c: &mut Criterion) {
    livealloc::suppress_diagnostics(true);
    livealloc::init();

    c.bench_function("realloc_same_size", |b| {
        let ptr = livealloc::alloc(256);
        b.iter(|| unsafe {
            black_box(livealloc::realloc(black_box(ptr), 256));
        });
        unsafe { livealloc::dealloc(ptr) };
    });

    livealloc::flush();
}

criterion_group!(benches, bench_hot_path, bench_realloc);
criterion_main!(benches);
