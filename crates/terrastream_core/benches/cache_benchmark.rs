//! Benchmark for the recency cache.
//!
//! Run with: cargo bench --package terrastream_core --bench cache_benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use terrastream_core::{ChunkCoord, RecencyCache};

fn benchmark_set_touch_prune(c: &mut Criterion) {
    let mut group = c.benchmark_group("recency_cache");
    group.throughput(Throughput::Elements(10_000));

    group.bench_function("set_10k_prune_4k", |b| {
        b.iter(|| {
            let mut cache = RecencyCache::new();
            for i in 0..10_000i32 {
                cache.set(ChunkCoord::new(i % 100, i / 100, 0), i);
            }
            cache.prune(4096);
            black_box(cache.len())
        });
    });

    let mut cache = RecencyCache::new();
    for i in 0..10_000i32 {
        cache.set(ChunkCoord::new(i % 100, i / 100, 0), i);
    }
    group.bench_function("touch_10k", |b| {
        b.iter(|| {
            for i in 0..10_000i32 {
                cache.touch(&ChunkCoord::new(i % 100, i / 100, 0));
            }
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_set_touch_prune);
criterion_main!(benches);
