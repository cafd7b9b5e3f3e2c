//! # Element Store Benchmarks
//!
//! Cache hit and load paths of the element store.
//!
//! Run with: `cargo bench -p strata-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{
    CompositeKey, ElementStore, Graph, LoadingCache, MemoryBackend, PartitionId,
    PartitionLocator, StoreConfig,
};

const P1: PartitionId = PartitionId(0xAAAA_0000_0000_0000);

/// Graph over one in-memory partition holding `size` vertices.
fn populated_graph(size: usize) -> (Graph, Vec<CompositeKey>) {
    let mut graph = Graph::new();
    graph.add_store(ElementStore::new(
        Arc::new(MemoryBackend::new()),
        PartitionLocator::Id(P1),
        StoreConfig::default(),
    ));
    let keys = (0..size)
        .map(|_| graph.add_vertex(None, None).expect("add").key().clone())
        .collect();
    (graph, keys)
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_cache_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_hit");

    for size in [100, 1000, 10000].iter() {
        let cache: LoadingCache<u64, u64> =
            LoadingCache::with_limits(*size, Duration::from_secs(600));
        for i in 0..*size as u64 {
            cache.put(i, i);
        }
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut i = 0u64;
            b.iter(|| {
                i = (i + 1) % size as u64;
                black_box(cache.get_if_present(&i))
            });
        });
    }

    group.finish();
}

fn bench_store_get_cached(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_get_cached");

    for size in [100, 1000].iter() {
        let (graph, keys) = populated_graph(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                for key in &keys {
                    black_box(graph.get(key).expect("get"));
                }
            });
        });
    }

    group.finish();
}

fn bench_store_get_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_get_load");

    for size in [100, 1000].iter() {
        let (graph, keys) = populated_graph(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                graph.flush_caches();
                for key in &keys {
                    black_box(graph.get(key).expect("get"));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_cache_hit,
    bench_store_get_cached,
    bench_store_get_load,
);

criterion_main!(benches);
