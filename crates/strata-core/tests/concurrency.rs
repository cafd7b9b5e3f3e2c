//! # Concurrency Tests
//!
//! Single-flight loading and cache consistency under contention.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use strata_core::primitives::TYPE_FIELD;
use strata_core::{
    CompositeKey, Element, ElementKind, ElementStore, Graph, MemoryBackend, PartitionId,
    PartitionLocator, RawRecord, StoreConfig,
};

const P1: PartitionId = PartitionId(0xAAAA_0000_0000_0000);
const THREADS: usize = 8;

fn graph_with(backend: &MemoryBackend) -> Graph {
    let mut graph = Graph::new();
    graph.add_store(ElementStore::new(
        Arc::new(backend.clone()),
        PartitionLocator::Id(P1),
        StoreConfig::default(),
    ));
    graph
}

fn seed(backend: &MemoryBackend, local: &str) -> CompositeKey {
    let record = RawRecord::new(P1, local).with_field(TYPE_FIELD, ElementKind::Vertex.tag());
    let key = record.key();
    backend.insert(record);
    key
}

#[test]
fn concurrent_gets_share_one_load() {
    let backend = MemoryBackend::new();
    let graph = graph_with(&backend);
    let key = seed(&backend, &"a".repeat(32));
    backend.set_fetch_delay(Duration::from_millis(50));

    let barrier = Barrier::new(THREADS);
    let results: Vec<Element> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    graph.get(&key).expect("get")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect()
    });

    assert_eq!(backend.stats().fetches, 1);
    let first = &results[0];
    assert!(results.iter().all(|e| e.same_instance(first)));
}

#[test]
fn concurrent_misses_share_one_fetch() {
    let backend = MemoryBackend::new();
    let graph = graph_with(&backend);
    let key = CompositeKey::new(P1, "b".repeat(32));
    backend.set_fetch_delay(Duration::from_millis(50));

    let barrier = Barrier::new(THREADS);
    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                barrier.wait();
                let err = graph.get(&key).expect_err("missing");
                assert!(err.is_not_found());
            });
        }
    });
    assert_eq!(backend.stats().fetches, 1);

    // Negative results are not cached.
    assert!(graph.get(&key).is_err());
    assert_eq!(backend.stats().fetches, 2);
}

#[test]
fn concurrent_adds_of_one_id_share_an_instance() {
    let backend = MemoryBackend::new();
    let graph = graph_with(&backend);
    backend.set_fetch_delay(Duration::from_millis(50));

    let barrier = Barrier::new(THREADS);
    let results: Vec<Element> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    graph.add_vertex(Some("x".into()), None).expect("add")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect()
    });

    assert_eq!(backend.stats().creates, 1);
    let first = &results[0];
    assert!(results.iter().all(|e| e.same_instance(first)));

    results[THREADS - 1]
        .as_vertex()
        .expect("vertex")
        .set_property("name", "Xavier")
        .expect("set");
    let cached = graph.get("x").expect("get");
    assert!(cached.same_instance(first));
    assert_eq!(
        cached.as_vertex().and_then(|v| v.property("name")),
        Some("Xavier".into())
    );
}

#[test]
fn distinct_keys_load_independently() {
    let backend = MemoryBackend::new();
    let graph = graph_with(&backend);
    let keys: Vec<_> = (0..THREADS)
        .map(|i| seed(&backend, &format!("{i:x}").repeat(32)))
        .collect();

    thread::scope(|scope| {
        for key in &keys {
            let graph = &graph;
            scope.spawn(move || {
                let element = graph.get(key).expect("get");
                assert_eq!(element.key(), key);
            });
        }
    });
    assert_eq!(backend.stats().fetches, u64::try_from(THREADS).expect("thread count"));
}

#[test]
fn invalidation_races_with_reads() {
    let backend = MemoryBackend::new();
    let graph = graph_with(&backend);
    let key = seed(&backend, &"c".repeat(32));
    let store = graph.default_store().expect("store");
    let stop = AtomicBool::new(false);

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                while !stop.load(Ordering::Relaxed) {
                    let element = graph.get(&key).expect("get");
                    assert_eq!(element.key(), &key);
                }
            });
        }
        scope.spawn(|| {
            for _ in 0..200 {
                store.flush_cache();
                thread::yield_now();
            }
            stop.store(true, Ordering::Relaxed);
        });
    });

    let element = graph.get(&key).expect("final get");
    assert!(store.get_if_cached(&key).is_some_and(|c| c.same_instance(&element)));
}

#[test]
fn concurrent_edge_creation_keeps_adjacency() {
    let backend = MemoryBackend::new();
    let graph = graph_with(&backend);
    let hub = graph.add_vertex(None, None).expect("hub");
    let leaves: Vec<_> = (0..THREADS)
        .map(|_| graph.add_vertex(None, None).expect("leaf"))
        .collect();

    thread::scope(|scope| {
        for leaf in &leaves {
            let (graph, hub) = (&graph, &hub);
            scope.spawn(move || graph.add_edge("links", hub, leaf).expect("edge"));
        }
    });

    let hub = hub.as_vertex().expect("vertex");
    assert_eq!(hub.edge_ids(strata_core::Direction::Out).len(), THREADS);
}
