//! # Persistence Tests
//!
//! Graphs over the redb backend survive a reopen.

use std::sync::Arc;
use strata_core::{
    Direction, ElementStore, FieldValue, Graph, GraphContext, PartitionLocator, RedbBackend,
    StoreConfig,
};
use tempfile::tempdir;

fn open_graph(backend: &RedbBackend, locator: PartitionLocator) -> Graph {
    let mut graph = Graph::new();
    graph.add_store(ElementStore::new(
        Arc::new(backend.clone()),
        locator,
        StoreConfig::default(),
    ));
    graph
}

#[test]
fn graph_survives_reopen() {
    let temp = tempdir().expect("temp dir");
    let path = temp.path().join("graph.redb");
    let locator = PartitionLocator::Named("people".into());

    let (alice, edge) = {
        let backend = RedbBackend::open(&path).expect("open db");
        let graph = open_graph(&backend, locator.clone());
        let alice = graph.add_vertex(Some("alice".into()), None).expect("alice");
        let bob = graph.add_vertex(Some("bob".into()), None).expect("bob");
        alice
            .as_vertex()
            .expect("vertex")
            .set_property("name", "Alice")
            .expect("set");
        graph.save(&alice).expect("save");
        let edge = graph.add_edge("knows", &alice, &bob).expect("edge");
        (alice.key().clone(), edge.key().clone())
    };

    let backend = RedbBackend::open(&path).expect("reopen db");
    let graph = open_graph(&backend, locator);
    let reloaded = graph.get("alice").expect("alice");
    assert_eq!(reloaded.key(), &alice);
    let vertex = reloaded.as_vertex().expect("vertex");
    assert_eq!(vertex.property("name"), Some(FieldValue::from("Alice")));
    assert_eq!(vertex.edge_ids(Direction::Out), vec![edge.to_string()]);

    let edge = graph.get(&edge).expect("edge");
    assert_eq!(edge.as_edge().and_then(|e| e.label()).as_deref(), Some("knows"));
    assert_eq!(graph.vertices(None).expect("vertices").len(), 2);
    assert_eq!(graph.edges(None).expect("edges").len(), 1);
}

#[test]
fn removal_is_persisted() {
    let temp = tempdir().expect("temp dir");
    let path = temp.path().join("graph.redb");
    let locator = PartitionLocator::Named("people".into());

    {
        let backend = RedbBackend::open(&path).expect("open db");
        let graph = open_graph(&backend, locator.clone());
        let a = graph.add_vertex(Some("a".into()), None).expect("a");
        let b = graph.add_vertex(Some("b".into()), None).expect("b");
        graph.add_edge("knows", &a, &b).expect("edge");
        graph.remove_vertex(&a).expect("remove");
    }

    let backend = RedbBackend::open(&path).expect("reopen db");
    let graph = open_graph(&backend, locator);
    assert!(graph.get("a").expect_err("removed").is_not_found());
    let b = graph.get("b").expect("b");
    assert!(b.as_vertex().expect("vertex").edge_ids(Direction::Both).is_empty());
    assert!(graph.edges(None).expect("edges").is_empty());
}
