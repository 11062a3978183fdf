//! Store-level properties checked against random graphs

use butterfly_routing::{EdgeData, LiveEdge, MemoryDynamicGraph};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;

/// Random graph plus the edges it should hold, keyed by `(min, max)` and
/// oriented from `min`.
fn random_graph(
    seed: u64,
    vertices: u32,
    edges: usize,
) -> (MemoryDynamicGraph<LiveEdge>, FxHashMap<(u32, u32), LiveEdge>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut graph = MemoryDynamicGraph::with_size_estimate(2).unwrap();
    for _ in 0..vertices {
        graph
            .add_vertex(rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0))
            .unwrap();
    }

    let mut expected = FxHashMap::default();
    for _ in 0..edges {
        let a = rng.random_range(1..=vertices);
        let b = rng.random_range(1..=vertices);
        if a == b {
            continue;
        }
        let data = LiveEdge::new(rng.random_bool(0.5), rng.random_range(0..16), rng.random_range(1.0..100.0));
        graph.add_edge(a, b, data.clone(), None).unwrap();
        let key = (a.min(b), a.max(b));
        let oriented = if a < b { data } else { data.reverse() };
        expected.insert(key, oriented);
    }
    (graph, expected)
}

fn assert_matches(graph: &MemoryDynamicGraph<LiveEdge>, expected: &FxHashMap<(u32, u32), LiveEdge>) {
    assert_eq!(graph.edge_count(), expected.len());
    for (&(a, b), data) in expected {
        assert_eq!(graph.edge(a, b).as_ref(), Some(data), "{a}->{b}");
        assert_eq!(graph.edge(b, a), Some(data.reverse()), "{b}->{a}");
    }
}

#[test]
fn test_adjacency_is_symmetric() {
    let (graph, expected) = random_graph(7, 200, 1_000);
    assert_matches(&graph, &expected);

    for v in 1..=graph.vertex_count() {
        for (w, data) in graph.edges(v) {
            assert_ne!(v, w, "self loop at {v}");
            let back: Vec<LiveEdge> = graph
                .edges(w)
                .filter(|(x, _)| *x == v)
                .map(|(_, d)| d)
                .collect();
            assert_eq!(back, vec![data.reverse()], "{v} <-> {w}");
        }
    }
}

#[test]
fn test_reverse_round_trips() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..100 {
        let edge = LiveEdge::new(rng.random_bool(0.5), rng.random_range(0..1_000), 5.0);
        assert_eq!(edge.reverse().reverse(), edge);
        assert_ne!(edge.reverse().forward(), edge.forward());
    }
}

#[test]
fn test_overwrite_is_idempotent() {
    let (mut graph, expected) = random_graph(3, 50, 200);
    for (&(a, b), data) in &expected {
        graph.add_edge(b, a, data.reverse(), None).unwrap();
    }
    assert_matches(&graph, &expected);
}

#[test]
fn test_removal_and_compress_keep_the_rest() {
    let (mut graph, mut expected) = random_graph(5, 100, 500);
    let mut rng = StdRng::seed_from_u64(99);

    let keys: Vec<(u32, u32)> = expected.keys().copied().collect();
    for key in keys {
        if rng.random_bool(0.4) {
            let (a, b) = if rng.random_bool(0.5) { key } else { (key.1, key.0) };
            graph.remove_edge(a, b).unwrap();
            expected.remove(&key);
        }
    }
    assert_matches(&graph, &expected);

    // compress drops trailing vertices without edges
    let last_used = expected.keys().map(|&(_, b)| b).max().unwrap_or(0);
    graph.compress().unwrap();
    assert_eq!(graph.vertex_count(), last_used);
    assert_matches(&graph, &expected);
}

#[test]
fn test_remove_all_edges_of_vertices() {
    let (mut graph, mut expected) = random_graph(13, 60, 300);
    for v in [1, 10, 20, 30] {
        graph.remove_edges(v).unwrap();
        expected.retain(|&(a, b), _| a != v && b != v);
        assert_eq!(graph.edges(v).count(), 0);
    }
    assert_matches(&graph, &expected);
}

#[test]
fn test_comparer_can_keep_existing_data() {
    let mut graph = MemoryDynamicGraph::with_size_estimate(2).unwrap();
    let a = graph.add_vertex(0.0, 0.0).unwrap();
    let b = graph.add_vertex(0.0, 1.0).unwrap();

    let first = LiveEdge::new(true, 1, 10.0);
    graph.add_edge(a, b, first.clone(), None).unwrap();

    let never = |_: &LiveEdge, _: &LiveEdge| false;
    graph
        .add_edge_with_comparer(b, a, LiveEdge::new(true, 2, 3.0), None, &never)
        .unwrap();

    assert_eq!(graph.edges(a).count(), 1);
    assert_eq!(graph.edge(a, b), Some(first));
}
