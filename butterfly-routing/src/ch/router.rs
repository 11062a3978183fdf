//! Queries on a contracted graph

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::{ChGraph, NOT_CONTRACTED};
use crate::routing::{Path, PathSegment};

const NO_PARENT: u32 = u32::MAX;

/// State for Dijkstra's algorithm in CH query
#[derive(Debug, Clone, Copy)]
struct QueryState {
    vertex: u32,
    weight: f32,
}

impl PartialEq for QueryState {
    fn eq(&self, other: &Self) -> bool {
        self.weight == other.weight
    }
}

impl Eq for QueryState {}

impl PartialOrd for QueryState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueryState {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: reverse ordering
        other.weight.total_cmp(&self.weight)
    }
}

/// One direction of an upward search.
struct UpwardSearch<'a> {
    ch: &'a ChGraph,
    /// Follow arcs towards the root when false
    forward: bool,
    /// vertex -> (weight, parent)
    dist: FxHashMap<u32, (f32, u32)>,
    heap: BinaryHeap<QueryState>,
}

impl<'a> UpwardSearch<'a> {
    fn new(ch: &'a ChGraph, root: u32, forward: bool) -> Self {
        let mut dist = FxHashMap::default();
        let mut heap = BinaryHeap::new();
        dist.insert(root, (0.0, NO_PARENT));
        heap.push(QueryState {
            vertex: root,
            weight: 0.0,
        });
        Self {
            ch,
            forward,
            dist,
            heap,
        }
    }

    fn peek_weight(&self) -> Option<f32> {
        self.heap.peek().map(|s| s.weight)
    }

    /// Settle the next vertex and relax its upward arcs.
    fn step(&mut self) -> Option<QueryState> {
        while let Some(state) = self.heap.pop() {
            if self
                .dist
                .get(&state.vertex)
                .is_some_and(|(d, _)| state.weight > *d)
            {
                continue;
            }

            let rank = self.ch.rank(state.vertex);
            for (neighbour, data) in self.ch.graph.edges(state.vertex) {
                if self.ch.rank(neighbour) <= rank {
                    continue;
                }
                let arc = if self.forward {
                    data.forward()
                } else {
                    data.backward()
                };
                let Some(w) = arc else {
                    continue;
                };
                let next = state.weight + w;
                if self
                    .dist
                    .get(&neighbour)
                    .map_or(true, |(d, _)| next < *d)
                {
                    self.dist.insert(neighbour, (next, state.vertex));
                    self.heap.push(QueryState {
                        vertex: neighbour,
                        weight: next,
                    });
                }
            }
            return Some(state);
        }
        None
    }

    /// Vertices from the root to `vertex`, root first.
    fn trail(&self, vertex: u32) -> Vec<u32> {
        let mut trail = vec![vertex];
        let mut cur = vertex;
        while let Some(&(_, parent)) = self.dist.get(&cur) {
            if parent == NO_PARENT {
                break;
            }
            trail.push(parent);
            cur = parent;
        }
        trail.reverse();
        trail
    }

    /// Run to exhaustion; every reachable vertex with its weight.
    fn exhaust(mut self) -> Vec<(u32, f32)> {
        let mut settled = Vec::new();
        while let Some(state) = self.step() {
            settled.push((state.vertex, state.weight));
        }
        settled
    }
}

/// Bidirectional queries over a [`ChGraph`].
pub struct ChRouter<'a> {
    ch: &'a ChGraph,
}

impl<'a> ChRouter<'a> {
    pub fn new(ch: &'a ChGraph) -> Self {
        Self { ch }
    }

    /// Shortest path between two vertices, unpacked into original vertices.
    pub fn one_to_one(&self, from: u32, to: u32) -> Option<Path> {
        if self.ch.vertex(from).is_none() || self.ch.vertex(to).is_none() {
            return None;
        }

        let mut forward = UpwardSearch::new(self.ch, from, true);
        let mut backward = UpwardSearch::new(self.ch, to, false);
        let mut best = f32::INFINITY;
        let mut meeting = None;
        let mut iterations = 0usize;

        loop {
            iterations += 1;
            let fwd_open = forward.peek_weight().is_some_and(|w| w <= best);
            let bwd_open = backward.peek_weight().is_some_and(|w| w <= best);
            if !fwd_open && !bwd_open {
                break;
            }

            if fwd_open {
                if let Some(state) = forward.step() {
                    if let Some(&(d, _)) = backward.dist.get(&state.vertex) {
                        if state.weight + d < best {
                            best = state.weight + d;
                            meeting = Some(state.vertex);
                        }
                    }
                }
            }
            if bwd_open {
                if let Some(state) = backward.step() {
                    if let Some(&(d, _)) = forward.dist.get(&state.vertex) {
                        if state.weight + d < best {
                            best = state.weight + d;
                            meeting = Some(state.vertex);
                        }
                    }
                }
            }
        }

        debug!(from, to, iterations, weight = best, "ch query finished");
        let meeting = meeting?;

        let mut packed = forward.trail(meeting);
        let mut down = backward.trail(meeting);
        down.reverse();
        packed.extend(down.into_iter().skip(1));

        Some(Path {
            segments: self
                .unpack(&packed)
                .into_iter()
                .map(PathSegment::Vertex)
                .collect(),
            weight: best,
        })
    }

    /// Shortest-path weight between two vertices.
    pub fn weight(&self, from: u32, to: u32) -> Option<f32> {
        self.one_to_one(from, to).map(|p| p.weight)
    }

    /// Weights between every source and every target using buckets:
    /// backward searches from all targets first, then one forward search per
    /// source that scans the buckets of the vertices it settles.
    pub fn many_to_many(&self, sources: &[u32], targets: &[u32]) -> Vec<Vec<Option<f32>>> {
        let mut buckets: FxHashMap<u32, Vec<(usize, f32)>> = FxHashMap::default();
        for (t, &target) in targets.iter().enumerate() {
            if self.ch.vertex(target).is_none() {
                continue;
            }
            for (vertex, weight) in UpwardSearch::new(self.ch, target, false).exhaust() {
                buckets.entry(vertex).or_default().push((t, weight));
            }
        }

        sources
            .par_iter()
            .map(|&source| {
                let mut row = vec![None; targets.len()];
                if self.ch.vertex(source).is_none() {
                    return row;
                }
                for (vertex, up) in UpwardSearch::new(self.ch, source, true).exhaust() {
                    let Some(bucket) = buckets.get(&vertex) else {
                        continue;
                    };
                    for &(t, down) in bucket {
                        let weight = up + down;
                        if row[t].map_or(true, |w| weight < w) {
                            row[t] = Some(weight);
                        }
                    }
                }
                row
            })
            .collect()
    }

    /// Expand shortcuts until only original arcs remain.
    fn unpack(&self, packed: &[u32]) -> Vec<u32> {
        let mut vertices = Vec::with_capacity(packed.len());
        let Some(&first) = packed.first() else {
            return vertices;
        };
        vertices.push(first);

        for pair in packed.windows(2) {
            let mut stack = vec![(pair[0], pair[1])];
            while let Some((a, b)) = stack.pop() {
                let via = self
                    .ch
                    .graph
                    .edge(a, b)
                    .map_or(NOT_CONTRACTED, |data| data.forward_contracted);
                if via == NOT_CONTRACTED {
                    vertices.push(b);
                } else {
                    trace!(from = a, to = b, via, "unpacking shortcut");
                    stack.push((via, b));
                    stack.push((a, via));
                }
            }
        }
        vertices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ch::{ChConfig, ChPreprocessor};
    use crate::edge::LiveEdge;
    use crate::graph::DynamicGraphRouterDataSource;
    use crate::routing::{DykstraRouter, RouterPoint, ShortestDistance};

    /// Ladder of two parallel streets joined by rungs:
    ///
    /// ```text
    /// 1 - 2 - 3 - 4
    /// |   |   |   |
    /// 5 - 6 - 7 - 8
    /// ```
    fn ladder() -> DynamicGraphRouterDataSource<LiveEdge> {
        let mut source = DynamicGraphRouterDataSource::with_size_estimate(8).unwrap();
        let g = source.graph_mut();
        for row in 0..2 {
            for col in 0..4 {
                g.add_vertex(row as f32 * 0.001, col as f32 * 0.001).unwrap();
            }
        }
        let top = [(1, 2, 10.0), (2, 3, 10.0), (3, 4, 10.0)];
        let bottom = [(5, 6, 4.0), (6, 7, 4.0), (7, 8, 4.0)];
        let rungs = [(1, 5, 3.0), (2, 6, 8.0), (3, 7, 8.0), (4, 8, 3.0)];
        for (a, b, d) in top.into_iter().chain(bottom).chain(rungs) {
            g.add_edge(a, b, LiveEdge::new(true, 0, d), None).unwrap();
        }
        source
    }

    fn contract(source: &DynamicGraphRouterDataSource<LiveEdge>) -> ChGraph {
        ChPreprocessor::build(source, &ShortestDistance::default(), ChConfig::default()).unwrap()
    }

    #[test]
    fn test_one_to_one_matches_dijkstra() {
        let source = ladder();
        let ch = contract(&source);
        let profile = ShortestDistance::default();
        let dykstra = DykstraRouter::new(&source, &profile);
        let router = ChRouter::new(&ch);

        for from in 1..=8 {
            for to in 1..=8 {
                let expected = dykstra
                    .weight(&RouterPoint::Vertex(from), &RouterPoint::Vertex(to))
                    .unwrap();
                let path = router.one_to_one(from, to).unwrap();
                assert!(
                    (path.weight - expected).abs() < 1e-3,
                    "{from}->{to}: {} vs {expected}",
                    path.weight
                );
            }
        }
    }

    #[test]
    fn test_path_is_unpacked() {
        let source = ladder();
        let ch = contract(&source);
        let path = ChRouter::new(&ch).one_to_one(1, 4).unwrap();

        assert_eq!(path.weight, 18.0);
        assert_eq!(path.vertices(), vec![1, 5, 6, 7, 8, 4]);
    }

    #[test]
    fn test_same_vertex() {
        let source = ladder();
        let ch = contract(&source);
        let path = ChRouter::new(&ch).one_to_one(6, 6).unwrap();
        assert_eq!(path.vertices(), vec![6]);
        assert_eq!(path.weight, 0.0);
    }

    #[test]
    fn test_unreachable_and_unknown() {
        let mut source = ladder();
        source.graph_mut().add_vertex(1.0, 1.0).unwrap();
        let ch = contract(&source);
        let router = ChRouter::new(&ch);

        assert!(router.one_to_one(1, 9).is_none());
        assert!(router.one_to_one(1, 42).is_none());
    }

    #[test]
    fn test_many_to_many_matches_one_to_one() {
        let source = ladder();
        let ch = contract(&source);
        let router = ChRouter::new(&ch);
        let points = [1, 3, 6, 8];

        let matrix = router.many_to_many(&points, &points);
        for (i, &from) in points.iter().enumerate() {
            for (j, &to) in points.iter().enumerate() {
                assert_eq!(matrix[i][j], router.weight(from, to), "{from}->{to}");
            }
        }
    }
}
