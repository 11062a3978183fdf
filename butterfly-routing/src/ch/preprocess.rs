//! Vertex ordering and contraction

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Instant;

use butterfly_common::Result;
use priority_queue::PriorityQueue;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use super::{CHEdgeData, ChConfig, ChGraph};
use crate::edge::{EdgeData, LiveEdge};
use crate::graph::{DynamicGraphRouterDataSource, MemoryDynamicGraph};
use crate::routing::RoutingProfile;

/// State for the witness search
#[derive(Debug, Clone, Copy)]
struct WitnessState {
    vertex: u32,
    weight: f32,
}

impl PartialEq for WitnessState {
    fn eq(&self, other: &Self) -> bool {
        self.weight == other.weight
    }
}

impl Eq for WitnessState {}

impl PartialOrd for WitnessState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WitnessState {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: reverse ordering
        other.weight.total_cmp(&self.weight)
    }
}

/// Shortcut `from -> to` that contracting a vertex would need.
#[derive(Debug, Clone, Copy)]
struct Shortcut {
    from: u32,
    to: u32,
    weight: f32,
}

/// Builds a [`ChGraph`] from a live network.
pub struct ChPreprocessor {
    graph: MemoryDynamicGraph<CHEdgeData>,
    contracted: Vec<bool>,
    contracted_neighbours: Vec<i32>,
    ranks: Vec<u32>,
    config: ChConfig,
}

impl ChPreprocessor {
    /// Contract the network as seen through `profile`.
    ///
    /// Arcs the profile cannot traverse are left out; restrictions are not
    /// part of the hierarchy.
    pub fn build<P: RoutingProfile + ?Sized>(
        source: &DynamicGraphRouterDataSource<LiveEdge>,
        profile: &P,
        config: ChConfig,
    ) -> Result<ChGraph> {
        let start = Instant::now();
        let mut preprocessor = Self::load(source, profile, config)?;
        info!(
            vertices = preprocessor.graph.vertex_count(),
            edges = preprocessor.graph.edge_count(),
            "starting contraction"
        );

        let order = preprocessor.initial_order();
        let shortcuts = preprocessor.contract_all(order)?;

        info!(
            shortcuts,
            elapsed_s = start.elapsed().as_secs_f64(),
            "contraction finished"
        );
        Ok(ChGraph {
            graph: preprocessor.graph,
            ranks: preprocessor.ranks,
        })
    }

    fn load<P: RoutingProfile + ?Sized>(
        source: &DynamicGraphRouterDataSource<LiveEdge>,
        profile: &P,
        config: ChConfig,
    ) -> Result<Self> {
        let count = source.vertex_count();
        let mut graph = MemoryDynamicGraph::with_size_estimate(count as usize)?;
        for vertex in 1..=count {
            let coord = source.vertex(vertex).unwrap_or_default();
            graph.add_vertex(coord.lat, coord.lon)?;
        }

        for vertex in 1..=count {
            for (neighbour, edge) in source.edges(vertex) {
                if neighbour < vertex {
                    continue;
                }
                let tags = source.edge_tags(&edge);
                let forward = profile.edge_weight(tags, &edge);
                let backward = profile.edge_weight(tags, &edge.reverse());
                if forward.is_none() && backward.is_none() {
                    continue;
                }
                graph.add_edge(
                    vertex,
                    neighbour,
                    CHEdgeData::original(forward, backward, edge.tags()),
                    None,
                )?;
            }
        }

        let slots = count as usize + 1;
        Ok(Self {
            graph,
            contracted: vec![false; slots],
            contracted_neighbours: vec![0; slots],
            ranks: vec![0; slots],
            config,
        })
    }

    fn initial_order(&self) -> PriorityQueue<u32, Reverse<i32>> {
        let mut queue = PriorityQueue::with_capacity(self.graph.vertex_count() as usize);
        for vertex in 1..=self.graph.vertex_count() {
            queue.push(vertex, Reverse(self.priority(vertex)));
        }
        queue
    }

    /// Contract every vertex, lowest priority first. Returns the number of
    /// shortcuts added.
    fn contract_all(&mut self, mut queue: PriorityQueue<u32, Reverse<i32>>) -> Result<usize> {
        let total = queue.len();
        let mut level = 0u32;
        let mut added = 0usize;

        while let Some((vertex, _)) = queue.pop() {
            // Lazy update: the stored priority may be stale
            let priority = self.priority(vertex);
            if let Some((_, Reverse(next))) = queue.peek() {
                if priority > *next {
                    queue.push(vertex, Reverse(priority));
                    continue;
                }
            }

            added += self.contract(vertex)?;
            self.ranks[vertex as usize] = level;
            level += 1;

            let interval = self.config.progress_interval.max(1);
            if level as usize % interval == 0 {
                info!(
                    contracted = level,
                    total,
                    percent = 100.0 * level as f64 / total as f64,
                    shortcuts = added,
                    "contraction progress"
                );
            }
        }
        Ok(added)
    }

    /// Edge difference plus the number of already contracted neighbours.
    fn priority(&self, vertex: u32) -> i32 {
        let removed = self.neighbours(vertex).len() as i32;
        let shortcuts = self.shortcuts(vertex).len() as i32;
        shortcuts - removed + self.contracted_neighbours[vertex as usize]
    }

    fn contract(&mut self, vertex: u32) -> Result<usize> {
        let shortcuts = self.shortcuts(vertex);
        for shortcut in &shortcuts {
            let data = CHEdgeData::shortcut(shortcut.weight, vertex);
            let merged = match self.graph.edge(shortcut.from, shortcut.to) {
                Some(existing) => existing.merge(&data),
                None => data,
            };
            self.graph.add_edge(shortcut.from, shortcut.to, merged, None)?;
        }

        for (neighbour, _) in self.neighbours(vertex) {
            self.contracted_neighbours[neighbour as usize] += 1;
        }
        self.contracted[vertex as usize] = true;

        debug!(vertex, shortcuts = shortcuts.len(), "contracted vertex");
        Ok(shortcuts.len())
    }

    /// Uncontracted neighbours with the payload oriented away from `vertex`.
    fn neighbours(&self, vertex: u32) -> Vec<(u32, CHEdgeData)> {
        self.graph
            .edges(vertex)
            .filter(|(n, _)| !self.contracted[*n as usize])
            .collect()
    }

    /// Shortcuts needed to contract `vertex` right now.
    fn shortcuts(&self, vertex: u32) -> Vec<Shortcut> {
        let neighbours = self.neighbours(vertex);
        let mut shortcuts = Vec::new();

        for (from, in_data) in &neighbours {
            // arc from -> vertex
            let Some(in_weight) = in_data.backward() else {
                continue;
            };
            let candidates: Vec<(u32, f32)> = neighbours
                .iter()
                .filter(|(to, _)| to != from)
                .filter_map(|(to, out_data)| out_data.forward().map(|w| (*to, in_weight + w)))
                .collect();
            if candidates.is_empty() {
                continue;
            }

            let max_weight = candidates
                .iter()
                .map(|(_, w)| *w)
                .fold(0.0f32, f32::max);
            let witnesses = self.witness_search(*from, vertex, max_weight);
            for (to, weight) in candidates {
                let witnessed = witnesses.get(&to).is_some_and(|w| *w <= weight);
                if !witnessed {
                    shortcuts.push(Shortcut {
                        from: *from,
                        to,
                        weight,
                    });
                }
            }
        }
        shortcuts
    }

    /// Bounded Dijkstra from `from` over uncontracted vertices, avoiding
    /// `skip`.
    fn witness_search(&self, from: u32, skip: u32, max_weight: f32) -> FxHashMap<u32, f32> {
        let mut dist: FxHashMap<u32, f32> = FxHashMap::default();
        let mut heap = BinaryHeap::new();
        dist.insert(from, 0.0);
        heap.push(WitnessState {
            vertex: from,
            weight: 0.0,
        });

        let mut settled = 0usize;
        while let Some(WitnessState { vertex, weight }) = heap.pop() {
            if weight > max_weight || settled >= self.config.witness_settle_limit {
                break;
            }
            if dist.get(&vertex).is_some_and(|d| weight > *d) {
                continue;
            }
            settled += 1;

            for (neighbour, data) in self.graph.edges(vertex) {
                if neighbour == skip || self.contracted[neighbour as usize] {
                    continue;
                }
                let Some(w) = data.forward() else {
                    continue;
                };
                let next = weight + w;
                if dist.get(&neighbour).map_or(true, |d| next < *d) {
                    dist.insert(neighbour, next);
                    heap.push(WitnessState {
                        vertex: neighbour,
                        weight: next,
                    });
                }
            }
        }
        dist
    }
}
