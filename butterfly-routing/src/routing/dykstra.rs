//! Dijkstra router with restriction-aware relaxation
//!
//! Without restrictions this is plain vertex-settled Dijkstra. When the
//! profile's vehicle has restrictions of up to `k` vertices, a vertex may be
//! settled once per distinct trail of the `k - 1` vertices before it, so that
//! a detour around a forbidden manoeuvre is still found.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use super::profile::RoutingProfile;
use super::{Path, PathSegment, RouterPoint};
use crate::edge::{EdgeData, LiveEdge};
use crate::graph::DynamicGraphRouterDataSource;
use crate::vehicle::Vehicle;

const NO_PARENT: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct Label {
    vertex: u32,
    parent: u32,
    weight: f32,
    /// Stand-in for the far end of the edge a resolved source sits on; part
    /// of the trail for restriction checks, never part of a path.
    phantom: bool,
}

/// Frontier entry: lowest weight first, then first pushed.
#[derive(Debug, Clone, Copy)]
struct FrontierEntry {
    weight: f32,
    seq: u64,
    label: u32,
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrontierEntry {}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on (weight, seq)
        other
            .weight
            .total_cmp(&self.weight)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// State of one single-source search.
struct SearchTree<'a, P: ?Sized> {
    source: &'a DynamicGraphRouterDataSource<LiveEdge>,
    profile: &'a P,
    vehicle: Option<Vehicle>,
    /// Vertices before the current one that take part in the settle key.
    history: usize,
    labels: Vec<Label>,
    heap: BinaryHeap<FrontierEntry>,
    seq: u64,
    settled_vertices: FxHashSet<u32>,
    settled_trails: FxHashSet<Vec<u32>>,
}

impl<'a, P: RoutingProfile + ?Sized> SearchTree<'a, P> {
    fn new(source: &'a DynamicGraphRouterDataSource<LiveEdge>, profile: &'a P) -> Self {
        let vehicle = profile.vehicle();
        Self {
            source,
            profile,
            vehicle,
            history: source.max_restriction_len(vehicle).saturating_sub(1),
            labels: Vec::new(),
            heap: BinaryHeap::new(),
            seq: 0,
            settled_vertices: FxHashSet::default(),
            settled_trails: FxHashSet::default(),
        }
    }

    fn weight_of(&self, edge: &LiveEdge) -> Option<f32> {
        self.profile
            .edge_weight(self.source.edge_tags(edge), edge)
    }

    fn push(&mut self, vertex: u32, parent: u32, weight: f32) {
        let label = self.labels.len() as u32;
        self.labels.push(Label {
            vertex,
            parent,
            weight,
            phantom: false,
        });
        self.heap.push(FrontierEntry {
            weight,
            seq: self.seq,
            label,
        });
        self.seq += 1;
    }

    fn push_phantom(&mut self, vertex: u32) -> u32 {
        let label = self.labels.len() as u32;
        self.labels.push(Label {
            vertex,
            parent: NO_PARENT,
            weight: 0.0,
            phantom: true,
        });
        label
    }

    fn seed(&mut self, point: &RouterPoint) {
        match *point {
            RouterPoint::Vertex(v) => {
                if self.source.vertex(v).is_some() {
                    self.push(v, NO_PARENT, 0.0);
                }
            }
            RouterPoint::Edge {
                from, to, offset, ..
            } => {
                let Some(edge) = self.source.edge(from, to) else {
                    return;
                };
                if let Some(w) = self.weight_of(&edge) {
                    let phantom = self.push_phantom(from);
                    self.push(to, phantom, (1.0 - offset) * w);
                }
                if let Some(w) = self.weight_of(&edge.reverse()) {
                    let phantom = self.push_phantom(to);
                    self.push(from, phantom, offset * w);
                }
            }
        }
    }

    fn peek_weight(&self) -> Option<f32> {
        self.heap.peek().map(|e| e.weight)
    }

    /// Settle the next label and relax its edges.
    fn step(&mut self) -> Option<u32> {
        while let Some(entry) = self.heap.pop() {
            if self.settle(entry.label) {
                self.relax(entry.label);
                return Some(entry.label);
            }
        }
        None
    }

    fn settle(&mut self, idx: u32) -> bool {
        if self.history == 0 {
            self.settled_vertices
                .insert(self.labels[idx as usize].vertex)
        } else {
            let key = self.trail(idx, self.history + 1);
            self.settled_trails.insert(key)
        }
    }

    /// Up to `n` vertices ending at label `idx`, oldest first.
    fn trail(&self, idx: u32, n: usize) -> Vec<u32> {
        let mut trail = Vec::with_capacity(n);
        let mut cur = idx;
        while cur != NO_PARENT && trail.len() < n {
            let label = &self.labels[cur as usize];
            trail.push(label.vertex);
            cur = label.parent;
        }
        trail.reverse();
        trail
    }

    /// A label that was reached from elsewhere cannot be left when its
    /// vertex is closed to passing through.
    fn is_dead_end(&self, idx: u32) -> bool {
        let label = &self.labels[idx as usize];
        label.parent != NO_PARENT && self.source.is_restricted(self.vehicle, &[label.vertex])
    }

    /// Whether stepping from the end of `trail` to `next` completes a
    /// forbidden sequence.
    fn completes_restriction(&self, trail: &[u32], next: u32) -> bool {
        let mut sequence = trail.to_vec();
        sequence.push(next);
        (0..sequence.len() - 1).any(|start| self.source.is_restricted(self.vehicle, &sequence[start..]))
    }

    /// Whether the search may leave label `idx` towards `next`.
    fn may_continue(&self, idx: u32, next: u32) -> bool {
        if self.is_dead_end(idx) {
            return false;
        }
        self.history == 0 || !self.completes_restriction(&self.trail(idx, self.history), next)
    }

    fn relax(&mut self, idx: u32) {
        let label = self.labels[idx as usize];
        if self.is_dead_end(idx) {
            return;
        }

        let trail = if self.history > 0 {
            self.trail(idx, self.history)
        } else {
            Vec::new()
        };

        let source = self.source;
        for (neighbour, edge) in source.edges(label.vertex) {
            if self.history == 0 && self.settled_vertices.contains(&neighbour) {
                continue;
            }
            let Some(w) = self.weight_of(&edge) else {
                continue;
            };
            if self.history > 0 && self.completes_restriction(&trail, neighbour) {
                continue;
            }
            self.push(neighbour, idx, label.weight + w);
        }
    }

    /// Vertices from the search root to label `idx`, phantoms excluded.
    fn vertices_to(&self, idx: u32) -> Vec<u32> {
        let mut vertices = Vec::new();
        let mut cur = idx;
        while cur != NO_PARENT {
            let label = &self.labels[cur as usize];
            if !label.phantom {
                vertices.push(label.vertex);
            }
            cur = label.parent;
        }
        vertices.reverse();
        vertices
    }
}

#[derive(Debug, Clone, Copy)]
enum Reached {
    /// Source and target share an edge and the partial edge between them wins
    Direct,
    Label(u32),
}

#[derive(Debug, Clone, Copy)]
struct Found {
    weight: f32,
    reached: Reached,
}

/// One-to-one, one-to-many and many-to-many Dijkstra over a live graph.
///
/// A router borrows the data source immutably; any number of routers may
/// query the same source concurrently.
pub struct DykstraRouter<'a, P: ?Sized> {
    source: &'a DynamicGraphRouterDataSource<LiveEdge>,
    profile: &'a P,
}

impl<'a, P: RoutingProfile + ?Sized> DykstraRouter<'a, P> {
    pub fn new(source: &'a DynamicGraphRouterDataSource<LiveEdge>, profile: &'a P) -> Self {
        Self { source, profile }
    }

    /// Shortest path between two points, `None` when unreachable.
    pub fn one_to_one(&self, from: &RouterPoint, to: &RouterPoint) -> Option<Path> {
        self.one_to_many(from, std::slice::from_ref(to))
            .pop()
            .flatten()
    }

    /// Shortest paths from one point to each target, in target order.
    pub fn one_to_many(&self, from: &RouterPoint, targets: &[RouterPoint]) -> Vec<Option<Path>> {
        let (tree, found) = self.search(from, targets);
        found
            .iter()
            .zip(targets)
            .map(|(found, to)| found.map(|f| Self::build_path(&tree, from, to, f)))
            .collect()
    }

    /// Shortest-path weights between every source and every target.
    /// `result[i][j]` is the weight from `sources[i]` to `targets[j]`.
    pub fn many_to_many(
        &self,
        sources: &[RouterPoint],
        targets: &[RouterPoint],
    ) -> Vec<Vec<Option<f32>>> {
        sources
            .par_iter()
            .map(|from| {
                let (_, found) = self.search(from, targets);
                found.iter().map(|f| f.map(|f| f.weight)).collect()
            })
            .collect()
    }

    /// Weight of the shortest path, `None` when unreachable.
    pub fn weight(&self, from: &RouterPoint, to: &RouterPoint) -> Option<f32> {
        let (_, found) = self.search(from, std::slice::from_ref(to));
        found[0].map(|f| f.weight)
    }

    /// True when a search from `point` reaches at least `max_weight`, that
    /// is, the point is not stuck on a small island of the network.
    pub fn check_connectivity(&self, point: &RouterPoint, max_weight: f32) -> bool {
        let mut tree = SearchTree::new(self.source, self.profile);
        tree.seed(point);
        while let Some(idx) = tree.step() {
            if tree.labels[idx as usize].weight >= max_weight {
                return true;
            }
        }
        false
    }

    fn search(
        &self,
        from: &RouterPoint,
        targets: &[RouterPoint],
    ) -> (SearchTree<'a, P>, Vec<Option<Found>>) {
        let mut tree = SearchTree::new(self.source, self.profile);
        let mut best: Vec<Option<Found>> = vec![None; targets.len()];

        // (target index, weight still to add once the vertex is settled, the
        // far end of the target's edge when the last step enters one)
        let mut arrivals: FxHashMap<u32, Vec<(usize, f32, Option<u32>)>> = FxHashMap::default();
        for (t, target) in targets.iter().enumerate() {
            match *target {
                RouterPoint::Vertex(v) => arrivals.entry(v).or_default().push((t, 0.0, None)),
                RouterPoint::Edge {
                    from: tf,
                    to: tt,
                    offset,
                    ..
                } => {
                    let Some(edge) = self.source.edge(tf, tt) else {
                        continue;
                    };
                    if let Some(w) = tree.weight_of(&edge) {
                        arrivals.entry(tf).or_default().push((t, offset * w, Some(tt)));
                    }
                    if let Some(w) = tree.weight_of(&edge.reverse()) {
                        arrivals.entry(tt).or_default().push((t, (1.0 - offset) * w, Some(tf)));
                    }
                    best[t] = self.direct(from, tf, tt, offset, &tree);
                }
            }
        }

        tree.seed(from);
        let mut settled = 0usize;
        while let Some(idx) = tree.step() {
            settled += 1;
            let label = tree.labels[idx as usize];
            if let Some(list) = arrivals.get(&label.vertex) {
                for &(t, extra, beyond) in list {
                    if beyond.is_some_and(|next| !tree.may_continue(idx, next)) {
                        continue;
                    }
                    let weight = label.weight + extra;
                    if best[t].map_or(true, |b| weight < b.weight) {
                        best[t] = Some(Found {
                            weight,
                            reached: Reached::Label(idx),
                        });
                    }
                }
            }

            let Some(next) = tree.peek_weight() else {
                break;
            };
            if best.iter().all(|b| b.is_some_and(|b| b.weight <= next)) {
                break;
            }
        }

        debug!(
            settled,
            targets = targets.len(),
            found = best.iter().filter(|b| b.is_some()).count(),
            "dykstra search finished"
        );
        (tree, best)
    }

    /// Candidate along the shared edge when source and target sit on the
    /// same edge `tf -> tt`.
    fn direct(
        &self,
        from: &RouterPoint,
        tf: u32,
        tt: u32,
        target_offset: f32,
        tree: &SearchTree<'a, P>,
    ) -> Option<Found> {
        let source_offset = from.offset_on(tf, tt)?;
        let edge = self.source.edge(tf, tt)?;
        let weight = if target_offset >= source_offset {
            tree.weight_of(&edge)? * (target_offset - source_offset)
        } else {
            tree.weight_of(&edge.reverse())? * (source_offset - target_offset)
        };
        Some(Found {
            weight,
            reached: Reached::Direct,
        })
    }

    fn build_path(
        tree: &SearchTree<'a, P>,
        from: &RouterPoint,
        to: &RouterPoint,
        found: Found,
    ) -> Path {
        let mut segments = Vec::new();
        if let RouterPoint::Edge { coordinate, .. } = *from {
            segments.push(PathSegment::Resolved(coordinate));
        }
        if let Reached::Label(idx) = found.reached {
            segments.extend(tree.vertices_to(idx).into_iter().map(PathSegment::Vertex));
        }
        if let RouterPoint::Edge { coordinate, .. } = *to {
            segments.push(PathSegment::Resolved(coordinate));
        }
        Path {
            segments,
            weight: found.weight,
        }
    }
}
