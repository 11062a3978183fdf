//! Graph plus everything a router needs next to it: tags and restrictions

use butterfly_common::{Error, Result};
use rustc_hash::FxHashMap;

use super::memory::{Edges, MemoryDynamicGraph};
use crate::edge::EdgeData;
use crate::geo::Coordinate;
use crate::tags::{TagsCollection, TagsIndex};
use crate::vehicle::Vehicle;

/// Forbidden vertex sequences, indexed by their first vertex.
#[derive(Debug, Clone, Default)]
struct Restrictions {
    by_first: FxHashMap<u32, Vec<Box<[u32]>>>,
    max_len: usize,
    count: usize,
}

impl Restrictions {
    fn add(&mut self, sequence: &[u32]) {
        let entry = self.by_first.entry(sequence[0]).or_default();
        if entry.iter().any(|r| r.as_ref() == sequence) {
            return;
        }
        entry.push(sequence.into());
        self.max_len = self.max_len.max(sequence.len());
        self.count += 1;
    }

    fn contains(&self, sequence: &[u32]) -> bool {
        let Some(first) = sequence.first() else {
            return false;
        };
        self.by_first
            .get(first)
            .is_some_and(|list| list.iter().any(|r| r.as_ref() == sequence))
    }
}

/// Read/write facade routers are built against.
///
/// Owns the graph store, the tag index its edges point into, and the turn
/// restrictions, both for all vehicles and per vehicle.
#[derive(Debug, Clone)]
pub struct DynamicGraphRouterDataSource<E> {
    graph: MemoryDynamicGraph<E>,
    tags: TagsIndex,
    restrictions: Restrictions,
    vehicle_restrictions: FxHashMap<Vehicle, Restrictions>,
}

impl<E: EdgeData> DynamicGraphRouterDataSource<E> {
    pub fn new(graph: MemoryDynamicGraph<E>, tags: TagsIndex) -> Self {
        Self {
            graph,
            tags,
            restrictions: Restrictions::default(),
            vehicle_restrictions: FxHashMap::default(),
        }
    }

    pub fn with_size_estimate(vertices: usize) -> Result<Self> {
        Ok(Self::new(
            MemoryDynamicGraph::with_size_estimate(vertices)?,
            TagsIndex::new(),
        ))
    }

    pub fn graph(&self) -> &MemoryDynamicGraph<E> {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut MemoryDynamicGraph<E> {
        &mut self.graph
    }

    pub fn tags(&self) -> &TagsIndex {
        &self.tags
    }

    pub fn tags_mut(&mut self) -> &mut TagsIndex {
        &mut self.tags
    }

    /// Tag set of an edge payload; empty when the id is unknown.
    pub fn edge_tags(&self, data: &E) -> &TagsCollection {
        static EMPTY: std::sync::OnceLock<TagsCollection> = std::sync::OnceLock::new();
        self.tags
            .get(data.tags())
            .unwrap_or_else(|| EMPTY.get_or_init(TagsCollection::new))
    }

    pub fn vertex_count(&self) -> u32 {
        self.graph.vertex_count()
    }

    pub fn vertex(&self, vertex: u32) -> Option<Coordinate> {
        self.graph.vertex(vertex)
    }

    pub fn edges(&self, vertex: u32) -> Edges<'_, E> {
        self.graph.edges(vertex)
    }

    pub fn edge(&self, vertex1: u32, vertex2: u32) -> Option<E> {
        self.graph.edge(vertex1, vertex2)
    }

    pub fn edge_shape(&self, vertex1: u32, vertex2: u32) -> Option<Vec<Coordinate>> {
        self.graph.edge_shape(vertex1, vertex2)
    }

    pub fn contains_edge(&self, vertex1: u32, vertex2: u32) -> bool {
        self.graph.contains_edge(vertex1, vertex2)
    }

    /// Forbid `vertices` for every vehicle.
    ///
    /// A single vertex forbids passing through it; longer sequences forbid
    /// that exact succession of vertices.
    pub fn add_restriction(&mut self, vertices: &[u32]) -> Result<()> {
        self.check_restriction(vertices)?;
        self.restrictions.add(vertices);
        Ok(())
    }

    /// Forbid `vertices` for `vehicle` only.
    pub fn add_vehicle_restriction(&mut self, vehicle: Vehicle, vertices: &[u32]) -> Result<()> {
        self.check_restriction(vertices)?;
        self.vehicle_restrictions
            .entry(vehicle)
            .or_default()
            .add(vertices);
        Ok(())
    }

    /// True if `sequence` is forbidden for all vehicles or for `vehicle`.
    pub fn is_restricted(&self, vehicle: Option<Vehicle>, sequence: &[u32]) -> bool {
        self.restrictions.contains(sequence)
            || vehicle
                .and_then(|v| self.vehicle_restrictions.get(&v))
                .is_some_and(|r| r.contains(sequence))
    }

    /// Length of the longest restriction that applies to `vehicle` (0 if none).
    pub fn max_restriction_len(&self, vehicle: Option<Vehicle>) -> usize {
        let scoped = vehicle
            .and_then(|v| self.vehicle_restrictions.get(&v))
            .map_or(0, |r| r.max_len);
        self.restrictions.max_len.max(scoped)
    }

    /// Number of restrictions applying to `vehicle`, counting the global ones.
    pub fn restriction_count(&self, vehicle: Option<Vehicle>) -> usize {
        let scoped = vehicle
            .and_then(|v| self.vehicle_restrictions.get(&v))
            .map_or(0, |r| r.count);
        self.restrictions.count + scoped
    }

    fn check_restriction(&self, vertices: &[u32]) -> Result<()> {
        if vertices.is_empty() {
            return Err(Error::InvalidInput("empty restriction".into()));
        }
        for &vertex in vertices {
            if self.graph.vertex(vertex).is_none() {
                return Err(Error::VertexOutOfRange {
                    vertex,
                    next: self.graph.vertex_count() + 1,
                });
            }
        }
        Ok(())
    }
}
