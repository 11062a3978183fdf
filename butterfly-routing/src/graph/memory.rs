//! In-memory dynamic graph over flat arrays
//!
//! Layout:
//! - `coordinates[v]`, `vertices[v]`: coordinate and adjacency head of vertex `v`
//!   (ids are 1-based, slot 0 is never used)
//! - `edges[e..e + 4]`: `[node_a, node_b, next_a, next_b]` for the record at slot `e`
//! - `edge_data[e / 4]`, `edge_shapes[e / 4]`: payload and shape of that record
//!
//! Each record sits in two singly linked lists at once: `next_a` continues the
//! list of `node_a`, `next_b` the list of `node_b`. `NO_EDGE` ends a list and
//! marks free words.

use butterfly_common::{Error, Result};
use tracing::{debug, info};

use crate::collections::HugeArray;
use crate::edge::{EdgeComparer, EdgeData};
use crate::geo::Coordinate;

/// Sentinel for "no edge" and for unused edge words.
pub const NO_EDGE: u32 = u32::MAX;

/// Words per edge record.
pub const EDGE_SIZE: usize = 4;

const NODE_A: usize = 0;
const NODE_B: usize = 1;
const NEXT_A: usize = 2;
const NEXT_B: usize = 3;

/// Vertex slots added whenever the vertex table is full.
const VERTEX_GROWTH: usize = 10_000;
/// Edge words added whenever the edge table is full.
const EDGE_GROWTH: usize = 10_000;

/// Default vertex estimate when none is given.
const DEFAULT_SIZE_ESTIMATE: usize = 1_000;

/// Growable graph with add/remove/compress support.
#[derive(Debug, Clone)]
pub struct MemoryDynamicGraph<E> {
    next_vertex: u32,
    next_edge: u32,
    coordinates: HugeArray<Coordinate>,
    vertices: HugeArray<u32>,
    edges: HugeArray<u32>,
    edge_data: HugeArray<E>,
    edge_shapes: HugeArray<Vec<Coordinate>>,
}

impl<E: EdgeData> MemoryDynamicGraph<E> {
    pub fn new() -> Result<Self> {
        Self::with_size_estimate(DEFAULT_SIZE_ESTIMATE)
    }

    /// Create a graph sized for roughly `vertices` vertices and three edges
    /// per vertex.
    pub fn with_size_estimate(vertices: usize) -> Result<Self> {
        let mut graph = Self {
            next_vertex: 1,
            next_edge: 0,
            coordinates: HugeArray::new(0)?,
            vertices: HugeArray::new(0)?,
            edges: HugeArray::new(0)?,
            edge_data: HugeArray::new(0)?,
            edge_shapes: HugeArray::new(0)?,
        };
        graph.set_vertex_capacity(vertices.max(1))?;
        graph.set_edge_capacity(vertices * 3 * EDGE_SIZE)?;
        Ok(graph)
    }

    /// Number of vertices, ids `1..=vertex_count()`.
    pub fn vertex_count(&self) -> u32 {
        self.next_vertex - 1
    }

    /// Number of live edge records. Walks the edge table.
    pub fn edge_count(&self) -> usize {
        (0..self.next_edge as usize)
            .step_by(EDGE_SIZE)
            .filter(|&slot| self.edges[slot + NODE_A] != NO_EDGE)
            .count()
    }

    pub fn add_vertex(&mut self, lat: f32, lon: f32) -> Result<u32> {
        if self.next_vertex as usize >= self.vertices.len() {
            self.set_vertex_capacity(self.vertices.len() + VERTEX_GROWTH)?;
        }
        let id = self.next_vertex;
        self.coordinates[id as usize] = Coordinate::new(lat, lon);
        self.next_vertex += 1;
        Ok(id)
    }

    pub fn set_vertex(&mut self, vertex: u32, lat: f32, lon: f32) -> Result<()> {
        self.check_vertex(vertex)?;
        self.coordinates[vertex as usize] = Coordinate::new(lat, lon);
        Ok(())
    }

    pub fn vertex(&self, vertex: u32) -> Option<Coordinate> {
        if vertex == 0 || vertex >= self.next_vertex {
            return None;
        }
        Some(self.coordinates[vertex as usize])
    }

    /// Add an edge, replacing the data of an existing edge between the same
    /// vertices.
    pub fn add_edge(
        &mut self,
        vertex1: u32,
        vertex2: u32,
        data: E,
        shape: Option<Vec<Coordinate>>,
    ) -> Result<()> {
        self.insert_edge(vertex1, vertex2, data, shape, None::<&dyn EdgeComparer<E>>)
    }

    /// Add an edge; if one already exists, `comparer` decides whether the new
    /// data replaces it or is dropped.
    pub fn add_edge_with_comparer<C>(
        &mut self,
        vertex1: u32,
        vertex2: u32,
        data: E,
        shape: Option<Vec<Coordinate>>,
        comparer: &C,
    ) -> Result<()>
    where
        C: EdgeComparer<E> + ?Sized,
    {
        self.insert_edge(vertex1, vertex2, data, shape, Some(comparer))
    }

    fn insert_edge<C>(
        &mut self,
        vertex1: u32,
        vertex2: u32,
        data: E,
        shape: Option<Vec<Coordinate>>,
        comparer: Option<&C>,
    ) -> Result<()>
    where
        C: EdgeComparer<E> + ?Sized,
    {
        if vertex1 == vertex2 {
            return Err(Error::SelfLoop(vertex1));
        }
        self.check_vertex(vertex1)?;
        self.check_vertex(vertex2)?;

        let mut shape = shape.unwrap_or_default();

        if let Some((_, slot)) = self.find_in_list(vertex1, vertex2) {
            let slot = slot as usize;
            // store relative to the record's own node_a
            let data = if self.edges[slot + NODE_A] == vertex1 {
                data
            } else {
                shape.reverse();
                data.reverse()
            };
            let replace = comparer
                .map(|c| c.overlaps(&data, &self.edge_data[slot / EDGE_SIZE]))
                .unwrap_or(true);
            if replace {
                self.edge_data[slot / EDGE_SIZE] = data;
                self.edge_shapes[slot / EDGE_SIZE] = shape;
            }
            return Ok(());
        }

        if self.next_edge as usize + EDGE_SIZE > self.edges.len() {
            self.set_edge_capacity(self.edges.len() + EDGE_GROWTH)?;
        }

        let slot = self.next_edge;
        let s = slot as usize;
        self.edges[s + NODE_A] = vertex1;
        self.edges[s + NODE_B] = vertex2;
        self.edges[s + NEXT_A] = self.vertices[vertex1 as usize];
        self.edges[s + NEXT_B] = self.vertices[vertex2 as usize];
        self.vertices[vertex1 as usize] = slot;
        self.vertices[vertex2 as usize] = slot;
        self.edge_data[s / EDGE_SIZE] = data;
        self.edge_shapes[s / EDGE_SIZE] = shape;
        self.next_edge += EDGE_SIZE as u32;
        Ok(())
    }

    /// Remove the edge between `vertex1` and `vertex2`, if there is one.
    pub fn remove_edge(&mut self, vertex1: u32, vertex2: u32) -> Result<()> {
        self.check_vertex(vertex1)?;
        self.check_vertex(vertex2)?;

        let Some((prev1, slot)) = self.find_in_list(vertex1, vertex2) else {
            return Ok(());
        };
        let Some((prev2, _)) = self.find_in_list(vertex2, vertex1) else {
            return Err(Error::InconsistentAdjacency { vertex1, vertex2 });
        };

        self.unlink(vertex1, prev1, slot);
        self.unlink(vertex2, prev2, slot);

        let s = slot as usize;
        for word in [NODE_A, NODE_B, NEXT_A, NEXT_B] {
            self.edges[s + word] = NO_EDGE;
        }
        self.edge_data[s / EDGE_SIZE] = E::default();
        self.edge_shapes[s / EDGE_SIZE] = Vec::new();
        Ok(())
    }

    /// Remove every edge touching `vertex`.
    pub fn remove_edges(&mut self, vertex: u32) -> Result<()> {
        self.check_vertex(vertex)?;
        let neighbours: Vec<u32> = self.edges(vertex).map(|(n, _)| n).collect();
        for neighbour in neighbours {
            self.remove_edge(vertex, neighbour)?;
        }
        Ok(())
    }

    /// Edges of `vertex` in list order (most recently added first), with data
    /// as seen from `vertex`. Empty for unknown vertices.
    pub fn edges(&self, vertex: u32) -> Edges<'_, E> {
        let slot = if vertex == 0 || vertex >= self.next_vertex {
            NO_EDGE
        } else {
            self.vertices[vertex as usize]
        };
        Edges {
            graph: self,
            vertex,
            slot,
        }
    }

    pub fn contains_edge(&self, vertex1: u32, vertex2: u32) -> bool {
        self.in_range(vertex1) && self.find_in_list(vertex1, vertex2).is_some()
    }

    /// Data of the edge `vertex1 -> vertex2` as seen from `vertex1`.
    pub fn edge(&self, vertex1: u32, vertex2: u32) -> Option<E> {
        if !self.in_range(vertex1) {
            return None;
        }
        let (_, slot) = self.find_in_list(vertex1, vertex2)?;
        let s = slot as usize;
        let data = &self.edge_data[s / EDGE_SIZE];
        if self.edges[s + NODE_A] == vertex1 {
            Some(data.clone())
        } else {
            Some(data.reverse())
        }
    }

    /// Intermediate points of the edge ordered from `vertex1`. `None` when
    /// there is no such edge or it carries no shape.
    pub fn edge_shape(&self, vertex1: u32, vertex2: u32) -> Option<Vec<Coordinate>> {
        if !self.in_range(vertex1) {
            return None;
        }
        let (_, slot) = self.find_in_list(vertex1, vertex2)?;
        let s = slot as usize;
        let shape = &self.edge_shapes[s / EDGE_SIZE];
        if shape.is_empty() {
            return None;
        }
        let mut shape = shape.clone();
        if self.edges[s + NODE_A] != vertex1 {
            shape.reverse();
        }
        Some(shape)
    }

    /// Shrink every table to what is in use.
    pub fn trim(&mut self) -> Result<()> {
        self.set_vertex_capacity(self.next_vertex as usize)?;
        self.set_edge_capacity(self.next_edge as usize)?;
        debug!(
            vertices = self.vertex_count(),
            edge_words = self.next_edge,
            "trimmed graph"
        );
        Ok(())
    }

    /// Size the tables for `vertex_estimate` vertices and `edge_estimate`
    /// edges ahead of a bulk load. Never drops data in use.
    pub fn resize(&mut self, vertex_estimate: usize, edge_estimate: usize) -> Result<()> {
        self.set_vertex_capacity(vertex_estimate.max(self.next_vertex as usize))?;
        self.set_edge_capacity((edge_estimate * EDGE_SIZE).max(self.next_edge as usize))
    }

    /// Move live edge records down over the holes left by removals, then drop
    /// the trailing vertices that have no edges.
    ///
    /// The neighbour sets and data seen through [`Self::edges`] are unchanged.
    /// Vertex ids above the last vertex with an edge stop being valid.
    pub fn compress(&mut self) -> Result<()> {
        let mut target = 0usize;
        let mut moved = 0usize;
        for slot in (0..self.next_edge as usize).step_by(EDGE_SIZE) {
            if self.edges[slot + NODE_A] != NO_EDGE {
                if slot != target {
                    self.move_edge(slot, target);
                    moved += 1;
                }
                target += EDGE_SIZE;
            }
        }
        self.next_edge = target as u32;

        let mut highest = 0;
        for vertex in 1..self.next_vertex {
            if self.vertices[vertex as usize] != NO_EDGE {
                highest = vertex;
            }
        }
        self.next_vertex = highest + 1;

        info!(
            moved_edges = moved,
            edges = target / EDGE_SIZE,
            vertices = self.vertex_count(),
            "compressed graph"
        );
        Ok(())
    }

    fn move_edge(&mut self, from: usize, to: usize) {
        let node_a = self.edges[from + NODE_A];
        let node_b = self.edges[from + NODE_B];
        self.relink(node_a, from as u32, to as u32);
        self.relink(node_b, from as u32, to as u32);

        for word in [NODE_A, NODE_B, NEXT_A, NEXT_B] {
            self.edges[to + word] = self.edges[from + word];
            self.edges[from + word] = NO_EDGE;
        }
        let data = self.edge_data.take(from / EDGE_SIZE);
        self.edge_data[to / EDGE_SIZE] = data;
        let shape = self.edge_shapes.take(from / EDGE_SIZE);
        self.edge_shapes[to / EDGE_SIZE] = shape;
    }

    /// Redirect the link in `vertex`'s list that points at `old` to `new`.
    fn relink(&mut self, vertex: u32, old: u32, new: u32) {
        if self.vertices[vertex as usize] == old {
            self.vertices[vertex as usize] = new;
            return;
        }
        let mut slot = self.vertices[vertex as usize];
        while slot != NO_EDGE {
            let next_idx = self.next_index(slot as usize, vertex);
            if self.edges[next_idx] == old {
                self.edges[next_idx] = new;
                return;
            }
            slot = self.edges[next_idx];
        }
    }

    /// Walk `vertex`'s list for the record joining it to `other`.
    /// Returns `(previous slot or NO_EDGE, slot)`.
    fn find_in_list(&self, vertex: u32, other: u32) -> Option<(u32, u32)> {
        let mut prev = NO_EDGE;
        let mut slot = self.vertices[vertex as usize];
        while slot != NO_EDGE {
            let s = slot as usize;
            let a = self.edges[s + NODE_A];
            let b = self.edges[s + NODE_B];
            if (a == vertex && b == other) || (a == other && b == vertex) {
                return Some((prev, slot));
            }
            prev = slot;
            slot = self.edges[self.next_index(s, vertex)];
        }
        None
    }

    fn unlink(&mut self, vertex: u32, prev: u32, slot: u32) {
        let next = self.edges[self.next_index(slot as usize, vertex)];
        if prev == NO_EDGE {
            self.vertices[vertex as usize] = next;
        } else {
            let idx = self.next_index(prev as usize, vertex);
            self.edges[idx] = next;
        }
    }

    #[inline]
    fn next_index(&self, slot: usize, vertex: u32) -> usize {
        if self.edges[slot + NODE_A] == vertex {
            slot + NEXT_A
        } else {
            slot + NEXT_B
        }
    }

    #[inline]
    fn in_range(&self, vertex: u32) -> bool {
        vertex != 0 && vertex < self.next_vertex
    }

    fn check_vertex(&self, vertex: u32) -> Result<()> {
        if self.in_range(vertex) {
            Ok(())
        } else {
            Err(Error::VertexOutOfRange {
                vertex,
                next: self.next_vertex,
            })
        }
    }

    fn set_vertex_capacity(&mut self, size: usize) -> Result<()> {
        let old = self.vertices.len();
        self.coordinates.resize(size)?;
        self.vertices.resize(size)?;
        for idx in old..size {
            self.vertices[idx] = NO_EDGE;
        }
        Ok(())
    }

    fn set_edge_capacity(&mut self, size: usize) -> Result<()> {
        let old = self.edges.len();
        self.edges.resize(size)?;
        for idx in old..size {
            self.edges[idx] = NO_EDGE;
        }
        self.edge_data.resize(size / EDGE_SIZE)?;
        self.edge_shapes.resize(size / EDGE_SIZE)
    }
}

/// Iterator over the edges of one vertex, see [`MemoryDynamicGraph::edges`].
pub struct Edges<'a, E> {
    graph: &'a MemoryDynamicGraph<E>,
    vertex: u32,
    slot: u32,
}

impl<E: EdgeData> Iterator for Edges<'_, E> {
    type Item = (u32, E);

    fn next(&mut self) -> Option<Self::Item> {
        if self.slot == NO_EDGE {
            return None;
        }
        let g = self.graph;
        let s = self.slot as usize;
        let data = &g.edge_data[s / EDGE_SIZE];
        if g.edges[s + NODE_A] == self.vertex {
            self.slot = g.edges[s + NEXT_A];
            Some((g.edges[s + NODE_B], data.clone()))
        } else {
            self.slot = g.edges[s + NEXT_B];
            Some((g.edges[s + NODE_A], data.reverse()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::LiveEdge;

    fn graph_with(n: usize) -> MemoryDynamicGraph<LiveEdge> {
        let mut graph = MemoryDynamicGraph::with_size_estimate(2).unwrap();
        for i in 0..n {
            graph.add_vertex(i as f32, i as f32).unwrap();
        }
        graph
    }

    #[test]
    fn test_add_vertex_grows() {
        let mut graph: MemoryDynamicGraph<LiveEdge> =
            MemoryDynamicGraph::with_size_estimate(1).unwrap();
        for i in 0..25 {
            let id = graph.add_vertex(i as f32, 0.0).unwrap();
            assert_eq!(id, i + 1);
        }
        assert_eq!(graph.vertex_count(), 25);
        assert_eq!(graph.vertex(25), Some(Coordinate::new(24.0, 0.0)));
        assert_eq!(graph.vertex(26), None);
        assert_eq!(graph.vertex(0), None);
    }

    #[test]
    fn test_set_vertex_out_of_range() {
        let mut graph = graph_with(2);
        graph.set_vertex(2, 5.0, 6.0).unwrap();
        assert_eq!(graph.vertex(2), Some(Coordinate::new(5.0, 6.0)));
        assert!(matches!(
            graph.set_vertex(3, 0.0, 0.0),
            Err(Error::VertexOutOfRange { vertex: 3, next: 3 })
        ));
    }

    #[test]
    fn test_add_edge_rejects_unknown_vertex() {
        let mut graph = graph_with(2);
        let err = graph.add_edge(1, 9, LiveEdge::default(), None);
        assert!(matches!(err, Err(Error::VertexOutOfRange { vertex: 9, .. })));
        assert!(graph.add_edge(0, 1, LiveEdge::default(), None).is_err());
    }

    #[test]
    fn test_edges_most_recent_first() {
        let mut graph = graph_with(4);
        graph.add_edge(1, 2, LiveEdge::new(true, 1, 1.0), None).unwrap();
        graph.add_edge(1, 3, LiveEdge::new(true, 2, 1.0), None).unwrap();
        graph.add_edge(4, 1, LiveEdge::new(true, 3, 1.0), None).unwrap();

        let neighbours: Vec<u32> = graph.edges(1).map(|(n, _)| n).collect();
        assert_eq!(neighbours, vec![4, 3, 2]);
    }

    #[test]
    fn test_edge_growth_beyond_initial_capacity() {
        let mut graph = graph_with(3000);
        for v in 1..3000 {
            graph
                .add_edge(v, v + 1, LiveEdge::new(true, v, 1.0), None)
                .unwrap();
        }
        assert_eq!(graph.edge_count(), 2999);
        assert_eq!(graph.edge(2000, 1999).map(|e| e.tags()), Some(1999));
    }

    #[test]
    fn test_shape_is_oriented() {
        let mut graph = graph_with(2);
        let shape = vec![Coordinate::new(0.1, 0.1), Coordinate::new(0.2, 0.2)];
        graph
            .add_edge(1, 2, LiveEdge::new(true, 0, 1.0), Some(shape.clone()))
            .unwrap();

        assert_eq!(graph.edge_shape(1, 2), Some(shape.clone()));
        let mut reversed = shape;
        reversed.reverse();
        assert_eq!(graph.edge_shape(2, 1), Some(reversed));
        assert_eq!(graph.edge_shape(1, 1), None);
    }

    #[test]
    fn test_overwrite_from_other_side_is_reoriented() {
        let mut graph = graph_with(2);
        graph.add_edge(1, 2, LiveEdge::new(true, 1, 1.0), None).unwrap();
        graph.add_edge(2, 1, LiveEdge::new(true, 7, 1.0), None).unwrap();

        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.edge(2, 1), Some(LiveEdge::new(true, 7, 1.0)));
        assert_eq!(graph.edge(1, 2), Some(LiveEdge::new(false, 7, 1.0)));
    }

    #[test]
    fn test_remove_edge_middle_of_list() {
        let mut graph = graph_with(4);
        graph.add_edge(1, 2, LiveEdge::default(), None).unwrap();
        graph.add_edge(1, 3, LiveEdge::default(), None).unwrap();
        graph.add_edge(1, 4, LiveEdge::default(), None).unwrap();

        graph.remove_edge(3, 1).unwrap();
        let neighbours: Vec<u32> = graph.edges(1).map(|(n, _)| n).collect();
        assert_eq!(neighbours, vec![4, 2]);
        assert_eq!(graph.edges(3).count(), 0);

        // removing a missing edge is a no-op
        graph.remove_edge(3, 1).unwrap();
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_remove_edge_detects_corruption() {
        let mut graph = graph_with(3);
        graph.add_edge(1, 2, LiveEdge::default(), None).unwrap();
        graph.add_edge(2, 3, LiveEdge::default(), None).unwrap();

        // cut vertex 2's list after the (2,3) record
        let head = graph.vertices[2] as usize;
        let next_idx = graph.next_index(head, 2);
        graph.edges[next_idx] = NO_EDGE;

        assert!(matches!(
            graph.remove_edge(1, 2),
            Err(Error::InconsistentAdjacency {
                vertex1: 1,
                vertex2: 2
            })
        ));
    }

    #[test]
    fn test_remove_edges_of_vertex() {
        let mut graph = graph_with(4);
        graph.add_edge(1, 2, LiveEdge::default(), None).unwrap();
        graph.add_edge(1, 3, LiveEdge::default(), None).unwrap();
        graph.add_edge(3, 4, LiveEdge::default(), None).unwrap();

        graph.remove_edges(1).unwrap();
        assert_eq!(graph.edges(1).count(), 0);
        assert_eq!(graph.edges(2).count(), 0);
        assert!(graph.contains_edge(3, 4));
    }

    #[test]
    fn test_compress_moves_records_and_shrinks_vertices() {
        let mut graph = graph_with(5);
        graph.add_edge(1, 2, LiveEdge::new(true, 1, 1.0), None).unwrap();
        graph.add_edge(2, 3, LiveEdge::new(true, 2, 1.0), None).unwrap();
        graph.add_edge(3, 4, LiveEdge::new(false, 3, 1.0), None).unwrap();
        graph.add_edge(4, 5, LiveEdge::new(true, 4, 1.0), None).unwrap();

        graph.remove_edge(1, 2).unwrap();
        graph.remove_edge(4, 5).unwrap();
        graph.compress().unwrap();

        assert_eq!(graph.next_edge as usize, 2 * EDGE_SIZE);
        assert_eq!(graph.vertex_count(), 4);
        assert_eq!(graph.edge(3, 2), Some(LiveEdge::new(false, 2, 1.0)));
        assert_eq!(graph.edge(4, 3), Some(LiveEdge::new(true, 3, 1.0)));
        assert!(!graph.contains_edge(4, 5));

        graph.trim().unwrap();
        let v = graph.add_vertex(9.0, 9.0).unwrap();
        assert_eq!(v, 5);
        assert_eq!(graph.edges(5).count(), 0);
        graph.add_edge(5, 1, LiveEdge::default(), None).unwrap();
        assert!(graph.contains_edge(1, 5));
    }

    #[test]
    fn test_compress_without_edges_drops_all_vertices() {
        let mut graph = graph_with(3);
        graph.compress().unwrap();
        assert_eq!(graph.vertex_count(), 0);
    }

    #[test]
    fn test_trim_and_resize_keep_data() {
        let mut graph = graph_with(3);
        graph.add_edge(1, 3, LiveEdge::new(true, 5, 2.0), None).unwrap();
        graph.trim().unwrap();
        assert_eq!(graph.vertices.len(), 4);
        assert_eq!(graph.edges.len(), EDGE_SIZE);

        graph.resize(100, 50).unwrap();
        assert_eq!(graph.vertices.len(), 100);
        assert_eq!(graph.edges.len(), 200);
        assert_eq!(graph.vertex_count(), 3);
        assert_eq!(graph.edge(3, 1), Some(LiveEdge::new(false, 5, 2.0)));

        // never below what is used
        graph.resize(0, 0).unwrap();
        assert_eq!(graph.vertices.len(), 4);
        assert_eq!(graph.edge(1, 3), Some(LiveEdge::new(true, 5, 2.0)));
    }
}
