// Contraction Hierarchies
//
// Preprocessing contracts vertices one by one in order of importance and adds
// shortcut arcs so that the remaining vertices keep their shortest-path
// distances. Queries then only ever search "up" the hierarchy from both ends.
//
// The hierarchy lives in the same dynamic graph store as the live network,
// with `CHEdgeData` as the payload: one record per vertex pair holding the
// best arc in each direction and, for shortcuts, the vertex they bypass.

pub mod preprocess;
pub mod router;

use serde::{Deserialize, Serialize};

use crate::edge::EdgeData;
use crate::geo::Coordinate;
use crate::graph::MemoryDynamicGraph;
use crate::tags::EMPTY_TAGS;

pub use preprocess::ChPreprocessor;
pub use router::ChRouter;

/// `*_contracted` value of an arc that is an original road segment
pub const NOT_CONTRACTED: u32 = 0;

#[derive(Debug, Clone, Copy)]
pub struct ChConfig {
    /// Vertices settled per witness search before giving up and adding the
    /// shortcut anyway
    pub witness_settle_limit: usize,
    /// Contracted vertices between progress log lines
    pub progress_interval: usize,
}

impl Default for ChConfig {
    fn default() -> Self {
        Self {
            witness_settle_limit: 500,
            progress_interval: 100_000,
        }
    }
}

/// Arc payload of a contracted graph.
///
/// `forward_*` describes the arc from the record's first vertex to its
/// second, `backward_*` the opposite arc. An infinite weight means there is
/// no arc in that direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CHEdgeData {
    pub forward_weight: f32,
    pub forward_contracted: u32,
    pub backward_weight: f32,
    pub backward_contracted: u32,
    pub tags: u32,
}

impl Default for CHEdgeData {
    fn default() -> Self {
        Self {
            forward_weight: f32::INFINITY,
            forward_contracted: NOT_CONTRACTED,
            backward_weight: f32::INFINITY,
            backward_contracted: NOT_CONTRACTED,
            tags: EMPTY_TAGS,
        }
    }
}

impl CHEdgeData {
    /// An original road segment, traversable in the directions that have a
    /// weight.
    pub fn original(forward: Option<f32>, backward: Option<f32>, tags: u32) -> Self {
        Self {
            forward_weight: forward.unwrap_or(f32::INFINITY),
            backward_weight: backward.unwrap_or(f32::INFINITY),
            tags,
            ..Self::default()
        }
    }

    /// A one-directional shortcut bypassing `via`.
    pub fn shortcut(weight: f32, via: u32) -> Self {
        Self {
            forward_weight: weight,
            forward_contracted: via,
            ..Self::default()
        }
    }

    pub fn forward(&self) -> Option<f32> {
        self.forward_weight.is_finite().then_some(self.forward_weight)
    }

    pub fn backward(&self) -> Option<f32> {
        self.backward_weight.is_finite().then_some(self.backward_weight)
    }

    /// Keep the cheaper arc in each direction.
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = *self;
        if other.forward_weight < merged.forward_weight {
            merged.forward_weight = other.forward_weight;
            merged.forward_contracted = other.forward_contracted;
        }
        if other.backward_weight < merged.backward_weight {
            merged.backward_weight = other.backward_weight;
            merged.backward_contracted = other.backward_contracted;
        }
        if merged.tags == EMPTY_TAGS {
            merged.tags = other.tags;
        }
        merged
    }
}

impl EdgeData for CHEdgeData {
    fn reverse(&self) -> Self {
        Self {
            forward_weight: self.backward_weight,
            forward_contracted: self.backward_contracted,
            backward_weight: self.forward_weight,
            backward_contracted: self.forward_contracted,
            tags: self.tags,
        }
    }

    fn equals_geometrically(&self, other: &Self) -> bool {
        self.represents_neighbour_relations()
            && other.represents_neighbour_relations()
            && self.tags == other.tags
    }

    fn represents_neighbour_relations(&self) -> bool {
        self.forward_contracted == NOT_CONTRACTED && self.backward_contracted == NOT_CONTRACTED
    }

    fn tags(&self) -> u32 {
        self.tags
    }
}

/// Contracted graph plus the contraction rank of every vertex.
#[derive(Debug, Clone)]
pub struct ChGraph {
    pub graph: MemoryDynamicGraph<CHEdgeData>,
    /// Indexed by vertex id; a higher rank was contracted later
    pub ranks: Vec<u32>,
}

impl ChGraph {
    pub fn vertex_count(&self) -> u32 {
        self.graph.vertex_count()
    }

    pub fn vertex(&self, vertex: u32) -> Option<Coordinate> {
        self.graph.vertex(vertex)
    }

    pub fn rank(&self, vertex: u32) -> u32 {
        self.ranks.get(vertex as usize).copied().unwrap_or(0)
    }

    /// Number of records holding at least one shortcut arc.
    pub fn shortcut_count(&self) -> usize {
        (1..=self.graph.vertex_count())
            .flat_map(|v| self.graph.edges(v).filter(move |(w, _)| *w > v))
            .filter(|(_, data)| !data.represents_neighbour_relations())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_swaps_directions() {
        let data = CHEdgeData {
            forward_weight: 3.0,
            forward_contracted: 7,
            backward_weight: f32::INFINITY,
            backward_contracted: NOT_CONTRACTED,
            tags: 2,
        };
        let reversed = data.reverse();
        assert_eq!(reversed.forward(), None);
        assert_eq!(reversed.backward(), Some(3.0));
        assert_eq!(reversed.backward_contracted, 7);
        assert_eq!(reversed.reverse(), data);
        assert!(!data.represents_neighbour_relations());
    }

    #[test]
    fn test_merge_keeps_cheapest_per_direction() {
        let road = CHEdgeData::original(Some(10.0), Some(10.0), 4);
        let merged = road.merge(&CHEdgeData::shortcut(6.0, 9));

        assert_eq!(merged.forward(), Some(6.0));
        assert_eq!(merged.forward_contracted, 9);
        assert_eq!(merged.backward(), Some(10.0));
        assert_eq!(merged.backward_contracted, NOT_CONTRACTED);
        assert_eq!(merged.tags, 4);

        let worse = merged.merge(&CHEdgeData::shortcut(8.0, 3));
        assert_eq!(worse, merged);
    }
}
