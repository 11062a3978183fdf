//! Shortest-path routing over a [`DynamicGraphRouterDataSource`]
//!
//! Routers accept [`RouterPoint`]s: either a vertex or a point resolved onto
//! the interior of an edge, which splits that edge into two partial edges
//! weighted by the point's offset.

pub mod dykstra;
pub mod profile;
pub mod resolver;

use serde::Serialize;

use crate::edge::EdgeData;
use crate::geo::Coordinate;
use crate::graph::DynamicGraphRouterDataSource;

pub use dykstra::DykstraRouter;
pub use profile::{RoutingProfile, ShortestDistance};
pub use resolver::{EdgeResolver, ResolverConfig, VertexIndex};

/// A routing source or target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RouterPoint {
    Vertex(u32),
    /// A point on the edge `from -> to`; `offset` is the fraction of the
    /// edge's length between `from` and the point.
    Edge {
        from: u32,
        to: u32,
        offset: f32,
        coordinate: Coordinate,
    },
}

impl RouterPoint {
    pub fn coordinate<E: EdgeData>(
        &self,
        source: &DynamicGraphRouterDataSource<E>,
    ) -> Option<Coordinate> {
        match *self {
            RouterPoint::Vertex(v) => source.vertex(v),
            RouterPoint::Edge { coordinate, .. } => Some(coordinate),
        }
    }

    /// Offset of this point along `from -> to`, if it lies on that edge in
    /// either orientation.
    pub(crate) fn offset_on(&self, edge_from: u32, edge_to: u32) -> Option<f32> {
        match *self {
            RouterPoint::Edge {
                from, to, offset, ..
            } => {
                if from == edge_from && to == edge_to {
                    Some(offset)
                } else if from == edge_to && to == edge_from {
                    Some(1.0 - offset)
                } else {
                    None
                }
            }
            RouterPoint::Vertex(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSegment {
    Vertex(u32),
    Resolved(Coordinate),
}

/// A route: the visited vertices, framed by resolved points where the route
/// starts or ends inside an edge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Path {
    pub segments: Vec<PathSegment>,
    pub weight: f32,
}

impl Path {
    pub fn vertices(&self) -> Vec<u32> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                PathSegment::Vertex(v) => Some(*v),
                PathSegment::Resolved(_) => None,
            })
            .collect()
    }

    /// Full geometry, including the shape points of every traversed edge.
    /// Partial edges at resolved ends are drawn straight.
    pub fn coordinates<E: EdgeData>(
        &self,
        source: &DynamicGraphRouterDataSource<E>,
    ) -> Vec<Coordinate> {
        let mut coords = Vec::with_capacity(self.segments.len());
        let mut prev_vertex = None;
        for segment in &self.segments {
            match *segment {
                PathSegment::Vertex(v) => {
                    if let Some(prev) = prev_vertex {
                        if let Some(shape) = source.edge_shape(prev, v) {
                            coords.extend(shape);
                        }
                    }
                    if let Some(c) = source.vertex(v) {
                        coords.push(c);
                    }
                    prev_vertex = Some(v);
                }
                PathSegment::Resolved(c) => {
                    coords.push(c);
                    prev_vertex = None;
                }
            }
        }
        coords
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::LiveEdge;

    #[test]
    fn test_offset_on_either_orientation() {
        let point = RouterPoint::Edge {
            from: 3,
            to: 7,
            offset: 0.25,
            coordinate: Coordinate::default(),
        };
        assert_eq!(point.offset_on(3, 7), Some(0.25));
        assert_eq!(point.offset_on(7, 3), Some(0.75));
        assert_eq!(point.offset_on(3, 8), None);
        assert_eq!(RouterPoint::Vertex(3).offset_on(3, 7), None);
    }

    #[test]
    fn test_path_coordinates_include_shapes() {
        let mut source: DynamicGraphRouterDataSource<LiveEdge> =
            DynamicGraphRouterDataSource::with_size_estimate(2).unwrap();
        let a = source.graph_mut().add_vertex(0.0, 0.0).unwrap();
        let b = source.graph_mut().add_vertex(0.0, 1.0).unwrap();
        let mid = Coordinate::new(0.1, 0.5);
        source
            .graph_mut()
            .add_edge(a, b, LiveEdge::new(true, 0, 1.0), Some(vec![mid]))
            .unwrap();

        let start = Coordinate::new(0.0, -0.1);
        let path = Path {
            segments: vec![
                PathSegment::Resolved(start),
                PathSegment::Vertex(b),
                PathSegment::Vertex(a),
            ],
            weight: 2.0,
        };
        assert_eq!(path.vertices(), vec![b, a]);
        assert_eq!(
            path.coordinates(&source),
            vec![start, Coordinate::new(0.0, 1.0), mid, Coordinate::new(0.0, 0.0)]
        );
    }
}
