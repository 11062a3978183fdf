//! Snapping coordinates onto the graph

use rstar::{PointDistance, RTree, RTreeObject, AABB};

use super::RouterPoint;
use crate::edge::EdgeData;
use crate::geo::{haversine_distance, Coordinate};
use crate::graph::{DynamicGraphRouterDataSource, MemoryDynamicGraph};

#[derive(Debug, Clone, Copy)]
pub struct ResolverConfig {
    /// Points closer than this to a vertex resolve to the vertex itself
    pub snap_tolerance_m: f64,
    /// Points farther than this from any edge do not resolve
    pub max_distance_m: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            snap_tolerance_m: 1.0,
            max_distance_m: 1000.0,
        }
    }
}

/// One straight piece of an edge's geometry
#[derive(Clone, Copy, Debug, PartialEq)]
struct EdgeSegment {
    a: [f64; 2], // [lon, lat]
    b: [f64; 2],
    from: u32,
    to: u32,
    /// Meters from `from` to `a` and to `b` along the edge
    start_m: f64,
    end_m: f64,
    edge_m: f64,
}

impl EdgeSegment {
    /// Parameter in [0, 1] of the point on `a -> b` closest to `p`
    fn project(&self, p: &[f64; 2]) -> f64 {
        let dx = self.b[0] - self.a[0];
        let dy = self.b[1] - self.a[1];
        let len_2 = dx * dx + dy * dy;
        if len_2 == 0.0 {
            return 0.0;
        }
        (((p[0] - self.a[0]) * dx + (p[1] - self.a[1]) * dy) / len_2).clamp(0.0, 1.0)
    }

    fn point_at(&self, t: f64) -> [f64; 2] {
        [
            self.a[0] + (self.b[0] - self.a[0]) * t,
            self.a[1] + (self.b[1] - self.a[1]) * t,
        ]
    }
}

impl RTreeObject for EdgeSegment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.a, self.b)
    }
}

impl PointDistance for EdgeSegment {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let q = self.point_at(self.project(point));
        let dx = q[0] - point[0];
        let dy = q[1] - point[1];
        dx * dx + dy * dy
    }
}

/// Resolves coordinates to [`RouterPoint`]s on the nearest edge.
pub struct EdgeResolver {
    tree: RTree<EdgeSegment>,
    config: ResolverConfig,
}

impl EdgeResolver {
    /// Index every edge of `source`, including its shape points.
    pub fn build<E: EdgeData>(source: &DynamicGraphRouterDataSource<E>, config: ResolverConfig) -> Self {
        let mut segments = Vec::new();
        for from in 1..=source.vertex_count() {
            let Some(from_coord) = source.vertex(from) else {
                continue;
            };
            for (to, data) in source.edges(from) {
                if to < from || !data.represents_neighbour_relations() {
                    continue;
                }
                let Some(to_coord) = source.vertex(to) else {
                    continue;
                };

                let mut points = vec![from_coord];
                points.extend(source.edge_shape(from, to).unwrap_or_default());
                points.push(to_coord);

                let lengths: Vec<f64> = points
                    .windows(2)
                    .map(|w| w[0].distance_to(&w[1]))
                    .collect();
                let edge_m: f64 = lengths.iter().sum();

                let mut start_m = 0.0;
                for (pair, len) in points.windows(2).zip(&lengths) {
                    segments.push(EdgeSegment {
                        a: [pair[0].lon as f64, pair[0].lat as f64],
                        b: [pair[1].lon as f64, pair[1].lat as f64],
                        from,
                        to,
                        start_m,
                        end_m: start_m + len,
                        edge_m,
                    });
                    start_m += len;
                }
            }
        }

        Self {
            tree: RTree::bulk_load(segments),
            config,
        }
    }

    /// Resolve `coordinate` to the closest point of the network.
    ///
    /// Returns a vertex when the closest point is within the snap tolerance of
    /// an edge end, and `None` when nothing is within the maximum distance.
    pub fn resolve(&self, coordinate: Coordinate) -> Option<RouterPoint> {
        let query = [coordinate.lon as f64, coordinate.lat as f64];
        let segment = self.tree.nearest_neighbor(&query)?;

        let t = segment.project(&query);
        let projected = segment.point_at(t);
        let distance = haversine_distance(
            coordinate.lat as f64,
            coordinate.lon as f64,
            projected[1],
            projected[0],
        );
        if distance > self.config.max_distance_m {
            return None;
        }

        let along = segment.start_m + (segment.end_m - segment.start_m) * t;
        if along <= self.config.snap_tolerance_m {
            return Some(RouterPoint::Vertex(segment.from));
        }
        if segment.edge_m - along <= self.config.snap_tolerance_m {
            return Some(RouterPoint::Vertex(segment.to));
        }

        Some(RouterPoint::Edge {
            from: segment.from,
            to: segment.to,
            offset: (along / segment.edge_m) as f32,
            coordinate: Coordinate::new(projected[1] as f32, projected[0] as f32),
        })
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

/// Point with vertex id for R-tree
#[derive(Clone, Copy, Debug, PartialEq)]
struct IndexedVertex {
    coords: [f64; 2], // [lon, lat]
    vertex: u32,
}

impl RTreeObject for IndexedVertex {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.coords)
    }
}

impl PointDistance for IndexedVertex {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.coords[0] - point[0];
        let dy = self.coords[1] - point[1];
        dx * dx + dy * dy
    }

    fn contains_point(&self, point: &[f64; 2]) -> bool {
        self.coords == *point
    }
}

/// Nearest-vertex index, for graphs whose edges carry no geometry.
pub struct VertexIndex {
    tree: RTree<IndexedVertex>,
}

impl VertexIndex {
    /// Index every vertex that has at least one edge.
    pub fn build<E: EdgeData>(graph: &MemoryDynamicGraph<E>) -> Self {
        let points = (1..=graph.vertex_count())
            .filter(|&v| graph.edges(v).next().is_some())
            .filter_map(|v| {
                graph.vertex(v).map(|c| IndexedVertex {
                    coords: [c.lon as f64, c.lat as f64],
                    vertex: v,
                })
            })
            .collect();
        Self {
            tree: RTree::bulk_load(points),
        }
    }

    pub fn nearest(&self, coordinate: Coordinate) -> Option<u32> {
        self.tree
            .nearest_neighbor(&[coordinate.lon as f64, coordinate.lat as f64])
            .map(|p| p.vertex)
    }
}
