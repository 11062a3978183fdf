//! Dynamic road graph storage and shortest-path routing
//!
//! - [`graph::MemoryDynamicGraph`]: mutable adjacency store with per-edge
//!   payloads and shapes
//! - [`graph::DynamicGraphRouterDataSource`]: the store plus tags and turn
//!   restrictions, as routers see it
//! - [`routing`]: Dijkstra routing, profiles and coordinate resolving
//! - [`ch`]: contraction hierarchies over the same store
//! - [`osm`]: building a graph from OSM elements

pub mod ch;
pub mod collections;
pub mod edge;
pub mod geo;
pub mod graph;
pub mod osm;
pub mod routing;
pub mod tags;
pub mod vehicle;

pub use edge::{EdgeComparer, EdgeData, GeometricComparer, LiveEdge};
pub use geo::Coordinate;
pub use graph::{DynamicGraphRouterDataSource, MemoryDynamicGraph};
pub use routing::{Path, PathSegment, RouterPoint};
pub use tags::{TagsCollection, TagsIndex};
pub use vehicle::Vehicle;
