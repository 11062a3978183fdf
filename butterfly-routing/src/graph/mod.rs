//! Dynamic graph storage
//!
//! [`MemoryDynamicGraph`] holds vertices and edges in flat arrays;
//! [`DynamicGraphRouterDataSource`] wraps it with the tag index and turn
//! restrictions that routers query.

pub mod data_source;
pub mod memory;

pub use data_source::DynamicGraphRouterDataSource;
pub use memory::{Edges, MemoryDynamicGraph, EDGE_SIZE, NO_EDGE};
