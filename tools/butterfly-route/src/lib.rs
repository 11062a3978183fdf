//! Command-line front end for butterfly-osm routing graphs

pub mod commands;
pub mod pbf;

pub use commands::{parse_coord, parse_points, parse_vehicle, MatrixOutput, RouteOutput};
pub use pbf::load_pbf;
