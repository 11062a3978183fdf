//! On-disk formats for routing graphs
//!
//! - [`tiles`]: the live graph split into slippy-map tiles, each loadable on
//!   its own
//! - [`ch_flatfile`]: a contracted graph with ranks, checksummed

pub mod ch_flatfile;
pub mod tiles;

pub use ch_flatfile::ChFlatfile;
pub use tiles::{Tile, TileConfig, TileMeta, TileReader, TileSerializer, TileVertex};
