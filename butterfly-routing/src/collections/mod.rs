//! Storage primitives backing the graph store

pub mod huge_array;

pub use huge_array::HugeArray;
