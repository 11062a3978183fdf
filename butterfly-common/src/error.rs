//! Error types and utilities for the butterfly-osm routing toolkit
//!
//! One error enum is shared by every library crate in the workspace. Not-found
//! outcomes (missing vertex, missing edge, no path) are never errors; they are
//! returned as `Option` by the APIs that can produce them.

use strsim::{jaro_winkler, normalized_levenshtein};
use thiserror::Error;

/// Main error type for butterfly-osm operations
#[derive(Debug, Error)]
pub enum Error {
    /// A vertex id outside `1..next` was passed to a graph operation
    #[error("vertex {vertex} is out of range (next free vertex id is {next})")]
    VertexOutOfRange { vertex: u32, next: u32 },

    /// An edge from a vertex to itself was requested
    #[error("self-loop edges are not allowed (vertex {0})")]
    SelfLoop(u32),

    /// An edge record is linked from one endpoint but not from the other.
    ///
    /// This only happens after prior corruption of the adjacency lists; the
    /// graph must be considered unusable.
    #[error("edge {vertex1}-{vertex2} is reachable from vertex {vertex1} but not from vertex {vertex2}")]
    InconsistentAdjacency { vertex1: u32, vertex2: u32 },

    /// Growing a backing array failed
    #[error("failed to grow {what} to {requested} elements")]
    AllocationFailed { what: &'static str, requested: usize },

    /// Vehicle name not recognized
    #[error(
        "unknown vehicle '{name}'{}",
        .suggestion.as_ref().map(|s| format!(", did you mean '{s}'?")).unwrap_or_default()
    )]
    UnknownVehicle {
        name: String,
        suggestion: Option<String>,
    },

    /// Persisted bytes do not decode into a valid structure
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Invalid configuration or parameters
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for butterfly-osm operations
pub type Result<T> = std::result::Result<T, Error>;

/// Minimum combined similarity for a candidate to be suggested.
const MIN_SIMILARITY: f64 = 0.65;

/// Find the candidate closest to `input`, if any is close enough.
///
/// Scoring is 70% Jaro-Winkler (transpositions and prefix typos such as
/// "bicylce") plus 30% normalized Levenshtein (dropped letters such as
/// "pedestran"). An exact case-insensitive match yields `None`: there is
/// nothing to correct.
pub fn suggest_correction<'a, I>(input: &str, candidates: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let input_lower = input.to_lowercase();
    let mut best_match = None;
    let mut best_score = 0.0f64;

    for candidate in candidates {
        let candidate_lower = candidate.to_lowercase();
        if candidate_lower == input_lower {
            return None;
        }

        let jw_score = jaro_winkler(&input_lower, &candidate_lower);
        let lev_score = normalized_levenshtein(&input_lower, &candidate_lower);
        let score = (jw_score * 0.7) + (lev_score * 0.3);

        if score >= MIN_SIMILARITY && score > best_score {
            best_score = score;
            best_match = Some(candidate.to_string());
        }
    }

    best_match
}
