//! Edge payloads stored alongside the graph's adjacency records
//!
//! A physical edge record is shared by both of its endpoints. The payload is
//! stored as seen from the record's first endpoint; traversing the record from
//! the other endpoint hands out [`EdgeData::reverse`] instead.

use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;

/// Capability set every edge payload provides to the graph store.
pub trait EdgeData: Clone + Default {
    /// The same edge as seen from the other endpoint.
    fn reverse(&self) -> Self;

    /// True when both payloads describe the same geometry, ignoring direction
    /// and tags.
    fn equals_geometrically(&self, other: &Self) -> bool;

    /// True when the edge joins two vertices that are neighbours in the
    /// source network (as opposed to a shortcut).
    fn represents_neighbour_relations(&self) -> bool;

    /// Tag set id in the owning [`crate::tags::TagsIndex`].
    fn tags(&self) -> u32;
}

/// Decides, on insertion, whether new data for an existing edge replaces the
/// stored data.
///
/// Both payloads are given in the stored orientation of the record.
pub trait EdgeComparer<E> {
    /// `true`: `new` is more information about `existing` and replaces it.
    /// `false`: keep `existing` untouched.
    fn overlaps(&self, new: &E, existing: &E) -> bool;
}

/// Replaces only when the payloads' own geometry is identical.
///
/// For [`LiveEdge`] that is [`LiveEdge::coordinates`]. Shapes passed to
/// `add_edge` live in the graph store, not in the payload, and are not
/// compared; a store that keeps shapes only there sees every edge as
/// geometrically equal and always replaces.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeometricComparer;

impl<E: EdgeData> EdgeComparer<E> for GeometricComparer {
    fn overlaps(&self, new: &E, existing: &E) -> bool {
        new.equals_geometrically(existing)
    }
}

impl<E, F> EdgeComparer<E> for F
where
    F: Fn(&E, &E) -> bool,
{
    fn overlaps(&self, new: &E, existing: &E) -> bool {
        self(new, existing)
    }
}

/// Payload of a graph built directly from OSM ways.
///
/// `value` packs the tag set id and the direction: `tags * 2 + (forward ? 0 : 1)`.
/// `forward` means the edge is traversed in the direction of the way it came
/// from. Equality compares the packed value and the shape; the distance is
/// derived data and ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveEdge {
    value: u32,
    /// Length of the edge in meters, direction-invariant
    pub distance: f32,
    /// Intermediate shape points, ordered from this edge's start
    pub coordinates: Option<Vec<Coordinate>>,
}

impl LiveEdge {
    /// `tags` must be an id handed out by a [`crate::tags::TagsIndex`], so
    /// at most [`crate::tags::MAX_TAGS_ID`].
    pub fn new(forward: bool, tags: u32, distance: f32) -> Self {
        Self {
            value: tags * 2 + u32::from(!forward),
            distance,
            coordinates: None,
        }
    }

    pub fn with_coordinates(mut self, coordinates: Vec<Coordinate>) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    /// Rebuild from the packed value.
    pub fn from_value(value: u32, distance: f32) -> Self {
        Self {
            value,
            distance,
            coordinates: None,
        }
    }

    #[inline]
    pub fn value(&self) -> u32 {
        self.value
    }

    #[inline]
    pub fn forward(&self) -> bool {
        self.value % 2 == 0
    }

    pub fn set_forward(&mut self, forward: bool) {
        self.value = (self.value / 2) * 2 + u32::from(!forward);
    }

    pub fn set_tags(&mut self, tags: u32) {
        self.value = tags * 2 + self.value % 2;
    }
}

impl PartialEq for LiveEdge {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.coordinates == other.coordinates
    }
}

impl EdgeData for LiveEdge {
    fn reverse(&self) -> Self {
        Self {
            value: self.value ^ 1,
            distance: self.distance,
            coordinates: self.coordinates.as_ref().map(|coords| {
                let mut reversed = coords.clone();
                reversed.reverse();
                reversed
            }),
        }
    }

    fn equals_geometrically(&self, other: &Self) -> bool {
        self.coordinates == other.coordinates
    }

    fn represents_neighbour_relations(&self) -> bool {
        true
    }

    #[inline]
    fn tags(&self) -> u32 {
        self.value / 2
    }
}
