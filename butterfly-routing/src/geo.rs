//! Coordinates and distance helpers

use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A WGS84 coordinate in single precision
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f32,
    pub lon: f32,
}

impl Coordinate {
    pub fn new(lat: f32, lon: f32) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance to `other` in meters
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        haversine_distance(
            self.lat as f64,
            self.lon as f64,
            other.lat as f64,
            other.lon as f64,
        )
    }
}

/// Compute haversine distance between two points in meters
pub fn haversine_distance(lat1_deg: f64, lon1_deg: f64, lat2_deg: f64, lon2_deg: f64) -> f64 {
    let lat1 = lat1_deg.to_radians();
    let lat2 = lat2_deg.to_radians();
    let delta_lat = (lat2_deg - lat1_deg).to_radians();
    let delta_lon = (lon2_deg - lon1_deg).to_radians();

    let a =
        (delta_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Length in meters of the polyline `from -> shape... -> to`
pub fn polyline_length(from: Coordinate, shape: &[Coordinate], to: Coordinate) -> f64 {
    let mut length = 0.0;
    let mut prev = from;
    for point in shape.iter().copied().chain(std::iter::once(to)) {
        length += prev.distance_to(&point);
        prev = point;
    }
    length
}
