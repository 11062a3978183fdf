//! Routing profiles: how tags turn into traversal weights

use crate::edge::LiveEdge;
use crate::tags::TagsCollection;
use crate::vehicle::Vehicle;

/// Hook through which tag interpretation feeds the routers.
pub trait RoutingProfile: Sync {
    /// Vehicle whose scoped restrictions apply, `None` for global ones only.
    fn vehicle(&self) -> Option<Vehicle>;

    /// Weight of traversing `distance` meters of a way with `tags`, `None`
    /// if the way cannot be used at all.
    fn weight(&self, tags: &TagsCollection, distance: f32) -> Option<f32>;

    /// `Some(true)`: only along the way's direction. `Some(false)`: only
    /// against it. `None`: both directions.
    fn oneway(&self, tags: &TagsCollection) -> Option<bool> {
        match tags.get("oneway") {
            Some("yes" | "true" | "1") => Some(true),
            Some("-1" | "reverse") => Some(false),
            _ => None,
        }
    }

    /// Weight of traversing `edge` in the direction it is given in.
    fn edge_weight(&self, tags: &TagsCollection, edge: &LiveEdge) -> Option<f32> {
        if let Some(along_way) = self.oneway(tags) {
            if along_way != edge.forward() {
                return None;
            }
        }
        self.weight(tags, edge.distance)
    }
}

/// Weight is the distance in meters.
///
/// Honours `oneway`, `access=no|private`, and `motor_vehicle=no` for motor
/// vehicles.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortestDistance {
    vehicle: Option<Vehicle>,
}

impl ShortestDistance {
    pub fn new(vehicle: Option<Vehicle>) -> Self {
        Self { vehicle }
    }
}

impl RoutingProfile for ShortestDistance {
    fn vehicle(&self) -> Option<Vehicle> {
        self.vehicle
    }

    fn weight(&self, tags: &TagsCollection, distance: f32) -> Option<f32> {
        if matches!(tags.get("access"), Some("no" | "private")) {
            return None;
        }
        if self.vehicle.is_some_and(|v| v.is_motor_vehicle()) && tags.contains("motor_vehicle", "no")
        {
            return None;
        }
        Some(distance)
    }
}
