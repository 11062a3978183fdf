//! Turning OSM data into a routable graph
//!
//! The element types here are decoupled from any file format; the CLI feeds
//! them from PBF. [`RoutingInterpreter`] decides which ways and tags matter
//! and [`GraphWriter`] builds the graph from them.

pub mod writer;

use crate::tags::TagsCollection;
use crate::vehicle::Vehicle;

pub use writer::{GraphWriter, GraphWriterConfig, WriterStats};

#[derive(Debug, Clone, PartialEq)]
pub struct OsmNode {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    pub tags: TagsCollection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OsmWay {
    pub id: i64,
    pub nodes: Vec<i64>,
    pub tags: TagsCollection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Node,
    Way,
    Relation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationMember {
    pub kind: MemberKind,
    pub id: i64,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OsmRelation {
    pub id: i64,
    pub members: Vec<RelationMember>,
    pub tags: TagsCollection,
}

impl OsmRelation {
    /// First member with `role` and `kind`.
    pub fn member(&self, role: &str, kind: MemberKind) -> Option<i64> {
        self.members
            .iter()
            .find(|m| m.kind == kind && m.role == role)
            .map(|m| m.id)
    }

    pub fn is_restriction(&self) -> bool {
        self.tags.contains("type", "restriction")
    }
}

/// Who a restricted node is closed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRestriction {
    AllVehicles,
    Vehicles(Vec<Vehicle>),
}

/// Tag interpretation used while building the graph.
pub trait RoutingInterpreter {
    /// Whether a way with these tags is part of the network.
    fn is_routable(&self, tags: &TagsCollection) -> bool;

    /// Whether a way tag is kept on the edges.
    fn is_relevant_tag(&self, key: &str) -> bool;

    /// Whether a node with these tags cannot be passed through.
    fn node_restriction(&self, tags: &TagsCollection) -> Option<NodeRestriction>;
}

/// Default interpreter: every `highway=*` way that is an actual road.
#[derive(Debug, Clone, Copy, Default)]
pub struct HighwayInterpreter;

const NON_ROAD_HIGHWAYS: &[&str] = &["proposed", "construction", "abandoned", "platform", "raceway"];

const RELEVANT_KEYS: &[&str] = &[
    "highway",
    "oneway",
    "junction",
    "access",
    "motor_vehicle",
    "motorcar",
    "goods",
    "hgv",
    "psv",
    "bus",
    "moped",
    "motorcycle",
    "bicycle",
    "foot",
    "maxspeed",
    "name",
];

const MOTOR_BARRIERS: &[&str] = &["bollard", "block", "bus_trap", "cycle_barrier", "jersey_barrier"];

impl RoutingInterpreter for HighwayInterpreter {
    fn is_routable(&self, tags: &TagsCollection) -> bool {
        match tags.get("highway") {
            Some(kind) => !NON_ROAD_HIGHWAYS.contains(&kind) && !tags.contains("area", "yes"),
            None => false,
        }
    }

    fn is_relevant_tag(&self, key: &str) -> bool {
        RELEVANT_KEYS.contains(&key)
    }

    fn node_restriction(&self, tags: &TagsCollection) -> Option<NodeRestriction> {
        if tags.contains("access", "no") {
            return Some(NodeRestriction::AllVehicles);
        }
        match tags.get("barrier") {
            Some(barrier) if MOTOR_BARRIERS.contains(&barrier) => Some(NodeRestriction::Vehicles(
                Vehicle::ALL
                    .into_iter()
                    .filter(Vehicle::is_motor_vehicle)
                    .collect(),
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> TagsCollection {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_routable_ways() {
        let interpreter = HighwayInterpreter;
        assert!(interpreter.is_routable(&tags(&[("highway", "residential")])));
        assert!(!interpreter.is_routable(&tags(&[("highway", "construction")])));
        assert!(!interpreter.is_routable(&tags(&[("highway", "pedestrian"), ("area", "yes")])));
        assert!(!interpreter.is_routable(&tags(&[("building", "yes")])));
    }

    #[test]
    fn test_node_restrictions() {
        let interpreter = HighwayInterpreter;
        assert_eq!(
            interpreter.node_restriction(&tags(&[("access", "no")])),
            Some(NodeRestriction::AllVehicles)
        );
        match interpreter.node_restriction(&tags(&[("barrier", "bollard")])) {
            Some(NodeRestriction::Vehicles(vehicles)) => {
                assert!(vehicles.contains(&Vehicle::Car));
                assert!(!vehicles.contains(&Vehicle::Bicycle));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            interpreter.node_restriction(&tags(&[("barrier", "gate")])),
            None
        );
    }

    #[test]
    fn test_relation_members() {
        let relation = OsmRelation {
            id: 1,
            members: vec![
                RelationMember {
                    kind: MemberKind::Way,
                    id: 10,
                    role: "from".into(),
                },
                RelationMember {
                    kind: MemberKind::Node,
                    id: 20,
                    role: "via".into(),
                },
            ],
            tags: tags(&[("type", "restriction"), ("restriction", "no_left_turn")]),
        };
        assert!(relation.is_restriction());
        assert_eq!(relation.member("from", MemberKind::Way), Some(10));
        assert_eq!(relation.member("via", MemberKind::Node), Some(20));
        assert_eq!(relation.member("via", MemberKind::Way), None);
    }
}
