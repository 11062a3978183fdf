//! Two-pass graph building from OSM elements
//!
//! Pass 1 (`preindex_*`) only looks at ways and relations, to learn which
//! nodes become vertices. Pass 2 (`add_*`) sees every element again, in file
//! order: nodes, then ways, then relations.

use butterfly_common::Result;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use super::{MemberKind, NodeRestriction, OsmNode, OsmRelation, OsmWay, RoutingInterpreter};
use crate::edge::LiveEdge;
use crate::geo::{polyline_length, Coordinate};
use crate::graph::DynamicGraphRouterDataSource;
use crate::tags::TagsCollection;
use crate::vehicle::Vehicle;

#[derive(Debug, Clone, Copy)]
pub struct GraphWriterConfig {
    /// Headroom on the vertex estimate taken from pass 1
    pub resize_factor: f64,
    /// Edge slots reserved per estimated vertex
    pub edges_per_vertex: usize,
}

impl Default for GraphWriterConfig {
    fn default() -> Self {
        Self {
            resize_factor: 1.1,
            edges_per_vertex: 4,
        }
    }
}

/// Counts reported when the graph is finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub ways: usize,
    pub edges: usize,
    pub promoted: usize,
    pub dropped: usize,
    pub restrictions: usize,
}

pub struct GraphWriter<I> {
    interpreter: I,
    config: GraphWriterConfig,
    source: DynamicGraphRouterDataSource<LiveEdge>,
    /// Number of routable ways using a node, saturating at 2
    usage: FxHashMap<i64, u8>,
    relevant: FxHashSet<i64>,
    restriction_ways: FxHashSet<i64>,
    coordinates: FxHashMap<i64, Coordinate>,
    vertices: FxHashMap<i64, u32>,
    /// Vertex sequence of every way referenced by a restriction relation
    way_vertices: FxHashMap<i64, Vec<u32>>,
    stats: WriterStats,
}

impl<I: RoutingInterpreter> GraphWriter<I> {
    pub fn new(interpreter: I, config: GraphWriterConfig) -> Result<Self> {
        Ok(Self {
            interpreter,
            config,
            source: DynamicGraphRouterDataSource::with_size_estimate(0)?,
            usage: FxHashMap::default(),
            relevant: FxHashSet::default(),
            restriction_ways: FxHashSet::default(),
            coordinates: FxHashMap::default(),
            vertices: FxHashMap::default(),
            way_vertices: FxHashMap::default(),
            stats: WriterStats::default(),
        })
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    pub fn preindex_way(&mut self, way: &OsmWay) {
        if !self.interpreter.is_routable(&way.tags) {
            return;
        }
        for node in &way.nodes {
            let count = self.usage.entry(*node).or_insert(0);
            *count = count.saturating_add(1).min(2);
            if *count > 1 {
                self.relevant.insert(*node);
            }
        }
        if let (Some(first), Some(last)) = (way.nodes.first(), way.nodes.last()) {
            self.relevant.insert(*first);
            self.relevant.insert(*last);
        }
    }

    pub fn preindex_relation(&mut self, relation: &OsmRelation) {
        if !relation.is_restriction() {
            return;
        }
        for member in &relation.members {
            if member.kind == MemberKind::Way {
                self.restriction_ways.insert(member.id);
            }
        }
    }

    /// Size the store for what pass 1 found.
    pub fn prepare(&mut self) -> Result<()> {
        let vertices = (self.relevant.len() as f64 * self.config.resize_factor).ceil() as usize;
        let edges = vertices * self.config.edges_per_vertex;
        info!(
            relevant = self.relevant.len(),
            used = self.usage.len(),
            vertices,
            edges,
            "preindex done, resizing graph"
        );
        self.source.graph_mut().resize(vertices + 1, edges)
    }

    pub fn add_node(&mut self, node: &OsmNode) -> Result<()> {
        if !self.usage.contains_key(&node.id) {
            return Ok(());
        }
        let coord = Coordinate::new(node.lat as f32, node.lon as f32);
        self.coordinates.insert(node.id, coord);

        let restriction = self.interpreter.node_restriction(&node.tags);
        if !self.relevant.contains(&node.id) && restriction.is_none() {
            return Ok(());
        }

        let vertex = self.source.graph_mut().add_vertex(coord.lat, coord.lon)?;
        self.vertices.insert(node.id, vertex);
        match restriction {
            Some(NodeRestriction::AllVehicles) => {
                self.source.add_restriction(&[vertex])?;
                self.stats.restrictions += 1;
            }
            Some(NodeRestriction::Vehicles(vehicles)) => {
                for vehicle in vehicles {
                    self.source.add_vehicle_restriction(vehicle, &[vertex])?;
                }
                self.stats.restrictions += 1;
            }
            None => {}
        }
        Ok(())
    }

    pub fn add_way(&mut self, way: &OsmWay) -> Result<()> {
        if !self.interpreter.is_routable(&way.tags) {
            return Ok(());
        }
        self.stats.ways += 1;

        let mut relevant = way.tags.clone();
        relevant.retain_keys(|key| self.interpreter.is_relevant_tag(key));
        let tags = self.source.tags_mut().add(&relevant)?;

        let mut from: Option<u32> = None;
        let mut shape = Vec::new();
        let mut sequence = Vec::new();
        for node in &way.nodes {
            let Some(coord) = self.coordinates.get(node).copied() else {
                continue;
            };
            match (self.vertices.get(node).copied(), from) {
                (Some(to), Some(prev)) => {
                    self.add_segment(prev, to, std::mem::take(&mut shape), tags, &mut sequence)?;
                    from = Some(to);
                }
                (Some(to), None) => {
                    sequence.push(to);
                    from = Some(to);
                }
                (None, Some(_)) => shape.push(coord),
                (None, None) => {}
            }
        }

        if self.restriction_ways.contains(&way.id) {
            self.way_vertices.insert(way.id, sequence);
        }
        Ok(())
    }

    /// Add the segment `from -> to`, splitting it when the pair is already
    /// joined by different geometry or is a loop.
    fn add_segment(
        &mut self,
        mut from: u32,
        to: u32,
        mut shape: Vec<Coordinate>,
        tags: u32,
        sequence: &mut Vec<u32>,
    ) -> Result<()> {
        loop {
            let collides = from == to
                || (self.source.contains_edge(from, to)
                    && self.source.edge_shape(from, to).unwrap_or_default() != shape);

            let from_coord = self.source.vertex(from).unwrap_or_default();
            if !collides {
                let to_coord = self.source.vertex(to).unwrap_or_default();
                let distance = polyline_length(from_coord, &shape, to_coord) as f32;
                self.source.graph_mut().add_edge(
                    from,
                    to,
                    LiveEdge::new(true, tags, distance),
                    Some(shape),
                )?;
                self.stats.edges += 1;
                sequence.push(to);
                return Ok(());
            }

            if shape.is_empty() {
                debug!(from, to, "dropping duplicate segment without shape");
                self.stats.dropped += 1;
                sequence.push(to);
                return Ok(());
            }

            let first = shape.remove(0);
            let promoted = self.source.graph_mut().add_vertex(first.lat, first.lon)?;
            let distance = from_coord.distance_to(&first) as f32;
            self.source.graph_mut().add_edge(
                from,
                promoted,
                LiveEdge::new(true, tags, distance),
                None,
            )?;
            self.stats.edges += 1;
            self.stats.promoted += 1;
            sequence.push(promoted);
            from = promoted;
        }
    }

    pub fn add_relation(&mut self, relation: &OsmRelation) -> Result<()> {
        if !relation.is_restriction() {
            return Ok(());
        }
        let (Some(from_way), Some(via_node), Some(to_way)) = (
            relation.member("from", MemberKind::Way),
            relation.member("via", MemberKind::Node),
            relation.member("to", MemberKind::Way),
        ) else {
            debug!(relation = relation.id, "unsupported restriction layout");
            return Ok(());
        };

        let Some(&via) = self.vertices.get(&via_node) else {
            return Ok(());
        };
        let from = self
            .way_vertices
            .get(&from_way)
            .and_then(|seq| neighbour_on(seq, via, false));
        let to = self
            .way_vertices
            .get(&to_way)
            .and_then(|seq| neighbour_on(seq, via, true));
        let (Some(from), Some(to)) = (from, to) else {
            debug!(relation = relation.id, "restriction ways do not meet at via");
            return Ok(());
        };

        for (vehicles, kind) in restriction_kinds(&relation.tags) {
            let sequences: Vec<[u32; 3]> = if kind.starts_with("no_") {
                vec![[from, via, to]]
            } else if kind.starts_with("only_") {
                self.source
                    .edges(via)
                    .map(|(n, _)| n)
                    .filter(|&n| n != to)
                    .map(|n| [from, via, n])
                    .collect()
            } else {
                continue;
            };

            for sequence in &sequences {
                match &vehicles {
                    None => self.source.add_restriction(sequence)?,
                    Some(vehicles) => {
                        for vehicle in vehicles {
                            self.source.add_vehicle_restriction(*vehicle, sequence)?;
                        }
                    }
                }
            }
            self.stats.restrictions += sequences.len();
        }
        Ok(())
    }

    /// Trim the store and hand over the routing data.
    pub fn finish(mut self) -> Result<DynamicGraphRouterDataSource<LiveEdge>> {
        self.source.graph_mut().trim()?;
        info!(
            vertices = self.source.vertex_count(),
            ways = self.stats.ways,
            edges = self.stats.edges,
            promoted = self.stats.promoted,
            dropped = self.stats.dropped,
            restrictions = self.stats.restrictions,
            "graph built"
        );
        Ok(self.source)
    }
}

/// Vertex next to `via` on a way: the one after it when leaving along the
/// way, the one before it when arriving.
fn neighbour_on(sequence: &[u32], via: u32, leaving: bool) -> Option<u32> {
    let pos = sequence.iter().position(|&v| v == via)?;
    let before = pos.checked_sub(1).map(|p| sequence[p]);
    let after = sequence.get(pos + 1).copied();
    if leaving {
        after.or(before)
    } else {
        before.or(after)
    }
}

/// `(vehicles, value)` for each `restriction` / `restriction:<vehicle>` tag;
/// `None` vehicles means all of them.
fn restriction_kinds(tags: &TagsCollection) -> Vec<(Option<Vec<Vehicle>>, String)> {
    tags.iter()
        .filter_map(|(key, value)| {
            if key == "restriction" {
                Some((None, value.to_string()))
            } else {
                let vehicles = Vehicle::from_osm_key(key.strip_prefix("restriction:")?);
                (!vehicles.is_empty()).then(|| (Some(vehicles), value.to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::{HighwayInterpreter, RelationMember};
    use crate::routing::{DykstraRouter, RouterPoint, ShortestDistance};

    fn tags(pairs: &[(&str, &str)]) -> TagsCollection {
        pairs.iter().copied().collect()
    }

    fn node(id: i64, lat: f64, lon: f64) -> OsmNode {
        OsmNode {
            id,
            lat,
            lon,
            tags: TagsCollection::new(),
        }
    }

    fn way(id: i64, nodes: &[i64]) -> OsmWay {
        OsmWay {
            id,
            nodes: nodes.to_vec(),
            tags: tags(&[("highway", "residential"), ("surface", "asphalt")]),
        }
    }

    fn build(
        nodes: &[OsmNode],
        ways: &[OsmWay],
        relations: &[OsmRelation],
    ) -> (DynamicGraphRouterDataSource<LiveEdge>, WriterStats) {
        let mut writer = GraphWriter::new(HighwayInterpreter, GraphWriterConfig::default()).unwrap();
        for w in ways {
            writer.preindex_way(w);
        }
        for r in relations {
            writer.preindex_relation(r);
        }
        writer.prepare().unwrap();
        for n in nodes {
            writer.add_node(n).unwrap();
        }
        for w in ways {
            writer.add_way(w).unwrap();
        }
        for r in relations {
            writer.add_relation(r).unwrap();
        }
        let stats = writer.stats();
        (writer.finish().unwrap(), stats)
    }

    #[test]
    fn test_intermediate_nodes_become_shape() {
        let nodes = [node(1, 0.0, 0.0), node(2, 0.0, 0.001), node(3, 0.0, 0.002)];
        let (source, stats) = build(&nodes, &[way(100, &[1, 2, 3])], &[]);

        assert_eq!(source.vertex_count(), 2);
        assert_eq!(stats.edges, 1);
        let edge = source.edge(1, 2).unwrap();
        assert!(edge.forward());
        assert!((edge.distance - 222.4).abs() < 1.0, "{}", edge.distance);
        assert_eq!(
            source.edge_shape(1, 2),
            Some(vec![Coordinate::new(0.0, 0.001)])
        );
        // irrelevant tags are dropped
        let tags = source.edge_tags(&edge);
        assert_eq!(tags.get("highway"), Some("residential"));
        assert_eq!(tags.get("surface"), None);
    }

    #[test]
    fn test_shared_node_splits_ways() {
        let nodes = [
            node(1, 0.0, 0.0),
            node(2, 0.0, 0.001),
            node(3, 0.0, 0.002),
            node(4, 0.001, 0.001),
        ];
        let (source, _) = build(&nodes, &[way(100, &[1, 2, 3]), way(101, &[4, 2])], &[]);

        // node 2 is used twice and becomes a vertex
        assert_eq!(source.vertex_count(), 4);
        assert_eq!(source.edges(2).count(), 3);
    }

    #[test]
    fn test_loop_way_promotes_intermediates() {
        let nodes = [
            node(1, 0.0, 0.0),
            node(2, 0.0, 0.001),
            node(3, 0.001, 0.001),
        ];
        let (source, stats) = build(&nodes, &[way(100, &[1, 2, 3, 1])], &[]);

        // 1 -> 1 becomes the triangle 1 -> 2 -> 3 -> 1
        assert_eq!(stats.promoted, 2);
        assert_eq!(source.vertex_count(), 3);
        assert_eq!(source.vertex(2), Some(Coordinate::new(0.0, 0.001)));
        assert_eq!(source.vertex(3), Some(Coordinate::new(0.001, 0.001)));
        assert!(source.contains_edge(1, 2));
        assert!(source.contains_edge(2, 3));
        assert!(source.contains_edge(3, 1));
        assert_eq!(source.edges(1).count(), 2);
    }

    #[test]
    fn test_parallel_ways_keep_both_geometries() {
        let nodes = [
            node(1, 0.0, 0.0),
            node(2, 0.001, 0.001),
            node(3, -0.001, 0.001),
            node(4, 0.0, 0.002),
        ];
        let ways = [way(100, &[1, 2, 4]), way(101, &[1, 3, 4])];
        let (source, stats) = build(&nodes, &ways, &[]);

        assert_eq!(stats.promoted, 1);
        assert_eq!(source.vertex_count(), 3);
        // node 4 is the second vertex
        assert_eq!(source.edges(1).count(), 2);
        assert_eq!(source.edges(2).count(), 2);
    }

    #[test]
    fn test_duplicate_straight_segment_is_dropped() {
        let nodes = [node(1, 0.0, 0.0), node(2, 0.0, 0.001)];
        let mut second = way(101, &[1, 2]);
        second.tags = tags(&[("highway", "service")]);
        let (source, stats) = build(&nodes, &[way(100, &[1, 2]), second], &[]);

        assert_eq!(stats.dropped, 0);
        assert_eq!(source.edges(1).count(), 1);

        let (source, stats) = build(&nodes, &[way(100, &[1, 1, 2])], &[]);
        assert_eq!(stats.dropped, 1);
        assert_eq!(source.edges(1).count(), 1);
    }

    #[test]
    fn test_barrier_node_restriction() {
        let mut bollard = node(2, 0.0, 0.001);
        bollard.tags = tags(&[("barrier", "bollard")]);
        let nodes = [node(1, 0.0, 0.0), bollard, node(3, 0.0, 0.002)];
        let (source, _) = build(&nodes, &[way(100, &[1, 2, 3])], &[]);

        // the bollard becomes a vertex of its own
        assert_eq!(source.vertex_count(), 3);
        assert!(source.is_restricted(Some(Vehicle::Car), &[2]));
        assert!(!source.is_restricted(Some(Vehicle::Bicycle), &[2]));
    }

    fn turn_restriction(kind: &str, key: &str) -> OsmRelation {
        OsmRelation {
            id: 500,
            members: vec![
                RelationMember {
                    kind: MemberKind::Way,
                    id: 100,
                    role: "from".into(),
                },
                RelationMember {
                    kind: MemberKind::Node,
                    id: 2,
                    role: "via".into(),
                },
                RelationMember {
                    kind: MemberKind::Way,
                    id: 101,
                    role: "to".into(),
                },
            ],
            tags: tags(&[("type", "restriction"), (key, kind)]),
        }
    }

    /// A crossing at node 2: way 100 runs 1 -> 2 -> 3, way 101 runs 2 -> 4,
    /// way 102 runs 2 -> 5.
    fn crossing(relations: &[OsmRelation]) -> DynamicGraphRouterDataSource<LiveEdge> {
        let nodes = [
            node(1, 0.0, 0.0),
            node(2, 0.0, 0.001),
            node(3, 0.0, 0.002),
            node(4, 0.001, 0.001),
            node(5, -0.001, 0.001),
        ];
        let ways = [way(100, &[1, 2, 3]), way(101, &[2, 4]), way(102, &[2, 5])];
        build(&nodes, &ways, relations).0
    }

    #[test]
    fn test_no_turn_restriction() {
        let source = crossing(&[turn_restriction("no_left_turn", "restriction")]);
        // vertices in order of appearance: nodes 1..5 map to 1..5
        assert!(source.is_restricted(None, &[1, 2, 4]));
        assert!(!source.is_restricted(None, &[1, 2, 5]));

        let profile = ShortestDistance::default();
        let router = DykstraRouter::new(&source, &profile);
        let path = router
            .one_to_one(&RouterPoint::Vertex(1), &RouterPoint::Vertex(4))
            .unwrap();
        assert_ne!(path.vertices(), vec![1, 2, 4]);
    }

    #[test]
    fn test_only_turn_restriction() {
        let source = crossing(&[turn_restriction("only_left_turn", "restriction")]);
        assert!(!source.is_restricted(None, &[1, 2, 4]));
        assert!(source.is_restricted(None, &[1, 2, 3]));
        assert!(source.is_restricted(None, &[1, 2, 5]));
        assert!(source.is_restricted(None, &[1, 2, 1]));
    }

    #[test]
    fn test_vehicle_scoped_turn_restriction() {
        let source = crossing(&[turn_restriction("no_left_turn", "restriction:hgv")]);
        assert!(source.is_restricted(Some(Vehicle::BigTruck), &[1, 2, 4]));
        assert!(!source.is_restricted(Some(Vehicle::Car), &[1, 2, 4]));
        assert!(!source.is_restricted(None, &[1, 2, 4]));
    }

    #[test]
    fn test_neighbour_on() {
        assert_eq!(neighbour_on(&[1, 2, 3], 2, true), Some(3));
        assert_eq!(neighbour_on(&[1, 2, 3], 2, false), Some(1));
        assert_eq!(neighbour_on(&[2, 4], 2, false), Some(4));
        assert_eq!(neighbour_on(&[2, 4], 9, true), None);
    }
}
