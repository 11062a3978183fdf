//! Two-pass PBF loading into a routing graph
//!
//! Pass 1 sees ways and relations only, to learn which nodes become
//! vertices. Pass 2 replays the whole file into the writer.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use butterfly_routing::osm::{
    GraphWriter, GraphWriterConfig, HighwayInterpreter, MemberKind, OsmNode, OsmRelation, OsmWay,
    RelationMember, WriterStats,
};
use butterfly_routing::{DynamicGraphRouterDataSource, LiveEdge, TagsCollection};
use osmpbf::{Element, ElementReader, RelMemberType};
use tracing::info;

pub fn load_pbf<P: AsRef<Path>>(
    path: P,
    config: GraphWriterConfig,
) -> Result<(DynamicGraphRouterDataSource<LiveEdge>, WriterStats)> {
    let path = path.as_ref();
    let mut writer = GraphWriter::new(HighwayInterpreter, config)?;

    let start = Instant::now();
    ElementReader::from_path(path)
        .with_context(|| format!("Failed to open PBF file {}", path.display()))?
        .for_each(|element| match element {
            Element::Way(way) => writer.preindex_way(&convert_way(&way)),
            Element::Relation(relation) => writer.preindex_relation(&convert_relation(&relation)),
            _ => {}
        })
        .context("Failed to read PBF file (pass 1)")?;
    info!(elapsed_s = start.elapsed().as_secs_f64(), "pass 1 done");

    writer.prepare()?;

    // the reader callback cannot fail, so keep the first error and skip the rest
    let mut failure: Option<butterfly_common::Error> = None;
    let start = Instant::now();
    ElementReader::from_path(path)
        .with_context(|| format!("Failed to open PBF file {}", path.display()))?
        .for_each(|element| {
            if failure.is_some() {
                return;
            }
            let result = match element {
                Element::Node(node) => writer.add_node(&OsmNode {
                    id: node.id(),
                    lat: node.lat(),
                    lon: node.lon(),
                    tags: node.tags().collect(),
                }),
                Element::DenseNode(node) => writer.add_node(&OsmNode {
                    id: node.id(),
                    lat: node.lat(),
                    lon: node.lon(),
                    tags: node.tags().collect(),
                }),
                Element::Way(way) => writer.add_way(&convert_way(&way)),
                Element::Relation(relation) => writer.add_relation(&convert_relation(&relation)),
            };
            if let Err(e) = result {
                failure = Some(e);
            }
        })
        .context("Failed to read PBF file (pass 2)")?;
    if let Some(e) = failure {
        return Err(e).context("Failed to build graph");
    }
    info!(elapsed_s = start.elapsed().as_secs_f64(), "pass 2 done");

    let stats = writer.stats();
    Ok((writer.finish()?, stats))
}

fn convert_way(way: &osmpbf::Way<'_>) -> OsmWay {
    OsmWay {
        id: way.id(),
        nodes: way.refs().collect(),
        tags: way.tags().collect::<TagsCollection>(),
    }
}

fn convert_relation(relation: &osmpbf::Relation<'_>) -> OsmRelation {
    let members = relation
        .members()
        .map(|member| RelationMember {
            kind: match member.member_type {
                RelMemberType::Node => MemberKind::Node,
                RelMemberType::Way => MemberKind::Way,
                RelMemberType::Relation => MemberKind::Relation,
            },
            id: member.member_id,
            role: member.role().unwrap_or("").to_string(),
        })
        .collect();
    OsmRelation {
        id: relation.id(),
        members,
        tags: relation.tags().collect(),
    }
}
