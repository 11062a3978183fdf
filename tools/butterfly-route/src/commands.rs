//! Subcommand implementations, kept apart from argument parsing so tests can
//! drive them directly.

use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use butterfly_io::{ChFlatfile, TileConfig, TileSerializer};
use butterfly_routing::ch::{ChConfig, ChPreprocessor, ChRouter};
use butterfly_routing::osm::GraphWriterConfig;
use butterfly_routing::routing::{
    DykstraRouter, EdgeResolver, ResolverConfig, ShortestDistance, VertexIndex,
};
use butterfly_routing::{Coordinate, DynamicGraphRouterDataSource, LiveEdge, RouterPoint, Vehicle};
use serde::Serialize;

use crate::pbf::load_pbf;

/// Parse `lat,lon`.
pub fn parse_coord(s: &str) -> Result<Coordinate> {
    let Some((lat, lon)) = s.split_once(',') else {
        bail!("Coordinate must be in format 'lat,lon', got '{s}'");
    };
    let lat: f32 = lat.trim().parse().with_context(|| format!("Invalid latitude in '{s}'"))?;
    let lon: f32 = lon.trim().parse().with_context(|| format!("Invalid longitude in '{s}'"))?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        bail!("Coordinate out of range: {s}");
    }
    Ok(Coordinate::new(lat, lon))
}

/// Parse `lat,lon;lat,lon;...`.
pub fn parse_points(s: &str) -> Result<Vec<Coordinate>> {
    s.split(';')
        .filter(|p| !p.trim().is_empty())
        .map(parse_coord)
        .collect()
}

pub fn parse_vehicle(name: Option<&str>) -> Result<Option<Vehicle>> {
    name.map(|n| n.parse::<Vehicle>()).transpose().map_err(Into::into)
}

#[derive(Debug, Serialize)]
pub struct RouteOutput {
    pub weight: f32,
    pub vertices: Vec<u32>,
    /// `[lat, lon]` pairs, shape points included
    pub coordinates: Vec<[f32; 2]>,
}

#[derive(Debug, Serialize)]
pub struct MatrixOutput {
    pub points: Vec<[f32; 2]>,
    /// `weights[i][j]` from point i to point j, `null` where unreachable
    pub weights: Vec<Vec<Option<f32>>>,
}

fn pair(c: Coordinate) -> [f32; 2] {
    [c.lat, c.lon]
}

pub fn build(input: &Path, output: &Path, tiles: TileConfig) -> Result<()> {
    println!("🦋 Building graph from {}", input.display());
    let start = Instant::now();
    let (source, stats) = load_pbf(input, GraphWriterConfig::default())?;
    println!(
        "  ✓ {} vertices, {} edges from {} ways ({} promoted, {} dropped, {} restrictions)",
        source.vertex_count(),
        stats.edges,
        stats.ways,
        stats.promoted,
        stats.dropped,
        stats.restrictions
    );

    TileSerializer::write_file(output, &source, tiles)
        .with_context(|| format!("Failed to write tiles to {}", output.display()))?;
    println!("  ✓ Wrote {} in {:.2}s", output.display(), start.elapsed().as_secs_f64());
    Ok(())
}

fn load_tiles(path: &Path) -> Result<DynamicGraphRouterDataSource<LiveEdge>> {
    TileSerializer::read_file(path).with_context(|| format!("Failed to read tiles from {}", path.display()))
}

fn resolve(resolver: &EdgeResolver, coordinate: Coordinate) -> Result<RouterPoint> {
    resolver
        .resolve(coordinate)
        .ok_or_else(|| anyhow!("No road near {},{}", coordinate.lat, coordinate.lon))
}

pub fn route(
    graph: &Path,
    from: Coordinate,
    to: Coordinate,
    vehicle: Option<Vehicle>,
) -> Result<RouteOutput> {
    let source = load_tiles(graph)?;
    let resolver = EdgeResolver::build(&source, ResolverConfig::default());
    let from = resolve(&resolver, from)?;
    let to = resolve(&resolver, to)?;

    let profile = ShortestDistance::new(vehicle);
    let router = DykstraRouter::new(&source, &profile);
    let path = router.one_to_one(&from, &to).ok_or_else(|| anyhow!("No route found"))?;
    Ok(RouteOutput {
        weight: path.weight,
        vertices: path.vertices(),
        coordinates: path.coordinates(&source).into_iter().map(pair).collect(),
    })
}

pub fn matrix(graph: &Path, points: &[Coordinate], vehicle: Option<Vehicle>) -> Result<MatrixOutput> {
    let source = load_tiles(graph)?;
    let resolver = EdgeResolver::build(&source, ResolverConfig::default());
    let resolved = points
        .iter()
        .map(|c| resolve(&resolver, *c))
        .collect::<Result<Vec<_>>>()?;

    let profile = ShortestDistance::new(vehicle);
    let router = DykstraRouter::new(&source, &profile);
    Ok(MatrixOutput {
        points: points.iter().copied().map(pair).collect(),
        weights: router.many_to_many(&resolved, &resolved),
    })
}

pub fn build_ch(input: &Path, output: &Path, vehicle: Option<Vehicle>) -> Result<()> {
    println!("🦋 Contracting {}", input.display());
    let start = Instant::now();
    let source = load_tiles(input)?;
    let ch = ChPreprocessor::build(&source, &ShortestDistance::new(vehicle), ChConfig::default())?;
    println!(
        "  ✓ {} vertices, {} shortcuts in {:.2}s",
        ch.vertex_count(),
        ch.shortcut_count(),
        start.elapsed().as_secs_f64()
    );

    ChFlatfile::write_file(output, &ch)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("  ✓ Wrote {}", output.display());
    Ok(())
}

pub fn route_ch(graph: &Path, from: Coordinate, to: Coordinate) -> Result<RouteOutput> {
    let ch = ChFlatfile::read_file(graph).with_context(|| format!("Failed to read {}", graph.display()))?;
    let index = VertexIndex::build(&ch.graph);
    let nearest = |c: Coordinate| {
        index
            .nearest(c)
            .ok_or_else(|| anyhow!("No vertex near {},{}", c.lat, c.lon))
    };
    let (from, to) = (nearest(from)?, nearest(to)?);

    let path = ChRouter::new(&ch)
        .one_to_one(from, to)
        .ok_or_else(|| anyhow!("No route found"))?;
    let vertices = path.vertices();
    let coordinates = vertices
        .iter()
        .filter_map(|v| ch.vertex(*v))
        .map(pair)
        .collect();
    Ok(RouteOutput {
        weight: path.weight,
        vertices,
        coordinates,
    })
}
