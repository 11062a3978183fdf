//! Tiled graph format
//!
//! ```text
//! header   u8  compressed flag
//!          u32 tile count
//!          u64 offset where the metadata ends
//! metadata 24 bytes per tile: u32 x, u32 y, u64 offset, u64 length
//! payloads bincode, each zstd-compressed when the flag is set
//! ```
//!
//! All integers are little-endian. Vertex coordinates are stored as 16-bit
//! offsets inside their tile, so they come back with roughly a decimeter of
//! error at zoom 13.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use butterfly_common::{Error, Result};
use butterfly_routing::{Coordinate, DynamicGraphRouterDataSource, LiveEdge, TagsCollection};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const HEADER_SIZE: u64 = 1 + 4 + 8;
const META_SIZE: u64 = 24;
const ZSTD_LEVEL: i32 = 3;
const MAX_LAT: f64 = 85.051_128_78;

#[derive(Debug, Clone, Copy)]
pub struct TileConfig {
    pub zoom: u8,
    /// zstd-compress every tile payload
    pub compress: bool,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            zoom: 13,
            compress: false,
        }
    }
}

/// Slippy-map tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
}

impl Tile {
    pub fn at(coordinate: Coordinate, zoom: u8) -> Self {
        let n = f64::from(1u32 << zoom);
        let lat = (coordinate.lat as f64).clamp(-MAX_LAT, MAX_LAT).to_radians();
        let x = ((coordinate.lon as f64 + 180.0) / 360.0 * n).floor();
        let y = ((1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * n).floor();
        Self {
            x: x.clamp(0.0, n - 1.0) as u32,
            y: y.clamp(0.0, n - 1.0) as u32,
        }
    }

    /// `(top, left, bottom, right)` in degrees
    pub fn bounds(&self, zoom: u8) -> (f64, f64, f64, f64) {
        let n = f64::from(1u32 << zoom);
        let lon = |x: f64| x / n * 360.0 - 180.0;
        let lat = |y: f64| (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees();
        let (x, y) = (self.x as f64, self.y as f64);
        (lat(y), lon(x), lat(y + 1.0), lon(x + 1.0))
    }

    fn quantize(&self, zoom: u8, coordinate: Coordinate) -> (u16, u16) {
        let (top, left, bottom, right) = self.bounds(zoom);
        let lat = (top - coordinate.lat as f64) / (top - bottom) * 65535.0;
        let lon = (coordinate.lon as f64 - left) / (right - left) * 65535.0;
        (
            lat.round().clamp(0.0, 65535.0) as u16,
            lon.round().clamp(0.0, 65535.0) as u16,
        )
    }

    fn dequantize(&self, zoom: u8, lat: u16, lon: u16) -> Coordinate {
        let (top, left, bottom, right) = self.bounds(zoom);
        Coordinate::new(
            (top - lat as f64 / 65535.0 * (top - bottom)) as f32,
            (left + lon as f64 / 65535.0 * (right - left)) as f32,
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RawArc {
    to: u32,
    to_tile: Tile,
    forward: bool,
    /// (key, value) indices into the tile's string table
    tags: Vec<(u32, u32)>,
    shape: Vec<Coordinate>,
    distance: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawVertex {
    id: u32,
    lat: u16,
    lon: u16,
    arcs: Vec<RawArc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawTile {
    zoom: u8,
    strings: Vec<String>,
    vertices: Vec<RawVertex>,
}

/// Per-tile string table builder
#[derive(Default)]
struct Strings {
    table: Vec<String>,
    ids: FxHashMap<String, u32>,
}

impl Strings {
    fn id(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.ids.get(s) {
            return id;
        }
        let id = self.table.len() as u32;
        self.table.push(s.to_string());
        self.ids.insert(s.to_string(), id);
        id
    }
}

/// An arc as decoded from a tile, oriented away from its vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct TileArc {
    pub to: u32,
    pub to_tile: Tile,
    pub forward: bool,
    pub tags: TagsCollection,
    pub shape: Vec<Coordinate>,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileVertex {
    pub id: u32,
    pub coordinate: Coordinate,
    /// Only arcs towards higher vertex ids; every edge is stored once
    pub arcs: Vec<TileArc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileMeta {
    pub tile: Tile,
    pub offset: u64,
    pub length: u64,
}

pub struct TileSerializer;

impl TileSerializer {
    /// Write every vertex and edge of `source`, grouped by tile.
    pub fn serialize<W: Write>(
        source: &DynamicGraphRouterDataSource<LiveEdge>,
        mut writer: W,
        config: TileConfig,
    ) -> Result<()> {
        let mut by_tile: BTreeMap<Tile, Vec<u32>> = BTreeMap::new();
        for vertex in 1..=source.vertex_count() {
            if let Some(coordinate) = source.vertex(vertex) {
                by_tile
                    .entry(Tile::at(coordinate, config.zoom))
                    .or_default()
                    .push(vertex);
            }
        }

        let mut payloads = Vec::with_capacity(by_tile.len());
        for (tile, vertices) in &by_tile {
            let raw = Self::encode_tile(source, *tile, vertices, config.zoom);
            let mut bytes = bincode::serialize(&raw)
                .map_err(|e| Error::InvalidData(format!("encoding tile: {e}")))?;
            if config.compress {
                bytes = zstd::encode_all(&bytes[..], ZSTD_LEVEL)?;
            }
            debug!(x = tile.x, y = tile.y, vertices = vertices.len(), bytes = bytes.len(), "encoded tile");
            payloads.push((*tile, bytes));
        }

        let meta_end = HEADER_SIZE + META_SIZE * payloads.len() as u64;
        writer.write_all(&[config.compress as u8])?;
        writer.write_all(&(payloads.len() as u32).to_le_bytes())?;
        writer.write_all(&meta_end.to_le_bytes())?;

        let mut offset = meta_end;
        for (tile, bytes) in &payloads {
            writer.write_all(&tile.x.to_le_bytes())?;
            writer.write_all(&tile.y.to_le_bytes())?;
            writer.write_all(&offset.to_le_bytes())?;
            writer.write_all(&(bytes.len() as u64).to_le_bytes())?;
            offset += bytes.len() as u64;
        }
        for (_, bytes) in &payloads {
            writer.write_all(bytes)?;
        }
        writer.flush()?;

        info!(
            tiles = payloads.len(),
            vertices = source.vertex_count(),
            bytes = offset,
            compressed = config.compress,
            "wrote tiles"
        );
        Ok(())
    }

    /// Rebuild a graph from tiles. Restrictions are not part of the format.
    pub fn deserialize<R: Read + Seek>(reader: R) -> Result<DynamicGraphRouterDataSource<LiveEdge>> {
        let mut tiles = TileReader::open(reader)?;
        let metas: Vec<TileMeta> = tiles.metas().to_vec();

        let mut vertices = Vec::new();
        for meta in &metas {
            vertices.extend(tiles.load(meta.tile)?.unwrap_or_default());
        }
        vertices.sort_by_key(|v| v.id);

        let mut source = DynamicGraphRouterDataSource::with_size_estimate(vertices.len())?;
        for (idx, vertex) in vertices.iter().enumerate() {
            let id = source
                .graph_mut()
                .add_vertex(vertex.coordinate.lat, vertex.coordinate.lon)?;
            if id != vertex.id || id as usize != idx + 1 {
                return Err(Error::InvalidData(format!(
                    "vertex ids are not dense: expected {}, found {}",
                    idx + 1,
                    vertex.id
                )));
            }
        }

        for vertex in &vertices {
            for arc in &vertex.arcs {
                let tags = source.tags_mut().add(&arc.tags)?;
                source.graph_mut().add_edge(
                    vertex.id,
                    arc.to,
                    LiveEdge::new(arc.forward, tags, arc.distance),
                    Some(arc.shape.clone()),
                )?;
            }
        }

        info!(vertices = vertices.len(), tiles = metas.len(), "read tiles");
        Ok(source)
    }

    pub fn write_file<P: AsRef<Path>>(
        path: P,
        source: &DynamicGraphRouterDataSource<LiveEdge>,
        config: TileConfig,
    ) -> Result<()> {
        Self::serialize(source, BufWriter::new(File::create(path)?), config)
    }

    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<DynamicGraphRouterDataSource<LiveEdge>> {
        Self::deserialize(BufReader::new(File::open(path)?))
    }

    fn encode_tile(
        source: &DynamicGraphRouterDataSource<LiveEdge>,
        tile: Tile,
        vertices: &[u32],
        zoom: u8,
    ) -> RawTile {
        let mut strings = Strings::default();
        let mut raw = Vec::with_capacity(vertices.len());

        for &vertex in vertices {
            let coordinate = source.vertex(vertex).unwrap_or_default();
            let (lat, lon) = tile.quantize(zoom, coordinate);

            let mut arcs = Vec::new();
            for (to, edge) in source.edges(vertex) {
                if to < vertex {
                    continue;
                }
                let tags = source
                    .edge_tags(&edge)
                    .iter()
                    .map(|(k, v)| (strings.id(k), strings.id(v)))
                    .collect();
                arcs.push(RawArc {
                    to,
                    to_tile: Tile::at(source.vertex(to).unwrap_or_default(), zoom),
                    forward: edge.forward(),
                    tags,
                    shape: source.edge_shape(vertex, to).unwrap_or_default(),
                    distance: edge.distance,
                });
            }
            raw.push(RawVertex {
                id: vertex,
                lat,
                lon,
                arcs,
            });
        }

        RawTile {
            zoom,
            strings: strings.table,
            vertices: raw,
        }
    }
}

/// Random access to the tiles of a stream; only the header and metadata are
/// read up front.
pub struct TileReader<R> {
    reader: R,
    compressed: bool,
    metas: Vec<TileMeta>,
    index: FxHashMap<Tile, usize>,
}

impl<R: Read + Seek> TileReader<R> {
    pub fn open(mut reader: R) -> Result<Self> {
        let stream_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; HEADER_SIZE as usize];
        reader.read_exact(&mut header)?;

        let compressed = match header[0] {
            0 => false,
            1 => true,
            flag => return Err(Error::InvalidData(format!("bad compression flag {flag}"))),
        };
        let count = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as u64;
        let meta_end = u64::from_le_bytes(header[5..13].try_into().map_err(|_| {
            Error::InvalidData("truncated header".into())
        })?);
        if meta_end != HEADER_SIZE + count * META_SIZE {
            return Err(Error::InvalidData(format!(
                "metadata end {meta_end} does not match {count} tiles"
            )));
        }
        if meta_end > stream_len {
            return Err(Error::InvalidData(format!(
                "{count} tiles need {meta_end} bytes of metadata, stream has {stream_len}"
            )));
        }

        let mut metas = Vec::with_capacity(count as usize);
        let mut index = FxHashMap::default();
        let mut record = [0u8; META_SIZE as usize];
        for i in 0..count as usize {
            reader.read_exact(&mut record)?;
            let word = |at: usize| u32::from_le_bytes([record[at], record[at + 1], record[at + 2], record[at + 3]]);
            let dword = |at: usize| u64::from(word(at)) | (u64::from(word(at + 4)) << 32);
            let meta = TileMeta {
                tile: Tile {
                    x: word(0),
                    y: word(4),
                },
                offset: dword(8),
                length: dword(16),
            };
            let in_stream = meta
                .offset
                .checked_add(meta.length)
                .is_some_and(|end| meta.offset >= meta_end && end <= stream_len);
            if !in_stream {
                return Err(Error::InvalidData(format!(
                    "tile {}/{} at {}+{} lies outside the {stream_len} byte stream",
                    meta.tile.x, meta.tile.y, meta.offset, meta.length
                )));
            }
            index.insert(meta.tile, i);
            metas.push(meta);
        }

        Ok(Self {
            reader,
            compressed,
            metas,
            index,
        })
    }

    pub fn metas(&self) -> &[TileMeta] {
        &self.metas
    }

    pub fn contains(&self, tile: Tile) -> bool {
        self.index.contains_key(&tile)
    }

    /// Decode one tile, `None` if the stream has no such tile.
    pub fn load(&mut self, tile: Tile) -> Result<Option<Vec<TileVertex>>> {
        let Some(&i) = self.index.get(&tile) else {
            return Ok(None);
        };
        let meta = self.metas[i];
        self.reader.seek(SeekFrom::Start(meta.offset))?;
        let mut bytes = Vec::new();
        (&mut self.reader).take(meta.length).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != meta.length {
            return Err(Error::InvalidData(format!("tile {}/{} is truncated", tile.x, tile.y)));
        }
        if self.compressed {
            bytes = zstd::decode_all(&bytes[..])?;
        }

        let raw: RawTile = bincode::deserialize(&bytes)
            .map_err(|e| Error::InvalidData(format!("decoding tile {}/{}: {e}", tile.x, tile.y)))?;
        let string = |idx: u32| {
            raw.strings
                .get(idx as usize)
                .cloned()
                .ok_or_else(|| Error::InvalidData(format!("string index {idx} out of range")))
        };

        let mut vertices = Vec::with_capacity(raw.vertices.len());
        for vertex in &raw.vertices {
            let mut arcs = Vec::with_capacity(vertex.arcs.len());
            for arc in &vertex.arcs {
                let mut tags = TagsCollection::new();
                for &(k, v) in &arc.tags {
                    tags.insert(string(k)?, string(v)?);
                }
                arcs.push(TileArc {
                    to: arc.to,
                    to_tile: arc.to_tile,
                    forward: arc.forward,
                    tags,
                    shape: arc.shape.clone(),
                    distance: arc.distance,
                });
            }
            vertices.push(TileVertex {
                id: vertex.id,
                coordinate: tile.dequantize(raw.zoom, vertex.lat, vertex.lon),
                arcs,
            });
        }
        Ok(Some(vertices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_tile_of_brussels() {
        // Grand-Place, Brussels
        let tile = Tile::at(Coordinate::new(50.8467, 4.3525), 13);
        assert_eq!(tile, Tile { x: 4195, y: 2748 });

        let (top, left, bottom, right) = tile.bounds(13);
        assert!(top > 50.8467 && bottom < 50.8467);
        assert!(left < 4.3525 && right > 4.3525);
    }

    #[test]
    fn test_quantization_error_is_small() {
        let coordinate = Coordinate::new(50.8467, 4.3525);
        let tile = Tile::at(coordinate, 13);
        let (lat, lon) = tile.quantize(13, coordinate);
        let back = tile.dequantize(13, lat, lon);
        assert!(coordinate.distance_to(&back) < 1.0);
    }

    #[test]
    fn test_reader_loads_single_tile() {
        let mut source = DynamicGraphRouterDataSource::with_size_estimate(3).unwrap();
        let tags: TagsCollection = [("highway", "primary")].into_iter().collect();
        let tag_id = source.tags_mut().add(&tags).unwrap();
        let g = source.graph_mut();
        g.add_vertex(50.8467, 4.3525).unwrap();
        g.add_vertex(50.8470, 4.3530).unwrap();
        g.add_vertex(48.8566, 2.3522).unwrap();
        g.add_edge(1, 2, LiveEdge::new(true, tag_id, 48.0), None).unwrap();
        g.add_edge(3, 2, LiveEdge::new(true, tag_id, 300_000.0), None).unwrap();

        let mut bytes = Vec::new();
        TileSerializer::serialize(&source, &mut bytes, TileConfig::default()).unwrap();

        let mut reader = TileReader::open(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.metas().len(), 2);

        let brussels = Tile::at(Coordinate::new(50.8467, 4.3525), 13);
        let vertices = reader.load(brussels).unwrap().unwrap();
        assert_eq!(vertices.iter().map(|v| v.id).collect::<Vec<_>>(), vec![1, 2]);

        // 1 -> 2 is stored on 1; 2 -> 3 is stored on 2, reversed
        assert_eq!(vertices[0].arcs.len(), 1);
        assert!(vertices[0].arcs[0].forward);
        assert_eq!(vertices[0].arcs[0].tags.get("highway"), Some("primary"));
        assert_eq!(vertices[1].arcs.len(), 1);
        assert_eq!(vertices[1].arcs[0].to, 3);
        assert!(!vertices[1].arcs[0].forward);

        assert!(reader.load(Tile { x: 0, y: 0 }).unwrap().is_none());
    }

    #[test]
    fn test_rejects_bad_header() {
        let bytes = vec![7u8; 13];
        assert!(matches!(
            TileReader::open(Cursor::new(bytes)),
            Err(Error::InvalidData(_))
        ));
    }

    fn header(count: u32) -> Vec<u8> {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&count.to_le_bytes());
        bytes.extend_from_slice(&(HEADER_SIZE + u64::from(count) * META_SIZE).to_le_bytes());
        bytes
    }

    fn meta_record(x: u32, y: u32, offset: u64, length: u64) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&x.to_le_bytes());
        bytes.extend_from_slice(&y.to_le_bytes());
        bytes.extend_from_slice(&offset.to_le_bytes());
        bytes.extend_from_slice(&length.to_le_bytes());
        bytes
    }

    #[test]
    fn test_rejects_tile_past_end_of_stream() {
        let mut bytes = header(1);
        bytes.extend(meta_record(4195, 2748, HEADER_SIZE + META_SIZE, 1 << 46));
        bytes.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            TileReader::open(Cursor::new(bytes)),
            Err(Error::InvalidData(_))
        ));

        // offset + length wraps around
        let mut bytes = header(1);
        bytes.extend(meta_record(4195, 2748, u64::MAX, 2));
        assert!(matches!(
            TileReader::open(Cursor::new(bytes)),
            Err(Error::InvalidData(_))
        ));

        // payload pointing back into the metadata
        let mut bytes = header(1);
        bytes.extend(meta_record(4195, 2748, 0, 4));
        assert!(matches!(
            TileReader::open(Cursor::new(bytes)),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_metadata() {
        let mut bytes = header(u32::MAX);
        bytes.extend(meta_record(4195, 2748, 0, 0));
        assert!(matches!(
            TileReader::open(Cursor::new(bytes)),
            Err(Error::InvalidData(_))
        ));
    }
}
