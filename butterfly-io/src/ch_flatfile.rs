//! Flat file for contracted graphs
//!
//! ```text
//! u32     magic
//! u32     version string length, then the version string
//! u32     vertex count n
//! n x     f32 lat, f32 lon, u32 rank
//! blocks  u32 length + bincode Vec<FlatEdge>, up to 1000 edges each
//! u32     0, end of blocks
//! u64     CRC-64 of everything above
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use butterfly_common::{Error, Result};
use butterfly_routing::ch::{CHEdgeData, ChGraph};
use butterfly_routing::MemoryDynamicGraph;
use crc::{Crc, CRC_64_GO_ISO};
use serde::{Deserialize, Serialize};
use tracing::info;

const MAGIC: u32 = 0x4243_4846; // "BCHF"
const VERSION: &str = "CHedgeFlatfile.v1.0";
const BLOCK_SIZE: usize = 1000;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

/// One edge record, oriented from its lower vertex id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct FlatEdge {
    from: u32,
    to: u32,
    data: CHEdgeData,
}

/// Writer that checksums everything passing through it
struct ChecksumWriter<W> {
    inner: W,
    digest: crc::Digest<'static, u64>,
}

impl<W: Write> ChecksumWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            digest: CRC64.digest(),
        }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.digest.update(bytes);
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        let checksum = self.digest.finalize();
        self.inner.write_all(&checksum.to_le_bytes())?;
        self.inner.flush()?;
        Ok(())
    }
}

/// Cursor over a fully read, checksum-verified file body
struct Body<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Body<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| Error::InvalidData(format!("truncated at byte {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.u32()?))
    }
}

pub struct ChFlatfile;

impl ChFlatfile {
    pub fn write<W: Write>(ch: &ChGraph, writer: W) -> Result<()> {
        let mut out = ChecksumWriter::new(writer);
        out.put(&MAGIC.to_le_bytes())?;
        out.put(&(VERSION.len() as u32).to_le_bytes())?;
        out.put(VERSION.as_bytes())?;

        let count = ch.vertex_count();
        out.put(&count.to_le_bytes())?;
        for vertex in 1..=count {
            let coordinate = ch.vertex(vertex).unwrap_or_default();
            out.put(&coordinate.lat.to_le_bytes())?;
            out.put(&coordinate.lon.to_le_bytes())?;
            out.put(&ch.rank(vertex).to_le_bytes())?;
        }

        let mut block = Vec::with_capacity(BLOCK_SIZE);
        let mut edges = 0usize;
        for vertex in 1..=count {
            for (to, data) in ch.graph.edges(vertex) {
                if to <= vertex {
                    continue;
                }
                block.push(FlatEdge {
                    from: vertex,
                    to,
                    data,
                });
                if block.len() == BLOCK_SIZE {
                    edges += Self::write_block(&mut out, &block)?;
                    block.clear();
                }
            }
        }
        if !block.is_empty() {
            edges += Self::write_block(&mut out, &block)?;
        }
        out.put(&0u32.to_le_bytes())?;
        out.finish()?;

        info!(vertices = count, edges, "wrote contracted graph");
        Ok(())
    }

    fn write_block<W: Write>(out: &mut ChecksumWriter<W>, block: &[FlatEdge]) -> Result<usize> {
        let bytes = bincode::serialize(block)
            .map_err(|e| Error::InvalidData(format!("encoding edge block: {e}")))?;
        out.put(&(bytes.len() as u32).to_le_bytes())?;
        out.put(&bytes)?;
        Ok(block.len())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<ChGraph> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        if bytes.len() < 8 {
            return Err(Error::InvalidData("file too short".into()));
        }
        let (body, footer) = bytes.split_at(bytes.len() - 8);
        let expected = u64::from_le_bytes([
            footer[0], footer[1], footer[2], footer[3], footer[4], footer[5], footer[6], footer[7],
        ]);
        let actual = CRC64.checksum(body);
        if actual != expected {
            return Err(Error::InvalidData(format!(
                "checksum mismatch: expected {expected:016x}, got {actual:016x}"
            )));
        }

        let mut body = Body {
            bytes: body,
            pos: 0,
        };
        let magic = body.u32()?;
        if magic != MAGIC {
            return Err(Error::InvalidData(format!("bad magic {magic:08x}")));
        }
        let version_len = body.u32()? as usize;
        let version = body.take(version_len)?;
        if version != VERSION.as_bytes() {
            return Err(Error::InvalidData(format!(
                "unsupported version {}",
                String::from_utf8_lossy(version)
            )));
        }

        let count = body.u32()?;
        let mut graph = MemoryDynamicGraph::with_size_estimate(count as usize)?;
        let mut ranks = vec![0u32; count as usize + 1];
        for vertex in 1..=count {
            let lat = body.f32()?;
            let lon = body.f32()?;
            graph.add_vertex(lat, lon)?;
            ranks[vertex as usize] = body.u32()?;
        }

        let mut edges = 0usize;
        loop {
            let len = body.u32()? as usize;
            if len == 0 {
                break;
            }
            let block: Vec<FlatEdge> = bincode::deserialize(body.take(len)?)
                .map_err(|e| Error::InvalidData(format!("decoding edge block: {e}")))?;
            for edge in block {
                graph.add_edge(edge.from, edge.to, edge.data, None)?;
                edges += 1;
            }
        }

        info!(vertices = count, edges, "read contracted graph");
        Ok(ChGraph { graph, ranks })
    }

    pub fn write_file<P: AsRef<Path>>(path: P, ch: &ChGraph) -> Result<()> {
        Self::write(ch, BufWriter::new(File::create(path)?))
    }

    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<ChGraph> {
        Self::read(BufReader::new(File::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use butterfly_routing::ch::{ChConfig, ChPreprocessor};
    use butterfly_routing::routing::ShortestDistance;
    use butterfly_routing::{DynamicGraphRouterDataSource, LiveEdge};

    fn contracted() -> ChGraph {
        let mut source = DynamicGraphRouterDataSource::with_size_estimate(4).unwrap();
        let g = source.graph_mut();
        for i in 0..4 {
            g.add_vertex(51.0, 4.0 + i as f32 * 0.001).unwrap();
        }
        g.add_edge(1, 2, LiveEdge::new(true, 0, 70.0), None).unwrap();
        g.add_edge(2, 3, LiveEdge::new(true, 0, 70.0), None).unwrap();
        g.add_edge(3, 4, LiveEdge::new(true, 0, 70.0), None).unwrap();
        ChPreprocessor::build(&source, &ShortestDistance::default(), ChConfig::default()).unwrap()
    }

    #[test]
    fn test_file_keeps_ranks_and_arcs() {
        let ch = contracted();
        let mut bytes = Vec::new();
        ChFlatfile::write(&ch, &mut bytes).unwrap();
        let back = ChFlatfile::read(&bytes[..]).unwrap();

        assert_eq!(back.vertex_count(), 4);
        assert_eq!(back.ranks, ch.ranks);
        for v in 1..=4 {
            assert_eq!(back.vertex(v), ch.vertex(v));
            let mut expected: Vec<_> = ch.graph.edges(v).collect();
            let mut actual: Vec<_> = back.graph.edges(v).collect();
            expected.sort_by_key(|(w, _)| *w);
            actual.sort_by_key(|(w, _)| *w);
            assert_eq!(actual, expected);
        }
    }

    #[test]
    fn test_corruption_is_detected() {
        let mut bytes = Vec::new();
        ChFlatfile::write(&contracted(), &mut bytes).unwrap();
        bytes[10] ^= 0xff;
        assert!(matches!(
            ChFlatfile::read(&bytes[..]),
            Err(Error::InvalidData(msg)) if msg.contains("checksum")
        ));
    }
}
