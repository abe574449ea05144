//! Compact binary serialization of the thresholded occupancy octree.
//!
//! Only the maximum-likelihood map is persisted: every stored leaf is
//! either free or occupied, intermediate log-odds are discarded.
//!
//! # File layout
//!
//! ```text
//! tag line    ASCII, newline-terminated ("VyomaOcTree v1")
//! resolution  f64, little-endian, 8 bytes
//! num_nodes   u32, little-endian, total allocated nodes
//! records     2 bytes per inner node, pre-order
//! ```
//!
//! Each record packs the node's eight child slots, two bits per slot,
//! slots 0..3 in the first byte and 4..7 in the second (slot `i` at bit
//! `2 * (i % 4)`):
//!
//! ```text
//! 00  child absent (unknown space)
//! 01  free leaf
//! 10  occupied leaf
//! 11  inner child; its own record follows in pre-order
//! ```
//!
//! Reads are strict: a foreign tag line, an unparsable resolution, a
//! truncated record, or a node-count mismatch all fail with
//! [`MapError::InvalidFile`], leaving the destination tree untouched.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{MapError, Result};
use crate::octree::{OccupancyOctree, OctreeNode};

/// Format tag written as the first line of every map file.
pub const FORMAT_TAG: &str = "VyomaOcTree v1";

const CHILD_ABSENT: u8 = 0b00;
const CHILD_FREE: u8 = 0b01;
const CHILD_OCCUPIED: u8 = 0b10;
const CHILD_INNER: u8 = 0b11;

impl OccupancyOctree {
    /// Write the maximum-likelihood map to a stream.
    ///
    /// Collapses the tree to its clamping bounds and prunes it first,
    /// which yields the smallest file; use
    /// [`write_binary_const`](Self::write_binary_const) to leave the tree
    /// unchanged.
    pub fn write_binary<W: Write>(&mut self, writer: W) -> Result<()> {
        self.to_max_likelihood();
        self.prune();
        self.write_binary_const(writer)
    }

    /// Write the thresholded map without modifying the tree.
    ///
    /// The file may be larger than after [`write_binary`](Self::write_binary)
    /// because unpruned or unthresholded regions keep their structure.
    pub fn write_binary_const<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(FORMAT_TAG.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.write_all(&self.resolution().to_le_bytes())?;

        let num_nodes = self.num_nodes() as u32;
        writer.write_all(&num_nodes.to_le_bytes())?;

        write_node(&mut writer, self.root(), self.occupancy_thres_log())?;
        log::debug!("wrote binary map: {num_nodes} nodes");
        Ok(())
    }

    /// Replace this tree's contents with a map read from a stream.
    ///
    /// The file's resolution is adopted; the sensor model is kept, and
    /// decoded leaves are set to the current clamping bounds. On any
    /// error the tree is left in its pre-read state.
    pub fn read_binary<R: BufRead>(&mut self, mut reader: R) -> Result<()> {
        let resolution = read_header(&mut reader)?;

        let mut num_nodes = [0u8; 4];
        read_exact(&mut reader, &mut num_nodes)?;
        let expected = u32::from_le_bytes(num_nodes) as usize;

        let mut root = OctreeNode::new();
        let mut created = 1usize; // the root
        read_node(
            &mut reader,
            &mut root,
            self.clamping_thres_min_log(),
            self.clamping_thres_max_log(),
            &mut created,
        )?;

        if created != expected {
            return Err(MapError::InvalidFile(format!(
                "node count mismatch: header says {expected}, stream encodes {created}"
            )));
        }

        log::debug!("read binary map: {created} nodes at resolution {resolution}");
        self.replace_contents(resolution, root);
        Ok(())
    }

    /// Write the maximum-likelihood map to a file. Mutates like
    /// [`write_binary`](Self::write_binary).
    pub fn write_binary_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_binary(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Read a map from a file, replacing this tree's contents.
    pub fn read_binary_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let file = File::open(path)?;
        self.read_binary(BufReader::new(file))
    }
}

/// `read_exact` with truncation reported as a file-format error.
fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            MapError::InvalidFile("stream ended inside the node records".to_string())
        } else {
            MapError::Io(e)
        }
    })
}

fn read_header<R: BufRead>(reader: &mut R) -> Result<f64> {
    let mut tag = Vec::new();
    reader
        .by_ref()
        .take(64)
        .read_until(b'\n', &mut tag)
        .map_err(MapError::Io)?;
    if tag.last() != Some(&b'\n') {
        return Err(MapError::InvalidFile(
            "missing newline-terminated format tag".to_string(),
        ));
    }
    tag.pop();
    if tag != FORMAT_TAG.as_bytes() {
        return Err(MapError::InvalidFile(format!(
            "unknown format tag {:?}",
            String::from_utf8_lossy(&tag)
        )));
    }

    let mut resolution = [0u8; 8];
    read_exact(reader, &mut resolution)?;
    let resolution = f64::from_le_bytes(resolution);
    if !resolution.is_finite() || resolution <= 0.0 {
        return Err(MapError::InvalidFile(format!(
            "invalid resolution {resolution}"
        )));
    }
    Ok(resolution)
}

fn write_node<W: Write>(writer: &mut W, node: &OctreeNode, occ_thres: f32) -> Result<()> {
    let mut record = [0u8; 2];
    for i in 0..8 {
        let code = match node.child(i) {
            None => CHILD_ABSENT,
            Some(child) if child.has_children() => CHILD_INNER,
            Some(child) if child.log_odds() >= occ_thres => CHILD_OCCUPIED,
            Some(_) => CHILD_FREE,
        };
        record[i / 4] |= code << ((i % 4) * 2);
    }
    writer.write_all(&record)?;

    for i in 0..8 {
        if let Some(child) = node.child(i) {
            if child.has_children() {
                write_node(writer, child, occ_thres)?;
            }
        }
    }
    Ok(())
}

fn read_node<R: Read>(
    reader: &mut R,
    node: &mut OctreeNode,
    clamp_min: f32,
    clamp_max: f32,
    created: &mut usize,
) -> Result<()> {
    let mut record = [0u8; 2];
    read_exact(reader, &mut record)?;

    for i in 0..8 {
        let code = (record[i / 4] >> ((i % 4) * 2)) & 0b11;
        if code == CHILD_ABSENT {
            continue;
        }
        *created += 1;
        let child = node.create_child(i);
        match code {
            CHILD_FREE => child.set_log_odds(clamp_min),
            CHILD_OCCUPIED => child.set_log_odds(clamp_max),
            _ => read_node(reader, child, clamp_min, clamp_max, created)?,
        }
    }
    Ok(())
}
