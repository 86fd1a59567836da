//! STL codec: reads binary and ASCII STL, writes binary STL.
//!
//! Triangle soup is indexed on load by merging corner positions with
//! identical bit patterns, so downstream passes (subdivision, smooth
//! normals) see shared edges instead of disconnected facets.

use std::{
    collections::HashMap,
    fs::File,
    io::{Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow, bail};
use glam::Vec3;

use crate::mesh::{MeshData, MeshVertex};

const BINARY_HEADER_LEN: usize = 80;
const BINARY_TRIANGLE_LEN: usize = 50; // 12 f32 + u16 attribute

/// Load an STL mesh from a file path, auto-detecting binary vs ASCII.
pub fn load_stl_from_path(path: impl AsRef<Path>) -> Result<MeshData> {
    let path = path.as_ref();
    let mut file = File::open(path)
        .with_context(|| format!("Failed to open STL file: {}", path.display()))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read STL file: {}", path.display()))?;
    let mesh = load_stl_from_bytes(&bytes)
        .with_context(|| format!("Failed to parse STL file: {}", path.display()))?;
    log::info!(
        "Loaded {}: {} vertices, {} triangles, radius {:.1}",
        path.display(),
        mesh.vertices.len(),
        mesh.triangle_count(),
        mesh.bounding_radius()
    );
    Ok(mesh)
}

/// Load an STL mesh from a [`Read`] implementation.
pub fn load_stl_from_reader<R: Read>(mut reader: R) -> Result<MeshData> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .context("Failed to read STL stream")?;
    load_stl_from_bytes(&bytes)
}

/// Parse an in-memory STL blob (either flavor).
pub fn load_stl_from_bytes(bytes: &[u8]) -> Result<MeshData> {
    if looks_like_ascii(bytes) {
        let text = std::str::from_utf8(bytes).context("ASCII STL is not valid UTF-8")?;
        parse_ascii(text)
    } else {
        parse_binary(bytes)
    }
}

/// Write a mesh as binary STL to a file path.
pub fn save_stl_to_path(mesh: &MeshData, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create STL file: {}", path.display()))?;
    write_binary_stl(mesh, &mut file)
        .with_context(|| format!("Failed to write STL file: {}", path.display()))?;
    log::info!(
        "Wrote {}: {} triangles",
        path.display(),
        mesh.triangle_count()
    );
    Ok(())
}

/// Serialize a mesh as binary STL. Face normals are derived from the
/// winding; per-vertex normals are not representable in STL.
pub fn write_binary_stl<W: Write>(mesh: &MeshData, writer: &mut W) -> Result<()> {
    if !mesh.is_valid() {
        bail!("Refusing to write an empty or ragged mesh as STL");
    }
    let count = u32::try_from(mesh.triangle_count())
        .map_err(|_| anyhow!("Too many triangles for binary STL (>{})", u32::MAX))?;

    let mut header = [0u8; BINARY_HEADER_LEN];
    let tag = b"celview binary stl";
    header[..tag.len()].copy_from_slice(tag);
    writer.write_all(&header)?;
    writer.write_all(&count.to_le_bytes())?;

    for tri in mesh.indices.chunks_exact(3) {
        let p0 = Vec3::from(mesh.vertices[tri[0] as usize].position);
        let p1 = Vec3::from(mesh.vertices[tri[1] as usize].position);
        let p2 = Vec3::from(mesh.vertices[tri[2] as usize].position);
        let n = (p1 - p0).cross(p2 - p0).normalize_or_zero();
        for v in [n, p0, p1, p2] {
            for f in v.to_array() {
                writer.write_all(&f.to_le_bytes())?;
            }
        }
        writer.write_all(&0u16.to_le_bytes())?; // attribute byte count
    }
    Ok(())
}

/// Binary STL files may also begin with "solid", so the textual check
/// requires a `facet` keyword early in the file as well.
fn looks_like_ascii(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(512)];
    head.starts_with(b"solid")
        && std::str::from_utf8(head)
            .map(|s| s.contains("facet"))
            .unwrap_or(false)
}

fn parse_binary(bytes: &[u8]) -> Result<MeshData> {
    if bytes.len() < BINARY_HEADER_LEN + 4 {
        bail!("Binary STL truncated: {} bytes", bytes.len());
    }
    let count = u32::from_le_bytes(
        bytes[BINARY_HEADER_LEN..BINARY_HEADER_LEN + 4]
            .try_into()
            .expect("4-byte slice"),
    ) as usize;
    let expected = BINARY_HEADER_LEN + 4 + count * BINARY_TRIANGLE_LEN;
    if bytes.len() < expected {
        bail!(
            "Binary STL truncated: header promises {} triangles ({} bytes), file has {}",
            count,
            expected,
            bytes.len()
        );
    }

    let mut builder = IndexedBuilder::with_capacity(count);
    let mut offset = BINARY_HEADER_LEN + 4;
    for _ in 0..count {
        // Skip the stored facet normal; normals are recomputed below.
        let mut corners = [[0.0f32; 3]; 3];
        for (c, corner) in corners.iter_mut().enumerate() {
            let base = offset + 12 + c * 12;
            for (axis, value) in corner.iter_mut().enumerate() {
                let at = base + axis * 4;
                *value = f32::from_le_bytes(bytes[at..at + 4].try_into().expect("4-byte slice"));
            }
        }
        builder.push_triangle(corners)?;
        offset += BINARY_TRIANGLE_LEN;
    }
    builder.finish()
}

fn parse_ascii(text: &str) -> Result<MeshData> {
    let mut builder = IndexedBuilder::with_capacity(0);
    let mut pending: Vec<[f32; 3]> = Vec::with_capacity(3);

    for (line_no, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        let mut parts = trimmed.split_whitespace();
        match parts.next() {
            Some("vertex") => {
                let x = parse_f32(parts.next(), line_no, "x coordinate")?;
                let y = parse_f32(parts.next(), line_no, "y coordinate")?;
                let z = parse_f32(parts.next(), line_no, "z coordinate")?;
                pending.push([x, y, z]);
            }
            Some("endfacet") => {
                if pending.len() != 3 {
                    bail!(
                        "Facet ending on line {} has {} vertices, expected 3",
                        line_no + 1,
                        pending.len()
                    );
                }
                builder.push_triangle([pending[0], pending[1], pending[2]])?;
                pending.clear();
            }
            // solid/facet/outer/endloop/endsolid carry nothing we need.
            _ => {}
        }
    }

    if !pending.is_empty() {
        bail!("ASCII STL ended mid-facet ({} dangling vertices)", pending.len());
    }
    builder.finish()
}

fn parse_f32(value: Option<&str>, line_no: usize, what: &str) -> Result<f32> {
    let token = value.ok_or_else(|| anyhow!("Missing {} on line {}", what, line_no + 1))?;
    token
        .parse::<f32>()
        .with_context(|| format!("Failed to parse {} on line {}", what, line_no + 1))
}

/// Accumulates triangle soup into an indexed mesh, merging corners
/// whose positions match bit-for-bit.
struct IndexedBuilder {
    unique: HashMap<[u32; 3], u32>,
    vertices: Vec<MeshVertex>,
    indices: Vec<u32>,
}

impl IndexedBuilder {
    fn with_capacity(triangles: usize) -> Self {
        Self {
            unique: HashMap::with_capacity(triangles),
            vertices: Vec::with_capacity(triangles),
            indices: Vec::with_capacity(triangles * 3),
        }
    }

    fn push_triangle(&mut self, corners: [[f32; 3]; 3]) -> Result<()> {
        for position in corners {
            let key = position.map(f32::to_bits);
            let index = match self.unique.get(&key) {
                Some(&idx) => idx,
                None => {
                    let idx = u32::try_from(self.vertices.len())
                        .map_err(|_| anyhow!("Too many vertices in STL (>{})", u32::MAX))?;
                    self.vertices.push(MeshVertex::new(position, [0.0; 3]));
                    self.unique.insert(key, idx);
                    idx
                }
            };
            self.indices.push(index);
        }
        Ok(())
    }

    fn finish(self) -> Result<MeshData> {
        let mut mesh = MeshData::new(self.vertices, self.indices);
        if !mesh.is_valid() {
            bail!("STL contained no triangles");
        }
        mesh.recompute_normals();
        Ok(mesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASCII_TETRA: &str = r#"solid tetra
        facet normal 0 0 -1
          outer loop
            vertex 0 0 0
            vertex 1 0 0
            vertex 0 1 0
          endloop
        endfacet
        facet normal 0 -1 0
          outer loop
            vertex 0 0 0
            vertex 0 0 1
            vertex 1 0 0
          endloop
        endfacet
        facet normal -1 0 0
          outer loop
            vertex 0 0 0
            vertex 0 1 0
            vertex 0 0 1
          endloop
        endfacet
        facet normal 1 1 1
          outer loop
            vertex 1 0 0
            vertex 0 0 1
            vertex 0 1 0
          endloop
        endfacet
    endsolid tetra
    "#;

    #[test]
    fn parse_ascii_tetrahedron_merges_corners() {
        let mesh = load_stl_from_bytes(ASCII_TETRA.as_bytes()).expect("parse tetra");
        assert_eq!(mesh.triangle_count(), 4);
        // 12 soup corners collapse to 4 shared vertices.
        assert_eq!(mesh.vertices.len(), 4);
        assert!(mesh.is_valid());
    }

    #[test]
    fn binary_output_parses_back() {
        let mesh = load_stl_from_bytes(ASCII_TETRA.as_bytes()).expect("parse tetra");
        let mut blob = Vec::new();
        write_binary_stl(&mesh, &mut blob).expect("serialize");
        assert_eq!(
            blob.len(),
            BINARY_HEADER_LEN + 4 + mesh.triangle_count() * BINARY_TRIANGLE_LEN
        );
        let reread = load_stl_from_bytes(&blob).expect("reparse");
        assert_eq!(reread.triangle_count(), mesh.triangle_count());
        assert_eq!(reread.vertices.len(), mesh.vertices.len());
    }

    #[test]
    fn truncated_binary_is_rejected() {
        let mut blob = vec![0u8; BINARY_HEADER_LEN + 4];
        blob[BINARY_HEADER_LEN] = 7; // promises 7 triangles, provides none
        assert!(load_stl_from_bytes(&blob).is_err());
    }

    #[test]
    fn dangling_ascii_facet_is_rejected() {
        let src = "solid x\nfacet normal 0 0 1\nouter loop\nvertex 0 0 0\nvertex 1 0 0\n";
        assert!(load_stl_from_bytes(src.as_bytes()).is_err());
    }

    #[test]
    fn empty_solid_is_rejected() {
        assert!(load_stl_from_bytes(b"solid empty facet\nendsolid empty\n").is_err());
    }
}
