//! Loop subdivision for triangle meshes.
//!
//! Each pass splits every triangle into four: one new (odd) vertex per
//! edge, with the 3/8-1/8 interior stencil, and every original (even)
//! vertex relaxed by the valence-weighted Loop rule. Boundary edges use
//! the crease stencils so open meshes keep their rims.

use std::collections::HashMap;

use glam::Vec3;

use crate::mesh::{MeshData, MeshVertex};

/// Apply `levels` passes of Loop subdivision. `levels == 0` is the
/// identity. Normals are recomputed once at the end.
pub fn subdivide(mesh: MeshData, levels: u32) -> MeshData {
    if levels == 0 {
        return mesh;
    }
    let mut out = mesh;
    for pass in 0..levels {
        out = subdivide_once(&out);
        log::debug!(
            "Subdivision pass {}: {} vertices, {} triangles",
            pass + 1,
            out.vertices.len(),
            out.triangle_count()
        );
    }
    out.recompute_normals();
    out
}

/// Undirected edge key: sorted index pair.
#[inline]
fn edge_key(a: u32, b: u32) -> (u32, u32) {
    if a < b { (a, b) } else { (b, a) }
}

/// Per-edge adjacency collected in one sweep over the faces.
#[derive(Default)]
struct EdgeInfo {
    /// Vertices opposite this edge, one per adjacent face (1 = boundary).
    opposites: Vec<u32>,
}

fn subdivide_once(mesh: &MeshData) -> MeshData {
    let old_count = mesh.vertices.len();
    let position = |i: u32| Vec3::from(mesh.vertices[i as usize].position);

    // Edge map and vertex adjacency from one face sweep.
    let mut edges: HashMap<(u32, u32), EdgeInfo> = HashMap::new();
    let mut neighbors: Vec<Vec<u32>> = vec![Vec::new(); old_count];
    for tri in mesh.indices.chunks_exact(3) {
        let [a, b, c] = [tri[0], tri[1], tri[2]];
        for (u, v, opposite) in [(a, b, c), (b, c, a), (c, a, b)] {
            let info = edges.entry(edge_key(u, v)).or_default();
            if info.opposites.is_empty() {
                // First face touching this edge also registers adjacency.
                neighbors[u as usize].push(v);
                neighbors[v as usize].push(u);
            }
            info.opposites.push(opposite);
        }
    }

    // Boundary neighbors per vertex (endpoints of its boundary edges).
    let mut rim_neighbors: Vec<Vec<u32>> = vec![Vec::new(); old_count];
    for (&(u, v), info) in &edges {
        if info.opposites.len() == 1 {
            rim_neighbors[u as usize].push(v);
            rim_neighbors[v as usize].push(u);
        }
    }

    let mut vertices: Vec<MeshVertex> = Vec::with_capacity(old_count + edges.len());

    // Even vertices: Loop relaxation (Warren weights), crease rule on rims.
    for (i, ring) in neighbors.iter().enumerate() {
        let v = position(i as u32);
        let rim = &rim_neighbors[i];
        let relaxed = if !rim.is_empty() {
            if rim.len() == 2 {
                0.75 * v + 0.125 * (position(rim[0]) + position(rim[1]))
            } else {
                // Non-manifold rim corner: leave it pinned.
                v
            }
        } else if ring.len() < 3 {
            v
        } else {
            let n = ring.len() as f32;
            let beta = if ring.len() == 3 {
                3.0 / 16.0
            } else {
                3.0 / (8.0 * n)
            };
            let ring_sum: Vec3 = ring.iter().map(|&j| position(j)).sum();
            (1.0 - n * beta) * v + beta * ring_sum
        };
        vertices.push(MeshVertex::new(relaxed.to_array(), [0.0; 3]));
    }

    // Odd vertices: one per edge.
    let mut midpoint_of: HashMap<(u32, u32), u32> = HashMap::with_capacity(edges.len());
    for (&(u, v), info) in &edges {
        let ends = position(u) + position(v);
        let p = match info.opposites.as_slice() {
            [left, right] => 0.375 * ends + 0.125 * (position(*left) + position(*right)),
            // Boundary or non-manifold edge: plain midpoint.
            _ => 0.5 * ends,
        };
        let idx = vertices.len() as u32;
        vertices.push(MeshVertex::new(p.to_array(), [0.0; 3]));
        midpoint_of.insert((u, v), idx);
    }

    // 1 -> 4 face split.
    let mut indices = Vec::with_capacity(mesh.indices.len() * 4);
    for tri in mesh.indices.chunks_exact(3) {
        let [a, b, c] = [tri[0], tri[1], tri[2]];
        let ab = midpoint_of[&edge_key(a, b)];
        let bc = midpoint_of[&edge_key(b, c)];
        let ca = midpoint_of[&edge_key(c, a)];
        indices.extend_from_slice(&[a, ab, ca, ab, b, bc, ca, bc, c, ab, bc, ca]);
    }

    MeshData::new(vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tetrahedron() -> MeshData {
        let corners = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ];
        let mut mesh = MeshData::new(
            corners.map(|p| MeshVertex::new(p, [0.0; 3])).to_vec(),
            vec![0, 1, 2, 0, 3, 1, 0, 2, 3, 1, 3, 2],
        );
        mesh.recompute_normals();
        mesh
    }

    fn single_triangle() -> MeshData {
        MeshData::new(
            vec![
                MeshVertex::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
                MeshVertex::new([1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
                MeshVertex::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
            ],
            vec![0, 1, 2],
        )
    }

    #[test]
    fn level_zero_is_identity() {
        let mesh = tetrahedron();
        assert_eq!(subdivide(mesh.clone(), 0), mesh);
    }

    #[test]
    fn one_pass_quadruples_faces() {
        let out = subdivide(tetrahedron(), 1);
        assert_eq!(out.triangle_count(), 16);
        // V + E = 4 + 6 new vertices.
        assert_eq!(out.vertices.len(), 10);
        assert!(out.is_valid());
    }

    #[test]
    fn growth_is_exponential_in_levels() {
        let out = subdivide(tetrahedron(), 3);
        assert_eq!(out.triangle_count(), 4 * 4usize.pow(3));
    }

    #[test]
    fn closed_mesh_shrinks_towards_centroid() {
        let before = tetrahedron().bounding_radius();
        let after = subdivide(tetrahedron(), 2).bounding_radius();
        assert!(after < before);
        assert!(after > 0.25 * before);
    }

    #[test]
    fn boundary_midpoints_stay_on_the_rim() {
        let out = subdivide(single_triangle(), 1);
        assert_eq!(out.triangle_count(), 4);
        assert_eq!(out.vertices.len(), 6);
        // Every edge of a lone triangle is boundary, so each odd vertex
        // is the exact edge midpoint.
        let has = |p: [f32; 3]| {
            out.vertices
                .iter()
                .any(|v| Vec3::from(v.position).distance(Vec3::from(p)) < 1e-6)
        };
        assert!(has([0.5, 0.0, 0.0]));
        assert!(has([0.5, 0.5, 0.0]));
        assert!(has([0.0, 0.5, 0.0]));
    }

    #[test]
    fn boundary_corners_use_the_crease_rule() {
        let out = subdivide(single_triangle(), 1);
        // Corner (1,0,0): 3/4 self + 1/8 each rim neighbor (0,0,0), (0,1,0).
        let expected = Vec3::new(0.75, 0.125, 0.0);
        assert!(
            out.vertices
                .iter()
                .any(|v| Vec3::from(v.position).distance(expected) < 1e-6)
        );
    }
}
