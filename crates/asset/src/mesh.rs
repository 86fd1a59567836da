//! CPU-side triangle mesh shared by the STL codec, the subdivision
//! pass, and the renderer's upload path.

use glam::Vec3;

/// Vertex with position and normal. Values are in object space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl MeshVertex {
    pub fn new(position: [f32; 3], normal: [f32; 3]) -> Self {
        Self { position, normal }
    }
}

/// Indexed triangle mesh with tightly-packed vertices.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<MeshVertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Returns `true` if both buffers are non-empty and the index
    /// buffer holds whole triangles.
    pub fn is_valid(&self) -> bool {
        !self.vertices.is_empty() && !self.indices.is_empty() && self.indices.len() % 3 == 0
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Distance from the origin to the farthest vertex. Used for
    /// sanity-logging camera framing.
    pub fn bounding_radius(&self) -> f32 {
        self.vertices
            .iter()
            .map(|v| Vec3::from(v.position).length())
            .fold(0.0_f32, f32::max)
    }

    /// Replace all vertex normals with area-weighted face normals.
    ///
    /// STL files often carry degenerate or facet-flat normals, and the
    /// subdivision pass invalidates whatever was there; both call this
    /// to get smooth per-vertex shading.
    pub fn recompute_normals(&mut self) {
        let mut acc = vec![Vec3::ZERO; self.vertices.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let p0 = Vec3::from(self.vertices[a].position);
            let p1 = Vec3::from(self.vertices[b].position);
            let p2 = Vec3::from(self.vertices[c].position);
            // Cross product length is 2x the face area, so summing the
            // raw cross products area-weights the result.
            let n = (p1 - p0).cross(p2 - p0);
            acc[a] += n;
            acc[b] += n;
            acc[c] += n;
        }
        for (vertex, sum) in self.vertices.iter_mut().zip(acc) {
            vertex.normal = sum.normalize_or(Vec3::Z).to_array();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_triangle() -> MeshData {
        MeshData::new(
            vec![
                MeshVertex::new([0.0, 0.0, 0.0], [0.0; 3]),
                MeshVertex::new([1.0, 0.0, 0.0], [0.0; 3]),
                MeshVertex::new([0.0, 1.0, 0.0], [0.0; 3]),
            ],
            vec![0, 1, 2],
        )
    }

    #[test]
    fn mesh_data_validity() {
        assert!(unit_triangle().is_valid());
        let ragged = MeshData::new(vec![MeshVertex::default()], vec![0, 1]);
        assert!(!ragged.is_valid());
    }

    #[test]
    fn recompute_normals_faces_up() {
        let mut mesh = unit_triangle();
        mesh.recompute_normals();
        for v in &mesh.vertices {
            assert_eq!(v.normal, [0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn bounding_radius_of_unit_triangle() {
        assert!((unit_triangle().bounding_radius() - 1.0).abs() < 1e-6);
    }
}
