use std::collections::HashMap;

use glam::Vec3;

use super::tile::BoundingBox;

/// A single triangle corner.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: Option<[f32; 3]>,
    pub uv: Option<[f32; 2]>,
}

impl Vertex {
    pub fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn position_f64(&self) -> [f64; 3] {
        [
            self.position[0] as f64,
            self.position[1] as f64,
            self.position[2] as f64,
        ]
    }
}

/// The unit of geometry handed over by a geometry source.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Triangle {
    pub vertices: [Vertex; 3],
    /// Material reference from the source model, if any.
    pub material: Option<u32>,
}

impl Triangle {
    pub fn from_positions(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> Self {
        Self {
            vertices: [Vertex::at(a), Vertex::at(b), Vertex::at(c)],
            material: None,
        }
    }

    fn points(&self) -> [Vec3; 3] {
        self.vertices.map(|v| Vec3::from_array(v.position))
    }

    /// Unnormalized face normal (cross product of the two leading edges).
    pub fn cross(&self) -> Vec3 {
        let [a, b, c] = self.points();
        (b - a).cross(c - a)
    }

    /// Unit face normal, or +Z for degenerate triangles.
    pub fn face_normal(&self) -> [f32; 3] {
        self.cross().try_normalize().unwrap_or(Vec3::Z).to_array()
    }

    pub fn area(&self) -> f64 {
        self.cross().length() as f64 * 0.5
    }

    /// Edge lengths |ab|, |bc|, |ca|.
    pub fn edge_lengths(&self) -> [f32; 3] {
        let [a, b, c] = self.points();
        [a.distance(b), b.distance(c), c.distance(a)]
    }

    /// Interior angles in degrees at a, b, c.
    pub fn angles_deg(&self) -> [f32; 3] {
        let [a, b, c] = self.points();
        let angle = |p: Vec3, q: Vec3, r: Vec3| {
            let u = q - p;
            let v = r - p;
            if u.length_squared() == 0.0 || v.length_squared() == 0.0 {
                0.0
            } else {
                u.angle_between(v).to_degrees()
            }
        };
        [angle(a, b, c), angle(b, c, a), angle(c, a, b)]
    }

    pub fn centroid(&self) -> [f64; 3] {
        let [a, b, c] = self.vertices.map(|v| v.position_f64());
        [
            (a[0] + b[0] + c[0]) / 3.0,
            (a[1] + b[1] + c[1]) / 3.0,
            (a[2] + b[2] + c[2]) / 3.0,
        ]
    }

    pub fn bounds(&self) -> BoundingBox {
        let mut bb = BoundingBox::empty();
        for v in &self.vertices {
            bb.include_point(v.position_f64());
        }
        bb
    }

    /// Copy of this triangle with every position shifted by `offset`.
    pub fn translated(&self, offset: [f64; 3]) -> Triangle {
        let mut out = *self;
        for v in &mut out.vertices {
            for i in 0..3 {
                v.position[i] = (v.position[i] as f64 + offset[i]) as f32;
            }
        }
        out
    }
}

/// Bounds of a triangle list; `BoundingBox::empty()` for no triangles.
pub fn triangles_bounds(triangles: &[Triangle]) -> BoundingBox {
    triangles
        .iter()
        .fold(BoundingBox::empty(), |acc, t| acc.merge(&t.bounds()))
}

/// Flat-buffer mesh used for decimation and container encoding.
///
/// All buffers are contiguous `Vec<f32>` / `Vec<u32>` for zero-copy interop
/// with meshoptimizer and glTF writers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexedMesh {
    /// Interleaved positions: [x, y, z, x, y, z, ...]
    pub positions: Vec<f32>,
    /// Interleaved normals: [nx, ny, nz, ...] or empty
    pub normals: Vec<f32>,
    /// Interleaved UVs: [u, v, u, v, ...] or empty
    pub uvs: Vec<f32>,
    /// Triangle indices into the vertex buffers
    pub indices: Vec<u32>,
    /// One entry per triangle, or empty when no triangle has a material
    pub materials: Vec<Option<u32>>,
}

/// Bit-exact vertex key used for deduplication.
#[derive(Hash, Eq, PartialEq)]
struct VertexKey([u32; 8]);

impl VertexKey {
    fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self([
            position[0].to_bits(),
            position[1].to_bits(),
            position[2].to_bits(),
            normal[0].to_bits(),
            normal[1].to_bits(),
            normal[2].to_bits(),
            uv[0].to_bits(),
            uv[1].to_bits(),
        ])
    }
}

impl IndexedMesh {
    /// Build a deduplicated indexed mesh from a triangle list.
    ///
    /// Missing normals are filled with the face normal so that every vertex
    /// carries one; UVs are kept only if every vertex has them.
    pub fn from_triangles(triangles: &[Triangle]) -> Self {
        let with_uvs = !triangles.is_empty()
            && triangles
                .iter()
                .all(|t| t.vertices.iter().all(|v| v.uv.is_some()));
        let with_materials = triangles.iter().any(|t| t.material.is_some());

        let mut mesh = IndexedMesh::default();
        let mut dedup: HashMap<VertexKey, u32> = HashMap::new();

        for tri in triangles {
            let face = tri.face_normal();
            for v in &tri.vertices {
                let normal = v.normal.unwrap_or(face);
                let uv = if with_uvs { v.uv.unwrap_or_default() } else { [0.0; 2] };
                let key = VertexKey::new(v.position, normal, uv);
                let next = mesh.vertex_count() as u32;
                let idx = *dedup.entry(key).or_insert_with(|| {
                    mesh.positions.extend_from_slice(&v.position);
                    mesh.normals.extend_from_slice(&normal);
                    if with_uvs {
                        mesh.uvs.extend_from_slice(&uv);
                    }
                    next
                });
                mesh.indices.push(idx);
            }
            if with_materials {
                mesh.materials.push(tri.material);
            }
        }

        mesh
    }

    /// Expand back into a triangle list.
    pub fn to_triangles(&self) -> Vec<Triangle> {
        self.indices
            .chunks_exact(3)
            .enumerate()
            .map(|(t, idx)| {
                let vertices = [idx[0], idx[1], idx[2]].map(|i| self.vertex(i as usize));
                Triangle {
                    vertices,
                    material: self.materials.get(t).copied().flatten(),
                }
            })
            .collect()
    }

    fn vertex(&self, i: usize) -> Vertex {
        Vertex {
            position: [
                self.positions[i * 3],
                self.positions[i * 3 + 1],
                self.positions[i * 3 + 2],
            ],
            normal: self
                .has_normals()
                .then(|| [self.normals[i * 3], self.normals[i * 3 + 1], self.normals[i * 3 + 2]]),
            uv: self
                .has_uvs()
                .then(|| [self.uvs[i * 2], self.uvs[i * 2 + 1]]),
        }
    }

    /// Number of vertices (positions / 3).
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    /// Number of triangles (indices / 3).
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Whether normals are present.
    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty()
    }

    /// Whether UV coordinates are present.
    pub fn has_uvs(&self) -> bool {
        !self.uvs.is_empty()
    }

    /// Whether the mesh contains no geometry.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> Vec<Triangle> {
        vec![
            Triangle::from_positions([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0]),
            Triangle::from_positions([0.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]),
        ]
    }

    #[test]
    fn empty_mesh() {
        let mesh = IndexedMesh::from_triangles(&[]);
        assert!(mesh.is_empty());
        assert_eq!(mesh.vertex_count(), 0);
        assert_eq!(mesh.triangle_count(), 0);
        assert!(!mesh.has_normals());
        assert!(!mesh.has_uvs());
    }

    #[test]
    fn single_triangle_indices() {
        let tri = Triangle::from_positions([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
        let mesh = IndexedMesh::from_triangles(&[tri]);
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert_eq!(mesh.normals[0..3], [0.0, 0.0, 1.0]);
    }

    #[test]
    fn quad_shares_vertices() {
        let mesh = IndexedMesh::from_triangles(&quad());
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.triangle_count(), 2);
    }

    #[test]
    fn triangles_roundtrip() {
        let mut tris = quad();
        tris[1].material = Some(3);
        let mesh = IndexedMesh::from_triangles(&tris);
        let back = mesh.to_triangles();
        assert_eq!(back.len(), 2);
        for (a, b) in tris.iter().zip(&back) {
            for i in 0..3 {
                assert_eq!(a.vertices[i].position, b.vertices[i].position);
            }
            assert_eq!(a.material, b.material);
        }
    }

    #[test]
    fn triangle_measures() {
        let tri = Triangle::from_positions([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
        assert!((tri.area() - 0.5).abs() < 1e-6);
        let angles = tri.angles_deg();
        assert!((angles[0] - 90.0).abs() < 1e-3);
        assert!((angles[1] - 45.0).abs() < 1e-3);
        let bb = tri.bounds();
        assert_eq!(bb.min, [0.0, 0.0, 0.0]);
        assert_eq!(bb.max, [1.0, 1.0, 0.0]);
    }

    #[test]
    fn bounds_of_triangle_list() {
        let bb = triangles_bounds(&quad());
        assert_eq!(bb.max, [1.0, 1.0, 0.0]);
        assert!(triangles_bounds(&[]).is_empty());
    }
}
