use meshopt::{self, SimplifyOptions, VertexDataAdapter};
use tracing::debug;

use crate::error::{Result, TilerError};
use crate::types::{IndexedMesh, Triangle};

/// Compression level from which index buffers are vertex-cache optimised.
pub const VERTEX_CACHE_LEVEL: u8 = 1;
/// Compression level from which vertex buffers are reordered for fetch.
pub const VERTEX_FETCH_LEVEL: u8 = 5;

/// Reduces a triangle list to roughly `ratio` of its triangles.
///
/// Implementations must treat `ratio >= 1.0` as a passthrough and must be
/// callable from several threads at once.
pub trait Decimator: Send + Sync {
    fn simplify(&self, triangles: &[Triangle], ratio: f32) -> Result<Vec<Triangle>>;
}

/// meshoptimizer-backed decimation.
#[derive(Debug, Clone, Copy)]
pub struct MeshoptDecimator {
    /// Keep open borders in place so neighbouring tiles stay stitched.
    pub lock_border: bool,
    /// Relative error budget handed to meshopt.
    pub target_error: f32,
}

impl Default for MeshoptDecimator {
    fn default() -> Self {
        Self {
            lock_border: true,
            target_error: 0.01,
        }
    }
}

impl Decimator for MeshoptDecimator {
    fn simplify(&self, triangles: &[Triangle], ratio: f32) -> Result<Vec<Triangle>> {
        if ratio >= 1.0 || triangles.is_empty() {
            return Ok(triangles.to_vec());
        }
        let mesh = IndexedMesh::from_triangles(triangles);
        let simplified = simplify_mesh(&mesh, ratio.max(0.0), self.lock_border, self.target_error)?;

        // Indices are rebuilt by meshopt, so only a uniform material survives.
        let material = triangles[0].material;
        let uniform = triangles.iter().all(|t| t.material == material);
        let mut out = simplified.to_triangles();
        for t in &mut out {
            t.material = if uniform { material } else { None };
        }
        debug!(
            before = triangles.len(),
            after = out.len(),
            ratio,
            "Decimated triangle list"
        );
        Ok(out)
    }
}

/// Simplify a mesh to `target_ratio` of its original index count.
///
/// Only indices change; vertex attribute arrays are compacted to remove
/// unreferenced vertices via `compact_mesh`.
pub fn simplify_mesh(
    mesh: &IndexedMesh,
    target_ratio: f32,
    lock_border: bool,
    target_error: f32,
) -> Result<IndexedMesh> {
    if mesh.is_empty() {
        return Ok(IndexedMesh::default());
    }

    let positions_bytes = meshopt::typed_to_bytes(&mesh.positions);
    let adapter = VertexDataAdapter::new(positions_bytes, 12, 0)
        .map_err(|e| TilerError::Encoding(format!("invalid position buffer: {e}")))?;

    let target_count = (mesh.indices.len() as f64 * target_ratio as f64) as usize;
    let target_count = (target_count / 3) * 3;

    let options = if lock_border {
        SimplifyOptions::LockBorder
    } else {
        SimplifyOptions::None
    };

    let new_indices = meshopt::simplify(
        &mesh.indices,
        &adapter,
        target_count,
        target_error,
        options,
        None,
    );
    let new_indices = meshopt::optimize_vertex_cache(&new_indices, mesh.vertex_count());

    Ok(compact_mesh(new_indices, mesh))
}

/// Apply the buffer optimisations enabled by `compression_level`.
///
/// Level 0 leaves the mesh untouched. From `VERTEX_CACHE_LEVEL` the index
/// buffer is reordered for the post-transform cache; from
/// `VERTEX_FETCH_LEVEL` the vertex buffers are also reordered by first use.
/// Triangle materials follow their triangles only at level 0.
pub fn optimize_for_level(mesh: IndexedMesh, compression_level: u8) -> IndexedMesh {
    if compression_level < VERTEX_CACHE_LEVEL || mesh.indices.is_empty() {
        return mesh;
    }
    let indices = meshopt::optimize_vertex_cache(&mesh.indices, mesh.vertex_count());
    if compression_level >= VERTEX_FETCH_LEVEL {
        compact_mesh(indices, &mesh)
    } else {
        IndexedMesh {
            indices,
            materials: Vec::new(),
            ..mesh
        }
    }
}

/// Remap indices to remove unreferenced vertices and rebuild attribute arrays.
///
/// Vertices are renumbered in order of first reference, which is also the
/// order that minimises vertex fetch.
pub fn compact_mesh(indices: Vec<u32>, source: &IndexedMesh) -> IndexedMesh {
    if indices.is_empty() {
        return IndexedMesh::default();
    }

    let mut remap = vec![u32::MAX; source.vertex_count()];
    let mut order: Vec<usize> = Vec::new();
    for &idx in &indices {
        let i = idx as usize;
        if remap[i] == u32::MAX {
            remap[i] = order.len() as u32;
            order.push(i);
        }
    }

    let mut out = IndexedMesh {
        indices: indices.iter().map(|&i| remap[i as usize]).collect(),
        positions: Vec::with_capacity(order.len() * 3),
        ..Default::default()
    };
    for &old in &order {
        out.positions.extend_from_slice(&source.positions[old * 3..old * 3 + 3]);
        if source.has_normals() {
            out.normals.extend_from_slice(&source.normals[old * 3..old * 3 + 3]);
        }
        if source.has_uvs() {
            out.uvs.extend_from_slice(&source.uvs[old * 2..old * 2 + 2]);
        }
    }
    out
}
