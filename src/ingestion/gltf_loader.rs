use std::path::Path;

use tracing::{debug, warn};

use super::triangles_from_buffers;
use crate::error::{Result, TilerError};
use crate::types::Triangle;

/// Load the triangle primitives of a glTF or GLB file.
pub fn load_gltf(path: &Path) -> Result<Vec<Triangle>> {
    let (document, buffers, _images) = gltf::import(path)
        .map_err(|e| TilerError::Parse(format!("Failed to load glTF: {e}")))?;

    debug!(
        meshes = document.meshes().len(),
        materials = document.materials().len(),
        "Loaded glTF document"
    );

    let mut triangles = Vec::new();
    for mesh in document.meshes() {
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                warn!(mesh = ?mesh.name(), mode = ?primitive.mode(), "Skipping non-triangle primitive");
                continue;
            }
            let material = primitive.material().index().map(|i| i as u32);
            extract_primitive(&primitive, &buffers, material, &mut triangles)?;
        }
    }
    Ok(triangles)
}

fn extract_primitive(
    primitive: &gltf::Primitive<'_>,
    buffers: &[gltf::buffer::Data],
    material: Option<u32>,
    out: &mut Vec<Triangle>,
) -> Result<()> {
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|d| &d[..]));

    let positions: Vec<f32> = reader
        .read_positions()
        .ok_or_else(|| TilerError::Parse("Primitive missing positions".into()))?
        .flatten()
        .collect();

    let normals: Vec<f32> = reader
        .read_normals()
        .map(|iter| iter.flatten().collect())
        .unwrap_or_default();

    let uvs: Vec<f32> = reader
        .read_tex_coords(0)
        .map(|iter| iter.into_f32().flatten().collect())
        .unwrap_or_default();

    // Non-indexed primitives list their vertices in order.
    let indices: Vec<u32> = match reader.read_indices() {
        Some(idx) => idx.into_u32().collect(),
        None => (0..(positions.len() / 3) as u32).collect(),
    };

    triangles_from_buffers(&positions, &normals, &uvs, &indices, material, out)
}
