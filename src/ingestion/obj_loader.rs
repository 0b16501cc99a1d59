use std::path::Path;

use tracing::debug;

use super::triangles_from_buffers;
use crate::error::{Result, TilerError};
use crate::types::Triangle;

/// Load an OBJ file into a triangle list. Material libraries are ignored;
/// each triangle keeps its material id.
pub fn load_obj(path: &Path) -> Result<Vec<Triangle>> {
    let (models, _materials) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS)
        .map_err(|e| TilerError::Parse(format!("Failed to load OBJ: {e}")))?;

    debug!(model_count = models.len(), "Loaded OBJ models");

    let mut triangles = Vec::new();
    for model in models {
        convert_mesh(&model.mesh, &mut triangles)?;
    }
    Ok(triangles)
}

fn convert_mesh(mesh: &tobj::Mesh, out: &mut Vec<Triangle>) -> Result<()> {
    // UV V-flip: OBJ uses bottom-left origin, glTF uses top-left
    let uvs: Vec<f32> = mesh
        .texcoords
        .chunks_exact(2)
        .flat_map(|uv| [uv[0], 1.0 - uv[1]])
        .collect();
    let material = mesh.material_id.map(|m| m as u32);
    triangles_from_buffers(&mesh.positions, &mesh.normals, &uvs, &mesh.indices, material, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn convert_mesh_uv_vflip() {
        let mesh = tobj::Mesh {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            normals: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            texcoords: vec![0.0, 0.0, 1.0, 0.3, 0.5, 1.0],
            indices: vec![0, 1, 2],
            vertex_color: vec![],
            face_arities: vec![],
            texcoord_indices: vec![],
            normal_indices: vec![],
            material_id: Some(0),
        };

        let mut tris = Vec::new();
        convert_mesh(&mesh, &mut tris).unwrap();
        assert_eq!(tris.len(), 1);
        let v = tris[0].vertices;
        assert_eq!(v[0].normal, Some([0.0, 0.0, 1.0]));
        assert!((v[0].uv.unwrap()[1] - 1.0).abs() < f32::EPSILON);
        assert!((v[1].uv.unwrap()[1] - 0.7).abs() < 1e-6);
        assert_eq!(tris[0].material, Some(0));
    }

    #[test]
    fn loads_quad_as_two_triangles() {
        let mut file = tempfile::Builder::new().suffix(".obj").tempfile().unwrap();
        writeln!(file, "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4").unwrap();
        let tris = load_obj(file.path()).unwrap();
        assert_eq!(tris.len(), 2);
    }
}
