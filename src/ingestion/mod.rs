pub mod gltf_loader;
pub mod obj_loader;
pub mod ply_loader;
pub mod stl_loader;
pub mod synthetic;

use std::path::Path;

use tracing::{debug, info};

use crate::error::{Result, TilerError};
use crate::types::{BoundingBox, Triangle, Vertex, triangles_bounds};

/// Triangles of one model plus their bounds.
#[derive(Debug, Clone, Default)]
pub struct GeometryData {
    pub triangles: Vec<Triangle>,
    pub bounds: BoundingBox,
}

impl GeometryData {
    pub fn new(triangles: Vec<Triangle>) -> Self {
        let bounds = if triangles.is_empty() {
            BoundingBox::new([0.0; 3], [0.0; 3])
        } else {
            triangles_bounds(&triangles)
        };
        Self { triangles, bounds }
    }
}

/// Supplies the geometry a task tiles.
pub trait GeometrySource: Send + Sync {
    /// Malformed input is `TilerError::Parse`.
    fn load(&self, source: &str) -> Result<GeometryData>;
}

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Obj,
    Gltf,
    Glb,
    Ply,
    Stl,
}

impl InputFormat {
    /// Detect format from file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "obj" => Ok(InputFormat::Obj),
            "gltf" => Ok(InputFormat::Gltf),
            "glb" => Ok(InputFormat::Glb),
            "ply" => Ok(InputFormat::Ply),
            "stl" => Ok(InputFormat::Stl),
            _ => Err(TilerError::Validation(format!(
                "Unsupported file format: .{ext}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InputFormat::Obj => "OBJ",
            InputFormat::Gltf => "glTF",
            InputFormat::Glb => "GLB",
            InputFormat::Ply => "PLY",
            InputFormat::Stl => "STL",
        }
    }
}

impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model files by extension, and `synthetic:` sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileGeometrySource;

impl GeometrySource for FileGeometrySource {
    fn load(&self, source: &str) -> Result<GeometryData> {
        if let Some(spec) = source.strip_prefix(synthetic::SCHEME) {
            let triangles = synthetic::generate(spec)?;
            info!(source, triangles = triangles.len(), "Generated synthetic geometry");
            return Ok(GeometryData::new(triangles));
        }

        let path = Path::new(source);
        if !path.exists() {
            return Err(TilerError::Validation(format!(
                "Input file not found: {}",
                path.display()
            )));
        }
        let format = InputFormat::from_path(path)?;
        info!(format = %format, path = %path.display(), "Detected input format");

        let triangles = match format {
            InputFormat::Obj => obj_loader::load_obj(path)?,
            InputFormat::Gltf | InputFormat::Glb => gltf_loader::load_gltf(path)?,
            InputFormat::Ply => ply_loader::load_ply(path)?,
            InputFormat::Stl => stl_loader::load_stl(path)?,
        };
        let data = GeometryData::new(triangles);
        debug!(
            triangles = data.triangles.len(),
            diagonal = data.bounds.diagonal(),
            "Ingestion stats"
        );
        Ok(data)
    }
}

/// Expand flat indexed buffers into triangles.
///
/// Normals and UVs are attached only when their buffers cover every vertex.
pub(crate) fn triangles_from_buffers(
    positions: &[f32],
    normals: &[f32],
    uvs: &[f32],
    indices: &[u32],
    material: Option<u32>,
    out: &mut Vec<Triangle>,
) -> Result<()> {
    let vertex_count = positions.len() / 3;
    let with_normals = normals.len() == positions.len();
    let with_uvs = uvs.len() / 2 == vertex_count && !uvs.is_empty();
    if indices.len() % 3 != 0 {
        return Err(TilerError::Parse(format!(
            "index count {} is not a multiple of 3",
            indices.len()
        )));
    }
    out.reserve(indices.len() / 3);
    for tri in indices.chunks_exact(3) {
        let mut vertices = [Vertex::default(); 3];
        for (slot, &i) in vertices.iter_mut().zip(tri) {
            let i = i as usize;
            if i >= vertex_count {
                return Err(TilerError::Parse(format!(
                    "vertex index {i} out of range ({vertex_count} vertices)"
                )));
            }
            *slot = Vertex {
                position: [positions[i * 3], positions[i * 3 + 1], positions[i * 3 + 2]],
                normal: with_normals.then(|| [normals[i * 3], normals[i * 3 + 1], normals[i * 3 + 2]]),
                uv: with_uvs.then(|| [uvs[i * 2], uvs[i * 2 + 1]]),
            };
        }
        if vertices
            .iter()
            .any(|v| v.position.iter().any(|c| !c.is_finite()))
        {
            return Err(TilerError::Parse("non-finite vertex position".into()));
        }
        out.push(Triangle { vertices, material });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_detection() {
        assert_eq!(InputFormat::from_path(Path::new("model.obj")).unwrap(), InputFormat::Obj);
        assert_eq!(InputFormat::from_path(Path::new("scene.gltf")).unwrap(), InputFormat::Gltf);
        assert_eq!(InputFormat::from_path(Path::new("scene.glb")).unwrap(), InputFormat::Glb);
        assert_eq!(InputFormat::from_path(Path::new("cloud.ply")).unwrap(), InputFormat::Ply);
        assert_eq!(InputFormat::from_path(Path::new("Part.STL")).unwrap(), InputFormat::Stl);
        assert!(InputFormat::from_path(Path::new("file.fbx")).is_err());
    }

    #[test]
    fn buffers_to_triangles() {
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0];
        let mut out = Vec::new();
        triangles_from_buffers(&positions, &[], &[], &[0, 1, 2, 1, 3, 2], Some(4), &mut out)
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].vertices[1].position, [1.0, 1.0, 0.0]);
        assert_eq!(out[0].material, Some(4));
        assert!(out[0].vertices[0].normal.is_none());
    }

    #[test]
    fn out_of_range_index_is_parse_error() {
        let mut out = Vec::new();
        let err = triangles_from_buffers(&[0.0; 9], &[], &[], &[0, 1, 3], None, &mut out)
            .unwrap_err();
        assert!(matches!(err, TilerError::Parse(_)));
    }

    #[test]
    fn missing_file_rejected() {
        let err = FileGeometrySource.load("/nonexistent/file.obj").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn synthetic_source_dispatch() {
        let data = FileGeometrySource
            .load("synthetic:terrain?size=10&resolution=4")
            .unwrap();
        assert_eq!(data.triangles.len(), 32);
        assert!(data.bounds.max[0] - data.bounds.min[0] > 9.9);
    }
}
