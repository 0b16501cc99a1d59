use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Property};
use tracing::debug;

use super::triangles_from_buffers;
use crate::error::{Result, TilerError};
use crate::types::Triangle;

/// Load the faces of a PLY file. Point clouds without faces yield no triangles.
pub fn load_ply(path: &Path) -> Result<Vec<Triangle>> {
    let file = File::open(path).map_err(|e| TilerError::io(path.display().to_string(), e))?;
    let ply = Parser::<DefaultElement>::new()
        .read_ply(&mut BufReader::new(file))
        .map_err(|e| TilerError::Parse(format!("Failed to parse PLY: {e}")))?;

    let vertices = ply
        .payload
        .get("vertex")
        .ok_or_else(|| TilerError::Parse("PLY file missing 'vertex' element".into()))?;
    let with_normals = vertices.first().is_some_and(|v| v.contains_key("nx"));

    let mut positions = Vec::with_capacity(vertices.len() * 3);
    let mut normals = Vec::new();
    for vertex in vertices {
        positions.extend(vec3(vertex, ["x", "y", "z"])?);
        if with_normals {
            normals.extend(vec3(vertex, ["nx", "ny", "nz"])?);
        }
    }

    let faces = ply.payload.get("face").map(Vec::as_slice).unwrap_or_default();
    let mut indices = Vec::with_capacity(faces.len() * 3);
    for face in faces {
        let polygon = face_indices(face)?;
        // Fan around the first corner; faces with fewer than 3 corners vanish.
        for pair in polygon.get(1..).unwrap_or_default().windows(2) {
            indices.extend([polygon[0], pair[0], pair[1]]);
        }
    }
    debug!(
        vertices = vertices.len(),
        faces = faces.len(),
        triangles = indices.len() / 3,
        "Parsed PLY"
    );

    let mut triangles = Vec::with_capacity(indices.len() / 3);
    triangles_from_buffers(&positions, &normals, &[], &indices, None, &mut triangles)?;
    Ok(triangles)
}

fn vec3(element: &DefaultElement, keys: [&str; 3]) -> Result<[f32; 3]> {
    let mut out = [0.0f32; 3];
    for (slot, key) in out.iter_mut().zip(keys) {
        let prop = element
            .get(key)
            .ok_or_else(|| TilerError::Parse(format!("PLY vertex missing property '{key}'")))?;
        *slot = scalar(prop)
            .ok_or_else(|| TilerError::Parse(format!("PLY property '{key}' is not a scalar")))?
            as f32;
    }
    Ok(out)
}

fn scalar(prop: &Property) -> Option<f64> {
    Some(match *prop {
        Property::Float(v) => f64::from(v),
        Property::Double(v) => v,
        Property::Char(v) => f64::from(v),
        Property::UChar(v) => f64::from(v),
        Property::Short(v) => f64::from(v),
        Property::UShort(v) => f64::from(v),
        Property::Int(v) => f64::from(v),
        Property::UInt(v) => f64::from(v),
        _ => return None,
    })
}

/// Corner indices of one face, from `vertex_indices` or `vertex_index`.
fn face_indices(face: &DefaultElement) -> Result<Vec<u32>> {
    let prop = face
        .get("vertex_indices")
        .or_else(|| face.get("vertex_index"))
        .ok_or_else(|| TilerError::Parse("PLY face has no vertex index list".into()))?;

    let signed = |v: &[i64]| -> Result<Vec<u32>> {
        v.iter()
            .map(|&i| {
                u32::try_from(i)
                    .map_err(|_| TilerError::Parse(format!("PLY face index {i} out of range")))
            })
            .collect()
    };
    match prop {
        Property::ListChar(v) => signed(&v.iter().map(|&i| i64::from(i)).collect::<Vec<_>>()),
        Property::ListShort(v) => signed(&v.iter().map(|&i| i64::from(i)).collect::<Vec<_>>()),
        Property::ListInt(v) => signed(&v.iter().map(|&i| i64::from(i)).collect::<Vec<_>>()),
        Property::ListUChar(v) => Ok(v.iter().map(|&i| u32::from(i)).collect()),
        Property::ListUShort(v) => Ok(v.iter().map(|&i| u32::from(i)).collect()),
        Property::ListUInt(v) => Ok(v.clone()),
        _ => Err(TilerError::Parse("PLY face index list has an unsupported type".into())),
    }
}
