//! Mesh-only container (binary glTF 2.0).
//!
//! Layout of the binary chunk: positions (f32x3 per vertex), normals
//! (f32x3 per vertex), then indices (u16 or u32), padded with zeros to a
//! 4-byte boundary. Positions are stored relative to an origin so that
//! large coordinates keep float32 precision.

use std::borrow::Cow;
use std::collections::BTreeMap;

use gltf::binary::Glb;
use gltf_json::Index;
use gltf_json::accessor::{ComponentType, GenericComponentType, Type as AccessorType};
use gltf_json::buffer::Target;
use gltf_json::mesh::{Mode, Primitive, Semantic};
use gltf_json::validation::{Checked, USize64};
use serde_json::Value;

use super::{DecodedTile, TileMetadata};
use crate::config::OutputFormat;
use crate::error::{Result, TilerError};
use crate::types::{IndexedMesh, Triangle, Vertex};

/// Container magic, `glTF` read as a little-endian u32.
pub const GLB_MAGIC: u32 = 0x4654_6C67;
pub const GLB_VERSION: u32 = 2;
pub const CHUNK_JSON: u32 = 0x4E4F_534A;
pub const CHUNK_BIN: u32 = 0x004E_4942;

/// Largest vertex count addressable with u16 indices.
const U16_INDEX_LIMIT: usize = 65_535;

const GENERATOR: &str = "lod-tiler";

/// Standalone mesh container with absolute positions.
///
/// The declared tile box and coordinates travel in `asset.extras`. Tiles
/// without geometry carry only the JSON chunk.
pub fn encode_glb(mesh: &IndexedMesh, meta: &TileMetadata) -> Result<Vec<u8>> {
    build_glb(mesh, [0.0; 3], Some(meta.to_extras()))
}

pub fn decode_glb(bytes: &[u8]) -> Result<DecodedTile> {
    let read = read_glb(bytes, [0.0; 3])?;
    let meta = read.extras.as_ref().and_then(TileMetadata::from_extras);
    let bounds = match &meta {
        Some(m) => m.bounds,
        None => crate::types::triangles_bounds(&read.triangles),
    };
    Ok(DecodedTile {
        format: OutputFormat::Glb,
        coord: meta.as_ref().map(|m| m.coord),
        name: meta.as_ref().map(|m| m.coord.name()),
        geometric_error: meta.as_ref().map(|m| m.geometric_error),
        bounds,
        rtc_center: None,
        vertex_count: read.vertex_count,
        indices: read.indices,
        triangles: read.triangles,
    })
}

/// Append `data` as little-endian f32s.
fn push_f32s(bin: &mut Vec<u8>, data: &[f32]) {
    if cfg!(target_endian = "little") {
        bin.extend_from_slice(bytemuck::cast_slice(data));
    } else {
        for v in data {
            bin.extend_from_slice(&v.to_le_bytes());
        }
    }
}

fn pad_to_four(bin: &mut Vec<u8>, byte: u8) {
    while bin.len() % 4 != 0 {
        bin.push(byte);
    }
}

fn push_view(
    root: &mut gltf_json::Root,
    buffer: Index<gltf_json::Buffer>,
    offset: usize,
    length: usize,
    target: Target,
) -> Index<gltf_json::buffer::View> {
    root.push(gltf_json::buffer::View {
        buffer,
        byte_length: USize64::from(length),
        byte_offset: Some(USize64::from(offset)),
        byte_stride: None,
        name: None,
        target: Some(Checked::Valid(target)),
        extensions: Default::default(),
        extras: Default::default(),
    })
}

fn push_accessor(
    root: &mut gltf_json::Root,
    view: Index<gltf_json::buffer::View>,
    count: usize,
    component: ComponentType,
    type_: AccessorType,
    bounds: Option<([f32; 3], [f32; 3])>,
) -> Index<gltf_json::Accessor> {
    root.push(gltf_json::Accessor {
        buffer_view: Some(view),
        byte_offset: Some(USize64(0)),
        count: USize64::from(count),
        component_type: Checked::Valid(GenericComponentType(component)),
        type_: Checked::Valid(type_),
        min: bounds.map(|b| serde_json::json!(b.0)),
        max: bounds.map(|b| serde_json::json!(b.1)),
        name: None,
        normalized: false,
        sparse: None,
        extensions: Default::default(),
        extras: Default::default(),
    })
}

/// Serialize `mesh` with positions shifted by `-origin`.
///
/// An empty mesh produces a container with a single mesh-less node, no
/// buffer and no binary chunk: a glTF buffer needs `byteLength >= 1`, so a
/// zero-length BIN chunk would have nothing valid to back it.
pub(crate) fn build_glb(
    mesh: &IndexedMesh,
    origin: [f64; 3],
    extras: Option<Value>,
) -> Result<Vec<u8>> {
    let extras = extras
        .map(|v| serde_json::value::to_raw_value(&v))
        .transpose()?;
    let mut root = gltf_json::Root {
        asset: gltf_json::Asset {
            version: "2.0".into(),
            generator: Some(GENERATOR.into()),
            extras,
            ..Default::default()
        },
        ..Default::default()
    };

    let mut bin: Vec<u8> = Vec::new();
    let node = if mesh.indices.is_empty() {
        root.push(gltf_json::Node::default())
    } else {
        let buffer = Index::new(0);
        let vertex_count = mesh.vertex_count();

        // --- Positions ---
        let relative: Vec<f32> = mesh
            .positions
            .chunks_exact(3)
            .flat_map(|p| (0..3).map(move |i| (p[i] as f64 - origin[i]) as f32))
            .collect();
        let bounds = position_bounds(&relative);
        let offset = bin.len();
        push_f32s(&mut bin, &relative);
        let view = push_view(&mut root, buffer, offset, bin.len() - offset, Target::ArrayBuffer);
        let positions = push_accessor(
            &mut root,
            view,
            vertex_count,
            ComponentType::F32,
            AccessorType::Vec3,
            Some(bounds),
        );

        // --- Normals ---
        let normals = if mesh.has_normals() {
            Cow::Borrowed(mesh.normals.as_slice())
        } else {
            Cow::Owned(vertex_normals(mesh))
        };
        let offset = bin.len();
        push_f32s(&mut bin, &normals);
        let view = push_view(&mut root, buffer, offset, bin.len() - offset, Target::ArrayBuffer);
        let normals = push_accessor(
            &mut root,
            view,
            vertex_count,
            ComponentType::F32,
            AccessorType::Vec3,
            None,
        );

        // --- Indices ---
        let use_u16 = vertex_count <= U16_INDEX_LIMIT;
        let offset = bin.len();
        if use_u16 {
            for &i in &mesh.indices {
                bin.extend_from_slice(&(i as u16).to_le_bytes());
            }
        } else {
            for &i in &mesh.indices {
                bin.extend_from_slice(&i.to_le_bytes());
            }
        }
        let view = push_view(
            &mut root,
            buffer,
            offset,
            bin.len() - offset,
            Target::ElementArrayBuffer,
        );
        pad_to_four(&mut bin, 0);
        let indices = push_accessor(
            &mut root,
            view,
            mesh.indices.len(),
            if use_u16 {
                ComponentType::U16
            } else {
                ComponentType::U32
            },
            AccessorType::Scalar,
            None,
        );

        let mut attributes = BTreeMap::new();
        attributes.insert(Checked::Valid(Semantic::Positions), positions);
        attributes.insert(Checked::Valid(Semantic::Normals), normals);

        let mesh_idx = root.push(gltf_json::Mesh {
            primitives: vec![Primitive {
                attributes,
                indices: Some(indices),
                material: None,
                mode: Checked::Valid(Mode::Triangles),
                targets: None,
                extensions: Default::default(),
                extras: Default::default(),
            }],
            weights: None,
            name: None,
            extensions: Default::default(),
            extras: Default::default(),
        });

        root.push(gltf_json::Buffer {
            byte_length: USize64::from(bin.len()),
            uri: None,
            name: None,
            extensions: Default::default(),
            extras: Default::default(),
        });

        root.push(gltf_json::Node {
            mesh: Some(mesh_idx),
            ..Default::default()
        })
    };

    let scene = root.push(gltf_json::Scene {
        nodes: vec![node],
        name: None,
        extensions: Default::default(),
        extras: Default::default(),
    });
    root.scene = Some(scene);

    let json = gltf_json::serialize::to_string(&root)
        .map_err(|e| TilerError::Encoding(format!("glTF JSON serialization failed: {e}")))?;
    let mut json = json.into_bytes();
    while json.len() % 4 != 0 {
        json.push(b' ');
    }

    let length = 12 + 8 + json.len() + if bin.is_empty() { 0 } else { 8 + bin.len() };
    let glb = Glb {
        header: gltf::binary::Header {
            magic: *b"glTF",
            version: GLB_VERSION,
            length: u32::try_from(length)
                .map_err(|_| TilerError::Encoding(format!("container too large: {length} bytes")))?,
        },
        json: Cow::Owned(json),
        bin: (!bin.is_empty()).then_some(Cow::Owned(bin)),
    };

    glb.to_vec()
        .map_err(|e| TilerError::Encoding(format!("GLB serialization failed: {e}")))
}

/// Everything read back from a mesh container.
pub(crate) struct ReadGlb {
    pub triangles: Vec<Triangle>,
    pub indices: Vec<u32>,
    pub vertex_count: usize,
    pub extras: Option<Value>,
}

/// Parse a mesh container, adding `origin` back onto every position.
pub(crate) fn read_glb(bytes: &[u8], origin: [f64; 3]) -> Result<ReadGlb> {
    if bytes.len() < 12 || u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) != GLB_MAGIC
    {
        return Err(TilerError::Encoding("missing glTF container magic".into()));
    }
    let (doc, buffers, _images) = gltf::import_slice(bytes)
        .map_err(|e| TilerError::Encoding(format!("invalid mesh container: {e}")))?;

    let extras = doc
        .as_json()
        .asset
        .extras
        .as_ref()
        .and_then(|raw| serde_json::from_str::<Value>(raw.get()).ok());

    let mut triangles = Vec::new();
    let mut all_indices = Vec::new();
    let mut vertex_count = 0usize;

    for mesh in doc.meshes() {
        for prim in mesh.primitives() {
            let reader = prim.reader(|b| buffers.get(b.index()).map(|d| d.0.as_slice()));
            let positions: Vec<[f32; 3]> = reader
                .read_positions()
                .ok_or_else(|| TilerError::Encoding("primitive without POSITION".into()))?
                .map(|p| std::array::from_fn(|i| (p[i] as f64 + origin[i]) as f32))
                .collect();
            let normals: Option<Vec<[f32; 3]>> = reader.read_normals().map(|n| n.collect());
            let indices: Vec<u32> = match reader.read_indices() {
                Some(idx) => idx.into_u32().collect(),
                None => (0..positions.len() as u32).collect(),
            };

            let vertex = |i: u32| -> Result<Vertex> {
                let i = i as usize;
                let position = *positions.get(i).ok_or_else(|| {
                    TilerError::Encoding(format!("index {i} out of range ({} vertices)", positions.len()))
                })?;
                Ok(Vertex {
                    position,
                    normal: normals.as_ref().and_then(|n| n.get(i).copied()),
                    uv: None,
                })
            };
            for tri in indices.chunks_exact(3) {
                triangles.push(Triangle {
                    vertices: [vertex(tri[0])?, vertex(tri[1])?, vertex(tri[2])?],
                    material: None,
                });
            }
            all_indices.extend(indices.iter().map(|&i| i + vertex_count as u32));
            vertex_count += positions.len();
        }
    }

    Ok(ReadGlb {
        triangles,
        indices: all_indices,
        vertex_count,
        extras,
    })
}

/// Per-vertex normals averaged from the adjacent faces.
fn vertex_normals(mesh: &IndexedMesh) -> Vec<f32> {
    let mut acc = vec![glam::Vec3::ZERO; mesh.vertex_count()];
    let p = |i: u32| {
        let i = i as usize * 3;
        glam::Vec3::new(mesh.positions[i], mesh.positions[i + 1], mesh.positions[i + 2])
    };
    for tri in mesh.indices.chunks_exact(3) {
        let n = (p(tri[1]) - p(tri[0])).cross(p(tri[2]) - p(tri[0]));
        for &i in tri {
            acc[i as usize] += n;
        }
    }
    acc.into_iter()
        .flat_map(|n| n.try_normalize().unwrap_or(glam::Vec3::Z).to_array())
        .collect()
}

/// Min/max for a flat positions array (stride 3).
fn position_bounds(positions: &[f32]) -> ([f32; 3], [f32; 3]) {
    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for chunk in positions.chunks_exact(3) {
        for i in 0..3 {
            min[i] = min[i].min(chunk[i]);
            max[i] = max[i].max(chunk[i]);
        }
    }
    (min, max)
}
