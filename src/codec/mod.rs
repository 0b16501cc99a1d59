//! Tile containers: batched (`b3dm`), mesh-only (`glb`) and metadata-only
//! (`json`). Every encoder has a matching decoder so written tiles can be
//! inspected and verified.

pub mod b3dm;
pub mod glb;
pub mod json;

use serde_json::{Value, json};

use crate::config::OutputFormat;
use crate::error::{Result, TilerError};
use crate::tiling::simplifier::optimize_for_level;
use crate::types::{BoundingBox, IndexedMesh, TileCoord, TileDescriptor, Triangle};

pub use b3dm::{B3DM_MAGIC, decode_b3dm, encode_b3dm};
pub use glb::{GLB_MAGIC, decode_glb, encode_glb};
pub use json::{decode_json_tile, encode_json_tile};

/// Per-tile values written alongside the geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileMetadata {
    pub coord: TileCoord,
    /// Declared tile box, independent of the geometry inside it.
    pub bounds: BoundingBox,
    pub geometric_error: f64,
}

impl From<&TileDescriptor> for TileMetadata {
    fn from(d: &TileDescriptor) -> Self {
        Self {
            coord: d.coord,
            bounds: d.bounds,
            geometric_error: d.geometric_error,
        }
    }
}

impl TileMetadata {
    pub(crate) fn to_extras(&self) -> Value {
        json!({
            "boundingBox": self.bounds.to_array(),
            "geometricError": self.geometric_error,
            "tile": {
                "level": self.coord.level,
                "x": self.coord.x,
                "y": self.coord.y,
                "z": self.coord.z,
                "name": self.coord.name(),
            },
        })
    }

    pub(crate) fn from_extras(v: &Value) -> Option<Self> {
        let bounds: [f64; 6] = serde_json::from_value(v.get("boundingBox")?.clone()).ok()?;
        let tile = v.get("tile")?;
        let field = |k: &str| tile.get(k)?.as_u64().and_then(|n| u32::try_from(n).ok());
        Some(Self {
            coord: TileCoord::new(field("level")?, field("x")?, field("y")?, field("z")?),
            bounds: bounds.into(),
            geometric_error: v.get("geometricError").and_then(Value::as_f64).unwrap_or(0.0),
        })
    }
}

/// Everything recovered from an encoded tile.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTile {
    pub format: OutputFormat,
    pub coord: Option<TileCoord>,
    pub name: Option<String>,
    /// Declared box when the container carries one, else the geometry's.
    pub bounds: BoundingBox,
    pub geometric_error: Option<f64>,
    pub rtc_center: Option<[f64; 3]>,
    pub triangles: Vec<Triangle>,
    pub indices: Vec<u32>,
    pub vertex_count: usize,
}

/// Encode `triangles` as one tile in `format`.
///
/// Vertices are deduplicated by bit pattern and the buffers optimised as
/// `compression_level` asks.
pub fn encode_tile(
    format: OutputFormat,
    triangles: &[Triangle],
    meta: &TileMetadata,
    compression_level: u8,
) -> Result<Vec<u8>> {
    let mesh = optimize_for_level(IndexedMesh::from_triangles(triangles), compression_level);
    match format {
        OutputFormat::B3dm => encode_b3dm(&mesh, meta),
        OutputFormat::Glb => encode_glb(&mesh, meta),
        OutputFormat::Json => encode_json_tile(&mesh, meta),
    }
}

/// Detect the container from its leading bytes and decode it.
pub fn decode_tile(bytes: &[u8]) -> Result<DecodedTile> {
    match sniff_format(bytes) {
        Some(OutputFormat::B3dm) => decode_b3dm(bytes),
        Some(OutputFormat::Glb) => decode_glb(bytes),
        Some(OutputFormat::Json) => decode_json_tile(bytes),
        None => Err(TilerError::Encoding("unrecognised tile container".into())),
    }
}

pub fn sniff_format(bytes: &[u8]) -> Option<OutputFormat> {
    let head = bytes.get(0..4)?;
    if head == B3DM_MAGIC {
        Some(OutputFormat::B3dm)
    } else if head == b"glTF" {
        Some(OutputFormat::Glb)
    } else if bytes.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{') {
        Some(OutputFormat::Json)
    } else {
        None
    }
}

/// Serialize `value` and pad it with spaces until `offset + len` is a
/// multiple of `align`.
pub(crate) fn padded_json(value: &Value, offset: usize, align: usize) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(value)?;
    while (offset + bytes.len()) % align != 0 {
        bytes.push(b' ');
    }
    Ok(bytes)
}
