//! Metadata-only tile: structure without geometry, for lightweight manifests.

use serde::{Deserialize, Serialize};

use super::{DecodedTile, TileMetadata};
use crate::config::OutputFormat;
use crate::error::{Result, TilerError};
use crate::types::{BoundingBox, IndexedMesh, TileCoord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonTile {
    asset: JsonAsset,
    tile: JsonTileKey,
    bounding_box: BoundingBox,
    geometric_error: f64,
    rtc_center: [f64; 3],
    triangle_count: usize,
    vertex_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct JsonAsset {
    version: String,
    generator: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct JsonTileKey {
    level: u32,
    x: u32,
    y: u32,
    z: u32,
    name: String,
}

pub fn encode_json_tile(mesh: &IndexedMesh, meta: &TileMetadata) -> Result<Vec<u8>> {
    let c = meta.coord;
    let doc = JsonTile {
        asset: JsonAsset {
            version: "1.0".into(),
            generator: "lod-tiler".into(),
        },
        tile: JsonTileKey {
            level: c.level,
            x: c.x,
            y: c.y,
            z: c.z,
            name: c.name(),
        },
        bounding_box: meta.bounds,
        geometric_error: meta.geometric_error,
        rtc_center: meta.bounds.center(),
        triangle_count: mesh.triangle_count(),
        vertex_count: mesh.vertex_count(),
    };
    Ok(serde_json::to_vec_pretty(&doc)?)
}

/// Decode a metadata tile. No geometry is recovered; `vertex_count` is the
/// declared count of the encoded mesh.
pub fn decode_json_tile(bytes: &[u8]) -> Result<DecodedTile> {
    let doc: JsonTile = serde_json::from_slice(bytes)
        .map_err(|e| TilerError::Encoding(format!("malformed metadata tile: {e}")))?;
    let t = doc.tile;
    Ok(DecodedTile {
        format: OutputFormat::Json,
        coord: Some(TileCoord::new(t.level, t.x, t.y, t.z)),
        name: Some(t.name),
        bounds: doc.bounding_box,
        geometric_error: Some(doc.geometric_error),
        rtc_center: Some(doc.rtc_center),
        triangles: Vec::new(),
        indices: Vec::new(),
        vertex_count: doc.vertex_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Triangle;
    use serde_json::Value;

    #[test]
    fn records_counts_and_box() {
        let mesh = IndexedMesh::from_triangles(&[Triangle::from_positions(
            [0.0, 0.0, 0.0],
            [2.0, 0.0, 0.0],
            [0.0, 2.0, 0.0],
        )]);
        let meta = TileMetadata {
            coord: TileCoord::new(1, 0, 1, 0),
            bounds: BoundingBox::new([0.0; 3], [2.0, 2.0, 2.0]),
            geometric_error: 1.5,
        };
        let bytes = encode_json_tile(&mesh, &meta).unwrap();
        let v: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["triangleCount"], 1);
        assert_eq!(v["vertexCount"], 3);
        assert_eq!(v["tile"]["name"], "tile_1_0_1_0");
        assert_eq!(v["rtcCenter"], serde_json::json!([1.0, 1.0, 1.0]));

        let tile = decode_json_tile(&bytes).unwrap();
        assert_eq!(tile.coord, Some(meta.coord));
        assert_eq!(tile.bounds, meta.bounds);
        assert_eq!(tile.geometric_error, Some(1.5));
        assert!(tile.triangles.is_empty());
        assert_eq!(tile.vertex_count, 3);
    }

    #[test]
    fn rejects_unrelated_json() {
        assert!(matches!(
            decode_json_tile(br#"{"hello": "world"}"#),
            Err(TilerError::Encoding(_))
        ));
    }
}
