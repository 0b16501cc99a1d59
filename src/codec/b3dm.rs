//! Batched tile container.
//!
//! ```text
//! magic "tile" | version u32 = 1 | totalByteLength u32
//! featureTableJSONByteLength u32 | featureTableBinaryByteLength u32
//! batchTableJSONByteLength u32 | batchTableBinaryByteLength u32
//! featureTableJSON | featureTableBinary | batchTableJSON | batchTableBinary
//! embedded mesh container
//! ```
//!
//! All integers are little-endian. Both JSON sections are padded with
//! spaces so they end on an 8-byte boundary of the container.

use serde_json::{Value, json};

use super::glb::{build_glb, read_glb};
use super::{DecodedTile, TileMetadata, padded_json};
use crate::config::OutputFormat;
use crate::error::{Result, TilerError};
use crate::types::{IndexedMesh, TileCoord};

pub const B3DM_MAGIC: &[u8; 4] = b"tile";
pub const B3DM_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 28;

/// Section alignment measured from the start of the container.
const SECTION_ALIGN: usize = 8;

/// Encode `mesh` with positions relative to the tile centre (`RTC_CENTER`).
pub fn encode_b3dm(mesh: &IndexedMesh, meta: &TileMetadata) -> Result<Vec<u8>> {
    let center = meta.bounds.center();
    let feature_table = json!({
        "BATCH_LENGTH": 1,
        "RTC_CENTER": center,
        "extras": { "boundingBox": meta.bounds.to_array() },
    });
    let batch_table = json!({
        "id": [0],
        "level": [meta.coord.level],
        "x": [meta.coord.x],
        "y": [meta.coord.y],
        "z": [meta.coord.z],
        "name": [meta.coord.name()],
        "geometricError": [meta.geometric_error],
    });

    let ft_json = padded_json(&feature_table, HEADER_LEN, SECTION_ALIGN)?;
    let bt_json = padded_json(&batch_table, HEADER_LEN + ft_json.len(), SECTION_ALIGN)?;
    let glb = build_glb(mesh, center, None)?;

    let total = HEADER_LEN + ft_json.len() + bt_json.len() + glb.len();
    let as_u32 = |n: usize| {
        u32::try_from(n).map_err(|_| TilerError::Encoding(format!("tile too large: {n} bytes")))
    };

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(B3DM_MAGIC);
    for word in [
        B3DM_VERSION,
        as_u32(total)?,
        as_u32(ft_json.len())?,
        0,
        as_u32(bt_json.len())?,
        0,
    ] {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out.extend_from_slice(&ft_json);
    out.extend_from_slice(&bt_json);
    out.extend_from_slice(&glb);
    Ok(out)
}

/// Header fields of a batched container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct B3dmHeader {
    pub version: u32,
    pub total_length: u32,
    pub feature_table_json: u32,
    pub feature_table_bin: u32,
    pub batch_table_json: u32,
    pub batch_table_bin: u32,
}

pub fn read_header(bytes: &[u8]) -> Result<B3dmHeader> {
    if bytes.len() < HEADER_LEN || &bytes[0..4] != B3DM_MAGIC {
        return Err(TilerError::Encoding("missing tile container magic".into()));
    }
    let word = |i: usize| {
        let o = 4 + i * 4;
        u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]])
    };
    let header = B3dmHeader {
        version: word(0),
        total_length: word(1),
        feature_table_json: word(2),
        feature_table_bin: word(3),
        batch_table_json: word(4),
        batch_table_bin: word(5),
    };
    if header.version != B3DM_VERSION {
        return Err(TilerError::Encoding(format!(
            "unsupported tile container version {}",
            header.version
        )));
    }
    if header.total_length as usize != bytes.len() {
        return Err(TilerError::Encoding(format!(
            "declared length {} does not match {} bytes",
            header.total_length,
            bytes.len()
        )));
    }
    Ok(header)
}

pub fn decode_b3dm(bytes: &[u8]) -> Result<DecodedTile> {
    let header = read_header(bytes)?;

    let mut cursor = HEADER_LEN;
    let mut take = |len: u32| -> Result<&[u8]> {
        let end = cursor
            .checked_add(len as usize)
            .filter(|&e| e <= bytes.len())
            .ok_or_else(|| TilerError::Encoding("section runs past the end of the tile".into()))?;
        let slice = &bytes[cursor..end];
        cursor = end;
        Ok(slice)
    };
    let ft_json: Value = serde_json::from_slice(take(header.feature_table_json)?)?;
    take(header.feature_table_bin)?;
    let bt_json: Value = serde_json::from_slice(take(header.batch_table_json)?)?;
    take(header.batch_table_bin)?;
    let glb = &bytes[cursor..];

    let rtc_center: [f64; 3] = match ft_json.get("RTC_CENTER") {
        Some(v) => serde_json::from_value(v.clone())?,
        None => [0.0; 3],
    };
    let read = read_glb(glb, rtc_center)?;

    let declared = ft_json
        .pointer("/extras/boundingBox")
        .cloned()
        .map(serde_json::from_value::<[f64; 6]>)
        .transpose()?;
    let bounds = match declared {
        Some(b) => b.into(),
        None => crate::types::triangles_bounds(&read.triangles),
    };

    let first_u32 = |k: &str| {
        bt_json
            .get(k)?
            .get(0)?
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
    };
    let coord = match (first_u32("level"), first_u32("x"), first_u32("y"), first_u32("z")) {
        (Some(l), Some(x), Some(y), Some(z)) => Some(TileCoord::new(l, x, y, z)),
        _ => None,
    };

    Ok(DecodedTile {
        format: OutputFormat::B3dm,
        coord,
        name: bt_json
            .pointer("/name/0")
            .and_then(Value::as_str)
            .map(str::to_owned),
        bounds,
        geometric_error: bt_json.pointer("/geometricError/0").and_then(Value::as_f64),
        rtc_center: Some(rtc_center),
        vertex_count: read.vertex_count,
        indices: read.indices,
        triangles: read.triangles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Triangle};

    fn meta() -> TileMetadata {
        TileMetadata {
            coord: TileCoord::new(0, 0, 0, 0),
            bounds: BoundingBox::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]),
            geometric_error: 0.0,
        }
    }

    fn single_triangle() -> IndexedMesh {
        IndexedMesh::from_triangles(&[Triangle::from_positions(
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
        )])
    }

    #[test]
    fn header_layout() {
        let bytes = encode_b3dm(&single_triangle(), &meta()).unwrap();
        let header = read_header(&bytes).unwrap();
        assert_eq!(&bytes[0..4], b"tile");
        assert_eq!(header.version, 1);
        assert_eq!(header.total_length as usize, bytes.len());
        assert_eq!(header.feature_table_bin, 0);
        assert_eq!(header.batch_table_bin, 0);

        let ft_end = HEADER_LEN + header.feature_table_json as usize;
        let bt_end = ft_end + header.batch_table_json as usize;
        assert_eq!(ft_end % 8, 0);
        assert_eq!(bt_end % 8, 0);
        assert_eq!(&bytes[bt_end..bt_end + 4], b"glTF");

        let ft: Value = serde_json::from_slice(&bytes[HEADER_LEN..ft_end]).unwrap();
        assert_eq!(ft["BATCH_LENGTH"], 1);
        assert_eq!(ft["RTC_CENTER"], json!([0.5, 0.5, 0.5]));
        let bt: Value = serde_json::from_slice(&bytes[ft_end..bt_end]).unwrap();
        assert_eq!(bt["name"][0], "tile_0_0_0_0");
    }

    #[test]
    fn single_triangle_roundtrip() {
        let bytes = encode_b3dm(&single_triangle(), &meta()).unwrap();
        let tile = decode_b3dm(&bytes).unwrap();
        assert_eq!(tile.triangles.len(), 1);
        assert_eq!(tile.vertex_count, 3);
        assert_eq!(tile.indices, vec![0, 1, 2]);
        assert!(tile.bounds.approx_eq(&meta().bounds, 1e-6));
        assert_eq!(tile.rtc_center, Some([0.5, 0.5, 0.5]));
        assert_eq!(tile.name.as_deref(), Some("tile_0_0_0_0"));
        let v = tile.triangles[0].vertices;
        assert_eq!(v[0].position, [0.0, 0.0, 0.0]);
        assert_eq!(v[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(v[2].position, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn deterministic_output() {
        let a = encode_b3dm(&single_triangle(), &meta()).unwrap();
        let b = encode_b3dm(&single_triangle(), &meta()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_tile_keeps_declared_box() {
        let bytes = encode_b3dm(&IndexedMesh::default(), &meta()).unwrap();
        let tile = decode_b3dm(&bytes).unwrap();
        assert!(tile.triangles.is_empty());
        assert!(tile.bounds.approx_eq(&meta().bounds, 1e-9));
    }

    #[test]
    fn truncated_container_rejected() {
        let bytes = encode_b3dm(&single_triangle(), &meta()).unwrap();
        assert!(matches!(
            decode_b3dm(&bytes[..bytes.len() - 4]),
            Err(TilerError::Encoding(_))
        ));
        let mut wrong_version = bytes.clone();
        wrong_version[4] = 9;
        assert!(decode_b3dm(&wrong_version).is_err());
    }
}
