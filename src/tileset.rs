//! Root manifest (`tileset.json`) describing the tile tree to a renderer.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Value, json};
use tracing::info;

use crate::error::Result;
use crate::storage::{Storage, join_path};
use crate::types::{BoundingBox, TileCoord};

pub const TILESET_FILE: &str = "tileset.json";

/// One written tile as seen by the manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct TilesetEntry {
    pub coord: TileCoord,
    /// Box in the tiling frame, before the root transform.
    pub bounds: BoundingBox,
    pub geometric_error: f64,
    /// Content URI relative to the manifest.
    pub uri: String,
}

struct Node<'a> {
    entry: Option<&'a TilesetEntry>,
    bounds: BoundingBox,
    geometric_error: f64,
    children: Vec<usize>,
}

/// Build the manifest for `entries`.
///
/// A level-0 tile that is alone becomes the root; otherwise a content-less
/// root spans every tile. Each deeper tile hangs under the tile one level up
/// whose box contains its center, falling back to shallower levels and
/// finally the root when that parent was not written. `transform` is the
/// column-major root transform (see [`crate::geo::root_transform`]).
pub fn build_tileset_json(entries: &[TilesetEntry], root_error: f64, transform: [f64; 16]) -> Value {
    let mut by_level: BTreeMap<u32, Vec<&TilesetEntry>> = BTreeMap::new();
    for e in entries {
        by_level.entry(e.coord.level).or_default().push(e);
    }
    for level in by_level.values_mut() {
        level.sort_by_key(|e| e.coord);
    }

    let union = entries
        .iter()
        .map(|e| e.bounds)
        .reduce(|a, b| a.merge(&b))
        .unwrap_or_else(|| BoundingBox::new([0.0; 3], [0.0; 3]));

    let mut nodes: Vec<Node> = Vec::with_capacity(entries.len() + 1);
    let single_root = by_level
        .get(&0)
        .filter(|l| l.len() == 1)
        .map(|l| l[0]);
    nodes.push(Node {
        entry: single_root,
        bounds: single_root.map_or(union, |e| e.bounds.merge(&union)),
        geometric_error: single_root.map_or(root_error, |e| e.geometric_error.max(root_error)),
        children: Vec::new(),
    });

    // Node ids of each level's tiles, with a lookup by center.
    let mut placed: Vec<ContainmentIndex> = Vec::new();
    for tiles in by_level.values() {
        let mut ids = Vec::with_capacity(tiles.len());
        for &e in tiles {
            let id = if single_root.is_some_and(|r| std::ptr::eq(r, e)) {
                0
            } else {
                nodes.push(Node {
                    entry: Some(e),
                    bounds: e.bounds,
                    geometric_error: e.geometric_error,
                    children: Vec::new(),
                });
                let id = nodes.len() - 1;
                let center = e.bounds.center();
                let parent = placed
                    .iter()
                    .rev()
                    .find_map(|idx| idx.find(center, &nodes))
                    .unwrap_or(0);
                nodes[parent].children.push(id);
                id
            };
            ids.push(id);
        }
        placed.push(ContainmentIndex::build(&ids, &nodes));
    }

    let root = node_json(&nodes, 0, Some(transform));
    json!({
        "asset": {
            "version": "1.0",
            "generator": "lod-tiler"
        },
        "geometricError": nodes[0].geometric_error,
        "root": root
    })
}

fn node_json(nodes: &[Node], id: usize, transform: Option<[f64; 16]>) -> Value {
    let node = &nodes[id];
    let mut tile = json!({
        "boundingVolume": {
            "box": bounding_volume_box(&node.bounds)
        },
        "geometricError": node.geometric_error,
        "refine": "REPLACE"
    });
    if let Some(t) = transform {
        tile["transform"] = json!(t);
    }
    if let Some(e) = node.entry {
        tile["content"] = json!({ "uri": e.uri });
    }
    if !node.children.is_empty() {
        let children: Vec<Value> = node
            .children
            .iter()
            .map(|&c| node_json(nodes, c, None))
            .collect();
        tile["children"] = json!(children);
    }
    tile
}

/// `[cx, cy, cz, hx, 0, 0, 0, hy, 0, 0, 0, hz]`
pub fn bounding_volume_box(bounds: &BoundingBox) -> [f64; 12] {
    let c = bounds.center();
    let he = bounds.half_extents();
    [
        c[0], c[1], c[2], //
        he[0], 0.0, 0.0, //
        0.0, he[1], 0.0, //
        0.0, 0.0, he[2],
    ]
}

/// Hash grid over the boxes of one level.
struct ContainmentIndex {
    cell: f64,
    buckets: HashMap<[i64; 3], Vec<usize>>,
}

impl ContainmentIndex {
    fn build(ids: &[usize], nodes: &[Node]) -> Self {
        let cell = ids
            .iter()
            .map(|&i| nodes[i].bounds.max_extent())
            .fold(f64::INFINITY, f64::min)
            .max(crate::types::MIN_EXTENT);
        let cell = if cell.is_finite() { cell } else { 1.0 };
        let mut buckets: HashMap<[i64; 3], Vec<usize>> = HashMap::new();
        for &id in ids {
            let b = &nodes[id].bounds;
            let lo = key(b.min, cell);
            let hi = key(b.max, cell);
            for x in lo[0]..=hi[0] {
                for y in lo[1]..=hi[1] {
                    for z in lo[2]..=hi[2] {
                        buckets.entry([x, y, z]).or_default().push(id);
                    }
                }
            }
        }
        Self { cell, buckets }
    }

    fn find(&self, p: [f64; 3], nodes: &[Node]) -> Option<usize> {
        self.buckets
            .get(&key(p, self.cell))?
            .iter()
            .copied()
            .find(|&id| nodes[id].bounds.contains_point(p))
    }
}

fn key(p: [f64; 3], cell: f64) -> [i64; 3] {
    [
        (p[0] / cell).floor() as i64,
        (p[1] / cell).floor() as i64,
        (p[2] / cell).floor() as i64,
    ]
}

/// Write `{output}/tileset.json`; returns its path.
pub fn write_tileset(storage: &dyn Storage, output_path: &str, tileset: &Value) -> Result<String> {
    let path = join_path(output_path, TILESET_FILE);
    storage.write(&path, &serde_json::to_vec_pretty(tileset)?, "application/json")?;
    info!(path = %path, "Wrote tileset.json");
    Ok(path)
}
