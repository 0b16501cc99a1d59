use tracing::trace;

use super::{
    BASE_TILE_BYTES, CANCEL_POLL_INTERVAL, ensure_slice_budget, geometric_error, saturating_pow,
};
use crate::config::TilingConfig;
use crate::error::Result;
use crate::progress::CancellationToken;
use crate::types::{BoundingBox, TileCoord, TileDescriptor};

/// A node in the subdivision arena.
#[derive(Debug, Clone, Copy)]
struct OctreeNode {
    bounds: BoundingBox,
    depth: u32,
    /// Integer position of the node within its depth's lattice.
    index: [u32; 3],
}

/// 8-way recursive subdivision of a cube rooted at the origin.
///
/// The root spans `tile_size * 2^max_level`, so a node at depth `d` spans
/// `tile_size * 2^(max_level - d)` and leaves at `max_level` are exactly
/// `tile_size` wide.
#[derive(Debug, Clone)]
pub struct OctreeStrategy {
    cancel: CancellationToken,
}

impl OctreeStrategy {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub(crate) fn generate(&self, level: u32, config: &TilingConfig) -> Result<Vec<TileDescriptor>> {
        ensure_slice_budget(level, saturating_pow(8, level))?;

        let root_size = config.tile_size * 2f64.powi(config.max_level as i32);
        let mut arena = vec![OctreeNode {
            bounds: BoundingBox::new([0.0; 3], [root_size; 3]),
            depth: 0,
            index: [0; 3],
        }];
        let mut work = vec![0usize];
        let mut leaves = Vec::new();
        let mut iterations = 0usize;

        while let Some(id) = work.pop() {
            iterations += 1;
            if iterations % CANCEL_POLL_INTERVAL == 0 {
                self.cancel.check()?;
            }
            let node = arena[id];
            let size = node.bounds.max_extent();
            let subdivide =
                size > config.tile_size && node.depth < config.max_level && node.depth < level;
            if !subdivide {
                if node.depth == level {
                    leaves.push(node);
                }
                continue;
            }
            for octant in 0..8 {
                let bit = |b: usize| u32::from(octant & b != 0);
                arena.push(OctreeNode {
                    bounds: child_bounds(&node.bounds, octant),
                    depth: node.depth + 1,
                    index: [
                        node.index[0] * 2 + bit(1),
                        node.index[1] * 2 + bit(2),
                        node.index[2] * 2 + bit(4),
                    ],
                });
                work.push(arena.len() - 1);
            }
        }
        self.cancel.check()?;
        trace!(level, nodes = arena.len(), leaves = leaves.len(), "Octree subdivision done");

        let mut out: Vec<TileDescriptor> = leaves
            .into_iter()
            .map(|n| {
                let bounds = n.bounds.normalized();
                TileDescriptor {
                    coord: TileCoord::new(level, n.index[0], n.index[1], n.index[2]),
                    bounds,
                    cell: bounds,
                    geometric_error: geometric_error(&bounds, level, config),
                    estimated_size: BASE_TILE_BYTES,
                    density: None,
                }
            })
            .collect();
        out.sort_by_key(|t| t.coord);
        Ok(out)
    }
}

/// `floor(8^level * 0.5)`, or 1 at the root.
pub fn estimate(level: u32) -> u64 {
    if level == 0 {
        1
    } else {
        match saturating_pow(8, level) {
            u64::MAX => u64::MAX,
            n => n / 2,
        }
    }
}

/// Compute the child bounding box for a given octant index.
pub(crate) fn child_bounds(parent: &BoundingBox, octant: usize) -> BoundingBox {
    let c = parent.center();
    let pick = |bit: usize, axis: usize| {
        if octant & bit != 0 {
            (c[axis], parent.max[axis])
        } else {
            (parent.min[axis], c[axis])
        }
    };
    let (min_x, max_x) = pick(1, 0);
    let (min_y, max_y) = pick(2, 1);
    let (min_z, max_z) = pick(4, 2);

    BoundingBox {
        min: [min_x, min_y, min_z],
        max: [max_x, max_y, max_z],
    }
}
