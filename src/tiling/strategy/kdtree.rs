use super::{
    BASE_TILE_BYTES, CANCEL_POLL_INTERVAL, ensure_slice_budget, geometric_error, saturating_pow,
};
use crate::config::TilingConfig;
use crate::error::Result;
use crate::progress::CancellationToken;
use crate::types::{BoundingBox, TileCoord, TileDescriptor};

#[derive(Debug, Clone, Copy)]
struct KdNode {
    bounds: BoundingBox,
    depth: u32,
    index: [u32; 3],
}

/// Binary subdivision alternating the split axis X, Y, Z, X, ...
///
/// Shares the octree's root cube and termination rule; each split halves
/// the node at the midpoint of the current axis.
#[derive(Debug, Clone)]
pub struct KdTreeStrategy {
    cancel: CancellationToken,
}

impl KdTreeStrategy {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub(crate) fn generate(&self, level: u32, config: &TilingConfig) -> Result<Vec<TileDescriptor>> {
        ensure_slice_budget(level, saturating_pow(2, level))?;

        let root_size = config.tile_size * 2f64.powi(config.max_level as i32);
        let mut arena = vec![KdNode {
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
            let subdivide = node.bounds.max_extent() > config.tile_size
                && node.depth < config.max_level
                && node.depth < level;
            if !subdivide {
                if node.depth == level {
                    leaves.push(node);
                }
                continue;
            }

            let axis = (node.depth % 3) as usize;
            let mid = (node.bounds.min[axis] + node.bounds.max[axis]) * 0.5;
            for side in 0..2u32 {
                let mut bounds = node.bounds;
                if side == 0 {
                    bounds.max[axis] = mid;
                } else {
                    bounds.min[axis] = mid;
                }
                let mut index = node.index;
                index[axis] = index[axis] * 2 + side;
                arena.push(KdNode {
                    bounds,
                    depth: node.depth + 1,
                    index,
                });
                work.push(arena.len() - 1);
            }
        }
        self.cancel.check()?;

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

/// `floor(2^level * 0.5)`, at least 1.
pub fn estimate(level: u32) -> u64 {
    match saturating_pow(2, level) {
        u64::MAX => u64::MAX,
        n => (n / 2).max(1),
    }
}
