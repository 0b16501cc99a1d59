//! Coarse uniform-grid index over a triangle list.
//!
//! Cells are keyed by `floor(position / cell_size)`. A triangle is registered
//! in every cell its AABB overlaps, so a region query only has to visit the
//! cells covering the region.

use std::collections::HashMap;

use crate::types::{BoundingBox, Triangle};

/// Cap on cells a single triangle may be registered in; larger triangles go
/// to the overflow list that every query visits.
const MAX_CELLS_PER_TRIANGLE: i64 = 512;

type CellKey = [i64; 3];

/// Spatial hash of triangle ids.
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    cell_size: f64,
    cells: HashMap<CellKey, Vec<u32>>,
    oversized: Vec<u32>,
    bounds: BoundingBox,
}

impl SpatialGrid {
    /// Index `triangles` with a cell size chosen so that an average cell
    /// holds a handful of triangles.
    pub fn build(triangles: &[Triangle]) -> Self {
        let bounds = crate::types::triangles_bounds(triangles);
        let cell_size = if triangles.is_empty() || bounds.is_empty() {
            1.0
        } else {
            let target_cells = (triangles.len() as f64 / 8.0).max(1.0);
            let volume = bounds.normalized().volume().max(f64::MIN_POSITIVE);
            let by_volume = (volume / target_cells).cbrt();
            by_volume.max(bounds.max_extent() / 256.0).max(1e-6)
        };
        Self::with_cell_size(triangles, cell_size)
    }

    pub fn with_cell_size(triangles: &[Triangle], cell_size: f64) -> Self {
        let mut grid = SpatialGrid {
            cell_size,
            cells: HashMap::new(),
            oversized: Vec::new(),
            bounds: crate::types::triangles_bounds(triangles),
        };
        for (i, tri) in triangles.iter().enumerate() {
            grid.insert(i as u32, &tri.bounds());
        }
        grid
    }

    fn cell_of(&self, p: [f64; 3]) -> CellKey {
        [
            (p[0] / self.cell_size).floor() as i64,
            (p[1] / self.cell_size).floor() as i64,
            (p[2] / self.cell_size).floor() as i64,
        ]
    }

    fn insert(&mut self, id: u32, bb: &BoundingBox) {
        let lo = self.cell_of(bb.min);
        let hi = self.cell_of(bb.max);
        let span = (hi[0] - lo[0] + 1) * (hi[1] - lo[1] + 1) * (hi[2] - lo[2] + 1);
        if span > MAX_CELLS_PER_TRIANGLE {
            self.oversized.push(id);
            return;
        }
        for x in lo[0]..=hi[0] {
            for y in lo[1]..=hi[1] {
                for z in lo[2]..=hi[2] {
                    self.cells.entry([x, y, z]).or_default().push(id);
                }
            }
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Bounds of everything indexed.
    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// Sorted, deduplicated ids of triangles whose cells overlap `region`.
    ///
    /// Candidates may lie slightly outside `region`; callers test exact
    /// overlap themselves.
    pub fn query(&self, region: &BoundingBox) -> Vec<u32> {
        if self.cells.is_empty() && self.oversized.is_empty() {
            return Vec::new();
        }
        if !region.intersects(&self.bounds) {
            return Vec::new();
        }
        // Clamp the region to the indexed bounds so huge query boxes stay cheap.
        let clamped = BoundingBox {
            min: std::array::from_fn(|i| region.min[i].max(self.bounds.min[i])),
            max: std::array::from_fn(|i| region.max[i].min(self.bounds.max[i])),
        };
        let lo = self.cell_of(clamped.min);
        let hi = self.cell_of(clamped.max);

        let mut out: Vec<u32> = self.oversized.clone();
        let span = (hi[0] - lo[0] + 1) * (hi[1] - lo[1] + 1) * (hi[2] - lo[2] + 1);
        if span as usize > self.cells.len() {
            // Cheaper to scan the occupied cells than the covered range.
            for (key, ids) in &self.cells {
                if (0..3).all(|i| key[i] >= lo[i] && key[i] <= hi[i]) {
                    out.extend_from_slice(ids);
                }
            }
        } else {
            for x in lo[0]..=hi[0] {
                for y in lo[1]..=hi[1] {
                    for z in lo[2]..=hi[2] {
                        if let Some(ids) = self.cells.get(&[x, y, z]) {
                            out.extend_from_slice(ids);
                        }
                    }
                }
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}
