use std::sync::Arc;

use super::clipper::clip_triangle;
use crate::spatial::SpatialGrid;
use crate::types::{BoundingBox, Triangle};

/// Cuts the geometry of one LOD level into tile-sized pieces.
#[derive(Debug, Clone)]
pub struct TileExtractor {
    triangles: Arc<Vec<Triangle>>,
    grid: SpatialGrid,
}

impl TileExtractor {
    pub fn new(triangles: Arc<Vec<Triangle>>) -> Self {
        let grid = SpatialGrid::build(&triangles);
        Self { triangles, grid }
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Triangles of this level clipped to `bounds`.
    pub fn extract(&self, bounds: &BoundingBox) -> Vec<Triangle> {
        let mut out = Vec::new();
        for id in self.grid.query(bounds) {
            clip_triangle(&self.triangles[id as usize], bounds, &mut out);
        }
        out
    }
}
