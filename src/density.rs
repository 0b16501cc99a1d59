//! Per-region complexity metrics for the adaptive strategy.
//!
//! Densities only ever influence size estimates and bounding-box padding;
//! they never decide whether a tile exists.

use std::collections::HashSet;
use std::sync::Arc;

use crate::spatial::SpatialGrid;
use crate::types::{BoundingBox, Triangle};

/// Base signal weights: vertex, triangle, curvature, area.
const BASE_WEIGHTS: [f64; 4] = [0.30, 0.30, 0.25, 0.15];

const VERTEX_DENSITY_HIGH: f64 = 80.0;
const TRIANGLE_DENSITY_HIGH: f64 = 50.0;
const CURVATURE_HIGH: f64 = 0.7;
const CURVATURE_LOW: f64 = 0.1;
const AREA_HIGH: f64 = 0.8;

/// Steepness of the logistic curves.
const CURVATURE_STEEPNESS: f64 = 10.0;
const ENHANCE_STEEPNESS: f64 = 8.0;

/// Scalar summary of one region.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DensityMetrics {
    /// Distinct vertices per unit volume.
    pub vertex_density: f64,
    /// Triangles per unit volume.
    pub triangle_density: f64,
    /// In [0, 1].
    pub curvature_complexity: f64,
    /// Sum of triangle areas.
    pub surface_area: f64,
    /// Weighted, enhanced combination of the four signals in [0, 1].
    pub composite: f64,
}

/// Logistic curve centred at `center`, rescaled so that 0 maps to 0 and 1 to 1.
fn logistic01(x: f64, steepness: f64, center: f64) -> f64 {
    let f = |v: f64| 1.0 / (1.0 + (-steepness * (v - center)).exp());
    let lo = f(0.0);
    let hi = f(1.0);
    ((f(x.clamp(0.0, 1.0)) - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// Saturating map of a non-negative quantity into [0, 1).
fn saturate(value: f64, reference: f64) -> f64 {
    if value <= 0.0 {
        0.0
    } else {
        value / (value + reference)
    }
}

/// Per-triangle curvature proxy in [0, 1].
///
/// Combines edge-length non-uniformity, deviation of the face normal from
/// the nearest coordinate axis, and mean deviation of the interior angles
/// from 60°.
pub fn curvature_proxy(tri: &Triangle) -> f64 {
    let edges = tri.edge_lengths();
    let max_edge = edges.iter().cloned().fold(0.0_f32, f32::max);
    if max_edge <= 0.0 {
        return 0.0;
    }
    let min_edge = edges.iter().cloned().fold(f32::INFINITY, f32::min);
    let non_uniformity = ((max_edge - min_edge) / max_edge) as f64;

    let n = tri.face_normal();
    let alignment = n.iter().map(|c| c.abs()).fold(0.0_f32, f32::max) as f64;
    let misalignment = (1.0 - alignment).clamp(0.0, 1.0);

    let angles = tri.angles_deg();
    let angle_dev = angles.iter().map(|a| (a - 60.0).abs() as f64).sum::<f64>() / 3.0 / 60.0;

    (non_uniformity * 0.4 + misalignment * 0.3 + angle_dev.clamp(0.0, 1.0) * 0.3).clamp(0.0, 1.0)
}

/// Curvature complexity of a set of triangles: spread of the proxy values
/// pushed through a logistic curve.
pub fn curvature_complexity<'a>(triangles: impl IntoIterator<Item = &'a Triangle>) -> f64 {
    let proxies: Vec<f64> = triangles.into_iter().map(curvature_proxy).collect();
    if proxies.len() < 2 {
        return 0.0;
    }
    let mean = proxies.iter().sum::<f64>() / proxies.len() as f64;
    let variance =
        proxies.iter().map(|p| (p - mean) * (p - mean)).sum::<f64>() / proxies.len() as f64;
    // Std-dev of values in [0, 1] is at most 0.5.
    let raw = (variance.sqrt() * 2.0).clamp(0.0, 1.0);
    logistic01(raw, CURVATURE_STEEPNESS, 0.5)
}

/// Adaptive weights: base weights nudged by thresholds, then renormalized.
pub fn adaptive_weights(vertex_density: f64, triangle_density: f64, curvature: f64, area_norm: f64) -> [f64; 4] {
    let mut w = BASE_WEIGHTS;
    if vertex_density > VERTEX_DENSITY_HIGH {
        w[0] += 0.10;
    }
    if triangle_density > TRIANGLE_DENSITY_HIGH {
        w[1] += 0.05;
    }
    if curvature > CURVATURE_HIGH {
        w[2] += 0.10;
    } else if curvature < CURVATURE_LOW {
        w[2] -= 0.05;
    }
    if area_norm > AREA_HIGH {
        w[3] += 0.05;
    }
    let sum: f64 = w.iter().sum();
    w.map(|x| x / sum)
}

/// Computes `DensityMetrics` for arbitrary regions of one model.
#[derive(Debug, Clone)]
pub struct DensityAnalyzer {
    triangles: Arc<Vec<Triangle>>,
    grid: SpatialGrid,
}

impl DensityAnalyzer {
    pub fn new(triangles: Arc<Vec<Triangle>>) -> Self {
        let grid = SpatialGrid::build(&triangles);
        Self { triangles, grid }
    }

    /// Metrics over the triangles whose centroid lies in `region`.
    pub fn analyze(&self, region: &BoundingBox) -> DensityMetrics {
        let region = region.normalized();
        let hits: Vec<&Triangle> = self
            .grid
            .query(&region)
            .into_iter()
            .map(|i| &self.triangles[i as usize])
            .filter(|t| region.contains_point(t.centroid()))
            .collect();
        if hits.is_empty() {
            return DensityMetrics::default();
        }

        let volume = region.volume().max(f64::MIN_POSITIVE);
        let distinct: HashSet<[u32; 3]> = hits
            .iter()
            .flat_map(|t| t.vertices.iter().map(|v| v.position.map(f32::to_bits)))
            .collect();

        let vertex_density = distinct.len() as f64 / volume;
        let triangle_density = hits.len() as f64 / volume;
        let curvature = curvature_complexity(hits.iter().copied());
        let surface_area: f64 = hits.iter().map(|t| t.area()).sum();

        // Area relative to the largest cross-section of the region.
        let [ex, ey, ez] = region.extents();
        let cross_section = (ex * ey).max(ey * ez).max(ex * ez).max(f64::MIN_POSITIVE);
        let area_norm = saturate(surface_area, cross_section);

        let w = adaptive_weights(vertex_density, triangle_density, curvature, area_norm);
        let signals = [
            saturate(vertex_density, VERTEX_DENSITY_HIGH),
            saturate(triangle_density, TRIANGLE_DENSITY_HIGH),
            curvature,
            area_norm,
        ];
        let combined: f64 = w.iter().zip(signals).map(|(w, s)| w * s).sum();
        let composite = logistic01(combined, ENHANCE_STEEPNESS, 0.5);

        DensityMetrics {
            vertex_density,
            triangle_density,
            curvature_complexity: curvature,
            surface_area,
            composite,
        }
    }

    /// Composite density of the whole model.
    pub fn model_density(&self) -> f64 {
        self.analyze(self.grid.bounds()).composite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_mesh(n: usize, size: f32) -> Vec<Triangle> {
        let step = size / n as f32;
        let mut tris = Vec::new();
        for y in 0..n {
            for x in 0..n {
                let x0 = x as f32 * step;
                let y0 = y as f32 * step;
                tris.push(Triangle::from_positions(
                    [x0, y0, 0.0],
                    [x0 + step, y0, 0.0],
                    [x0, y0 + step, 0.0],
                ));
                tris.push(Triangle::from_positions(
                    [x0 + step, y0, 0.0],
                    [x0 + step, y0 + step, 0.0],
                    [x0, y0 + step, 0.0],
                ));
            }
        }
        tris
    }

    #[test]
    fn weights_sum_to_one() {
        for (v, t, c, a) in [(0.0, 0.0, 0.0, 0.0), (100.0, 60.0, 0.9, 0.9), (90.0, 0.0, 0.05, 0.2)] {
            let w = adaptive_weights(v, t, c, a);
            assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn weights_nudged_by_thresholds() {
        let calm = adaptive_weights(0.0, 0.0, 0.5, 0.0);
        let busy = adaptive_weights(100.0, 0.0, 0.5, 0.0);
        assert!(busy[0] > calm[0]);
        assert!((calm[0] - 0.30).abs() < 1e-12);
    }

    #[test]
    fn logistic_maps_endpoints_and_center() {
        assert!(logistic01(0.0, 8.0, 0.5).abs() < 1e-12);
        assert!((logistic01(1.0, 8.0, 0.5) - 1.0).abs() < 1e-12);
        assert!((logistic01(0.5, 8.0, 0.5) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn curvature_proxy_equilateral_axis_aligned_is_zero() {
        let h = (3.0_f32).sqrt() / 2.0;
        let tri = Triangle::from_positions([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, h, 0.0]);
        assert!(curvature_proxy(&tri) < 1e-3);
    }

    #[test]
    fn uniform_mesh_has_low_curvature() {
        let tris = grid_mesh(8, 1.0);
        assert!(curvature_complexity(&tris) < 0.05);
    }

    #[test]
    fn empty_region_is_zero() {
        let analyzer = DensityAnalyzer::new(Arc::new(grid_mesh(4, 1.0)));
        let m = analyzer.analyze(&BoundingBox::new([10.0; 3], [11.0; 3]));
        assert_eq!(m, DensityMetrics::default());
    }

    #[test]
    fn denser_region_scores_higher() {
        let mut tris = grid_mesh(4, 1.0);
        // Dense patch in [2, 3] x [0, 1]
        tris.extend(
            grid_mesh(32, 1.0)
                .into_iter()
                .map(|t| t.translated([2.0, 0.0, 0.0])),
        );
        let analyzer = DensityAnalyzer::new(Arc::new(tris));
        let sparse = analyzer.analyze(&BoundingBox::new([0.0, 0.0, -0.5], [1.0, 1.0, 0.5]));
        let dense = analyzer.analyze(&BoundingBox::new([2.0, 0.0, -0.5], [3.0, 1.0, 0.5]));
        assert!(dense.triangle_density > sparse.triangle_density);
        assert!(dense.composite >= sparse.composite);
        assert!((0.0..=1.0).contains(&dense.composite));
        assert!((sparse.surface_area - 1.0).abs() < 1e-3);
    }
}
