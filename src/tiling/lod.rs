use std::sync::Arc;

use rayon::prelude::*;
use tracing::info;

use super::simplifier::Decimator;
use crate::config::TilingConfig;
use crate::error::Result;
use crate::types::{BoundingBox, Triangle};

/// Geometry used for one LOD level.
#[derive(Debug, Clone)]
pub struct LodLevel {
    pub level: u32,
    /// Fraction of the full-resolution triangles requested from the decimator.
    pub ratio: f32,
    pub triangles: Arc<Vec<Triangle>>,
    pub geometric_error: f64,
}

/// One `LodLevel` per level in `0..=max_level`, coarsest first.
///
/// Level 0 is the coarsest and carries the largest geometric error; the
/// finest level holds the source triangles unchanged with zero error.
#[derive(Debug, Clone)]
pub struct LodLadder {
    pub levels: Vec<LodLevel>,
    pub bounds: BoundingBox,
}

impl LodLadder {
    pub fn level(&self, level: u32) -> Option<&LodLevel> {
        self.levels.get(level as usize)
    }
}

/// Decimation ratio of `level`: `0.5^(max_level - level)`.
pub fn level_ratio(level: u32, max_level: u32) -> f32 {
    0.5_f32.powi(max_level.saturating_sub(level) as i32)
}

/// Geometric error of `level`: `max(diag * 0.5^level, threshold)` for inner
/// levels and 0 at `max_level`.
pub fn level_geometric_error(bounds: &BoundingBox, level: u32, config: &TilingConfig) -> f64 {
    if level >= config.max_level {
        0.0
    } else {
        (bounds.diagonal() * 0.5_f64.powi(level as i32)).max(config.geometric_error_threshold)
    }
}

/// Build the ladder by decimating the full-resolution triangles once per
/// level. Levels are independent and simplified in parallel.
pub fn build_lod_ladder(
    triangles: Arc<Vec<Triangle>>,
    bounds: &BoundingBox,
    config: &TilingConfig,
    decimator: &dyn Decimator,
) -> Result<LodLadder> {
    let levels = (0..=config.max_level)
        .into_par_iter()
        .map(|level| -> Result<LodLevel> {
            let ratio = level_ratio(level, config.max_level);
            let reduced = if ratio >= 1.0 {
                Arc::clone(&triangles)
            } else {
                Arc::new(decimator.simplify(&triangles, ratio)?)
            };
            info!(
                level,
                ratio,
                source_triangles = triangles.len(),
                triangles = reduced.len(),
                "LOD level prepared"
            );
            Ok(LodLevel {
                level,
                ratio,
                triangles: reduced,
                geometric_error: level_geometric_error(bounds, level, config),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(LodLadder {
        levels,
        bounds: *bounds,
    })
}
