use std::sync::Arc;

use tracing::warn;

use super::grid::{cell_edge, for_each_cell};
use super::{BASE_TILE_BYTES, geometric_error};
use crate::config::TilingConfig;
use crate::density::DensityAnalyzer;
use crate::error::Result;
use crate::progress::CancellationToken;
use crate::types::TileDescriptor;

/// Density assumed when no analyzer is attached.
const NEUTRAL_DENSITY: f64 = 0.5;

/// Fraction of the cell edge used as padding for a fully dense cell.
const MAX_PADDING_RATIO: f64 = 0.05;

/// Grid lattice annotated with per-cell density.
///
/// Every cell of the lattice is emitted whatever its density; density only
/// pads the cell's box and scales its size estimate.
#[derive(Debug, Clone)]
pub struct AdaptiveStrategy {
    analyzer: Option<Arc<DensityAnalyzer>>,
    cancel: CancellationToken,
}

impl AdaptiveStrategy {
    pub fn new(analyzer: Option<Arc<DensityAnalyzer>>, cancel: CancellationToken) -> Self {
        Self { analyzer, cancel }
    }

    pub(crate) fn generate(&self, level: u32, config: &TilingConfig) -> Result<Vec<TileDescriptor>> {
        let pad_unit = cell_edge(config.tile_size, level) * MAX_PADDING_RATIO;
        for_each_cell(level, config, &self.cancel, |coord, cell| {
            let density = match &self.analyzer {
                Some(a) => a.analyze(&cell).composite,
                None => NEUTRAL_DENSITY,
            };
            TileDescriptor {
                coord,
                geometric_error: geometric_error(&cell, level, config),
                bounds: cell.expanded(pad_unit * density),
                cell,
                estimated_size: (BASE_TILE_BYTES as f64 * (1.0 + density)).round() as u64,
                density: Some(density),
            }
        })
    }

    pub(crate) fn estimate(&self, level: u32, config: &TilingConfig) -> u64 {
        let density = self
            .analyzer
            .as_ref()
            .map(|a| a.model_density())
            .unwrap_or(NEUTRAL_DENSITY);
        estimate(level, density, config.geometric_error_threshold)
    }
}

/// `4^L` base term, scaled by density growth, depth attenuation and the
/// error threshold; clamped to `[1, u64::MAX]`.
pub fn estimate(level: u32, density: f64, error_threshold: f64) -> u64 {
    let base = 4f64.powi(level as i32);
    let growth = (1.0 + 0.25 * density.clamp(0.0, 1.0)).powi(level as i32);
    let attenuation = 1.0 / (1.0 + 0.05 * level as f64);
    let threshold = if error_threshold > 0.0 {
        (1.0 / error_threshold).clamp(0.5, 2.0)
    } else {
        2.0
    };
    let raw = base * growth * attenuation * threshold;
    if !raw.is_finite() || raw >= u64::MAX as f64 {
        warn!(level, density, "Adaptive estimate overflowed, saturating");
        return u64::MAX;
    }
    (raw.floor() as u64).max(1)
}
