//! Spatial partitioning strategies.
//!
//! Every strategy answers the same two questions for one LOD level: which
//! tiles exist (`generate_slices`) and roughly how many there will be
//! (`estimate_slice_count`). `SlicingStrategy` is the closed set of
//! variants, picked once per task from its configured kind.

pub mod adaptive;
pub mod grid;
pub mod kdtree;
pub mod octree;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{MAX_LOD_LEVEL, StrategyKind, TilingConfig};
use crate::density::DensityAnalyzer;
use crate::error::{Result, TilerError};
use crate::progress::CancellationToken;
use crate::types::{BoundingBox, TileDescriptor, TilingTask};

pub use adaptive::AdaptiveStrategy;
pub use grid::GridStrategy;
pub use kdtree::KdTreeStrategy;
pub use octree::OctreeStrategy;

/// Upper bound on tiles a single level may produce.
pub const MAX_SLICES_PER_LEVEL: u64 = 1 << 22;

/// Nominal encoded size of one tile, used by size estimates.
pub const BASE_TILE_BYTES: u64 = 16 * 1024;

/// How often (in nodes or cells) long loops poll for cancellation.
pub(crate) const CANCEL_POLL_INTERVAL: usize = 1024;

/// One of the four partitioning algorithms.
#[derive(Debug, Clone)]
pub enum SlicingStrategy {
    Grid(GridStrategy),
    Octree(OctreeStrategy),
    KdTree(KdTreeStrategy),
    Adaptive(AdaptiveStrategy),
}

impl SlicingStrategy {
    /// Build the strategy for `kind`.
    ///
    /// `analyzer` is only consulted by the adaptive variant; without one it
    /// assumes neutral density.
    pub fn for_kind(
        kind: StrategyKind,
        analyzer: Option<Arc<DensityAnalyzer>>,
        cancel: CancellationToken,
    ) -> Self {
        match kind {
            StrategyKind::Grid => SlicingStrategy::Grid(GridStrategy::new(cancel)),
            StrategyKind::Octree => SlicingStrategy::Octree(OctreeStrategy::new(cancel)),
            StrategyKind::KdTree => SlicingStrategy::KdTree(KdTreeStrategy::new(cancel)),
            StrategyKind::Adaptive => {
                SlicingStrategy::Adaptive(AdaptiveStrategy::new(analyzer, cancel))
            }
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            SlicingStrategy::Grid(_) => StrategyKind::Grid,
            SlicingStrategy::Octree(_) => StrategyKind::Octree,
            SlicingStrategy::KdTree(_) => StrategyKind::KdTree,
            SlicingStrategy::Adaptive(_) => StrategyKind::Adaptive,
        }
    }

    /// Tiles for `level`, in a deterministic order.
    pub fn generate_slices(
        &self,
        task: &TilingTask,
        level: u32,
        config: &TilingConfig,
    ) -> Result<Vec<TileDescriptor>> {
        validate_request(level, config)?;
        let estimate = self.estimate_slice_count(level, config);
        debug!(task_id = task.id, level, strategy = %self.kind(), estimate, "Generating slices");

        let slices = match self {
            SlicingStrategy::Grid(s) => s.generate(level, config)?,
            SlicingStrategy::Octree(s) => s.generate(level, config)?,
            SlicingStrategy::KdTree(s) => s.generate(level, config)?,
            SlicingStrategy::Adaptive(s) => s.generate(level, config)?,
        };
        debug!(task_id = task.id, level, tiles = slices.len(), "Slices generated");
        Ok(slices)
    }

    /// Expected tile count for `level`; saturates instead of overflowing.
    pub fn estimate_slice_count(&self, level: u32, config: &TilingConfig) -> u64 {
        match self {
            SlicingStrategy::Grid(_) => grid::estimate(level),
            SlicingStrategy::Octree(_) => octree::estimate(level),
            SlicingStrategy::KdTree(_) => kdtree::estimate(level),
            SlicingStrategy::Adaptive(s) => s.estimate(level, config),
        }
    }
}

/// Shared preconditions of every `generate_slices` call.
pub fn validate_request(level: u32, config: &TilingConfig) -> Result<()> {
    if level > MAX_LOD_LEVEL {
        return Err(TilerError::Validation(format!(
            "level {level} exceeds the maximum of {MAX_LOD_LEVEL}"
        )));
    }
    if level > config.max_level {
        return Err(TilerError::Validation(format!(
            "level {level} exceeds the configured max_level {}",
            config.max_level
        )));
    }
    if !(config.tile_size.is_finite() && config.tile_size > 0.0) {
        return Err(TilerError::Validation(format!(
            "tile_size must be positive when generating slices, got {}",
            config.tile_size
        )));
    }
    Ok(())
}

/// Reject levels whose lattice would exceed `MAX_SLICES_PER_LEVEL`.
pub(crate) fn ensure_slice_budget(level: u32, count: u64) -> Result<()> {
    if count > MAX_SLICES_PER_LEVEL {
        return Err(TilerError::Validation(format!(
            "level {level} would produce {count} tiles, above the limit of {MAX_SLICES_PER_LEVEL}"
        )));
    }
    Ok(())
}

/// `base^exp`, saturating at `u64::MAX` with a warning.
pub(crate) fn saturating_pow(base: u64, exp: u32) -> u64 {
    base.checked_pow(exp).unwrap_or_else(|| {
        warn!(base, exp, "Slice count estimate overflowed, saturating");
        u64::MAX
    })
}

/// Geometric error of a tile: zero at the finest level, otherwise half the
/// tile diagonal with the configured threshold as a floor.
pub fn geometric_error(bounds: &BoundingBox, level: u32, config: &TilingConfig) -> f64 {
    if level >= config.max_level {
        0.0
    } else {
        (bounds.diagonal() * 0.5).max(config.geometric_error_threshold)
    }
}
