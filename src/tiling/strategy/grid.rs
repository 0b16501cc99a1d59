use std::sync::Mutex;

use rayon::prelude::*;

use super::{BASE_TILE_BYTES, ensure_slice_budget, geometric_error, saturating_pow};
use crate::config::TilingConfig;
use crate::error::{Result, TilerError};
use crate::progress::CancellationToken;
use crate::types::{BoundingBox, TileCoord, TileDescriptor};

/// Regular lattice: `2^L x 2^L x max(1, 2^L / 2)` cells of edge
/// `tile_size * 0.5^L`.
#[derive(Debug, Clone)]
pub struct GridStrategy {
    cancel: CancellationToken,
}

/// Cells per side in X/Y and the number of Z slabs at `level`.
pub(crate) fn lattice(level: u32) -> (u64, u64) {
    let n = saturating_pow(2, level);
    (n, (n / 2).max(1))
}

/// Edge length of a cell at `level`.
pub(crate) fn cell_edge(tile_size: f64, level: u32) -> f64 {
    tile_size * 0.5f64.powi(level as i32)
}

/// Box of cell `(x, y, z)` with edge `s`, widened to the minimum extent.
pub(crate) fn cell_bounds(x: u32, y: u32, z: u32, s: f64) -> BoundingBox {
    BoundingBox::new(
        [x as f64 * s, y as f64 * s, z as f64 * s],
        [(x + 1) as f64 * s, (y + 1) as f64 * s, (z + 1) as f64 * s],
    )
    .normalized()
}

/// Visit every cell of the level lattice, one rayon task per Z slab.
///
/// Results land in a mutex-guarded accumulator and are sorted by
/// `(z, y, x)` afterwards so the order never depends on scheduling.
pub(crate) fn for_each_cell<F>(
    level: u32,
    config: &TilingConfig,
    cancel: &CancellationToken,
    make: F,
) -> Result<Vec<TileDescriptor>>
where
    F: Fn(TileCoord, BoundingBox) -> TileDescriptor + Sync,
{
    let (n, zt) = lattice(level);
    let total = n.checked_mul(n).and_then(|v| v.checked_mul(zt)).unwrap_or(u64::MAX);
    ensure_slice_budget(level, total)?;

    let s = cell_edge(config.tile_size, level);
    let (n, zt) = (n as u32, zt as u32);
    let acc = Mutex::new(Vec::with_capacity(total as usize));

    (0..zt).into_par_iter().try_for_each(|z| -> Result<()> {
        let mut slab = Vec::with_capacity((n * n) as usize);
        for y in 0..n {
            cancel.check()?;
            for x in 0..n {
                let coord = TileCoord::new(level, x, y, z);
                slab.push(make(coord, cell_bounds(x, y, z, s)));
            }
        }
        acc.lock()
            .map_err(|_| TilerError::Consistency("slice accumulator poisoned".into()))?
            .extend(slab);
        Ok(())
    })?;

    let mut out = acc
        .into_inner()
        .map_err(|_| TilerError::Consistency("slice accumulator poisoned".into()))?;
    out.sort_by_key(|t| (t.coord.z, t.coord.y, t.coord.x));
    Ok(out)
}

impl GridStrategy {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub(crate) fn generate(&self, level: u32, config: &TilingConfig) -> Result<Vec<TileDescriptor>> {
        for_each_cell(level, config, &self.cancel, |coord, bounds| TileDescriptor {
            coord,
            geometric_error: geometric_error(&bounds, level, config),
            bounds,
            cell: bounds,
            estimated_size: BASE_TILE_BYTES,
            density: None,
        })
    }
}

/// `n^2 * zt`, saturating.
pub fn estimate(level: u32) -> u64 {
    let (n, zt) = lattice(level);
    n.saturating_mul(n).saturating_mul(zt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(tile_size: f64, max_level: u32) -> TilingConfig {
        TilingConfig {
            tile_size,
            max_level,
            ..Default::default()
        }
    }

    fn grid() -> GridStrategy {
        GridStrategy::new(CancellationToken::new())
    }

    #[test]
    fn single_root_tile() {
        let tiles = grid().generate(0, &config(100.0, 0)).unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].coord, TileCoord::new(0, 0, 0, 0));
        assert_eq!(tiles[0].bounds.min, [0.0, 0.0, 0.0]);
        assert_eq!(tiles[0].bounds.max, [100.0, 100.0, 100.0]);
        assert_eq!(tiles[0].geometric_error, 0.0);
    }

    #[test]
    fn lattice_dimensions() {
        assert_eq!(lattice(0), (1, 1));
        assert_eq!(lattice(1), (2, 1));
        assert_eq!(lattice(2), (4, 2));
        assert_eq!(lattice(3), (8, 4));
        assert_eq!(estimate(3), 256);
    }

    #[test]
    fn cells_tile_the_lattice_without_gaps() {
        let cfg = config(64.0, 3);
        let tiles = grid().generate(3, &cfg).unwrap();
        assert_eq!(tiles.len(), 8 * 8 * 4);
        let s = 8.0;
        let total: f64 = tiles.iter().map(|t| t.bounds.volume()).sum();
        assert!((total - 8.0 * 8.0 * 4.0 * s * s * s).abs() < 1e-6);
        for t in &tiles {
            assert_eq!(t.bounds.min[0], t.coord.x as f64 * s);
            assert_eq!(t.bounds.max[2], (t.coord.z + 1) as f64 * s);
        }
    }

    #[test]
    fn cells_never_overlap() {
        let overlap = |a: &BoundingBox, b: &BoundingBox| -> f64 {
            (0..3)
                .map(|i| (a.max[i].min(b.max[i]) - a.min[i].max(b.min[i])).max(0.0))
                .product()
        };
        for (tile_size, level) in [(64.0, 3), (10.0, 2), (0.3, 3)] {
            let tiles = grid().generate(level, &config(tile_size, level)).unwrap();
            let cell = tile_size / f64::from(1u32 << level);
            for (i, a) in tiles.iter().enumerate() {
                for b in &tiles[i + 1..] {
                    let shared = overlap(&a.bounds, &b.bounds);
                    assert!(
                        shared <= cell.powi(3) * 1e-9,
                        "{} and {} share {shared}",
                        a.coord,
                        b.coord
                    );
                }
            }
        }
    }

    #[test]
    fn sorted_by_z_then_y_then_x() {
        let tiles = grid().generate(2, &config(1.0, 2)).unwrap();
        let keys: Vec<_> = tiles.iter().map(|t| (t.coord.z, t.coord.y, t.coord.x)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn identical_across_pool_sizes() {
        let cfg = config(10.0, 4);
        let run = |threads| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap()
                .install(|| grid().generate(4, &cfg).unwrap())
        };
        assert_eq!(run(1), run(4));
    }

    #[test]
    fn tiny_cells_widened_to_epsilon() {
        let b = cell_bounds(0, 0, 0, 1e-9);
        assert!(b.extents().iter().all(|&e| e >= crate::types::MIN_EXTENT * 0.999));
    }
}
