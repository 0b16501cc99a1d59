//! Drives one tiling run of a task: geometry, LOD ladder, every level's
//! tiles, persistence, obsolete cleanup, index, manifest and incremental
//! index.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::codec::{TileMetadata, encode_tile};
use crate::config::{StrategyKind, TilingConfig};
use crate::density::DensityAnalyzer;
use crate::error::{Result, TilerError};
use crate::geo::root_transform;
use crate::incremental::{Decision, IncrementalTracker, fingerprint, write_incremental_index};
use crate::index::{generate_index, tile_rel_path, validate_and_repair, write_index};
use crate::ingestion::GeometrySource;
use crate::progress::{CancellationToken, ProgressTracker};
use crate::repository::Repository;
use crate::storage::{Storage, join_path};
use crate::tiling::lod::LodLevel;
use crate::tiling::{Decimator, MeshoptDecimator, SlicingStrategy, TileExtractor, build_lod_ladder};
use crate::tileset::{TilesetEntry, build_tileset_json, write_tileset};
use crate::types::{
    BoundingBox, TaskStatus, Tile, TileCoord, TileDescriptor, TilingTask, Triangle, now_millis,
};

/// What a finished run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub levels_completed: u32,
    pub tiles_written: usize,
    pub tiles_unchanged: usize,
    pub tiles_deleted: usize,
    /// Tiles skipped after a tile-local encode or storage failure.
    pub tiles_failed: usize,
    pub empty_tiles_skipped: usize,
    pub incremental_index_written: bool,
    /// Final index validation outcome, after any repair.
    pub index_valid: bool,
    pub duration: Duration,
}

enum TileOutcome {
    Written {
        tile: Tile,
        decision: Decision,
        /// Previous content path when it differs from the new one.
        replaced: Option<String>,
    },
    Unchanged(Decision),
    Empty,
}

/// Mutable state of one run.
struct Run {
    task_id: u64,
    output_path: String,
    config: TilingConfig,
    tracker: IncrementalTracker,
    entries: BTreeMap<TileCoord, TilesetEntry>,
    summary: RunSummary,
}

/// Runs tiling tasks against one set of storage and repository handles.
pub struct Orchestrator {
    storage: Arc<dyn Storage>,
    repo: Arc<dyn Repository>,
    source: Arc<dyn GeometrySource>,
    decimator: Arc<dyn Decimator>,
    progress: ProgressTracker,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        storage: Arc<dyn Storage>,
        repo: Arc<dyn Repository>,
        source: Arc<dyn GeometrySource>,
    ) -> Self {
        Self {
            storage,
            repo,
            source,
            decimator: Arc::new(MeshoptDecimator::default()),
            progress: ProgressTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_decimator(mut self, decimator: Arc<dyn Decimator>) -> Self {
        self.decimator = decimator;
        self
    }

    /// Report progress into a tracker shared with readers.
    pub fn with_progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run `task_id` to a terminal state.
    ///
    /// The task ends Completed, Failed or Cancelled with its error message
    /// recorded; tiles committed before a failure stay in place.
    pub fn process(&self, task_id: u64) -> Result<RunSummary> {
        let mut task = self.repo.get_task(task_id)?;
        if task.status != TaskStatus::Queued {
            task.transition(TaskStatus::Queued)?;
        }
        if self.cancel.is_cancelled() {
            task.error_message = Some(TilerError::Cancelled.to_string());
            task.transition(TaskStatus::Cancelled)?;
            self.repo.update_task(&task)?;
            info!(task_id, "Task cancelled before processing");
            return Err(TilerError::Cancelled);
        }

        task.transition(TaskStatus::Processing)?;
        task.progress = 0.0;
        task.error_message = None;
        task.index_valid = None;
        self.repo.update_task(&task)?;
        self.progress.begin(task_id);

        let start = Instant::now();
        info!(task_id, name = %task.name, source = %task.source, "Processing task");

        match self.run(&mut task) {
            Ok(mut summary) => {
                summary.duration = start.elapsed();
                task.progress = 100.0;
                task.index_valid = Some(summary.index_valid);
                task.transition(TaskStatus::Completed)?;
                self.repo.update_task(&task)?;
                self.progress.record(task_id, 100.0);
                info!(
                    task_id,
                    levels = summary.levels_completed,
                    written = summary.tiles_written,
                    unchanged = summary.tiles_unchanged,
                    deleted = summary.tiles_deleted,
                    failed = summary.tiles_failed,
                    elapsed = ?summary.duration,
                    "Task complete"
                );
                Ok(summary)
            }
            Err(e) => {
                let status = if matches!(e, TilerError::Cancelled) {
                    TaskStatus::Cancelled
                } else {
                    TaskStatus::Failed
                };
                task.error_message = Some(e.to_string());
                task.transition(status)?;
                self.repo.update_task(&task)?;
                if status == TaskStatus::Cancelled {
                    info!(task_id, progress = task.progress, "Task cancelled");
                } else {
                    error!(task_id, error = %e, "Task failed");
                }
                Err(e)
            }
        }
    }

    fn run(&self, task: &mut TilingTask) -> Result<RunSummary> {
        let requested = task.tiling_config()?;
        requested.validate()?;

        let geometry = self.source.load(&task.source)?;
        self.cancel.check()?;

        // The model minimum becomes the tiling origin.
        let origin = geometry.bounds.min;
        let offset = origin.map(|c| -c);
        let triangles: Arc<Vec<Triangle>> = Arc::new(
            geometry
                .triangles
                .iter()
                .map(|t| t.translated(offset))
                .collect(),
        );
        let bounds = geometry.bounds.translated(offset);

        let config = requested.fit_to_bounds(&bounds);
        config.validate()?;
        info!(
            task_id = task.id,
            triangles = triangles.len(),
            strategy = %config.strategy,
            max_level = config.max_level,
            tile_size = config.tile_size,
            format = %config.output_format,
            incremental = config.incremental,
            "Tiling configuration resolved"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.effective_parallelism())
            .build()
            .map_err(std::io::Error::other)?;

        let ladder = pool.install(|| {
            build_lod_ladder(Arc::clone(&triangles), &bounds, &config, &*self.decimator)
        })?;
        self.cancel.check()?;

        let analyzer = (config.strategy == StrategyKind::Adaptive)
            .then(|| Arc::new(DensityAnalyzer::new(Arc::clone(&triangles))));
        let strategy = SlicingStrategy::for_kind(config.strategy, analyzer, self.cancel.clone());

        let mut run = Run {
            task_id: task.id,
            output_path: task.output_path.clone(),
            tracker: IncrementalTracker::load(&*self.repo, task.id, config.max_level)?,
            config,
            entries: BTreeMap::new(),
            summary: RunSummary::default(),
        };

        let total_levels = run.config.max_level + 1;
        for lod in &ladder.levels {
            self.cancel.check()?;
            let slices = strategy.generate_slices(task, lod.level, &run.config)?;
            self.run_level(&pool, &mut run, lod, &slices)?;

            run.summary.levels_completed += 1;
            let percent = f64::from(run.summary.levels_completed) / f64::from(total_levels) * 100.0;
            // The last level's 100 % is reported once the indexes are written.
            task.progress = percent.min(99.0);
            task.updated_at = now_millis();
            self.repo.update_task(task)?;
            self.progress.record(task.id, task.progress);
        }

        self.finish(&mut run, ladder.levels.first(), &bounds, origin)?;
        Ok(run.summary)
    }

    /// Encode, write and commit every tile of one level.
    ///
    /// Tiles run in batches of `parallelism`; each batch is committed to the
    /// repository before the next starts.
    fn run_level(
        &self,
        pool: &rayon::ThreadPool,
        run: &mut Run,
        lod: &LodLevel,
        slices: &[TileDescriptor],
    ) -> Result<()> {
        let extractor = TileExtractor::new(Arc::clone(&lod.triangles));
        let batch = run.config.effective_parallelism().max(1);
        debug!(
            task_id = run.task_id,
            level = lod.level,
            tiles = slices.len(),
            triangles = extractor.triangle_count(),
            "Processing level"
        );

        for chunk in slices.chunks(batch) {
            self.cancel.check()?;
            let outcomes: Vec<Result<TileOutcome>> = {
                let run: &Run = run;
                pool.install(|| {
                    chunk
                        .par_iter()
                        .map(|desc| self.process_tile(run, &extractor, desc))
                        .collect()
                })
            };

            let mut rows = Vec::with_capacity(chunk.len());
            let mut fatal = None;
            for (desc, outcome) in chunk.iter().zip(outcomes) {
                match outcome {
                    Ok(TileOutcome::Written {
                        tile,
                        decision,
                        replaced,
                    }) => {
                        if let Some(old) = replaced {
                            if let Err(e) = self.storage.delete(&old) {
                                warn!(task_id = run.task_id, path = %old, error = %e, "Failed to delete replaced tile");
                            }
                        }
                        run.tracker.record(desc.coord, &decision);
                        run.summary.tiles_written += 1;
                        run.entries.insert(desc.coord, manifest_entry(desc, &run.config));
                        rows.push(tile);
                    }
                    Ok(TileOutcome::Unchanged(decision)) => {
                        run.tracker.record(desc.coord, &decision);
                        run.summary.tiles_unchanged += 1;
                        run.entries.insert(desc.coord, manifest_entry(desc, &run.config));
                    }
                    Ok(TileOutcome::Empty) => run.summary.empty_tiles_skipped += 1,
                    Err(e) if e.is_tile_local() => {
                        warn!(
                            task_id = run.task_id,
                            level = desc.coord.level,
                            x = desc.coord.x,
                            y = desc.coord.y,
                            z = desc.coord.z,
                            error = %e,
                            "Tile skipped"
                        );
                        run.summary.tiles_failed += 1;
                        // The previous run's tile stays in place and in the manifest.
                        if let Some(prior) = run.tracker.mark_retained(desc.coord) {
                            let uri = relative_to(&prior.path, &run.output_path);
                            run.entries.insert(
                                desc.coord,
                                TilesetEntry {
                                    uri,
                                    ..manifest_entry(desc, &run.config)
                                },
                            );
                        }
                    }
                    Err(e) => {
                        fatal.get_or_insert(e);
                    }
                }
            }

            // Tiles that made it are committed even when the batch aborts.
            if !rows.is_empty() {
                self.repo.upsert_tiles(rows)?;
            }
            if let Some(e) = fatal {
                return Err(e);
            }
        }
        Ok(())
    }

    fn process_tile(
        &self,
        run: &Run,
        extractor: &TileExtractor,
        desc: &TileDescriptor,
    ) -> Result<TileOutcome> {
        self.cancel.check()?;
        let config = &run.config;

        let triangles = extractor.extract(&desc.cell);
        if triangles.is_empty() && !config.emit_empty_tiles {
            return Ok(TileOutcome::Empty);
        }

        let bytes = encode_tile(
            config.output_format,
            &triangles,
            &TileMetadata::from(desc),
            config.compression_level,
        )?;
        let path = join_path(
            &run.output_path,
            &tile_rel_path(desc.coord, config.output_format.extension()),
        );

        let prior = run.tracker.prior(&desc.coord);
        let (decision, content_hash) = if config.incremental {
            let fp = fingerprint(desc.coord, &desc.bounds, &path, Some(&bytes))?;
            (run.tracker.decide(&*self.storage, &fp)?, Some(fp.hash))
        } else {
            let decision = match prior {
                Some(p) => Decision::Update { id: p.id },
                None => Decision::Add,
            };
            (decision, None)
        };
        if matches!(decision, Decision::Unchanged { .. }) {
            return Ok(TileOutcome::Unchanged(decision));
        }

        self.storage
            .write(&path, &bytes, config.output_format.content_type())?;

        let now = now_millis();
        let id = match decision {
            Decision::Update { id } => id,
            _ => 0,
        };
        let replaced = prior.map(|p| p.path.clone()).filter(|old| *old != path);
        Ok(TileOutcome::Written {
            tile: Tile {
                id,
                task_id: run.task_id,
                coord: desc.coord,
                bounds: desc.bounds,
                path,
                size: bytes.len() as u64,
                content_hash,
                created_at: now,
                updated_at: now,
            },
            decision,
            replaced,
        })
    }

    /// Cleanup and the three manifests, after every level succeeded.
    fn finish(
        &self,
        run: &mut Run,
        root_level: Option<&LodLevel>,
        bounds: &BoundingBox,
        origin: [f64; 3],
    ) -> Result<()> {
        let storage = &*self.storage;
        let repo = &*self.repo;

        run.summary.tiles_deleted = run.tracker.remove_obsolete(storage, repo, run.task_id)?;

        let index = generate_index(repo, run.task_id)?;
        write_index(storage, &run.output_path, &index)?;
        let check = validate_and_repair(storage, repo, run.task_id, &run.output_path)?;
        run.summary.index_valid = check.final_valid;

        let entries: Vec<TilesetEntry> = run.entries.values().cloned().collect();
        let root_error = root_level
            .map(|l| l.geometric_error)
            .unwrap_or_else(|| bounds.diagonal());
        if let Some(geo) = &run.config.geo_origin {
            info!(
                task_id = run.task_id,
                lon = geo.longitude,
                lat = geo.latitude,
                height = geo.height,
                "Georeferencing root tile"
            );
        }
        let transform = root_transform(run.config.geo_origin.as_ref(), origin);
        let tileset = build_tileset_json(&entries, root_error, transform);
        write_tileset(storage, &run.output_path, &tileset)?;

        let changes = run.tracker.changes();
        if run.config.incremental && !changes.is_noop() {
            let tiles = repo.tiles_for_task(run.task_id)?;
            write_incremental_index(storage, &run.output_path, run.task_id, &tiles)?;
            run.summary.incremental_index_written = true;
        } else if run.config.incremental {
            info!(task_id = run.task_id, "No tile changed, incremental index left as is");
        }
        debug!(task_id = run.task_id, ?changes, "Run changes");
        Ok(())
    }
}

fn manifest_entry(desc: &TileDescriptor, config: &TilingConfig) -> TilesetEntry {
    TilesetEntry {
        coord: desc.coord,
        bounds: desc.bounds,
        geometric_error: desc.geometric_error,
        uri: tile_rel_path(desc.coord, config.output_format.extension()),
    }
}

/// `path` relative to the output prefix.
fn relative_to(path: &str, output_path: &str) -> String {
    if output_path.is_empty() {
        return path.to_string();
    }
    path.strip_prefix(output_path)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(path)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::incremental::INCREMENTAL_INDEX_FILE;
    use crate::index::{INDEX_FILE, read_index};
    use crate::ingestion::FileGeometrySource;
    use crate::repository::MemoryRepository;
    use crate::storage::MemoryObjectStore;
    use crate::tileset::TILESET_FILE;

    const TERRAIN: &str = "synthetic:terrain?size=100&resolution=16&height=10";

    struct Fixture {
        store: MemoryObjectStore,
        repo: MemoryRepository,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: MemoryObjectStore::new(),
                repo: MemoryRepository::new(),
            }
        }

        fn orchestrator(&self) -> Orchestrator {
            Orchestrator::new(
                Arc::new(self.store.clone()),
                Arc::new(self.repo.clone()),
                Arc::new(FileGeometrySource),
            )
        }

        fn task(&self, source: &str, config: &TilingConfig) -> u64 {
            let task = TilingTask::new("test", source, "out", config).unwrap();
            self.repo.insert_task(task).unwrap().id
        }
    }

    fn config(max_level: u32) -> TilingConfig {
        TilingConfig {
            max_level,
            parallelism: 2,
            ..Default::default()
        }
    }

    /// Fails every write whose path contains `needle`.
    struct FailingWrites {
        inner: MemoryObjectStore,
        needle: &'static str,
    }

    impl Storage for FailingWrites {
        fn exists(&self, path: &str) -> bool {
            self.inner.exists(path)
        }
        fn read(&self, path: &str) -> Result<Vec<u8>> {
            self.inner.read(path)
        }
        fn write(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
            if path.contains(self.needle) {
                return Err(TilerError::io(path, "disk full"));
            }
            self.inner.write(path, bytes, content_type)
        }
        fn delete(&self, path: &str) -> Result<bool> {
            self.inner.delete(path)
        }
        fn list(&self, prefix: &str) -> Result<Vec<String>> {
            self.inner.list(prefix)
        }
        fn remove_empty_dirs(&self, prefix: &str) -> Result<usize> {
            self.inner.remove_empty_dirs(prefix)
        }
    }

    #[test]
    fn completes_and_writes_every_artifact() {
        let fx = Fixture::new();
        let id = fx.task(TERRAIN, &config(1));
        let summary = fx.orchestrator().process(id).unwrap();

        assert_eq!(summary.levels_completed, 2);
        // One root tile plus a 2x2x1 level.
        assert_eq!(summary.tiles_written, 5);
        assert_eq!(summary.tiles_failed, 0);
        assert!(summary.index_valid);
        assert!(!summary.incremental_index_written);

        let task = fx.repo.get_task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100.0);
        assert_eq!(task.index_valid, Some(true));
        assert!(task.error_message.is_none());

        assert!(fx.store.exists(&format!("out/{INDEX_FILE}")));
        assert!(fx.store.exists(&format!("out/{TILESET_FILE}")));
        assert!(fx.store.exists("out/tiles/0/0_0_0.b3dm"));
        assert!(!fx.store.exists(&format!("out/{INCREMENTAL_INDEX_FILE}")));

        let index = read_index(&fx.store, "out").unwrap();
        assert_eq!(index.tile_count, 5);
        assert_eq!(fx.repo.count_tiles(id).unwrap(), 5);
    }

    #[test]
    fn geometry_is_moved_to_the_origin() {
        let fx = Fixture::new();
        // Sphere centred on the origin spans [-10, 10].
        let id = fx.task("synthetic:sphere?radius=10&segments=12", &config(0));
        fx.orchestrator().process(id).unwrap();

        let tiles = fx.repo.tiles_for_task(id).unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].bounds.min, [0.0; 3]);
        assert!((tiles[0].bounds.max[0] - 20.0).abs() < 1e-3);

        let tileset: serde_json::Value =
            serde_json::from_slice(&fx.store.read("out/tileset.json").unwrap()).unwrap();
        let transform = tileset["root"]["transform"].as_array().unwrap();
        assert!((transform[12].as_f64().unwrap() + 10.0).abs() < 1e-3);
    }

    #[test]
    fn geo_origin_places_the_root_in_ecef() {
        let fx = Fixture::new();
        let geo = crate::geo::GeoOrigin::new(-0.1278, 51.5074, 20.0);
        let cfg = TilingConfig {
            geo_origin: Some(geo),
            ..config(0)
        };
        let id = fx.task("synthetic:sphere?radius=10&segments=12", &cfg);
        fx.orchestrator().process(id).unwrap();

        let tileset: serde_json::Value =
            serde_json::from_slice(&fx.store.read("out/tileset.json").unwrap()).unwrap();
        let t: Vec<f64> = tileset["root"]["transform"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect();
        // The tiling origin is the model minimum, read as ENU metres.
        let min = FileGeometrySource
            .load("synthetic:sphere?radius=10&segments=12")
            .unwrap()
            .bounds
            .min;
        let expected = geo
            .enu_to_ecef()
            .transform_point3(glam::DVec3::from_array(min));
        assert!((glam::DVec3::new(t[12], t[13], t[14]) - expected).length() < 1e-6);
        assert!(expected.length() > 6.3e6);
    }

    #[test]
    fn bad_source_fails_the_task() {
        let fx = Fixture::new();
        let id = fx.task("/no/such/model.obj", &config(1));
        let err = fx.orchestrator().process(id).unwrap_err();
        assert!(matches!(err, TilerError::Validation(_)));

        let task = fx.repo.get_task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_message.unwrap().contains("not found"));
        assert!(!fx.store.exists("out/index.json"));
    }

    #[test]
    fn cancelled_before_start() {
        let fx = Fixture::new();
        let id = fx.task(TERRAIN, &config(2));
        let orchestrator = fx.orchestrator();
        orchestrator.cancellation_token().cancel();

        assert!(matches!(orchestrator.process(id), Err(TilerError::Cancelled)));
        let task = fx.repo.get_task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(fx.repo.count_tiles(id).unwrap(), 0);
    }

    #[test]
    fn failed_tile_writes_do_not_abort_the_level() {
        let fx = Fixture::new();
        let id = fx.task(TERRAIN, &config(1));
        let storage = FailingWrites {
            inner: fx.store.clone(),
            needle: "1_0_0",
        };
        let summary = Orchestrator::new(
            Arc::new(storage),
            Arc::new(fx.repo.clone()),
            Arc::new(FileGeometrySource),
        )
        .process(id)
        .unwrap();

        assert_eq!(summary.tiles_failed, 1);
        assert_eq!(summary.tiles_written, 4);
        assert_eq!(fx.repo.get_task(id).unwrap().status, TaskStatus::Completed);
        // Nothing was there before, so nothing is left behind.
        assert!(fx.repo.tile_by_coord(id, TileCoord::new(1, 1, 0, 0)).unwrap().is_none());
    }

    #[test]
    fn failed_rewrite_keeps_the_previous_tile() {
        let fx = Fixture::new();
        let id = fx.task(TERRAIN, &config(1));
        fx.orchestrator().process(id).unwrap();
        let coord = TileCoord::new(1, 1, 0, 0);
        let path = "out/tiles/1/1_0_0.b3dm";
        let good = fx.store.read(path).unwrap();
        let row = fx.repo.tile_by_coord(id, coord).unwrap().unwrap();

        let storage = FailingWrites {
            inner: fx.store.clone(),
            needle: "1_0_0",
        };
        let summary = Orchestrator::new(
            Arc::new(storage),
            Arc::new(fx.repo.clone()),
            Arc::new(FileGeometrySource),
        )
        .process(id)
        .unwrap();

        assert_eq!(summary.tiles_failed, 1);
        assert_eq!(summary.tiles_deleted, 0);
        assert!(summary.index_valid);
        assert_eq!(fx.store.read(path).unwrap(), good);
        assert_eq!(fx.repo.tile_by_coord(id, coord).unwrap(), Some(row));
        assert_eq!(read_index(&fx.store, "out").unwrap().tile_count, 5);

        let tileset = String::from_utf8(fx.store.read("out/tileset.json").unwrap()).unwrap();
        assert!(tileset.contains("tiles/1/1_0_0.b3dm"));
    }

    #[test]
    fn format_change_replaces_old_files() {
        let fx = Fixture::new();
        let id = fx.task(TERRAIN, &config(0));
        fx.orchestrator().process(id).unwrap();
        assert!(fx.store.exists("out/tiles/0/0_0_0.b3dm"));

        let mut task = fx.repo.get_task(id).unwrap();
        task.config = serde_json::to_string(&TilingConfig {
            output_format: OutputFormat::Glb,
            ..config(0)
        })
        .unwrap();
        fx.repo.update_task(&task).unwrap();
        fx.orchestrator().process(id).unwrap();

        assert!(!fx.store.exists("out/tiles/0/0_0_0.b3dm"));
        assert!(fx.store.exists("out/tiles/0/0_0_0.glb"));
        assert_eq!(fx.repo.count_tiles(id).unwrap(), 1);
    }

    #[test]
    fn adaptive_padding_does_not_duplicate_geometry() {
        let level_area = |strategy| {
            let fx = Fixture::new();
            let id = fx.task(TERRAIN, &TilingConfig { strategy, ..config(1) });
            fx.orchestrator().process(id).unwrap();
            fx.repo
                .tiles_for_task(id)
                .unwrap()
                .iter()
                .filter(|t| t.coord.level == 1)
                .map(|t| {
                    let tile = crate::codec::decode_tile(&fx.store.read(&t.path).unwrap()).unwrap();
                    tile.triangles.iter().map(Triangle::area).sum::<f64>()
                })
                .sum::<f64>()
        };
        let grid = level_area(StrategyKind::Grid);
        let adaptive = level_area(StrategyKind::Adaptive);
        assert!(grid > 0.0);
        assert!((adaptive - grid).abs() < grid * 1e-4, "{adaptive} vs {grid}");
    }

    #[test]
    fn empty_tiles_skipped_unless_requested() {
        let fx = Fixture::new();
        // A flat terrain fills only the bottom of the level-1 slab...
        let cfg = TilingConfig {
            strategy: StrategyKind::Octree,
            ..config(1)
        };
        let id = fx.task("synthetic:terrain?size=100&resolution=8&height=0", &cfg);
        let summary = fx.orchestrator().process(id).unwrap();
        assert!(summary.empty_tiles_skipped > 0);

        // ...unless empty tiles are emitted too.
        let fx = Fixture::new();
        let id = fx.task(
            "synthetic:terrain?size=100&resolution=8&height=0",
            &TilingConfig {
                emit_empty_tiles: true,
                ..cfg
            },
        );
        let summary = fx.orchestrator().process(id).unwrap();
        assert_eq!(summary.empty_tiles_skipped, 0);
    }
}
