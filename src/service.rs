//! Request surface over the orchestrator.
//!
//! Requests return as soon as the job is queued. Worker threads pull jobs
//! from a channel and open their own storage and repository handles for
//! each one.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::TilingConfig;
use crate::error::{Result, TilerError};
use crate::incremental::INCREMENTAL_INDEX_FILE;
use crate::index::INDEX_FILE;
use crate::ingestion::{FileGeometrySource, GeometrySource};
use crate::orchestrator::{Orchestrator, RunSummary};
use crate::progress::{CancellationToken, ProgressTracker};
use crate::repository::Repository;
use crate::storage::{Storage, StorageSettings, join_path, open_storage};
use crate::tileset::TILESET_FILE;
use crate::types::{TaskStatus, Tile, TileCoord, TilingTask};

/// Worker pool and backend settings.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub storage: StorageSettings,
    /// Tasks processed concurrently.
    pub workers: usize,
}

impl ServiceSettings {
    pub fn local(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            storage: StorageSettings::local(root),
            workers: 1,
        }
    }
}

/// Progress as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskProgress {
    pub task_id: u64,
    pub status: TaskStatus,
    pub percent: f64,
    pub estimated_remaining: Option<Duration>,
}

/// One tile with its stored bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct TileContent {
    pub tile: Tile,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchTiles {
    pub found: Vec<TileContent>,
    pub missing: Vec<TileCoord>,
}

/// What a task deletion removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub tiles_deleted: usize,
    pub files_deleted: usize,
    pub dirs_removed: usize,
}

struct Job {
    task_id: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Registry {
    /// Tasks with a queued or running job.
    active: HashMap<u64, CancellationToken>,
    summaries: HashMap<u64, RunSummary>,
}

#[derive(Default)]
struct Shared {
    registry: Mutex<Registry>,
    finished: Condvar,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, Registry>> {
        self.registry
            .lock()
            .map_err(|_| TilerError::Consistency("task registry lock poisoned".into()))
    }
}

/// Everything a worker needs to run jobs.
#[derive(Clone)]
struct WorkerContext {
    repo: Arc<dyn Repository>,
    storage: StorageSettings,
    source: Arc<dyn GeometrySource>,
    progress: ProgressTracker,
    shared: Arc<Shared>,
}

pub struct TaskService {
    repo: Arc<dyn Repository>,
    storage: StorageSettings,
    progress: ProgressTracker,
    shared: Arc<Shared>,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskService {
    /// Start a service reading models from files and `synthetic:` sources.
    pub fn new(settings: ServiceSettings, repo: Arc<dyn Repository>) -> Result<Self> {
        Self::start(settings, repo, Arc::new(FileGeometrySource))
    }

    pub fn start(
        settings: ServiceSettings,
        repo: Arc<dyn Repository>,
        source: Arc<dyn GeometrySource>,
    ) -> Result<Self> {
        let (sender, receiver) = channel::unbounded::<Job>();
        let ctx = WorkerContext {
            repo: Arc::clone(&repo),
            storage: settings.storage.clone(),
            source,
            progress: ProgressTracker::new(),
            shared: Arc::new(Shared::default()),
        };

        let worker_count = settings.workers.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let ctx = ctx.clone();
            let receiver = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("tiler-worker-{i}"))
                .spawn(move || worker_loop(receiver, ctx))?;
            workers.push(handle);
        }
        info!(workers = worker_count, "Task service started");

        Ok(Self {
            repo,
            storage: settings.storage,
            progress: ctx.progress,
            shared: ctx.shared,
            sender: Some(sender),
            workers,
        })
    }

    /// Register a task and queue it. Invalid configurations are rejected
    /// before anything is stored.
    pub fn create_task(
        &self,
        name: &str,
        source: &str,
        output_path: &str,
        config: &TilingConfig,
    ) -> Result<TilingTask> {
        config.validate()?;
        if source.trim().is_empty() {
            return Err(TilerError::Validation("source must not be empty".into()));
        }
        let task = self
            .repo
            .insert_task(TilingTask::new(name, source, output_path, config)?)?;
        info!(task_id = task.id, name, source, "Task created");
        self.enqueue(task)
    }

    /// Queue a finished task again, optionally with a new configuration.
    ///
    /// Tiles from the previous run are diffed against the new one.
    pub fn resubmit_task(&self, task_id: u64, config: Option<&TilingConfig>) -> Result<TilingTask> {
        if self.shared.lock()?.active.contains_key(&task_id) {
            return Err(TilerError::Validation(format!("task {task_id} is already queued")));
        }
        let mut task = self.repo.get_task(task_id)?;
        if let Some(config) = config {
            config.validate()?;
            task.config = serde_json::to_string(config)?;
        }
        self.enqueue(task)
    }

    fn enqueue(&self, mut task: TilingTask) -> Result<TilingTask> {
        task.transition(TaskStatus::Queued)?;
        self.repo.update_task(&task)?;

        let cancel = CancellationToken::new();
        self.shared.lock()?.active.insert(task.id, cancel.clone());
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| TilerError::Consistency("task service is shut down".into()))?;
        if sender.send(Job { task_id: task.id, cancel }).is_err() {
            self.shared.lock()?.active.remove(&task.id);
            return Err(TilerError::Consistency("no worker is accepting jobs".into()));
        }
        debug!(task_id = task.id, "Task queued");
        Ok(task)
    }

    pub fn get_task(&self, task_id: u64) -> Result<TilingTask> {
        self.repo.get_task(task_id)
    }

    pub fn list_tasks(&self) -> Result<Vec<TilingTask>> {
        self.repo.list_tasks()
    }

    pub fn get_progress(&self, task_id: u64) -> Result<TaskProgress> {
        let task = self.repo.get_task(task_id)?;
        let percent = self.progress.percent(task_id).unwrap_or(task.progress);
        let estimated_remaining = if task.status.is_terminal() {
            None
        } else {
            self.progress.estimate_remaining(task_id)
        };
        Ok(TaskProgress {
            task_id,
            status: task.status,
            percent,
            estimated_remaining,
        })
    }

    /// Summary of the last finished run, if it completed.
    pub fn last_summary(&self, task_id: u64) -> Option<RunSummary> {
        self.shared.lock().ok()?.summaries.get(&task_id).cloned()
    }

    /// Request cancellation. Returns false when the task is already final.
    pub fn cancel_task(&self, task_id: u64) -> Result<bool> {
        if let Some(token) = self.shared.lock()?.active.get(&task_id) {
            token.cancel();
            info!(task_id, "Cancellation requested");
            return Ok(true);
        }
        let mut task = self.repo.get_task(task_id)?;
        if task.status.can_transition_to(TaskStatus::Cancelled) {
            task.transition(TaskStatus::Cancelled)?;
            self.repo.update_task(&task)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Block until the task has no queued or running job, or `timeout` passes.
    pub fn wait_for(&self, task_id: u64, timeout: Duration) -> Result<TilingTask> {
        let deadline = Instant::now() + timeout;
        let mut registry = self.shared.lock()?;
        while registry.active.contains_key(&task_id) {
            let now = Instant::now();
            if now >= deadline {
                warn!(task_id, ?timeout, "Timed out waiting for task");
                break;
            }
            registry = self
                .shared
                .finished
                .wait_timeout(registry, deadline - now)
                .map_err(|_| TilerError::Consistency("task registry lock poisoned".into()))?
                .0;
        }
        drop(registry);
        self.repo.get_task(task_id)
    }

    /// Remove a task with its tiles, rows, manifests and emptied directories.
    ///
    /// A running job is cancelled and awaited first.
    pub fn delete_task(&self, task_id: u64) -> Result<DeleteReport> {
        let task = self.repo.get_task(task_id)?;
        if self.cancel_task(task_id)? {
            self.wait_for(task_id, Duration::from_secs(60))?;
        }
        if self.shared.lock()?.active.contains_key(&task_id) {
            return Err(TilerError::Consistency(format!(
                "task {task_id} did not stop after cancellation"
            )));
        }

        let storage = open_storage(task.tiling_config()?.storage, &self.storage);
        let mut report = DeleteReport::default();

        for tile in self.repo.tiles_for_task(task_id)? {
            match storage.delete(&tile.path) {
                Ok(true) => report.files_deleted += 1,
                Ok(false) => {}
                Err(e) => warn!(task_id, path = %tile.path, error = %e, "Failed to delete tile"),
            }
        }
        report.tiles_deleted = self.repo.delete_tiles_for_task(task_id)?;

        for file in [INDEX_FILE, INCREMENTAL_INDEX_FILE, TILESET_FILE] {
            let path = join_path(&task.output_path, file);
            if storage.delete(&path)? {
                report.files_deleted += 1;
            }
        }
        report.dirs_removed = storage.remove_empty_dirs(&task.output_path)?;

        self.repo.delete_task(task_id)?;
        self.progress.forget(task_id);
        self.shared.lock()?.summaries.remove(&task_id);
        info!(
            task_id,
            tiles = report.tiles_deleted,
            files = report.files_deleted,
            dirs = report.dirs_removed,
            "Task deleted"
        );
        Ok(report)
    }

    /// Row and bytes of one tile.
    pub fn get_tile(&self, task_id: u64, coord: TileCoord) -> Result<TileContent> {
        let task = self.repo.get_task(task_id)?;
        let storage = open_storage(task.tiling_config()?.storage, &self.storage);
        self.load_tile(&*storage, task_id, coord)
    }

    /// Rows and bytes of several tiles; coordinates without a tile are
    /// listed as missing.
    pub fn batch_get_tiles(&self, task_id: u64, coords: &[TileCoord]) -> Result<BatchTiles> {
        let task = self.repo.get_task(task_id)?;
        let storage = open_storage(task.tiling_config()?.storage, &self.storage);
        let mut batch = BatchTiles::default();
        for &coord in coords {
            match self.load_tile(&*storage, task_id, coord) {
                Ok(content) => batch.found.push(content),
                Err(TilerError::NotFound(_)) => batch.missing.push(coord),
                Err(e) => return Err(e),
            }
        }
        Ok(batch)
    }

    fn load_tile(&self, storage: &dyn Storage, task_id: u64, coord: TileCoord) -> Result<TileContent> {
        let tile = self
            .repo
            .tile_by_coord(task_id, coord)?
            .ok_or_else(|| TilerError::NotFound(format!("tile {coord} of task {task_id}")))?;
        let bytes = storage.read(&tile.path)?;
        Ok(TileContent { tile, bytes })
    }

    /// Stop accepting jobs and wait for the workers to drain the queue.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
    }
}

impl Drop for TaskService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(receiver: Receiver<Job>, ctx: WorkerContext) {
    for job in receiver.iter() {
        let task_id = job.task_id;
        let outcome = run_job(&ctx, job);

        if let Ok(mut registry) = ctx.shared.lock() {
            registry.active.remove(&task_id);
            match outcome {
                Ok(summary) => {
                    registry.summaries.insert(task_id, summary);
                }
                Err(e) => {
                    registry.summaries.remove(&task_id);
                    debug!(task_id, error = %e, "Job ended without a summary");
                }
            }
        }
        ctx.shared.finished.notify_all();
    }
    debug!("Worker exiting");
}

fn run_job(ctx: &WorkerContext, job: Job) -> Result<RunSummary> {
    let config = ctx.repo.get_task(job.task_id)?.tiling_config()?;
    let orchestrator = Orchestrator::new(
        open_storage(config.storage, &ctx.storage),
        ctx.repo.handle(),
        Arc::clone(&ctx.source),
    )
    .with_progress(ctx.progress.clone())
    .with_cancellation(job.cancel);
    orchestrator.process(job.task_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageKind;
    use crate::ingestion::GeometryData;
    use crate::ingestion::synthetic;
    use crate::repository::MemoryRepository;

    /// Geometry source that blocks until released.
    struct Gate {
        release: Receiver<()>,
    }

    impl GeometrySource for Gate {
        fn load(&self, _source: &str) -> Result<GeometryData> {
            let _ = self.release.recv_timeout(Duration::from_secs(10));
            Ok(GeometryData::new(synthetic::terrain(10.0, 4, 1.0, 0.0)))
        }
    }

    fn object_config(max_level: u32) -> TilingConfig {
        TilingConfig {
            max_level,
            storage: StorageKind::Object,
            parallelism: 2,
            ..Default::default()
        }
    }

    fn service() -> (TaskService, ServiceSettings) {
        let dir = std::env::temp_dir();
        let settings = ServiceSettings::local(dir);
        let service =
            TaskService::new(settings.clone(), Arc::new(MemoryRepository::new())).unwrap();
        (service, settings)
    }

    #[test]
    fn create_runs_in_the_background() {
        let (service, settings) = service();
        let task = service
            .create_task("t", "synthetic:terrain?size=20&resolution=8", "run", &object_config(1))
            .unwrap();
        assert_eq!(task.status, TaskStatus::Queued);

        let done = service.wait_for(task.id, Duration::from_secs(30)).unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        let progress = service.get_progress(task.id).unwrap();
        assert_eq!(progress.percent, 100.0);
        assert_eq!(progress.estimated_remaining, None);

        let summary = service.last_summary(task.id).unwrap();
        assert!(summary.tiles_written > 0);
        assert!(settings.storage.object_store.exists("run/index.json"));
    }

    #[test]
    fn invalid_config_rejected_up_front() {
        let (service, _) = service();
        let config = TilingConfig {
            max_level: 42,
            ..Default::default()
        };
        let err = service.create_task("t", "synthetic:sphere", "o", &config).unwrap_err();
        assert!(matches!(err, TilerError::Validation(_)));
        assert!(service.list_tasks().unwrap().is_empty());
    }

    #[test]
    fn cancel_while_loading() {
        let (release_tx, release_rx) = channel::bounded(1);
        let settings = ServiceSettings::local(std::env::temp_dir());
        let service = TaskService::start(
            settings,
            Arc::new(MemoryRepository::new()),
            Arc::new(Gate { release: release_rx }),
        )
        .unwrap();

        let task = service.create_task("t", "gated", "gated", &object_config(2)).unwrap();
        assert!(service.cancel_task(task.id).unwrap());
        release_tx.send(()).unwrap();

        let done = service.wait_for(task.id, Duration::from_secs(30)).unwrap();
        assert_eq!(done.status, TaskStatus::Cancelled);
        assert!(service.last_summary(task.id).is_none());
        // Final tasks cannot be cancelled again.
        assert!(!service.cancel_task(task.id).unwrap());
    }

    #[test]
    fn tiles_by_coordinate() {
        let (service, _) = service();
        let task = service
            .create_task("t", "synthetic:terrain?size=20&resolution=8", "tiles", &object_config(1))
            .unwrap();
        service.wait_for(task.id, Duration::from_secs(30)).unwrap();

        let root = service.get_tile(task.id, TileCoord::new(0, 0, 0, 0)).unwrap();
        assert_eq!(&root.bytes[..4], b"tile");
        assert_eq!(root.tile.size, root.bytes.len() as u64);

        let absent = TileCoord::new(1, 9, 9, 9);
        let batch = service
            .batch_get_tiles(task.id, &[TileCoord::new(0, 0, 0, 0), absent])
            .unwrap();
        assert_eq!(batch.found.len(), 1);
        assert_eq!(batch.missing, vec![absent]);
        assert!(matches!(
            service.get_tile(task.id, absent),
            Err(TilerError::NotFound(_))
        ));
    }

    #[test]
    fn delete_cascades() {
        let (service, settings) = service();
        let task = service
            .create_task("t", "synthetic:terrain?size=20&resolution=8", "gone", &object_config(1))
            .unwrap();
        service.wait_for(task.id, Duration::from_secs(30)).unwrap();
        let store = &settings.storage.object_store;
        assert!(!store.list("gone").unwrap().is_empty());

        let report = service.delete_task(task.id).unwrap();
        assert!(report.tiles_deleted > 0);
        assert!(store.list("gone").unwrap().is_empty());
        assert!(matches!(service.get_task(task.id), Err(TilerError::NotFound(_))));
    }
}
