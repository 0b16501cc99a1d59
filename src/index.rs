//! Tile index (`index.json`): generation, validation and best-effort repair.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, TilerError};
use crate::repository::Repository;
use crate::storage::{Storage, join_path};
use crate::types::{BoundingBox, Tile, TileCoord, now_millis};

pub const INDEX_FILE: &str = "index.json";
pub const TILES_DIR: &str = "tiles";

/// Persisted manifest of every tile of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileIndex {
    pub task_id: u64,
    pub tile_count: usize,
    pub bounds: BoundingBox,
    pub tiles: Vec<IndexEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub level: u32,
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub path: String,
    pub size: u64,
    pub bbox: BoundingBox,
}

impl IndexEntry {
    pub fn coord(&self) -> TileCoord {
        TileCoord::new(self.level, self.x, self.y, self.z)
    }
}

impl TileIndex {
    pub fn from_tiles(task_id: u64, tiles: &[Tile]) -> Self {
        let bounds = tiles
            .iter()
            .map(|t| t.bounds)
            .reduce(|a, b| a.merge(&b))
            .unwrap_or_else(|| BoundingBox::new([0.0; 3], [0.0; 3]));
        let mut entries: Vec<IndexEntry> = tiles
            .iter()
            .map(|t| IndexEntry {
                level: t.coord.level,
                x: t.coord.x,
                y: t.coord.y,
                z: t.coord.z,
                path: t.path.clone(),
                size: t.size,
                bbox: t.bounds,
            })
            .collect();
        entries.sort_by_key(IndexEntry::coord);
        Self {
            task_id,
            tile_count: entries.len(),
            bounds,
            tiles: entries,
        }
    }
}

/// Enumerate the task's tiles into an index.
pub fn generate_index(repo: &dyn Repository, task_id: u64) -> Result<TileIndex> {
    Ok(TileIndex::from_tiles(task_id, &repo.tiles_for_task(task_id)?))
}

/// Write `{output}/index.json`; returns its path.
pub fn write_index(storage: &dyn Storage, output_path: &str, index: &TileIndex) -> Result<String> {
    let path = join_path(output_path, INDEX_FILE);
    storage.write(&path, &serde_json::to_vec_pretty(index)?, "application/json")?;
    info!(task_id = index.task_id, tiles = index.tile_count, path = %path, "Wrote tile index");
    Ok(path)
}

pub fn read_index(storage: &dyn Storage, output_path: &str) -> Result<TileIndex> {
    let bytes = storage.read(&join_path(output_path, INDEX_FILE))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| TilerError::Consistency(format!("malformed index: {e}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
}

/// Issues from one or more validation passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Valid unless some pass reported an error.
    pub fn is_valid(&self) -> bool {
        self.issues.iter().all(|i| i.severity != Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn merge(mut self, other: ValidationResult) -> ValidationResult {
        self.issues.extend(other.issues);
        self
    }

    fn push(&mut self, severity: Severity, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity,
            message: message.into(),
        });
    }
}

/// Format pass: the index must parse.
pub fn validate_format(bytes: &[u8]) -> (ValidationResult, Option<TileIndex>) {
    let mut result = ValidationResult::default();
    match serde_json::from_slice::<TileIndex>(bytes) {
        Ok(index) => (result, Some(index)),
        Err(e) => {
            result.push(Severity::Error, format!("index is not well-formed: {e}"));
            (result, None)
        }
    }
}

/// Consistency pass: declared counts against persisted rows, and every
/// listed path present in storage.
pub fn validate_consistency(
    index: &TileIndex,
    actual_count: usize,
    storage: &dyn Storage,
) -> ValidationResult {
    let mut result = ValidationResult::default();
    if index.tile_count != actual_count {
        result.push(
            Severity::Warning,
            format!(
                "index declares {} tiles but {} are persisted",
                index.tile_count, actual_count
            ),
        );
    }
    if index.tile_count != index.tiles.len() {
        result.push(
            Severity::Warning,
            format!(
                "index declares {} tiles but lists {}",
                index.tile_count,
                index.tiles.len()
            ),
        );
    }
    for entry in &index.tiles {
        if !storage.exists(&entry.path) {
            result.push(
                Severity::Error,
                format!("tile {} missing from storage at {}", entry.coord(), entry.path),
            );
        }
    }
    result
}

/// Run both passes against the stored index of a task.
pub fn validate_index(
    storage: &dyn Storage,
    repo: &dyn Repository,
    task_id: u64,
    output_path: &str,
) -> Result<ValidationResult> {
    let path = join_path(output_path, INDEX_FILE);
    let bytes = match storage.read(&path) {
        Ok(b) => b,
        Err(TilerError::NotFound(_)) => {
            let mut result = ValidationResult::default();
            result.push(Severity::Error, format!("index missing at {path}"));
            return Ok(result);
        }
        Err(e) => return Err(e),
    };
    let (format, index) = validate_format(&bytes);
    let Some(index) = index else {
        return Ok(format);
    };
    let consistency = validate_consistency(&index, repo.count_tiles(task_id)?, storage);
    let result = format.merge(consistency);
    for issue in result.warnings() {
        warn!(task_id, issue = %issue.message, "Index consistency warning");
    }
    Ok(result)
}

/// Outcome of a repair. Repair is advisory and always succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub success: bool,
    pub actions: Vec<String>,
}

/// Drop rows whose content is gone and rewrite the index from the rows.
///
/// Never fails: problems are logged and listed in the report.
pub fn repair_index(
    storage: &dyn Storage,
    repo: &dyn Repository,
    task_id: u64,
    output_path: &str,
) -> RepairReport {
    let mut actions = Vec::new();
    match repo.tiles_for_task(task_id) {
        Ok(tiles) => {
            for tile in tiles.iter().filter(|t| !storage.exists(&t.path)) {
                match repo.delete_tile(task_id, tile.coord) {
                    Ok(_) => actions.push(format!("dropped row for missing tile {}", tile.coord)),
                    Err(e) => actions.push(format!("could not drop row {}: {e}", tile.coord)),
                }
            }
        }
        Err(e) => actions.push(format!("could not list tiles: {e}")),
    }
    match generate_index(repo, task_id).and_then(|idx| write_index(storage, output_path, &idx)) {
        Ok(path) => actions.push(format!("rewrote {path}")),
        Err(e) => actions.push(format!("could not rewrite index: {e}")),
    }
    for action in &actions {
        info!(task_id, action = %action, "Index repair");
    }
    RepairReport {
        success: true,
        actions,
    }
}

/// Validation, repair when invalid, and the final validation outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCheck {
    pub initial: ValidationResult,
    pub repair: Option<RepairReport>,
    /// Outcome after repair; recorded, never used to fail a task.
    pub final_valid: bool,
    pub checked_at: u64,
}

pub fn validate_and_repair(
    storage: &dyn Storage,
    repo: &dyn Repository,
    task_id: u64,
    output_path: &str,
) -> Result<IndexCheck> {
    let initial = validate_index(storage, repo, task_id, output_path)?;
    if initial.is_valid() {
        return Ok(IndexCheck {
            final_valid: true,
            initial,
            repair: None,
            checked_at: now_millis(),
        });
    }
    for issue in initial.errors() {
        warn!(task_id, issue = %issue.message, "Index invalid");
    }
    let report = repair_index(storage, repo, task_id, output_path);
    let final_valid = validate_index(storage, repo, task_id, output_path)
        .map(|r| r.is_valid())
        .unwrap_or(false);
    if !final_valid {
        warn!(task_id, "Index still invalid after repair");
    }
    Ok(IndexCheck {
        initial,
        repair: Some(report),
        final_valid,
        checked_at: now_millis(),
    })
}

/// Relative path of a tile: `tiles/{level}/{x}_{y}_{z}.{ext}`.
pub fn tile_rel_path(coord: TileCoord, ext: &str) -> String {
    format!("{TILES_DIR}/{}/{}_{}_{}.{ext}", coord.level, coord.x, coord.y, coord.z)
}

/// Inverse of [`tile_rel_path`] on the part after the output prefix.
pub fn parse_tile_rel_path(rel: &str) -> Option<TileCoord> {
    let rest = rel.strip_prefix(TILES_DIR)?.strip_prefix('/')?;
    let (level, file) = rest.split_once('/')?;
    let stem = file.split_once('.').map_or(file, |(s, _)| s);
    let mut xyz = stem.split('_').map(str::parse::<u32>);
    let coord = TileCoord::new(
        level.parse().ok()?,
        xyz.next()?.ok()?,
        xyz.next()?.ok()?,
        xyz.next()?.ok()?,
    );
    xyz.next().is_none().then_some(coord)
}

/// Rows for the tile files present in storage under `output_path`.
///
/// Boxes and sizes come from `index` where it lists the tile.
pub fn scan_tiles(
    storage: &dyn Storage,
    output_path: &str,
    task_id: u64,
    index: Option<&TileIndex>,
) -> Result<Vec<Tile>> {
    let prefix = join_path(output_path, "");
    let tiles_prefix = join_path(output_path, TILES_DIR);
    let now = now_millis();
    let mut out = Vec::new();
    for path in storage.list(&tiles_prefix)? {
        let rel = if prefix.is_empty() {
            path.as_str()
        } else {
            match path.strip_prefix(&prefix).and_then(|p| p.strip_prefix('/')) {
                Some(r) => r,
                None => continue,
            }
        };
        let Some(coord) = parse_tile_rel_path(rel) else {
            continue;
        };
        let entry = index.and_then(|i| i.tiles.iter().find(|e| e.coord() == coord));
        let size = match entry {
            Some(e) => e.size,
            None => storage.read(&path)?.len() as u64,
        };
        out.push(Tile {
            id: 0,
            task_id,
            coord,
            bounds: entry.map_or_else(|| BoundingBox::new([0.0; 3], [0.0; 3]), |e| e.bbox),
            path: path.clone(),
            size,
            content_hash: None,
            created_at: now,
            updated_at: now,
        });
    }
    Ok(out)
}
