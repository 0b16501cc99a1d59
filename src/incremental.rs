//! Change detection between runs of the same task.
//!
//! Each tile is fingerprinted as `SHA-256(metadata || content)` where the
//! metadata is `level|x|y|z|boundingBoxJSON|path`. A tile whose fingerprint
//! matches the row from the previous run is not rewritten.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::repository::Repository;
use crate::storage::{Storage, join_path};
use crate::types::{BoundingBox, Tile, TileCoord, now_millis};

pub const INCREMENTAL_INDEX_FILE: &str = "incremental_index.json";

/// Hashes identifying one version of one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileFingerprint {
    pub coord: TileCoord,
    /// Hex SHA-256 over metadata followed by content.
    pub hash: String,
    /// Hex SHA-256 over the metadata alone.
    pub metadata_hash: String,
    /// False when the content could not be read and only metadata was hashed.
    pub content_hashed: bool,
}

pub fn metadata_string(coord: TileCoord, bounds: &BoundingBox, path: &str) -> Result<String> {
    Ok(format!(
        "{}|{}|{}|{}|{}|{}",
        coord.level,
        coord.x,
        coord.y,
        coord.z,
        serde_json::to_string(bounds)?,
        path
    ))
}

pub fn fingerprint(
    coord: TileCoord,
    bounds: &BoundingBox,
    path: &str,
    content: Option<&[u8]>,
) -> Result<TileFingerprint> {
    let meta = metadata_string(coord, bounds, path)?;
    let metadata_hash = hex(&Sha256::digest(meta.as_bytes()));
    let mut hasher = Sha256::new();
    hasher.update(meta.as_bytes());
    if let Some(bytes) = content {
        hasher.update(bytes);
    }
    Ok(TileFingerprint {
        coord,
        hash: hex(&hasher.finalize()),
        metadata_hash,
        content_hashed: content.is_some(),
    })
}

/// Fingerprint of a tile as it currently sits in storage.
///
/// Unreadable content degrades to a metadata-only fingerprint.
pub fn fingerprint_stored(storage: &dyn Storage, tile: &Tile) -> Result<TileFingerprint> {
    match storage.read(&tile.path) {
        Ok(bytes) => fingerprint(tile.coord, &tile.bounds, &tile.path, Some(&bytes)),
        Err(e) => {
            warn!(
                level = tile.coord.level,
                x = tile.coord.x,
                y = tile.coord.y,
                z = tile.coord.z,
                path = %tile.path,
                error = %e,
                "Tile content unreadable, fingerprinting metadata only"
            );
            fingerprint(tile.coord, &tile.bounds, &tile.path, None)
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// What to do with a freshly encoded tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No prior row under this key.
    Add,
    /// Prior row exists with a different fingerprint; `id` is kept.
    Update { id: u64 },
    /// Fingerprint matches the prior row; skip the write.
    Unchanged { id: u64 },
}

/// Counts of what a run changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

impl ChangeSet {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// Diff of the tiles produced by this run against the previous one.
#[derive(Debug)]
pub struct IncrementalTracker {
    prior: HashMap<TileCoord, Tile>,
    processed: HashSet<TileCoord>,
    max_level: u32,
    changes: ChangeSet,
}

impl IncrementalTracker {
    /// Snapshot the task's current rows as the previous run.
    pub fn load(repo: &dyn Repository, task_id: u64, max_level: u32) -> Result<Self> {
        let prior: HashMap<_, _> = repo
            .tiles_for_task(task_id)?
            .into_iter()
            .map(|t| (t.coord, t))
            .collect();
        debug!(task_id, prior = prior.len(), "Loaded previous tile set");
        Ok(Self {
            prior,
            processed: HashSet::new(),
            max_level,
            changes: ChangeSet::default(),
        })
    }

    pub fn prior(&self, coord: &TileCoord) -> Option<&Tile> {
        self.prior.get(coord)
    }

    /// Compare a new fingerprint with the previous run's row.
    ///
    /// Rows written without a recorded hash are fingerprinted from storage.
    pub fn decide(&self, storage: &dyn Storage, fp: &TileFingerprint) -> Result<Decision> {
        let Some(prev) = self.prior.get(&fp.coord) else {
            return Ok(Decision::Add);
        };
        let prev_hash = match &prev.content_hash {
            Some(h) => h.clone(),
            None => fingerprint_stored(storage, prev)?.hash,
        };
        if prev_hash == fp.hash && storage.exists(&prev.path) {
            Ok(Decision::Unchanged { id: prev.id })
        } else {
            Ok(Decision::Update { id: prev.id })
        }
    }

    /// Mark `coord` as produced by this run and count the outcome.
    pub fn record(&mut self, coord: TileCoord, decision: &Decision) {
        self.processed.insert(coord);
        match decision {
            Decision::Add => self.changes.added += 1,
            Decision::Update { .. } => self.changes.updated += 1,
            Decision::Unchanged { .. } => self.changes.unchanged += 1,
        }
    }

    /// Keep the previous run's tile at `coord` after this run failed to
    /// rewrite it. Returns that tile, if there was one.
    ///
    /// A retained tile is not obsolete and does not count as a change.
    pub fn mark_retained(&mut self, coord: TileCoord) -> Option<&Tile> {
        let prior = self.prior.get(&coord)?;
        self.processed.insert(coord);
        Some(prior)
    }

    pub fn is_processed(&self, coord: &TileCoord) -> bool {
        self.processed.contains(coord)
    }

    /// Prior tiles this run did not reproduce, or deeper than `max_level`.
    pub fn obsolete(&self) -> Vec<Tile> {
        let mut out: Vec<Tile> = self
            .prior
            .values()
            .filter(|t| t.coord.level > self.max_level || !self.processed.contains(&t.coord))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.coord);
        out
    }

    /// Delete the bytes and row of every obsolete tile.
    ///
    /// A tile whose bytes cannot be deleted keeps its row.
    pub fn remove_obsolete(
        &mut self,
        storage: &dyn Storage,
        repo: &dyn Repository,
        task_id: u64,
    ) -> Result<usize> {
        let mut removed = 0;
        for tile in self.obsolete() {
            if let Err(e) = storage.delete(&tile.path) {
                warn!(task_id, path = %tile.path, error = %e, "Failed to delete obsolete tile");
                continue;
            }
            repo.delete_tile(task_id, tile.coord)?;
            self.prior.remove(&tile.coord);
            removed += 1;
        }
        if removed > 0 {
            info!(task_id, tiles = removed, "Removed obsolete tiles");
        }
        self.changes.deleted += removed;
        Ok(removed)
    }

    pub fn changes(&self) -> ChangeSet {
        self.changes
    }
}

/// Hash-annotated manifest for change detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalIndex {
    pub task_id: u64,
    /// Milliseconds since the epoch at which this index was written.
    pub version: u64,
    pub tiles: Vec<IncrementalEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalEntry {
    pub level: u32,
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub path: String,
    pub hash: String,
    pub bbox: BoundingBox,
}

impl IncrementalIndex {
    pub fn from_tiles(task_id: u64, tiles: &[Tile]) -> Self {
        Self {
            task_id,
            version: now_millis(),
            tiles: tiles
                .iter()
                .map(|t| IncrementalEntry {
                    level: t.coord.level,
                    x: t.coord.x,
                    y: t.coord.y,
                    z: t.coord.z,
                    path: t.path.clone(),
                    hash: t.content_hash.clone().unwrap_or_default(),
                    bbox: t.bounds,
                })
                .collect(),
        }
    }
}

/// Write `{output}/incremental_index.json`; returns its path.
pub fn write_incremental_index(
    storage: &dyn Storage,
    output_path: &str,
    task_id: u64,
    tiles: &[Tile],
) -> Result<String> {
    let path = join_path(output_path, INCREMENTAL_INDEX_FILE);
    let index = IncrementalIndex::from_tiles(task_id, tiles);
    storage.write(&path, &serde_json::to_vec_pretty(&index)?, "application/json")?;
    info!(task_id, tiles = tiles.len(), path = %path, "Wrote incremental index");
    Ok(path)
}

pub fn read_incremental_index(storage: &dyn Storage, output_path: &str) -> Result<IncrementalIndex> {
    let bytes = storage.read(&join_path(output_path, INCREMENTAL_INDEX_FILE))?;
    Ok(serde_json::from_slice(&bytes)?)
}
