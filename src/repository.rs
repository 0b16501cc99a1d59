//! Persistence of tasks and tile rows.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Result, TilerError};
use crate::types::{Tile, TileCoord, TilingTask, now_millis};

pub trait Repository: Send + Sync {
    /// Store a new task and return it with its assigned id.
    fn insert_task(&self, task: TilingTask) -> Result<TilingTask>;
    fn get_task(&self, id: u64) -> Result<TilingTask>;
    fn update_task(&self, task: &TilingTask) -> Result<()>;
    fn delete_task(&self, id: u64) -> Result<bool>;
    fn list_tasks(&self) -> Result<Vec<TilingTask>>;

    /// Tiles of a task ordered by coordinate.
    fn tiles_for_task(&self, task_id: u64) -> Result<Vec<Tile>>;
    fn tile_by_coord(&self, task_id: u64, coord: TileCoord) -> Result<Option<Tile>>;
    /// Insert or update a batch in one commit. A row whose key already exists
    /// keeps its id and creation time.
    fn upsert_tiles(&self, tiles: Vec<Tile>) -> Result<Vec<Tile>>;
    fn delete_tile(&self, task_id: u64, coord: TileCoord) -> Result<bool>;
    fn delete_tiles_for_task(&self, task_id: u64) -> Result<usize>;
    fn count_tiles(&self, task_id: u64) -> Result<usize>;

    /// Independent handle onto the same data, for use on another thread.
    fn handle(&self) -> Arc<dyn Repository>;
}

#[derive(Debug, Default)]
struct Tables {
    tasks: BTreeMap<u64, TilingTask>,
    tiles: HashMap<u64, BTreeMap<TileCoord, Tile>>,
    next_task_id: u64,
    next_tile_id: u64,
}

/// In-memory tables; clones share them.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| TilerError::Consistency("repository lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| TilerError::Consistency("repository lock poisoned".into()))
    }
}

impl Repository for MemoryRepository {
    fn insert_task(&self, mut task: TilingTask) -> Result<TilingTask> {
        let mut t = self.write()?;
        t.next_task_id += 1;
        task.id = t.next_task_id;
        t.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    fn get_task(&self, id: u64) -> Result<TilingTask> {
        self.read()?
            .tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| TilerError::NotFound(format!("task {id}")))
    }

    fn update_task(&self, task: &TilingTask) -> Result<()> {
        let mut t = self.write()?;
        match t.tasks.get_mut(&task.id) {
            Some(row) => {
                *row = task.clone();
                Ok(())
            }
            None => Err(TilerError::NotFound(format!("task {}", task.id))),
        }
    }

    fn delete_task(&self, id: u64) -> Result<bool> {
        let mut t = self.write()?;
        t.tiles.remove(&id);
        Ok(t.tasks.remove(&id).is_some())
    }

    fn list_tasks(&self) -> Result<Vec<TilingTask>> {
        Ok(self.read()?.tasks.values().cloned().collect())
    }

    fn tiles_for_task(&self, task_id: u64) -> Result<Vec<Tile>> {
        Ok(self
            .read()?
            .tiles
            .get(&task_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    fn tile_by_coord(&self, task_id: u64, coord: TileCoord) -> Result<Option<Tile>> {
        Ok(self
            .read()?
            .tiles
            .get(&task_id)
            .and_then(|m| m.get(&coord))
            .cloned())
    }

    fn upsert_tiles(&self, tiles: Vec<Tile>) -> Result<Vec<Tile>> {
        let mut t = self.write()?;
        let now = now_millis();
        let mut stored = Vec::with_capacity(tiles.len());
        for mut tile in tiles {
            let existing = t
                .tiles
                .get(&tile.task_id)
                .and_then(|m| m.get(&tile.coord))
                .map(|row| (row.id, row.created_at));
            match existing {
                Some((id, created_at)) => {
                    tile.id = id;
                    tile.created_at = created_at;
                }
                None => {
                    t.next_tile_id += 1;
                    tile.id = t.next_tile_id;
                    tile.created_at = now;
                }
            }
            tile.updated_at = now;
            t.tiles
                .entry(tile.task_id)
                .or_default()
                .insert(tile.coord, tile.clone());
            stored.push(tile);
        }
        Ok(stored)
    }

    fn delete_tile(&self, task_id: u64, coord: TileCoord) -> Result<bool> {
        Ok(self
            .write()?
            .tiles
            .get_mut(&task_id)
            .and_then(|m| m.remove(&coord))
            .is_some())
    }

    fn delete_tiles_for_task(&self, task_id: u64) -> Result<usize> {
        Ok(self
            .write()?
            .tiles
            .remove(&task_id)
            .map(|m| m.len())
            .unwrap_or(0))
    }

    fn count_tiles(&self, task_id: u64) -> Result<usize> {
        Ok(self.read()?.tiles.get(&task_id).map_or(0, |m| m.len()))
    }

    fn handle(&self) -> Arc<dyn Repository> {
        Arc::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TilingConfig;
    use crate::types::BoundingBox;

    fn tile(task_id: u64, coord: TileCoord, size: u64) -> Tile {
        Tile {
            id: 0,
            task_id,
            coord,
            bounds: BoundingBox::new([0.0; 3], [1.0; 3]),
            path: format!("out/tiles/{}.b3dm", coord.name()),
            size,
            content_hash: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn task_ids_increase() {
        let repo = MemoryRepository::new();
        let cfg = TilingConfig::default();
        let a = repo.insert_task(TilingTask::new("a", "s", "o", &cfg).unwrap()).unwrap();
        let b = repo.insert_task(TilingTask::new("b", "s", "o", &cfg).unwrap()).unwrap();
        assert!(b.id > a.id);
        assert_eq!(repo.get_task(a.id).unwrap().name, "a");
        assert!(matches!(repo.get_task(99), Err(TilerError::NotFound(_))));
        assert_eq!(repo.list_tasks().unwrap().len(), 2);
    }

    #[test]
    fn upsert_preserves_identity() {
        let repo = MemoryRepository::new();
        let c = TileCoord::new(1, 0, 1, 0);
        let first = repo.upsert_tiles(vec![tile(1, c, 10)]).unwrap();
        let second = repo.upsert_tiles(vec![tile(1, c, 20)]).unwrap();
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(first[0].created_at, second[0].created_at);
        let row = repo.tile_by_coord(1, c).unwrap().unwrap();
        assert_eq!(row.size, 20);
        assert_eq!(repo.count_tiles(1).unwrap(), 1);
    }

    #[test]
    fn tiles_ordered_and_scoped_per_task() {
        let repo = MemoryRepository::new();
        repo.upsert_tiles(vec![
            tile(1, TileCoord::new(1, 1, 0, 0), 1),
            tile(1, TileCoord::new(0, 0, 0, 0), 1),
            tile(2, TileCoord::new(0, 0, 0, 0), 1),
        ])
        .unwrap();
        let coords: Vec<_> = repo.tiles_for_task(1).unwrap().iter().map(|t| t.coord).collect();
        assert_eq!(coords, vec![TileCoord::new(0, 0, 0, 0), TileCoord::new(1, 1, 0, 0)]);

        assert!(repo.delete_tile(1, TileCoord::new(1, 1, 0, 0)).unwrap());
        assert_eq!(repo.delete_tiles_for_task(1).unwrap(), 1);
        assert_eq!(repo.count_tiles(1).unwrap(), 0);
        assert_eq!(repo.count_tiles(2).unwrap(), 1);
    }

    #[test]
    fn handles_share_tables() {
        let repo = MemoryRepository::new();
        let other = repo.handle();
        let task = other
            .insert_task(TilingTask::new("t", "s", "o", &TilingConfig::default()).unwrap())
            .unwrap();
        assert_eq!(repo.get_task(task.id).unwrap().name, "t");
        assert!(matches!(repo.get_task(task.id + 1), Err(TilerError::NotFound(_))));
    }
}
