use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::{Storage, normalize_path};
use crate::error::{Result, TilerError};

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Arc<[u8]>,
    content_type: String,
}

#[derive(Debug, Default)]
struct Bucket {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    writes: AtomicU64,
    deletes: AtomicU64,
}

/// In-process object store. Clones are handles onto the same bucket.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    bucket: Arc<Bucket>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total successful writes since creation.
    pub fn write_count(&self) -> u64 {
        self.bucket.writes.load(Ordering::Relaxed)
    }

    pub fn delete_count(&self) -> u64 {
        self.bucket.deletes.load(Ordering::Relaxed)
    }

    pub fn content_type(&self, path: &str) -> Option<String> {
        self.objects()
            .ok()?
            .get(&normalize_path(path))
            .map(|o| o.content_type.clone())
    }

    pub fn len(&self) -> usize {
        self.objects().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn objects(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, StoredObject>>> {
        self.bucket
            .objects
            .read()
            .map_err(|_| TilerError::io("object-store", "bucket lock poisoned"))
    }

    fn objects_mut(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, StoredObject>>> {
        self.bucket
            .objects
            .write()
            .map_err(|_| TilerError::io("object-store", "bucket lock poisoned"))
    }
}

impl Storage for MemoryObjectStore {
    fn exists(&self, path: &str) -> bool {
        self.objects()
            .map(|m| m.contains_key(&normalize_path(path)))
            .unwrap_or(false)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.objects()?
            .get(&normalize_path(path))
            .map(|o| o.bytes.to_vec())
            .ok_or_else(|| TilerError::NotFound(path.to_string()))
    }

    fn write(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let key = normalize_path(path);
        if key.is_empty() {
            return Err(TilerError::io(path, "empty object key"));
        }
        self.objects_mut()?.insert(
            key,
            StoredObject {
                bytes: Arc::from(bytes),
                content_type: content_type.to_string(),
            },
        );
        self.bucket.writes.fetch_add(1, Ordering::Relaxed);
        debug!(path, bytes = bytes.len(), content_type, "Stored object");
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<bool> {
        let removed = self.objects_mut()?.remove(&normalize_path(path)).is_some();
        if removed {
            self.bucket.deletes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = normalize_path(prefix);
        let objects = self.objects()?;
        if prefix.is_empty() {
            return Ok(objects.keys().cloned().collect());
        }
        let dir = format!("{prefix}/");
        Ok(objects
            .range(prefix.clone()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(&prefix))
            .filter(|k| **k == prefix || k.starts_with(&dir))
            .cloned()
            .collect())
    }

    /// Object stores have no directories.
    fn remove_empty_dirs(&self, _prefix: &str) -> Result<usize> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_slash_normalised() {
        let store = MemoryObjectStore::new();
        store.write("out\\tiles\\0\\0_0_0.b3dm", b"x", "application/octet-stream").unwrap();
        assert!(store.exists("out/tiles/0/0_0_0.b3dm"));
        assert!(store.exists("/out//tiles/0/0_0_0.b3dm"));
        assert_eq!(
            store.content_type("out/tiles/0/0_0_0.b3dm").as_deref(),
            Some("application/octet-stream")
        );
    }

    #[test]
    fn list_respects_segment_boundaries() {
        let store = MemoryObjectStore::new();
        for key in ["out/a", "out/b/c", "outer/d", "other"] {
            store.write(key, b"", "text/plain").unwrap();
        }
        assert_eq!(store.list("out").unwrap(), vec!["out/a", "out/b/c"]);
        assert_eq!(store.list("").unwrap().len(), 4);
    }

    #[test]
    fn counters_track_mutations() {
        let store = MemoryObjectStore::new();
        store.write("a", b"1", "text/plain").unwrap();
        store.write("a", b"2", "text/plain").unwrap();
        store.delete("a").unwrap();
        store.delete("a").unwrap();
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.delete_count(), 1);
        assert!(store.is_empty());
    }
}
