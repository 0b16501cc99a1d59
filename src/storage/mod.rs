//! Blob storage behind one contract, with a local-filesystem and an
//! in-process object-store backend.

mod local;
mod object;

use std::path::PathBuf;
use std::sync::Arc;

pub use local::LocalStorage;
pub use object::MemoryObjectStore;

use crate::config::StorageKind;
use crate::error::Result;

/// Paths are `/`-separated keys relative to the backend root.
pub trait Storage: Send + Sync {
    fn exists(&self, path: &str) -> bool;

    /// Missing paths are `TilerError::NotFound`.
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Replace the content at `path`. Readers never observe a partial write.
    fn write(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    /// Returns whether anything was removed.
    fn delete(&self, path: &str) -> Result<bool>;

    /// All stored paths under `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Prune directories left empty under `prefix`; returns how many went.
    fn remove_empty_dirs(&self, prefix: &str) -> Result<usize>;
}

/// Where each backend keeps its data.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub local_root: PathBuf,
    /// Bucket shared by every object-store handle opened from these settings.
    pub object_store: MemoryObjectStore,
}

impl StorageSettings {
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: root.into(),
            object_store: MemoryObjectStore::new(),
        }
    }
}

/// Open a fresh handle on the backend selected by `kind`.
pub fn open_storage(kind: StorageKind, settings: &StorageSettings) -> Arc<dyn Storage> {
    match kind {
        StorageKind::Local => Arc::new(LocalStorage::new(&settings.local_root)),
        StorageKind::Object => Arc::new(settings.object_store.clone()),
    }
}

/// Normalise separators and drop empty segments.
pub fn normalize_path(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a task prefix and a relative path into one storage key.
pub fn join_path(prefix: &str, rel: &str) -> String {
    let prefix = normalize_path(prefix);
    let rel = normalize_path(rel);
    match (prefix.is_empty(), rel.is_empty()) {
        (true, _) => rel,
        (_, true) => prefix,
        _ => format!("{prefix}/{rel}"),
    }
}
