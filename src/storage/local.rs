use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{Storage, normalize_path};
use crate::error::{Result, TilerError};

/// Files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let key = normalize_path(path);
        let mut out = self.root.clone();
        for seg in key.split('/').filter(|s| !s.is_empty() && *s != "..") {
            out.push(seg);
        }
        out
    }
}

impl Storage for LocalStorage {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.resolve(path)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => TilerError::NotFound(path.to_string()),
            _ => TilerError::io(path, e),
        })
    }

    fn write(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| TilerError::io(path, e))?;
        }
        // Write beside the target, then rename over it.
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TilerError::io(path, "path has no file name"))?;
        let tmp = target.with_file_name(format!(".{file_name}.tmp"));
        fs::write(&tmp, bytes).map_err(|e| TilerError::io(path, e))?;
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(TilerError::io(path, e));
        }
        debug!(path, bytes = bytes.len(), content_type, "Stored file");
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<bool> {
        match fs::remove_file(self.resolve(path)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(TilerError::io(path, e)),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let base = self.resolve(prefix);
        let mut out = Vec::new();
        if !base.is_dir() {
            if base.is_file() {
                out.push(normalize_path(prefix));
            }
            return Ok(out);
        }
        let mut stack = vec![base];
        while let Some(dir) = stack.pop() {
            let entries = fs::read_dir(&dir).map_err(|e| TilerError::io(prefix, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| TilerError::io(prefix, e))?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    if !is_temp_file(&key) {
                        out.push(key);
                    }
                }
            }
        }
        out.sort();
        Ok(out)
    }

    fn remove_empty_dirs(&self, prefix: &str) -> Result<usize> {
        let base = self.resolve(prefix);
        if !base.is_dir() {
            return Ok(0);
        }
        prune(&base).map_err(|e| TilerError::io(prefix, e))
    }
}

fn is_temp_file(key: &str) -> bool {
    key.rsplit('/')
        .next()
        .is_some_and(|name| name.starts_with('.') && name.ends_with(".tmp"))
}

/// Depth-first removal of empty directories, `dir` included.
fn prune(dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            removed += prune(&path)?;
        }
    }
    if fs::read_dir(dir)?.next().is_none() {
        fs::remove_dir(dir)?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_creates_parents_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStorage::new(dir.path());
        store.write("out/tiles/2/1_0_0.b3dm", b"x", "application/octet-stream").unwrap();
        assert!(dir.path().join("out/tiles/2/1_0_0.b3dm").is_file());
        assert!(!dir.path().join("out/tiles/2/.1_0_0.b3dm.tmp").exists());

        store.write("out/tiles/2/1_0_0.b3dm", b"yy", "application/octet-stream").unwrap();
        assert_eq!(store.read("out/tiles/2/1_0_0.b3dm").unwrap(), b"yy");
    }

    #[test]
    fn prunes_empty_directories_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStorage::new(dir.path());
        store.write("out/tiles/0/0_0_0.glb", b"a", "model/gltf-binary").unwrap();
        store.write("out/tiles/1/0_0_0.glb", b"b", "model/gltf-binary").unwrap();
        store.delete("out/tiles/1/0_0_0.glb").unwrap();

        assert_eq!(store.remove_empty_dirs("out").unwrap(), 1);
        assert!(dir.path().join("out/tiles/0").is_dir());
        assert!(!dir.path().join("out/tiles/1").exists());

        store.delete("out/tiles/0/0_0_0.glb").unwrap();
        assert_eq!(store.remove_empty_dirs("out").unwrap(), 3);
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn parent_segments_stay_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStorage::new(dir.path().join("root"));
        store.write("../escape.txt", b"x", "text/plain").unwrap();
        assert!(dir.path().join("root/escape.txt").is_file());
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn list_of_missing_prefix_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStorage::new(dir.path());
        assert!(store.list("nothing/here").unwrap().is_empty());
    }
}
