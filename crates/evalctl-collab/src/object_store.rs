// evalctl-collab/src/object_store.rs
// ============================================================================
// Module: Filesystem Object Store
// Description: Built-in ObjectStore implementation backed by a directory tree.
// Purpose: Give the engine a zero-config ObjectStore for local runs and
//          tests; keys map directly onto relative file paths.
// Dependencies: evalctl-core
// ============================================================================

use std::path::{Path, PathBuf};

use evalctl_core::{EngineError, ObjectStore};

/// Stores blobs as files under a root directory, one file per key.
///
/// Keys are treated as `/`-separated relative paths; `put` creates parent
/// directories as needed. Not suitable for concurrent writers across
/// processes beyond what the filesystem itself guarantees.
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    /// Directory every key is resolved relative to.
    root: PathBuf,
}

impl FilesystemObjectStore {
    /// Builds a store rooted at `root`, creating the directory if it does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] if `root` cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|err| EngineError::Transient(format!("cannot create object store root: {err}")))?;
        Ok(Self { root })
    }

    /// Resolves a key into a path under the store root, rejecting any key
    /// that would escape it.
    fn resolve(&self, key: &str) -> Result<PathBuf, EngineError> {
        if key.is_empty() || key.contains("..") {
            return Err(EngineError::Permanent(format!("invalid object key: {key}")));
        }
        Ok(self.root.join(key))
    }
}

impl ObjectStore for FilesystemObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), EngineError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| EngineError::Transient(format!("cannot create object directory: {err}")))?;
        }
        std::fs::write(&path, bytes)
            .map_err(|err| EngineError::Transient(format!("cannot write object {key}: {err}")))
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, EngineError> {
        let path = self.resolve(key)?;
        std::fs::read(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                EngineError::NotFound(format!("object {key}"))
            } else {
                EngineError::Transient(format!("cannot read object {key}: {err}"))
            }
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, EngineError> {
        let base = self.resolve(prefix)?;
        let mut out = Vec::new();
        if base.is_dir() {
            collect_keys(&self.root, &base, &mut out)?;
        } else if base.is_file() {
            out.push(prefix.to_owned());
        }
        out.sort();
        Ok(out)
    }

    fn delete(&self, key: &str) -> Result<(), EngineError> {
        let path = self.resolve(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(EngineError::Transient(format!("cannot delete object {key}: {err}"))),
        }
    }
}

/// Recursively walks `dir`, appending every file's key (relative to `root`)
/// to `out`.
fn collect_keys(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), EngineError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|err| EngineError::Transient(format!("cannot list objects: {err}")))?;
    for entry in entries {
        let entry = entry.map_err(|err| EngineError::Transient(format!("cannot list objects: {err}")))?;
        let path = entry.path();
        if path.is_dir() {
            collect_keys(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use evalctl_core::{EngineError, ObjectStore};
    use tempfile::TempDir;

    use super::FilesystemObjectStore;

    #[test]
    fn put_then_get_round_trips_bytes() -> Result<(), EngineError> {
        let dir = TempDir::new().map_err(|err| EngineError::Transient(err.to_string()))?;
        let store = FilesystemObjectStore::new(dir.path())?;
        store.put("use_cases/1/config", b"hello")?;
        assert_eq!(store.get("use_cases/1/config")?, b"hello");
        Ok(())
    }

    #[test]
    fn get_on_a_missing_key_returns_not_found() -> Result<(), EngineError> {
        let dir = TempDir::new().map_err(|err| EngineError::Transient(err.to_string()))?;
        let store = FilesystemObjectStore::new(dir.path())?;
        let result = store.get("nope");
        assert!(matches!(result, Err(EngineError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn list_finds_every_key_under_a_prefix() -> Result<(), EngineError> {
        let dir = TempDir::new().map_err(|err| EngineError::Transient(err.to_string()))?;
        let store = FilesystemObjectStore::new(dir.path())?;
        store.put("use_cases/1/config", b"a")?;
        store.put("use_cases/1/models/m1/dataset", b"b")?;
        let keys = store.list("use_cases/1")?;
        assert_eq!(keys.len(), 2);
        Ok(())
    }

    #[test]
    fn a_traversal_key_is_rejected() -> Result<(), EngineError> {
        let dir = TempDir::new().map_err(|err| EngineError::Transient(err.to_string()))?;
        let store = FilesystemObjectStore::new(dir.path())?;
        let result = store.put("../escape", b"x");
        assert!(matches!(result, Err(EngineError::Permanent(_))));
        Ok(())
    }
}
