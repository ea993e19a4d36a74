//! JSON file-backed store.
//!
//! The whole tree is loaded on open and rewritten after every change.

use super::{KeyValueStore, MemoryStore, StoreError};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A [`MemoryStore`] persisted to a JSON file.
#[derive(Debug)]
pub struct FileStore {
    inner: MemoryStore,
    path: PathBuf,
    /// Serializes writers so the file always reflects a complete tree
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open the store at `path`. A missing file starts an empty tree.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let inner = if path.exists() {
            let content =
                std::fs::read_to_string(&path).map_err(|e| StoreError::IoError(e.to_string()))?;
            let root: Value = if content.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&content)
                    .map_err(|e| StoreError::SerializeError(e.to_string()))?
            };
            MemoryStore::from_value(root)
        } else {
            MemoryStore::new()
        };

        tracing::debug!(path = ?path, "opened file store");

        Ok(Self {
            inner,
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current tree to disk.
    fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::IoError(e.to_string()))?;
        }

        let root = self.inner.snapshot()?;
        let json = serde_json::to_string_pretty(&root)
            .map_err(|e| StoreError::SerializeError(e.to_string()))?;

        std::fs::write(&self.path, json).map_err(|e| StoreError::IoError(e.to_string()))
    }

    /// Apply a change and persist it. The in-memory tree is rolled back when
    /// the file cannot be written.
    fn write_through(
        &self,
        change: impl FnOnce(&MemoryStore) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let previous = self.inner.snapshot()?;
        change(&self.inner)?;

        if let Err(e) = self.save() {
            tracing::warn!(path = ?self.path, "store write failed, rolling back: {}", e);
            self.inner.restore(previous)?;
            return Err(e);
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(path)
    }

    fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.write_through(|inner| inner.set(path, value))
    }

    fn merge(&self, path: &str, partial: Value) -> Result<(), StoreError> {
        self.write_through(|inner| inner.merge(path, partial))
    }
}
