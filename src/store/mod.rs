//! Hierarchical key-path JSON storage.
//!
//! Records live in a single JSON tree addressed by slash-separated paths such
//! as `Sensor/abc` or `Log`. Implementations provide three operations:
//! - `get` returns the subtree at a path, or `None` when nothing is there
//! - `set` replaces the subtree at a path (`null` removes it)
//! - `merge` replaces only the children named in a partial object

pub mod file;
pub mod memory;
pub mod repository;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use repository::TelemetryRepository;

use serde_json::Value;

/// A JSON tree addressed by key paths.
pub trait KeyValueStore: Send + Sync {
    /// Read the subtree at `path`.
    fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the subtree at `path`.
    fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Shallow-merge the children of `partial` into the object at `path`.
    fn merge(&self, path: &str, partial: Value) -> Result<(), StoreError>;
}

/// Storage errors.
#[derive(Debug)]
pub enum StoreError {
    IoError(String),
    SerializeError(String),
    InvalidPath(String),
    Poisoned,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::IoError(e) => write!(f, "IO error: {e}"),
            StoreError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            StoreError::InvalidPath(p) => write!(f, "Invalid path: {p:?}"),
            StoreError::Poisoned => write!(f, "Store lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Split a path into its non-empty segments.
pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Join path segments.
pub fn join_path(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|part| segments(part))
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_ignore_empty_parts() {
        assert_eq!(segments("/Log//abc/"), vec!["Log", "abc"]);
        assert!(segments("").is_empty());
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path(&["Log", "abc"]), "Log/abc");
        assert_eq!(join_path(&["/Sensor/", "x/y"]), "Sensor/x/y");
    }
}
