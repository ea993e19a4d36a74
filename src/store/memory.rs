//! In-memory JSON tree store.

use super::{segments, KeyValueStore, StoreError};
use serde_json::{Map, Value};
use std::sync::RwLock;

/// A JSON tree guarded by a read-write lock.
#[derive(Debug)]
pub struct MemoryStore {
    root: RwLock<Value>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::from_value(Value::Object(Map::new()))
    }

    /// Create a store holding `root`. Non-object roots are replaced by `{}`.
    pub fn from_value(root: Value) -> Self {
        let root = match root {
            Value::Object(_) => root,
            _ => Value::Object(Map::new()),
        };
        Self {
            root: RwLock::new(root),
        }
    }

    /// Copy of the whole tree.
    pub fn snapshot(&self) -> Result<Value, StoreError> {
        let root = self.root.read().map_err(|_| StoreError::Poisoned)?;
        Ok(root.clone())
    }

    /// Replace the whole tree with an earlier snapshot.
    pub(crate) fn restore(&self, snapshot: Value) -> Result<(), StoreError> {
        let mut root = self.root.write().map_err(|_| StoreError::Poisoned)?;
        *root = snapshot;
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let root = self.root.read().map_err(|_| StoreError::Poisoned)?;

        let mut node = &*root;
        for segment in segments(path) {
            match node.get(segment) {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }

        Ok(present(node).cloned())
    }

    fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let mut root = self.root.write().map_err(|_| StoreError::Poisoned)?;
        let parts = segments(path);

        let Some((last, parents)) = parts.split_last() else {
            *root = match value {
                Value::Object(_) => value,
                _ => Value::Object(Map::new()),
            };
            return Ok(());
        };

        if value.is_null() {
            remove_at(&mut *root, parents, last);
            return Ok(());
        }

        let parent = object_at(&mut *root, parents);
        parent.insert(last.to_string(), value);
        Ok(())
    }

    fn merge(&self, path: &str, partial: Value) -> Result<(), StoreError> {
        let Value::Object(children) = partial else {
            return Err(StoreError::InvalidPath(format!(
                "{path}: merge requires an object"
            )));
        };

        let mut root = self.root.write().map_err(|_| StoreError::Poisoned)?;
        let parts = segments(path);

        for (key, child) in children {
            if child.is_null() {
                remove_at(&mut *root, &parts, &key);
            } else {
                object_at(&mut *root, &parts).insert(key, child);
            }
        }
        Ok(())
    }
}

/// Empty objects and nulls read back as absent.
fn present(node: &Value) -> Option<&Value> {
    match node {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        _ => Some(node),
    }
}

/// Walk to the object at `parts`, creating (or overwriting non-object) nodes.
fn object_at<'a>(root: &'a mut Value, parts: &[&str]) -> &'a mut Map<String, Value> {
    let mut node = root;
    for segment in parts {
        node = ensure_object(node)
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(node)
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just made an object"),
    }
}

fn remove_at(root: &mut Value, parents: &[&str], key: &str) {
    let mut node = root;
    for segment in parents {
        match node.get_mut(*segment) {
            Some(child) => node = child,
            None => return,
        }
    }
    if let Value::Object(map) = node {
        map.remove(key);
    }
}
