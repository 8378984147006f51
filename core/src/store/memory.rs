//! In-memory document tree. Used by tests and by runs without `--db`.

use crate::{
    document::{check_updates, guards_hold, split_path, tree_get, tree_set, DocumentStore, Guard, Updates},
    error::{FeedbackError, FeedbackResult},
};
use serde_json::{Map, Value};
use std::sync::{Mutex, MutexGuard};

pub struct MemoryStore {
    root: Mutex<Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { root: Mutex::new(Value::Object(Map::new())) }
    }

    /// Seed the store with an existing tree (for tests).
    pub fn with_root(root: Value) -> Self {
        Self { root: Mutex::new(root) }
    }

    /// Clone the whole tree.
    pub fn dump(&self) -> FeedbackResult<Value> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> FeedbackResult<MutexGuard<'_, Value>> {
        self.root
            .lock()
            .map_err(|_| FeedbackError::Other(anyhow::anyhow!("memory store lock poisoned")))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, path: &str) -> FeedbackResult<Option<Value>> {
        let segments = split_path(path)?;
        let root = self.lock()?;
        Ok(tree_get(&root, &segments).cloned())
    }

    fn set(&self, path: &str, value: Value) -> FeedbackResult<()> {
        let segments = split_path(path)?;
        let mut root = self.lock()?;
        tree_set(&mut root, &segments, value);
        Ok(())
    }

    fn update(&self, updates: &Updates) -> FeedbackResult<()> {
        check_updates(updates)?;
        let mut root = self.lock()?;
        apply(&mut root, updates)
    }

    fn update_if(&self, guards: &[Guard], updates: &Updates) -> FeedbackResult<bool> {
        check_updates(updates)?;
        let mut root = self.lock()?;
        if !guards_hold(&root, guards)? {
            return Ok(false);
        }
        apply(&mut root, updates)?;
        Ok(true)
    }
}

fn apply(root: &mut Value, updates: &Updates) -> FeedbackResult<()> {
    for (path, value) in updates {
        let segments = split_path(path)?;
        tree_set(root, &segments, value.clone());
    }
    Ok(())
}
