//! The document-store capability every component is handed.
//!
//! RULE: Components never reach for a global database handle.
//! They receive a `&dyn DocumentStore` and speak only in logical paths
//! (`employees/{id}/points`, `codes/{id}`, `points/lastReset`).
//!
//! The store is a tree of JSON values. Writing `null` (or an empty object)
//! to a path removes it, and parents left empty are pruned, so "absent"
//! and "empty" are the same thing to readers.

use crate::error::{FeedbackError, FeedbackResult};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A batch of path → value writes applied atomically.
/// A `Value::Null` entry deletes that path.
pub type Updates = BTreeMap<String, Value>;

/// Precondition for a conditional write: the value at `path` must equal
/// `expected` (`None` meaning "absent") at the moment the write is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Guard {
    pub path:     String,
    pub expected: Option<Value>,
}

impl Guard {
    pub fn equals(path: impl Into<String>, expected: Value) -> Self {
        Self { path: path.into(), expected: Some(expected) }
    }

    pub fn absent(path: impl Into<String>) -> Self {
        Self { path: path.into(), expected: None }
    }
}

pub trait DocumentStore {
    /// Read the subtree at `path`. `None` when nothing is stored there.
    fn get(&self, path: &str) -> FeedbackResult<Option<Value>>;

    /// Replace the subtree at `path`. `Value::Null` removes it.
    fn set(&self, path: &str, value: Value) -> FeedbackResult<()>;

    /// Apply every write in `updates` as one atomic step.
    fn update(&self, updates: &Updates) -> FeedbackResult<()>;

    /// Apply `updates` atomically only if every guard holds.
    /// Returns `false` (and writes nothing) when any guard fails.
    fn update_if(&self, guards: &[Guard], updates: &Updates) -> FeedbackResult<bool>;

    fn remove(&self, path: &str) -> FeedbackResult<()> {
        self.set(path, Value::Null)
    }
}

// ── Typed helpers ──────────────────────────────────────────────────────────

/// Read and deserialize the value at `path`.
pub fn read<T: DeserializeOwned>(store: &dyn DocumentStore, path: &str) -> FeedbackResult<Option<T>> {
    match store.get(path)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Read every child of `path` as `(key, T)`, in key order.
/// Children that do not deserialize as `T` are skipped with a warning.
pub fn read_children<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    path:  &str,
) -> FeedbackResult<Vec<(String, T)>> {
    let Some(Value::Object(children)) = store.get(path)? else {
        return Ok(Vec::new());
    };
    let mut out = Vec::with_capacity(children.len());
    for (key, value) in children {
        match serde_json::from_value::<T>(value) {
            Ok(item) => out.push((key, item)),
            Err(e) => log::warn!("skipping malformed record {path}/{key}: {e}"),
        }
    }
    Ok(out)
}

pub fn to_value<T: Serialize>(item: &T) -> FeedbackResult<Value> {
    Ok(serde_json::to_value(item)?)
}

// ── Path handling ──────────────────────────────────────────────────────────

/// Characters that may not appear in a path segment.
pub const RESERVED_KEY_CHARS: &[char] = &['.', '#', '$', '[', ']'];

/// Split and validate a logical path into its segments.
pub fn split_path(path: &str) -> FeedbackResult<Vec<&str>> {
    let segments: Vec<&str> = path.split('/').collect();
    let valid = segments.iter().all(|s| {
        !s.is_empty() && !s.contains(RESERVED_KEY_CHARS) && !s.chars().any(char::is_control)
    });
    if !valid {
        return Err(FeedbackError::InvalidPath { path: path.to_string() });
    }
    Ok(segments)
}

/// Validate a batch: every path must be well formed and no path may be an
/// ancestor of another in the same batch.
pub fn check_updates(updates: &Updates) -> FeedbackResult<()> {
    for path in updates.keys() {
        split_path(path)?;
        let has_ancestor = path
            .match_indices('/')
            .any(|(at, _)| updates.contains_key(&path[..at]));
        if has_ancestor {
            return Err(FeedbackError::InvalidPath { path: path.clone() });
        }
    }
    Ok(())
}

// ── Tree operations shared by the store implementations ───────────────────

/// Drop nulls and empty objects. Returns `None` if nothing remains.
pub fn prune(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let kept: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| prune(v).map(|v| (k, v)))
                .collect();
            if kept.is_empty() { None } else { Some(Value::Object(kept)) }
        }
        other => Some(other),
    }
}

/// True when `value` would be pruned away entirely.
pub fn is_vacant(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.values().all(is_vacant),
        _ => false,
    }
}

pub fn tree_get<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut node = root;
    for seg in segments {
        node = node.as_object()?.get(*seg)?;
    }
    Some(node)
}

/// Write `value` at `segments` under `root`, creating intermediate objects
/// and pruning parents that become empty after a removal.
pub fn tree_set(root: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *root = prune(value).unwrap_or_else(|| Value::Object(Map::new()));
        return;
    };
    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    let Value::Object(map) = root else { return };

    if rest.is_empty() {
        match prune(value) {
            Some(v) => { map.insert((*head).to_string(), v); }
            None    => { map.remove(*head); }
        }
        return;
    }

    if is_vacant(&value) && !map.get(*head).is_some_and(Value::is_object) {
        return;
    }
    let child = map
        .entry((*head).to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    tree_set(child, rest, value);
    if child.as_object().is_some_and(Map::is_empty) {
        map.remove(*head);
    }
}

pub fn guards_hold(root: &Value, guards: &[Guard]) -> FeedbackResult<bool> {
    for guard in guards {
        let segments = split_path(&guard.path)?;
        if tree_get(root, &segments) != guard.expected.as_ref() {
            return Ok(false);
        }
    }
    Ok(true)
}
