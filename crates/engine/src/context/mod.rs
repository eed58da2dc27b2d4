//! Path-addressable scenario context.
//!
//! The context is one JSON tree per session. Reads by dot path never fail: a missing
//! segment, or a segment that runs into a scalar, yields `None`. Writes never touch the
//! current tree in place; they build a new root and swap it in, so anyone holding a
//! [`ContextStore::snapshot`] keeps a complete (if stale) view.

use std::sync::Arc;

use serde_json::{Map, Value};

pub mod template;

pub use template::{TemplateScope, interpolate_string, interpolate_value};

/// Split a dot path into segments, ignoring empty segments.
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split('.').map(str::trim).filter(|segment| !segment.is_empty()).collect()
}

/// Read the value at `path`, or `None` when any segment is missing.
///
/// Numeric segments index into arrays. An empty path returns the tree itself.
pub fn get_path<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    navigate(tree, &path_segments(path))
}

pub(crate) fn navigate<'a>(tree: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut current = tree;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Return a copy of `tree` with `value` stored at `path`.
///
/// Missing intermediates are created as objects and scalar intermediates are replaced.
/// Arrays take numeric segments: index `len` appends and larger indices pad with `null`.
/// A non-numeric segment turns the array into an object keyed by element index, so no
/// element is lost. An empty path replaces the whole tree.
pub fn set_path(tree: &Value, path: &str, value: Value) -> Value {
    set_segments(Some(tree), &path_segments(path), value)
}

fn set_segments(node: Option<&Value>, segments: &[&str], value: Value) -> Value {
    let Some((head, rest)) = segments.split_first() else {
        return value;
    };

    match node {
        Some(Value::Object(map)) => {
            let mut copy = map.clone();
            let child = set_segments(map.get(*head), rest, value);
            copy.insert((*head).to_string(), child);
            Value::Object(copy)
        }
        Some(Value::Array(items)) => match head.parse::<usize>() {
            Ok(index) => {
                let mut copy = items.clone();
                if index >= copy.len() {
                    copy.resize(index + 1, Value::Null);
                }
                copy[index] = set_segments(items.get(index), rest, value);
                Value::Array(copy)
            }
            Err(_) => {
                let mut map: Map<String, Value> = items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| (index.to_string(), item.clone()))
                    .collect();
                map.insert((*head).to_string(), set_segments(None, rest, value));
                Value::Object(map)
            }
        },
        _ => fresh_branch(head, rest, value),
    }
}

fn fresh_branch(head: &str, rest: &[&str], value: Value) -> Value {
    let mut map = Map::new();
    map.insert(head.to_string(), set_segments(None, rest, value));
    Value::Object(map)
}

/// Owned context tree for one session.
///
/// Every consumer (step machine, plugin handlers, inspectors) goes through the same
/// instance; it is created once per session and passed down explicitly.
#[derive(Debug, Clone)]
pub struct ContextStore {
    root: Arc<Value>,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self {
            root: Arc::new(Value::Object(Map::new())),
        }
    }
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing tree, e.g. a persisted snapshot.
    pub fn from_value(value: Value) -> Self {
        Self { root: Arc::new(value) }
    }

    /// Current tree.
    pub fn context(&self) -> &Value {
        &self.root
    }

    /// Shared handle to the current tree; unaffected by later writes.
    pub fn snapshot(&self) -> Arc<Value> {
        Arc::clone(&self.root)
    }

    pub fn get_by_path(&self, path: &str) -> Option<&Value> {
        get_path(&self.root, path)
    }

    /// Like [`get_by_path`](Self::get_by_path) but yields `Value::Null` for missing paths.
    pub fn value_at(&self, path: &str) -> Value {
        self.get_by_path(path).cloned().unwrap_or(Value::Null)
    }

    /// Store `value` at `path`; last write wins.
    pub fn update_by_path(&mut self, path: &str, value: Value) {
        self.root = Arc::new(set_path(&self.root, path, value));
    }

    /// Drop all data, leaving an empty object.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_paths_read_as_none() {
        let store = ContextStore::new();
        assert_eq!(store.get_by_path("a.b.c"), None);
        assert_eq!(store.value_at("a.b.c"), Value::Null);
    }

    #[test]
    fn reading_through_a_scalar_returns_none() {
        let mut store = ContextStore::new();
        store.update_by_path("a", json!(5));
        assert_eq!(store.get_by_path("a.b"), None);
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut store = ContextStore::new();
        for (path, value) in [
            ("user.name", json!("ada")),
            ("user.tags", json!(["x", "y"])),
            ("flags.enabled", json!(true)),
            ("deep.a.b.c.d", json!({"k": 1})),
        ] {
            store.update_by_path(path, value.clone());
            assert_eq!(store.get_by_path(path), Some(&value), "path {path}");
        }
        assert_eq!(store.get_by_path("user.name"), Some(&json!("ada")));
    }

    #[test]
    fn writes_replace_scalar_intermediates() {
        let tree = json!({"a": 1});
        let updated = set_path(&tree, "a.b", json!(2));
        assert_eq!(updated, json!({"a": {"b": 2}}));
    }

    #[test]
    fn arrays_accept_in_range_indices() {
        let tree = json!({"items": [1, 2, 3]});
        let updated = set_path(&tree, "items.1", json!("two"));
        assert_eq!(updated, json!({"items": [1, "two", 3]}));
        assert_eq!(get_path(&updated, "items.2"), Some(&json!(3)));
        assert_eq!(get_path(&updated, "items.9"), None);
    }

    #[test]
    fn array_writes_past_the_end_keep_existing_elements() {
        let mut store = ContextStore::new();
        store.update_by_path("items", json!([1, 2, 3]));
        store.update_by_path("items.3", json!(4));
        assert_eq!(store.value_at("items"), json!([1, 2, 3, 4]));

        store.update_by_path("items.6.name", json!("late"));
        assert_eq!(store.value_at("items"), json!([1, 2, 3, 4, null, null, {"name": "late"}]));
    }

    #[test]
    fn named_segment_on_an_array_keeps_elements_by_index() {
        let tree = json!({"items": ["a", "b"]});
        let updated = set_path(&tree, "items.label", json!("letters"));
        assert_eq!(updated, json!({"items": {"0": "a", "1": "b", "label": "letters"}}));
    }

    #[test]
    fn snapshots_are_not_affected_by_later_writes() {
        let mut store = ContextStore::new();
        store.update_by_path("a.b", json!(1));
        let before = store.snapshot();

        store.update_by_path("a.b", json!(2));
        store.update_by_path("a.c", json!(3));

        assert_eq!(get_path(&before, "a.b"), Some(&json!(1)));
        assert_eq!(get_path(&before, "a.c"), None);
        assert_eq!(store.get_by_path("a.b"), Some(&json!(2)));
    }

    #[test]
    fn sibling_branches_survive_writes() {
        let mut store = ContextStore::from_value(json!({"left": {"x": 1}, "right": {"y": 2}}));
        store.update_by_path("left.z", json!(3));
        assert_eq!(store.context(), &json!({"left": {"x": 1, "z": 3}, "right": {"y": 2}}));
    }

    #[test]
    fn empty_segments_are_ignored() {
        let mut store = ContextStore::new();
        store.update_by_path("a..b.", json!(1));
        assert_eq!(store.get_by_path("a.b"), Some(&json!(1)));
        assert_eq!(store.get_by_path(""), Some(store.context()));
    }
}
