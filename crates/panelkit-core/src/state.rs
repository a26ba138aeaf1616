//! Shared mutable state read by builds and written by actions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};

/// Optional prefix accepted on state paths (`state.count` == `count`).
const STATE_PREFIX: &str = "state.";

/// Thread-safe state container.
///
/// Cloning a `StateStore` yields another handle to the same state. Builds
/// take a [`snapshot`](Self::snapshot) so they never observe a half-applied
/// action.
#[derive(Debug, Clone)]
pub struct StateStore {
    value: Arc<RwLock<Value>>,
    revision: Arc<AtomicU64>,
}

impl StateStore {
    /// Create a store holding an empty object.
    #[must_use]
    pub fn new() -> Self {
        Self::with_value(Value::Object(Map::new()))
    }

    /// Create a store from an initial value.
    ///
    /// Non-object values are replaced by an empty object, since every state
    /// path starts with a key.
    #[must_use]
    pub fn with_value(initial: Value) -> Self {
        let initial = if initial.is_object() {
            initial
        } else {
            warn!("Initial state is not an object, starting empty");
            Value::Object(Map::new())
        };
        Self {
            value: Arc::new(RwLock::new(initial)),
            revision: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Clone the current state.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Monotonic counter bumped on every successful write.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Read the value at `path`, if present.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Value> {
        let guard = self.value.read().unwrap_or_else(PoisonError::into_inner);
        lookup(&guard, strip_prefix(path)).cloned()
    }

    /// Write `value` at `path`, creating intermediate objects as needed.
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] if the path is empty, walks through a scalar,
    /// or indexes past the end of an array.
    pub fn set(&self, path: &str, value: Value) -> StateResult<()> {
        let relative = strip_prefix(path);
        let segments = split_path(relative)?;

        let mut guard = self.value.write().unwrap_or_else(PoisonError::into_inner);
        write_at(&mut guard, &segments, value, path)?;
        drop(guard);

        self.revision.fetch_add(1, Ordering::AcqRel);
        debug!(path, "State updated");
        Ok(())
    }

    /// Replace the whole state.
    pub fn replace(&self, value: Value) {
        let value = if value.is_object() {
            value
        } else {
            Value::Object(Map::new())
        };
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = value;
        self.revision.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a dotted path against a JSON value.
///
/// Numeric segments index into arrays. An empty path returns the root.
#[must_use]
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Overlay `overlay` onto `base`, recursing into objects. Overlay values win.
pub fn merge_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                if let Some(base_val) = base_map.get_mut(key) {
                    merge_values(base_val, overlay_val);
                } else {
                    base_map.insert(key.clone(), overlay_val.clone());
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
        },
    }
}

fn strip_prefix(path: &str) -> &str {
    let path = path.trim();
    path.strip_prefix(STATE_PREFIX).unwrap_or(path)
}

fn split_path(path: &str) -> StateResult<Vec<&str>> {
    if path.is_empty() {
        return Err(StateError::InvalidPath(path.to_owned()));
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(StateError::InvalidPath(path.to_owned()));
    }
    Ok(segments)
}

fn write_at(target: &mut Value, segments: &[&str], value: Value, path: &str) -> StateResult<()> {
    let Some((head, rest)) = segments.split_first() else {
        *target = value;
        return Ok(());
    };

    match target {
        Value::Object(map) => {
            let slot = map
                .entry((*head).to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if rest.is_empty() {
                *slot = value;
                Ok(())
            } else {
                if slot.is_null() {
                    *slot = Value::Object(Map::new());
                }
                write_at(slot, rest, value, path)
            }
        },
        Value::Array(items) => {
            let index: usize = head.parse().map_err(|_| StateError::NotAContainer {
                path: path.to_owned(),
                segment: (*head).to_owned(),
            })?;
            if index == items.len() {
                items.push(Value::Object(Map::new()));
            }
            let slot = items
                .get_mut(index)
                .ok_or_else(|| StateError::IndexOutOfBounds {
                    path: path.to_owned(),
                    index,
                })?;
            if rest.is_empty() {
                *slot = value;
                Ok(())
            } else {
                write_at(slot, rest, value, path)
            }
        },
        _ => Err(StateError::NotAContainer {
            path: path.to_owned(),
            segment: (*head).to_owned(),
        }),
    }
}
