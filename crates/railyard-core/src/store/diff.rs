//! Field-level diff between two serialized entity payloads.
//!
//! The diff operates on the top-level fields of the `data` JSON object:
//! changed keys carry their new value, keys removed between the snapshots
//! carry `null`. Applying the diff to the currently-stored payload touches
//! only those keys, so fields modified concurrently by another writer are
//! preserved unless this patch also changed them.

use serde_json::{Map, Value};

/// Compute the top-level field diff from `original` to `modified`.
///
/// Both values must be JSON objects (every entity payload serializes to
/// one). Keys present in `original` but absent in `modified` map to
/// `Value::Null`, which `apply` treats as removal.
pub fn compute(original: &Value, modified: &Value) -> Map<String, Value> {
    let empty = Map::new();
    let original = original.as_object().unwrap_or(&empty);
    let modified = modified.as_object().unwrap_or(&empty);

    let mut diff = Map::new();
    for (key, new_value) in modified {
        if original.get(key) != Some(new_value) {
            diff.insert(key.clone(), new_value.clone());
        }
    }
    for key in original.keys() {
        if !modified.contains_key(key) {
            diff.insert(key.clone(), Value::Null);
        }
    }
    diff
}

/// Apply a diff to the currently-stored payload, in place.
pub fn apply(stored: &mut Value, diff: &Map<String, Value>) {
    let Some(object) = stored.as_object_mut() else {
        return;
    };
    for (key, value) in diff {
        if value.is_null() {
            object.remove(key);
        } else {
            object.insert(key.clone(), value.clone());
        }
    }
}
