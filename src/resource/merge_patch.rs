//! JSON merge patch (RFC 7386).
//!
//! Patches sent to the store replace `spec` wholesale: `diff` emits every
//! desired key and a `null` for every key that exists only in the baseline.
//! `apply` is the receiving side, used by the in-memory store.

use serde_json::{Map, Value};

/// Build a merge patch that turns `base` into `desired`.
///
/// Object members present in both are diffed recursively; anything else is
/// replaced by the desired value. A `null` inside `desired` reads as a
/// deletion on the receiving side.
pub fn diff(base: &Value, desired: &Value) -> Value {
    match (base, desired) {
        (Value::Object(base), Value::Object(desired)) => Value::Object(diff_objects(base, desired)),
        _ => desired.clone(),
    }
}

/// Object form of [`diff`].
pub fn diff_objects(base: &Map<String, Value>, desired: &Map<String, Value>) -> Map<String, Value> {
    let mut patch = Map::new();
    for (key, value) in desired {
        let entry = match base.get(key) {
            Some(old) => diff(old, value),
            None => value.clone(),
        };
        patch.insert(key.clone(), entry);
    }
    for key in base.keys() {
        if !desired.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }
    patch
}

/// Apply a merge patch to `target` in place.
pub fn apply(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                apply(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
