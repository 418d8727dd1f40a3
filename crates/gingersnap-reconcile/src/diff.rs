//! JSON merge patch (RFC 7386) computation and application
//!
//! `create_or_patch` sends only the fields its mutation changed, so fields
//! assigned by the server or by other writers survive untouched.

use serde_json::{Map, Value};

/// Compute the merge patch that turns `original` into `modified`
///
/// Returns `None` when the two documents are equal. Arrays are compared as
/// whole values, matching merge-patch semantics.
#[must_use]
pub fn merge_diff(original: &Value, modified: &Value) -> Option<Value> {
    if original == modified {
        return None;
    }
    match (original, modified) {
        (Value::Object(orig), Value::Object(modi)) => {
            let mut patch = Map::new();
            for (key, new_value) in modi {
                match orig.get(key) {
                    Some(old_value) => {
                        if let Some(sub) = merge_diff(old_value, new_value) {
                            patch.insert(key.clone(), sub);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), new_value.clone());
                    }
                }
            }
            for key in orig.keys() {
                if !modi.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            Some(Value::Object(patch))
        }
        _ => Some(modified.clone()),
    }
}

/// Apply a merge patch to `target` in place
pub fn apply_merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                apply_merge(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
