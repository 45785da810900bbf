//! Structural patch backups and JSON merge patches
//!
//! A backup is the smallest merge patch that reverses a forward patch:
//! - a key the patch adds is backed up as `null` (removed on restore)
//! - a key the patch changes is backed up with its original value
//! - a key the patch leaves untouched is omitted
//!
//! Nested mappings are compared key by key. Any other value, arrays
//! included, is compared and restored as a whole.

use serde_json::{Map, Value as JsonValue};

/// Compute the backup that undoes `patch` when applied to `original`
///
/// Returns `None` when the patch would not change anything.
pub fn compute_backup(original: &JsonValue, patch: &JsonValue) -> Option<JsonValue> {
    match (original, patch) {
        (JsonValue::Object(orig), JsonValue::Object(patch)) => {
            backup_object(orig, patch).map(JsonValue::Object)
        }
        _ if original == patch => None,
        _ => Some(original.clone()),
    }
}

fn backup_object(original: &Map<String, JsonValue>, patch: &Map<String, JsonValue>) -> Option<Map<String, JsonValue>> {
    let mut backup = Map::new();

    for (key, patch_value) in patch {
        match original.get(key) {
            // null in a merge patch removes; nothing to remove
            None if patch_value.is_null() => {}
            None => {
                backup.insert(key.clone(), JsonValue::Null);
            }
            Some(orig_value) if patch_value.is_null() => {
                backup.insert(key.clone(), orig_value.clone());
            }
            Some(JsonValue::Object(orig_obj)) => match patch_value {
                JsonValue::Object(patch_obj) => {
                    if let Some(nested) = backup_object(orig_obj, patch_obj) {
                        backup.insert(key.clone(), JsonValue::Object(nested));
                    }
                }
                _ => {
                    backup.insert(key.clone(), JsonValue::Object(orig_obj.clone()));
                }
            },
            Some(orig_value) => {
                if let Some(value) = scalar_backup(orig_value, patch_value) {
                    backup.insert(key.clone(), value);
                }
            }
        }
    }

    if backup.is_empty() { None } else { Some(backup) }
}

fn scalar_backup(original: &JsonValue, patch: &JsonValue) -> Option<JsonValue> {
    // a mapping patched over a scalar is merged into nothing: the
    // result is the mapping with its nulls stripped
    let effective = match patch {
        JsonValue::Object(_) => {
            let mut merged = JsonValue::Null;
            apply_merge_patch(&mut merged, patch);
            merged
        }
        other => other.clone(),
    };
    if *original == effective {
        None
    } else {
        Some(original.clone())
    }
}

/// Apply an RFC 7386 JSON merge patch in place
pub fn apply_merge_patch(target: &mut JsonValue, patch: &JsonValue) {
    let JsonValue::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = JsonValue::Object(Map::new());
    }
    let Some(target) = target.as_object_mut() else {
        return;
    };

    for (key, value) in patch {
        if value.is_null() {
            target.remove(key);
        } else {
            apply_merge_patch(target.entry(key.clone()).or_insert(JsonValue::Null), value);
        }
    }
}

/// Fold `second` into `first` so one patch has the effect of both in order
///
/// Unlike [`apply_merge_patch`], `null` values are kept: they are still
/// removals once the combined patch is applied.
pub fn compose_merge_patches(first: &mut JsonValue, second: &JsonValue) {
    let Some(second) = second.as_object() else {
        *first = second.clone();
        return;
    };
    if !first.is_object() {
        *first = JsonValue::Object(second.clone());
        return;
    }
    let Some(first) = first.as_object_mut() else {
        return;
    };

    for (key, value) in second {
        let nested = value.is_object() && first.get(key).is_some_and(JsonValue::is_object);
        match first.get_mut(key) {
            Some(existing) if nested => compose_merge_patches(existing, value),
            _ => {
                first.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Strip fields the server always owns from a patch body
///
/// The returned body is safe to re-apply as a restore patch.
pub fn strip_server_fields(body: &mut JsonValue) {
    let Some(obj) = body.as_object_mut() else {
        return;
    };
    let emptied = match obj.get_mut("metadata").and_then(JsonValue::as_object_mut) {
        Some(metadata) => {
            for field in SERVER_OWNED_METADATA {
                metadata.remove(field);
            }
            metadata.is_empty()
        }
        None => false,
    };
    if emptied {
        obj.remove("metadata");
    }
}

const SERVER_OWNED_METADATA: [&str; 6] = [
    "resourceVersion",
    "uid",
    "generation",
    "creationTimestamp",
    "managedFields",
    "selfLink",
];
