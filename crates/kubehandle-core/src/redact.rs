//! Masking of sensitive fields before bodies reach the logs

use serde_json::Value as JsonValue;

pub const REDACTED: &str = "*******";

/// Copy of `body` with every dotted path in `paths` masked
///
/// A path naming a mapping masks each of its values, so `data` hides all
/// keys of a Secret while keeping them visible.
pub fn redact(body: &JsonValue, paths: &[String]) -> JsonValue {
    let mut out = body.clone();
    for path in paths {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        mask(&mut out, &segments);
    }
    out
}

fn mask(value: &mut JsonValue, segments: &[&str]) {
    match segments.split_first() {
        None => match value {
            JsonValue::Object(map) => {
                for v in map.values_mut() {
                    *v = JsonValue::String(REDACTED.to_string());
                }
            }
            JsonValue::Null => {}
            other => *other = JsonValue::String(REDACTED.to_string()),
        },
        Some((head, rest)) => {
            if let Some(child) = value.get_mut(*head) {
                mask(child, rest);
            }
        }
    }
}
