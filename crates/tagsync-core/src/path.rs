//! Dotted-path access over nested JSON objects.
//!
//! Tag label/value fields may live at arbitrary custom paths such as
//! `title` or `meta.slug`. Every converter goes through these helpers so
//! the path rules stay identical across the crate.

use serde_json::{Map, Value};

/// Read the value at a dotted `path`.
///
/// Array segments are addressed by numeric index. Returns `None` when any
/// segment is missing; an explicit JSON `null` is returned as `Some(Null)`.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// [`get_path`] on a map, treating the map as the root object.
pub fn get_in<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let first = map.get(head)?;
    match rest {
        Some(rest) => get_path(first, rest),
        None => Some(first),
    }
}

/// Write `value` at a dotted `path`, creating intermediate objects.
///
/// Intermediate segments holding a non-object value are replaced with an
/// empty object.
pub fn set_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                set_path(child, rest, value);
            }
        }
    }
}

/// Remove and return the value at a dotted `path`.
pub fn unset_path(map: &mut Map<String, Value>, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => map.remove(path),
        Some((head, rest)) => match map.get_mut(head) {
            Some(Value::Object(child)) => unset_path(child, rest),
            _ => None,
        },
    }
}

/// First segment of a dotted path.
pub fn top_level(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

/// Unwrap a slug structure `{ "current": ... }` to its inner value.
///
/// Non-slug values, and slugs whose `current` is null, are returned as-is.
pub fn unwrap_slug(value: &Value) -> &Value {
    match value {
        Value::Object(map) => match map.get("current") {
            Some(current) if !current.is_null() => current,
            _ => value,
        },
        _ => value,
    }
}

/// Loose string form of a tag value, used wherever values are compared
/// across representations (`5` and `"5"` compare equal).
///
/// Returns `None` for null. Slugs are unwrapped first.
pub fn coerce_to_string(value: &Value) -> Option<String> {
    match unwrap_slug(value) {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// True when a looked-up value is missing or null.
pub fn is_absent(value: Option<&Value>) -> bool {
    value.map_or(true, Value::is_null)
}
