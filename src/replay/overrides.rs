//! Header and JSON override application, plus before/after diffs.
//!
//! Everything here is pure: inputs are borrowed or consumed and a new value
//! is returned.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::domain::{stringify_value, FieldMap, FieldValue, HeaderOverride, JsonOverride};

pub fn normalize_header_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Applies header directives in order. Later directives for the same name
/// win; `base` is left untouched.
pub fn apply_header_overrides(base: &FieldMap, overrides: &[HeaderOverride]) -> FieldMap {
    let mut out = base.clone();
    for directive in overrides {
        let name = normalize_header_name(directive.name());
        if name.is_empty() {
            continue;
        }
        match directive {
            HeaderOverride::Set { value, .. } => {
                out.insert(name, FieldValue::One(value.clone()));
            }
            HeaderOverride::Remove { .. } => {
                out.remove(&name);
            }
        }
    }
    out
}

/// Assigns `value` at a dot-separated object path.
///
/// Empty segments are dropped; a path with no segments returns `root` as is.
/// A non-object root, and any non-object value met on the way down, is
/// replaced by an empty object. Segments are always object keys, numeric or
/// not.
pub fn set_json_path(root: Value, path: &str, value: Value) -> Value {
    let segments: Vec<&str> = path
        .split('.')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect();
    if segments.is_empty() {
        return root;
    }

    let mut map = match root {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    assign(&mut map, &segments, value);
    Value::Object(map)
}

fn assign(map: &mut Map<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [last] => {
            map.insert((*last).to_owned(), value);
        }
        [head, rest @ ..] => {
            let child = map.entry((*head).to_owned()).or_insert(Value::Null);
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(inner) = child {
                assign(inner, rest, value);
            }
        }
    }
}

pub fn apply_json_overrides(root: Value, overrides: &[JsonOverride]) -> Value {
    overrides.iter().fold(root, |doc, directive| {
        set_json_path(doc, &directive.path, directive.value.clone())
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderChange {
    pub name: String,
    pub before: FieldValue,
    pub after: FieldValue,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeaderDiff {
    pub added: Vec<HeaderEntry>,
    pub removed: Vec<HeaderEntry>,
    pub changed: Vec<HeaderChange>,
}

/// Compares two header maps by flattened string value.
pub fn diff_headers(before: &FieldMap, after: &FieldMap) -> HeaderDiff {
    let mut diff = HeaderDiff::default();
    for (name, value) in after {
        match before.get(name) {
            None => diff.added.push(HeaderEntry {
                name: name.clone(),
                value: value.clone(),
            }),
            Some(old) if old.to_flat_string() != value.to_flat_string() => {
                diff.changed.push(HeaderChange {
                    name: name.clone(),
                    before: old.clone(),
                    after: value.clone(),
                })
            }
            Some(_) => {}
        }
    }
    for (name, value) in before {
        if !after.contains_key(name) {
            diff.removed.push(HeaderEntry {
                name: name.clone(),
                value: value.clone(),
            });
        }
    }
    diff
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathEntry {
    pub path: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathChange {
    pub path: String,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JsonDiff {
    pub added: Vec<PathEntry>,
    pub removed: Vec<PathEntry>,
    pub changed: Vec<PathChange>,
}

/// Flattens a document to `(dot.path, leaf string)` pairs in document order:
/// object keys as stored, array elements by index. Array indices are path
/// segments; empty containers contribute nothing.
pub fn flatten_json(value: &Value) -> Vec<(String, String)> {
    let mut out = Vec::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, prefix: String, out: &mut Vec<(String, String)>) {
    match value {
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                flatten_into(item, join_path(&prefix, &idx.to_string()), out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                flatten_into(item, join_path(&prefix, key), out);
            }
        }
        leaf => out.push((prefix, stringify_value(leaf))),
    }
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_owned()
    } else {
        format!("{prefix}.{segment}")
    }
}

/// Added and changed paths follow `after`; removed paths follow `before`.
pub fn diff_json(before: &Value, after: &Value) -> JsonDiff {
    let before = flatten_json(before);
    let after = flatten_json(after);
    let before_index: HashMap<&str, &str> = before
        .iter()
        .map(|(path, value)| (path.as_str(), value.as_str()))
        .collect();
    let after_paths: HashSet<&str> = after.iter().map(|(path, _)| path.as_str()).collect();

    let mut diff = JsonDiff::default();
    for (path, value) in &after {
        match before_index.get(path.as_str()) {
            None => diff.added.push(PathEntry {
                path: path.clone(),
                value: value.clone(),
            }),
            Some(old) if *old != value => diff.changed.push(PathChange {
                path: path.clone(),
                before: (*old).to_owned(),
                after: value.clone(),
            }),
            Some(_) => {}
        }
    }
    for (path, value) in &before {
        if !after_paths.contains(path.as_str()) {
            diff.removed.push(PathEntry {
                path: path.clone(),
                value: value.clone(),
            });
        }
    }
    diff
}
