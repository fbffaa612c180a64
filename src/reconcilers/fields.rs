//! Field normalization, deep merge and diff reporting on untyped objects

use regex::Regex;
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Fields that never take part in comparison and are never written to clones
const BUILTIN_EXCLUDED_FIELDS: &[&[&str]] = &[
    &["status"],
    &["metadata", "annotations"],
    &["metadata", "creationTimestamp"],
    &["metadata", "managedFields"],
    &["metadata", "namespace"],
    &["metadata", "ownerReferences"],
    &["metadata", "resourceVersion"],
    &["metadata", "uid"],
];

/// One nesting level of a field path
#[derive(Clone, Debug)]
enum Segment {
    /// Matches exactly this key
    Exact(String),
    /// Matches keys the pattern matches from position 0
    Pattern(Regex),
}

impl Segment {
    fn matches(&self, key: &str) -> bool {
        match self {
            Segment::Exact(name) => name == key,
            Segment::Pattern(pattern) => pattern.is_match(key),
        }
    }
}

/// A field path: one segment per nesting level
#[derive(Clone, Debug)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Compile a path whose segments match keys starting at position 0
    pub fn compile<S: AsRef<str>>(segments: &[S]) -> Result<Self> {
        if segments.is_empty() {
            return Err(Error::ValidationError(
                "fieldsToExclude entries need at least one segment".to_string(),
            ));
        }
        let segments = segments
            .iter()
            .map(|s| {
                Regex::new(&format!("^(?:{})", s.as_ref()))
                    .map(Segment::Pattern)
                    .map_err(|e| {
                        Error::ValidationError(format!(
                            "invalid field pattern '{}': {}",
                            s.as_ref(),
                            e
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { segments })
    }

    /// A path whose segments match keys exactly
    fn literal(segments: &[&str]) -> Self {
        let segments = segments
            .iter()
            .map(|s| Segment::Exact(s.to_string()))
            .collect();
        Self { segments }
    }
}

/// The always-excluded field paths
pub fn builtin_field_paths() -> Vec<FieldPath> {
    BUILTIN_EXCLUDED_FIELDS
        .iter()
        .map(|path| FieldPath::literal(path))
        .collect()
}

/// Remove every field matched by `paths`, in order.
///
/// A map left empty by a deletion below it is removed from its parent too.
pub fn strip_fields(object: &mut Value, paths: &[FieldPath]) {
    if let Some(map) = object.as_object_mut() {
        for path in paths {
            strip_path(map, &path.segments);
        }
    }
}

fn strip_path(map: &mut Map<String, Value>, segments: &[Segment]) -> bool {
    let Some((segment, rest)) = segments.split_first() else {
        return false;
    };
    let matching: Vec<String> = map.keys().filter(|k| segment.matches(k)).cloned().collect();

    let mut deleted = false;
    for key in matching {
        if rest.is_empty() {
            map.remove(&key);
            deleted = true;
            continue;
        }
        let emptied = match map.get_mut(&key).and_then(Value::as_object_mut) {
            Some(child) => strip_path(child, rest) && child.is_empty(),
            None => false,
        };
        if emptied {
            map.remove(&key);
            deleted = true;
        }
    }
    deleted
}

/// Merge `source` into `target`: maps merge recursively, everything else
/// (scalars and sequences) is replaced by the source value.
pub fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                let nested = value.is_object() && target.get(key).map_or(false, Value::is_object);
                match target.get_mut(key) {
                    Some(existing) if nested => deep_merge(existing, value),
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}

/// Dotted paths at which two objects differ
pub fn diff_paths(left: &Value, right: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    collect_diff(left, right, String::new(), &mut paths);
    paths
}

fn collect_diff(left: &Value, right: &Value, prefix: String, paths: &mut Vec<String>) {
    match (left, right) {
        (Value::Object(l), Value::Object(r)) => {
            let mut keys: Vec<&String> = l.keys().chain(r.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                match (l.get(key), r.get(key)) {
                    (Some(lv), Some(rv)) => collect_diff(lv, rv, path, paths),
                    _ => paths.push(path),
                }
            }
        }
        (l, r) if l != r => paths.push(if prefix.is_empty() {
            ".".to_string()
        } else {
            prefix
        }),
        _ => {}
    }
}
