//! Structural change detection between two configuration values.

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::path::{join_index, join_key, parse_change_path, PathSegment};

/// Kind of a single field-level change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// A single field-level difference between two configurations.
///
/// `Added` carries only `new_value`, `Deleted` only `old_value`,
/// `Modified` carries both and they are never equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Path filter for [`ChangeDetector::filter_by_path`]
#[derive(Debug, Clone)]
pub enum PathFilter {
    /// Substring match against the rendered path
    Contains(String),
    Pattern(Regex),
}

impl PathFilter {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathFilter::Contains(needle) => path.contains(needle.as_str()),
            PathFilter::Pattern(regex) => regex.is_match(path),
        }
    }
}

impl From<&str> for PathFilter {
    fn from(value: &str) -> Self {
        PathFilter::Contains(value.to_string())
    }
}

impl From<String> for PathFilter {
    fn from(value: String) -> Self {
        PathFilter::Contains(value)
    }
}

impl From<Regex> for PathFilter {
    fn from(value: Regex) -> Self {
        PathFilter::Pattern(value)
    }
}

/// Computes minimal field-level diffs between configuration values
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector;

struct DiffContext<'a> {
    source: &'a str,
    environment: Option<&'a str>,
    occurred_at: DateTime<Utc>,
}

impl DiffContext<'_> {
    fn record(
        &self,
        kind: ChangeKind,
        path: String,
        old_value: Option<&Value>,
        new_value: Option<&Value>,
    ) -> ChangeRecord {
        ChangeRecord {
            kind,
            path,
            old_value: old_value.cloned(),
            new_value: new_value.cloned(),
            source: self.source.to_string(),
            environment: self.environment.map(str::to_string),
            occurred_at: self.occurred_at,
        }
    }
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self
    }

    /// Diffs `old` against `new`.
    ///
    /// Mapping keys are visited in the order old-keys first, then keys only
    /// present in `new`. Arrays are compared index by index.
    pub fn detect_changes(
        &self,
        old: &Value,
        new: &Value,
        source: &str,
        environment: Option<&str>,
    ) -> Vec<ChangeRecord> {
        let ctx = DiffContext {
            source,
            environment,
            occurred_at: Utc::now(),
        };
        let mut changes = Vec::new();
        diff_values(&ctx, "", old, new, &mut changes);
        changes
    }

    /// Deep structural equality; equivalent to an empty diff.
    pub fn is_equal(&self, a: &Value, b: &Value) -> bool {
        a == b
    }

    pub fn describe_change(&self, change: &ChangeRecord) -> String {
        let path = if change.path.is_empty() {
            "<root>"
        } else {
            change.path.as_str()
        };
        match change.kind {
            ChangeKind::Added => format!("Added {}: {}", path, render(change.new_value.as_ref())),
            ChangeKind::Deleted => {
                format!("Deleted {} (was {})", path, render(change.old_value.as_ref()))
            }
            ChangeKind::Modified => format!(
                "Modified {}: {} -> {}",
                path,
                render(change.old_value.as_ref()),
                render(change.new_value.as_ref())
            ),
        }
    }

    pub fn filter_by_type(&self, changes: &[ChangeRecord], kind: ChangeKind) -> Vec<ChangeRecord> {
        changes.iter().filter(|c| c.kind == kind).cloned().collect()
    }

    pub fn filter_by_path(
        &self,
        changes: &[ChangeRecord],
        filter: impl Into<PathFilter>,
    ) -> Vec<ChangeRecord> {
        let filter = filter.into();
        changes
            .iter()
            .filter(|c| filter.matches(&c.path))
            .cloned()
            .collect()
    }

    /// Groups by `source`, groups ordered by first appearance
    pub fn group_by_file(&self, changes: &[ChangeRecord]) -> IndexMap<String, Vec<ChangeRecord>> {
        let mut groups: IndexMap<String, Vec<ChangeRecord>> = IndexMap::new();
        for change in changes {
            groups
                .entry(change.source.clone())
                .or_default()
                .push(change.clone());
        }
        groups
    }

    pub fn group_by_environment(
        &self,
        changes: &[ChangeRecord],
    ) -> IndexMap<Option<String>, Vec<ChangeRecord>> {
        let mut groups: IndexMap<Option<String>, Vec<ChangeRecord>> = IndexMap::new();
        for change in changes {
            groups
                .entry(change.environment.clone())
                .or_default()
                .push(change.clone());
        }
        groups
    }

    /// Replays `changes` on top of `base`.
    ///
    /// Array deletions produced by the detector always address the tail of an
    /// array, so a deleted index truncates the array at that position.
    /// Records whose path cannot be parsed are skipped.
    pub fn apply_changes(&self, base: &Value, changes: &[ChangeRecord]) -> Value {
        let mut result = base.clone();
        for change in changes {
            let Some(segments) = parse_change_path(&change.path) else {
                continue;
            };
            match change.kind {
                ChangeKind::Added | ChangeKind::Modified => {
                    if let Some(value) = &change.new_value {
                        write_at(&mut result, &segments, value.clone());
                    }
                }
                ChangeKind::Deleted => remove_at(&mut result, &segments),
            }
        }
        result
    }
}

fn render(value: Option<&Value>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "undefined".to_string(),
    }
}

fn diff_values(
    ctx: &DiffContext<'_>,
    path: &str,
    old: &Value,
    new: &Value,
    out: &mut Vec<ChangeRecord>,
) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => diff_maps(ctx, path, old_map, new_map, out),
        (Value::Array(old_items), Value::Array(new_items)) => {
            diff_arrays(ctx, path, old_items, new_items, out)
        }
        _ => out.push(ctx.record(ChangeKind::Modified, path.to_string(), Some(old), Some(new))),
    }
}

fn diff_maps(
    ctx: &DiffContext<'_>,
    path: &str,
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    out: &mut Vec<ChangeRecord>,
) {
    for (key, old_value) in old {
        let child = join_key(path, key);
        match new.get(key) {
            Some(new_value) => diff_values(ctx, &child, old_value, new_value, out),
            None => out.push(ctx.record(ChangeKind::Deleted, child, Some(old_value), None)),
        }
    }
    for (key, new_value) in new {
        if !old.contains_key(key) {
            out.push(ctx.record(ChangeKind::Added, join_key(path, key), None, Some(new_value)));
        }
    }
}

fn diff_arrays(
    ctx: &DiffContext<'_>,
    path: &str,
    old: &[Value],
    new: &[Value],
    out: &mut Vec<ChangeRecord>,
) {
    for index in 0..old.len().max(new.len()) {
        let child = join_index(path, index);
        match (old.get(index), new.get(index)) {
            (Some(a), Some(b)) if a != b => match (a, b) {
                (Value::Object(a_map), Value::Object(b_map)) => diff_maps(ctx, &child, a_map, b_map, out),
                _ => out.push(ctx.record(ChangeKind::Modified, child, Some(a), Some(b))),
            },
            (Some(a), None) => out.push(ctx.record(ChangeKind::Deleted, child, Some(a), None)),
            (None, Some(b)) => out.push(ctx.record(ChangeKind::Added, child, None, Some(b))),
            _ => {}
        }
    }
}

fn write_at(node: &mut Value, segments: &[PathSegment], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    match head {
        PathSegment::Key(key) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            if let Value::Object(map) = node {
                let child = map.entry(key.clone()).or_insert(Value::Null);
                write_at(child, rest, value);
            }
        }
        PathSegment::Index(index) => {
            if !node.is_array() {
                *node = Value::Array(Vec::new());
            }
            if let Value::Array(items) = node {
                while items.len() <= *index {
                    items.push(Value::Null);
                }
                write_at(&mut items[*index], rest, value);
            }
        }
    }
}

fn remove_at(node: &mut Value, segments: &[PathSegment]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    match (head, node) {
        (PathSegment::Key(key), Value::Object(map)) => {
            if rest.is_empty() {
                map.shift_remove(key.as_str());
            } else if let Some(child) = map.get_mut(key) {
                remove_at(child, rest);
            }
        }
        (PathSegment::Index(index), Value::Array(items)) => {
            if rest.is_empty() {
                items.truncate(*index);
            } else if let Some(child) = items.get_mut(*index) {
                remove_at(child, rest);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detect(old: &Value, new: &Value) -> Vec<ChangeRecord> {
        ChangeDetector::new().detect_changes(old, new, "config.json", Some("production"))
    }

    #[test]
    fn test_identical_values_produce_no_changes() {
        let config = json!({"server": {"port": 3000, "hosts": ["a", "b"]}, "debug": false});
        assert!(detect(&config, &config).is_empty());
        assert!(ChangeDetector::new().is_equal(&config, &config.clone()));
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": 2, "x": 1}"#).unwrap();
        assert!(detect(&a, &b).is_empty());
    }

    #[test]
    fn test_classifies_added_modified_deleted() {
        let old = json!({"server": {"port": 3000, "host": "localhost"}, "legacy": true});
        let new = json!({"server": {"port": 8080, "host": "localhost", "tls": {"enabled": true}}});
        let changes = detect(&old, &new);

        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].kind, ChangeKind::Modified);
        assert_eq!(changes[0].path, "server.port");
        assert_eq!(changes[0].old_value, Some(json!(3000)));
        assert_eq!(changes[0].new_value, Some(json!(8080)));
        assert_eq!(changes[1].kind, ChangeKind::Added);
        assert_eq!(changes[1].path, "server.tls");
        assert!(changes[1].old_value.is_none());
        assert_eq!(changes[2].kind, ChangeKind::Deleted);
        assert_eq!(changes[2].path, "legacy");
        assert!(changes[2].new_value.is_none());

        let stamp = changes[0].occurred_at;
        assert!(changes.iter().all(|c| c.occurred_at == stamp
            && c.source == "config.json"
            && c.environment.as_deref() == Some("production")));
    }

    #[test]
    fn test_array_and_special_key_paths() {
        let old = json!({"hosts": ["a", {"name": "b"}], "x-headers": {"trace id": 1}});
        let new = json!({"hosts": ["a", {"name": "c"}, "d"], "x-headers": {"trace id": 2}});
        let paths: Vec<String> = detect(&old, &new).into_iter().map(|c| c.path).collect();

        assert_eq!(
            paths,
            vec![
                "hosts[1].name".to_string(),
                "hosts[2]".to_string(),
                r#"["x-headers"]["trace id"]"#.to_string(),
            ]
        );
    }

    #[test]
    fn test_null_versus_absent_is_a_change() {
        let changes = detect(&json!({"a": null}), &json!({"a": 1}));
        assert_eq!(changes[0].kind, ChangeKind::Modified);

        let changes = detect(&json!({}), &json!({"a": null}));
        assert_eq!(changes[0].kind, ChangeKind::Added);
        assert_eq!(changes[0].new_value, Some(Value::Null));
    }

    #[test]
    fn test_apply_changes_reproduces_target() {
        let detector = ChangeDetector::new();
        let old = json!({
            "server": {"port": 3000, "hosts": ["a", "b", "c"]},
            "features": [{"name": "x", "on": true}],
            "weird key": 1,
            "gone": {"deep": true}
        });
        let new = json!({
            "server": {"port": 8080, "hosts": ["a"]},
            "features": [{"name": "x", "on": false}, {"name": "y"}],
            "weird key": 2,
            "fresh": [1, 2]
        });
        let changes = detector.detect_changes(&old, &new, "test", None);
        assert_eq!(detector.apply_changes(&old, &changes), new);
    }

    #[test]
    fn test_filters_and_groups() {
        let detector = ChangeDetector::new();
        let mut changes = detector.detect_changes(
            &json!({"db": {"url": "a"}, "cache": 1}),
            &json!({"db": {"url": "b"}, "log": "info"}),
            "base.json",
            None,
        );
        changes.extend(detector.detect_changes(
            &json!({"db": {"pool": 1}}),
            &json!({"db": {"pool": 2}}),
            "config.production.json",
            Some("production"),
        ));

        assert_eq!(detector.filter_by_type(&changes, ChangeKind::Added).len(), 1);
        assert_eq!(detector.filter_by_path(&changes, "db.").len(), 2);
        let regex = Regex::new(r"^(cache|log)$").unwrap();
        assert_eq!(detector.filter_by_path(&changes, regex).len(), 2);

        let by_file = detector.group_by_file(&changes);
        assert_eq!(
            by_file.keys().cloned().collect::<Vec<_>>(),
            vec!["base.json".to_string(), "config.production.json".to_string()]
        );
        assert_eq!(by_file["base.json"].len(), 3);

        let by_env = detector.group_by_environment(&changes);
        assert_eq!(by_env[&None::<String>].len(), 3);
        assert_eq!(by_env[&Some("production".to_string())].len(), 1);
    }

    #[test]
    fn test_describe_change() {
        let detector = ChangeDetector::new();
        let changes = detector.detect_changes(&json!({"port": 3000}), &json!({"port": 8080}), "s", None);
        assert_eq!(detector.describe_change(&changes[0]), "Modified port: 3000 -> 8080");
    }
}
