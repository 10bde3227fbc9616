//! Structural diff between two resolved configs.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// What happened to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
}

/// A single leaf change, keyed by its dotted path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigChange {
    pub key: String,
    pub kind: ChangeKind,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

impl fmt::Display for ConfigChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.old_value, &self.new_value) {
            (None, Some(new)) => write!(f, "+ {}: {}", self.key, new),
            (Some(old), None) => write!(f, "- {}: {}", self.key, old),
            (Some(old), Some(new)) => write!(f, "~ {}: {} -> {}", self.key, old, new),
            (None, None) => write!(f, "~ {}", self.key),
        }
    }
}

/// Every change between two config bodies, in key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigDiff {
    pub changes: Vec<ConfigChange>,
}

impl ConfigDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Whether anything at or below `key` changed.
    pub fn touches(&self, key: &str) -> bool {
        self.changes.iter().any(|c| {
            c.key == key || c.key.strip_prefix(key).is_some_and(|rest| rest.starts_with('.'))
        })
    }
}

impl fmt::Display for ConfigDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No differences found.");
        }
        for change in &self.changes {
            writeln!(f, "{change}")?;
        }
        Ok(())
    }
}

/// Compare two config bodies.
///
/// Mappings are compared key by key and recursed into; any other differing
/// value (arrays included) is one `Changed` entry.
pub fn diff(old: &Value, new: &Value) -> ConfigDiff {
    let mut changes = Vec::new();
    diff_into(old, new, "", &mut changes);
    ConfigDiff { changes }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn diff_into(old: &Value, new: &Value, prefix: &str, changes: &mut Vec<ConfigChange>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut keys: Vec<&String> = old_map.keys().chain(new_map.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let path = join(prefix, key);
                match (old_map.get(key), new_map.get(key)) {
                    (Some(o), Some(n)) => diff_into(o, n, &path, changes),
                    (None, Some(n)) => changes.push(ConfigChange {
                        key: path,
                        kind: ChangeKind::Added,
                        old_value: None,
                        new_value: Some(n.clone()),
                    }),
                    (Some(o), None) => changes.push(ConfigChange {
                        key: path,
                        kind: ChangeKind::Removed,
                        old_value: Some(o.clone()),
                        new_value: None,
                    }),
                    (None, None) => {}
                }
            }
        }
        (o, n) if o != n => changes.push(ConfigChange {
            key: prefix.to_string(),
            kind: ChangeKind::Changed,
            old_value: Some(o.clone()),
            new_value: Some(n.clone()),
        }),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_changes() {
        let old = json!({"server": {"port": 80, "host": "a"}, "debug": false, "gone": 1});
        let new = json!({"server": {"port": 443, "host": "a"}, "debug": false, "added": [1]});
        let d = diff(&old, &new);

        let summary: Vec<_> = d.changes.iter().map(|c| (c.key.as_str(), c.kind)).collect();
        assert_eq!(
            summary,
            vec![
                ("added", ChangeKind::Added),
                ("gone", ChangeKind::Removed),
                ("server.port", ChangeKind::Changed),
            ]
        );
        assert!(d.touches("server"));
        assert!(!d.touches("serv"));
        assert!(!d.touches("debug"));
    }

    #[test]
    fn test_identical_values() {
        let value = json!({"a": {"b": [1, 2]}});
        let d = diff(&value, &value);
        assert!(d.is_empty());
        assert_eq!(d.to_string(), "No differences found.\n");
    }

    #[test]
    fn test_display_lines() {
        let d = diff(&json!({"a": 1, "b": 2}), &json!({"a": 2, "c": 3}));
        assert_eq!(d.to_string(), "~ a: 1 -> 2\n- b: 2\n+ c: 3\n");
    }
}
