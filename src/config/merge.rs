//! Deep merge and precedence rules.
//!
//! Implements field-by-field merging where higher precedence values override
//! lower ones. Arrays are replaced entirely, not concatenated.

use serde_json::{Map, Value};
use std::sync::Arc;

/// A merge strategy over layers given highest precedence first.
pub type Merger = Arc<dyn Fn(Vec<Value>) -> Value + Send + Sync>;

/// Merge `overlay` onto `base`; `overlay` wins on conflicts.
///
/// Mappings merge key by key. Any other overlay value replaces the base
/// outright, except `null`, which leaves the base untouched.
///
/// ```
/// use serde_json::json;
/// use confstack::config::deep_merge;
///
/// let rc = json!({"db": {"host": "localhost", "pool": 4}, "plugins": ["a", "b"]});
/// let main = json!({"db": {"pool": 16}, "plugins": ["c"], "debug": null});
/// assert_eq!(
///     deep_merge(rc, main),
///     json!({"db": {"host": "localhost", "pool": 16}, "plugins": ["c"], "debug": null})
/// );
/// ```
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut merged), Value::Object(top)) => {
            for (key, value) in top {
                let value = match merged.remove(&key) {
                    Some(below) => deep_merge(below, value),
                    None => value,
                };
                merged.insert(key, value);
            }
            Value::Object(merged)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Fold `deep_merge` over `values`; later values win.
pub fn deep_merge_all(values: impl IntoIterator<Item = Value>) -> Value {
    values.into_iter().fold(Value::Null, deep_merge)
}

/// Merge layers given highest precedence FIRST.
///
/// `merge_layers([overrides, main, rc])` lets `overrides` win. Nulls are
/// skipped and the result is at least an empty mapping.
pub fn merge_layers(values: impl IntoIterator<Item = Value>) -> Value {
    let mut values: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    values.reverse();
    deep_merge(Value::Object(Map::new()), deep_merge_all(values))
}

/// The default merger used by the resolver.
pub fn default_merger() -> Merger {
    Arc::new(|values: Vec<Value>| merge_layers(values))
}

/// Collect the environment-specific section of a config.
///
/// Combines `$<env>` with `$env.<env>`, the latter winning key by key.
/// Returns `None` when neither exists or both are empty.
pub fn env_section(config: &Value, env_name: &str) -> Option<Value> {
    let Value::Object(map) = config else {
        return None;
    };
    let mut section = Map::new();
    if let Some(Value::Object(direct)) = map.get(&format!("${env_name}")) {
        section.extend(direct.clone());
    }
    if let Some(Value::Object(nested)) = map.get("$env").and_then(|e| e.get(env_name)) {
        section.extend(nested.clone());
    }
    if section.is_empty() {
        None
    } else {
        Some(Value::Object(section))
    }
}

/// Merge the `env_name` section on top of `config`.
pub fn promote_env_section(config: Value, env_name: &str, merger: &Merger) -> Value {
    match env_section(&config, env_name) {
        Some(section) => merger(vec![section, config]),
        None => config,
    }
}

/// Remove `$meta` from a config body and return it.
pub fn take_meta(config: &mut Value) -> Option<Value> {
    config.as_object_mut().and_then(|map| map.remove("$meta"))
}

/// Drop top-level keys that start with `$`.
pub fn omit_dollar_keys(config: &mut Value) {
    if let Value::Object(map) = config {
        map.retain(|key, _| !key.starts_with('$'));
    }
}
