//! rc files: flat `key=value` settings next to the project.
//!
//! Dotted keys expand into nested mappings (`server.port=80`), `key[]=v`
//! appends to a list, and values are typed when they look like JSON
//! literals.

use super::formats::{exists, is_file};
use regex_lite::Regex;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([^\s=]+)\s*=\s*(.*?)\s*$").expect("rc line pattern is valid")
});

static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?(0|[1-9]\d*)(\.\d+)?([eE][+-]?\d+)?$").expect("number pattern is valid")
});

/// Files marking the root of a multi-package workspace, nearest wins.
const WORKSPACE_MARKERS: &[&str] = &[
    "pnpm-workspace.yaml",
    "lerna.json",
    "turbo.json",
    "rush.json",
    "deno.json",
    "deno.jsonc",
];

/// Lockfiles, farthest wins.
const LOCKFILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "bun.lock",
];

/// Parse rc file contents.
pub fn parse(contents: &str) -> Value {
    let mut flat: Vec<(String, Value)> = Vec::new();
    for line in contents.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        let Some(caps) = KEY_VALUE.captures(line) else {
            continue;
        };
        let key = &caps[1];
        if key == "__proto__" || key == "constructor" {
            continue;
        }
        let value = parse_value(caps.get(2).map_or("", |m| m.as_str()));
        if let Some(list_key) = key.strip_suffix("[]") {
            match flat.iter_mut().find(|(k, _)| k == list_key) {
                Some((_, Value::Array(items))) => items.push(value),
                Some((_, existing)) => {
                    let prev = existing.take();
                    *existing = Value::Array(vec![prev, value]);
                }
                None => flat.push((list_key.to_string(), Value::Array(vec![value]))),
            }
            continue;
        }
        match flat.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => flat.push((key.to_string(), value)),
        }
    }
    unflatten(flat)
}

/// Type a raw rc value: booleans, null, numbers and JSON literals are
/// decoded, everything else stays a string.
fn parse_value(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" | "undefined" => return Value::Null,
        _ => {}
    }
    let looks_like_json =
        raw.starts_with('"') || raw.starts_with('{') || raw.starts_with('[') || NUMBER.is_match(raw);
    if looks_like_json && let Ok(value) = serde_json::from_str(raw) {
        return value;
    }
    Value::String(raw.to_string())
}

/// Expand dotted keys into nested mappings; later keys overwrite.
fn unflatten(flat: Vec<(String, Value)>) -> Value {
    let mut root = Map::new();
    for (key, value) in flat {
        let mut parts: Vec<&str> = key.split('.').collect();
        let Some(last) = parts.pop() else {
            continue;
        };
        let mut node = &mut root;
        for part in parts {
            let entry = node
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            node = entry.as_object_mut().expect("entry was just made an object");
        }
        node.insert(last.to_string(), value);
    }
    Value::Object(root)
}

/// Read `<dir>/<name>`; a missing file is an empty mapping.
pub async fn read(dir: &Path, name: &str) -> Value {
    let path = dir.join(name);
    if !is_file(&path).await {
        return Value::Object(Map::new());
    }
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => {
            debug!("Loaded rc file: {}", path.display());
            parse(&contents)
        }
        Err(e) => {
            warn!("Failed to read rc file {}: {}", path.display(), e);
            Value::Object(Map::new())
        }
    }
}

/// Read the user-level rc file (`$XDG_CONFIG_HOME` or the home directory).
pub async fn read_user(name: &str) -> Value {
    match user_rc_dir() {
        Some(dir) => read(&dir, name).await,
        None => Value::Object(Map::new()),
    }
}

fn user_rc_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
}

/// Find the workspace root above `cwd`.
///
/// Looks for the nearest workspace marker, then the nearest `.git`, then the
/// farthest lockfile, then the farthest `package.json`.
pub async fn find_workspace_dir(cwd: &Path) -> Option<PathBuf> {
    for dir in cwd.ancestors() {
        for marker in WORKSPACE_MARKERS {
            if is_file(&dir.join(marker)).await {
                return Some(dir.to_path_buf());
            }
        }
    }
    for dir in cwd.ancestors() {
        if exists(&dir.join(".git")).await {
            return Some(dir.to_path_buf());
        }
    }
    let mut farthest_lock = None;
    let mut farthest_package = None;
    for dir in cwd.ancestors() {
        for lockfile in LOCKFILES {
            if is_file(&dir.join(lockfile)).await {
                farthest_lock = Some(dir.to_path_buf());
            }
        }
        if is_file(&dir.join("package.json")).await {
            farthest_package = Some(dir.to_path_buf());
        }
    }
    farthest_lock.or(farthest_package)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_parse_typed_values() {
        let rc = parse(
            "name=demo\nport = 8080\nratio=0.5\ndebug=true\nempty=\nquoted=\"a b\"\nlist=[1,2]\n",
        );
        assert_eq!(
            rc,
            json!({
                "name": "demo",
                "port": 8080,
                "ratio": 0.5,
                "debug": true,
                "empty": "",
                "quoted": "a b",
                "list": [1, 2]
            })
        );
    }

    #[test]
    fn test_parse_nested_keys() {
        let rc = parse("server.host=localhost\nserver.port=80\nserver.port=81\n");
        assert_eq!(rc, json!({"server": {"host": "localhost", "port": 81}}));
    }

    #[test]
    fn test_parse_array_append_and_comments() {
        let rc = parse("# comment\nplugins[]=a\nplugins[]=b\n; also comment\ngarbage line\n");
        assert_eq!(rc, json!({"plugins": ["a", "b"]}));
    }

    #[test]
    fn test_parse_ignores_prototype_keys() {
        let rc = parse("__proto__=1\nok=1\n");
        assert_eq!(rc, json!({"ok": 1}));
    }

    #[test]
    fn test_version_strings_stay_strings() {
        let rc = parse("version=1.2.3\nzip=01234\n");
        assert_eq!(rc, json!({"version": "1.2.3", "zip": "01234"}));
    }

    #[tokio::test]
    async fn test_read_missing_is_empty() {
        let temp = TempDir::new().unwrap();
        assert_eq!(read(temp.path(), ".apprc").await, json!({}));
    }

    #[tokio::test]
    async fn test_find_workspace_dir_marker() {
        let temp = TempDir::new().unwrap();
        let pkg = temp.path().join("packages/app");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(temp.path().join("pnpm-workspace.yaml"), "packages: []").unwrap();

        let root = find_workspace_dir(&pkg).await.unwrap();
        assert_eq!(root, temp.path());
    }
}
