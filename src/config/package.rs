//! Config sections read from the project's `package.json`.

use super::formats::is_file;
use super::merge::Merger;
use crate::error::{ConfigError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Which `package.json` fields contribute config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PackageJson {
    /// Do not read `package.json`.
    #[default]
    Disabled,
    /// Read the field named after the config `name`.
    Name,
    /// Read these fields; earlier fields win on conflict.
    Keys(Vec<String>),
}

impl PackageJson {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    fn keys(&self, name: &str) -> Vec<String> {
        match self {
            Self::Disabled => Vec::new(),
            Self::Name => vec![name.to_string()],
            Self::Keys(keys) => keys.iter().filter(|k| !k.is_empty()).cloned().collect(),
        }
    }
}

/// Nearest `package.json` at or above `cwd`.
pub async fn find_package_json(cwd: &Path) -> Option<PathBuf> {
    for dir in cwd.ancestors() {
        let candidate = dir.join("package.json");
        if is_file(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

/// Read the selected sections of the nearest `package.json` and merge them.
///
/// A missing manifest contributes nothing. A manifest that exists but is
/// not valid JSON is a parse error.
pub async fn read_sections(
    cwd: &Path,
    selection: &PackageJson,
    name: &str,
    merger: &Merger,
) -> Result<Option<Value>> {
    if !selection.is_enabled() {
        return Ok(None);
    }
    let Some(path) = find_package_json(cwd).await else {
        return Ok(Some(merger(Vec::new())));
    };
    let contents = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| ConfigError::io(&path, e))?;
    let manifest: Value =
        serde_json::from_str(&contents).map_err(|e| ConfigError::parse(&path, e))?;
    debug!("Reading package.json sections from {}", path.display());

    let sections = selection
        .keys(name)
        .iter()
        .filter_map(|key| manifest.get(key).cloned())
        .collect();
    Ok(Some(merger(sections)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::merge::default_merger;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_named_section_from_parent() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"name": "pkg", "app": {"port": 3000}}"#,
        )
        .unwrap();

        let out = read_sections(&nested, &PackageJson::Name, "app", &default_merger())
            .await
            .unwrap();
        assert_eq!(out, Some(json!({"port": 3000})));
    }

    #[tokio::test]
    async fn test_first_key_wins() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"a": {"x": 1, "y": 1}, "b": {"x": 2, "z": 2}}"#,
        )
        .unwrap();

        let selection = PackageJson::Keys(vec!["a".into(), "b".into(), "missing".into()]);
        let out = read_sections(temp.path(), &selection, "app", &default_merger())
            .await
            .unwrap();
        assert_eq!(out, Some(json!({"x": 1, "y": 1, "z": 2})));
    }

    #[tokio::test]
    async fn test_disabled_reads_nothing() {
        let temp = TempDir::new().unwrap();
        let out = read_sections(temp.path(), &PackageJson::Disabled, "app", &default_merger())
            .await
            .unwrap();
        assert_eq!(out, None);
    }
}
