//! Config file formats and candidate discovery.
//!
//! Structured-data files are parsed by their format crate; code modules go
//! through a caller-supplied [`ModuleEvaluator`].

use super::types::ConfigValue;
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Every extension the resolver looks for, in lookup order.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".js", ".ts", ".mjs", ".cjs", ".mts", ".cts", ".json", ".jsonc", ".json5", ".yaml", ".yml",
    ".toml",
];

/// Extensions evaluated as code modules.
pub const MODULE_EXTENSIONS: &[&str] = &[".js", ".ts", ".mjs", ".cjs", ".mts", ".cts"];

/// Extensions that can be rewritten programmatically.
pub const UPDATABLE_EXTENSIONS: &[&str] = MODULE_EXTENSIONS;

/// Evaluates code-module config files.
///
/// Implementations decide how a module is executed; the resolver only needs
/// its default export, either a value or a function of the caller context.
#[async_trait]
pub trait ModuleEvaluator: Send + Sync {
    async fn evaluate(&self, path: &Path, context: &Value) -> anyhow::Result<ConfigValue>;
}

/// Parser selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    /// JSON5 and JSONC (comments, trailing commas).
    Json5,
    Yaml,
    Toml,
    Module,
}

impl Format {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            ".json" => Some(Self::Json),
            ".jsonc" | ".json5" => Some(Self::Json5),
            ".yaml" | ".yml" => Some(Self::Yaml),
            ".toml" => Some(Self::Toml),
            ext if MODULE_EXTENSIONS.contains(&ext) => Some(Self::Module),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        Self::from_extension(extname(&path.to_string_lossy()))
    }

    /// Parse structured data. Not valid for [`Format::Module`].
    pub fn parse(self, contents: &str, path: &Path) -> Result<Value> {
        match self {
            Self::Json => serde_json::from_str(contents).map_err(|e| ConfigError::parse(path, e)),
            Self::Json5 => json5::from_str(contents).map_err(|e| ConfigError::parse(path, e)),
            Self::Yaml => serde_yaml::from_str::<Option<Value>>(contents)
                .map(|v| v.unwrap_or(Value::Null))
                .map_err(|e| ConfigError::parse(path, e)),
            Self::Toml => toml::from_str(contents).map_err(|e| ConfigError::parse(path, e)),
            Self::Module => Err(ConfigError::parse(path, "code modules are not data")),
        }
    }
}

/// Load a config file into a value.
///
/// Code modules are evaluated and, when they export a function, called with
/// `context`. Files with an unknown extension are evaluated as modules too.
pub async fn load_file(
    path: &Path,
    context: &Value,
    evaluator: Option<&dyn ModuleEvaluator>,
) -> Result<Value> {
    match Format::from_path(path) {
        Some(Format::Module) | None => {
            let Some(evaluator) = evaluator else {
                return Err(ConfigError::NoModuleEvaluator {
                    path: path.to_path_buf(),
                });
            };
            let value = evaluator
                .evaluate(path, context)
                .await
                .map_err(|e| ConfigError::evaluate(path, e))?;
            value
                .into_value(context)
                .await
                .map_err(|e| ConfigError::evaluate(path, e))
        }
        Some(format) => {
            let contents = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ConfigError::io(path, e))?;
            format.parse(&contents, path)
        }
    }
}

/// Resolve `id` to an existing file.
///
/// Tries the literal path, then each supported extension appended, then
/// `<id>/index<ext>`.
pub async fn try_resolve(id: &Path) -> Option<PathBuf> {
    if is_file(id).await {
        return Some(id.to_path_buf());
    }
    for ext in SUPPORTED_EXTENSIONS {
        let candidate = with_suffix(id, ext);
        if is_file(&candidate).await {
            return Some(candidate);
        }
    }
    for ext in SUPPORTED_EXTENSIONS {
        let candidate = id.join(format!("index{ext}"));
        if is_file(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

pub(crate) async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

pub(crate) async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Append a raw suffix (`config` + `.json` = `config.json`).
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Final path segment of a `/`-separated source string.
pub fn basename(source: &str) -> &str {
    let trimmed = source.trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
}

/// Extension of a source string including the dot, or `""`.
///
/// A leading dot does not start an extension: `.config` has none.
pub fn extname(source: &str) -> &str {
    let base = basename(source);
    match base.rfind('.') {
        Some(0) | None => "",
        Some(i) => &base[i..],
    }
}

/// Lexically normalize `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_extname() {
        assert_eq!(extname("config"), "");
        assert_eq!(extname("./base.json"), ".json");
        assert_eq!(extname("app.config"), ".config");
        assert_eq!(extname(".config"), "");
        assert_eq!(extname("dir.d/"), ".d");
        assert_eq!(extname("../layers/theme"), "");
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("a/b/c.json"), "c.json");
        assert_eq!(basename("c"), "c");
        assert_eq!(basename("a/b/"), "b");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
    }

    #[test]
    fn test_parse_dispatch() {
        let p = Path::new("x");
        assert_eq!(
            Format::Json.parse(r#"{"a": 1}"#, p).unwrap(),
            json!({"a": 1})
        );
        assert_eq!(
            Format::Json5
                .parse("{ // comment\n a: 1, b: [1, 2,], }", p)
                .unwrap(),
            json!({"a": 1, "b": [1, 2]})
        );
        assert_eq!(
            Format::Yaml.parse("a:\n  b: true\n", p).unwrap(),
            json!({"a": {"b": true}})
        );
        assert_eq!(
            Format::Toml.parse("[server]\nport = 8080\n", p).unwrap(),
            json!({"server": {"port": 8080}})
        );
    }

    #[test]
    fn test_parse_failure_names_file() {
        let err = Format::Json.parse("{", Path::new("/p/config.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("/p/config.json"));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(Format::from_extension(".yml"), Some(Format::Yaml));
        assert_eq!(Format::from_extension(".jsonc"), Some(Format::Json5));
        assert_eq!(Format::from_extension(".mts"), Some(Format::Module));
        assert_eq!(Format::from_extension(".ini"), None);
    }

    #[tokio::test]
    async fn test_try_resolve_prefers_extension_order() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("config.yaml"), "a: 1").unwrap();
        std::fs::write(temp.path().join("config.json"), "{}").unwrap();

        let found = try_resolve(&temp.path().join("config")).await.unwrap();
        assert_eq!(found, temp.path().join("config.json"));
    }

    #[tokio::test]
    async fn test_try_resolve_index_file() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("theme")).unwrap();
        std::fs::write(temp.path().join("theme/index.toml"), "a = 1").unwrap();

        let found = try_resolve(&temp.path().join("theme")).await.unwrap();
        assert_eq!(found, temp.path().join("theme/index.toml"));
        assert!(try_resolve(&temp.path().join("missing")).await.is_none());
    }

    #[tokio::test]
    async fn test_module_without_evaluator() {
        let err = load_file(Path::new("/nowhere/config.ts"), &Value::Null, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoModuleEvaluator { .. }));
    }
}
