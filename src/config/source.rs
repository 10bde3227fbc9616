//! Turning a source string into a loaded config.
//!
//! A source is `"."` for the main config, or an extends entry: a relative
//! or absolute path, a directory, a package name, or a remote template.

use super::formats::{basename, extname, is_file, load_file, normalize, try_resolve};
use super::merge::{promote_env_section, take_meta};
use super::options::ResolveOptions;
use super::remote;
use super::types::{Layer, SourceOptions};
use crate::error::Result;
use async_trait::async_trait;
use regex_lite::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

static PACKAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(@[\da-z~-][\d._a-z~-]*/)?[\da-z~-][\d._a-z~-]*($|/.*)")
        .expect("package name pattern is valid")
});

/// A source after lookup and loading.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSource {
    /// Loaded body, `None` when no file was found.
    pub config: Option<Value>,
    /// The file that was found, or the unresolved source as a placeholder.
    pub config_file: PathBuf,
    /// The file that was found, only if it exists.
    pub source_config_file: Option<PathBuf>,
    /// Directory the source lives in; its own extends resolve from here.
    pub cwd: PathBuf,
    /// Source string after remote/package expansion.
    pub source: String,
    pub source_options: SourceOptions,
    pub meta: Option<Value>,
}

impl ResolvedSource {
    fn missing(source: String, cwd: PathBuf, source_options: SourceOptions) -> Self {
        Self {
            config: None,
            config_file: PathBuf::from(&source),
            source_config_file: None,
            cwd,
            source,
            source_options,
            meta: None,
        }
    }

    /// Turn an extended source into a layer with the given body.
    pub fn into_layer(self, config: Value) -> Layer {
        Layer {
            config,
            config_file: Some(self.config_file),
            cwd: Some(self.cwd),
            source: Some(self.source),
            source_options: self.source_options,
            meta: self.meta,
        }
    }
}

/// Custom source lookup consulted before the built-in rules.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    /// Return `Some` to take over resolution of `source`.
    async fn resolve(
        &self,
        source: &str,
        cwd: &Path,
        options: &ResolveOptions,
    ) -> anyhow::Result<Option<ResolvedSource>>;
}

/// True for bare package specifiers like `theme` or `@org/theme/sub`.
pub fn is_package_name(source: &str) -> bool {
    PACKAGE_NAME.is_match(source)
}

/// Look a package up in `node_modules` at or above `cwd`.
///
/// Returns the package's config entry: a matching file, the manifest's
/// `main`, or the package directory itself.
pub async fn resolve_package(source: &str, cwd: &Path) -> Option<PathBuf> {
    for dir in cwd.ancestors() {
        let candidate = dir.join("node_modules").join(source);
        if let Some(file) = try_resolve(&candidate).await {
            return Some(file);
        }
        if !candidate.is_dir() {
            continue;
        }
        let manifest = candidate.join("package.json");
        if is_file(&manifest).await
            && let Ok(contents) = tokio::fs::read_to_string(&manifest).await
            && let Ok(pkg) = serde_json::from_str::<Value>(&contents)
            && let Some(main) = pkg.get("main").and_then(Value::as_str)
        {
            let entry = normalize(&candidate.join(main));
            if is_file(&entry).await {
                return Some(entry);
            }
        }
        return Some(candidate);
    }
    None
}

/// Resolve and load one source relative to `cwd`.
///
/// A source that cannot be found yields `config: None` rather than an error.
/// Parse and evaluation failures of a found file are errors.
pub async fn resolve_source(
    source: &str,
    cwd: &Path,
    options: &ResolveOptions,
    source_options: SourceOptions,
) -> Result<ResolvedSource> {
    if let Some(resolver) = &options.resolver {
        let custom = resolver
            .resolve(source, cwd, options)
            .await
            .map_err(crate::error::ConfigError::Callback)?;
        if let Some(resolved) = custom {
            return Ok(resolved);
        }
    }

    let mut source = source.to_string();
    if options.giget && remote::is_remote(&source, &source_options) {
        let fetcher = options.fetcher();
        let dir = remote::fetch_remote(&source, cwd, fetcher.as_ref(), &source_options).await?;
        source = dir.to_string_lossy().into_owned();
    }
    if is_package_name(&source)
        && let Some(entry) = resolve_package(&source, cwd).await
    {
        source = entry.to_string_lossy().into_owned();
    }

    let ext = extname(&source);
    let is_dir = ext.is_empty() || ext == basename(&source);
    let target = normalize(&cwd.join(&source));
    let (source_cwd, file_name) = if is_dir {
        (target, options.config_file_name())
    } else {
        let parent = target.parent().map(Path::to_path_buf).unwrap_or_else(|| cwd.to_path_buf());
        (parent, basename(&source).to_string())
    };

    // `.config/app` is tried before `.config/app.config`, so the short
    // name wins when both exist.
    let dot_config = source_cwd.join(".config");
    let candidates = [
        source_cwd.join(&file_name),
        dot_config.join(file_name.strip_suffix(".config").unwrap_or(&file_name)),
        dot_config.join(&file_name),
    ];
    let mut found = None;
    for candidate in &candidates {
        if let Some(file) = try_resolve(candidate).await {
            found = Some(file);
            break;
        }
    }
    let Some(config_file) = found else {
        debug!("No config found for `{}` in {}", source, source_cwd.display());
        return Ok(ResolvedSource::missing(source, source_cwd, source_options));
    };

    debug!("Loading config file {}", config_file.display());
    let mut config = load_file(&config_file, &options.context, options.evaluator.as_deref()).await?;

    let merger = options.merger();
    if let Some(env_name) = options.resolved_env_name() {
        config = promote_env_section(config, &env_name, &merger);
    }

    let own_meta = take_meta(&mut config);
    let meta = match (source_options.meta.clone(), own_meta) {
        (None, None) => None,
        (options_meta, own_meta) => Some(merger(
            [options_meta, own_meta].into_iter().flatten().collect(),
        )),
    };

    if let Some(overrides) = &source_options.overrides {
        config = merger(vec![overrides.clone(), config]);
    }

    Ok(ResolvedSource {
        config: Some(config),
        config_file: config_file.clone(),
        source_config_file: Some(config_file),
        cwd: source_cwd,
        source,
        source_options,
        meta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_package_name_detection() {
        assert!(is_package_name("theme"));
        assert!(is_package_name("@org/theme"));
        assert!(is_package_name("@org/theme/sub"));
        assert!(!is_package_name("./theme"));
        assert!(!is_package_name("../theme"));
        assert!(!is_package_name("/abs/theme"));
        assert!(!is_package_name("Theme"));
    }

    #[tokio::test]
    async fn test_resolve_package_from_ancestor() {
        let temp = TempDir::new().unwrap();
        let pkg = temp.path().join("node_modules/@org/theme");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("package.json"), r#"{"main": "theme.config.json"}"#).unwrap();
        std::fs::write(pkg.join("theme.config.json"), "{}").unwrap();
        let nested = temp.path().join("apps/web");
        std::fs::create_dir_all(&nested).unwrap();

        let entry = resolve_package("@org/theme", &nested).await.unwrap();
        assert_eq!(entry, pkg.join("theme.config.json"));
        assert!(resolve_package("@org/missing", &nested).await.is_none());
    }

    #[tokio::test]
    async fn test_directory_source_uses_config_file_name() {
        let temp = TempDir::new().unwrap();
        let layer = temp.path().join("layer");
        std::fs::create_dir_all(&layer).unwrap();
        std::fs::write(layer.join("app.config.yaml"), "theme: dark\n").unwrap();

        let options = ResolveOptions::new(temp.path()).with_name("app");
        let resolved = resolve_source("./layer", temp.path(), &options, SourceOptions::default())
            .await
            .unwrap();
        assert_eq!(resolved.config, Some(json!({"theme": "dark"})));
        assert_eq!(resolved.cwd, layer);
        assert_eq!(resolved.source_config_file, Some(layer.join("app.config.yaml")));
    }

    #[tokio::test]
    async fn test_dot_config_directory() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join(".config")).unwrap();
        std::fs::write(temp.path().join(".config/app.toml"), "a = 1\n").unwrap();

        let options = ResolveOptions::new(temp.path()).with_name("app");
        let resolved = resolve_source(".", temp.path(), &options, SourceOptions::default())
            .await
            .unwrap();
        assert_eq!(resolved.config, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_missing_source_is_placeholder() {
        let temp = TempDir::new().unwrap();
        let options = ResolveOptions::new(temp.path());
        let resolved = resolve_source("./nope.json", temp.path(), &options, SourceOptions::default())
            .await
            .unwrap();
        assert!(resolved.config.is_none());
        assert!(resolved.source_config_file.is_none());
        assert_eq!(resolved.config_file, PathBuf::from("./nope.json"));
    }

    #[tokio::test]
    async fn test_meta_and_source_overrides() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("base.json"),
            r#"{"$meta": {"name": "base", "v": 1}, "port": 1}"#,
        )
        .unwrap();

        let options = ResolveOptions::new(temp.path());
        let source_options = SourceOptions::from_value(&json!({
            "meta": {"v": 2},
            "overrides": {"port": 2}
        }));
        let resolved = resolve_source("./base.json", temp.path(), &options, source_options)
            .await
            .unwrap();
        assert_eq!(resolved.config, Some(json!({"port": 2})));
        assert_eq!(resolved.meta, Some(json!({"name": "base", "v": 2})));
    }
}
