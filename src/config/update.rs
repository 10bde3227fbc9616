//! Programmatic edits to a code-module config file.
//!
//! The file is located the same way the resolver finds the main config, or
//! created from a template when missing, then handed to a [`ConfigRewriter`]
//! that exposes its default export as a value to edit.

use super::formats::{UPDATABLE_EXTENSIONS, extname, try_resolve};
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use regex_lite::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::info;

/// Contents written to a freshly created config file.
pub const DEFAULT_TEMPLATE: &str = "export default {}\n";

/// Answer of the create hook for a missing config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateDecision {
    Abort,
    /// Create with [`DEFAULT_TEMPLATE`].
    Default,
    /// Create with these contents.
    Template(String),
}

pub type OnCreate = Arc<dyn Fn(&Path) -> CreateDecision + Send + Sync>;

/// Edit callback handed to a rewriter.
pub type EditFn<'a> = dyn FnMut(&mut Value) -> anyhow::Result<()> + Send + 'a;

/// Rewrites the default export of a module source.
#[async_trait]
pub trait ConfigRewriter: Send + Sync {
    /// Apply `edit` to the default export of `source` and return the new
    /// source, or `None` when the module has no default export.
    async fn rewrite(
        &self,
        path: &Path,
        source: &str,
        edit: &mut EditFn<'_>,
    ) -> anyhow::Result<Option<String>>;
}

static DEFAULT_EXPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^export\s+default\s+").expect("default export pattern is valid")
});

static WRAPPER_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^([A-Za-z_$][0-9A-Za-z_$]*)\s*\((.*)\)$").expect("wrapper call pattern is valid")
});

/// Rewriter for modules whose default export is an object literal,
/// optionally wrapped in a helper call such as `defineConfig({...})`.
///
/// The literal is parsed as JSON5 and regenerated as formatted JSON, so
/// comments inside it are not preserved. Code before the export is kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralRewriter;

#[async_trait]
impl ConfigRewriter for LiteralRewriter {
    async fn rewrite(
        &self,
        _path: &Path,
        source: &str,
        edit: &mut EditFn<'_>,
    ) -> anyhow::Result<Option<String>> {
        let Some(export) = DEFAULT_EXPORT.find(source) else {
            return Ok(None);
        };
        let prefix = &source[..export.end()];
        let expression = source[export.end()..].trim().trim_end_matches(';').trim_end();

        let (wrapper, literal) = match WRAPPER_CALL.captures(expression) {
            Some(caps) => (
                caps.get(1).map(|m| m.as_str()),
                caps.get(2).map_or("", |m| m.as_str()).trim(),
            ),
            None => (None, expression),
        };
        let mut value: Value = json5::from_str(literal)?;
        edit(&mut value)?;

        let body = serde_json::to_string_pretty(&value)?;
        let expression = match wrapper {
            Some(name) => format!("{name}({body})"),
            None => body,
        };
        Ok(Some(format!("{prefix}{expression}\n")))
    }
}

/// Options for [`update_config`].
#[derive(Clone)]
pub struct UpdateOptions {
    pub cwd: PathBuf,
    /// File name without extension, e.g. `app.config`.
    pub config_file: String,
    /// Extension of a created file.
    pub create_extension: String,
    pub on_create: Option<OnCreate>,
    pub rewriter: Arc<dyn ConfigRewriter>,
}

impl UpdateOptions {
    pub fn new(cwd: impl Into<PathBuf>, config_file: impl Into<String>) -> Self {
        Self {
            cwd: cwd.into(),
            config_file: config_file.into(),
            create_extension: ".ts".to_string(),
            on_create: None,
            rewriter: Arc::new(LiteralRewriter),
        }
    }

    pub fn with_create_extension(mut self, ext: impl Into<String>) -> Self {
        self.create_extension = ext.into();
        self
    }

    pub fn with_on_create(
        mut self,
        on_create: impl Fn(&Path) -> CreateDecision + Send + Sync + 'static,
    ) -> Self {
        self.on_create = Some(Arc::new(on_create));
        self
    }

    pub fn with_rewriter(mut self, rewriter: Arc<dyn ConfigRewriter>) -> Self {
        self.rewriter = rewriter;
        self
    }
}

/// Which file was updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    pub config_file: PathBuf,
    pub created: bool,
}

async fn locate(options: &UpdateOptions) -> Option<PathBuf> {
    let stem = options
        .config_file
        .split('.')
        .next()
        .unwrap_or(&options.config_file);
    let dot_config = options.cwd.join(".config");
    for candidate in [
        options.cwd.join(&options.config_file),
        dot_config.join(&options.config_file),
        dot_config.join(stem),
    ] {
        if let Some(found) = try_resolve(&candidate).await {
            return Some(found);
        }
    }
    None
}

/// Update a config file in place, creating it first when missing.
pub async fn update_config<F>(options: &UpdateOptions, mut edit: F) -> Result<UpdateResult>
where
    F: FnMut(&mut Value) -> anyhow::Result<()> + Send,
{
    let mut created = false;
    let config_file = match locate(options).await {
        Some(found) => found,
        None => {
            let path = options
                .cwd
                .join(format!("{}{}", options.config_file, options.create_extension));
            let decision = options
                .on_create
                .as_ref()
                .map_or(CreateDecision::Default, |hook| hook(&path));
            let contents = match decision {
                CreateDecision::Abort => return Err(ConfigError::CreateAborted { path }),
                CreateDecision::Default => DEFAULT_TEMPLATE.to_string(),
                CreateDecision::Template(contents) => contents,
            };
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ConfigError::io(parent, e))?;
            }
            tokio::fs::write(&path, contents)
                .await
                .map_err(|e| ConfigError::io(&path, e))?;
            info!("Created config file {}", path.display());
            created = true;
            path
        }
    };

    let ext = extname(&config_file.to_string_lossy()).to_string();
    if !UPDATABLE_EXTENSIONS.contains(&ext.as_str()) {
        return Err(ConfigError::UnsupportedFileExtension {
            ext,
            path: config_file,
        });
    }

    let source = tokio::fs::read_to_string(&config_file)
        .await
        .map_err(|e| ConfigError::io(&config_file, e))?;

    let mut callback_error = None;
    let mut guarded = |value: &mut Value| -> anyhow::Result<()> {
        edit(value).map_err(|e| {
            let message = format!("{e:#}");
            callback_error = Some(e);
            anyhow::anyhow!(message)
        })
    };
    let rewritten = options
        .rewriter
        .rewrite(&config_file, &source, &mut guarded)
        .await;
    let output = match rewritten {
        Ok(Some(output)) => output,
        Ok(None) => return Err(ConfigError::MissingDefaultExport { path: config_file }),
        Err(e) => {
            return Err(match callback_error.take() {
                Some(callback) => ConfigError::Callback(callback),
                None => ConfigError::parse(&config_file, format!("{e:#}")),
            });
        }
    };

    tokio::fs::write(&config_file, output)
        .await
        .map_err(|e| ConfigError::io(&config_file, e))?;
    info!("Updated config file {}", config_file.display());
    Ok(UpdateResult {
        config_file,
        created,
    })
}
