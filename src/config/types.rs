//! Configuration types shared across the resolver.
//!
//! Config bodies are plain `serde_json::Value`s; a "mapping" is a
//! `Value::Object`.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// The result of one resolution pass.
///
/// Immutable once returned. The watcher replaces it wholesale on reload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConfig {
    /// The merged configuration.
    pub config: Value,
    /// Absolute working directory the pass ran in.
    pub cwd: PathBuf,
    /// Main config file: the file that was found, or the expected location.
    pub config_file: PathBuf,
    /// Every contributing source, in insertion order.
    pub layers: Vec<Layer>,
    /// The main config file, only if it actually exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_config_file: Option<PathBuf>,
    /// `$meta` of the main config merged with its source options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ResolvedConfig {
    /// Look up a value by JSON pointer (`/server/port`) or a top-level key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        if key.starts_with('/') {
            self.config.pointer(key)
        } else {
            self.config.get(key)
        }
    }
}

/// One contributing configuration origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layer {
    pub config: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "SourceOptions::is_empty")]
    pub source_options: SourceOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl Layer {
    /// A layer with only a body and an optional file label.
    pub fn new(config: Value, config_file: Option<PathBuf>) -> Self {
        Self {
            config,
            config_file,
            cwd: None,
            source: None,
            source_options: SourceOptions::default(),
            meta: None,
        }
    }

    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }
}

/// Options attached to a single extends entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceOptions {
    /// Metadata merged over the source's own `$meta`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    /// Values merged over the source's config.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overrides: Option<Value>,
    /// Reuse an existing remote cache directory instead of re-fetching.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub install: bool,
    /// Bearer token for remote template downloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    /// Remote fetch options; `providers` declares custom source prefixes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub giget: Option<Value>,
}

impl SourceOptions {
    /// Parse options from a mapping. Malformed options are ignored with a warning.
    pub fn from_value(value: &Value) -> Self {
        if value.is_null() {
            return Self::default();
        }
        serde_json::from_value(value.clone()).unwrap_or_else(|err| {
            warn!("Ignoring malformed extends options {}: {}", value, err);
            Self::default()
        })
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Custom remote provider names declared under `giget.providers`.
    pub fn provider_names(&self) -> Vec<String> {
        self.giget
            .as_ref()
            .and_then(|g| g.get("providers"))
            .and_then(Value::as_object)
            .map(|providers| providers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// URL template registered for a custom provider.
    pub fn provider_template(&self, name: &str) -> Option<&str> {
        self.giget
            .as_ref()
            .and_then(|g| g.get("providers"))
            .and_then(|p| p.get(name))
            .and_then(Value::as_str)
    }
}

/// A normalized extends entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendSource {
    pub source: String,
    pub options: SourceOptions,
}

impl ExtendSource {
    /// Normalize a raw extends entry.
    ///
    /// Accepts `"source"`, `["source", {options}]` and
    /// `{ "source": "...", "options": {...} }`. Returns `None` when the entry
    /// does not boil down to a string source.
    pub fn from_value(entry: &Value) -> Option<Self> {
        let (source, options) = match entry {
            Value::Object(map) if map.get("source").is_some_and(is_truthy) => {
                let options = map.get("options").cloned().unwrap_or(Value::Null);
                match &map["source"] {
                    Value::Array(pair) => (
                        pair.first()?,
                        pair.get(1).cloned().unwrap_or(options),
                    ),
                    source => (source, options),
                }
            }
            Value::Array(pair) => (pair.first()?, pair.get(1).cloned().unwrap_or(Value::Null)),
            other => (other, Value::Null),
        };
        let source = source.as_str()?.to_string();
        Some(Self {
            source,
            options: SourceOptions::from_value(&options),
        })
    }
}

/// Falsy in the loose sense used when collecting extends entries.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

/// Function form of a computed config.
pub type ComputeFn = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// What loading a config file produces.
///
/// Code modules may export a function of the caller's context instead of a
/// static mapping.
#[derive(Clone)]
pub enum ConfigValue {
    Static(Value),
    Computed(ComputeFn),
}

impl ConfigValue {
    pub fn computed<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::Computed(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    /// Produce the config body, invoking the function with `context` if needed.
    pub async fn into_value(self, context: &Value) -> anyhow::Result<Value> {
        match self {
            Self::Static(value) => Ok(value),
            Self::Computed(f) => f(context.clone()).await,
        }
    }
}

impl std::fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(v) => f.debug_tuple("Static").field(v).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Slots resolved so far, handed to computed `overrides`/`default_config`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotContext {
    pub overrides: Option<Value>,
    pub main: Option<Value>,
    pub rc: Option<Value>,
    pub package_json: Option<Value>,
}

pub type SlotFn =
    Arc<dyn Fn(SlotContext) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// A programmatic config slot: a value or a function of earlier slots.
#[derive(Clone)]
pub enum ConfigInput {
    Static(Value),
    Computed(SlotFn),
}

impl ConfigInput {
    pub fn computed<F, Fut>(f: F) -> Self
    where
        F: Fn(SlotContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::Computed(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    pub async fn resolve(&self, ctx: &SlotContext) -> anyhow::Result<Value> {
        match self {
            Self::Static(value) => Ok(value.clone()),
            Self::Computed(f) => f(ctx.clone()).await,
        }
    }
}

impl From<Value> for ConfigInput {
    fn from(value: Value) -> Self {
        Self::Static(value)
    }
}

/// True for `{}` and `null`.
pub(crate) fn is_empty_config(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extend_source_string() {
        let src = ExtendSource::from_value(&json!("./base")).unwrap();
        assert_eq!(src.source, "./base");
        assert!(src.options.is_empty());
    }

    #[test]
    fn test_extend_source_tuple() {
        let src = ExtendSource::from_value(&json!(["gh:org/repo", { "install": true }])).unwrap();
        assert_eq!(src.source, "gh:org/repo");
        assert!(src.options.install);
    }

    #[test]
    fn test_extend_source_object() {
        let src = ExtendSource::from_value(&json!({
            "source": "./theme",
            "options": { "meta": { "name": "theme" } }
        }))
        .unwrap();
        assert_eq!(src.source, "./theme");
        assert_eq!(src.options.meta, Some(json!({ "name": "theme" })));
    }

    #[test]
    fn test_extend_source_malformed() {
        assert!(ExtendSource::from_value(&json!({ "nope": 1 })).is_none());
        assert!(ExtendSource::from_value(&json!(42)).is_none());
        assert!(ExtendSource::from_value(&json!({ "source": { "deep": true } })).is_none());
    }

    #[test]
    fn test_provider_names() {
        let opts = SourceOptions::from_value(&json!({
            "giget": { "providers": { "internal": "https://git.example.com/{repo}/{ref}.tar.gz" } }
        }));
        assert_eq!(opts.provider_names(), vec!["internal".to_string()]);
        assert_eq!(
            opts.provider_template("internal"),
            Some("https://git.example.com/{repo}/{ref}.tar.gz")
        );
    }

    #[tokio::test]
    async fn test_computed_config_value_receives_context() {
        let value = ConfigValue::computed(|ctx| async move { Ok(json!({ "from": ctx["who"] })) });
        let out = value.into_value(&json!({ "who": "caller" })).await.unwrap();
        assert_eq!(out, json!({ "from": "caller" }));
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(false)));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!({})));
    }
}
