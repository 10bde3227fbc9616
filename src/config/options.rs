//! Options controlling a resolution pass.

use super::dotenv::{DotenvOptions, EnvTarget, SharedEnv};
use super::formats::ModuleEvaluator;
use super::merge::{Merger, default_merger};
use super::package::PackageJson;
use super::remote::{TarballFetcher, TemplateFetcher};
use super::source::SourceResolver;
use super::types::ConfigInput;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

/// Environment variable naming the active environment by default.
pub const ENV_NAME_VAR: &str = "NODE_ENV";

/// Which environment-specific sections (`$<name>`) apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EnvName {
    /// Read from [`ENV_NAME_VAR`] in the target environment.
    #[default]
    Ambient,
    Named(String),
    /// Ignore environment sections.
    Disabled,
}

/// How extends keys are found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendOptions {
    /// Keys holding extends entries, all of them are read.
    pub extend_keys: Vec<String>,
}

impl Default for ExtendOptions {
    fn default() -> Self {
        Self {
            extend_keys: vec!["extends".to_string()],
        }
    }
}

/// Options for [`load_config`](super::load_config).
///
/// Cheap to clone; the watcher re-runs resolution with the same options.
#[derive(Clone)]
pub struct ResolveOptions {
    /// Project directory; relative paths resolve against the process cwd.
    pub cwd: PathBuf,
    /// Logical config name (`app` looks for `app.config.*` and `.apprc`).
    pub name: String,
    /// Main config file name without extension.
    pub config_file: Option<String>,
    /// rc file name; `None` means `.<name>rc`.
    pub rc_file: Option<String>,
    /// Read rc files at all.
    pub rc: bool,
    /// Also read the workspace-root and user-level rc files.
    pub global_rc: bool,
    pub env_name: EnvName,
    pub merger: Option<Merger>,
    /// `None` disables extends resolution.
    pub extend: Option<ExtendOptions>,
    /// Allow remote extends sources.
    pub giget: bool,
    pub fetcher: Option<Arc<dyn TemplateFetcher>>,
    pub package_json: PackageJson,
    /// `None` skips variable-file loading.
    pub dotenv: Option<DotenvOptions>,
    /// Environment written by dotenv loading and read for [`EnvName::Ambient`].
    pub env: SharedEnv,
    pub overrides: Option<ConfigInput>,
    pub default_config: Option<ConfigInput>,
    /// Merged under everything else, last.
    pub defaults: Option<Value>,
    /// Passed to computed config modules.
    pub context: Value,
    pub evaluator: Option<Arc<dyn ModuleEvaluator>>,
    pub resolver: Option<Arc<dyn SourceResolver>>,
    pub config_file_required: bool,
    /// Strip top-level `$`-prefixed keys from the result.
    pub omit_dollar_keys: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            cwd: PathBuf::from("."),
            name: "config".to_string(),
            config_file: None,
            rc_file: None,
            rc: true,
            global_rc: false,
            env_name: EnvName::Ambient,
            merger: None,
            extend: Some(ExtendOptions::default()),
            giget: true,
            fetcher: None,
            package_json: PackageJson::Disabled,
            dotenv: None,
            env: EnvTarget::process().shared(),
            overrides: None,
            default_config: None,
            defaults: None,
            context: Value::Null,
            evaluator: None,
            resolver: None,
            config_file_required: false,
            omit_dollar_keys: false,
        }
    }
}

impl ResolveOptions {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_config_file(mut self, file: impl Into<String>) -> Self {
        self.config_file = Some(file.into());
        self
    }

    pub fn with_rc_file(mut self, file: impl Into<String>) -> Self {
        self.rc_file = Some(file.into());
        self
    }

    pub fn without_rc(mut self) -> Self {
        self.rc = false;
        self
    }

    pub fn with_global_rc(mut self, enabled: bool) -> Self {
        self.global_rc = enabled;
        self
    }

    pub fn with_env_name(mut self, env_name: impl Into<String>) -> Self {
        self.env_name = EnvName::Named(env_name.into());
        self
    }

    pub fn without_env_name(mut self) -> Self {
        self.env_name = EnvName::Disabled;
        self
    }

    pub fn with_merger(mut self, merger: Merger) -> Self {
        self.merger = Some(merger);
        self
    }

    pub fn with_extend_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extend = Some(ExtendOptions {
            extend_keys: keys.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn without_extend(mut self) -> Self {
        self.extend = None;
        self
    }

    pub fn with_giget(mut self, enabled: bool) -> Self {
        self.giget = enabled;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn TemplateFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_package_json(mut self, selection: PackageJson) -> Self {
        self.package_json = selection;
        self
    }

    pub fn with_dotenv(mut self, dotenv: DotenvOptions) -> Self {
        self.dotenv = Some(dotenv);
        self
    }

    pub fn with_env(mut self, env: SharedEnv) -> Self {
        self.env = env;
        self
    }

    pub fn with_overrides(mut self, overrides: impl Into<ConfigInput>) -> Self {
        self.overrides = Some(overrides.into());
        self
    }

    pub fn with_default_config(mut self, default_config: impl Into<ConfigInput>) -> Self {
        self.default_config = Some(default_config.into());
        self
    }

    pub fn with_defaults(mut self, defaults: Value) -> Self {
        self.defaults = Some(defaults);
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ModuleEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn SourceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.config_file_required = required;
        self
    }

    pub fn omit_dollar_keys(mut self, omit: bool) -> Self {
        self.omit_dollar_keys = omit;
        self
    }

    /// Main config file name: `config` for the default name, else `<name>.config`.
    pub fn config_file_name(&self) -> String {
        match &self.config_file {
            Some(file) => file.clone(),
            None if self.name == "config" => "config".to_string(),
            None => format!("{}.config", self.name),
        }
    }

    /// rc file name, or `None` when rc files are disabled.
    pub fn rc_file_name(&self) -> Option<String> {
        if !self.rc {
            return None;
        }
        Some(
            self.rc_file
                .clone()
                .unwrap_or_else(|| format!(".{}rc", self.name)),
        )
    }

    /// Absolute working directory.
    pub fn absolute_cwd(&self) -> std::io::Result<PathBuf> {
        absolute(&self.cwd)
    }

    /// Active environment name, if any.
    pub fn resolved_env_name(&self) -> Option<String> {
        match &self.env_name {
            EnvName::Named(name) => Some(name.clone()),
            EnvName::Disabled => None,
            EnvName::Ambient => self
                .env
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(ENV_NAME_VAR)
                .filter(|v| !v.is_empty()),
        }
    }

    pub fn merger(&self) -> Merger {
        self.merger.clone().unwrap_or_else(default_merger)
    }

    pub fn fetcher(&self) -> Arc<dyn TemplateFetcher> {
        self.fetcher
            .clone()
            .unwrap_or_else(|| Arc::new(TarballFetcher::new()))
    }
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(super::formats::normalize(&joined))
}

impl std::fmt::Debug for ResolveOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolveOptions")
            .field("cwd", &self.cwd)
            .field("name", &self.name)
            .field("config_file", &self.config_file)
            .field("rc_file", &self.rc_file)
            .field("global_rc", &self.global_rc)
            .field("env_name", &self.env_name)
            .field("extend", &self.extend)
            .field("giget", &self.giget)
            .field("package_json", &self.package_json)
            .field("dotenv", &self.dotenv)
            .field("config_file_required", &self.config_file_required)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_file_name_defaults() {
        let default = ResolveOptions::default();
        assert_eq!(default.config_file_name(), "config");
        assert_eq!(default.rc_file_name().as_deref(), Some(".configrc"));

        let named = ResolveOptions::default().with_name("app");
        assert_eq!(named.config_file_name(), "app.config");
        assert_eq!(named.rc_file_name().as_deref(), Some(".apprc"));

        assert_eq!(named.without_rc().rc_file_name(), None);
    }

    #[test]
    fn test_ambient_env_name_reads_target() {
        let env = EnvTarget::from_vars(BTreeMap::from([(
            ENV_NAME_VAR.to_string(),
            "staging".to_string(),
        )]))
        .shared();
        let options = ResolveOptions::default().with_env(env);
        assert_eq!(options.resolved_env_name().as_deref(), Some("staging"));
        assert_eq!(
            options.clone().with_env_name("prod").resolved_env_name().as_deref(),
            Some("prod")
        );
        assert_eq!(options.without_env_name().resolved_env_name(), None);
    }

    #[test]
    fn test_absolute_cwd_normalizes() {
        let options = ResolveOptions::new("/srv/app/./sub/..");
        assert_eq!(options.absolute_cwd().unwrap(), PathBuf::from("/srv/app"));
    }
}
