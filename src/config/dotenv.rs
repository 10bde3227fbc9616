//! Variable files (`.env`) loaded into a target environment.
//!
//! A variable set from a file may be replaced by a later load; a variable
//! the user set some other way never is. Which keys came from files is
//! tracked in a [`SourcedVars`] registry that lives next to the environment
//! it describes.
//!
//! `$VAR` and `${VAR}` references are expanded once every file is merged,
//! so a value can refer to the target environment or to an earlier file.

use crate::error::{ConfigError, Result};
use regex_lite::{Captures, Regex};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};
use tracing::{debug, warn};

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(.?)\$\{?([0-9A-Za-z_:]+)?\}?").expect("reference pattern is valid")
});

/// Stand-ins for `$` and `\$` while dotenvy parses, so it leaves
/// references for [`interpolate`].
const DOLLAR: char = '\u{E000}';
const ESCAPED_DOLLAR: char = '\u{E001}';

/// A mutable environment mapping.
pub trait EnvStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
    fn vars(&self) -> BTreeMap<String, String>;
}

impl EnvStore for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        BTreeMap::get(self, key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.insert(key.to_string(), value.to_string());
    }

    fn vars(&self) -> BTreeMap<String, String> {
        self.clone()
    }
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvStore for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn set(&mut self, key: &str, value: &str) {
        // SAFETY: the resolver writes only from its dotenv step, one load
        // at a time under the EnvTarget mutex. Reads of the process
        // environment elsewhere (rc and cache lookups) are not covered by
        // that mutex, so callers must not resolve concurrently against it.
        unsafe {
            std::env::set_var(key, value);
        }
    }

    fn vars(&self) -> BTreeMap<String, String> {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }
}

/// Keys that were last set from a variable file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcedVars(HashSet<String>);

impl SourcedVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn insert(&mut self, key: impl Into<String>) {
        self.0.insert(key.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An environment plus its sourced-variable registry.
///
/// Share one `EnvTarget` across every load that writes the same
/// environment so repeated loads can refresh file-sourced values.
pub struct EnvTarget {
    store: Box<dyn EnvStore>,
    sourced: SourcedVars,
}

/// Shared handle used by [`ResolveOptions`](super::ResolveOptions).
pub type SharedEnv = Arc<Mutex<EnvTarget>>;

impl EnvTarget {
    pub fn new(store: impl EnvStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            sourced: SourcedVars::new(),
        }
    }

    /// Target the process environment.
    pub fn process() -> Self {
        Self::new(ProcessEnv)
    }

    /// Target an in-memory mapping.
    pub fn from_vars(vars: BTreeMap<String, String>) -> Self {
        Self::new(vars)
    }

    pub fn shared(self) -> SharedEnv {
        Arc::new(Mutex::new(self))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.store.get(key)
    }

    pub fn vars(&self) -> BTreeMap<String, String> {
        self.store.vars()
    }

    pub fn sourced(&self) -> &SourcedVars {
        &self.sourced
    }
}

impl std::fmt::Debug for EnvTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvTarget")
            .field("sourced", &self.sourced)
            .finish_non_exhaustive()
    }
}

/// Which variable files to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotenvOptions {
    /// Directory holding the files; defaults to the resolver's cwd.
    pub cwd: Option<PathBuf>,
    /// File names, loaded in order; later files win over earlier ones.
    pub file_names: Vec<String>,
    /// Expand `$VAR` references after loading.
    pub interpolate: bool,
}

impl Default for DotenvOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            file_names: vec![".env".to_string()],
            interpolate: true,
        }
    }
}

impl DotenvOptions {
    pub fn with_files(files: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            file_names: files.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn without_interpolation(mut self) -> Self {
        self.interpolate = false;
        self
    }
}

/// Parse one variable file, keeping references unexpanded.
fn parse_file(path: &Path) -> Result<Vec<(String, String)>> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
    let masked = contents
        .replace("\\$", &ESCAPED_DOLLAR.to_string())
        .replace('$', &DOLLAR.to_string());
    dotenvy::from_read_iter(masked.as_bytes())
        .map(|item| {
            let (key, value) = item.map_err(|e| ConfigError::parse(path, e))?;
            let value = value.replace(ESCAPED_DOLLAR, "\\$").replace(DOLLAR, "$");
            Ok((key, value))
        })
        .collect()
}

/// Expand `$VAR` and `${VAR}` in every value of `environment`.
///
/// References resolve against `environment` itself, recursively. Unknown
/// names stay as written, `\$` yields a literal `$`, and a value that
/// refers back into its own chain expands to nothing.
pub fn interpolate(environment: &mut BTreeMap<String, String>) {
    let snapshot = environment.clone();
    for value in environment.values_mut() {
        *value = expand(value, &snapshot, &[]);
    }
}

fn expand(value: &str, env: &BTreeMap<String, String>, parents: &[&str]) -> String {
    let mut looped = false;
    let expanded = REFERENCE.replace_all(value, |caps: &Captures<'_>| {
        let whole = &caps[0];
        let prefix = caps.get(1).map_or("", |m| m.as_str());
        if prefix == "\\" {
            return whole.replacen("\\$", "$", 1);
        }
        let Some(key) = caps.get(2).map(|m| m.as_str()) else {
            return whole.to_string();
        };
        if parents.contains(&key) {
            warn!(
                "Recursive environment variable: {} > {}",
                parents.join(" > "),
                key
            );
            looped = true;
            return String::new();
        }
        match env.get(key) {
            Some(found) => {
                let mut chain = parents.to_vec();
                chain.push(key);
                format!("{prefix}{}", expand(found, env, &chain))
            }
            None => whole.to_string(),
        }
    });
    if looped {
        String::new()
    } else {
        expanded.into_owned()
    }
}

/// Load variable files on top of `env` without writing anywhere.
///
/// A key present in `env` that did not come from a file is kept. Keys
/// taken from files are recorded in `sourced`. References are expanded
/// over the merged result unless interpolation is off.
pub fn load_dotenv(
    options: &DotenvOptions,
    cwd: &Path,
    env: &BTreeMap<String, String>,
    sourced: &mut SourcedVars,
) -> Result<BTreeMap<String, String>> {
    let dir = options.cwd.as_deref().unwrap_or(cwd);
    let mut environment = env.clone();
    for file in &options.file_names {
        let path = dir.join(file);
        if !path.is_file() {
            continue;
        }
        debug!("Loading variables from {}", path.display());
        for (key, value) in parse_file(&path)? {
            if environment.contains_key(&key) && !sourced.contains(&key) {
                continue;
            }
            environment.insert(key.clone(), value);
            sourced.insert(key);
        }
    }
    if options.interpolate {
        interpolate(&mut environment);
    }
    Ok(environment)
}

/// Load variable files into `target`.
///
/// Keys beginning with `_` are never written. A key is written only when
/// the target lacks it or it was previously sourced from a file. Returns
/// the full loaded environment.
pub fn setup_dotenv(
    options: &DotenvOptions,
    cwd: &Path,
    target: &mut EnvTarget,
) -> Result<BTreeMap<String, String>> {
    let current = target.store.vars();
    let environment = load_dotenv(options, cwd, &current, &mut target.sourced)?;
    for (key, value) in &environment {
        if key.starts_with('_') {
            continue;
        }
        if target.store.get(key).is_none() || target.sourced.contains(key) {
            target.store.set(key, value);
        }
    }
    Ok(environment)
}
