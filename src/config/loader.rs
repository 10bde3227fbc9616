//! The resolution pass.
//!
//! Gathers the main config, rc files, `package.json` sections, programmatic
//! slots and extended layers, then merges them in a fixed order:
//! overrides > main > rc > package.json > default config > extends > defaults.

use super::dotenv::setup_dotenv;
use super::extends::extend_config;
use super::merge::omit_dollar_keys;
use super::options::{EnvName, ResolveOptions};
use super::package::read_sections;
use super::rc;
use super::source::resolve_source;
use super::types::{ConfigInput, Layer, ResolvedConfig, SlotContext, SourceOptions, is_empty_config};
use crate::error::{ConfigError, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::PoisonError;
use tracing::{debug, info};

/// Resolve the merged configuration for `options`.
///
/// Absent sources contribute nothing. Fails when a required main config is
/// missing, when a found file cannot be parsed or evaluated, or when an
/// extends chain is cyclic.
pub async fn load_config(options: &ResolveOptions) -> Result<ResolvedConfig> {
    let cwd = options
        .absolute_cwd()
        .map_err(|e| ConfigError::io(&options.cwd, e))?;
    let options = normalize(options, &cwd);
    let config_file_name = options.config_file_name();

    if let Some(dotenv) = &options.dotenv {
        let mut target = options.env.lock().unwrap_or_else(PoisonError::into_inner);
        let loaded = setup_dotenv(dotenv, &cwd, &mut target)?;
        debug!("Loaded {} environment variables", loaded.len());
    }

    let main = resolve_source(".", &cwd, &options, SourceOptions::default()).await?;
    if options.config_file_required && main.source_config_file.is_none() {
        return Err(ConfigError::MissingRequiredConfig {
            path: cwd.join(&config_file_name),
        });
    }

    let rc = read_rc(&options, &cwd).await;
    let merger = options.merger();
    let package_json = read_sections(&cwd, &options.package_json, &options.name, &merger).await?;

    let mut slots = SlotContext::default();
    slots.overrides = resolve_slot(options.overrides.as_ref(), &slots).await?;
    slots.main = main.config.clone();
    slots.rc = Some(rc.clone());
    slots.package_json = package_json.clone();
    let default_config = resolve_slot(options.default_config.as_ref(), &slots).await?;

    let mut extended = Vec::new();
    let mut config = match &main.config {
        Some(array @ Value::Array(_)) => array.clone(),
        _ => {
            let mut merged = merger(
                [
                    slots.overrides.clone(),
                    main.config.clone(),
                    Some(rc.clone()),
                    package_json.clone(),
                    default_config,
                ]
                .into_iter()
                .flatten()
                .collect(),
            );
            if options.extend.is_some() {
                let chain = main.source_config_file.iter().cloned().collect();
                extended = extend_config(&mut merged, &cwd, &options, chain).await?;
                let mut all = vec![merged];
                all.extend(extended.iter().map(|layer| layer.config.clone()));
                merged = merger(all);
            }
            merged
        }
    };

    if let Some(defaults) = &options.defaults {
        config = merger(vec![config, defaults.clone()]);
    }
    if options.omit_dollar_keys {
        omit_dollar_keys(&mut config);
    }

    let mut layers = Vec::new();
    if let Some(overrides) = slots.overrides.filter(|c| !is_empty_config(c)) {
        layers.push(Layer::new(overrides, None));
    }
    if let Some(main_config) = main.config.clone().filter(|c| !is_empty_config(c)) {
        let mut layer =
            Layer::new(main_config, Some(PathBuf::from(&config_file_name))).with_cwd(cwd.clone());
        layer.meta = main.meta.clone();
        layers.push(layer);
    }
    if !is_empty_config(&rc)
        && let Some(rc_file) = options.rc_file_name()
    {
        layers.push(Layer::new(rc, Some(PathBuf::from(rc_file))));
    }
    if let Some(package_config) = package_json.filter(|c| !is_empty_config(c)) {
        layers.push(Layer::new(package_config, Some(PathBuf::from("package.json"))));
    }
    layers.extend(extended);

    info!(
        "Resolved {} config from {} layer(s) in {}",
        options.name,
        layers.len(),
        cwd.display()
    );

    Ok(ResolvedConfig {
        config,
        config_file: main
            .source_config_file
            .clone()
            .unwrap_or_else(|| cwd.join(&config_file_name)),
        cwd,
        layers,
        source_config_file: main.source_config_file,
        meta: main.meta,
    })
}

/// Pin the working directory and the environment name for this pass.
///
/// The ambient environment name is read before variable files are loaded.
fn normalize(options: &ResolveOptions, cwd: &Path) -> ResolveOptions {
    let mut options = options.clone();
    options.cwd = cwd.to_path_buf();
    if options.env_name == EnvName::Ambient {
        options.env_name = match options.resolved_env_name() {
            Some(name) => EnvName::Named(name),
            None => EnvName::Disabled,
        };
    }
    options
}

async fn resolve_slot(input: Option<&ConfigInput>, slots: &SlotContext) -> Result<Option<Value>> {
    match input {
        Some(input) => input
            .resolve(slots)
            .await
            .map(Some)
            .map_err(ConfigError::Callback),
        None => Ok(None),
    }
}

/// Local rc, then workspace rc and user rc when global rc is enabled.
/// Earlier files win.
async fn read_rc(options: &ResolveOptions, cwd: &Path) -> Value {
    let Some(rc_file) = options.rc_file_name() else {
        return Value::Object(Map::new());
    };
    let mut sources = vec![rc::read(cwd, &rc_file).await];
    if options.global_rc {
        if let Some(workspace) = rc::find_workspace_dir(cwd).await {
            sources.push(rc::read(&workspace, &rc_file).await);
        }
        sources.push(rc::read_user(&rc_file).await);
    }
    (options.merger())(sources)
}
