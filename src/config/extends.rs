//! Recursive `extends` resolution.

use super::options::ResolveOptions;
use super::source::resolve_source;
use super::types::{ExtendSource, Layer, is_truthy};
use crate::error::{ConfigError, Result};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Remove the extends keys from `config` and collect their truthy entries.
fn take_entries(config: &mut Value, keys: &[String]) -> Vec<Value> {
    let Value::Object(map) = config else {
        return Vec::new();
    };
    let mut entries = Vec::new();
    for key in keys {
        match map.remove(key) {
            Some(Value::Array(items)) => entries.extend(items.into_iter().filter(is_truthy)),
            Some(value) if is_truthy(&value) => entries.push(value),
            _ => {}
        }
    }
    entries
}

/// Resolve the extends entries of `config` into a flat layer list.
///
/// The extends keys are removed from `config`. Layers come back in pre-order:
/// each extended layer is followed by its own extended layers before the
/// next sibling. `chain` holds the config files already on the current
/// path and is used to reject cycles.
pub fn extend_config<'a>(
    config: &'a mut Value,
    cwd: &'a Path,
    options: &'a ResolveOptions,
    chain: Vec<PathBuf>,
) -> BoxFuture<'a, Result<Vec<Layer>>> {
    async move {
        let Some(extend) = &options.extend else {
            return Ok(Vec::new());
        };
        let entries = take_entries(config, &extend.extend_keys);
        let mut layers = Vec::new();

        for entry in entries {
            let Some(ExtendSource { source, options: source_options }) =
                ExtendSource::from_value(&entry)
            else {
                warn!("Cannot extend config from `{}` in {}", entry, cwd.display());
                continue;
            };

            let resolved = match resolve_source(&source, cwd, options, source_options).await {
                Ok(resolved) => resolved,
                Err(
                    err @ (ConfigError::Fetch { .. }
                    | ConfigError::Io { .. }
                    | ConfigError::NoModuleEvaluator { .. }
                    | ConfigError::Callback(_)),
                ) => {
                    warn!("Cannot extend config from `{}` in {}: {}", source, cwd.display(), err);
                    continue;
                }
                Err(err) => return Err(err),
            };
            let Some(mut body) = resolved.config.clone() else {
                warn!("Cannot extend config from `{}` in {}", source, cwd.display());
                continue;
            };

            if let Some(file) = &resolved.source_config_file
                && chain.contains(file)
            {
                let mut cycle = chain.clone();
                cycle.push(file.clone());
                return Err(ConfigError::CyclicExtend { chain: cycle });
            }
            debug!("Extending config from {}", resolved.config_file.display());

            let mut nested_chain = chain.clone();
            nested_chain.extend(resolved.source_config_file.clone());
            let layer_cwd = resolved.cwd.clone();
            let nested = extend_config(&mut body, &layer_cwd, options, nested_chain).await?;

            layers.push(resolved.into_layer(body));
            layers.extend(nested);
        }

        Ok(layers)
    }
    .boxed()
}
