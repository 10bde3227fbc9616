//! confstack
//!
//! Prints the resolved configuration of a project, its layers, or a live
//! stream of changes while its config files are edited.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use confstack::cli::output::{OutputFormat, parse_value, set_dotted};
use confstack::cli::{Cli, Command, ResolveArgs, SetArgs, WatchArgs};
use confstack::config::{
    ResolveOptions, UpdateOptions, WatchContext, WatchEvent, WatchHooks, WatchOptions,
    load_config, update_config, watch_config,
};
use confstack::logging::{self, LogTarget};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Prints each committed change.
struct PrintChanges {
    format: OutputFormat,
}

#[async_trait]
impl WatchHooks for PrintChanges {
    async fn on_watch(&self, event: &WatchEvent) -> anyhow::Result<()> {
        debug!("{} {}", event.kind, event.path.display());
        Ok(())
    }

    async fn on_update(&self, context: &WatchContext) -> anyhow::Result<()> {
        let diff = context.diff();
        if diff.is_empty() {
            info!("Config reloaded without changes");
            return Ok(());
        }
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string(diff)?),
            OutputFormat::Yaml => print!("---\n{}", self.format.render(diff)?),
        }
        Ok(())
    }
}

async fn resolve(options: &ResolveOptions, format: OutputFormat, args: &ResolveArgs) -> Result<()> {
    let resolved = load_config(options).await?;
    let value = match &args.key {
        Some(key) => resolved
            .get(key)
            .cloned()
            .with_context(|| format!("key `{key}` is not set"))?,
        None => resolved.config,
    };
    println!("{}", format.render(&value)?);
    Ok(())
}

async fn layers(options: &ResolveOptions, format: OutputFormat) -> Result<()> {
    let resolved = load_config(options).await?;
    let summary: Vec<Value> = resolved
        .layers
        .iter()
        .map(|layer| {
            json!({
                "config_file": layer.config_file,
                "source": layer.source,
                "cwd": layer.cwd,
                "keys": layer
                    .config
                    .as_object()
                    .map(|map| map.keys().cloned().collect::<Vec<_>>())
                    .unwrap_or_default(),
            })
        })
        .collect();
    println!("{}", format.render(&summary)?);
    Ok(())
}

async fn watch(options: ResolveOptions, format: OutputFormat, args: &WatchArgs) -> Result<()> {
    let debounce = (args.debounce_ms > 0).then(|| Duration::from_millis(args.debounce_ms));
    let watcher = watch_config(
        WatchOptions::new(options)
            .with_debounce(debounce)
            .with_hooks(Arc::new(PrintChanges { format })),
    )
    .await?;

    println!("{}", format.render(&watcher.config().config)?);
    info!(
        "Watching {} files, press Ctrl-C to stop",
        watcher.watching_files().len()
    );
    tokio::signal::ctrl_c().await?;
    watcher.unwatch().await;
    Ok(())
}

async fn set(options: &ResolveOptions, args: &SetArgs) -> Result<()> {
    let cwd = options.absolute_cwd()?;
    let update = UpdateOptions::new(cwd, options.config_file_name())
        .with_create_extension(&args.create_extension);
    let value = parse_value(&args.value);
    let result = update_config(&update, |config| {
        set_dotted(config, &args.key, value.clone());
        Ok(())
    })
    .await?;

    if result.created {
        println!("Created {}", result.config_file.display());
    }
    println!("Set {} in {}", args.key, result.config_file.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let target: LogTarget = cli.log.parse()?;
    logging::init(&target, cli.verbose)?;

    let options = cli.resolve_options();
    debug!("Resolving with {:?}", options);

    match cli.command {
        None => resolve(&options, cli.format, &ResolveArgs::default()).await,
        Some(Command::Resolve(args)) => resolve(&options, cli.format, &args).await,
        Some(Command::Layers) => layers(&options, cli.format).await,
        Some(Command::Watch(args)) => watch(options, cli.format, &args).await,
        Some(Command::Set(args)) => set(&options, &args).await,
    }
}
