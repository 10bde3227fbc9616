//! CLI command definitions for confstack
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

pub mod output;

use crate::config::{DotenvOptions, PackageJson, ResolveOptions};
use clap::{Args, Parser, Subcommand};
use output::OutputFormat;
use std::path::PathBuf;

/// Resolve layered configuration and watch it for changes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Project directory
    #[arg(long, env = "CONFSTACK_CWD", default_value = ".", global = true)]
    pub cwd: PathBuf,

    /// Config name (`app` looks for app.config.* and .apprc)
    #[arg(short, long, env = "CONFSTACK_NAME", default_value = "config", global = true)]
    pub name: String,

    /// Environment name for `$<env>` sections (default: NODE_ENV)
    #[arg(short, long, env = "CONFSTACK_ENV", global = true)]
    pub env: Option<String>,

    /// Main config file name without extension
    #[arg(long, env = "CONFSTACK_CONFIG_FILE", global = true)]
    pub config_file: Option<String>,

    /// rc file name (default: .<name>rc)
    #[arg(long, env = "CONFSTACK_RC_FILE", global = true)]
    pub rc_file: Option<String>,

    /// Do not read rc files
    #[arg(long, global = true)]
    pub no_rc: bool,

    /// Also read workspace and user rc files
    #[arg(long, env = "CONFSTACK_GLOBAL_RC", global = true)]
    pub global_rc: bool,

    /// Load variable files first (default: .env)
    #[arg(long, num_args = 0.., value_delimiter = ',', value_name = "FILES", global = true)]
    pub dotenv: Option<Vec<String>>,

    /// Read package.json fields (default: the config name)
    #[arg(long, num_args = 0.., value_delimiter = ',', value_name = "KEYS", global = true)]
    pub package_json: Option<Vec<String>>,

    /// Do not resolve `extends`
    #[arg(long, global = true)]
    pub no_extend: bool,

    /// Do not download remote templates
    #[arg(long, global = true)]
    pub offline: bool,

    /// Fail when the main config file is missing
    #[arg(long, global = true)]
    pub required: bool,

    /// Drop top-level `$` keys from the result
    #[arg(long, global = true)]
    pub omit_dollar_keys: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json, global = true)]
    pub format: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the resolved config (default if no subcommand given)
    Resolve(ResolveArgs),

    /// List the layers that contributed to the config
    Layers,

    /// Print the config, then every change as files are edited
    Watch(WatchArgs),

    /// Set a value in the main config file, creating it if needed
    Set(SetArgs),
}

/// Arguments for the resolve subcommand
#[derive(Args, Debug, Default)]
pub struct ResolveArgs {
    /// Print only this key (`server` or a JSON pointer like `/server/port`)
    #[arg(value_name = "KEY")]
    pub key: Option<String>,
}

/// Arguments for the watch subcommand
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Debounce window in milliseconds; 0 reacts to raw events
    #[arg(long, env = "CONFSTACK_DEBOUNCE_MS", default_value_t = 100)]
    pub debounce_ms: u64,
}

/// Arguments for the set subcommand
#[derive(Args, Debug)]
pub struct SetArgs {
    /// Dotted key, e.g. `server.port`
    pub key: String,

    /// Value, parsed as JSON5 when possible, otherwise taken as a string
    pub value: String,

    /// Extension of a newly created config file
    #[arg(long, default_value = ".ts")]
    pub create_extension: String,
}

impl Cli {
    /// Resolution options for the global flags.
    pub fn resolve_options(&self) -> ResolveOptions {
        let mut options = ResolveOptions::new(&self.cwd)
            .with_name(&self.name)
            .with_global_rc(self.global_rc)
            .with_giget(!self.offline)
            .required(self.required)
            .omit_dollar_keys(self.omit_dollar_keys);
        if let Some(env) = &self.env {
            options = options.with_env_name(env);
        }
        if let Some(file) = &self.config_file {
            options = options.with_config_file(file);
        }
        if let Some(file) = &self.rc_file {
            options = options.with_rc_file(file);
        }
        if self.no_rc {
            options = options.without_rc();
        }
        if self.no_extend {
            options = options.without_extend();
        }
        if let Some(files) = &self.dotenv {
            options = options.with_dotenv(if files.is_empty() {
                DotenvOptions::default()
            } else {
                DotenvOptions::with_files(files.clone())
            });
        }
        if let Some(keys) = &self.package_json {
            options = options.with_package_json(if keys.is_empty() {
                PackageJson::Name
            } else {
                PackageJson::Keys(keys.clone())
            });
        }
        options
    }
}
