//! Layered configuration resolution.
//!
//! A resolution pass combines these sources, highest precedence first:
//! 1. **Overrides** - passed programmatically
//! 2. **Main config** - `<name>.config.{ts,json,yaml,toml,...}` in the project
//!    directory or its `.config/` directory
//! 3. **rc files** - `.<name>rc` in the project, then the workspace root and
//!    the user's config directory
//! 4. **package.json** - selected fields of the nearest manifest
//! 5. **Default config** - passed programmatically
//! 6. **Extended layers** - `extends` entries, local or remote, recursively
//! 7. **Defaults** - filled in only where nothing else set a value
//!
//! ## Merge Strategy
//! Mappings merge key by key; scalars and arrays from the higher layer win.
//! `$<env>` and `$env.<env>` sections are merged over their own file before
//! it joins the stack, and `$meta` is split off into layer metadata.
//!
//! ## Environment Variables
//! - `NODE_ENV` - default environment name for `$<env>` sections
//! - `XDG_CONFIG_HOME` - user rc directory (default: home directory)
//! - `XDG_CACHE_HOME` - remote template cache (default: `~/.cache`)

pub mod diff;
pub mod dotenv;
mod extends;
pub mod formats;
mod loader;
mod merge;
mod options;
pub mod package;
pub mod rc;
pub mod remote;
mod source;
mod types;
pub mod update;
pub mod watcher;

pub use diff::{ChangeKind, ConfigChange, ConfigDiff};
pub use dotenv::{
    DotenvOptions, EnvStore, EnvTarget, ProcessEnv, SharedEnv, SourcedVars, interpolate,
};
pub use extends::extend_config;
pub use formats::{Format, ModuleEvaluator, SUPPORTED_EXTENSIONS, UPDATABLE_EXTENSIONS};
pub use loader::load_config;
pub use merge::{Merger, deep_merge, deep_merge_all, default_merger, merge_layers};
pub use options::{ENV_NAME_VAR, EnvName, ExtendOptions, ResolveOptions};
pub use package::PackageJson;
pub use remote::{TarballFetcher, TemplateFetcher};
pub use source::{ResolvedSource, SourceResolver, resolve_source};
pub use types::*;
pub use update::{
    ConfigRewriter, CreateDecision, LiteralRewriter, UpdateOptions, UpdateResult, update_config,
};
pub use watcher::{
    ChangeType, ConfigWatcher, ReloadOutcome, WatchContext, WatchEvent, WatchHooks, WatchOptions,
    WatchState, watch_config,
};
