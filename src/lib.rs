//! confstack library
//!
//! Resolves configuration from layered sources and keeps it current as
//! files change. See [`config`] for the resolution order.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;

pub use config::{ResolveOptions, ResolvedConfig, load_config, watch_config};
pub use error::{ConfigError, Result};
