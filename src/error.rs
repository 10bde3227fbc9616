//! Structured error types for configuration resolution.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors surfaced by config resolution, watching and updating.
///
/// Absent optional sources (rc files, package manifest, individual extends)
/// never produce an error; they are skipped or logged.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The main config file was marked required but could not be found.
    #[error("required config ({}) cannot be resolved", path.display())]
    MissingRequiredConfig { path: PathBuf },

    /// A structured-data file failed to parse.
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// A code-module config was found but no evaluator is configured.
    #[error("no module evaluator configured to load {}", path.display())]
    NoModuleEvaluator { path: PathBuf },

    /// A code-module config failed to evaluate, or its computed value failed.
    #[error("failed to evaluate {}: {message}", path.display())]
    Evaluate { path: PathBuf, message: String },

    /// A programmatic update was attempted on a non-code config file.
    #[error(
        "unsupported config file extension: {ext} ({}) (supported: {})",
        path.display(),
        crate::config::UPDATABLE_EXTENSIONS.join(", ")
    )]
    UnsupportedFileExtension { ext: String, path: PathBuf },

    /// The create hook declined to create a missing config file.
    #[error("config file creation aborted ({})", path.display())]
    CreateAborted { path: PathBuf },

    /// The config file has no default export to update.
    #[error("default export is missing in {}", path.display())]
    MissingDefaultExport { path: PathBuf },

    /// An extends chain refers back to one of its own ancestors.
    #[error("cyclic extends: {}", ExtendChain(chain))]
    CyclicExtend { chain: Vec<PathBuf> },

    /// A remote template could not be downloaded or unpacked.
    #[error("failed to fetch `{uri}`: {message}")]
    Fetch { uri: String, message: String },

    /// Filesystem error on a specific path.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A caller-supplied callback failed.
    #[error("callback failed: {0}")]
    Callback(#[source] anyhow::Error),

    /// The file watcher could not be started.
    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),
}

impl ConfigError {
    pub fn parse(path: &Path, err: impl fmt::Display) -> Self {
        Self::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    pub fn evaluate(path: &Path, err: impl fmt::Display) -> Self {
        Self::Evaluate {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn fetch(uri: &str, err: impl fmt::Display) -> Self {
        Self::Fetch {
            uri: uri.to_string(),
            message: err.to_string(),
        }
    }

    /// Whether this error came from reading or parsing a config source,
    /// as opposed to a setup problem.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. } | Self::Evaluate { .. } | Self::Io { .. } | Self::NoModuleEvaluator { .. }
        )
    }
}

struct ExtendChain<'a>(&'a [PathBuf]);

impl fmt::Display for ExtendChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, path) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " > ")?;
            }
            write!(f, "{}", path.display())?;
        }
        Ok(())
    }
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
