//! Error types for rigging-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading declarative harness input.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, annotated with the offending path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A required declarative input was not provided by the caller.
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    /// The input was present but violates a structural rule.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.rigging/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Convenience constructor for [`ConfigError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
