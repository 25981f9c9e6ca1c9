//! Error types for orgmapper-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from tenant store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure (permission denied, disk full, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse tenant at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The addressed tenant does not exist.
    #[error("tenant {key} not found")]
    NotFound { key: String },

    /// A manifest failed the minimal checks done on apply.
    #[error("invalid tenant {key}: {reason}")]
    Invalid { key: String, reason: String },

    /// The backing store cannot serve requests.
    #[error("tenant store unavailable: {0}")]
    Unavailable(String),
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

/// Errors loading controller configuration or credentials.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("missing configuration value: {0}")]
    Missing(&'static str),

    #[error("cannot read credentials from environment variable {name}")]
    CredentialsEnv { name: String },
}
