//! Error types for dandimirror-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can arise while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, read-only home, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The configured archive instance is not in the known-instances table
    /// and no explicit URLs were given.
    #[error("unknown archive instance '{0}'; run `dandimirror instances` for the list")]
    UnknownInstance(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Rejections from [`crate::types::AssetPath::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetPathError {
    #[error("asset path is empty")]
    Empty,

    #[error("asset path '{0}' contains an empty segment")]
    EmptySegment(String),

    #[error("asset path '{0}' contains '.' or '..'")]
    Relative(String),

    #[error("asset path '{0}' contains a backslash")]
    Backslash(String),

    #[error("path {0} is not inside the mirror root")]
    OutsideRoot(String),

    #[error("path {0} is not valid UTF-8")]
    NotUtf8(String),
}
