//! Error types for tandem-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while locating, loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, unreadable file, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending path.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`, so `~/.tandem/` cannot be located.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// No config file at the expected path.
    #[error("config not found at {path}; run `tandem init` first")]
    ConfigNotFound { path: PathBuf },

    /// A required field is missing or out of range.
    #[error("invalid config field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for environment variable {var}")]
    InvalidEnv { var: &'static str, value: String },
}
