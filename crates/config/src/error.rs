use std::path::PathBuf;

use thiserror::Error;

/// Settings loading and lookup errors.
///
/// Every variant's display string is the one-sentence reason shown to the
/// user; it points at the settings section that needs fixing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file exists but could not be read.
    #[error("could not read settings at {path}: {source}")]
    Read {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// The settings file is not valid YAML for the expected shape.
    #[error("could not parse settings at {path}: {source}")]
    Parse {
        /// Path that failed.
        path: PathBuf,
        /// Underlying deserialization failure.
        source: serde_yaml::Error,
    },

    /// Neither `--api` nor `default-api` named an api.
    #[error("no api selected; pass --api or set default-api in the settings")]
    NoApiSelected,

    /// The named api has no entry under `apis`.
    #[error("api '{0}' is not configured")]
    UnknownApi(String),

    /// The named role has no entry under `roles`.
    #[error("role '{0}' is not configured")]
    UnknownRole(String),

    /// No usable credential for an api.
    #[error("missing api key for '{api}': {hint}")]
    MissingKey {
        /// Api the key is for.
        api: String,
        /// What to configure to fix it.
        hint: String,
    },
}
