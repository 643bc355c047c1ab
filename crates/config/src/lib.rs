//! Parley configuration structures to map the parley.yml settings document.

#![deny(missing_docs)]

mod api;
mod error;
mod loader;
mod mcp;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use api::{ApiConfig, ModelConfig, Protocol};
pub use error::ConfigError;
pub use mcp::McpServerConfig;
use serde::Deserialize;

/// Default cap on stdin characters appended to the prompt.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 12_250;

/// Main configuration structure for the parley CLI.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Settings {
    /// API used when `--api` is not given.
    pub default_api: Option<String>,
    /// Model used when `--model` is not given.
    pub default_model: Option<String>,
    /// Preamble prepended as a system message when `--format` is given.
    pub format_text: Option<String>,
    /// Cap on stdin characters appended to the prompt, unless `--no-limit`.
    pub max_input_chars: Option<usize>,
    /// Upper bound on provider retries.
    pub max_retries: Option<u32>,
    /// Characters-per-token estimate used when trimming an oversized prompt.
    pub avg_chars_per_token: Option<usize>,
    /// Per-server timeout, in seconds, for MCP listing and invocation.
    pub mcp_timeout: Option<u64>,
    /// MCP server names to skip; `"*"` disables all of them.
    pub mcp_disable: Vec<String>,
    /// Role presets: role name to a list of system-message sources. Each
    /// source is a literal, a `file://` path, or an `http(s)://` URL.
    pub roles: BTreeMap<String, Vec<String>>,
    /// Chat providers, keyed by the name given to `--api`.
    pub apis: BTreeMap<String, ApiConfig>,
    /// MCP tool servers, keyed by the name tools are qualified with.
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
}

impl Settings {
    /// Load settings from a file path. A missing file yields defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
        loader::load(path.as_ref())
    }

    /// The default settings path, `$XDG_CONFIG_HOME/parley/parley.yml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("parley").join("parley.yml"))
    }

    /// The cache root under which conversations and temp blobs live.
    pub fn default_cache_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("parley"))
    }

    /// Look up an api by name, falling back to the configured default.
    pub fn api(&self, name: Option<&str>) -> Result<(&str, &ApiConfig), ConfigError> {
        let name = name
            .or(self.default_api.as_deref())
            .ok_or(ConfigError::NoApiSelected)?;

        match self.apis.get_key_value(name) {
            Some((name, api)) => Ok((name.as_str(), api)),
            None => Err(ConfigError::UnknownApi(name.to_string())),
        }
    }

    /// Resolve a role to its system-message sources.
    pub fn role(&self, name: &str) -> Result<&[String], ConfigError> {
        self.roles
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ConfigError::UnknownRole(name.to_string()))
    }

    /// Effective stdin cap.
    pub fn max_input_chars(&self) -> usize {
        self.max_input_chars.unwrap_or(DEFAULT_MAX_INPUT_CHARS)
    }

    /// Effective retry bound.
    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(5)
    }

    /// Effective characters-per-token estimate.
    pub fn avg_chars_per_token(&self) -> usize {
        self.avg_chars_per_token.unwrap_or(4)
    }

    /// Effective MCP timeout in seconds.
    pub fn mcp_timeout_secs(&self) -> u64 {
        self.mcp_timeout.unwrap_or(15)
    }
}
