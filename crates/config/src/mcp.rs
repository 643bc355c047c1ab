use std::collections::BTreeMap;

use serde::Deserialize;

/// Configuration for an individual MCP tool server, launched as a child
/// process speaking the MCP stdio framing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct McpServerConfig {
    /// Executable to launch.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment on top of the caller's.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}
