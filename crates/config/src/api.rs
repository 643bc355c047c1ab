use std::collections::BTreeMap;
use std::process::Command;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Wire protocol an api entry speaks. Selects the provider adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    /// OpenAI-compatible `chat/completions`.
    Openai,
    /// OpenAI-compatible, under the Azure endpoint scheme.
    Azure,
    /// OpenAI-compatible, authenticated with a GitHub Copilot bearer token.
    Copilot,
    /// Anthropic Messages API.
    Anthropic,
    /// Google `streamGenerateContent`.
    Google,
    /// Cohere `v2/chat`.
    Cohere,
    /// Ollama `/api/chat`.
    Ollama,
}

impl Protocol {
    /// Whether this protocol is OpenAI-shaped on the wire.
    pub fn is_openai_compatible(self) -> bool {
        matches!(self, Protocol::Openai | Protocol::Azure | Protocol::Copilot)
    }
}

/// Configuration for one chat provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ApiConfig {
    /// Wire protocol; picks the adapter.
    pub protocol: Protocol,
    /// Endpoint base. Falls back to the protocol's public endpoint.
    pub base_url: Option<String>,
    /// Literal API key. Prefer `api-key-env` outside of throwaway setups.
    pub api_key: Option<SecretString>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
    /// Shell command whose trimmed stdout is the API key.
    pub api_key_cmd: Option<String>,
    /// `api-version` query parameter for Azure deployments.
    pub api_version: Option<String>,
    /// Authenticate Azure requests with a bearer token instead of `api-key`.
    #[serde(default)]
    pub azure_ad: bool,
    /// End-user tag forwarded to providers that accept one.
    pub user: Option<String>,
    /// Models served by this api, keyed by their canonical name.
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfig>,
}

/// Per-model tuning.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ModelConfig {
    /// Alternate names accepted by `--model`.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Model-specific stdin cap; overrides the global one.
    pub max_input_chars: Option<usize>,
    /// Model swapped in when the upstream reports this one missing.
    pub fallback: Option<String>,
}

impl ApiConfig {
    /// Resolve the canonical model name for `name`, accepting aliases.
    /// Unconfigured names pass through untouched so new models work before
    /// the settings file catches up.
    pub fn resolve_model(&self, name: &str) -> String {
        if self.models.contains_key(name) {
            return name.to_string();
        }

        self.models
            .iter()
            .find(|(_, model)| model.aliases.iter().any(|alias| alias == name))
            .map(|(canonical, _)| canonical.clone())
            .unwrap_or_else(|| name.to_string())
    }

    /// The model entry for a canonical name, if configured.
    pub fn model(&self, name: &str) -> Option<&ModelConfig> {
        self.models.get(name)
    }

    /// Resolve the API key: literal, then environment, then command.
    pub fn resolve_key(&self, api_name: &str) -> Result<SecretString, ConfigError> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }

        if let Some(var) = &self.api_key_env {
            match std::env::var(var) {
                Ok(value) if !value.is_empty() => return Ok(SecretString::from(value)),
                _ => {
                    return Err(ConfigError::MissingKey {
                        api: api_name.to_string(),
                        hint: format!("set ${var} or configure apis.{api_name}.api-key"),
                    });
                }
            }
        }

        if let Some(cmd) = &self.api_key_cmd {
            let output = Command::new("sh").arg("-c").arg(cmd).output().map_err(|e| {
                ConfigError::MissingKey {
                    api: api_name.to_string(),
                    hint: format!("apis.{api_name}.api-key-cmd failed to run: {e}"),
                }
            })?;

            if !output.status.success() {
                return Err(ConfigError::MissingKey {
                    api: api_name.to_string(),
                    hint: format!("apis.{api_name}.api-key-cmd exited with {}", output.status),
                });
            }

            let key = String::from_utf8_lossy(&output.stdout).trim().to_string();

            if key.is_empty() {
                return Err(ConfigError::MissingKey {
                    api: api_name.to_string(),
                    hint: format!("apis.{api_name}.api-key-cmd produced no output"),
                });
            }

            return Ok(SecretString::from(key));
        }

        // Ollama runs unauthenticated on localhost.
        if self.protocol == Protocol::Ollama {
            return Ok(SecretString::from(String::new()));
        }

        Err(ConfigError::MissingKey {
            api: api_name.to_string(),
            hint: format!("configure apis.{api_name}.api-key, api-key-env or api-key-cmd"),
        })
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use secrecy::ExposeSecret;

    use super::*;

    fn api(yaml: &str) -> ApiConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn model_aliases_resolve_to_canonical_names() {
        let api = api(indoc! {r#"
            protocol: openai
            models:
              gpt-4o:
                aliases: ["4o"]
              gpt-4o-mini:
                aliases: ["4o-mini", "mini"]
        "#});

        assert_eq!(api.resolve_model("gpt-4o"), "gpt-4o");
        assert_eq!(api.resolve_model("4o"), "gpt-4o");
        assert_eq!(api.resolve_model("mini"), "gpt-4o-mini");
        // Unconfigured names pass through.
        assert_eq!(api.resolve_model("o3"), "o3");
    }

    #[test]
    fn key_resolution_prefers_literal_over_env() {
        let api = api(indoc! {r#"
            protocol: openai
            api-key: sk-literal
            api-key-env: PARLEY_TEST_KEY
        "#});

        temp_env::with_var("PARLEY_TEST_KEY", Some("sk-env"), || {
            let key = api.resolve_key("openai").unwrap();
            assert_eq!(key.expose_secret(), "sk-literal");
        });
    }

    #[test]
    fn key_resolution_reads_environment() {
        let api = api(indoc! {r#"
            protocol: openai
            api-key-env: PARLEY_TEST_KEY_2
        "#});

        temp_env::with_var("PARLEY_TEST_KEY_2", Some("sk-env"), || {
            let key = api.resolve_key("openai").unwrap();
            assert_eq!(key.expose_secret(), "sk-env");
        });

        temp_env::with_var("PARLEY_TEST_KEY_2", None::<&str>, || {
            let err = api.resolve_key("openai").unwrap_err();
            assert!(err.to_string().contains("PARLEY_TEST_KEY_2"));
        });
    }

    #[test]
    fn key_resolution_runs_command() {
        let api = api(indoc! {r#"
            protocol: openai
            api-key-cmd: "echo sk-from-cmd"
        "#});

        let key = api.resolve_key("openai").unwrap();
        assert_eq!(key.expose_secret(), "sk-from-cmd");
    }

    #[test]
    fn ollama_needs_no_key() {
        let api = api("protocol: ollama");
        assert!(api.resolve_key("local").is_ok());
    }
}
