use std::path::Path;

use crate::{ConfigError, Settings};

pub(crate) fn load(path: &Path) -> Result<Settings, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        // A first run has no settings file; everything can come from flags.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("no settings file at {}, using defaults", path.display());
            return Ok(Settings::default());
        }
        Err(err) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: err,
            });
        }
    };

    let settings: Settings = serde_yaml::from_str(&content).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        source: err,
    })?;

    validate(&settings)?;

    Ok(settings)
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if let Some(default_api) = &settings.default_api
        && !settings.apis.contains_key(default_api)
    {
        return Err(ConfigError::UnknownApi(default_api.clone()));
    }

    for (name, api) in &settings.apis {
        if api.protocol == crate::Protocol::Azure && api.base_url.is_none() {
            log::warn!("apis.{name}: azure apis usually need a base-url pointing at the resource");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load(&dir.path().join("parley.yml")).unwrap();
        assert!(settings.apis.is_empty());
    }

    #[test]
    fn unknown_default_api_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.yml");
        std::fs::write(
            &path,
            indoc! {r#"
                default-api: nowhere
                apis:
                  openai:
                    protocol: openai
            "#},
        )
        .unwrap();

        let err = load(&path).unwrap_err();
        assert_eq!(err.to_string(), "api 'nowhere' is not configured");
    }

    #[test]
    fn full_document_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.yml");
        std::fs::write(
            &path,
            indoc! {r#"
                default-api: openai
                default-model: gpt-4o
                format-text: Format the response as markdown without enclosing backticks.
                max-input-chars: 392000
                mcp-disable: ["slow-server"]
                roles:
                  default: []
                  shell:
                    - you are a shell expert
                    - file:///etc/parley/shell.txt
                apis:
                  openai:
                    protocol: openai
                    api-key-env: OPENAI_API_KEY
                    models:
                      gpt-4o:
                        aliases: ["4o"]
                        fallback: gpt-4
                  localhost:
                    protocol: ollama
                    base-url: http://localhost:11434
                mcp-servers:
                  github:
                    command: docker
                    args: ["run", "-i", "--rm", "ghcr.io/github/github-mcp-server"]
            "#},
        )
        .unwrap();

        let settings = load(&path).unwrap();
        assert_eq!(settings.default_model.as_deref(), Some("gpt-4o"));
        assert_eq!(settings.apis.len(), 2);
        assert_eq!(settings.mcp_servers.len(), 1);
        assert_eq!(settings.role("shell").unwrap().len(), 2);
    }
}
