use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use config::McpServerConfig;
use protocol::{ToolCaller, ToolDescriptor, ToolError};
use rmcp::{
    RoleClient, ServiceExt,
    model::CallToolRequestParam,
    service::RunningService,
    transport::{ConfigureCommandExt, child_process::TokioChildProcess},
};
use tokio::process::Command;
use tokio::task::JoinSet;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(
        "could not set up MCP server '{server}': {detail}; the server or its container may be down"
    )]
    Setup { server: String, detail: String },

    #[error("tool name '{0}' is not of the form <server>_<tool>")]
    BadToolName(String),

    #[error("MCP server '{0}' is not configured")]
    UnknownServer(String),

    #[error("tool '{name}' was given invalid arguments: {detail}")]
    BadArguments { name: String, detail: String },

    #[error("tool '{name}' failed: {detail}")]
    CallFailed { name: String, detail: String },
}

/// Split a qualified `<server>_<tool>` name on the first underscore.
pub fn split_qualified_name(qualified: &str) -> Result<(&str, &str), GatewayError> {
    qualified
        .split_once('_')
        .filter(|(server, tool)| !server.is_empty() && !tool.is_empty())
        .ok_or_else(|| GatewayError::BadToolName(qualified.to_string()))
}

/// Gateway over the configured MCP tool servers.
pub struct ToolGateway {
    servers: BTreeMap<String, McpServerConfig>,
    timeout: Duration,
}

impl ToolGateway {
    /// Build a gateway over `servers`, dropping every name in `disable`
    /// (`"*"` disables all of them).
    pub fn new(
        servers: BTreeMap<String, McpServerConfig>,
        disable: &[String],
        timeout: Duration,
    ) -> Self {
        let disable_all = disable.iter().any(|name| name == "*");
        let servers = servers
            .into_iter()
            .filter(|(name, _)| {
                let enabled = !disable_all && !disable.contains(name);
                if !enabled {
                    log::debug!("MCP server '{name}' is disabled");
                }
                enabled
            })
            .collect();

        Self { servers, timeout }
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// List the tools advertised by every enabled server, concurrently.
    /// Failures are per-server; the first one is surfaced after all servers
    /// have settled.
    pub async fn tools(&self) -> Result<BTreeMap<String, Vec<ToolDescriptor>>, GatewayError> {
        let mut set = JoinSet::new();

        for (name, server) in &self.servers {
            let name = name.clone();
            let server = server.clone();
            let timeout = self.timeout;

            set.spawn(async move {
                let tools = list_server_tools(&name, &server, timeout).await;
                (name, tools)
            });
        }

        let mut tools = BTreeMap::new();
        let mut first_error = None;

        while let Some(joined) = set.join_next().await {
            let Ok((name, result)) = joined else {
                // A listing task panicked; nothing to aggregate from it.
                continue;
            };

            match result {
                Ok(list) => {
                    log::debug!("MCP server '{name}' advertises {} tools", list.len());
                    tools.insert(name, list);
                }
                Err(err) => {
                    log::warn!("{err}");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(tools),
        }
    }

    /// Invoke `qualified` (`<server>_<tool>`) with a JSON argument object and
    /// return the concatenated textual content of the reply.
    pub async fn call(&self, qualified: &str, arguments: &str) -> Result<String, GatewayError> {
        let (server_name, tool) = split_qualified_name(qualified)?;

        let server = self
            .servers
            .get(server_name)
            .ok_or_else(|| GatewayError::UnknownServer(server_name.to_string()))?;

        let arguments: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(arguments).map_err(|err| GatewayError::BadArguments {
                name: qualified.to_string(),
                detail: err.to_string(),
            })?;

        let service = connect(server_name, server, self.timeout).await?;

        let result = tokio::time::timeout(
            self.timeout,
            service.call_tool(CallToolRequestParam {
                name: tool.to_string().into(),
                arguments: Some(arguments),
            }),
        )
        .await;

        // The child process dies with the service on every path.
        if let Err(err) = service.cancel().await {
            log::debug!("MCP server '{server_name}' did not shut down cleanly: {err}");
        }

        let result = match result {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                return Err(GatewayError::CallFailed {
                    name: qualified.to_string(),
                    detail: err.to_string(),
                });
            }
            Err(_) => {
                return Err(GatewayError::Setup {
                    server: server_name.to_string(),
                    detail: format!("tool call timed out after {:?}", self.timeout),
                });
            }
        };

        let content = result
            .content
            .into_iter()
            .map(|block| match block.as_text() {
                Some(text) => text.text.clone(),
                None => "[Non-text content]".to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error.unwrap_or(false) {
            return Err(GatewayError::CallFailed {
                name: qualified.to_string(),
                detail: content,
            });
        }

        Ok(content)
    }
}

#[async_trait]
impl ToolCaller for ToolGateway {
    async fn call(&self, name: &str, arguments: &str) -> Result<String, ToolError> {
        ToolGateway::call(self, name, arguments)
            .await
            .map_err(|err| ToolError(err.to_string()))
    }
}

async fn list_server_tools(
    name: &str,
    server: &McpServerConfig,
    timeout: Duration,
) -> Result<Vec<ToolDescriptor>, GatewayError> {
    let service = connect(name, server, timeout).await?;

    let listed = tokio::time::timeout(timeout, service.list_tools(Default::default())).await;

    if let Err(err) = service.cancel().await {
        log::debug!("MCP server '{name}' did not shut down cleanly: {err}");
    }

    let listed = match listed {
        Ok(Ok(listed)) => listed,
        Ok(Err(err)) => {
            return Err(GatewayError::Setup {
                server: name.to_string(),
                detail: format!("tools/list failed: {err}"),
            });
        }
        Err(_) => {
            return Err(GatewayError::Setup {
                server: name.to_string(),
                detail: format!("tools/list timed out after {timeout:?}"),
            });
        }
    };

    Ok(listed
        .tools
        .into_iter()
        .map(|tool| ToolDescriptor {
            name: tool.name.to_string(),
            description: tool
                .description
                .map(|description| description.to_string())
                .unwrap_or_default(),
            input_schema: serde_json::Value::Object((*tool.input_schema).clone()),
        })
        .collect())
}

/// Spawn the server subprocess and run the MCP initialization handshake.
async fn connect(
    name: &str,
    server: &McpServerConfig,
    timeout: Duration,
) -> Result<RunningService<RoleClient, ()>, GatewayError> {
    let child = TokioChildProcess::new(Command::new(&server.command).configure(|cmd| {
        cmd.args(&server.args);
        // On top of the caller's environment, not instead of it.
        for (key, value) in &server.env {
            cmd.env(key, value);
        }
    }))
    .map_err(|err| GatewayError::Setup {
        server: name.to_string(),
        detail: format!("could not launch '{}': {err}", server.command),
    })?;

    match tokio::time::timeout(timeout, ().serve(child)).await {
        Ok(Ok(service)) => Ok(service),
        Ok(Err(err)) => Err(GatewayError::Setup {
            server: name.to_string(),
            detail: format!("initialization failed: {err}"),
        }),
        Err(_) => Err(GatewayError::Setup {
            server: name.to_string(),
            detail: format!("initialization timed out after {timeout:?}"),
        }),
    }
}
