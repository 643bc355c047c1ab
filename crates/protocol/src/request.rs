use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::message::Message;

/// A provider-neutral chat request.
///
/// Built by the orchestrator, translated by an adapter into the vendor's
/// turn shape. The adapter never sees where the messages came from.
#[derive(Clone)]
pub struct Request {
    pub messages: Vec<Message>,
    pub model: String,
    /// Opaque end-user tag forwarded to providers that accept one.
    pub user: String,
    /// Advertised tools, keyed by MCP server name.
    pub tools: BTreeMap<String, Vec<ToolDescriptor>>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
    pub format: ResponseFormat,
    /// Invoked by the adapter's `call_tools` for each pending call.
    pub tool_caller: Option<Arc<dyn ToolCaller>>,
}

impl Request {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: model.into(),
            user: String::new(),
            tools: BTreeMap::new(),
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            stop: Vec::new(),
            format: ResponseFormat::Text,
            tool_caller: None,
        }
    }

    /// Flattened view of the advertised tools under their qualified
    /// `<server>_<tool>` names, in server order.
    pub fn qualified_tools(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .flat_map(|(server, tools)| {
                tools.iter().map(move |tool| ToolDescriptor {
                    name: format!("{server}_{}", tool.name),
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("model", &self.model)
            .field("messages", &self.messages.len())
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

/// Response format hint forwarded to providers that support one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// A tool as advertised to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool's argument object.
    pub input_schema: Value,
}

/// Error from a tool invocation. The text is fed back to the model as the
/// tool's response so it can recover or surface the failure itself.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ToolError(pub String);

/// Callback seam between the adapters and the tool gateway.
#[async_trait]
pub trait ToolCaller: Send + Sync {
    /// Invoke `name` (qualified `<server>_<tool>`) with a JSON argument
    /// object and return its textual output.
    async fn call(&self, name: &str, arguments: &str) -> Result<String, ToolError>;
}

/// One streamed fragment of assistant text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
}

impl From<String> for Chunk {
    fn from(content: String) -> Self {
        Self { content }
    }
}

/// User-visible progress for one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallStatus {
    pub name: String,
    pub error: Option<String>,
}
