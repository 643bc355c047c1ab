use protocol::{Message, Request, Role};
use serde::Serialize;
use serde_json::Value;

/// `max_tokens` is mandatory on the Messages API; this is the value used
/// when the caller did not pick one.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API request body.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct AnthropicRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<AnthropicMessage>,
    pub stream: bool,
    /// Anthropic has no top-level `system` role; system messages accumulate
    /// here instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AnthropicMetadata>,
}

impl AnthropicRequest {
    pub fn from_request(request: &Request) -> Self {
        let mut system = String::new();
        let mut messages = Vec::new();

        for message in &request.messages {
            match message.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push_str("\n\n");
                    }
                    system.push_str(&message.content);
                }
                _ => messages.push(AnthropicMessage::from_message(message)),
            }
        }

        let tools: Vec<AnthropicTool> = request
            .qualified_tools()
            .into_iter()
            .map(|tool| AnthropicTool {
                name: tool.name,
                description: tool.description,
                input_schema: tool.input_schema,
            })
            .collect();

        Self {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages,
            stream: true,
            system: (!system.is_empty()).then_some(system),
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            stop_sequences: request.stop.clone(),
            tools: (!tools.is_empty()).then_some(tools),
            metadata: (!request.user.is_empty()).then(|| AnthropicMetadata {
                user_id: request.user.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AnthropicMessage {
    pub role: &'static str,
    pub content: Vec<AnthropicContent>,
}

impl AnthropicMessage {
    pub fn from_message(message: &Message) -> Self {
        match message.role {
            Role::Assistant => {
                let mut content = Vec::new();

                if !message.content.is_empty() {
                    content.push(AnthropicContent::Text {
                        text: message.content.clone(),
                    });
                }

                for call in &message.tool_calls {
                    content.push(AnthropicContent::ToolUse {
                        id: call.id.clone(),
                        name: call.function.name.clone(),
                        input: serde_json::from_str(&call.function.arguments)
                            .unwrap_or_else(|_| Value::Object(Default::default())),
                    });
                }

                Self {
                    role: "assistant",
                    content,
                }
            }
            // Tool results travel as user-role content blocks.
            Role::Tool => Self {
                role: "user",
                content: message
                    .tool_calls
                    .iter()
                    .map(|call| AnthropicContent::ToolResult {
                        tool_use_id: call.id.clone(),
                        content: message.content.clone(),
                        is_error: call.is_error,
                    })
                    .collect(),
            },
            _ => Self {
                role: "user",
                content: vec![AnthropicContent::Text {
                    text: message.content.clone(),
                }],
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicContent {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AnthropicTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AnthropicMetadata {
    pub user_id: String,
}
