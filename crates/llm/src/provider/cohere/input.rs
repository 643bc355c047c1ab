use protocol::{Message, Request, ResponseFormat, Role};
use serde::Serialize;
use serde_json::Value;

/// Cohere `v2/chat` request body. The v2 API has dedicated `system`, `user`,
/// `assistant` and `tool` roles, with tool calls riding inside the assistant
/// message.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct CohereRequest {
    pub model: String,
    pub messages: Vec<CohereMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<CohereTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<CohereResponseFormat>,
}

impl CohereRequest {
    pub fn from_request(request: &Request) -> Self {
        let tools: Vec<CohereTool> = request
            .qualified_tools()
            .into_iter()
            .map(|tool| CohereTool {
                r#type: "function",
                function: CohereFunction {
                    name: tool.name,
                    description: tool.description,
                    parameters: tool.input_schema,
                },
            })
            .collect();

        Self {
            model: request.model.clone(),
            messages: request.messages.iter().map(CohereMessage::from_message).collect(),
            stream: true,
            temperature: request.temperature,
            p: request.top_p,
            k: request.top_k,
            max_tokens: request.max_tokens,
            stop_sequences: request.stop.clone(),
            tools: (!tools.is_empty()).then_some(tools),
            response_format: match request.format {
                ResponseFormat::Text => None,
                ResponseFormat::Json => Some(CohereResponseFormat {
                    r#type: "json_object",
                }),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CohereMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_plan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<CohereToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl CohereMessage {
    pub fn from_message(message: &Message) -> Self {
        match message.role {
            Role::System => Self::plain("system", &message.content),
            Role::User => Self::plain("user", &message.content),
            Role::Assistant => {
                let calls: Vec<CohereToolCall> = message
                    .tool_calls
                    .iter()
                    .map(|call| CohereToolCall {
                        id: call.id.clone(),
                        r#type: "function",
                        function: CohereFunctionCall {
                            name: call.function.name.clone(),
                            arguments: call.function.arguments.clone(),
                        },
                    })
                    .collect();

                Self {
                    role: "assistant",
                    content: (!message.content.is_empty()).then(|| message.content.clone()),
                    // Preserved verbatim for the resumed turn, never rendered.
                    tool_plan: (!message.tool_plan.is_empty()).then(|| message.tool_plan.clone()),
                    tool_calls: (!calls.is_empty()).then_some(calls),
                    tool_call_id: None,
                }
            }
            Role::Tool => Self {
                role: "tool",
                content: Some(message.content.clone()),
                tool_plan: None,
                tool_calls: None,
                tool_call_id: message.tool_calls.first().map(|call| call.id.clone()),
            },
        }
    }

    fn plain(role: &'static str, content: &str) -> Self {
        Self {
            role,
            content: Some(content.to_string()),
            tool_plan: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CohereTool {
    pub r#type: &'static str,
    pub function: CohereFunction,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CohereFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CohereToolCall {
    pub id: String,
    pub r#type: &'static str,
    pub function: CohereFunctionCall,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CohereFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CohereResponseFormat {
    pub r#type: &'static str,
}
