use protocol::{Message, Request, ResponseFormat, Role};
use serde::Serialize;
use serde_json::Value;

/// OpenAI `chat/completions` request body.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct OpenAiRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<OpenAiResponseFormat>,
}

impl OpenAiRequest {
    pub fn from_request(request: &Request) -> Self {
        let tools: Vec<OpenAiTool> = request
            .qualified_tools()
            .into_iter()
            .map(|tool| OpenAiTool {
                r#type: "function",
                function: OpenAiFunction {
                    name: tool.name,
                    description: tool.description,
                    parameters: tool.input_schema,
                },
            })
            .collect();

        Self {
            model: request.model.clone(),
            messages: request.messages.iter().map(OpenAiMessage::from_message).collect(),
            stream: true,
            user: (!request.user.is_empty()).then(|| request.user.clone()),
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            stop: request.stop.clone(),
            tools: (!tools.is_empty()).then_some(tools),
            response_format: match request.format {
                ResponseFormat::Text => None,
                ResponseFormat::Json => Some(OpenAiResponseFormat {
                    r#type: "json_object",
                }),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OpenAiMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl OpenAiMessage {
    pub fn from_message(message: &Message) -> Self {
        match message.role {
            Role::System => Self::plain("system", &message.content),
            Role::User => Self::plain("user", &message.content),
            Role::Assistant => {
                let calls: Vec<OpenAiToolCall> = message
                    .tool_calls
                    .iter()
                    .map(|call| OpenAiToolCall {
                        id: call.id.clone(),
                        r#type: "function",
                        function: OpenAiFunctionCall {
                            name: call.function.name.clone(),
                            arguments: call.function.arguments.clone(),
                        },
                    })
                    .collect();

                Self {
                    role: "assistant",
                    // An assistant turn that only called tools has no text.
                    content: (!message.content.is_empty() || calls.is_empty())
                        .then(|| message.content.clone()),
                    tool_calls: (!calls.is_empty()).then_some(calls),
                    tool_call_id: None,
                }
            }
            Role::Tool => Self {
                role: "tool",
                content: Some(message.content.clone()),
                tool_calls: None,
                tool_call_id: message.tool_calls.first().map(|call| call.id.clone()),
            },
        }
    }

    fn plain(role: &'static str, content: &str) -> Self {
        Self {
            role,
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OpenAiTool {
    pub r#type: &'static str,
    pub function: OpenAiFunction,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OpenAiFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OpenAiToolCall {
    pub id: String,
    pub r#type: &'static str,
    pub function: OpenAiFunctionCall,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OpenAiFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OpenAiResponseFormat {
    pub r#type: &'static str,
}
